use super::{check_collection, ensure_id, Document, DocumentStore, Filter, Update, UpdateResult};
use crate::error::Error;
use crate::schema::SchemaRegistry;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// In-process document store evaluating the expression language directly
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    schemas: Option<Arc<SchemaRegistry>>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guard updates with the schema bound to each collection
    pub fn with_schemas(mut self, schemas: Arc<SchemaRegistry>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Connection("Store connection is closed".to_string()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn update_many(&self, collection: &str, filter: &Filter, update: &Update) -> Result<UpdateResult> {
        self.ensure_open()?;
        check_collection(collection)?;
        filter.validate()?;
        update.validate()?;

        let schema = self.schemas.as_ref().and_then(|s| s.for_collection(collection));
        let mut collections = self.collections.write().await;
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(UpdateResult::default());
        };

        // Stage every change first so a fatal error leaves the collection untouched
        let mut staged = Vec::new();
        let mut result = UpdateResult::default();
        for (index, document) in documents.iter().enumerate() {
            if !filter.matches(document) {
                continue;
            }
            result.matched_count += 1;

            let mut next = document.clone();
            if !update.apply(&mut next)? {
                continue;
            }
            if let Some(schema) = &schema {
                if let Err(e) = schema.check_fields(&next, update.paths()) {
                    warn!("Skipping document {:?} in {}: {}", document.get("_id"), collection, e);
                    continue;
                }
            }
            staged.push((index, next));
        }

        result.modified_count = staged.len() as u64;
        for (index, next) in staged {
            documents[index] = next;
        }

        debug!(
            "updateMany on {}: matched {}, modified {}",
            collection, result.matched_count, result.modified_count
        );
        Ok(result)
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        self.ensure_open()?;
        check_collection(collection)?;
        filter.validate()?;

        let collections = self.collections.read().await;
        let count = collections
            .get(collection)
            .map_or(0, |docs| docs.iter().filter(|d| filter.matches(d)).count());
        Ok(count as u64)
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        self.ensure_open()?;
        check_collection(collection)?;
        filter.validate()?;

        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_one(&self, collection: &str, mut document: Document) -> Result<Uuid> {
        self.ensure_open()?;
        check_collection(collection)?;
        let id = ensure_id(&mut document)?;

        let mut collections = self.collections.write().await;
        let documents = collections.entry(collection.to_string()).or_default();
        if documents.iter().any(|d| d.get("_id") == document.get("_id")) {
            return Err(Error::Operation(format!("Duplicate _id {} in {}", id, collection)).into());
        }
        documents.push(document);
        Ok(id)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
