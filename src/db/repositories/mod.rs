use crate::db::models::{from_document, to_document};
use crate::db::{DocumentStore, Filter};
use crate::error::Error;
use crate::schema::SchemaRegistry;
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub mod events;
pub mod predictions;
pub mod sales;

/// Base repository with the validated write path shared by every entity
#[derive(Clone)]
pub struct Repository {
    /// Document store
    pub store: Arc<dyn DocumentStore>,
    /// Schemas used to validate writes
    pub schemas: Arc<SchemaRegistry>,
}

impl Repository {
    /// Create a new repository
    pub fn new(store: Arc<dyn DocumentStore>, schemas: Arc<SchemaRegistry>) -> Self {
        Self { store, schemas }
    }

    /// Validate `model` against `entity` and insert it into `collection`
    pub async fn insert_validated<T: Serialize>(
        &self,
        entity: &str,
        collection: &str,
        model: &T,
    ) -> Result<Uuid> {
        let document = to_document(model)?;
        let document = self.schemas.validate(entity, &document).map_err(Error::Validation)?;
        let id = self.store.insert_one(collection, document).await?;
        debug!("Inserted {} {} into {}", entity, id, collection);
        Ok(id)
    }

    /// Load and deserialize every document matching `filter`
    pub async fn find_as<T: DeserializeOwned>(&self, collection: &str, filter: &Filter) -> Result<Vec<T>> {
        self.store
            .find(collection, filter)
            .await?
            .into_iter()
            .map(from_document::<T>)
            .collect()
    }
}

/// Restrict `filter` to a tenant when one is given
pub fn tenant_scoped(filter: Filter, tenant: Option<&str>) -> Filter {
    match tenant {
        Some(tenant) => filter.and(Filter::eq("tenantId", tenant)),
        None => filter,
    }
}
