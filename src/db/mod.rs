use crate::config::DatabaseConfig;
use crate::error::Error;
use crate::schema::SchemaRegistry;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use url::Url;
use uuid::Uuid;

pub mod expr;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod postgres;
pub mod repositories;

pub use expr::{Filter, Update, UpdateOp};
pub use memory::MemoryStore;
pub use postgres::PgDocumentStore;

/// A stored document
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Outcome of a bulk update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    /// Documents satisfying the filter
    pub matched_count: u64,
    /// Documents actually changed
    pub modified_count: u64,
}

/// Collection-level persistence boundary
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short backend name for logs
    fn backend(&self) -> &'static str;

    /// Apply `update` to every document matching `filter`
    async fn update_many(&self, collection: &str, filter: &Filter, update: &Update) -> Result<UpdateResult>;

    /// Count documents matching `filter`
    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64>;

    /// Load documents matching `filter`
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>>;

    /// Insert a document as-is, assigning `_id` when absent
    async fn insert_one(&self, collection: &str, document: Document) -> Result<Uuid>;

    /// Release the connection. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    fn backend(&self) -> &'static str {
        (**self).backend()
    }

    async fn update_many(&self, collection: &str, filter: &Filter, update: &Update) -> Result<UpdateResult> {
        (**self).update_many(collection, filter, update).await
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        (**self).count(collection, filter).await
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        (**self).find(collection, filter).await
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<Uuid> {
        (**self).insert_one(collection, document).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

/// Open a store for the configured connection string
pub async fn connect(
    config: &DatabaseConfig,
    schemas: Arc<SchemaRegistry>,
) -> Result<Box<dyn DocumentStore>> {
    let raw = config.url()?;
    let url = Url::parse(raw).map_err(|e| Error::Connection(format!("Invalid connection string: {}", e)))?;

    info!(
        "Connecting to {} store at {}",
        url.scheme(),
        url.host_str().unwrap_or("localhost")
    );

    match url.scheme() {
        "postgres" | "postgresql" => {
            let store = PgDocumentStore::connect(raw, config, schemas).await?;
            Ok(Box::new(store))
        }
        "memory" => Ok(Box::new(MemoryStore::new().with_schemas(schemas))),
        other => Err(Error::Connection(format!("Unsupported store scheme '{}'", other)).into()),
    }
}

/// Collection names become table names, so keep them to `[a-z0-9_]`
pub fn check_collection(collection: &str) -> Result<()> {
    let valid = !collection.is_empty()
        && collection
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        return Err(Error::Operation(format!("Invalid collection name '{}'", collection)).into());
    }
    Ok(())
}

/// Read `_id` or assign a fresh one
pub(crate) fn ensure_id(document: &mut Document) -> Result<Uuid> {
    match document.get("_id").and_then(|v| v.as_str()) {
        Some(id) => Uuid::parse_str(id)
            .map_err(|e| Error::Operation(format!("Invalid document _id '{}': {}", id, e)).into()),
        None => {
            let id = Uuid::new_v4();
            document.insert("_id".to_string(), serde_json::Value::String(id.to_string()));
            Ok(id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: Option<&str>) -> DatabaseConfig {
        DatabaseConfig {
            url: url.map(str::to_string),
            ..DatabaseConfig::default()
        }
    }

    fn connection_error(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<Error>(), Some(Error::Connection(_)))
    }

    #[tokio::test]
    async fn test_connect_memory() -> Result<()> {
        let store = connect(&config(Some("memory://local")), Arc::new(SchemaRegistry::new())).await?;
        assert_eq!(store.backend(), "memory");
        store.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_strings() {
        let schemas = Arc::new(SchemaRegistry::new());
        for url in [None, Some("not a url"), Some("mongodb://localhost/app")] {
            let err = connect(&config(url), schemas.clone()).await.err().unwrap();
            assert!(connection_error(&err), "{:?} gave {}", url, err);
        }
    }

    #[test]
    fn test_collection_names() {
        assert!(check_collection("marketplacesales").is_ok());
        assert!(check_collection("migration_runs_2").is_ok());
        assert!(check_collection("").is_err());
        assert!(check_collection("sales; DROP TABLE x").is_err());
        assert!(check_collection("Sales").is_err());
    }

    #[test]
    fn test_ensure_id() -> Result<()> {
        let mut doc = Document::new();
        let id = ensure_id(&mut doc)?;
        assert_eq!(doc["_id"], serde_json::json!(id.to_string()));
        assert_eq!(ensure_id(&mut doc)?, id);
        Ok(())
    }
}
