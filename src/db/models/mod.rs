pub mod event_models;
pub mod migration_models;
pub mod prediction_models;
pub mod sale_models;

pub use event_models::{Event, EventType, ImpactLevel};
pub use migration_models::{MigrationOutcome, MigrationRun};
pub use prediction_models::{Prediction, VariantPrediction};
pub use sale_models::{MarketplaceSale, SaleStatus};

use crate::db::Document;
use crate::error::Error;
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serialize a model into a document
pub fn to_document<T: Serialize>(model: &T) -> Result<Document> {
    match serde_json::to_value(model).map_err(Error::from)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(Error::Serialization(format!("expected an object, got {}", other)).into()),
    }
}

/// Deserialize a document into a model
pub fn from_document<T: DeserializeOwned>(document: Document) -> Result<T> {
    let model = serde_json::from_value(serde_json::Value::Object(document)).map_err(Error::from)?;
    Ok(model)
}
