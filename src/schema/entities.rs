//! Built-in entity definitions.

use serde_json::json;

use super::{FieldSpec, FieldType, Schema, SchemaRegistry};

pub const EVENT: &str = "Event";
pub const PREDICTION: &str = "Prediction";
pub const MARKETPLACE_SALE: &str = "MarketplaceSale";

pub const EVENTS_COLLECTION: &str = "events";
pub const PREDICTIONS_COLLECTION: &str = "predictions";
pub const MARKETPLACE_SALES_COLLECTION: &str = "marketplacesales";

pub const IMPACT_LEVELS: &[&str] = &["High", "Medium", "Low"];
pub const EVENT_TYPES: &[&str] = &["Festival", "Sale", "Holiday", "Seasonal", "Other"];
pub const SALE_STATUSES: &[&str] = &["completed", "returned", "cancelled", "wrongreturn"];

pub fn event_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("eventName", FieldType::String).required().trim(),
        FieldSpec::new("eventDate", FieldType::Date).required(),
        FieldSpec::new("impactLevel", FieldType::String)
            .one_of(IMPACT_LEVELS)
            .default_value(json!("Medium")),
        FieldSpec::new("eventType", FieldType::String)
            .required()
            .one_of(EVENT_TYPES),
        FieldSpec::new("description", FieldType::String).trim(),
        FieldSpec::new("isActive", FieldType::Boolean).default_value(json!(true)),
    ]
}

/// Element schema for `Prediction.predictions`
pub fn variant_prediction_schema() -> Schema {
    Schema::new(
        "VariantPrediction",
        vec![
            FieldSpec::new("design", FieldType::String).required(),
            FieldSpec::new("color", FieldType::String).required(),
            FieldSpec::new("predictedSales", FieldType::Number).required(),
            FieldSpec::new("actualSales", FieldType::Number).default_value(json!(null)),
            FieldSpec::new("accuracy", FieldType::Number).default_value(json!(null)),
        ],
    )
}

pub fn prediction_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("predictionDate", FieldType::Date).required(),
        FieldSpec::new(
            "predictions",
            FieldType::Array(Box::new(FieldType::Object(variant_prediction_schema()))),
        )
        .default_value(json!([])),
        FieldSpec::new("overallAccuracy", FieldType::Number).default_value(json!(null)),
        FieldSpec::new("modelVersion", FieldType::String).default_value(json!("v1.0")),
        FieldSpec::new("generatedAt", FieldType::Date).default_now(),
    ]
}

pub fn marketplace_sale_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("orderId", FieldType::String).trim(),
        FieldSpec::new("marketplace", FieldType::String).trim(),
        FieldSpec::new("saleDate", FieldType::Date),
        FieldSpec::new("status", FieldType::String)
            .one_of(SALE_STATUSES)
            .default_value(json!("completed")),
        FieldSpec::new("statusChangedBy", FieldType::String).default_value(json!(null)),
        FieldSpec::new("statusChangedAt", FieldType::Date).default_value(json!(null)),
        FieldSpec::new("returnDate", FieldType::Date).default_value(json!(null)),
    ]
}

/// Registry holding every entity this application persists
pub fn registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry.define(EVENT, EVENTS_COLLECTION, event_fields());
    registry.define(PREDICTION, PREDICTIONS_COLLECTION, prediction_fields());
    registry.define(MARKETPLACE_SALE, MARKETPLACE_SALES_COLLECTION, marketplace_sale_fields());
    registry
}
