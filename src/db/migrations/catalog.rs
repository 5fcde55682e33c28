//! Named migrations known to the executables.

use super::MigrationDefinition;
use crate::config::Config;
use crate::db::Update;
use crate::error::Error;
use crate::schema::entities::{EVENTS_COLLECTION, MARKETPLACE_SALES_COLLECTION, PREDICTIONS_COLLECTION};
use anyhow::Result;
use serde_json::Value;

pub const BACKFILL_SALE_STATUS: &str = "backfill-sale-status";
pub const SHIFT_RETURN_DATES: &str = "shift-return-dates";
pub const BACKFILL_EVENT_ACTIVE: &str = "backfill-event-active";
pub const BACKFILL_PREDICTION_MODEL_VERSION: &str = "backfill-prediction-model-version";

/// Every catalog entry with a one-line summary
pub const CATALOG: &[(&str, &str)] = &[
    (BACKFILL_SALE_STATUS, "Mark sales without a status as completed"),
    (SHIFT_RETURN_DATES, "Move return dates in the configured range back by the configured offset"),
    (BACKFILL_EVENT_ACTIVE, "Mark events without isActive as active"),
    (BACKFILL_PREDICTION_MODEL_VERSION, "Tag predictions without a model version as v1.0"),
];

pub fn names() -> impl Iterator<Item = &'static str> {
    CATALOG.iter().map(|(name, _)| *name)
}

/// Build the named migration, scoped to the configured tenant
pub fn build(name: &str, config: &Config) -> Result<MigrationDefinition> {
    let definition = match name {
        BACKFILL_SALE_STATUS => MigrationDefinition::backfill(
            name,
            MARKETPLACE_SALES_COLLECTION,
            "status",
            Update::new()
                .set("status", "completed")
                .set("statusChangedBy", Value::Null)
                .set("statusChangedAt", Value::Null),
        )?,
        SHIFT_RETURN_DATES => {
            let shift = &config.return_date_shift;
            let (start, end) = shift.range()?;
            MigrationDefinition::date_shift(
                name,
                MARKETPLACE_SALES_COLLECTION,
                &shift.status_field,
                shift.statuses.as_slice(),
                &shift.date_field,
                start,
                end,
                shift.offset_millis,
            )?
        }
        BACKFILL_EVENT_ACTIVE => MigrationDefinition::backfill(
            name,
            EVENTS_COLLECTION,
            "isActive",
            Update::new().set("isActive", true),
        )?,
        BACKFILL_PREDICTION_MODEL_VERSION => MigrationDefinition::backfill(
            name,
            PREDICTIONS_COLLECTION,
            "modelVersion",
            Update::new().set("modelVersion", "v1.0"),
        )?,
        other => {
            return Err(Error::Operation(format!(
                "Unknown migration '{}'; known migrations: {}",
                other,
                names().collect::<Vec<_>>().join(", ")
            ))
            .into())
        }
    };

    let summary = CATALOG
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, summary)| *summary)
        .unwrap_or_default();

    Ok(MigrationDefinition {
        description: format!("{}: {}", summary, definition.description),
        ..definition
    }
    .scoped(config.migration.tenant.as_deref()))
}
