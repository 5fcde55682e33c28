use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit record for one migration pass
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRun {
    pub name: String,
    pub collection: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub matched_count: u64,
    pub modified_count: u64,
    pub outcome: MigrationOutcome,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub finished_at: DateTime<Utc>,
}

/// How a pass ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MigrationOutcome {
    Success,
    Partial,
    Failed,
}
