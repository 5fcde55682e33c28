use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sales event model (festivals, sales, holidays)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub event_name: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub event_date: DateTime<Utc>,
    #[serde(default)]
    pub impact_level: ImpactLevel,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl Event {
    pub fn new(event_name: &str, event_date: DateTime<Utc>, event_type: EventType) -> Self {
        Self {
            tenant_id: None,
            event_name: event_name.to_string(),
            event_date,
            impact_level: ImpactLevel::default(),
            event_type,
            description: None,
            is_active: true,
        }
    }
}

/// Expected demand impact
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ImpactLevel {
    High,
    #[default]
    Medium,
    Low,
}

/// Event category
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventType {
    Festival,
    Sale,
    Holiday,
    Seasonal,
    Other,
}
