use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marketplace sale model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarketplaceSale {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketplace: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option", skip_serializing_if = "Option::is_none")]
    pub sale_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: SaleStatus,
    #[serde(default)]
    pub status_changed_by: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub status_changed_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub return_date: Option<DateTime<Utc>>,
}

/// Sale lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SaleStatus {
    #[default]
    Completed,
    Returned,
    Cancelled,
    #[serde(rename = "wrongreturn")]
    WrongReturn,
}

impl SaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Completed => "completed",
            SaleStatus::Returned => "returned",
            SaleStatus::Cancelled => "cancelled",
            SaleStatus::WrongReturn => "wrongreturn",
        }
    }
}
