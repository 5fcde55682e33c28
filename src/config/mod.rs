use crate::error::Error;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable holding the store connection string
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
/// Environment variable pointing at an optional TOML/JSON config file
pub const CONFIG_PATH_ENV: &str = "MIGRATION_CONFIG";
pub const TENANT_ENV: &str = "MIGRATION_TENANT";
pub const DRY_RUN_ENV: &str = "MIGRATION_DRY_RUN";
/// RFC 3339 bounds for the return-date correction
pub const SHIFT_START_ENV: &str = "MIGRATION_SHIFT_START";
pub const SHIFT_END_ENV: &str = "MIGRATION_SHIFT_END";

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
    #[serde(default)]
    pub return_date_shift: DateShiftConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Store connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Connection string; normally supplied through `DATABASE_URL`
    #[serde(default)]
    pub url: Option<String>,
    /// Connection pool max size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Seconds to wait for a connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    1 // a migration owns a single connection
}

fn default_connect_timeout() -> u64 {
    5
}

impl DatabaseConfig {
    /// The configured connection string, or a connection error when absent
    pub fn url(&self) -> Result<&str> {
        match self.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(url),
            _ => Err(Error::Connection(format!(
                "No connection string configured; set {}",
                DATABASE_URL_ENV
            ))
            .into()),
        }
    }
}

/// Runner behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MigrationConfig {
    /// Restrict every migration to one tenant
    #[serde(default)]
    pub tenant: Option<String>,
    /// Count matches without writing
    #[serde(default)]
    pub dry_run: bool,
    /// Treat matched > modified as a failure
    #[serde(default)]
    pub fail_on_partial: bool,
    /// Record each pass in the audit collection
    #[serde(default = "default_audit")]
    pub audit: bool,
    #[serde(default = "default_audit_collection")]
    pub audit_collection: String,
}

fn default_audit() -> bool {
    true
}

fn default_audit_collection() -> String {
    "migrationruns".to_string()
}

/// Parameters for the return-date correction
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DateShiftConfig {
    /// Inclusive lower bound
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// Milliseconds to move matching dates back by
    #[serde(default = "default_offset_millis")]
    pub offset_millis: i64,
    #[serde(default = "default_shift_statuses")]
    pub statuses: Vec<String>,
    #[serde(default = "default_status_field")]
    pub status_field: String,
    #[serde(default = "default_date_field")]
    pub date_field: String,
}

fn default_offset_millis() -> i64 {
    86_400_000 // one day
}

fn default_shift_statuses() -> Vec<String> {
    vec!["returned".to_string(), "wrongreturn".to_string()]
}

fn default_status_field() -> String {
    "status".to_string()
}

fn default_date_field() -> String {
    "returnDate".to_string()
}

impl DateShiftConfig {
    /// The configured `[start, end)` range
    pub fn range(&self) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if start < end => Ok((start, end)),
            (Some(start), Some(end)) => Err(Error::Config(format!(
                "return_date_shift range is empty: {} is not before {}",
                start, end
            ))
            .into()),
            _ => Err(Error::Config(
                "return_date_shift.start and return_date_shift.end must both be set".to_string(),
            )
            .into()),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            tenant: None,
            dry_run: false,
            fail_on_partial: false,
            audit: default_audit(),
            audit_collection: default_audit_collection(),
        }
    }
}

impl Default for DateShiftConfig {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            offset_millis: default_offset_millis(),
            statuses: default_shift_statuses(),
            status_field: default_status_field(),
            date_field: default_date_field(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            database: DatabaseConfig::default(),
            migration: MigrationConfig::default(),
            return_date_shift: DateShiftConfig::default(),
        }
    }
}

impl Config {
    /// Apply environment overrides using `lookup` to read variables
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(DATABASE_URL_ENV) {
            self.database.url = Some(url);
        }
        if let Some(tenant) = lookup(TENANT_ENV).filter(|t| !t.trim().is_empty()) {
            self.migration.tenant = Some(tenant.trim().to_string());
        }
        if let Some(flag) = lookup(DRY_RUN_ENV) {
            self.migration.dry_run = parse_flag(&flag).ok_or_else(|| {
                Error::Config(format!("{} must be true or false, got '{}'", DRY_RUN_ENV, flag))
            })?;
        }
        if let Some(start) = lookup(SHIFT_START_ENV) {
            self.return_date_shift.start = Some(parse_instant(SHIFT_START_ENV, &start)?);
        }
        if let Some(end) = lookup(SHIFT_END_ENV) {
            self.return_date_shift.end = Some(parse_instant(SHIFT_END_ENV, &end)?);
        }
        Ok(())
    }
}

fn parse_instant(key: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            Error::Config(format!("{} is not an RFC 3339 timestamp ('{}'): {}", key, value, e)).into()
        })
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" | "" => Some(false),
        _ => None,
    }
}

/// Load configuration from a file or use default
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => {
            let config_str = std::fs::read_to_string(path)
                .context(format!("Failed to read config file: {:?}", path))?;

            let config = if path.extension().map_or(false, |ext| ext == "json") {
                serde_json::from_str(&config_str).context("Failed to parse JSON config")?
            } else if path.extension().map_or(false, |ext| ext == "toml") {
                toml::from_str(&config_str).context("Failed to parse TOML config")?
            } else {
                return Err(Error::Config(format!("Unsupported config file format: {:?}", path)).into());
            };

            Ok(config)
        }
        None => Ok(Config::default()),
    }
}

/// Config file named by `MIGRATION_CONFIG` (if any) plus environment overrides
pub fn from_env() -> Result<Config> {
    let path = std::env::var(CONFIG_PATH_ENV).ok();
    let mut config = load_config(path.as_deref().map(Path::new))?;
    config.apply_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.database.max_connections, 1);
        assert!(config.database.url().is_err());
        assert!(config.migration.audit);
        assert_eq!(config.migration.audit_collection, "migrationruns");
        assert_eq!(config.return_date_shift.offset_millis, 86_400_000);
        assert!(config.return_date_shift.range().is_err());
    }

    #[test]
    fn test_parse_toml() -> Result<()> {
        let config: Config = toml::from_str(
            r#"
            [database]
            url = "postgres://app@db/inventory"

            [migration]
            tenant = "acme"
            fail_on_partial = true

            [return_date_shift]
            start = "2026-01-28T00:00:00Z"
            end = "2026-01-29T00:00:00Z"
            "#,
        )?;

        assert_eq!(config.database.url()?, "postgres://app@db/inventory");
        assert_eq!(config.migration.tenant.as_deref(), Some("acme"));
        assert!(config.migration.fail_on_partial);
        assert!(config.migration.audit);
        let (start, end) = config.return_date_shift.range()?;
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 1, 28, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 1, 29, 0, 0, 0).unwrap());
        assert_eq!(config.return_date_shift.statuses, vec!["returned", "wrongreturn"]);
        Ok(())
    }

    #[test]
    fn test_inverted_range_rejected() {
        let shift = DateShiftConfig {
            start: Some(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
            ..DateShiftConfig::default()
        };
        assert!(shift.range().is_err());
    }

    #[test]
    fn test_env_overrides() -> Result<()> {
        let env: HashMap<&str, &str> = HashMap::from([
            (DATABASE_URL_ENV, "memory://"),
            (TENANT_ENV, " acme "),
            (DRY_RUN_ENV, "yes"),
            (SHIFT_START_ENV, "2026-01-28T00:00:00Z"),
            (SHIFT_END_ENV, "2026-01-29T01:00:00+01:00"),
        ]);
        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()))?;

        assert_eq!(config.database.url()?, "memory://");
        assert_eq!(config.migration.tenant.as_deref(), Some("acme"));
        assert!(config.migration.dry_run);
        let (start, end) = config.return_date_shift.range()?;
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 1, 28, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 1, 29, 0, 0, 0).unwrap());

        let mut bad = Config::default();
        assert!(bad.apply_overrides(|key| (key == DRY_RUN_ENV).then(|| "maybe".to_string())).is_err());
        assert!(bad.apply_overrides(|key| (key == SHIFT_END_ENV).then(|| "tomorrow".to_string())).is_err());
        Ok(())
    }

    #[test]
    fn test_unsupported_extension() {
        let path = std::env::temp_dir().join("inventory-migrate-config.yaml");
        std::fs::write(&path, "log_level: info").unwrap();
        assert!(load_config(Some(&path)).is_err());
        std::fs::remove_file(&path).ok();
    }
}
