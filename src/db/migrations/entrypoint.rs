//! Process-level glue shared by the migration executables.

use super::{catalog, exit_status, MigrationReport, MigrationRunner};
use crate::config::{self, Config};
use crate::schema::entities;
use anyhow::Result;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Install the stderr subscriber; `RUST_LOG` wins over `level`
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Load configuration from the environment, run `names`, and map the outcome to an exit code
pub async fn run_from_env(names: &[&str]) -> ExitCode {
    let config = config::from_env();
    init_tracing(config.as_ref().map_or("info", |c| c.log_level.as_str()));

    let result = match config {
        Ok(config) => execute(&config, names).await,
        Err(e) => Err(e.context("Failed to load configuration")),
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    ExitCode::from(exit_status(&result))
}

/// Connect, run the named catalog migrations in order and disconnect
pub async fn execute(config: &Config, names: &[&str]) -> Result<Vec<MigrationReport>> {
    // fail fast on a missing connection string before touching anything else
    config.database.url()?;

    let definitions = names
        .iter()
        .map(|name| catalog::build(name, config))
        .collect::<Result<Vec<_>>>()?;

    let runner = MigrationRunner::connect(config, Arc::new(entities::registry())).await?;
    let reports = runner.execute(&definitions).await?;

    for report in &reports {
        info!(
            "{}: matched {}, modified {}{}",
            report.name,
            report.matched_count,
            report.modified_count,
            if report.is_partial() { " (partial)" } else { "" }
        );
    }
    Ok(reports)
}
