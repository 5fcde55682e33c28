//! Declarative, idempotent data migrations.
//!
//! A [`MigrationDefinition`] is data: a target collection, a filter and an
//! update. [`MigrationRunner`] owns the store connection, applies each
//! definition as one server-side bulk update, reports matched/modified counts
//! and records an audit entry per pass.

use crate::config::{Config, MigrationConfig};
use crate::db::models::{to_document, MigrationOutcome, MigrationRun};
use crate::db::{self, check_collection, DocumentStore, Filter, Update, UpdateOp, UpdateResult};
use crate::error::Error;
use crate::schema::SchemaRegistry;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod catalog;
pub mod entrypoint;


/// Field that scopes documents to a tenant
pub const TENANT_FIELD: &str = "tenantId";

/// One named correction against one collection
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationDefinition {
    pub name: String,
    pub description: String,
    pub collection: String,
    pub filter: Filter,
    pub update: Update,
    pub tenant: Option<String>,
}

impl MigrationDefinition {
    pub fn new(name: &str, description: &str, collection: &str, filter: Filter, update: Update) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            collection: collection.to_string(),
            filter,
            update,
            tenant: None,
        }
    }

    /// Assign values to documents where `missing_field` is absent.
    ///
    /// The update must set `missing_field` itself, otherwise a second run
    /// would match the same documents again.
    pub fn backfill(name: &str, collection: &str, missing_field: &str, set: Update) -> Result<Self> {
        let sets_field = set
            .ops
            .iter()
            .any(|op| matches!(op, UpdateOp::Set(path, _) if path == missing_field));
        if !sets_field {
            return Err(Error::Operation(format!(
                "Backfill {} must set the missing field '{}'",
                name, missing_field
            ))
            .into());
        }

        Ok(Self::new(
            name,
            &format!("Backfill missing {} in {}", missing_field, collection),
            collection,
            Filter::missing(missing_field),
            set,
        ))
    }

    /// Move `date_field` back by `offset_millis` for documents whose status is
    /// in `statuses` and whose date lies in `[start, end)`.
    ///
    /// The offset is part of the update so the store does the arithmetic.
    #[allow(clippy::too_many_arguments)]
    pub fn date_shift<S: AsRef<str>>(
        name: &str,
        collection: &str,
        status_field: &str,
        statuses: &[S],
        date_field: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        offset_millis: i64,
    ) -> Result<Self> {
        if start >= end {
            return Err(Error::Operation(format!("Empty date range {} .. {}", start, end)).into());
        }
        if statuses.is_empty() {
            return Err(Error::Operation(format!("Date shift {} has no statuses", name)).into());
        }
        let shift = offset_millis
            .checked_neg()
            .ok_or_else(|| Error::Operation(format!("Offset {} out of range", offset_millis)))?;

        let filter = Filter::one_of(status_field, statuses.iter().map(|s| s.as_ref()))
            .and(Filter::date_range(date_field, start, end));

        Ok(Self::new(
            name,
            &format!(
                "Shift {} back by {}ms for {} in [{}, {})",
                date_field,
                offset_millis,
                statuses.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join("/"),
                start.to_rfc3339(),
                end.to_rfc3339()
            ),
            collection,
            filter,
            Update::new().inc(date_field, shift),
        ))
    }

    /// Restrict to one tenant
    pub fn scoped(mut self, tenant: Option<&str>) -> Self {
        self.tenant = tenant.map(str::to_string);
        self
    }

    /// Filter including tenant scope
    pub fn effective_filter(&self) -> Filter {
        match &self.tenant {
            Some(tenant) => self.filter.clone().and(Filter::eq(TENANT_FIELD, tenant.as_str())),
            None => self.filter.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Operation("Migration name is empty".to_string()).into());
        }
        check_collection(&self.collection)?;
        self.filter.validate()?;
        self.update.validate()
    }
}

/// Lifecycle of a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Disconnected,
    Connecting,
    Connected,
    Running,
    Success,
    Failed,
}

impl RunState {
    pub fn can_transition(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (Connected, Running)
                | (Connected, Disconnected)
                | (Running, Success)
                | (Running, Failed)
                | (Success, Running)
                | (Success, Disconnected)
                | (Failed, Disconnected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Success | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of one pass
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub name: String,
    pub collection: String,
    pub tenant: Option<String>,
    pub matched_count: u64,
    pub modified_count: u64,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl MigrationReport {
    /// Some matched documents were not modified
    pub fn is_partial(&self) -> bool {
        !self.dry_run && self.matched_count > self.modified_count
    }

    pub fn outcome(&self) -> MigrationOutcome {
        if self.is_partial() {
            MigrationOutcome::Partial
        } else {
            MigrationOutcome::Success
        }
    }
}

/// Executes migration definitions over an exclusively owned store
pub struct MigrationRunner {
    store: Box<dyn DocumentStore>,
    options: MigrationConfig,
    state: RunState,
}

impl MigrationRunner {
    /// Wrap an already connected store
    pub fn new(store: Box<dyn DocumentStore>, options: MigrationConfig) -> Self {
        Self {
            store,
            options,
            state: RunState::Connected,
        }
    }

    /// Open the configured store
    pub async fn connect(config: &Config, schemas: Arc<SchemaRegistry>) -> Result<Self> {
        let mut state = RunState::Disconnected;
        advance(&mut state, RunState::Connecting)?;

        match db::connect(&config.database, schemas).await {
            Ok(store) => {
                advance(&mut state, RunState::Connected)?;
                Ok(Self {
                    store,
                    options: config.migration.clone(),
                    state,
                })
            }
            Err(e) => {
                advance(&mut state, RunState::Failed)?;
                advance(&mut state, RunState::Disconnected)?;
                Err(e)
            }
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    /// Apply one definition
    pub async fn run(&mut self, definition: &MigrationDefinition) -> Result<MigrationReport> {
        advance(&mut self.state, RunState::Running)?;
        info!(
            "Running migration {} on {}{}{}",
            definition.name,
            definition.collection,
            definition
                .tenant
                .as_deref()
                .map(|t| format!(" for tenant {}", t))
                .unwrap_or_default(),
            if self.options.dry_run { " (dry run)" } else { "" }
        );

        let started_at = Utc::now();
        let applied = match definition.validate() {
            Ok(()) => self.apply(definition).await,
            Err(e) => Err(e),
        };
        let finished_at = Utc::now();

        let report = applied.map(|result| MigrationReport {
            name: definition.name.clone(),
            collection: definition.collection.clone(),
            tenant: definition.tenant.clone(),
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            dry_run: self.options.dry_run,
            started_at,
            finished_at,
        });

        let report = match report {
            Ok(report) => {
                info!(
                    "Migration {}: matched {}, modified {}",
                    report.name, report.matched_count, report.modified_count
                );
                if report.is_partial() {
                    warn!(
                        "Migration {} applied partially: {} of {} matched documents were not modified",
                        report.name,
                        report.matched_count - report.modified_count,
                        report.matched_count
                    );
                }
                if report.is_partial() && self.options.fail_on_partial {
                    Err(Error::Operation(format!(
                        "Migration {} modified {} of {} matched documents",
                        report.name, report.modified_count, report.matched_count
                    ))
                    .into())
                } else {
                    Ok(report)
                }
            }
            Err(e) => Err(e),
        };

        match report {
            Ok(report) => {
                self.audit(definition, &report, report.outcome(), None).await;
                advance(&mut self.state, RunState::Success)?;
                Ok(report)
            }
            Err(e) => {
                error!("Migration {} failed: {:#}", definition.name, e);
                let failed = MigrationReport {
                    name: definition.name.clone(),
                    collection: definition.collection.clone(),
                    tenant: definition.tenant.clone(),
                    matched_count: 0,
                    modified_count: 0,
                    dry_run: self.options.dry_run,
                    started_at,
                    finished_at,
                };
                self.audit(definition, &failed, MigrationOutcome::Failed, Some(format!("{:#}", e)))
                    .await;
                advance(&mut self.state, RunState::Failed)?;
                Err(e)
            }
        }
    }

    /// Apply definitions in order, stopping at the first failure
    pub async fn run_all(&mut self, definitions: &[MigrationDefinition]) -> Result<Vec<MigrationReport>> {
        let mut reports = Vec::with_capacity(definitions.len());
        for definition in definitions {
            reports.push(self.run(definition).await?);
        }
        Ok(reports)
    }

    /// Fill `missing_field` on documents lacking it
    pub async fn run_backfill(
        &mut self,
        collection: &str,
        missing_field: &str,
        set: Update,
    ) -> Result<MigrationReport> {
        let name = format!("backfill-{}", missing_field);
        let definition = MigrationDefinition::backfill(&name, collection, missing_field, set)?
            .scoped(self.options.tenant.as_deref());
        self.run(&definition).await
    }

    /// Shift `date_field` back by `offset_millis` within `[start, end)`
    #[allow(clippy::too_many_arguments)]
    pub async fn run_date_shift<S: AsRef<str>>(
        &mut self,
        collection: &str,
        status_field: &str,
        statuses: &[S],
        date_field: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        offset_millis: i64,
    ) -> Result<MigrationReport> {
        let definition = MigrationDefinition::date_shift(
            &format!("shift-{}", date_field),
            collection,
            status_field,
            statuses,
            date_field,
            start,
            end,
            offset_millis,
        )?
        .scoped(self.options.tenant.as_deref());
        self.run(&definition).await
    }

    /// Release the store connection
    pub async fn finish(mut self) -> Result<()> {
        let closed = self.store.close().await;
        self.state = RunState::Disconnected;
        debug!("Migration runner disconnected");
        closed
    }

    /// Run every definition, then release the connection whatever the outcome
    pub async fn execute(mut self, definitions: &[MigrationDefinition]) -> Result<Vec<MigrationReport>> {
        let outcome = self.run_all(definitions).await;
        let closed = self.finish().await;

        match (outcome, closed) {
            (Ok(reports), Ok(())) => Ok(reports),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!("Failed to close store after error: {:#}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn apply(&self, definition: &MigrationDefinition) -> Result<UpdateResult> {
        let filter = definition.effective_filter();
        if self.options.dry_run {
            let matched = self.store.count(&definition.collection, &filter).await?;
            return Ok(UpdateResult {
                matched_count: matched,
                modified_count: 0,
            });
        }
        self.store
            .update_many(&definition.collection, &filter, &definition.update)
            .await
    }

    async fn audit(
        &self,
        definition: &MigrationDefinition,
        report: &MigrationReport,
        outcome: MigrationOutcome,
        error: Option<String>,
    ) {
        // dry runs leave every collection untouched, the audit log included
        if !self.options.audit || report.dry_run {
            return;
        }

        let record = MigrationRun {
            name: definition.name.clone(),
            collection: definition.collection.clone(),
            tenant_id: definition.tenant.clone(),
            matched_count: report.matched_count,
            modified_count: report.modified_count,
            outcome,
            error,
            started_at: report.started_at,
            finished_at: report.finished_at,
        };

        let written = match to_document(&record) {
            Ok(document) => self.store.insert_one(&self.options.audit_collection, document).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!("Failed to record audit entry for {}: {:#}", definition.name, e);
        }
    }
}

fn advance(state: &mut RunState, next: RunState) -> Result<()> {
    if !state.can_transition(next) {
        return Err(Error::Operation(format!("Illegal runner transition {} -> {}", state, next)).into());
    }
    debug!("Runner state {} -> {}", state, next);
    *state = next;
    Ok(())
}

/// Process exit status for a run: 0 on success, 1 on any error
pub fn exit_status<T>(result: &Result<T>) -> u8 {
    match result {
        Ok(_) => 0,
        Err(_) => 1,
    }
}
