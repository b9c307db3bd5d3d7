use std::collections::HashSet;

use chrono::NaiveDateTime;
use schemaledger_common::{Error, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::migrations::{MigrationFile, MigrationSource};
use crate::tracker::MigrationTracker;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationStatus {
    Applied { executed_at: Option<NaiveDateTime> },
    Pending,
    /// Recorded in the ledger but no longer present on disk.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub filename: String,
    #[serde(flatten)]
    pub status: MigrationStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub applied: Vec<String>,
    /// Pending when the run started, recorded by someone else before we got
    /// to them.
    pub skipped: Vec<String>,
}

/// Applies pending migration files in filename order.
pub struct MigrationRunner {
    tracker: MigrationTracker,
    source: MigrationSource,
}

impl MigrationRunner {
    pub fn new(tracker: MigrationTracker, source: MigrationSource) -> Self {
        Self { tracker, source }
    }

    pub fn tracker(&self) -> &MigrationTracker {
        &self.tracker
    }

    /// Files on disk that have no ledger record, in filename order.
    pub async fn pending(&self) -> Result<Vec<MigrationFile>> {
        self.tracker.ensure_schema().await?;
        let files = self.source.discover()?;
        let applied: HashSet<String> = self.tracker.list_applied().await?.into_iter().collect();

        Ok(files
            .into_iter()
            .filter(|f| !applied.contains(&f.filename))
            .collect())
    }

    /// Applied records first, in ledger order, then pending files in
    /// filename order.
    pub async fn status(&self) -> Result<Vec<StatusEntry>> {
        self.tracker.ensure_schema().await?;
        let files = self.source.discover()?;
        let records = self.tracker.list_records().await?;

        let on_disk: HashSet<&str> = files.iter().map(|f| f.filename.as_str()).collect();
        let recorded: HashSet<&str> = records.iter().map(|r| r.filename.as_str()).collect();

        let mut entries: Vec<StatusEntry> = records
            .iter()
            .map(|r| StatusEntry {
                filename: r.filename.clone(),
                status: if on_disk.contains(r.filename.as_str()) {
                    MigrationStatus::Applied {
                        executed_at: r.executed_at,
                    }
                } else {
                    MigrationStatus::Missing
                },
            })
            .collect();

        entries.extend(
            files
                .iter()
                .filter(|f| !recorded.contains(f.filename.as_str()))
                .map(|f| StatusEntry {
                    filename: f.filename.clone(),
                    status: MigrationStatus::Pending,
                }),
        );
        Ok(entries)
    }

    /// Apply every pending migration. Stops at the first failure; migrations
    /// committed before it stay recorded.
    pub async fn run(&self) -> Result<RunReport> {
        let pending = self.pending().await?;
        if pending.is_empty() {
            info!("no pending migrations in {}", self.source.dir().display());
            return Ok(RunReport::default());
        }

        info!("{} pending migration(s)", pending.len());
        let mut report = RunReport::default();
        for migration in &pending {
            match self.tracker.apply(migration).await {
                Ok(()) => report.applied.push(migration.filename.clone()),
                Err(Error::DuplicateRecord(name)) => {
                    warn!("{name} was recorded by another runner, skipping");
                    report.skipped.push(name);
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "migration run complete: {} applied, {} skipped",
            report.applied.len(),
            report.skipped.len()
        );
        Ok(report)
    }
}
