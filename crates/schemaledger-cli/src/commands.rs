use std::io::Write;

use anyhow::{Context, Result};
use schemaledger_common::Error;
use schemaledger_db::{MigrationRunner, MigrationStatus, MigrationTracker};

/// What the process should exit with once the pool is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    AlreadyRecorded,
}

pub async fn init(tracker: &MigrationTracker, out: &mut impl Write) -> Result<Outcome> {
    tracker.ensure_schema().await?;
    writeln!(out, "migrations table is ready")?;
    Ok(Outcome::Success)
}

pub async fn applied(tracker: &MigrationTracker, out: &mut impl Write) -> Result<Outcome> {
    for filename in tracker.list_applied().await? {
        writeln!(out, "{filename}")?;
    }
    Ok(Outcome::Success)
}

pub async fn status(runner: &MigrationRunner, json: bool, out: &mut impl Write) -> Result<Outcome> {
    let entries = runner.status().await?;

    if json {
        serde_json::to_writer_pretty(&mut *out, &entries).context("failed to encode status")?;
        writeln!(out)?;
        return Ok(Outcome::Success);
    }

    if entries.is_empty() {
        writeln!(out, "no migrations found")?;
        return Ok(Outcome::Success);
    }

    for entry in &entries {
        let state = match &entry.status {
            MigrationStatus::Applied {
                executed_at: Some(at),
            } => format!("applied  {}", at.format("%Y-%m-%d %H:%M:%S")),
            MigrationStatus::Applied { executed_at: None } => "applied".to_string(),
            MigrationStatus::Pending => "pending".to_string(),
            MigrationStatus::Missing => "missing  (recorded, file not found)".to_string(),
        };
        writeln!(out, "{:<48} {state}", entry.filename)?;
    }
    Ok(Outcome::Success)
}

pub async fn up(runner: &MigrationRunner, out: &mut impl Write) -> Result<Outcome> {
    let report = runner.run().await?;

    for filename in &report.applied {
        writeln!(out, "applied  {filename}")?;
    }
    for filename in &report.skipped {
        writeln!(out, "skipped  {filename} (recorded by another runner)")?;
    }
    if report.applied.is_empty() && report.skipped.is_empty() {
        writeln!(out, "database is up to date")?;
    }
    Ok(Outcome::Success)
}

pub async fn record(
    tracker: &MigrationTracker,
    filename: &str,
    out: &mut impl Write,
) -> Result<Outcome> {
    tracker.ensure_schema().await?;
    match tracker.record_applied(filename).await {
        Ok(()) => {
            writeln!(out, "recorded {filename}")?;
            Ok(Outcome::Success)
        }
        Err(Error::DuplicateRecord(_)) => {
            writeln!(out, "{filename} is already recorded")?;
            Ok(Outcome::AlreadyRecorded)
        }
        Err(e) => Err(e.into()),
    }
}
