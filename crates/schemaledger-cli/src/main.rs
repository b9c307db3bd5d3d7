mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use schemaledger_config::ConfigLoader;
use schemaledger_db::{Database, MigrationRunner, MigrationSource, MigrationTracker};
use tracing::info;

use crate::commands::Outcome;

#[derive(Parser)]
#[command(name = "schemaledger", version, about = "Apply and inspect database migrations")]
struct Cli {
    /// Config file (.toml, .yml or .yaml). Defaults to ./schemaledger.toml when present.
    #[arg(long, global = true, env = "SCHEMALEDGER_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the .sql migration files.
    #[arg(long, global = true)]
    migrations_dir: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the migrations table if it does not exist
    Init,
    /// Print applied migrations in the order they were recorded
    Applied,
    /// Show applied, pending and missing migrations
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Apply every pending migration
    Up,
    /// Mark a migration as applied without running it
    Record { filename: String },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    // `.env` may carry RUST_LOG, so it has to land before the subscriber.
    schemaledger_config::load_dotenv().context("failed to load .env")?;
    logging::init(cli.log_json);

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_file(path);
    }
    let mut config = loader.load().context("failed to load configuration")?;
    if let Some(dir) = cli.migrations_dir {
        config.migrations.dir = dir;
    }

    let db = Database::connect(&config.database).context("failed to set up database")?;
    info!("using {} backend", db.backend());

    let tracker = MigrationTracker::new(db.clone());
    let mut stdout = std::io::stdout().lock();

    let result = match cli.command {
        Command::Init => commands::init(&tracker, &mut stdout).await,
        Command::Applied => commands::applied(&tracker, &mut stdout).await,
        Command::Status { json } => {
            let runner = MigrationRunner::new(tracker, MigrationSource::new(&config.migrations.dir));
            commands::status(&runner, json, &mut stdout).await
        }
        Command::Up => {
            let runner = MigrationRunner::new(tracker, MigrationSource::new(&config.migrations.dir));
            commands::up(&runner, &mut stdout).await
        }
        Command::Record { filename } => commands::record(&tracker, &filename, &mut stdout).await,
    };

    db.close().await;

    match result? {
        Outcome::Success => Ok(ExitCode::SUCCESS),
        Outcome::AlreadyRecorded => Ok(ExitCode::from(2)),
    }
}
