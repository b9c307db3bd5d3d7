pub mod migrations;
pub mod postgres;
pub mod provider;
pub mod runner;
pub mod schema;
pub mod sqlite;
pub mod tracker;

pub use migrations::{MigrationFile, MigrationSource};
pub use provider::{Backend, Database};
pub use runner::{MigrationRunner, MigrationStatus, RunReport, StatusEntry};
pub use tracker::{MigrationRecord, MigrationTracker};
