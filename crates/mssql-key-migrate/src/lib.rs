//! # mssql-key-migrate
//!
//! SQL Server to SQL Server table migration that regenerates identity values
//! at the destination and rewrites every foreign key that pointed at them.
//!
//! Each table is copied into a stage schema on the destination, carrying a
//! `New_` shadow column for every key column. Tables are then merged in
//! wave order with a strategy picked from their shape:
//!
//! - **Identity** tables get new identities; the old to new mapping is
//!   captured and written back to the stage copy
//! - **Unique** and **Composite** tables are merged on their resolved keys
//! - **Heap** tables are appended, optionally guarded by unique constraints
//! - **History** tables of system-versioned pairs are appended with
//!   resolved (or negated) keys while versioning is switched off
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_key_migrate::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> mssql_key_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let result = orchestrator.run(false).await?;
//!     println!("Inserted {} rows", result.rows_inserted);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod merge;
pub mod orchestrator;
pub mod propagate;
pub mod stage;
pub mod temporal;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenient access
pub use config::{Config, DatabaseConfig, MigrationConfig, WaveConfig, WaveValidation};
pub use error::{MigrateError, Result};
pub use orchestrator::{
    HealthCheckResult, MigrationPlan, MigrationResult, Orchestrator, TablePlan, TableResult,
};
