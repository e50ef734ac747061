//! Configuration type definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration.
    pub source: DatabaseConfig,

    /// Destination database configuration (also hosts the staging schema).
    pub destination: DatabaseConfig,

    /// Migration behavior configuration.
    pub migration: MigrationConfig,
}

/// SQL Server connection configuration, shared by source and destination.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password. Never serialized back out.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Schema holding the migrated tables (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// Encrypt connection (default: true).
    #[serde(default = "default_true")]
    pub encrypt: bool,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Staging schema on the destination (default: "STAGE").
    #[serde(default = "default_stage_schema")]
    pub stage_schema: String,

    /// Drop and recreate stage tables that already exist (default: true).
    #[serde(default = "default_true")]
    pub recreate_stage_tables: bool,

    /// Upper bound of rows per INSERT statement during transport (default: 1000).
    #[serde(default = "default_insert_batch_rows")]
    pub insert_batch_rows: usize,

    /// Connections per database pool (default: 2).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How wave order violations are reported (default: error).
    #[serde(default)]
    pub wave_validation: WaveValidation,

    /// Ordered waves of tables.
    #[serde(default)]
    pub waves: Vec<WaveConfig>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            stage_schema: default_stage_schema(),
            recreate_stage_tables: true,
            insert_batch_rows: default_insert_batch_rows(),
            max_connections: default_max_connections(),
            wave_validation: WaveValidation::default(),
            waves: Vec::new(),
        }
    }
}

/// One externally declared batch of tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveConfig {
    /// Wave number; numbers increase down the list.
    pub number: u32,

    /// Table names in processing order.
    pub tables: Vec<String>,
}

/// Severity of wave order violations found at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveValidation {
    /// Abort the run before any table is touched.
    #[default]
    Error,

    /// Log each violation and continue.
    Warn,
}

// Default value functions for serde
fn default_mssql_port() -> u16 {
    1433
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_stage_schema() -> String {
    "STAGE".to_string()
}

fn default_insert_batch_rows() -> usize {
    1_000
}

fn default_max_connections() -> u32 {
    2
}

fn default_true() -> bool {
    true
}
