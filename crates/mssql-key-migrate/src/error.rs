//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or statement error
    #[error("Database error: {0}")]
    Database(#[from] tiberius::error::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Catalog metadata query failed or returned an unexpected shape
    #[error("Catalog error for table {table}: {message}")]
    Catalog { table: String, message: String },

    /// Staging DDL failed
    #[error("Stage provisioning failed for table {table}: {message}")]
    Provision { table: String, message: String },

    /// Source to stage copy failed
    #[error("Transport failed for table {table}: {message}")]
    Transport { table: String, message: String },

    /// A source value could not be read as its column's declared type
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// Merge from stage into the destination table failed
    #[error("Merge failed for table {table}: {message}")]
    Merge { table: String, message: String },

    /// Enabling or disabling system versioning failed
    #[error("Temporal versioning error for table {table}: {message}")]
    Temporal { table: String, message: String },

    /// Wave order contradicts the foreign key graph
    #[error("Wave order violates foreign key dependencies:\n  {}", .0.join("\n  "))]
    WaveOrder(Vec<String>),

    /// Column identifier not reported by the catalog for this table
    #[error("Column {column} is not a column of {table}")]
    UnknownColumn { table: String, column: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Process exit codes, one per error class.
pub const EXIT_CONFIG_ERROR: u8 = 1;
pub const EXIT_CONNECTION_ERROR: u8 = 2;
pub const EXIT_CATALOG_ERROR: u8 = 3;
pub const EXIT_PROVISION_ERROR: u8 = 4;
pub const EXIT_DATA_ERROR: u8 = 5;
pub const EXIT_TEMPORAL_ERROR: u8 = 6;
pub const EXIT_IO_ERROR: u8 = 7;

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Catalog error
    pub fn catalog(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Catalog {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Provision error
    pub fn provision(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Provision {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Transport error
    pub fn transport(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transport {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Merge error
    pub fn merge(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Merge {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Temporal error
    pub fn temporal(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Temporal {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Map the error class to a process exit code.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_)
            | MigrateError::Yaml(_)
            | MigrateError::Json(_)
            | MigrateError::WaveOrder(_)
            | MigrateError::UnknownColumn { .. } => EXIT_CONFIG_ERROR,
            MigrateError::Database(_) | MigrateError::Pool { .. } => EXIT_CONNECTION_ERROR,
            MigrateError::Catalog { .. } => EXIT_CATALOG_ERROR,
            MigrateError::Provision { .. } => EXIT_PROVISION_ERROR,
            MigrateError::Transport { .. }
            | MigrateError::Conversion(_)
            | MigrateError::Merge { .. } => EXIT_DATA_ERROR,
            MigrateError::Temporal { .. } => EXIT_TEMPORAL_ERROR,
            MigrateError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_by_class() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(
            MigrateError::catalog("dbo.T", "missing type").exit_code(),
            EXIT_CATALOG_ERROR
        );
        assert_eq!(
            MigrateError::provision("dbo.T", "denied").exit_code(),
            EXIT_PROVISION_ERROR
        );
        assert_eq!(MigrateError::merge("dbo.T", "dup").exit_code(), EXIT_DATA_ERROR);
        assert_eq!(
            MigrateError::Conversion("bad int".into()).exit_code(),
            EXIT_DATA_ERROR
        );
        assert_eq!(
            MigrateError::temporal("dbo.T", "off").exit_code(),
            EXIT_TEMPORAL_ERROR
        );
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(MigrateError::from(io).exit_code(), EXIT_IO_ERROR);
    }

    #[test]
    fn test_wave_order_lists_every_violation() {
        let err = MigrateError::WaveOrder(vec![
            "Orders before Customers".to_string(),
            "Orders before Products".to_string(),
        ]);
        let text = err.to_string();
        assert!(text.contains("Orders before Customers"));
        assert!(text.contains("Orders before Products"));
    }

    #[test]
    fn test_format_detailed_includes_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no access");
        let err = MigrateError::from(io);
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: IO error: no access"));
    }
}
