//! Configuration validation.

use std::collections::HashSet;

use super::{Config, DatabaseConfig};
use crate::core::identifier::validate_identifier;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_database("source", &config.source)?;
    validate_database("destination", &config.destination)?;

    // Cannot migrate into the same database
    if config.source.host.eq_ignore_ascii_case(&config.destination.host)
        && config.source.port == config.destination.port
        && config.source.database.eq_ignore_ascii_case(&config.destination.database)
    {
        return Err(MigrateError::Config(
            "source and destination cannot be the same database".into(),
        ));
    }

    let migration = &config.migration;
    validate_identifier(&migration.stage_schema)
        .map_err(|e| MigrateError::Config(format!("migration.stage_schema: {}", e)))?;
    if migration
        .stage_schema
        .eq_ignore_ascii_case(&config.destination.schema)
    {
        return Err(MigrateError::Config(format!(
            "migration.stage_schema '{}' must differ from destination.schema",
            migration.stage_schema
        )));
    }

    if migration.insert_batch_rows == 0 {
        return Err(MigrateError::Config(
            "migration.insert_batch_rows must be at least 1".into(),
        ));
    }
    if migration.max_connections == 0 {
        return Err(MigrateError::Config(
            "migration.max_connections must be at least 1".into(),
        ));
    }

    if migration.waves.is_empty() {
        return Err(MigrateError::Config(
            "migration.waves must list at least one wave".into(),
        ));
    }

    // Waves run in list order, so the numbers must agree with it
    let mut previous: Option<u32> = None;
    let mut seen = HashSet::new();
    for wave in &migration.waves {
        if let Some(prev) = previous {
            if wave.number <= prev {
                return Err(MigrateError::Config(format!(
                    "wave {} is listed after wave {}; wave numbers must increase",
                    wave.number, prev
                )));
            }
        }
        previous = Some(wave.number);

        if wave.tables.is_empty() {
            return Err(MigrateError::Config(format!(
                "wave {} has no tables",
                wave.number
            )));
        }
        for table in &wave.tables {
            validate_identifier(table)
                .map_err(|e| MigrateError::Config(format!("wave {}: {}", wave.number, e)))?;
            if !seen.insert(table.to_lowercase()) {
                return Err(MigrateError::Config(format!(
                    "table '{}' is listed more than once across waves",
                    table
                )));
            }
        }
    }

    Ok(())
}

fn validate_database(section: &str, db: &DatabaseConfig) -> Result<()> {
    if db.host.is_empty() {
        return Err(MigrateError::Config(format!("{}.host is required", section)));
    }
    if db.database.is_empty() {
        return Err(MigrateError::Config(format!(
            "{}.database is required",
            section
        )));
    }
    if db.user.is_empty() {
        return Err(MigrateError::Config(format!("{}.user is required", section)));
    }
    validate_identifier(&db.schema)
        .map_err(|e| MigrateError::Config(format!("{}.schema: {}", section, e)))?;
    Ok(())
}
