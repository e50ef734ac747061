//! Staging scaffolding on the destination.
//!
//! Every migrated table gets a structural copy in the stage schema, the
//! same primary key (`PK_STAGE_<table>`), and one nullable `New_` shadow
//! column per key column. Only the destination is touched.

mod transport;

pub use transport::DataTransporter;

use serde::Serialize;
use tracing::{debug, info};

use crate::core::catalog::Catalog;
use crate::core::descriptor::TableDescriptor;
use crate::core::identifier::quote_mssql;
use crate::core::statement::Statement;
use crate::core::traits::SqlSession;
use crate::error::{MigrateError, Result};

/// What happened to a stage table during creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageAction {
    Created,
    Recreated,
    /// Existed and `recreate` was off.
    Kept,
}

/// Creates and extends stage tables.
pub struct StageProvisioner<'a> {
    catalog: &'a dyn Catalog,
    dest: &'a dyn SqlSession,
}

impl<'a> StageProvisioner<'a> {
    pub fn new(catalog: &'a dyn Catalog, dest: &'a dyn SqlSession) -> Self {
        Self { catalog, dest }
    }

    /// Create the stage schema unless it exists. Returns whether it was created.
    pub async fn create_schema(&self, schema: &str) -> Result<bool> {
        if self.catalog.schema_exists(schema).await? {
            debug!("{} schema already exists", schema);
            return Ok(false);
        }

        info!("Creating schema: {}", schema);
        let sql = format!("CREATE SCHEMA {}", quote_mssql(schema)?);
        self.dest
            .execute(&Statement::new(sql))
            .await
            .map_err(|e| MigrateError::provision(schema, e.to_string()))?;
        Ok(true)
    }

    /// Structural copy of the live table via `SELECT TOP 0 * INTO`.
    pub async fn create_table(&self, desc: &TableDescriptor, recreate: bool) -> Result<StageAction> {
        let stage = desc.qualified_stage()?;
        let exists = self.catalog.table_exists(desc.stage()).await?;

        if exists && !recreate {
            info!(
                "Table {} already exists and recreate is off, skipping table creation",
                stage
            );
            return Ok(StageAction::Kept);
        }

        if exists {
            info!("Dropping and recreating table: {}", stage);
            self.exec(desc, format!("DROP TABLE {}", stage)).await?;
        } else {
            info!("Creating table: {}", stage);
        }

        self.exec(
            desc,
            format!("SELECT TOP 0 * INTO {} FROM {}", stage, desc.qualified_name()?),
        )
        .await?;

        Ok(if exists {
            StageAction::Recreated
        } else {
            StageAction::Created
        })
    }

    /// Mirror the live primary key on the stage copy.
    ///
    /// Returns false when the table has no PK or the constraint already exists.
    pub async fn add_primary_key(&self, desc: &TableDescriptor) -> Result<bool> {
        if desc.primary_key().is_empty() {
            return Ok(false);
        }

        let constraint = format!("PK_STAGE_{}", desc.name().name);
        if self
            .catalog
            .constraint_exists(&desc.stage().schema, &constraint)
            .await?
        {
            debug!("{} already exists on {}", constraint, desc.stage());
            return Ok(false);
        }

        let live = desc.live_columns();
        let columns: Vec<&str> = desc.primary_key().iter().map(|pk| pk.name.as_str()).collect();
        let sql = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})",
            desc.qualified_stage()?,
            quote_mssql(&constraint)?,
            live.quote_list(&columns)?
        );
        self.exec(desc, sql).await?;
        info!("Added {} on {}", constraint, desc.stage());
        Ok(true)
    }

    /// Add every missing shadow column. Returns how many were added.
    pub async fn add_shadow_columns(&self, desc: &TableDescriptor) -> Result<usize> {
        let stage = desc.qualified_stage()?;
        let mut added = 0;

        for shadow in desc.shadow_columns()? {
            let name = shadow.name();
            if self.catalog.column_exists(desc.stage(), &name).await? {
                debug!("Column {} already exists in {}", name, stage);
                continue;
            }

            let sql = format!(
                "ALTER TABLE {} ADD {} {} NULL",
                stage,
                quote_mssql(&name)?,
                shadow.data_type
            );
            self.exec(desc, sql).await?;
            info!(
                "New column {} added to {} with data type {}",
                name, stage, shadow.data_type
            );
            added += 1;
        }

        Ok(added)
    }

    /// Create, key, and shadow the stage copy of one table.
    ///
    /// A kept stage copy is emptied so the following copy starts clean.
    pub async fn provision(&self, desc: &TableDescriptor, recreate: bool) -> Result<StageAction> {
        let action = self.create_table(desc, recreate).await?;
        if action == StageAction::Kept {
            self.exec(desc, format!("TRUNCATE TABLE {}", desc.qualified_stage()?))
                .await?;
        }
        self.add_primary_key(desc).await?;
        self.add_shadow_columns(desc).await?;
        Ok(action)
    }

    async fn exec(&self, desc: &TableDescriptor, sql: String) -> Result<u64> {
        self.dest
            .execute(&Statement::new(sql))
            .await
            .map_err(|e| MigrateError::provision(desc.stage().to_string(), e.to_string()))
    }
}
