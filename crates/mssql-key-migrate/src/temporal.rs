//! System-versioning control for temporal tables.
//!
//! Versioning is switched off on a master before rows are written to it or
//! to its history table, and switched back on afterwards. If anything fails
//! in between, the master is left de-versioned; the error names it.

use tracing::info;

use crate::core::descriptor::TableDescriptor;
use crate::core::identifier::quote_mssql;
use crate::core::schema::TableName;
use crate::core::statement::{qualified, Statement};
use crate::core::traits::SqlSession;
use crate::error::{MigrateError, Result};

/// The master table and period columns a versioning toggle acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedPair {
    pub master: TableName,
    pub history: TableName,
    pub period_start: String,
    pub period_end: String,
}

impl VersionedPair {
    /// The pair `desc` belongs to, if it is a temporal master or history table.
    pub fn for_table(desc: &TableDescriptor) -> Result<Option<Self>> {
        let temporal = desc.temporal();
        if !temporal.is_temporal() && !temporal.is_history() {
            return Ok(None);
        }

        let incomplete = || {
            MigrateError::temporal(
                desc.name().to_string(),
                "incomplete system-versioning metadata",
            )
        };
        Ok(Some(Self {
            master: temporal.master.clone().ok_or_else(incomplete)?,
            history: temporal.history.clone().ok_or_else(incomplete)?,
            period_start: temporal.period_start.clone().ok_or_else(incomplete)?,
            period_end: temporal.period_end.clone().ok_or_else(incomplete)?,
        }))
    }
}

/// Toggles `SYSTEM_VERSIONING` on the destination.
pub struct TemporalController<'a> {
    dest: &'a dyn SqlSession,
}

impl<'a> TemporalController<'a> {
    pub fn new(dest: &'a dyn SqlSession) -> Self {
        Self { dest }
    }

    /// Turn versioning off and drop the period so rows can be written freely.
    pub async fn disable(&self, pair: &VersionedPair) -> Result<()> {
        let master = qualified(&pair.master)?;
        info!("Disabling system versioning on {}", pair.master);

        self.exec(
            pair,
            format!("ALTER TABLE {} SET (SYSTEM_VERSIONING = OFF)", master),
        )
        .await?;
        self.exec(
            pair,
            format!("ALTER TABLE {} DROP PERIOD FOR SYSTEM_TIME", master),
        )
        .await?;
        Ok(())
    }

    /// Restore the period and re-enable versioning against the history table.
    ///
    /// The period end column is first normalized to its maximum value, since
    /// rows copied in while versioning was off may carry closed periods.
    pub async fn enable(&self, pair: &VersionedPair) -> Result<()> {
        let master = qualified(&pair.master)?;
        let start = quote_mssql(&pair.period_start)?;
        let end = quote_mssql(&pair.period_end)?;
        info!("Enabling system versioning on {}", pair.master);

        self.exec(
            pair,
            format!(
                "UPDATE {} SET {} = (SELECT MAX({}) FROM {})",
                master, end, end, master
            ),
        )
        .await?;
        self.exec(
            pair,
            format!(
                "ALTER TABLE {} ADD PERIOD FOR SYSTEM_TIME ({}, {})",
                master, start, end
            ),
        )
        .await?;
        self.exec(
            pair,
            format!(
                "ALTER TABLE {} SET (SYSTEM_VERSIONING = ON (HISTORY_TABLE = {}))",
                master,
                qualified(&pair.history)?
            ),
        )
        .await?;
        Ok(())
    }

    async fn exec(&self, pair: &VersionedPair, sql: String) -> Result<u64> {
        self.dest.execute(&Statement::new(sql)).await.map_err(|e| {
            MigrateError::temporal(
                pair.master.to_string(),
                format!("{} (system versioning may be left off; re-enable manually)", e),
            )
        })
    }
}
