//! Stage to destination merge strategies.
//!
//! Each [`TableType`] has its own strategy; history tables of a temporal
//! pair always use the history insert regardless of classification.
//! Every strategy writes key columns from their resolved shadows (see
//! [`project`]) and never touches the source database.

mod composite;
mod heap;
mod history;
mod identity;
mod unique;

pub use identity::{KeyResolution, KeyResolver};

use serde::Serialize;
use tracing::info;

use crate::core::descriptor::{TableDescriptor, TableType};
use crate::core::statement::{shadow_name, ColumnSet, Statement};
use crate::core::traits::SqlSession;
use crate::error::{MigrateError, Result};

/// Which strategy merged a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Identity,
    Unique,
    Composite,
    Heap,
    History,
}

impl MergeStrategy {
    /// Strategy for a descriptor.
    pub fn for_table(desc: &TableDescriptor) -> Self {
        if desc.temporal().is_history() {
            return MergeStrategy::History;
        }
        match desc.table_type() {
            TableType::Identity => MergeStrategy::Identity,
            TableType::Unique => MergeStrategy::Unique,
            TableType::Composite => MergeStrategy::Composite,
            TableType::Heap => MergeStrategy::Heap,
        }
    }
}

/// Row accounting for one merged table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub rows_staged: u64,
    pub rows_inserted: u64,
    /// Staged rows not inserted (already present or guarded out).
    pub rows_skipped: u64,
    /// Identity values regenerated and written back to the stage copy.
    pub keys_remapped: u64,
    /// Identity rows whose key was kept because nothing was inserted for them.
    pub assumed_existing: u64,
}

impl MergeOutcome {
    fn counted(rows_staged: u64, rows_inserted: u64) -> Self {
        Self {
            rows_staged,
            rows_inserted,
            rows_skipped: rows_staged.saturating_sub(rows_inserted),
            ..Default::default()
        }
    }
}

/// Merge one staged table into its live destination table.
pub async fn merge_table(
    dest: &dyn SqlSession,
    desc: &TableDescriptor,
    rows_staged: u64,
) -> Result<MergeOutcome> {
    let strategy = MergeStrategy::for_table(desc);
    info!("Merging {} using {:?} strategy", desc.name(), strategy);

    let outcome = match strategy {
        MergeStrategy::Identity => {
            let resolution = KeyResolver::new(dest).resolve(desc).await?;
            MergeOutcome {
                keys_remapped: resolution.remapped,
                assumed_existing: resolution.assumed_existing,
                ..MergeOutcome::counted(rows_staged, resolution.inserted)
            }
        }
        MergeStrategy::Unique => {
            MergeOutcome::counted(rows_staged, unique::merge(dest, desc).await?)
        }
        MergeStrategy::Composite => {
            MergeOutcome::counted(rows_staged, composite::merge(dest, desc).await?)
        }
        MergeStrategy::Heap => MergeOutcome::counted(rows_staged, heap::merge(dest, desc).await?),
        MergeStrategy::History => {
            MergeOutcome::counted(rows_staged, history::merge(dest, desc).await?)
        }
    };

    info!(
        "{}: {} staged, {} inserted, {} skipped",
        desc.name(),
        outcome.rows_staged,
        outcome.rows_inserted,
        outcome.rows_skipped
    );
    Ok(outcome)
}

/// Source-side expression for a column being written to the live table.
///
/// Shadowed columns other than the identity take the resolved value when
/// there is one; everything else is copied as staged.
pub(crate) fn project(desc: &TableDescriptor, stage: &ColumnSet, column: &str) -> Result<String> {
    let is_identity = desc
        .identity_column()
        .is_some_and(|id| id.eq_ignore_ascii_case(column));

    if desc.has_shadow(column) && !is_identity {
        Ok(format!(
            "COALESCE({}, {})",
            stage.aliased("source", &shadow_name(column))?,
            stage.aliased("source", column)?
        ))
    } else {
        stage.aliased("source", column)
    }
}

/// Comma-separated projections for `columns`.
pub(crate) fn project_list(
    desc: &TableDescriptor,
    stage: &ColumnSet,
    columns: &[String],
) -> Result<String> {
    let values = columns
        .iter()
        .map(|c| project(desc, stage, c))
        .collect::<Result<Vec<_>>>()?;
    Ok(values.join(", "))
}

/// Duplicate guards from the table's unique constraints, ANDed together.
///
/// A staged row passes a guard when every constrained column is non-null
/// and no live row already holds the same values. `None` when the table
/// has no usable constraints.
pub(crate) fn guard_clause(
    desc: &TableDescriptor,
    live: &ColumnSet,
    stage: &ColumnSet,
) -> Result<Option<String>> {
    let guards = desc.guard_constraints();
    if guards.is_empty() {
        return Ok(None);
    }

    let table = desc.qualified_name()?;
    let mut conditions = Vec::with_capacity(guards.len());
    for (_, columns) in guards {
        let mut not_null = Vec::with_capacity(columns.len());
        let mut matches = Vec::with_capacity(columns.len());
        for column in columns {
            not_null.push(format!("{} IS NOT NULL", stage.aliased("source", column)?));
            matches.push(format!(
                "{} = {}",
                live.aliased("existing", column)?,
                project(desc, stage, column)?
            ));
        }
        conditions.push(format!(
            "({}) AND NOT EXISTS (SELECT 1 FROM {} AS existing WHERE {})",
            not_null.join(" AND "),
            table,
            matches.join(" AND ")
        ));
    }
    Ok(Some(conditions.join(" AND ")))
}

/// Run a merge statement, mapping failures to a merge error for the table.
pub(crate) async fn run(dest: &dyn SqlSession, desc: &TableDescriptor, sql: String) -> Result<u64> {
    dest.execute(&Statement::new(sql))
        .await
        .map_err(|e| MigrateError::merge(desc.name().to_string(), e.to_string()))
}
