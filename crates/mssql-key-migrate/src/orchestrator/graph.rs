//! FK dependency graph over the tables of a run, checked against wave order.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::WaveValidation;
use crate::core::catalog::Catalog;
use crate::core::schema::TableName;
use crate::error::{MigrateError, Result};

/// Why a child depends on a parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Named foreign key.
    ForeignKey(String),
    /// History table on its system-versioned master.
    HistoryOf,
}

/// `child` must be processed after `parent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub child: TableName,
    pub parent: TableName,
    pub kind: DependencyKind,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DependencyKind::ForeignKey(name) => {
                write!(f, "{} -> {} ({})", self.child, self.parent, name)
            }
            DependencyKind::HistoryOf => write!(f, "{} -> {} (history)", self.child, self.parent),
        }
    }
}

/// Findings of a wave order check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphReport {
    /// Children placed at or before their parent.
    pub violations: Vec<String>,
    /// Self-references and parents outside the run.
    pub warnings: Vec<String>,
}

impl GraphReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Log every finding, then fail on violations unless `mode` is `Warn`.
    pub fn enforce(&self, mode: WaveValidation) -> Result<()> {
        for w in &self.warnings {
            warn!("{}", w);
        }
        if self.violations.is_empty() {
            return Ok(());
        }
        match mode {
            WaveValidation::Error => Err(MigrateError::WaveOrder(self.violations.clone())),
            WaveValidation::Warn => {
                for v in &self.violations {
                    warn!("Wave order: {}", v);
                }
                Ok(())
            }
        }
    }
}

/// Tables of a run in processing order plus every dependency among them
/// and towards tables outside the run.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    order: Vec<TableName>,
    dependencies: Vec<Dependency>,
}

impl DependencyGraph {
    /// Read FK and versioning metadata for `tables` (already in processing order).
    pub async fn build(catalog: &dyn Catalog, tables: &[TableName]) -> Result<Self> {
        let mut dependencies = Vec::new();

        for table in tables {
            let mut seen = BTreeSet::new();
            for fk in catalog.foreign_keys(table).await? {
                // One edge per constraint; composite FKs list each column.
                if seen.insert(fk.name.clone()) {
                    dependencies.push(Dependency {
                        child: table.clone(),
                        parent: fk.referenced(),
                        kind: DependencyKind::ForeignKey(fk.name),
                    });
                }
            }

            let temporal = catalog.temporal_info(table).await?;
            if temporal.is_history() {
                if let Some(master) = temporal.master {
                    dependencies.push(Dependency {
                        child: table.clone(),
                        parent: master,
                        kind: DependencyKind::HistoryOf,
                    });
                }
            }
        }

        debug!(
            "Dependency graph: {} tables, {} edges",
            tables.len(),
            dependencies.len()
        );
        Ok(Self {
            order: tables.to_vec(),
            dependencies,
        })
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    fn position(&self, table: &TableName) -> Option<usize> {
        self.order.iter().position(|t| t.matches(table))
    }

    /// Check that every parent in the run is processed before its child.
    pub fn validate(&self) -> GraphReport {
        let mut report = GraphReport::default();

        for dep in &self.dependencies {
            if dep.child.matches(&dep.parent) {
                report
                    .warnings
                    .push(format!("{} references itself; keys are not remapped within the table", dep));
                continue;
            }

            let child = self.position(&dep.child);
            match (child, self.position(&dep.parent)) {
                (Some(c), Some(p)) if c <= p => report.violations.push(format!(
                    "{} is scheduled before its parent {} ({})",
                    dep.child, dep.parent, dep
                )),
                (_, None) => report.warnings.push(format!(
                    "{}: parent {} is not part of this run and is assumed to be keyed at the destination",
                    dep.child, dep.parent
                )),
                _ => {}
            }
        }

        report
    }
}
