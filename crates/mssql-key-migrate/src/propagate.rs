//! Foreign key propagation.
//!
//! Before a child table is merged, each of its FK shadows is filled from the
//! parent's stage copy: the parent's resolved key when it has one, its staged
//! key otherwise. Parents are processed in earlier waves, so their shadows
//! are final by the time a child reads them.

use tracing::{debug, info, warn};

use crate::core::catalog::Catalog;
use crate::core::descriptor::TableDescriptor;
use crate::core::identifier::{qualify_mssql, quote_mssql};
use crate::core::schema::TableName;
use crate::core::statement::{shadow_name, Statement};
use crate::core::traits::SqlSession;
use crate::error::{MigrateError, Result};

/// One child column to resolve from a parent column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLink {
    pub column: String,
    pub parent: TableName,
    pub parent_column: String,
}

impl KeyLink {
    /// Links for a descriptor: its FKs, or for a history table the master's
    /// combined keys.
    pub fn for_table(desc: &TableDescriptor) -> Vec<KeyLink> {
        if desc.temporal().is_history() {
            return desc
                .combined_keys()
                .iter()
                .map(|k| KeyLink {
                    column: k.column.clone(),
                    parent: k.referenced(),
                    parent_column: k.referenced_column.clone(),
                })
                .collect();
        }
        desc.foreign_keys()
            .iter()
            .map(|fk| KeyLink {
                column: fk.parent_column.clone(),
                parent: fk.referenced(),
                parent_column: fk.referenced_column.clone(),
            })
            .collect()
    }
}

/// Fills FK shadows on stage copies.
pub struct FkPropagator<'a> {
    catalog: &'a dyn Catalog,
    dest: &'a dyn SqlSession,
}

impl<'a> FkPropagator<'a> {
    pub fn new(catalog: &'a dyn Catalog, dest: &'a dyn SqlSession) -> Self {
        Self { catalog, dest }
    }

    /// Resolve every key link of `desc`. Returns the total rows updated.
    pub async fn propagate(&self, desc: &TableDescriptor) -> Result<u64> {
        let links = KeyLink::for_table(desc);
        if links.is_empty() {
            debug!("{}: no keys to propagate", desc.name());
            return Ok(0);
        }

        let mut updated = 0;
        for link in &links {
            updated += self.propagate_link(desc, link).await?;
        }
        info!(
            "{}: propagated {} keys, {} rows updated",
            desc.name(),
            links.len(),
            updated
        );
        Ok(updated)
    }

    async fn propagate_link(&self, desc: &TableDescriptor, link: &KeyLink) -> Result<u64> {
        let stage = desc.stage_columns()?;
        let stage_table = desc.qualified_stage()?;
        let shadow = stage.quote(&shadow_name(&link.column))?;
        let parent_stage = TableName::new(&desc.stage().schema, &link.parent.name);

        let sql = if self.catalog.table_exists(&parent_stage).await? {
            let parent_column = quote_mssql(&link.parent_column)?;
            let parent_shadow = shadow_name(&link.parent_column);
            let value = if self.catalog.column_exists(&parent_stage, &parent_shadow).await? {
                format!(
                    "COALESCE(parent.{}, parent.{})",
                    quote_mssql(&parent_shadow)?,
                    parent_column
                )
            } else {
                format!("parent.{}", parent_column)
            };
            format!(
                "UPDATE stage SET stage.{} = {} FROM {} AS stage INNER JOIN {} AS parent ON {} = parent.{}",
                shadow,
                value,
                stage_table,
                qualify_mssql(&parent_stage.schema, &parent_stage.name)?,
                stage.aliased("stage", &link.column)?,
                parent_column
            )
        } else {
            warn!(
                "{}: {} is not staged in this run; {} keeps its source value",
                desc.name(),
                link.parent,
                link.column
            );
            format!(
                "UPDATE {} SET {} = {}",
                stage_table,
                shadow,
                stage.quote(&link.column)?
            )
        };

        let updated = self
            .dest
            .execute(&Statement::new(sql))
            .await
            .map_err(|e| MigrateError::merge(desc.name().to_string(), e.to_string()))?;
        debug!(
            "{}.{} <- {}.{}: {} rows",
            desc.name(),
            link.column,
            link.parent,
            link.parent_column,
            updated
        );
        Ok(updated)
    }
}
