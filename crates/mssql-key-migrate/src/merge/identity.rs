//! Identity merge: insert staged rows with regenerated identities and record
//! the old to new mapping on the stage copy.

use tracing::{info, warn};

use crate::core::descriptor::TableDescriptor;
use crate::core::identifier::qualify_mssql;
use crate::core::statement::{shadow_name, Statement};
use crate::core::traits::SqlSession;
use crate::error::{MigrateError, Result};

use super::{guard_clause, project_list, run};

/// Name of the mapping table in the stage schema.
pub const KEY_STAGE_TABLE: &str = "KeyStage";

/// Counts from one identity merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyResolution {
    /// Rows inserted into the live table (rows captured in KeyStage).
    pub inserted: u64,
    /// Stage rows whose shadow was set from KeyStage.
    pub remapped: u64,
    /// Stage rows left unmatched and given their own identity as the
    /// resolved key. This is a heuristic: such rows are assumed to already
    /// exist at the destination under the same identity.
    pub assumed_existing: u64,
}

/// Resolves identities for an `Identity` table.
pub struct KeyResolver<'a> {
    dest: &'a dyn SqlSession,
}

impl<'a> KeyResolver<'a> {
    pub fn new(dest: &'a dyn SqlSession) -> Self {
        Self { dest }
    }

    pub async fn resolve(&self, desc: &TableDescriptor) -> Result<KeyResolution> {
        let identity = desc.identity_column().ok_or_else(|| {
            MigrateError::merge(desc.name().to_string(), "identity merge without an identity column")
        })?;
        let identity_type = desc.column_type(identity).ok_or_else(|| {
            MigrateError::catalog(
                desc.name().to_string(),
                format!("cannot determine data type of identity column {}", identity),
            )
        })?;

        let live = desc.live_columns();
        let stage = desc.stage_columns()?;
        let stage_table = desc.qualified_stage()?;
        let key_stage = qualify_mssql(&desc.stage().schema, KEY_STAGE_TABLE)?;

        run(self.dest, desc, format!("DROP TABLE IF EXISTS {}", key_stage)).await?;
        run(
            self.dest,
            desc,
            format!(
                "CREATE TABLE {} ([ResolvedIdentity] {}, [SourceIdentity] {})",
                key_stage, identity_type, identity_type
            ),
        )
        .await?;

        let columns = desc.insert_columns_without_identity();
        let when = match guard_clause(desc, &live, &stage)? {
            Some(guards) => format!("WHEN NOT MATCHED AND {}", guards),
            None => "WHEN NOT MATCHED".to_string(),
        };
        let merge = format!(
            "MERGE INTO {} AS target USING {} AS source ON 1 = 0 \
             {} THEN INSERT ({}) VALUES ({}) \
             OUTPUT {}, {} INTO {} ([ResolvedIdentity], [SourceIdentity]);",
            desc.qualified_name()?,
            stage_table,
            when,
            live.quote_list(&columns)?,
            project_list(desc, &stage, &columns)?,
            live.aliased("inserted", identity)?,
            stage.aliased("source", identity)?,
            key_stage
        );
        run(self.dest, desc, merge).await?;

        let shadow = stage.quote(&shadow_name(identity))?;
        let remapped = run(
            self.dest,
            desc,
            format!(
                "UPDATE stage SET stage.{} = ks.[ResolvedIdentity] FROM {} AS stage \
                 INNER JOIN {} AS ks ON {} = ks.[SourceIdentity]",
                shadow,
                stage_table,
                key_stage,
                stage.aliased("stage", identity)?
            ),
        )
        .await?;

        let assumed_existing = run(
            self.dest,
            desc,
            format!(
                "UPDATE {} SET {} = {} WHERE {} IS NULL",
                stage_table,
                shadow,
                stage.quote(identity)?,
                shadow
            ),
        )
        .await?;
        if assumed_existing > 0 {
            warn!(
                "{}: {} rows were not inserted and are assumed pre-existing; their identity is kept as-is",
                desc.name(),
                assumed_existing
            );
        }

        let inserted = self
            .dest
            .query_i64(&Statement::new(format!("SELECT COUNT(*) FROM {}", key_stage)))
            .await
            .map_err(|e| MigrateError::merge(desc.name().to_string(), e.to_string()))?
            .unwrap_or(0);
        let inserted = u64::try_from(inserted).unwrap_or(0);

        info!(
            "{}: {} identities regenerated, {} assumed pre-existing",
            desc.name(),
            inserted,
            assumed_existing
        );

        Ok(KeyResolution {
            inserted,
            remapped,
            assumed_existing,
        })
    }
}
