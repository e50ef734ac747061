//! SQL Server catalog queries.
//!
//! Implements [`Catalog`] with queries against `sys.*` views and
//! `INFORMATION_SCHEMA`, always parameterized on schema and table name.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tiberius::Row;
use tracing::debug;

use crate::core::catalog::Catalog;
use crate::core::schema::{
    format_type_spec, Column, ForeignKey, PrimaryKeyColumn, TableName, TemporalInfo, TemporalKind,
};
use crate::error::{MigrateError, Result};

use super::convert::row_i64;
use super::session::MssqlSession;

// Alias types (`CREATE TYPE ... FROM`) report their system base type; CLR
// types such as geography keep their own name.
const COLUMNS_QUERY: &str = r#"
    SELECT
        c.name,
        base.name,
        CAST(CASE
            WHEN c.max_length = -1 THEN -1
            WHEN base.name IN ('nvarchar', 'nchar') THEN c.max_length / 2
            WHEN base.name IN ('varchar', 'char', 'varbinary', 'binary') THEN c.max_length
            ELSE 0
        END AS INT),
        CAST(c.precision AS INT),
        CAST(c.scale AS INT),
        CAST(c.is_nullable AS INT),
        CAST(c.is_identity AS INT),
        CAST(c.column_id AS INT),
        CAST(c.is_computed AS INT)
    FROM sys.columns c
    JOIN sys.types t ON c.user_type_id = t.user_type_id
    LEFT JOIN sys.types bt ON bt.user_type_id = c.system_type_id
    CROSS APPLY (
        SELECT CASE WHEN t.is_assembly_type = 1 THEN t.name ELSE COALESCE(bt.name, t.name) END AS name
    ) base
    JOIN sys.tables tbl ON c.object_id = tbl.object_id
    JOIN sys.schemas s ON tbl.schema_id = s.schema_id
    WHERE s.name = @P1 AND tbl.name = @P2
    ORDER BY c.column_id
"#;

const PRIMARY_KEY_QUERY: &str = r#"
    SELECT c.name, CAST(ic.key_ordinal AS INT)
    FROM sys.key_constraints kc
    JOIN sys.index_columns ic
        ON kc.parent_object_id = ic.object_id AND kc.unique_index_id = ic.index_id
    JOIN sys.columns c ON ic.object_id = c.object_id AND ic.column_id = c.column_id
    WHERE kc.type = 'PK'
      AND OBJECT_SCHEMA_NAME(kc.parent_object_id) = @P1
      AND OBJECT_NAME(kc.parent_object_id) = @P2
    ORDER BY ic.key_ordinal
"#;

const FOREIGN_KEYS_QUERY: &str = r#"
    SELECT
        fk.name,
        pc.name,
        rs.name,
        rt.name,
        rc.name
    FROM sys.foreign_keys fk
    JOIN sys.foreign_key_columns fkc ON fk.object_id = fkc.constraint_object_id
    JOIN sys.columns pc
        ON fkc.parent_object_id = pc.object_id AND fkc.parent_column_id = pc.column_id
    JOIN sys.columns rc
        ON fkc.referenced_object_id = rc.object_id AND fkc.referenced_column_id = rc.column_id
    JOIN sys.tables rt ON fkc.referenced_object_id = rt.object_id
    JOIN sys.schemas rs ON rt.schema_id = rs.schema_id
    WHERE OBJECT_SCHEMA_NAME(fk.parent_object_id) = @P1
      AND OBJECT_NAME(fk.parent_object_id) = @P2
    ORDER BY fk.name, fkc.constraint_column_id
"#;

const UNIQUE_QUERY: &str = r#"
    SELECT i.name, c.name
    FROM sys.indexes i
    JOIN sys.index_columns ic ON i.object_id = ic.object_id AND i.index_id = ic.index_id
    JOIN sys.columns c ON ic.object_id = c.object_id AND ic.column_id = c.column_id
    WHERE i.is_unique = 1
      AND ic.is_included_column = 0
      AND OBJECT_SCHEMA_NAME(i.object_id) = @P1
      AND OBJECT_NAME(i.object_id) = @P2
    ORDER BY i.name, ic.key_ordinal
"#;

const CLUSTERED_QUERY: &str = r#"
    SELECT c.name
    FROM sys.indexes i
    JOIN sys.index_columns ic ON i.object_id = ic.object_id AND i.index_id = ic.index_id
    JOIN sys.columns c ON ic.object_id = c.object_id AND ic.column_id = c.column_id
    WHERE i.index_id = 1
      AND OBJECT_SCHEMA_NAME(i.object_id) = @P1
      AND OBJECT_NAME(i.object_id) = @P2
    ORDER BY ic.key_ordinal
"#;

/// temporal_type: 0 none, 1 history, 2 system-versioned. For a history
/// table the master is the table whose history_table_id points at it.
const TEMPORAL_QUERY: &str = r#"
    SELECT
        CAST(t.temporal_type AS INT),
        ms.name, mt.name,
        hs.name, ht.name,
        ps.name, pe.name
    FROM sys.tables t
    JOIN sys.schemas s ON t.schema_id = s.schema_id
    LEFT JOIN sys.tables mt
        ON (t.temporal_type = 2 AND mt.object_id = t.object_id)
        OR (t.temporal_type = 1 AND mt.history_table_id = t.object_id)
    LEFT JOIN sys.schemas ms ON mt.schema_id = ms.schema_id
    LEFT JOIN sys.tables ht ON ht.object_id = mt.history_table_id
    LEFT JOIN sys.schemas hs ON ht.schema_id = hs.schema_id
    LEFT JOIN sys.periods p ON p.object_id = mt.object_id
    LEFT JOIN sys.columns ps ON ps.object_id = p.object_id AND ps.column_id = p.start_column_id
    LEFT JOIN sys.columns pe ON pe.object_id = p.object_id AND pe.column_id = p.end_column_id
    WHERE s.name = @P1 AND t.name = @P2
"#;

/// Catalog backed by SQL Server system views.
pub struct MssqlCatalog {
    session: Arc<MssqlSession>,
}

impl MssqlCatalog {
    pub fn new(session: Arc<MssqlSession>) -> Self {
        Self { session }
    }

    async fn rows(&self, table: &TableName, sql: &str) -> Result<Vec<Row>> {
        self.session
            .query_raw(sql, &[table.schema.as_str(), table.name.as_str()])
            .await
            .map_err(|e| MigrateError::catalog(table.to_string(), e.to_string()))
    }
}

fn text(row: &Row, idx: usize) -> Option<String> {
    row.try_get::<&str, _>(idx).ok().flatten().map(str::to_string)
}

fn int(row: &Row, idx: usize) -> i32 {
    row_i64(row, idx).unwrap_or(0) as i32
}

fn column_from_row(row: &Row) -> Column {
    Column {
        name: text(row, 0).unwrap_or_default(),
        data_type: text(row, 1).unwrap_or_default(),
        max_length: int(row, 2),
        precision: int(row, 3),
        scale: int(row, 4),
        is_nullable: int(row, 5) == 1,
        is_identity: int(row, 6) == 1,
        ordinal_pos: int(row, 7),
        is_computed: int(row, 8) == 1,
    }
}

#[async_trait]
impl Catalog for MssqlCatalog {
    async fn primary_key(&self, table: &TableName) -> Result<Vec<PrimaryKeyColumn>> {
        let columns = self.column_list(table, true).await?;
        let rows = self.rows(table, PRIMARY_KEY_QUERY).await?;

        let mut pk = Vec::with_capacity(rows.len());
        for row in &rows {
            let name = text(row, 0).unwrap_or_default();
            let column = columns.iter().find(|c| c.name == name).ok_or_else(|| {
                MigrateError::catalog(table.to_string(), format!("PK column {} not found", name))
            })?;
            pk.push(PrimaryKeyColumn {
                data_type: column.type_spec(),
                is_identity: column.is_identity,
                ordinal: int(row, 1),
                name,
            });
        }

        debug!(
            "Primary key for {}: {:?}",
            table,
            pk.iter().map(|c| &c.name).collect::<Vec<_>>()
        );
        Ok(pk)
    }

    async fn foreign_keys(&self, table: &TableName) -> Result<Vec<ForeignKey>> {
        let rows = self.rows(table, FOREIGN_KEYS_QUERY).await?;
        let fks: Vec<ForeignKey> = rows
            .iter()
            .map(|row| ForeignKey {
                name: text(row, 0).unwrap_or_default(),
                parent_column: text(row, 1).unwrap_or_default(),
                referenced_schema: text(row, 2).unwrap_or_default(),
                referenced_table: text(row, 3).unwrap_or_default(),
                referenced_column: text(row, 4).unwrap_or_default(),
            })
            .collect();

        debug!("Loaded {} foreign key columns for {}", fks.len(), table);
        Ok(fks)
    }

    async fn unique_constraints(&self, table: &TableName) -> Result<BTreeMap<String, Vec<String>>> {
        let rows = self.rows(table, UNIQUE_QUERY).await?;
        let mut uniques: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in &rows {
            let (Some(name), Some(column)) = (text(row, 0), text(row, 1)) else {
                continue;
            };
            uniques.entry(name).or_default().push(column);
        }
        Ok(uniques)
    }

    async fn column_list(&self, table: &TableName, include_identity: bool) -> Result<Vec<Column>> {
        let rows = self.rows(table, COLUMNS_QUERY).await?;
        let columns: Vec<Column> = rows
            .iter()
            .map(column_from_row)
            .filter(|c| include_identity || !c.is_identity)
            .collect();

        debug!("Loaded {} columns for {}", columns.len(), table);
        Ok(columns)
    }

    async fn column_data_type(&self, table: &TableName, column: &str) -> Result<Option<String>> {
        let columns = self.column_list(table, true).await?;
        Ok(columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(column))
            .map(|c| format_type_spec(&c.data_type, c.max_length, c.precision, c.scale)))
    }

    async fn temporal_info(&self, table: &TableName) -> Result<TemporalInfo> {
        let rows = self.rows(table, TEMPORAL_QUERY).await?;
        let Some(row) = rows.first() else {
            return Ok(TemporalInfo::none());
        };

        let kind = match int(row, 0) {
            2 => TemporalKind::Temporal,
            1 => TemporalKind::History,
            _ => return Ok(TemporalInfo::none()),
        };

        let pair = |s: usize, t: usize| match (text(row, s), text(row, t)) {
            (Some(schema), Some(name)) => Some(TableName::new(schema, name)),
            _ => None,
        };

        Ok(TemporalInfo {
            kind,
            master: pair(1, 2),
            history: pair(3, 4),
            period_start: text(row, 5),
            period_end: text(row, 6),
        })
    }

    async fn clustered_columns(&self, table: &TableName) -> Result<Vec<String>> {
        let rows = self.rows(table, CLUSTERED_QUERY).await?;
        Ok(rows.iter().filter_map(|r| text(r, 0)).collect())
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        let rows = self
            .session
            .query_raw("SELECT 1 FROM sys.schemas WHERE name = @P1", &[schema])
            .await?;
        Ok(!rows.is_empty())
    }

    async fn table_exists(&self, table: &TableName) -> Result<bool> {
        let rows = self
            .rows(
                table,
                "SELECT 1 FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2",
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn column_exists(&self, table: &TableName, column: &str) -> Result<bool> {
        let rows = self
            .session
            .query_raw(
                "SELECT 1 FROM sys.columns c \
                 JOIN sys.tables t ON c.object_id = t.object_id \
                 JOIN sys.schemas s ON t.schema_id = s.schema_id \
                 WHERE s.name = @P1 AND t.name = @P2 AND c.name = @P3",
                &[table.schema.as_str(), table.name.as_str(), column],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn constraint_exists(&self, schema: &str, name: &str) -> Result<bool> {
        let rows = self
            .session
            .query_raw(
                "SELECT 1 FROM sys.objects o \
                 JOIN sys.schemas s ON o.schema_id = s.schema_id \
                 WHERE s.name = @P1 AND o.name = @P2",
                &[schema, name],
            )
            .await?;
        Ok(!rows.is_empty())
    }
}
