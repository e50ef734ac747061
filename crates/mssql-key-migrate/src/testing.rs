//! In-memory catalog and recording session used by unit tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::catalog::Catalog;
use crate::core::schema::{
    Column, ForeignKey, PrimaryKeyColumn, TableName, TemporalInfo, TemporalKind,
};
use crate::core::statement::Statement;
use crate::core::traits::{RowBatch, SqlSession};
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};

#[derive(Debug, Clone)]
struct MemoryTable {
    name: TableName,
    columns: Vec<Column>,
    primary_key: Vec<String>,
    foreign_keys: Vec<ForeignKey>,
    uniques: BTreeMap<String, Vec<String>>,
    temporal: TemporalInfo,
    clustered: Vec<String>,
}

impl MemoryTable {
    fn new(name: TableName) -> Self {
        Self {
            name,
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            uniques: BTreeMap::new(),
            temporal: TemporalInfo::none(),
            clustered: Vec::new(),
        }
    }

    fn push_column(&mut self, name: &str, type_spec: &str) {
        let ordinal = self.columns.len() as i32 + 1;
        self.columns.push(Column {
            name: name.to_string(),
            data_type: type_spec.to_string(),
            max_length: 0,
            precision: 0,
            scale: 0,
            is_nullable: true,
            is_identity: false,
            ordinal_pos: ordinal,
            is_computed: false,
        });
    }
}

#[derive(Debug, Default)]
struct CatalogState {
    tables: Vec<MemoryTable>,
    schemas: Vec<String>,
    constraints: Vec<(String, String)>,
}

/// Catalog answering from tables declared with a builder.
///
/// Clones share state, so a [`RecordingSession`] built with
/// [`applying_ddl_to`](RecordingSession::applying_ddl_to) makes the stage
/// tables and shadow columns it is asked to create visible here.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    state: Arc<Mutex<CatalogState>>,
}

/// Builder for one table of a [`MemoryCatalog`].
pub struct TableBuilder {
    catalog: MemoryCatalog,
    table: MemoryTable,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(self, schema: &str, name: &str) -> TableBuilder {
        TableBuilder {
            catalog: self,
            table: MemoryTable::new(TableName::new(schema, name)),
        }
    }

    pub fn with_schema(self, schema: &str) -> Self {
        self.state().schemas.push(schema.to_string());
        self
    }

    pub fn with_constraint(self, schema: &str, name: &str) -> Self {
        self.state()
            .constraints
            .push((schema.to_string(), name.to_string()));
        self
    }

    fn state(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn find(&self, table: &TableName) -> Option<MemoryTable> {
        self.state()
            .tables
            .iter()
            .find(|t| t.name.matches(table))
            .cloned()
    }

    /// Reflect the stage DDL the provisioner emits.
    fn apply_ddl(&self, sql: &str) {
        let names = bracketed(sql);
        let mut state = self.state();

        if sql.starts_with("CREATE SCHEMA ") {
            if let Some(schema) = names.first() {
                state.schemas.push(schema.clone());
            }
        } else if sql.starts_with("DROP TABLE ") && names.len() >= 2 {
            let dropped = TableName::new(&names[0], &names[1]);
            state.tables.retain(|t| !t.name.matches(&dropped));
        } else if sql.starts_with("SELECT TOP 0 * INTO ") && names.len() >= 4 {
            let live = TableName::new(&names[2], &names[3]);
            let columns = state
                .tables
                .iter()
                .find(|t| t.name.matches(&live))
                .map(|t| t.columns.clone())
                .unwrap_or_default();
            let mut copy = MemoryTable::new(TableName::new(&names[0], &names[1]));
            copy.columns = columns;
            state.tables.push(copy);
        } else if sql.starts_with("ALTER TABLE ") && names.len() >= 3 {
            if sql.contains(" ADD CONSTRAINT ") {
                state.constraints.push((names[0].clone(), names[2].clone()));
            } else if let Some(type_spec) = added_column_type(sql) {
                let target = TableName::new(&names[0], &names[1]);
                if let Some(table) = state.tables.iter_mut().find(|t| t.name.matches(&target)) {
                    table.push_column(&names[2], type_spec);
                }
            }
        }
    }
}

/// Every `[...]` identifier in `sql`, in order.
fn bracketed(sql: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = sql;
    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open..].find(']') else {
            break;
        };
        names.push(rest[open + 1..open + close].to_string());
        rest = &rest[open + close + 1..];
    }
    names
}

/// Type of the column in `ALTER TABLE [s].[t] ADD [c] <type> NULL`.
fn added_column_type(sql: &str) -> Option<&str> {
    let after_add = &sql[sql.find(" ADD [")? + " ADD [".len()..];
    let after_name = &after_add[after_add.find(']')? + 1..];
    after_name.trim().strip_suffix(" NULL")
}

impl TableBuilder {
    /// Add a nullable column; `type_spec` is the full type, e.g. `nvarchar(50)`.
    pub fn column(mut self, name: &str, type_spec: &str) -> Self {
        self.table.push_column(name, type_spec);
        self
    }

    pub fn identity(mut self, name: &str) -> Self {
        for c in &mut self.table.columns {
            if c.name == name {
                c.is_identity = true;
                c.is_nullable = false;
            }
        }
        self
    }

    pub fn computed(mut self, name: &str) -> Self {
        for c in &mut self.table.columns {
            if c.name == name {
                c.is_computed = true;
            }
        }
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.table.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self.table.clustered = self.table.primary_key.clone();
        self
    }

    /// FK referencing a table in the same schema.
    pub fn foreign_key(mut self, name: &str, column: &str, ref_table: &str, ref_column: &str) -> Self {
        self.table.foreign_keys.push(ForeignKey {
            name: name.to_string(),
            parent_column: column.to_string(),
            referenced_schema: self.table.name.schema.clone(),
            referenced_table: ref_table.to_string(),
            referenced_column: ref_column.to_string(),
        });
        self
    }

    pub fn unique(mut self, name: &str, columns: &[&str]) -> Self {
        self.table
            .uniques
            .insert(name.to_string(), columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Mark as a system-versioned master paired with `history`.
    pub fn temporal(mut self, history: &str, start: &str, end: &str) -> Self {
        let schema = self.table.name.schema.clone();
        self.table.temporal = TemporalInfo {
            kind: TemporalKind::Temporal,
            master: Some(self.table.name.clone()),
            history: Some(TableName::new(&schema, history)),
            period_start: Some(start.to_string()),
            period_end: Some(end.to_string()),
        };
        self
    }

    /// Mark as the history table of `master`.
    pub fn history_of(mut self, master: &str, start: &str, end: &str) -> Self {
        let schema = self.table.name.schema.clone();
        self.table.temporal = TemporalInfo {
            kind: TemporalKind::History,
            master: Some(TableName::new(&schema, master)),
            history: Some(self.table.name.clone()),
            period_start: Some(start.to_string()),
            period_end: Some(end.to_string()),
        };
        self
    }

    pub fn done(self) -> MemoryCatalog {
        self.catalog.state().tables.push(self.table);
        self.catalog
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn primary_key(&self, table: &TableName) -> Result<Vec<PrimaryKeyColumn>> {
        let Some(t) = self.find(table) else {
            return Ok(Vec::new());
        };
        Ok(t.primary_key
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let column = t.columns.iter().find(|c| &c.name == name);
                PrimaryKeyColumn {
                    name: name.clone(),
                    ordinal: i as i32 + 1,
                    data_type: column.map(Column::type_spec).unwrap_or_default(),
                    is_identity: column.is_some_and(|c| c.is_identity),
                }
            })
            .collect())
    }

    async fn foreign_keys(&self, table: &TableName) -> Result<Vec<ForeignKey>> {
        Ok(self
            .find(table)
            .map(|t| t.foreign_keys.clone())
            .unwrap_or_default())
    }

    async fn unique_constraints(&self, table: &TableName) -> Result<BTreeMap<String, Vec<String>>> {
        let Some(t) = self.find(table) else {
            return Ok(BTreeMap::new());
        };
        Ok(t.uniques.clone())
    }

    async fn column_list(&self, table: &TableName, include_identity: bool) -> Result<Vec<Column>> {
        Ok(self
            .find(table)
            .map(|t| {
                t.columns
                    .iter()
                    .filter(|c| include_identity || !c.is_identity)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn column_data_type(&self, table: &TableName, column: &str) -> Result<Option<String>> {
        Ok(self.find(table).and_then(|t| {
            t.columns
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(column))
                .map(Column::type_spec)
        }))
    }

    async fn temporal_info(&self, table: &TableName) -> Result<TemporalInfo> {
        Ok(self
            .find(table)
            .map(|t| t.temporal.clone())
            .unwrap_or_default())
    }

    async fn clustered_columns(&self, table: &TableName) -> Result<Vec<String>> {
        Ok(self.find(table).map(|t| t.clustered.clone()).unwrap_or_default())
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        let state = self.state();
        Ok(state.schemas.iter().any(|s| s.eq_ignore_ascii_case(schema))
            || state
                .tables
                .iter()
                .any(|t| t.name.schema.eq_ignore_ascii_case(schema)))
    }

    async fn table_exists(&self, table: &TableName) -> Result<bool> {
        Ok(self.find(table).is_some())
    }

    async fn column_exists(&self, table: &TableName, column: &str) -> Result<bool> {
        Ok(self
            .find(table)
            .is_some_and(|t| t.columns.iter().any(|c| c.name.eq_ignore_ascii_case(column))))
    }

    async fn constraint_exists(&self, schema: &str, name: &str) -> Result<bool> {
        Ok(self
            .state()
            .constraints
            .iter()
            .any(|(s, n)| s.eq_ignore_ascii_case(schema) && n.eq_ignore_ascii_case(name)))
    }
}

/// One batch inserted through a [`RecordingSession`].
#[derive(Debug, Clone)]
pub struct InsertCall {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: usize,
    pub identity_insert: bool,
}

/// Session that records every statement and answers from canned responses.
///
/// Responses are matched by substring against the SQL text; the first
/// matching pattern wins. Unmatched statements affect 0 rows and return no
/// scalar and no rows.
#[derive(Default)]
pub struct RecordingSession {
    log: Mutex<Vec<Statement>>,
    inserts: Mutex<Vec<InsertCall>>,
    affected: Vec<(String, u64)>,
    scalars: Vec<(String, i64)>,
    rows: Vec<(String, RowBatch)>,
    fail_on: Option<String>,
    catalog: Option<MemoryCatalog>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn affected(mut self, pattern: &str, count: u64) -> Self {
        self.affected.push((pattern.to_string(), count));
        self
    }

    pub fn scalar(mut self, pattern: &str, value: i64) -> Self {
        self.scalars.push((pattern.to_string(), value));
        self
    }

    pub fn rows(mut self, pattern: &str, rows: Vec<Vec<SqlValue<'static>>>) -> Self {
        self.rows.push((pattern.to_string(), rows));
        self
    }

    /// Fail any statement whose SQL contains `pattern`.
    pub fn fail_on(mut self, pattern: &str) -> Self {
        self.fail_on = Some(pattern.to_string());
        self
    }

    /// Replay executed stage DDL into `catalog`.
    pub fn applying_ddl_to(mut self, catalog: &MemoryCatalog) -> Self {
        self.catalog = Some(catalog.clone());
        self
    }

    /// SQL of every statement, in execution order.
    pub fn statements(&self) -> Vec<String> {
        self.log
            .lock()
            .map(|log| log.iter().map(|s| s.sql.clone()).collect())
            .unwrap_or_default()
    }

    /// Index of the first statement containing `pattern`.
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.statements().iter().position(|s| s.contains(pattern))
    }

    /// Index of the last statement containing `pattern`.
    pub fn last_position(&self, pattern: &str) -> Option<usize> {
        self.statements().iter().rposition(|s| s.contains(pattern))
    }

    /// Statements containing `pattern`.
    pub fn matching(&self, pattern: &str) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| s.contains(pattern))
            .collect()
    }

    pub fn inserts(&self) -> Vec<InsertCall> {
        self.inserts.lock().map(|i| i.clone()).unwrap_or_default()
    }

    fn record(&self, stmt: &Statement) -> Result<()> {
        if let Ok(mut log) = self.log.lock() {
            log.push(stmt.clone());
        }
        match &self.fail_on {
            Some(pattern) if stmt.sql.contains(pattern.as_str()) => {
                Err(MigrateError::Config(format!("injected failure on: {}", pattern)))
            }
            _ => Ok(()),
        }
    }

    fn insert_batch(
        &self,
        qualified_table: &str,
        columns: &[String],
        batch: &RowBatch,
        identity_insert: bool,
    ) -> Result<u64> {
        self.record(&Statement::new(format!(
            "INSERT INTO {} ({}) VALUES <{} rows>",
            qualified_table,
            columns.join(", "),
            batch.len()
        )))?;
        if let Ok(mut inserts) = self.inserts.lock() {
            inserts.push(InsertCall {
                table: qualified_table.to_string(),
                columns: columns.to_vec(),
                rows: batch.len(),
                identity_insert,
            });
        }
        Ok(batch.len() as u64)
    }
}

fn lookup<'a, T>(table: &'a [(String, T)], sql: &str) -> Option<&'a T> {
    table
        .iter()
        .find(|(pattern, _)| sql.contains(pattern.as_str()))
        .map(|(_, v)| v)
}

#[async_trait]
impl SqlSession for RecordingSession {
    async fn execute(&self, stmt: &Statement) -> Result<u64> {
        self.record(stmt)?;
        if let Some(catalog) = &self.catalog {
            catalog.apply_ddl(&stmt.sql);
        }
        Ok(lookup(&self.affected, &stmt.sql).copied().unwrap_or(0))
    }

    async fn query_i64(&self, stmt: &Statement) -> Result<Option<i64>> {
        self.record(stmt)?;
        Ok(lookup(&self.scalars, &stmt.sql).copied())
    }

    async fn stream_rows(
        &self,
        stmt: &Statement,
        _col_types: &[String],
        batch_rows: usize,
        tx: mpsc::Sender<RowBatch>,
    ) -> Result<u64> {
        self.record(stmt)?;
        let rows = lookup(&self.rows, &stmt.sql).cloned().unwrap_or_default();
        let total = rows.len() as u64;
        for chunk in rows.chunks(batch_rows.max(1)) {
            if tx.send(chunk.to_vec()).await.is_err() {
                return Err(MigrateError::transport("recording", "channel closed"));
            }
        }
        Ok(total)
    }

    async fn insert_stream(
        &self,
        qualified_table: &str,
        columns: &[String],
        identity_insert: bool,
        mut rx: mpsc::Receiver<RowBatch>,
    ) -> Result<u64> {
        let Some(first) = rx.recv().await else {
            return Ok(0);
        };
        if identity_insert {
            self.record(&Statement::new(format!(
                "SET IDENTITY_INSERT {} ON",
                qualified_table
            )))?;
        }

        let mut result = Ok(0);
        let mut next = Some(first);
        while let Some(batch) = next {
            match self.insert_batch(qualified_table, columns, &batch, identity_insert) {
                Ok(n) => result = result.map(|total| total + n),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
            next = rx.recv().await;
        }

        if identity_insert {
            self.record(&Statement::new(format!(
                "SET IDENTITY_INSERT {} OFF",
                qualified_table
            )))?;
        }
        result
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {}
}
