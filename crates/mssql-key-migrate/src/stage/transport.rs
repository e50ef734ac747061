//! Source to stage copy.
//!
//! Rows are streamed from the source in batches over a bounded channel and
//! inserted into the stage copy as they arrive, so at most a few batches are
//! held in memory at once.

use tokio::sync::mpsc;
use tracing::info;

use crate::core::descriptor::TableDescriptor;
use crate::core::identifier::qualify_mssql;
use crate::core::statement::Statement;
use crate::core::traits::{RowBatch, SqlSession};
use crate::error::{MigrateError, Result};

/// Batches in flight between the source reader and the stage writer.
const CHANNEL_DEPTH: usize = 4;

/// Default rows per streamed batch.
pub const DEFAULT_BATCH_ROWS: usize = 1_000;

/// Copies a table's rows from the live source table into its stage copy.
pub struct DataTransporter<'a> {
    source: &'a dyn SqlSession,
    dest: &'a dyn SqlSession,
    source_schema: &'a str,
    batch_rows: usize,
}

impl<'a> DataTransporter<'a> {
    pub fn new(source: &'a dyn SqlSession, dest: &'a dyn SqlSession, source_schema: &'a str) -> Self {
        Self {
            source,
            dest,
            source_schema,
            batch_rows: DEFAULT_BATCH_ROWS,
        }
    }

    /// Rows per batch sent from the source to the stage writer.
    pub fn with_batch_rows(mut self, rows: usize) -> Self {
        self.batch_rows = rows.max(1);
        self
    }

    /// Copy every source row using the descriptor's insertable columns, in
    /// catalog order on both sides. Returns the number of rows staged.
    ///
    /// The column list comes from the destination catalog, so the source
    /// table must carry at least those columns.
    pub async fn copy(&self, desc: &TableDescriptor) -> Result<u64> {
        let table = desc.name().to_string();
        let live = desc.live_columns();
        let names = desc.insert_columns();

        let select = Statement::new(format!(
            "SELECT {} FROM {}",
            live.quote_list(&names)?,
            qualify_mssql(self.source_schema, &desc.name().name)?
        ));
        let types: Vec<String> = desc
            .columns()
            .iter()
            .filter(|c| c.is_writable())
            .map(|c| c.data_type.clone())
            .collect();
        let columns = names
            .iter()
            .map(|n| live.quote(n))
            .collect::<Result<Vec<_>>>()?;
        let stage = desc.qualified_stage()?;

        info!("Starting source to stage copy of {}", table);
        let (tx, rx) = mpsc::channel::<RowBatch>(CHANNEL_DEPTH);
        let (read, written) = tokio::join!(
            self.source.stream_rows(&select, &types, self.batch_rows, tx),
            self.dest
                .insert_stream(&stage, &columns, desc.identity_column().is_some(), rx),
        );

        // A failed writer closes the channel, which also fails the reader;
        // report the writer's error in that case.
        let staged = written.map_err(|e| match e {
            e @ MigrateError::Transport { .. } => e,
            e => MigrateError::transport(&table, e.to_string()),
        })?;
        let read = read.map_err(|e| MigrateError::transport(&table, e.to_string()))?;

        if read == 0 {
            info!("{}: source is empty, nothing to stage", table);
        } else {
            info!("{}: staged {} rows", table, staged);
        }
        Ok(staged)
    }
}
