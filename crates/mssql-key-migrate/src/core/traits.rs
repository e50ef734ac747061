//! Core traits for talking to a database.
//!
//! - [`SqlSession`]: executes statements against one database
//!
//! The engine is written against this trait so that the SQL it emits can be
//! exercised without a server.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

use super::statement::Statement;
use super::value::SqlValue;

/// Owned rows in selection order, as passed from a reader to a writer.
pub type RowBatch = Vec<Vec<SqlValue<'static>>>;

/// Execute statements against one database.
///
/// Implementations hold their own connection pool. The engine awaits one
/// statement at a time per session; the only overlap is a source
/// [`stream_rows`](SqlSession::stream_rows) feeding a destination
/// [`insert_stream`](SqlSession::insert_stream).
#[async_trait]
pub trait SqlSession: Send + Sync {
    /// Execute a statement and return the total number of affected rows.
    async fn execute(&self, stmt: &Statement) -> Result<u64>;

    /// Execute a query and return the first column of the first row as an integer.
    ///
    /// `None` when the query returns no rows or a NULL.
    async fn query_i64(&self, stmt: &Statement) -> Result<Option<i64>>;

    /// Run a query and send its rows to `tx` in batches of at most
    /// `batch_rows`, converting each column with its SQL Server base type
    /// from `col_types`. Returns the number of rows read.
    ///
    /// A value that cannot be read as its declared type is an error, never
    /// a NULL.
    async fn stream_rows(
        &self,
        stmt: &Statement,
        col_types: &[String],
        batch_rows: usize,
        tx: mpsc::Sender<RowBatch>,
    ) -> Result<u64>;

    /// Insert every batch received on `rx` into `qualified_table` until the
    /// channel closes. Returns the number of rows inserted.
    ///
    /// `columns` are already-quoted identifiers in row value order. With
    /// `identity_insert`, `SET IDENTITY_INSERT ON/OFF` wraps all batches on
    /// one connection. Nothing is sent to the server when no batch arrives.
    async fn insert_stream(
        &self,
        qualified_table: &str,
        columns: &[String],
        identity_insert: bool,
        rx: mpsc::Receiver<RowBatch>,
    ) -> Result<u64>;

    /// Round-trip a trivial query.
    async fn health_check(&self) -> Result<()>;

    /// Close the connection pool.
    async fn close(&self);
}
