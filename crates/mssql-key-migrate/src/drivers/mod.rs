//! Database driver implementations.
//!
//! - [`mssql`]: Microsoft SQL Server session and catalog
//!
//! The engine only sees the [`SqlSession`](crate::core::traits::SqlSession)
//! and [`Catalog`](crate::core::catalog::Catalog) traits; drivers provide
//! the implementations.

pub mod mssql;

pub use mssql::{MssqlCatalog, MssqlSession};
