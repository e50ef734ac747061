//! Core abstractions for staging-based key remapping.
//!
//! - [`schema`]: table, key, and system-versioning metadata types
//! - [`catalog`]: the [`Catalog`] trait the engine reads metadata through
//! - [`descriptor`]: per-table descriptors and classification
//! - [`statement`]: statement text and checked column sets
//! - [`value`]: SQL value representation for rows in transit
//! - [`traits`]: the [`SqlSession`] trait drivers implement
//!
//! Drivers (`drivers/mssql`) implement the traits; everything else in the
//! crate is written against them and can run on an in-memory catalog.

pub mod catalog;
pub mod descriptor;
pub mod identifier;
pub mod schema;
pub mod statement;
pub mod traits;
pub mod value;

// Re-export commonly used types for convenience
pub use catalog::Catalog;
pub use descriptor::{classify, ShadowColumn, TableDescriptor, TableType};
pub use schema::{
    Column, CombinedKey, ForeignKey, KeyOrigin, PrimaryKeyColumn, TableName, TemporalInfo,
    TemporalKind,
};
pub use statement::{ColumnSet, Statement, SHADOW_PREFIX};
pub use traits::{RowBatch, SqlSession};
pub use value::{SqlNullType, SqlValue};
