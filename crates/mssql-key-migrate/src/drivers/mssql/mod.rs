//! Microsoft SQL Server driver.
//!
//! - [`MssqlSession`]: pooled statement execution and batched inserts
//! - [`MssqlCatalog`]: metadata queries against `sys.*` views

mod catalog;
mod convert;
mod session;

pub use catalog::MssqlCatalog;
pub use session::MssqlSession;
