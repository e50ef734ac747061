//! Insert-select for tables without a primary key.
//!
//! Without unique constraints there is nothing to match on, so every run
//! appends the whole stage copy again. With unique constraints the identity
//! merge guards are applied as a filter.

use tracing::{info, warn};

use crate::core::descriptor::TableDescriptor;
use crate::core::traits::SqlSession;
use crate::error::Result;

use super::{guard_clause, project_list, run};

pub(super) async fn merge(dest: &dyn SqlSession, desc: &TableDescriptor) -> Result<u64> {
    let live = desc.live_columns();
    let stage = desc.stage_columns()?;

    // An identity on a heap is regenerated like any other.
    let columns = desc.insert_columns_without_identity();
    let mut sql = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} AS source",
        desc.qualified_name()?,
        live.quote_list(&columns)?,
        project_list(desc, &stage, &columns)?,
        desc.qualified_stage()?
    );

    match guard_clause(desc, &live, &stage)? {
        Some(guards) => {
            info!("{}: guarded insert on unique constraints", desc.name());
            sql.push_str(" WHERE ");
            sql.push_str(&guards);
        }
        None => warn!(
            "{} has no primary key or unique constraint; rows are appended on every run",
            desc.name()
        ),
    }

    run(dest, desc, sql).await
}
