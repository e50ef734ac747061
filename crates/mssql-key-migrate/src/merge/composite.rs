//! Merge for tables whose PK is made entirely of foreign keys.

use crate::core::descriptor::TableDescriptor;
use crate::core::statement::shadow_name;
use crate::core::traits::SqlSession;
use crate::error::Result;

use super::{project_list, run};

/// Insert rows whose resolved composite key is absent. Returns rows inserted.
pub(super) async fn merge(dest: &dyn SqlSession, desc: &TableDescriptor) -> Result<u64> {
    let live = desc.live_columns();
    let stage = desc.stage_columns()?;

    let on = desc
        .primary_key()
        .iter()
        .map(|pk| {
            Ok(format!(
                "{} = COALESCE({}, {})",
                live.aliased("target", &pk.name)?,
                stage.aliased("source", &shadow_name(&pk.name))?,
                stage.aliased("source", &pk.name)?
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    let columns = desc.insert_columns();
    let sql = format!(
        "MERGE INTO {} AS target USING {} AS source ON {} \
         WHEN NOT MATCHED THEN INSERT ({}) VALUES ({});",
        desc.qualified_name()?,
        desc.qualified_stage()?,
        on.join(" AND "),
        live.quote_list(&columns)?,
        project_list(desc, &stage, &columns)?
    );
    run(dest, desc, sql).await
}
