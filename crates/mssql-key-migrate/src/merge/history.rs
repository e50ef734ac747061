//! History rows of a system-versioned pair.
//!
//! History rows are appended, with each key inherited from the master
//! written from its resolved shadow. Rows whose key never resolved get the
//! negated staged value so they cannot collide with live keys. Only
//! positive values are negated: zero and negative staged keys are kept as
//! is, and the type minimum is never negated.

use tracing::warn;

use crate::core::descriptor::TableDescriptor;
use crate::core::schema::is_signed_numeric;
use crate::core::statement::{shadow_name, ColumnSet};
use crate::core::traits::SqlSession;
use crate::error::Result;

use super::run;

pub(super) async fn merge(dest: &dyn SqlSession, desc: &TableDescriptor) -> Result<u64> {
    let live = desc.live_columns();
    let stage = desc.stage_columns()?;

    let columns = desc.insert_columns();
    let values = columns
        .iter()
        .map(|c| project_history(desc, &stage, c))
        .collect::<Result<Vec<_>>>()?;

    let sql = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} AS source",
        desc.qualified_name()?,
        live.quote_list(&columns)?,
        values.join(", "),
        desc.qualified_stage()?
    );
    run(dest, desc, sql).await
}

fn project_history(desc: &TableDescriptor, stage: &ColumnSet, column: &str) -> Result<String> {
    let Some(key) = desc
        .combined_keys()
        .iter()
        .find(|k| k.column.eq_ignore_ascii_case(column))
    else {
        return stage.aliased("source", column);
    };

    let shadow = stage.aliased("source", &shadow_name(column))?;
    let raw = stage.aliased("source", column)?;
    if is_signed_numeric(&key.data_type) {
        Ok(format!(
            "COALESCE({}, CASE WHEN {} > 0 THEN -{} ELSE {} END)",
            shadow, raw, raw, raw
        ))
    } else {
        warn!(
            "{}: key column {} has type {}, unresolved rows keep their staged value",
            desc.name(),
            column,
            key.data_type
        );
        Ok(format!("COALESCE({}, {})", shadow, raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryCatalog, RecordingSession};

    fn catalog() -> MemoryCatalog {
        MemoryCatalog::new()
            .table("dbo", "Contracts")
            .column("ContractId", "int")
            .column("Region", "char(2)")
            .column("Amount", "money")
            .column("ValidFrom", "datetime2(7)")
            .column("ValidTo", "datetime2(7)")
            .primary_key(&["ContractId"])
            .foreign_key("FK_Contracts_Regions", "Region", "Regions", "Code")
            .temporal("ContractsHistory", "ValidFrom", "ValidTo")
            .done()
            .table("dbo", "ContractsHistory")
            .column("ContractId", "int")
            .column("Region", "char(2)")
            .column("Amount", "money")
            .column("ValidFrom", "datetime2(7)")
            .column("ValidTo", "datetime2(7)")
            .history_of("Contracts", "ValidFrom", "ValidTo")
            .done()
    }

    #[tokio::test]
    async fn test_history_insert_uses_negative_sentinel() {
        let catalog = catalog();
        let desc = TableDescriptor::load(&catalog, "dbo", "STAGE", "ContractsHistory")
            .await
            .unwrap();
        let dest = RecordingSession::new().affected("INSERT INTO [dbo].[ContractsHistory]", 7);

        let inserted = merge(&dest, &desc).await.unwrap();

        assert_eq!(inserted, 7);
        assert_eq!(
            dest.statements(),
            vec![
                "INSERT INTO [dbo].[ContractsHistory] ([ContractId], [Region], [Amount], [ValidFrom], [ValidTo]) \
                 SELECT COALESCE(source.[New_ContractId], \
                 CASE WHEN source.[ContractId] > 0 THEN -source.[ContractId] ELSE source.[ContractId] END), \
                 COALESCE(source.[New_Region], source.[Region]), source.[Amount], \
                 source.[ValidFrom], source.[ValidTo] FROM [STAGE].[ContractsHistory] AS source"
            ]
        );
    }

    #[tokio::test]
    async fn test_sentinel_never_negates_non_positive_keys() {
        let catalog = MemoryCatalog::new()
            .table("dbo", "Ledger")
            .column("EntryId", "bigint")
            .column("ValidFrom", "datetime2(7)")
            .column("ValidTo", "datetime2(7)")
            .primary_key(&["EntryId"])
            .temporal("LedgerHistory", "ValidFrom", "ValidTo")
            .done()
            .table("dbo", "LedgerHistory")
            .column("EntryId", "bigint")
            .column("ValidFrom", "datetime2(7)")
            .column("ValidTo", "datetime2(7)")
            .history_of("Ledger", "ValidFrom", "ValidTo")
            .done();
        let desc = TableDescriptor::load(&catalog, "dbo", "STAGE", "LedgerHistory")
            .await
            .unwrap();
        let dest = RecordingSession::new();

        merge(&dest, &desc).await.unwrap();

        let insert = &dest.statements()[0];
        assert!(insert.contains(
            "COALESCE(source.[New_EntryId], CASE WHEN source.[EntryId] > 0 \
             THEN -source.[EntryId] ELSE source.[EntryId] END)"
        ));
        assert!(!insert.contains(", -source.[EntryId])"));
    }
}
