//! Natural-key merge for tables whose PK is not an identity.

use crate::core::descriptor::TableDescriptor;
use crate::core::statement::shadow_name;
use crate::core::traits::SqlSession;
use crate::error::Result;

use super::{project_list, run};

/// Fill unresolved PK shadows with their staged value, then insert rows
/// whose resolved PK is absent from the live table. Returns rows inserted.
pub(super) async fn merge(dest: &dyn SqlSession, desc: &TableDescriptor) -> Result<u64> {
    let live = desc.live_columns();
    let stage = desc.stage_columns()?;
    let stage_table = desc.qualified_stage()?;

    let mut on = Vec::with_capacity(desc.primary_key().len());
    for pk in desc.primary_key() {
        let shadow = stage.quote(&shadow_name(&pk.name))?;
        run(
            dest,
            desc,
            format!(
                "UPDATE {} SET {} = {} WHERE {} IS NULL",
                stage_table,
                shadow,
                stage.quote(&pk.name)?,
                shadow
            ),
        )
        .await?;
        on.push(format!(
            "{} = {}",
            live.aliased("target", &pk.name)?,
            stage.aliased("source", &shadow_name(&pk.name))?
        ));
    }

    let columns = desc.insert_columns();
    let sql = format!(
        "MERGE INTO {} AS target USING {} AS source ON {} \
         WHEN NOT MATCHED THEN INSERT ({}) VALUES ({});",
        desc.qualified_name()?,
        stage_table,
        on.join(" AND "),
        live.quote_list(&columns)?,
        project_list(desc, &stage, &columns)?
    );
    run(dest, desc, sql).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryCatalog, RecordingSession};

    #[tokio::test]
    async fn test_natural_key_merge_shape() {
        let catalog = MemoryCatalog::new()
            .table("dbo", "Countries")
            .column("Code", "char(2)")
            .column("Name", "nvarchar(100)")
            .primary_key(&["Code"])
            .done();
        let desc = TableDescriptor::load(&catalog, "dbo", "STAGE", "Countries")
            .await
            .unwrap();
        let dest = RecordingSession::new().affected("MERGE INTO", 4);

        let inserted = merge(&dest, &desc).await.unwrap();

        assert_eq!(inserted, 4);
        assert_eq!(
            dest.statements(),
            vec![
                "UPDATE [STAGE].[Countries] SET [New_Code] = [Code] WHERE [New_Code] IS NULL".to_string(),
                "MERGE INTO [dbo].[Countries] AS target USING [STAGE].[Countries] AS source \
                 ON target.[Code] = source.[New_Code] WHEN NOT MATCHED THEN INSERT ([Code], [Name]) \
                 VALUES (COALESCE(source.[New_Code], source.[Code]), source.[Name]);"
                    .to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_partial_fk_key_joins_every_pk_column() {
        let catalog = MemoryCatalog::new()
            .table("dbo", "OrderLines")
            .column("OrderId", "int")
            .column("LineNo", "smallint")
            .column("Qty", "int")
            .primary_key(&["OrderId", "LineNo"])
            .foreign_key("FK_OrderLines_Orders", "OrderId", "Orders", "OrderId")
            .done();
        let desc = TableDescriptor::load(&catalog, "dbo", "STAGE", "OrderLines")
            .await
            .unwrap();
        let dest = RecordingSession::new();

        merge(&dest, &desc).await.unwrap();

        assert_eq!(dest.matching("UPDATE").len(), 2);
        let merge_sql = &dest.matching("MERGE INTO")[0];
        assert!(merge_sql.contains(
            "ON target.[OrderId] = source.[New_OrderId] AND target.[LineNo] = source.[New_LineNo]"
        ));
    }

    #[tokio::test]
    async fn test_insert_list_leaves_out_computed_and_rowversion() {
        let catalog = MemoryCatalog::new()
            .table("dbo", "Countries")
            .column("Code", "char(2)")
            .column("Name", "nvarchar(100)")
            .column("Label", "nvarchar(110)")
            .computed("Label")
            .column("RowVer", "rowversion")
            .primary_key(&["Code"])
            .done();
        let desc = TableDescriptor::load(&catalog, "dbo", "STAGE", "Countries")
            .await
            .unwrap();
        let dest = RecordingSession::new();

        merge(&dest, &desc).await.unwrap();

        let merge_sql = &dest.matching("MERGE INTO")[0];
        assert!(merge_sql.ends_with(
            "INSERT ([Code], [Name]) VALUES (COALESCE(source.[New_Code], source.[Code]), source.[Name]);"
        ));
        assert!(!merge_sql.contains("[Label]"));
        assert!(!merge_sql.contains("[RowVer]"));
    }
}
