//! Table descriptors and classification.
//!
//! A [`TableDescriptor`] gathers everything the engine needs to know about a
//! table from the [`Catalog`] in one place. It is built once per table per
//! run and never mutated afterwards; in particular its [`TableType`] is
//! decided during construction.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MigrateError, Result};

use super::catalog::{combined_keys, Catalog};
use super::identifier::qualify_mssql;
use super::schema::{Column, CombinedKey, ForeignKey, PrimaryKeyColumn, TableName, TemporalInfo};
use super::statement::{shadow_name, ColumnSet};

/// How a table's rows are matched against the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableType {
    /// Primary key with an identity column; identities are regenerated.
    Identity,
    /// Primary key without identity that is not entirely made of FKs.
    Unique,
    /// Primary key whose every column is also an FK column.
    Composite,
    /// No primary key.
    Heap,
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TableType::Identity => "Identity",
            TableType::Unique => "Unique",
            TableType::Composite => "Composite",
            TableType::Heap => "Heap",
        };
        f.write_str(s)
    }
}

/// Classify a table. First match wins:
///
/// 1. no primary key: `Heap`
/// 2. an identity column: `Identity`
/// 3. every PK column is the parent column of some FK: `Composite`
/// 4. otherwise: `Unique`
pub fn classify(
    primary_key: &[PrimaryKeyColumn],
    identity_column: Option<&str>,
    foreign_keys: &[ForeignKey],
) -> TableType {
    if primary_key.is_empty() {
        return TableType::Heap;
    }
    if identity_column.is_some() {
        return TableType::Identity;
    }
    let all_fk = primary_key.iter().all(|pk| {
        foreign_keys
            .iter()
            .any(|fk| fk.parent_column.eq_ignore_ascii_case(&pk.name))
    });
    if all_fk {
        TableType::Composite
    } else {
        TableType::Unique
    }
}

/// A `New_` column on the stage copy and the type it is created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowColumn {
    /// The key column being shadowed.
    pub column: String,
    /// Full type specification.
    pub data_type: String,
}

impl ShadowColumn {
    pub fn name(&self) -> String {
        shadow_name(&self.column)
    }
}

/// Immutable metadata for one table in the migration.
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    name: TableName,
    stage: TableName,
    table_type: TableType,
    identity_column: Option<String>,
    primary_key: Vec<PrimaryKeyColumn>,
    foreign_keys: Vec<ForeignKey>,
    unique_constraints: BTreeMap<String, Vec<String>>,
    columns: Vec<Column>,
    temporal: TemporalInfo,
    clustered_columns: Vec<String>,
    combined_keys: Vec<CombinedKey>,
}

impl TableDescriptor {
    /// Build a descriptor from catalog metadata.
    pub async fn load(
        catalog: &dyn Catalog,
        schema: &str,
        stage_schema: &str,
        table: &str,
    ) -> Result<Self> {
        let name = TableName::new(schema, table);
        let stage = TableName::new(stage_schema, table);

        let columns = catalog.column_list(&name, true).await?;
        if columns.is_empty() {
            return Err(MigrateError::catalog(
                name.to_string(),
                "table not found or has no columns",
            ));
        }

        let primary_key = catalog.primary_key(&name).await?;
        let foreign_keys = catalog.foreign_keys(&name).await?;
        let identity_column = columns
            .iter()
            .find(|c| c.is_identity)
            .map(|c| c.name.clone());

        let unique_constraints: BTreeMap<String, Vec<String>> = catalog
            .unique_constraints(&name)
            .await?
            .into_iter()
            .filter(|(_, cols)| !same_columns(cols, primary_key.iter().map(|pk| pk.name.as_str())))
            .collect();

        let temporal = catalog.temporal_info(&name).await?;
        let clustered_columns = catalog.clustered_columns(&name).await?;

        let combined_keys = if temporal.is_history() {
            let master = temporal.master.clone().ok_or_else(|| {
                MigrateError::catalog(name.to_string(), "history table without a master")
            })?;
            combined_keys(catalog, &master).await?
        } else {
            Vec::new()
        };

        let table_type = classify(&primary_key, identity_column.as_deref(), &foreign_keys);

        debug!(
            "{}: type={}, identity={:?}, pk={:?}, fks={}, uniques={}, clustered={:?}",
            name,
            table_type,
            identity_column,
            primary_key.iter().map(|p| &p.name).collect::<Vec<_>>(),
            foreign_keys.len(),
            unique_constraints.len(),
            clustered_columns
        );

        Ok(Self {
            name,
            stage,
            table_type,
            identity_column,
            primary_key,
            foreign_keys,
            unique_constraints,
            columns,
            temporal,
            clustered_columns,
            combined_keys,
        })
    }

    pub fn name(&self) -> &TableName {
        &self.name
    }

    pub fn stage(&self) -> &TableName {
        &self.stage
    }

    pub fn table_type(&self) -> TableType {
        self.table_type
    }

    pub fn identity_column(&self) -> Option<&str> {
        self.identity_column.as_deref()
    }

    pub fn primary_key(&self) -> &[PrimaryKeyColumn] {
        &self.primary_key
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    /// Unique constraints other than the one covering exactly the PK.
    pub fn unique_constraints(&self) -> &BTreeMap<String, Vec<String>> {
        &self.unique_constraints
    }

    /// Unique constraints usable as duplicate guards: identity-only ones are
    /// dropped since the identity is regenerated anyway.
    pub fn guard_constraints(&self) -> Vec<(&str, &[String])> {
        self.unique_constraints
            .iter()
            .filter(|(_, cols)| match self.identity_column.as_deref() {
                Some(id) => !cols.iter().all(|c| c.eq_ignore_ascii_case(id)),
                None => true,
            })
            .map(|(name, cols)| (name.as_str(), cols.as_slice()))
            .collect()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column names in catalog order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Columns an INSERT may supply, in catalog order.
    ///
    /// Computed and rowversion columns are left out on both the stage and
    /// the live side.
    pub fn insert_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.is_writable())
            .map(|c| c.name.clone())
            .collect()
    }

    /// [`insert_columns`](Self::insert_columns) without the identity column.
    pub fn insert_columns_without_identity(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.is_writable() && !c.is_identity)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Full type specification of a column of this table.
    pub fn column_type(&self, column: &str) -> Option<String> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(column))
            .map(Column::type_spec)
    }

    pub fn temporal(&self) -> &TemporalInfo {
        &self.temporal
    }

    pub fn clustered_columns(&self) -> &[String] {
        &self.clustered_columns
    }

    /// Keys inherited from the master; empty unless this is a history table.
    pub fn combined_keys(&self) -> &[CombinedKey] {
        &self.combined_keys
    }

    /// The shadow columns the stage copy carries.
    ///
    /// History tables shadow their master's combined keys; every other table
    /// shadows its PK columns, its FK columns, and its identity column.
    pub fn shadow_columns(&self) -> Result<Vec<ShadowColumn>> {
        let mut shadows: Vec<ShadowColumn> = Vec::new();
        let mut push = |column: &str, data_type: String| {
            if !shadows.iter().any(|s| s.column.eq_ignore_ascii_case(column)) {
                shadows.push(ShadowColumn {
                    column: column.to_string(),
                    data_type,
                });
            }
        };

        if self.temporal.is_history() {
            for key in &self.combined_keys {
                push(&key.column, key.data_type.clone());
            }
            return Ok(shadows);
        }

        for pk in &self.primary_key {
            push(&pk.name, pk.data_type.clone());
        }
        for fk in &self.foreign_keys {
            let data_type = self.require_type(&fk.parent_column)?;
            push(&fk.parent_column, data_type);
        }
        if let Some(identity) = self.identity_column.as_deref() {
            let data_type = self.require_type(identity)?;
            push(identity, data_type);
        }
        Ok(shadows)
    }

    /// Whether `column` has a shadow on the stage copy.
    pub fn has_shadow(&self, column: &str) -> bool {
        if self.temporal.is_history() {
            return self
                .combined_keys
                .iter()
                .any(|k| k.column.eq_ignore_ascii_case(column));
        }
        self.primary_key.iter().any(|pk| pk.name.eq_ignore_ascii_case(column))
            || self
                .foreign_keys
                .iter()
                .any(|fk| fk.parent_column.eq_ignore_ascii_case(column))
            || self
                .identity_column
                .as_deref()
                .is_some_and(|id| id.eq_ignore_ascii_case(column))
    }

    /// Catalog-reported columns of the live table.
    pub fn live_columns(&self) -> ColumnSet {
        ColumnSet::new(self.name.to_string(), self.column_names())
    }

    /// Columns of the stage copy: the live columns plus shadows.
    pub fn stage_columns(&self) -> Result<ColumnSet> {
        let shadows = self.shadow_columns()?;
        Ok(ColumnSet::new(self.stage.to_string(), self.column_names())
            .with(shadows.iter().map(ShadowColumn::name)))
    }

    /// `[schema].[table]` of the live table.
    pub fn qualified_name(&self) -> Result<String> {
        qualify_mssql(&self.name.schema, &self.name.name)
    }

    /// `[STAGE].[table]` of the stage copy.
    pub fn qualified_stage(&self) -> Result<String> {
        qualify_mssql(&self.stage.schema, &self.stage.name)
    }

    fn require_type(&self, column: &str) -> Result<String> {
        self.column_type(column).ok_or_else(|| {
            MigrateError::catalog(
                self.name.to_string(),
                format!("cannot determine data type of {}", column),
            )
        })
    }
}

fn same_columns<'a>(cols: &[String], other: impl Iterator<Item = &'a str>) -> bool {
    let mut a: Vec<String> = cols.iter().map(|c| c.to_lowercase()).collect();
    let mut b: Vec<String> = other.map(|c| c.to_lowercase()).collect();
    a.sort();
    b.sort();
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryCatalog;

    fn pk(name: &str, is_identity: bool) -> PrimaryKeyColumn {
        PrimaryKeyColumn {
            name: name.to_string(),
            ordinal: 1,
            data_type: "int".to_string(),
            is_identity,
        }
    }

    fn fk(column: &str, table: &str) -> ForeignKey {
        ForeignKey {
            name: format!("FK_{}", column),
            parent_column: column.to_string(),
            referenced_schema: "dbo".to_string(),
            referenced_table: table.to_string(),
            referenced_column: column.to_string(),
        }
    }

    #[test]
    fn test_classify_first_match_wins() {
        assert_eq!(classify(&[], Some("Id"), &[]), TableType::Heap);
        assert_eq!(classify(&[pk("Id", true)], Some("Id"), &[fk("Id", "X")]), TableType::Identity);
        assert_eq!(
            classify(
                &[pk("OrderId", false), pk("ProductId", false)],
                None,
                &[fk("OrderId", "Orders"), fk("ProductId", "Products")]
            ),
            TableType::Composite
        );
        assert_eq!(classify(&[pk("Code", false)], None, &[]), TableType::Unique);
    }

    #[test]
    fn test_classify_partial_fk_pk_is_unique() {
        // One PK column is not an FK
        let pks = [pk("OrderId", false), pk("LineNo", false)];
        assert_eq!(classify(&pks, None, &[fk("OrderId", "Orders")]), TableType::Unique);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let pks = [pk("OrderId", false), pk("ProductId", false)];
        let fks = [fk("OrderId", "Orders"), fk("ProductId", "Products")];
        let first = classify(&pks, None, &fks);
        for _ in 0..10 {
            assert_eq!(classify(&pks, None, &fks), first);
        }
    }

    fn sales_catalog() -> MemoryCatalog {
        MemoryCatalog::new()
            .table("dbo", "Customers")
            .column("CustomerId", "int")
            .identity("CustomerId")
            .column("Email", "nvarchar(200)")
            .primary_key(&["CustomerId"])
            .unique("PK_Customers", &["CustomerId"])
            .unique("UQ_Customers_Email", &["Email"])
            .done()
            .table("dbo", "Orders")
            .column("OrderId", "int")
            .identity("OrderId")
            .column("CustomerId", "int")
            .column("Total", "decimal(18, 2)")
            .primary_key(&["OrderId"])
            .foreign_key("FK_Orders_Customers", "CustomerId", "Customers", "CustomerId")
            .done()
    }

    #[tokio::test]
    async fn test_load_filters_pk_constraint_and_keeps_order() {
        let catalog = sales_catalog();
        let desc = TableDescriptor::load(&catalog, "dbo", "STAGE", "Customers")
            .await
            .unwrap();

        assert_eq!(desc.table_type(), TableType::Identity);
        assert_eq!(desc.identity_column(), Some("CustomerId"));
        assert_eq!(desc.column_names(), vec!["CustomerId", "Email"]);
        assert_eq!(desc.insert_columns_without_identity(), vec!["Email"]);
        assert!(!desc.unique_constraints().contains_key("PK_Customers"));
        assert!(desc.unique_constraints().contains_key("UQ_Customers_Email"));
        let guards = desc.guard_constraints();
        assert_eq!(guards.len(), 1);
        assert_eq!(guards[0].0, "UQ_Customers_Email");
        assert_eq!(desc.qualified_stage().unwrap(), "[STAGE].[Customers]");
    }

    #[tokio::test]
    async fn test_insert_columns_skip_server_generated_columns() {
        let catalog = MemoryCatalog::new()
            .table("dbo", "Invoices")
            .column("InvoiceId", "int")
            .identity("InvoiceId")
            .column("Net", "decimal(18, 2)")
            .column("Gross", "decimal(18, 2)")
            .computed("Gross")
            .column("RowVer", "timestamp")
            .primary_key(&["InvoiceId"])
            .done();
        let desc = TableDescriptor::load(&catalog, "dbo", "STAGE", "Invoices")
            .await
            .unwrap();

        assert_eq!(desc.column_names(), vec!["InvoiceId", "Net", "Gross", "RowVer"]);
        assert_eq!(desc.insert_columns(), vec!["InvoiceId", "Net"]);
        assert_eq!(desc.insert_columns_without_identity(), vec!["Net"]);
    }

    #[tokio::test]
    async fn test_identity_only_constraint_is_not_a_guard() {
        let catalog = MemoryCatalog::new()
            .table("dbo", "Tickets")
            .column("TicketId", "int")
            .identity("TicketId")
            .column("Code", "nvarchar(20)")
            .primary_key(&["Code"])
            .unique("UQ_Tickets_TicketId", &["TicketId"])
            .done();
        let desc = TableDescriptor::load(&catalog, "dbo", "STAGE", "Tickets")
            .await
            .unwrap();

        assert_eq!(desc.table_type(), TableType::Identity);
        assert_eq!(desc.unique_constraints().len(), 1);
        assert!(desc.guard_constraints().is_empty());
    }

    #[tokio::test]
    async fn test_shadow_columns_cover_pk_fk_identity() {
        let catalog = sales_catalog();
        let desc = TableDescriptor::load(&catalog, "dbo", "STAGE", "Orders")
            .await
            .unwrap();

        let shadows: Vec<String> = desc
            .shadow_columns()
            .unwrap()
            .iter()
            .map(ShadowColumn::name)
            .collect();
        assert_eq!(shadows, vec!["New_OrderId", "New_CustomerId"]);
        assert!(desc.has_shadow("CustomerId"));
        assert!(!desc.has_shadow("Total"));
        assert!(desc.stage_columns().unwrap().contains("New_CustomerId"));
        assert!(!desc.live_columns().contains("New_CustomerId"));
    }

    #[tokio::test]
    async fn test_load_missing_table_is_catalog_error() {
        let catalog = sales_catalog();
        let err = TableDescriptor::load(&catalog, "dbo", "STAGE", "Nope")
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Catalog { .. }));
    }
}
