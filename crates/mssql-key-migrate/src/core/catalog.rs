//! Catalog metadata access.
//!
//! The [`Catalog`] trait is the only way the engine learns about tables:
//! keys, columns, types, system versioning, and whether staging objects
//! already exist. It is injected into the orchestrator explicitly so the
//! engine can run against an in-memory catalog in tests.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::{MigrateError, Result};

use super::schema::{Column, CombinedKey, ForeignKey, KeyOrigin, PrimaryKeyColumn, TableName, TemporalInfo};

/// Read-only metadata queries against the destination database.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Primary key columns in key order; empty when the table has no PK.
    async fn primary_key(&self, table: &TableName) -> Result<Vec<PrimaryKeyColumn>>;

    /// Foreign keys declared on `table`, one entry per referencing column.
    async fn foreign_keys(&self, table: &TableName) -> Result<Vec<ForeignKey>>;

    /// Unique indexes and constraints by name, columns in key order.
    ///
    /// The primary key's own index is included; callers filter it.
    async fn unique_constraints(&self, table: &TableName) -> Result<BTreeMap<String, Vec<String>>>;

    /// Columns in ordinal order, optionally without the identity column.
    async fn column_list(&self, table: &TableName, include_identity: bool) -> Result<Vec<Column>>;

    /// Full type specification of a column, e.g. `decimal(18, 2)`.
    async fn column_data_type(&self, table: &TableName, column: &str) -> Result<Option<String>>;

    /// System-versioning role of the table.
    async fn temporal_info(&self, table: &TableName) -> Result<TemporalInfo>;

    /// Columns of the clustered index, in key order.
    async fn clustered_columns(&self, table: &TableName) -> Result<Vec<String>>;

    async fn schema_exists(&self, schema: &str) -> Result<bool>;

    async fn table_exists(&self, table: &TableName) -> Result<bool>;

    async fn column_exists(&self, table: &TableName, column: &str) -> Result<bool>;

    /// Whether a constraint with this name exists in `schema`.
    async fn constraint_exists(&self, schema: &str, name: &str) -> Result<bool>;
}

/// Keys a history table inherits from its master: the master's PK columns
/// (referencing the master) followed by the master's FK columns
/// (referencing their targets).
pub async fn combined_keys(catalog: &dyn Catalog, master: &TableName) -> Result<Vec<CombinedKey>> {
    let mut keys = Vec::new();

    for pk in catalog.primary_key(master).await? {
        keys.push(CombinedKey {
            origin: KeyOrigin::PrimaryKey,
            column: pk.name.clone(),
            data_type: pk.data_type.clone(),
            referenced_schema: master.schema.clone(),
            referenced_table: master.name.clone(),
            referenced_column: pk.name,
        });
    }

    for fk in catalog.foreign_keys(master).await? {
        // A PK column that is also an FK keeps its PK origin
        if keys.iter().any(|k| k.column.eq_ignore_ascii_case(&fk.parent_column)) {
            continue;
        }
        let data_type = catalog
            .column_data_type(master, &fk.parent_column)
            .await?
            .ok_or_else(|| {
                MigrateError::catalog(
                    master.to_string(),
                    format!("cannot determine data type of {}", fk.parent_column),
                )
            })?;
        keys.push(CombinedKey {
            origin: KeyOrigin::ForeignKey,
            column: fk.parent_column,
            data_type,
            referenced_schema: fk.referenced_schema,
            referenced_table: fk.referenced_table,
            referenced_column: fk.referenced_column,
        });
    }

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryCatalog;

    #[tokio::test]
    async fn test_combined_keys_pk_then_fk() {
        let catalog = MemoryCatalog::new()
            .table("dbo", "Contracts")
            .column("ContractId", "int")
            .identity("ContractId")
            .column("CustomerId", "int")
            .primary_key(&["ContractId"])
            .foreign_key("FK_Contracts_Customers", "CustomerId", "Customers", "CustomerId")
            .done();

        let keys = combined_keys(&catalog, &TableName::new("dbo", "Contracts"))
            .await
            .unwrap();

        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].origin, KeyOrigin::PrimaryKey);
        assert_eq!(keys[0].referenced_table, "Contracts");
        assert_eq!(keys[1].origin, KeyOrigin::ForeignKey);
        assert_eq!(keys[1].column, "CustomerId");
        assert_eq!(keys[1].referenced_table, "Customers");
        assert_eq!(keys[1].data_type, "int");
    }
}
