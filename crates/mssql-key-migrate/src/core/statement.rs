//! Statement building.
//!
//! Every statement the engine sends is built from catalog-reported names:
//! identifiers spliced into the text go through [`ColumnSet`] or
//! [`quote_mssql`], so nothing else ever reaches the server.

use crate::core::identifier::{qualify_mssql, quote_mssql};
use crate::core::schema::TableName;
use crate::error::{MigrateError, Result};

/// Prefix of the shadow column holding a key's resolved value.
pub const SHADOW_PREFIX: &str = "New_";

/// Name of the shadow column for `column`.
pub fn shadow_name(column: &str) -> String {
    format!("{}{}", SHADOW_PREFIX, column)
}

/// Quoted `[schema].[table]` for a table name.
pub fn qualified(table: &TableName) -> Result<String> {
    qualify_mssql(&table.schema, &table.name)
}

/// SQL text sent to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }
}

/// The catalog-reported column set of one table.
///
/// Every column identifier emitted into SQL for that table is looked up here
/// first; a name the catalog did not report is rejected.
#[derive(Debug, Clone)]
pub struct ColumnSet {
    table: String,
    names: Vec<String>,
}

impl ColumnSet {
    pub fn new(table: impl Into<String>, names: impl IntoIterator<Item = String>) -> Self {
        Self {
            table: table.into(),
            names: names.into_iter().collect(),
        }
    }

    /// Extend with additional names (shadow columns added during provisioning).
    pub fn with(mut self, extra: impl IntoIterator<Item = String>) -> Self {
        for name in extra {
            if !self.contains(&name) {
                self.names.push(name);
            }
        }
        self
    }

    pub fn contains(&self, column: &str) -> bool {
        self.names.iter().any(|n| n.eq_ignore_ascii_case(column))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Bracket-quote a column after checking it belongs to this table.
    pub fn quote(&self, column: &str) -> Result<String> {
        if !self.contains(column) {
            return Err(MigrateError::UnknownColumn {
                table: self.table.clone(),
                column: column.to_string(),
            });
        }
        quote_mssql(column)
    }

    /// `alias.[column]`.
    pub fn aliased(&self, alias: &str, column: &str) -> Result<String> {
        Ok(format!("{}.{}", alias, self.quote(column)?))
    }

    /// Comma-separated quoted list.
    pub fn quote_list<S: AsRef<str>>(&self, columns: &[S]) -> Result<String> {
        let quoted = columns
            .iter()
            .map(|c| self.quote(c.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(quoted.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customers() -> ColumnSet {
        ColumnSet::new(
            "dbo.Customers",
            vec!["CustomerId".to_string(), "Email".to_string()],
        )
    }

    #[test]
    fn test_shadow_name() {
        assert_eq!(shadow_name("CustomerId"), "New_CustomerId");
    }

    #[test]
    fn test_column_set_quotes_known_columns() {
        let set = customers();
        assert_eq!(set.quote("email").unwrap(), "[email]");
        assert_eq!(set.aliased("source", "Email").unwrap(), "source.[Email]");
        assert_eq!(
            set.quote_list(&["CustomerId", "Email"]).unwrap(),
            "[CustomerId], [Email]"
        );
    }

    #[test]
    fn test_column_set_rejects_unknown_column() {
        let err = customers().quote("Email]; DROP TABLE x;--").unwrap_err();
        assert!(matches!(err, MigrateError::UnknownColumn { .. }));
    }

    #[test]
    fn test_column_set_with_shadows() {
        let set = customers().with(vec![shadow_name("CustomerId")]);
        assert!(set.contains("New_CustomerId"));
        assert_eq!(set.names().len(), 3);
    }
}
