//! Schema and metadata types for tables, keys, and system versioning.
//!
//! These are the shapes the [`Catalog`](crate::core::catalog::Catalog)
//! reports and the descriptor is assembled from.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Case-insensitive comparison, matching SQL Server's default collation.
    pub fn matches(&self, other: &TableName) -> bool {
        self.schema.eq_ignore_ascii_case(&other.schema) && self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Base data type (e.g., "int", "nvarchar", "datetime2").
    pub data_type: String,

    /// Maximum length in characters for string/binary types (-1 for max).
    pub max_length: i32,

    /// Numeric precision.
    pub precision: i32,

    /// Numeric scale (also fractional second precision for time types).
    pub scale: i32,

    /// Whether the column allows NULL.
    pub is_nullable: bool,

    /// Whether the column is an identity column.
    pub is_identity: bool,

    /// Ordinal position (1-based).
    pub ordinal_pos: i32,

    /// Whether the column is computed.
    #[serde(default)]
    pub is_computed: bool,
}

impl Column {
    /// Full type specification usable in a column definition, e.g. `nvarchar(50)`.
    pub fn type_spec(&self) -> String {
        format_type_spec(&self.data_type, self.max_length, self.precision, self.scale)
    }

    /// Whether an INSERT may supply a value for this column.
    ///
    /// Computed and rowversion columns are filled in by the server.
    pub fn is_writable(&self) -> bool {
        !self.is_computed && !is_row_version(&self.data_type)
    }
}

/// Whether a type is the server-generated `rowversion` (`timestamp`).
pub fn is_row_version(data_type: &str) -> bool {
    matches!(
        data_type.trim().to_lowercase().as_str(),
        "timestamp" | "rowversion"
    )
}

/// Render a SQL Server type with its length, precision or scale.
pub fn format_type_spec(data_type: &str, max_length: i32, precision: i32, scale: i32) -> String {
    let lower = data_type.to_lowercase();
    match lower.as_str() {
        "decimal" | "numeric" => {
            if precision > 0 {
                format!("{}({}, {})", data_type, precision, scale)
            } else {
                format!("{}(18, 0)", data_type)
            }
        }
        "datetime2" | "time" | "datetimeoffset" => {
            if scale > 0 {
                format!("{}({})", data_type, scale)
            } else {
                data_type.to_string()
            }
        }
        "char" | "varchar" | "nchar" | "nvarchar" | "binary" | "varbinary" => {
            if max_length == -1 {
                format!("{}(max)", data_type)
            } else if max_length > 0 {
                format!("{}({})", data_type, max_length)
            } else {
                data_type.to_string()
            }
        }
        _ => data_type.to_string(),
    }
}

/// Whether a type can hold the negated value of a key.
pub fn is_signed_numeric(data_type: &str) -> bool {
    let base = data_type
        .split('(')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    matches!(
        base.as_str(),
        "int" | "bigint" | "smallint" | "decimal" | "numeric" | "float" | "real" | "money"
            | "smallmoney"
    )
}

/// One column of a primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryKeyColumn {
    /// Column name.
    pub name: String,

    /// Position within the key (1-based).
    pub ordinal: i32,

    /// Full type specification.
    pub data_type: String,

    /// Whether the column is the table's identity column.
    pub is_identity: bool,
}

/// One column of a foreign key (multi-column keys yield one entry per column).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name.
    pub name: String,

    /// Column on the referencing (child) table.
    pub parent_column: String,

    /// Schema of the referenced table.
    pub referenced_schema: String,

    /// Referenced table name.
    pub referenced_table: String,

    /// Referenced column.
    pub referenced_column: String,
}

impl ForeignKey {
    /// The referenced table as a qualified name.
    pub fn referenced(&self) -> TableName {
        TableName::new(&self.referenced_schema, &self.referenced_table)
    }
}

/// System-versioning role of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalKind {
    /// Not system-versioned.
    #[default]
    None,
    /// System-versioned master table.
    Temporal,
    /// History table paired with a master.
    History,
}

/// System-versioning metadata for a table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TemporalInfo {
    pub kind: TemporalKind,

    /// The system-versioned master (set for both Temporal and History tables).
    pub master: Option<TableName>,

    /// The paired history table (set for both Temporal and History tables).
    pub history: Option<TableName>,

    /// Period start column of the master.
    pub period_start: Option<String>,

    /// Period end column of the master.
    pub period_end: Option<String>,
}

impl TemporalInfo {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_temporal(&self) -> bool {
        self.kind == TemporalKind::Temporal
    }

    pub fn is_history(&self) -> bool {
        self.kind == TemporalKind::History
    }
}

/// Where a history table's key column comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOrigin {
    PrimaryKey,
    ForeignKey,
}

/// A key column a history table shares with its master.
///
/// PK-origin keys reference the master itself; FK-origin keys reference the
/// master's FK target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedKey {
    pub origin: KeyOrigin,

    /// Column name (identical on master and history).
    pub column: String,

    /// Full type specification on the master.
    pub data_type: String,

    pub referenced_schema: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

impl CombinedKey {
    pub fn referenced(&self) -> TableName {
        TableName::new(&self.referenced_schema, &self.referenced_table)
    }
}
