//! SQL value types carried between the source and the stage tables.
//!
//! Rows read from the source are held as owned [`SqlValue`]s and sent back
//! out as statement parameters, so every value the driver can read must also
//! be bindable.

use std::borrow::Cow;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Type hint for NULL values so the parameter is bound with a compatible type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlNullType {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    String,
    Bytes,
    Uuid,
    Decimal,
    DateTime,
    DateTimeOffset,
    Date,
    Time,
}

impl SqlNullType {
    /// Null type hint for a SQL Server base type name.
    pub fn for_data_type(data_type: &str) -> Self {
        let base = data_type
            .split('(')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        match base.as_str() {
            "bit" => SqlNullType::Bool,
            "tinyint" | "smallint" => SqlNullType::I16,
            "int" => SqlNullType::I32,
            "bigint" => SqlNullType::I64,
            "real" => SqlNullType::F32,
            "float" => SqlNullType::F64,
            "uniqueidentifier" => SqlNullType::Uuid,
            "decimal" | "numeric" | "money" | "smallmoney" => SqlNullType::Decimal,
            "datetime" | "datetime2" | "smalldatetime" => SqlNullType::DateTime,
            "datetimeoffset" => SqlNullType::DateTimeOffset,
            "date" => SqlNullType::Date,
            "time" => SqlNullType::Time,
            "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => SqlNullType::Bytes,
            _ => SqlNullType::String,
        }
    }
}

/// SQL value enum for type-safe row handling.
///
/// Uses `Cow` for string and byte data; values that outlive the row they
/// were read from are converted with [`SqlValue::into_owned`].
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue<'a> {
    /// NULL with type hint.
    Null(SqlNullType),
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Text(Cow<'a, str>),
    Bytes(Cow<'a, [u8]>),
    Uuid(Uuid),
    Decimal(Decimal),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl<'a> SqlValue<'a> {
    /// Convert to a fully owned value with `'static` lifetime.
    #[must_use]
    pub fn into_owned(self) -> SqlValue<'static> {
        match self {
            SqlValue::Null(t) => SqlValue::Null(t),
            SqlValue::Bool(v) => SqlValue::Bool(v),
            SqlValue::I16(v) => SqlValue::I16(v),
            SqlValue::I32(v) => SqlValue::I32(v),
            SqlValue::I64(v) => SqlValue::I64(v),
            SqlValue::F32(v) => SqlValue::F32(v),
            SqlValue::F64(v) => SqlValue::F64(v),
            SqlValue::Text(v) => SqlValue::Text(Cow::Owned(v.into_owned())),
            SqlValue::Bytes(v) => SqlValue::Bytes(Cow::Owned(v.into_owned())),
            SqlValue::Uuid(v) => SqlValue::Uuid(v),
            SqlValue::Decimal(v) => SqlValue::Decimal(v),
            SqlValue::DateTime(v) => SqlValue::DateTime(v),
            SqlValue::DateTimeOffset(v) => SqlValue::DateTimeOffset(v),
            SqlValue::Date(v) => SqlValue::Date(v),
            SqlValue::Time(v) => SqlValue::Time(v),
        }
    }
}

impl From<String> for SqlValue<'static> {
    fn from(v: String) -> Self {
        SqlValue::Text(Cow::Owned(v))
    }
}
