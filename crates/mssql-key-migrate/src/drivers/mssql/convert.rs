//! Conversion between tiberius rows/parameters and [`SqlValue`].

use std::borrow::Cow;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tiberius::xml::XmlData;
use tiberius::{FromSql, Row, ToSql};
use uuid::Uuid;

use crate::core::value::{SqlNullType, SqlValue};
use crate::error::{MigrateError, Result};

/// Rust type a column is read as, chosen from its SQL Server base type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadAs {
    Bool,
    U8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Uuid,
    DateTime,
    DateTimeOffset,
    Date,
    Time,
    Bytes,
    Decimal,
    /// money and smallmoney arrive as floats.
    Money,
    Xml,
    Text,
}

impl ReadAs {
    pub(crate) fn for_data_type(data_type: &str) -> Self {
        let base = data_type
            .split('(')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        match base.as_str() {
            "bit" => ReadAs::Bool,
            "tinyint" => ReadAs::U8,
            "smallint" => ReadAs::I16,
            "int" => ReadAs::I32,
            "bigint" => ReadAs::I64,
            "real" => ReadAs::F32,
            "float" => ReadAs::F64,
            "uniqueidentifier" => ReadAs::Uuid,
            "datetime" | "datetime2" | "smalldatetime" => ReadAs::DateTime,
            "datetimeoffset" => ReadAs::DateTimeOffset,
            "date" => ReadAs::Date,
            "time" => ReadAs::Time,
            "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => ReadAs::Bytes,
            "decimal" | "numeric" => ReadAs::Decimal,
            "money" | "smallmoney" => ReadAs::Money,
            "xml" => ReadAs::Xml,
            _ => ReadAs::Text,
        }
    }
}

/// Read column `idx` of `row` as a [`SqlValue`], using the column's SQL
/// Server base type to pick the Rust type.
///
/// Only a real NULL becomes [`SqlValue::Null`]; a value the driver cannot
/// read as that type is an error naming the column and type.
pub fn convert_row_value(row: &Row, idx: usize, data_type: &str) -> Result<SqlValue<'static>> {
    let value = match ReadAs::for_data_type(data_type) {
        ReadAs::Bool => get::<bool>(row, idx, data_type)?.map(SqlValue::Bool),
        ReadAs::U8 => get::<u8>(row, idx, data_type)?.map(|v| SqlValue::I16(i16::from(v))),
        ReadAs::I16 => get::<i16>(row, idx, data_type)?.map(SqlValue::I16),
        ReadAs::I32 => get::<i32>(row, idx, data_type)?.map(SqlValue::I32),
        ReadAs::I64 => get::<i64>(row, idx, data_type)?.map(SqlValue::I64),
        ReadAs::F32 => get::<f32>(row, idx, data_type)?.map(SqlValue::F32),
        ReadAs::F64 => get::<f64>(row, idx, data_type)?.map(SqlValue::F64),
        ReadAs::Uuid => get::<Uuid>(row, idx, data_type)?.map(SqlValue::Uuid),
        ReadAs::DateTime => get::<NaiveDateTime>(row, idx, data_type)?.map(SqlValue::DateTime),
        ReadAs::DateTimeOffset => {
            get::<DateTime<FixedOffset>>(row, idx, data_type)?.map(SqlValue::DateTimeOffset)
        }
        ReadAs::Date => get::<NaiveDate>(row, idx, data_type)?.map(SqlValue::Date),
        ReadAs::Time => get::<NaiveTime>(row, idx, data_type)?.map(SqlValue::Time),
        ReadAs::Bytes => get::<&[u8]>(row, idx, data_type)?
            .map(|v| SqlValue::Bytes(Cow::Owned(v.to_vec()))),
        ReadAs::Decimal => get::<Decimal>(row, idx, data_type)?.map(SqlValue::Decimal),
        ReadAs::Money => get::<f64>(row, idx, data_type)?.map(|f| {
            Decimal::try_from(f)
                .map(SqlValue::Decimal)
                .unwrap_or(SqlValue::F64(f))
        }),
        ReadAs::Xml => get::<&XmlData>(row, idx, data_type)?
            .map(|x| SqlValue::Text(Cow::Owned(x.to_string()))),
        ReadAs::Text => get::<&str>(row, idx, data_type)?
            .map(|s| SqlValue::Text(Cow::Owned(s.to_string()))),
    };

    Ok(value.unwrap_or(SqlValue::Null(SqlNullType::for_data_type(data_type))))
}

/// Read an integral column of any width as `i64`.
pub fn row_i64(row: &Row, idx: usize) -> Option<i64> {
    try_get::<i64>(row, idx)
        .or_else(|| try_get::<i32>(row, idx).map(i64::from))
        .or_else(|| try_get::<i16>(row, idx).map(i64::from))
        .or_else(|| try_get::<u8>(row, idx).map(i64::from))
}

fn get<'a, T>(row: &'a Row, idx: usize, data_type: &str) -> Result<Option<T>>
where
    T: FromSql<'a>,
{
    row.try_get::<T, _>(idx)
        .map_err(|e| conversion_error(idx, data_type, e))
}

fn try_get<'a, T>(row: &'a Row, idx: usize) -> Option<T>
where
    T: FromSql<'a>,
{
    row.try_get::<T, _>(idx).ok().flatten()
}

pub(crate) fn conversion_error(idx: usize, data_type: &str, cause: impl std::fmt::Display) -> MigrateError {
    MigrateError::Conversion(format!(
        "column {} declared as {} could not be read: {}",
        idx + 1,
        data_type,
        cause
    ))
}

/// Convert a value into a boxed statement parameter.
///
/// NULLs keep their type so the server does not have to convert from
/// nvarchar (which it refuses for binary columns).
pub fn sql_value_to_sql_param(value: &SqlValue<'_>) -> Box<dyn ToSql> {
    match value {
        SqlValue::Null(null_type) => match null_type {
            SqlNullType::Bool => Box::new(Option::<bool>::None),
            SqlNullType::I16 => Box::new(Option::<i16>::None),
            SqlNullType::I32 => Box::new(Option::<i32>::None),
            SqlNullType::I64 => Box::new(Option::<i64>::None),
            SqlNullType::F32 => Box::new(Option::<f32>::None),
            SqlNullType::F64 => Box::new(Option::<f64>::None),
            SqlNullType::String => Box::new(Option::<String>::None),
            SqlNullType::Bytes => Box::new(Option::<Vec<u8>>::None),
            SqlNullType::Uuid => Box::new(Option::<Uuid>::None),
            SqlNullType::Decimal => Box::new(Option::<Decimal>::None),
            SqlNullType::DateTime => Box::new(Option::<NaiveDateTime>::None),
            SqlNullType::DateTimeOffset => Box::new(Option::<DateTime<FixedOffset>>::None),
            SqlNullType::Date => Box::new(Option::<NaiveDate>::None),
            SqlNullType::Time => Box::new(Option::<NaiveTime>::None),
        },
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::I16(i) => Box::new(*i),
        SqlValue::I32(i) => Box::new(*i),
        SqlValue::I64(i) => Box::new(*i),
        SqlValue::F32(f) => Box::new(*f),
        SqlValue::F64(f) => Box::new(*f),
        SqlValue::Text(s) => Box::new(s.to_string()),
        SqlValue::Bytes(b) => Box::new(b.to_vec()),
        SqlValue::Uuid(u) => Box::new(*u),
        SqlValue::Decimal(d) => Box::new(*d),
        SqlValue::DateTime(dt) => Box::new(*dt),
        SqlValue::DateTimeOffset(dto) => Box::new(*dto),
        SqlValue::Date(d) => Box::new(*d),
        SqlValue::Time(t) => Box::new(*t),
    }
}

/// Number of rows per INSERT so that rows x columns stays within the
/// 2100-parameter limit of a single request.
pub fn rows_per_insert(columns: usize, max_rows: usize) -> usize {
    if columns == 0 {
        return 1;
    }
    (MAX_PARAMS_PER_STATEMENT / columns).clamp(1, max_rows.max(1))
}

/// SQL Server rejects requests with more parameters than this (2100 minus
/// headroom for the driver's own).
pub const MAX_PARAMS_PER_STATEMENT: usize = 2000;

/// `INSERT INTO t (cols) VALUES (@P1, ...), (...)` for `rows` rows.
pub fn build_insert_sql(qualified_table: &str, columns: &[String], rows: usize) -> String {
    let cols_per_row = columns.len();
    let mut param_idx = 1;
    let mut value_groups = Vec::with_capacity(rows);
    for _ in 0..rows {
        let placeholders: Vec<String> = (0..cols_per_row)
            .map(|_| {
                let p = format!("@P{}", param_idx);
                param_idx += 1;
                p
            })
            .collect();
        value_groups.push(format!("({})", placeholders.join(", ")));
    }
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualified_table,
        columns.join(", "),
        value_groups.join(", ")
    )
}
