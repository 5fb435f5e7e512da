//! Row decoding into JSON maps.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Backend-specific decoders handle the actual value extraction
//!
//! DECIMAL/NUMERIC values are returned as strings to keep their exact
//! representation, binary columns as base64, temporal columns as ISO-8601.
//! SQL NULL becomes JSON null; a value that cannot be decoded is an error.

use crate::error::{DbError, DbResult};
use crate::models::{Backend, Row as JsonRow};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};

type DecodeResult = Result<JsonValue, sqlx::Error>;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Date,
    Time,
    DateTime,
    /// Timezone-aware timestamp
    Timestamp,
}

fn is_integer_type(lower: &str) -> bool {
    // First word only: "bigint unsigned" is an integer, "interval" and "point" are not
    let base = lower.split_whitespace().next().unwrap_or_default();
    matches!(
        base,
        "tinyint"
            | "smallint"
            | "mediumint"
            | "int"
            | "integer"
            | "bigint"
            | "int2"
            | "int4"
            | "int8"
            | "serial"
            | "smallserial"
            | "bigserial"
            | "year"
    )
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, backend: Backend) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if is_integer_type(&lower) {
        return TypeCategory::Integer;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    match (lower.as_str(), backend) {
        ("date", _) => TypeCategory::Date,
        ("time", _) => TypeCategory::Time,
        ("datetime", _) | ("timestamp", Backend::Postgres) => TypeCategory::DateTime,
        ("timestamp", _) | ("timestamptz", _) => TypeCategory::Timestamp,
        _ => TypeCategory::Text,
    }
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

/// MySQL sends DECIMAL as text in both protocols.
impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <Decimal as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <Decimal as Type<sqlx::Postgres>>::compatible(ty)
    }
}

/// Text results are kept verbatim. Binary NUMERIC goes through
/// `rust_decimal`, except the special values it cannot hold.
impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        if value.format() == PgValueFormat::Text {
            return Ok(RawDecimal(value.as_str()?.to_string()));
        }
        if let Some(special) = pg_numeric_special(value.as_bytes()?) {
            return Ok(RawDecimal(special.to_string()));
        }
        let decimal = <Decimal as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(decimal.to_string()))
    }
}

/// Name of a NaN or infinite binary NUMERIC, read from its sign word.
fn pg_numeric_special(bytes: &[u8]) -> Option<&'static str> {
    let sign = u16::from_be_bytes([*bytes.get(4)?, *bytes.get(5)?]);
    match sign {
        0xC000 => Some("NaN"),
        0xD000 => Some("Infinity"),
        0xF000 => Some("-Infinity"),
        _ => None,
    }
}

// =============================================================================
// Binary Encoding
// =============================================================================

/// Encode binary column data as a base64 JSON string.
pub fn encode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn number<T: Into<serde_json::Number>>(v: Option<T>) -> JsonValue {
    v.map_or(JsonValue::Null, |v| JsonValue::Number(v.into()))
}

fn serialized<T: serde::Serialize>(v: Option<T>) -> DecodeResult {
    match v {
        Some(v) => serde_json::to_value(v).map_err(|e| sqlx::Error::Decode(Box::new(e))),
        None => Ok(JsonValue::Null),
    }
}

fn column_error(name: &str, type_name: &str, err: sqlx::Error) -> DbError {
    DbError::serialization(format!(
        "Failed to decode column '{}' of type {}: {}",
        name, type_name, err
    ))
}

// =============================================================================
// Row to JSON Trait
// =============================================================================

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> DbResult<JsonRow>;
}

impl RowToJson for MySqlRow {
    fn to_json_map(&self) -> DbResult<JsonRow> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, Backend::MySql);
                let value = mysql::decode_column(self, idx, category)
                    .map_err(|e| column_error(col.name(), type_name, e))?;
                Ok((col.name().to_string(), value))
            })
            .collect()
    }
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> DbResult<JsonRow> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, Backend::Postgres);
                let value = postgres::decode_column(self, idx, category)
                    .map_err(|e| column_error(col.name(), type_name, e))?;
                Ok((col.name().to_string(), value))
            })
            .collect()
    }
}

// =============================================================================
// Backend-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> DecodeResult {
        match category {
            TypeCategory::Decimal => {
                let v = row.try_get::<Option<RawDecimal>, _>(idx)?;
                Ok(v.map_or(JsonValue::Null, |d| JsonValue::String(d.0)))
            }
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => Ok(row
                .try_get::<Option<bool>, _>(idx)?
                .map_or(JsonValue::Null, JsonValue::Bool)),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => Ok(row
                .try_get::<Option<Vec<u8>>, _>(idx)?
                .map_or(JsonValue::Null, |v| encode_binary_value(&v))),
            TypeCategory::Json => Ok(row
                .try_get::<Option<JsonValue>, _>(idx)?
                .unwrap_or(JsonValue::Null)),
            TypeCategory::Date => decode_as::<NaiveDate>(row, idx),
            TypeCategory::Time => decode_as::<NaiveTime>(row, idx),
            TypeCategory::DateTime => decode_as::<NaiveDateTime>(row, idx),
            TypeCategory::Timestamp => decode_as::<DateTime<Utc>>(row, idx),
            TypeCategory::Uuid | TypeCategory::Text => decode_text(row, idx),
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> DecodeResult {
        let signed_err = match row.try_get::<Option<i64>, _>(idx) {
            Ok(v) => return Ok(number(v)),
            Err(e) => e,
        };
        if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
            return Ok(number(v));
        }
        // YEAR is not in sqlx's integer compatibility list
        row.try_get_unchecked::<Option<i64>, _>(idx)
            .map(number)
            .map_err(|_| signed_err)
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> DecodeResult {
        match row.try_get::<Option<f64>, _>(idx) {
            Ok(v) => Ok(v.map_or(JsonValue::Null, float_value)),
            Err(e) => row
                .try_get::<Option<f32>, _>(idx)
                .map(|v| v.map_or(JsonValue::Null, |v| float_value(f64::from(v))))
                .map_err(|_| e),
        }
    }

    fn decode_as<T>(row: &MySqlRow, idx: usize) -> DecodeResult
    where
        T: for<'r> Decode<'r, sqlx::MySql> + Type<sqlx::MySql> + serde::Serialize,
    {
        match row.try_get::<Option<T>, _>(idx) {
            Ok(v) => serialized(v),
            // Text protocol results carry temporal values as strings
            Err(e) => decode_text(row, idx).map_err(|_| e),
        }
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> DecodeResult {
        let checked_err = match row.try_get::<Option<String>, _>(idx) {
            Ok(v) => return Ok(v.map_or(JsonValue::Null, JsonValue::String)),
            Err(e) => e,
        };
        // VARBINARY-backed text such as some Doris columns, and text-protocol values
        match row.try_get_unchecked::<Option<Vec<u8>>, _>(idx) {
            Ok(Some(v)) => Ok(match String::from_utf8(v) {
                Ok(s) => JsonValue::String(s),
                Err(e) => encode_binary_value(e.as_bytes()),
            }),
            Ok(None) => Ok(JsonValue::Null),
            Err(_) => Err(checked_err),
        }
    }
}

mod postgres {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> DecodeResult {
        // Simple-protocol results arrive as text whatever the column type
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(JsonValue::Null);
        }
        if raw.format() == PgValueFormat::Text
            && !matches!(category, TypeCategory::Json | TypeCategory::Binary)
        {
            return decode_text_value(raw, category);
        }

        match category {
            TypeCategory::Decimal => Ok(JsonValue::String(row.try_get::<RawDecimal, _>(idx)?.0)),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => Ok(JsonValue::Bool(row.try_get::<bool, _>(idx)?)),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => Ok(encode_binary_value(&row.try_get::<Vec<u8>, _>(idx)?)),
            TypeCategory::Json => row.try_get::<JsonValue, _>(idx),
            TypeCategory::Uuid => serialized(Some(row.try_get::<uuid::Uuid, _>(idx)?)),
            TypeCategory::Date => serialized(Some(row.try_get::<NaiveDate, _>(idx)?)),
            TypeCategory::Time => serialized(Some(row.try_get::<NaiveTime, _>(idx)?)),
            TypeCategory::DateTime => serialized(Some(row.try_get::<NaiveDateTime, _>(idx)?)),
            TypeCategory::Timestamp => serialized(Some(row.try_get::<DateTime<Utc>, _>(idx)?)),
            TypeCategory::Text => Ok(JsonValue::String(row.try_get::<String, _>(idx)?)),
        }
    }

    fn decode_text_value(raw: PgValueRef<'_>, category: TypeCategory) -> DecodeResult {
        let text = raw.as_str().map_err(sqlx::Error::Decode)?;
        let parsed = match category {
            TypeCategory::Integer => text.parse::<i64>().ok().map(|v| JsonValue::Number(v.into())),
            TypeCategory::Float => text.parse::<f64>().ok().map(float_value),
            TypeCategory::Boolean => match text {
                "t" => Some(JsonValue::Bool(true)),
                "f" => Some(JsonValue::Bool(false)),
                _ => None,
            },
            _ => Some(JsonValue::String(text.to_string())),
        };
        parsed.ok_or_else(|| {
            sqlx::Error::Decode(format!("unexpected text value '{}'", text).into())
        })
    }

    fn decode_integer(row: &PgRow, idx: usize) -> DecodeResult {
        let first = match row.try_get::<i64, _>(idx) {
            Ok(v) => return Ok(JsonValue::Number(v.into())),
            Err(e) => e,
        };
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return Ok(JsonValue::Number(v.into()));
        }
        row.try_get::<i16, _>(idx)
            .map(|v| JsonValue::Number(v.into()))
            .map_err(|_| first)
    }

    fn decode_float(row: &PgRow, idx: usize) -> DecodeResult {
        match row.try_get::<f64, _>(idx) {
            Ok(v) => Ok(float_value(v)),
            Err(e) => row
                .try_get::<f32, _>(idx)
                .map(|v| float_value(f64::from(v)))
                .map_err(|_| e),
        }
    }
}
