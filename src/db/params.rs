//! Parameter binding utilities for database queries.
//!
//! This module binds `SqlValue` values to backend-specific query objects. It is
//! shared by the pool path and the transaction path of each backend.

use crate::models::SqlValue;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgTypeInfo};
use sqlx::types::Json;
use sqlx::{Encode, MySql, Postgres, Type};

/// A NULL whose type is left for the PostgreSQL server to infer.
///
/// Declared with OID 0 so the same value binds to integer, text or JSON columns.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q SqlValue,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::String(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
        SqlValue::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q SqlValue,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        SqlValue::Null => query.bind(UntypedNull),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::String(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
        SqlValue::Json(v) => query.bind(Json(v)),
    }
}

/// Bind every value of `values` to a MySQL query, in order.
pub(crate) fn bind_mysql_all<'q>(
    sql: &'q str,
    values: &'q [SqlValue],
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    values
        .iter()
        .fold(sqlx::query(sql), |query, value| bind_mysql_param(query, value))
}

/// Bind every value of `values` to a PostgreSQL query, in order.
pub(crate) fn bind_postgres_all<'q>(
    sql: &'q str,
    values: &'q [SqlValue],
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    values
        .iter()
        .fold(sqlx::query(sql), |query, value| bind_postgres_param(query, value))
}
