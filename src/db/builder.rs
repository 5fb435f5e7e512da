//! Typed statement builder for the CRUD helpers.
//!
//! Table and column names are validated as plain identifiers before they are
//! interpolated; values always travel as bound parameters. Generated statements
//! use the canonical `?` marker and are translated into the backend dialect by
//! the executor.

use crate::db::placeholder::{self, Dialect};
use crate::error::{DbError, DbResult};
use crate::models::{Params, SqlValue};

// =============================================================================
// Identifier validation
// =============================================================================

/// Check that `name` is an identifier, optionally dot-qualified (`schema.table`).
pub fn validate_identifier(name: &str) -> DbResult<()> {
    let valid = !name.is_empty()
        && name.split('.').all(|part| {
            let bytes = part.as_bytes();
            !bytes.is_empty()
                && (bytes[0].is_ascii_alphabetic() || bytes[0] == b'_')
                && bytes[1..]
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || *b == b'_')
        });

    if valid {
        Ok(())
    } else {
        Err(DbError::invalid_input(format!("Invalid identifier: '{}'", name)))
    }
}

fn validate_select_column(name: &str) -> DbResult<()> {
    if name == "*" {
        return Ok(());
    }
    match name.strip_suffix(".*") {
        Some(qualifier) => validate_identifier(qualifier),
        None => validate_identifier(name),
    }
}

fn validate_order_by(order_by: &str) -> DbResult<()> {
    for item in order_by.split(',') {
        let mut words = item.split_whitespace();
        let column = words
            .next()
            .ok_or_else(|| DbError::invalid_input(format!("Invalid ORDER BY: '{}'", order_by)))?;
        validate_identifier(column)?;
        match words.next() {
            None => {}
            Some(dir) if dir.eq_ignore_ascii_case("asc") || dir.eq_ignore_ascii_case("desc") => {}
            Some(other) => {
                return Err(DbError::invalid_input(format!(
                    "Invalid ORDER BY direction: '{}'",
                    other
                )));
            }
        }
        if words.next().is_some() {
            return Err(DbError::invalid_input(format!("Invalid ORDER BY: '{}'", order_by)));
        }
    }
    Ok(())
}

// =============================================================================
// Building blocks
// =============================================================================

/// An ordered list of `(column, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    entries: Vec<(String, SqlValue)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column, consuming and returning the builder.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.push(column, value);
        self
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<SqlValue>) {
        self.entries.push((column.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(c, _)| c.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &SqlValue> {
        self.entries.iter().map(|(_, v)| v)
    }

    fn validate(&self) -> DbResult<()> {
        if self.entries.is_empty() {
            return Err(DbError::invalid_input("At least one field is required"));
        }
        self.columns().try_for_each(validate_identifier)
    }
}

impl<K, V> FromIterator<(K, V)> for Fields
where
    K: Into<String>,
    V: Into<SqlValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A caller-supplied WHERE fragment with its own parameters.
///
/// The fragment may use any marker style the translator understands.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub sql: String,
    pub params: Params,
}

impl Condition {
    pub fn new(sql: impl Into<String>, params: impl Into<Params>) -> Self {
        Self {
            sql: sql.into(),
            params: params.into(),
        }
    }

    /// A fragment without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Params::None,
        }
    }

    /// `column = ?` bound to `value`.
    pub fn eq(column: &str, value: impl Into<SqlValue>) -> DbResult<Self> {
        validate_identifier(column)?;
        Ok(Self {
            sql: format!("{} = ?", column),
            params: Params::Positional(vec![value.into()]),
        })
    }

    /// Normalize into canonical `?` form.
    fn normalize(&self) -> DbResult<(String, Vec<SqlValue>)> {
        if self.sql.trim().is_empty() {
            return Err(DbError::invalid_input("Condition cannot be empty"));
        }
        let t = placeholder::translate(&self.sql, &self.params, Dialect::QuestionMark)?;
        Ok((t.sql, t.values))
    }
}

/// A SELECT over one table.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    table: String,
    columns: Vec<String>,
    filter: Option<Condition>,
    order_by: Option<String>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            filter: None,
            order_by: None,
            limit: None,
            offset: None,
        }
    }

    /// Columns to select. Defaults to `*`.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.filter = Some(condition);
        self
    }

    /// e.g. `"created_at DESC, id"`
    pub fn order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Only emitted when a limit is also set.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// A generated statement in canonical `?` form.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

impl Statement {
    pub fn params(&self) -> Params {
        Params::Positional(self.values.clone())
    }
}

/// A multi-row INSERT template with one value row per record.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertBatch {
    pub sql: String,
    pub rows: Vec<Vec<SqlValue>>,
}

fn markers(n: usize) -> String {
    vec!["?"; n].join(", ")
}

// =============================================================================
// Statement construction
// =============================================================================

/// `INSERT INTO t (k1, k2) VALUES (?, ?)`
pub fn insert(table: &str, fields: &Fields) -> DbResult<Statement> {
    validate_identifier(table)?;
    fields.validate()?;

    let columns: Vec<&str> = fields.columns().collect();
    Ok(Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            markers(columns.len())
        ),
        values: fields.values().cloned().collect(),
    })
}

/// INSERT template for many records sharing the first record's columns.
///
/// Returns `None` for an empty input.
pub fn insert_many(table: &str, records: &[Fields]) -> DbResult<Option<InsertBatch>> {
    let Some(first) = records.first() else {
        return Ok(None);
    };
    let template = insert(table, first)?;
    let expected: Vec<&str> = first.columns().collect();

    let mut rows = Vec::with_capacity(records.len());
    for (idx, record) in records.iter().enumerate() {
        if !record.columns().eq(expected.iter().copied()) {
            return Err(DbError::invalid_input(format!(
                "Record {} does not have the same columns in the same order as the first record",
                idx
            )));
        }
        rows.push(record.values().cloned().collect());
    }

    Ok(Some(InsertBatch {
        sql: template.sql,
        rows,
    }))
}

/// `UPDATE t SET k1 = ?, k2 = ? WHERE <condition>`
pub fn update(table: &str, fields: &Fields, condition: &Condition) -> DbResult<Statement> {
    validate_identifier(table)?;
    fields.validate()?;
    let (where_sql, where_values) = condition.normalize()?;

    let assignments: Vec<String> = fields.columns().map(|c| format!("{} = ?", c)).collect();
    let mut values: Vec<SqlValue> = fields.values().cloned().collect();
    values.extend(where_values);

    Ok(Statement {
        sql: format!(
            "UPDATE {} SET {} WHERE {}",
            table,
            assignments.join(", "),
            where_sql
        ),
        values,
    })
}

/// `DELETE FROM t WHERE <condition>`
pub fn delete(table: &str, condition: &Condition) -> DbResult<Statement> {
    validate_identifier(table)?;
    let (where_sql, values) = condition.normalize()?;
    Ok(Statement {
        sql: format!("DELETE FROM {} WHERE {}", table, where_sql),
        values,
    })
}

/// `SELECT * FROM t WHERE <column> = ?`
pub fn get_by_id(table: &str, column: &str, id: SqlValue) -> DbResult<Statement> {
    validate_identifier(table)?;
    validate_identifier(column)?;
    Ok(Statement {
        sql: format!("SELECT * FROM {} WHERE {} = ?", table, column),
        values: vec![id],
    })
}

/// `SELECT cols FROM t [WHERE] [ORDER BY] [LIMIT n [OFFSET m]]`
pub fn select(query: &SelectQuery) -> DbResult<Statement> {
    validate_identifier(&query.table)?;
    query
        .columns
        .iter()
        .try_for_each(|c| validate_select_column(c))?;

    let columns = if query.columns.is_empty() {
        "*".to_string()
    } else {
        query.columns.join(", ")
    };

    let mut sql = format!("SELECT {} FROM {}", columns, query.table);
    let mut values = Vec::new();

    if let Some(filter) = &query.filter {
        let (where_sql, where_values) = filter.normalize()?;
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
        values = where_values;
    }

    if let Some(order_by) = &query.order_by {
        validate_order_by(order_by)?;
        sql.push_str(" ORDER BY ");
        sql.push_str(order_by.trim());
    }

    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
        if let Some(offset) = query.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
    }

    Ok(Statement { sql, values })
}

/// `SELECT COUNT(*) AS count FROM t [WHERE <condition>]`
pub fn count(table: &str, condition: Option<&Condition>) -> DbResult<Statement> {
    validate_identifier(table)?;
    let mut sql = format!("SELECT COUNT(*) AS count FROM {}", table);
    let mut values = Vec::new();

    if let Some(condition) = condition {
        let (where_sql, where_values) = condition.normalize()?;
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
        values = where_values;
    }

    Ok(Statement { sql, values })
}
