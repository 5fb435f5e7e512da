//! Placeholder dialect translation.
//!
//! Callers write statements with whichever marker style they prefer and the
//! translator rewrites them into the marker style of the target backend:
//!
//! | Form       | Markers               |
//! |------------|-----------------------|
//! | positional | `?`, `%s`             |
//! | named      | `:name`, `%(name)s`   |
//!
//! MySQL receives `?` markers, PostgreSQL receives `$1..$n`. The PostgreSQL cast
//! operator `::` is never treated as a marker and `%%` is left untouched.
//!
//! Translation is purely textual: markers inside string literals or comments
//! are not recognized as such.

use crate::error::{DbError, DbResult};
use crate::models::{Params, SqlValue};
use std::fmt::Write as _;

/// Marker style understood natively by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `?` markers (MySQL, MariaDB, Doris)
    QuestionMark,
    /// `$1..$n` markers (PostgreSQL)
    Numbered,
}

/// A statement rewritten into a backend's native marker style, with the
/// values to bind in marker order.
#[derive(Debug, Clone, PartialEq)]
pub struct Translated {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Positional,
    Named(&'a str),
}

#[derive(Debug, Clone, Copy)]
struct Marker<'a> {
    start: usize,
    end: usize,
    token: Token<'a>,
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_identifier(s: &str) -> bool {
    let bytes = s.as_bytes();
    !bytes.is_empty() && is_ident_start(bytes[0]) && bytes[1..].iter().all(|b| is_ident_char(*b))
}

/// Locate every marker in `sql`, in textual order.
fn scan(sql: &str) -> Vec<Marker<'_>> {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut markers = Vec::new();
    let mut i = 0;

    while i < len {
        match bytes[i] {
            b'?' => {
                markers.push(Marker {
                    start: i,
                    end: i + 1,
                    token: Token::Positional,
                });
                i += 1;
            }
            b'%' => match bytes.get(i + 1) {
                Some(b's') => {
                    markers.push(Marker {
                        start: i,
                        end: i + 2,
                        token: Token::Positional,
                    });
                    i += 2;
                }
                Some(b'%') => i += 2,
                Some(b'(') => {
                    let named = sql[i + 2..].find(')').and_then(|offset| {
                        let close = i + 2 + offset;
                        let name = &sql[i + 2..close];
                        (is_identifier(name) && bytes.get(close + 1) == Some(&b's'))
                            .then_some((name, close + 2))
                    });
                    match named {
                        Some((name, end)) => {
                            markers.push(Marker {
                                start: i,
                                end,
                                token: Token::Named(name),
                            });
                            i = end;
                        }
                        None => i += 1,
                    }
                }
                _ => i += 1,
            },
            b':' => {
                if bytes.get(i + 1) == Some(&b':') {
                    i += 2;
                    continue;
                }
                let start = i + 1;
                if start < len && is_ident_start(bytes[start]) {
                    let mut end = start + 1;
                    while end < len && is_ident_char(bytes[end]) {
                        end += 1;
                    }
                    markers.push(Marker {
                        start: i,
                        end,
                        token: Token::Named(&sql[start..end]),
                    });
                    i = end;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }

    markers
}

fn push_marker(out: &mut String, dialect: Dialect, index: usize) {
    match dialect {
        Dialect::QuestionMark => out.push('?'),
        Dialect::Numbered => {
            let _ = write!(out, "${}", index);
        }
    }
}

/// Count the positional markers (`?`, `%s`) in a statement.
pub fn positional_count(sql: &str) -> usize {
    scan(sql)
        .iter()
        .filter(|m| m.token == Token::Positional)
        .count()
}

/// Rewrite `sql` into `dialect`, resolving `params` into marker order.
///
/// Fails with `DbError::ParameterBinding` when a positional statement's marker
/// count differs from the number of values, when a named marker has no value,
/// or when positional markers appear in a statement bound with named values.
pub fn translate(sql: &str, params: &Params, dialect: Dialect) -> DbResult<Translated> {
    let markers = scan(sql);

    match params {
        Params::None => translate_positional(sql, &markers, &[], dialect),
        Params::Positional(values) => translate_positional(sql, &markers, values, dialect),
        Params::Named(values) => {
            let mut out = String::with_capacity(sql.len() + 8);
            let mut bound = Vec::new();
            let mut cursor = 0;

            for marker in &markers {
                let Token::Named(name) = marker.token else {
                    return Err(DbError::parameter_binding(format!(
                        "positional marker '{}' in a statement bound with named parameters",
                        &sql[marker.start..marker.end]
                    )));
                };
                let value = values.get(name).ok_or_else(|| {
                    DbError::parameter_binding(format!("missing value for named parameter '{}'", name))
                })?;

                out.push_str(&sql[cursor..marker.start]);
                bound.push(value.clone());
                push_marker(&mut out, dialect, bound.len());
                cursor = marker.end;
            }
            out.push_str(&sql[cursor..]);

            Ok(Translated {
                sql: out,
                values: bound,
            })
        }
    }
}

fn translate_positional(
    sql: &str,
    markers: &[Marker<'_>],
    values: &[SqlValue],
    dialect: Dialect,
) -> DbResult<Translated> {
    let positions: Vec<&Marker<'_>> = markers
        .iter()
        .filter(|m| m.token == Token::Positional)
        .collect();

    // Already native, e.g. `$1` on PostgreSQL or a statement without parameters.
    if positions.is_empty() {
        return Ok(Translated {
            sql: sql.to_string(),
            values: values.to_vec(),
        });
    }

    if positions.len() != values.len() {
        return Err(DbError::parameter_binding(format!(
            "statement has {} positional markers but {} values were supplied",
            positions.len(),
            values.len()
        )));
    }

    let mut out = String::with_capacity(sql.len() + 8);
    let mut cursor = 0;
    for (idx, marker) in positions.iter().enumerate() {
        out.push_str(&sql[cursor..marker.start]);
        push_marker(&mut out, dialect, idx + 1);
        cursor = marker.end;
    }
    out.push_str(&sql[cursor..]);

    Ok(Translated {
        sql: out,
        values: values.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{named_params, params};

    #[test]
    fn test_positional_to_numbered() {
        let t = translate(
            "SELECT * FROM t WHERE a = %s AND b = %s",
            &params![1, 2],
            Dialect::Numbered,
        )
        .unwrap();
        assert_eq!(t.sql, "SELECT * FROM t WHERE a = $1 AND b = $2");
        assert_eq!(t.values, vec![SqlValue::Int(1), SqlValue::Int(2)]);
    }

    #[test]
    fn test_question_mark_to_numbered() {
        let t = translate("UPDATE t SET a = ? WHERE id = ?", &params!["x", 7], Dialect::Numbered)
            .unwrap();
        assert_eq!(t.sql, "UPDATE t SET a = $1 WHERE id = $2");
    }

    #[test]
    fn test_percent_s_to_question_mark() {
        let t = translate("DELETE FROM t WHERE id = %s", &params![3], Dialect::QuestionMark)
            .unwrap();
        assert_eq!(t.sql, "DELETE FROM t WHERE id = ?");
    }

    #[test]
    fn test_native_question_mark_passthrough() {
        let sql = "SELECT * FROM t WHERE a = ? AND b = ?";
        let t = translate(sql, &params![1, 2], Dialect::QuestionMark).unwrap();
        assert_eq!(t.sql, sql);
    }

    #[test]
    fn test_zero_markers_passthrough() {
        let sql = "SELECT * FROM t WHERE a = $1";
        let t = translate(sql, &params![1], Dialect::Numbered).unwrap();
        assert_eq!(t.sql, sql);
        assert_eq!(t.values, vec![SqlValue::Int(1)]);

        let t = translate("SELECT 1", &Params::None, Dialect::Numbered).unwrap();
        assert_eq!(t.sql, "SELECT 1");
        assert!(t.values.is_empty());
    }

    #[test]
    fn test_positional_count_mismatch() {
        let err = translate("SELECT ? , ?", &params![1], Dialect::Numbered).unwrap_err();
        assert!(matches!(err, DbError::ParameterBinding { .. }));

        let err = translate("SELECT ?", &Params::None, Dialect::QuestionMark).unwrap_err();
        assert!(matches!(err, DbError::ParameterBinding { .. }));
    }

    #[test]
    fn test_named_percent_form() {
        let t = translate(
            "SELECT * FROM t WHERE a = %(a)s AND b = %(b)s",
            &named_params! { "a" => 1, "b" => "x" },
            Dialect::Numbered,
        )
        .unwrap();
        assert_eq!(t.sql, "SELECT * FROM t WHERE a = $1 AND b = $2");
        assert_eq!(t.values, vec![SqlValue::Int(1), SqlValue::String("x".into())]);
    }

    #[test]
    fn test_named_colon_form_to_question_mark() {
        let t = translate(
            "INSERT INTO t (a, b) VALUES (:b, :a)",
            &named_params! { "a" => 1, "b" => 2 },
            Dialect::QuestionMark,
        )
        .unwrap();
        assert_eq!(t.sql, "INSERT INTO t (a, b) VALUES (?, ?)");
        assert_eq!(t.values, vec![SqlValue::Int(2), SqlValue::Int(1)]);
    }

    #[test]
    fn test_repeated_name_gets_distinct_markers() {
        let t = translate(
            "SELECT * FROM t WHERE a = :v OR b = :v",
            &named_params! { "v" => 5 },
            Dialect::Numbered,
        )
        .unwrap();
        assert_eq!(t.sql, "SELECT * FROM t WHERE a = $1 OR b = $2");
        assert_eq!(t.values, vec![SqlValue::Int(5), SqlValue::Int(5)]);
    }

    #[test]
    fn test_missing_named_value() {
        let err = translate(
            "SELECT * FROM t WHERE a = :a AND b = :b",
            &named_params! { "a" => 1 },
            Dialect::Numbered,
        )
        .unwrap_err();
        assert!(matches!(err, DbError::ParameterBinding { .. }));
        assert!(err.to_string().contains("'b'"));
    }

    #[test]
    fn test_mixed_forms_rejected() {
        let err = translate(
            "SELECT * FROM t WHERE a = :a AND b = ?",
            &named_params! { "a" => 1 },
            Dialect::Numbered,
        )
        .unwrap_err();
        assert!(matches!(err, DbError::ParameterBinding { .. }));
    }

    #[test]
    fn test_postgres_cast_is_not_a_marker() {
        let t = translate(
            "SELECT created::date FROM t WHERE id = :id",
            &named_params! { "id" => 1 },
            Dialect::Numbered,
        )
        .unwrap();
        assert_eq!(t.sql, "SELECT created::date FROM t WHERE id = $1");

        let t = translate("SELECT '1'::int + ?", &params![2], Dialect::Numbered).unwrap();
        assert_eq!(t.sql, "SELECT '1'::int + $1");
    }

    #[test]
    fn test_named_text_untouched_in_positional_mode() {
        let t = translate("SELECT :a, ?", &params![1], Dialect::Numbered).unwrap();
        assert_eq!(t.sql, "SELECT :a, $1");
    }

    #[test]
    fn test_double_percent_untouched() {
        let t = translate("SELECT * FROM t WHERE a LIKE 'x%%s' AND b = %s", &params![1], Dialect::Numbered)
            .unwrap();
        assert_eq!(t.sql, "SELECT * FROM t WHERE a LIKE 'x%%s' AND b = $1");
    }

    #[test]
    fn test_multibyte_text_preserved() {
        let t = translate("SELECT '名前' AS n, ? AS v", &params!["値"], Dialect::Numbered).unwrap();
        assert_eq!(t.sql, "SELECT '名前' AS n, $1 AS v");
    }

    #[test]
    fn test_positional_count() {
        assert_eq!(positional_count("INSERT INTO t VALUES (?, %s, :x)"), 2);
        assert_eq!(positional_count("SELECT 1"), 0);
    }
}
