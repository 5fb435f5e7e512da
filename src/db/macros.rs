//! Parameter construction macros.
//!
//! These macros build `Params` values from literal lists while keeping call
//! sites readable. Each element goes through `SqlValue::from`, so anything with
//! a `From` conversion (including `Option<T>` for NULL) can be passed directly.

/// Build positional parameters.
///
/// # Example
///
/// ```
/// use db_facade::params;
/// use db_facade::models::{Params, SqlValue};
///
/// let p = params!["alice", 18];
/// assert_eq!(p, Params::Positional(vec![SqlValue::from("alice"), SqlValue::Int(18)]));
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::models::Params::Positional(::std::vec::Vec::new())
    };
    ($($value:expr),+ $(,)?) => {
        $crate::models::Params::Positional(::std::vec![
            $($crate::models::SqlValue::from($value)),+
        ])
    };
}

/// Build named parameters.
///
/// # Example
///
/// ```
/// use db_facade::named_params;
///
/// let p = named_params! { "name" => "alice", "age" => 18 };
/// assert!(p.is_named());
/// ```
#[macro_export]
macro_rules! named_params {
    ($($name:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut map = ::std::collections::BTreeMap::<::std::string::String, $crate::models::SqlValue>::new();
        $(
            map.insert(::std::string::String::from($name), $crate::models::SqlValue::from($value));
        )*
        $crate::models::Params::Named(map)
    }};
}

/// Build a single positional batch row for `executemany`.
#[macro_export]
macro_rules! row_values {
    ($($value:expr),* $(,)?) => {
        ::std::vec![$($crate::models::SqlValue::from($value)),*]
    };
}

#[cfg(test)]
mod tests {
    use crate::models::{Params, SqlValue};

    #[test]
    fn test_row_values_macro() {
        let row = row_values![1, "x", None::<i64>];
        assert_eq!(
            row,
            vec![SqlValue::Int(1), SqlValue::String("x".into()), SqlValue::Null]
        );
    }

    #[test]
    fn test_named_params_empty() {
        assert_eq!(named_params! {}, Params::Named(Default::default()));
    }

    #[test]
    fn test_params_trailing_comma() {
        assert_eq!(params![1, 2,].len(), 2);
    }
}
