//! SQL fragments with positional parameters.
//!
//! Fragments use anonymous `?` placeholders so they can be nested and
//! concatenated in any order: parameters are always kept in the same order as
//! their placeholders appear in the text.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::predicate::QueryValue;

/// A fragment of SQL with bound parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFragment {
    /// The SQL clause.
    pub sql: String,
    /// Bound parameter values, in placeholder order.
    pub params: Vec<SqlParam>,
}

/// A bound SQL parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// Key parameter (stored as a 16-byte blob).
    Key(Uuid),
    /// String parameter.
    Text(String),
    /// Integer parameter.
    Integer(i64),
    /// Float parameter.
    Float(f64),
    /// Boolean parameter.
    Bool(bool),
    /// Date parameter.
    Date(NaiveDate),
    /// Timestamp parameter.
    Timestamp(DateTime<Utc>),
    /// Null parameter.
    Null,
}

impl SqlParam {
    /// Creates a string parameter.
    pub fn text(s: impl Into<String>) -> Self {
        SqlParam::Text(s.into())
    }
}

macro_rules! sql_param_from {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for SqlParam {
                fn from(v: $ty) -> Self {
                    SqlParam::$variant(v)
                }
            }

            impl From<Option<$ty>> for SqlParam {
                fn from(v: Option<$ty>) -> Self {
                    v.map_or(SqlParam::Null, SqlParam::$variant)
                }
            }
        )+
    };
}

sql_param_from! {
    Uuid => Key,
    String => Text,
    i64 => Integer,
    f64 => Float,
    bool => Bool,
    NaiveDate => Date,
    DateTime<Utc> => Timestamp,
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        SqlParam::Text(v.to_string())
    }
}

impl From<Value> for SqlParam {
    fn from(v: Value) -> Self {
        SqlParam::Text(v.to_string())
    }
}

impl From<&QueryValue> for SqlParam {
    fn from(v: &QueryValue) -> Self {
        match v {
            QueryValue::Key(k) => SqlParam::Key(*k),
            QueryValue::Text(s) => SqlParam::Text(s.clone()),
            QueryValue::Integer(i) => SqlParam::Integer(*i),
            QueryValue::Float(f) => SqlParam::Float(*f),
            QueryValue::Date(d) => SqlParam::Date(*d),
            QueryValue::Timestamp(t) => SqlParam::Timestamp(*t),
            QueryValue::Bool(b) => SqlParam::Bool(*b),
            QueryValue::Null => SqlParam::Null,
        }
    }
}

impl SqlFragment {
    /// Creates a new SQL fragment.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Creates a fragment with parameters.
    pub fn with_params(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// A fragment matching every row.
    pub fn always() -> Self {
        Self::new("1 = 1")
    }

    /// A fragment matching no row.
    pub fn never() -> Self {
        Self::new("1 = 0")
    }

    /// `column = ?`.
    pub fn column_eq(column: &str, value: impl Into<SqlParam>) -> Self {
        Self::new(format!("{column} = ?")).bind(value)
    }

    /// `column IN (?, ...)`, or a never-matching fragment for an empty list.
    pub fn column_in<P: Into<SqlParam>>(column: &str, values: impl IntoIterator<Item = P>) -> Self {
        let params: Vec<SqlParam> = values.into_iter().map(Into::into).collect();
        if params.is_empty() {
            return Self::never();
        }
        let placeholders = vec!["?"; params.len()].join(", ");
        Self::with_params(format!("{column} IN ({placeholders})"), params)
    }

    /// Appends a placeholder bound to `param`.
    pub fn bind(mut self, param: impl Into<SqlParam>) -> Self {
        self.params.push(param.into());
        self
    }

    /// Appends raw SQL text.
    pub fn push_sql(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    /// Appends another fragment verbatim.
    pub fn push(&mut self, other: SqlFragment) {
        self.sql.push_str(&other.sql);
        self.params.extend(other.params);
    }

    /// Combines with another fragment using AND.
    pub fn and(mut self, other: SqlFragment) -> Self {
        if !self.sql.is_empty() && !other.sql.is_empty() {
            self.sql = format!("({}) AND ({})", self.sql, other.sql);
        } else if !other.sql.is_empty() {
            self.sql = other.sql;
        }
        self.params.extend(other.params);
        self
    }

    /// Combines with another fragment using OR.
    pub fn or(mut self, other: SqlFragment) -> Self {
        if !self.sql.is_empty() && !other.sql.is_empty() {
            self.sql = format!("({}) OR ({})", self.sql, other.sql);
        } else if !other.sql.is_empty() {
            self.sql = other.sql;
        }
        self.params.extend(other.params);
        self
    }

    /// Wraps the fragment in `NOT (...)`.
    pub fn not(mut self) -> Self {
        self.sql = format!("NOT ({})", self.sql);
        self
    }

    /// Joins fragments with a separator (`AND`, `OR`), or returns `empty` if none.
    pub fn join(parts: Vec<SqlFragment>, separator: &str, empty: SqlFragment) -> Self {
        if parts.is_empty() {
            return empty;
        }
        let mut out = SqlFragment::default();
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                out.sql.push_str(&format!(" {separator} "));
            }
            out.sql.push('(');
            out.push(part);
            out.sql.push(')');
        }
        out
    }

    /// Returns true if this fragment is empty.
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}
