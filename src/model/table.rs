//! In-memory column-major table, plus the hashable `Key` projection used
//! for indexes and cutoff frames.
//!
//! A `Table` is untyped at this layer: it stores `Value`s in named columns
//! and enforces only shape (every row supplies every column). Type
//! checking against declared `ColumnType`s happens when the table is
//! registered into an `EntitySet`.

use std::fmt;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use super::Value;
use crate::{Error, Result};

// ============================================================================
// Key
// ============================================================================

/// Hashable projection of an identifier value.
///
/// Index and join-key columns are Identifier-typed, which restricts their
/// cells to Int or String — exactly the values that project to a `Key`.
/// Everything keyed by row identity (link indexes, cutoff frames, value
/// maps, the output matrix index) uses `Key`, never raw `Value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
    Int(i64),
    Str(String),
}

impl TryFrom<&Value> for Key {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Key> {
        match value {
            Value::Int(i) => Ok(Key::Int(*i)),
            Value::String(s) => Ok(Key::Str(s.clone())),
            other => Err(Error::TypeError {
                expected: "INTEGER or STRING key".into(),
                got: other.type_name().into(),
            }),
        }
    }
}

impl From<i64> for Key { fn from(v: i64) -> Self { Key::Int(v) } }
impl From<&str> for Key { fn from(v: &str) -> Self { Key::Str(v.to_owned()) } }

impl From<&Key> for Value {
    fn from(key: &Key) -> Value {
        match key {
            Key::Int(i) => Value::Int(*i),
            Key::Str(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{i}"),
            Key::Str(s) => write!(f, "{s}"),
        }
    }
}

// ============================================================================
// Table
// ============================================================================

/// A named-column, row-shaped collection of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    names: Vec<String>,
    columns: HashMap<String, Vec<Value>>,
    rows: usize,
}

impl Table {
    /// Create an empty table with the given column names (order is kept
    /// and drives base-feature ordering downstream).
    pub fn new<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = columns.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(Error::Schema("table must declare at least one column".into()));
        }
        let mut map = HashMap::with_capacity(names.len());
        for name in &names {
            if map.insert(name.clone(), Vec::new()).is_some() {
                return Err(Error::Schema(format!("duplicate column '{name}'")));
            }
        }
        Ok(Self { names, columns: map, rows: 0 })
    }

    /// Append one row. The value count must match the column count;
    /// values land in declared column order.
    pub fn push_row<I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = Value>,
    {
        let values: Vec<Value> = values.into_iter().collect();
        if values.len() != self.names.len() {
            return Err(Error::Schema(format!(
                "row has {} values, table has {} columns",
                values.len(),
                self.names.len()
            )));
        }
        for (name, value) in self.names.iter().zip(values) {
            // Column vectors exist for every declared name; see new().
            if let Some(col) = self.columns.get_mut(name) {
                col.push(value);
            }
        }
        self.rows += 1;
        Ok(())
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        self.columns.get(column).and_then(|col| col.get(row))
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}
