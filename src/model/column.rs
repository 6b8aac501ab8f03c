//! Column type tags — what a column is allowed to hold and which
//! primitives may consume it.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Value;

/// Semantic type of a column.
///
/// The tag is checked twice, both before any evaluation work:
/// at registration (every cell must be accepted by the declared tag) and
/// at planning (a primitive only ever receives columns whose tag matches
/// its declared input types). Evaluation never type-checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// Int or Float measurements; the bread and butter of aggregations.
    Numeric,
    /// Low-cardinality labels (String, Int, or Bool valued).
    Categorical,
    /// Unstructured text. Only text-aware transforms apply.
    FreeText,
    /// Index and join-key columns. Structural: never a feature input,
    /// except for `count` over an entity's own index.
    Identifier,
    /// UTC timestamps.
    Timestamp,
    /// True/false flags.
    Boolean,
}

impl ColumnType {
    /// Whether a cell value is legal in a column of this type.
    ///
    /// Missing is legal everywhere except Identifier — index and key
    /// columns must be fully populated.
    pub fn accepts_value(&self, value: &Value) -> bool {
        match self {
            ColumnType::Numeric => {
                matches!(value, Value::Int(_) | Value::Float(_) | Value::Missing)
            }
            ColumnType::Categorical => matches!(
                value,
                Value::String(_) | Value::Int(_) | Value::Bool(_) | Value::Missing
            ),
            ColumnType::FreeText => matches!(value, Value::String(_) | Value::Missing),
            ColumnType::Identifier => matches!(value, Value::Int(_) | Value::String(_)),
            ColumnType::Timestamp => matches!(value, Value::Timestamp(_) | Value::Missing),
            ColumnType::Boolean => matches!(value, Value::Bool(_) | Value::Missing),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Numeric => "Numeric",
            ColumnType::Categorical => "Categorical",
            ColumnType::FreeText => "FreeText",
            ColumnType::Identifier => "Identifier",
            ColumnType::Timestamp => "Timestamp",
            ColumnType::Boolean => "Boolean",
        };
        write!(f, "{name}")
    }
}
