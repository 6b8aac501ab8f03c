//! Feature specifications: read-only trees describing one derived
//! feature each. A spec's display form doubles as its column name in the
//! output matrix, so rendering is 1:1 with structure — two distinct
//! structures never share a name.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::ColumnType;
use crate::schema::Relationship;

/// One planned feature.
///
/// `Column` reads a raw column. `Transform` applies a row-wise primitive
/// to sibling features on the same entity. `Aggregation` folds a
/// descendant entity's feature up a parent→child relationship path onto
/// the path's root entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureSpec {
    Column {
        entity: String,
        column: String,
        output: ColumnType,
    },
    Transform {
        primitive: String,
        entity: String,
        inputs: Vec<FeatureSpec>,
        output: ColumnType,
    },
    Aggregation {
        primitive: String,
        entity: String,
        path: Vec<Relationship>,
        input: Box<FeatureSpec>,
        output: ColumnType,
    },
}

impl FeatureSpec {
    /// Entity the feature is defined on (where its values land).
    pub fn entity(&self) -> &str {
        match self {
            Self::Column { entity, .. }
            | Self::Transform { entity, .. }
            | Self::Aggregation { entity, .. } => entity,
        }
    }

    pub fn output(&self) -> ColumnType {
        match self {
            Self::Column { output, .. }
            | Self::Transform { output, .. }
            | Self::Aggregation { output, .. } => *output,
        }
    }

    /// Composition depth: transforms charge one level, aggregations one
    /// level per relationship hop. Raw columns sit at depth zero.
    pub fn depth(&self) -> usize {
        match self {
            Self::Column { .. } => 0,
            Self::Transform { inputs, .. } => {
                1 + inputs.iter().map(Self::depth).max().unwrap_or(0)
            }
            Self::Aggregation { path, input, .. } => path.len() + input.depth(),
        }
    }

    pub fn is_base(&self) -> bool {
        matches!(self, Self::Column { .. })
    }

    /// Deterministic column name, derived from structure alone.
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FeatureSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column { column, .. } => f.write_str(column),
            Self::Transform { primitive, inputs, .. } => {
                write!(f, "{primitive}(")?;
                for (i, input) in inputs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{input}")?;
                }
                f.write_str(")")
            }
            Self::Aggregation {
                primitive,
                path,
                input,
                ..
            } => {
                write!(f, "{primitive}(")?;
                // Index-column inputs are structural row counting; the
                // path alone names them: COUNT(orders), not COUNT(orders.id)
                if matches!(
                    **input,
                    Self::Column {
                        output: ColumnType::Identifier,
                        ..
                    }
                ) {
                    for (i, rel) in path.iter().enumerate() {
                        if i > 0 {
                            f.write_str(".")?;
                        }
                        f.write_str(&rel.child)?;
                    }
                    f.write_str(")")
                } else {
                    for rel in path {
                        write!(f, "{}.", rel.child)?;
                    }
                    write!(f, "{input})")
                }
            }
        }
    }
}
