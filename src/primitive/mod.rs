//! # Primitive Library
//!
//! A `Primitive` is a named, typed computation: transforms map one row to
//! one value, aggregations fold the rows of a child group into one value.
//! The `PrimitiveLibrary` keys them by `(kind, name)` and hands the
//! planner a deterministic, registration-ordered view.
//!
//! Missing handling is centralized here rather than in each closure:
//! a transform with any missing argument yields missing without calling
//! the closure, and aggregations drop rows with missing inputs before
//! folding. An aggregation over zero surviving rows yields the
//! primitive's declared empty value.

pub mod builtin;

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::model::{ColumnType, Value};
use crate::{Error, Result};

// ============================================================================
// Kind
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    /// Row-wise: one output value per input row on the same entity.
    Transform,
    /// Group-wise: one output value per parent row, folded over the
    /// linked child rows.
    Aggregation,
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transform => write!(f, "transform"),
            Self::Aggregation => write!(f, "aggregation"),
        }
    }
}

// ============================================================================
// Primitive
// ============================================================================

type TransformFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;
type AggregationFn = Arc<dyn Fn(&[Vec<Value>]) -> Result<Value> + Send + Sync>;

#[derive(Clone)]
enum Compute {
    Transform(TransformFn),
    Aggregation(AggregationFn),
}

/// A typed computation with a canonical (uppercase) name.
#[derive(Clone)]
pub struct Primitive {
    name: String,
    inputs: SmallVec<[ColumnType; 2]>,
    output: ColumnType,
    empty: Value,
    commutative: bool,
    compute: Compute,
}

impl Primitive {
    /// Build a transform. The closure sees exactly one value per declared
    /// input and is never called with a missing argument.
    pub fn transform<F>(name: &str, inputs: &[ColumnType], output: ColumnType, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.to_ascii_uppercase(),
            inputs: SmallVec::from_slice(inputs),
            output,
            empty: Value::Missing,
            commutative: false,
            compute: Compute::Transform(Arc::new(f)),
        }
    }

    /// Build an aggregation. The closure sees one column per declared
    /// input, row-aligned, with missing rows already dropped, and is
    /// never called on an empty group.
    pub fn aggregation<F>(name: &str, inputs: &[ColumnType], output: ColumnType, f: F) -> Self
    where
        F: Fn(&[Vec<Value>]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.to_ascii_uppercase(),
            inputs: SmallVec::from_slice(inputs),
            output,
            empty: Value::Missing,
            commutative: false,
            compute: Compute::Aggregation(Arc::new(f)),
        }
    }

    /// Value produced for a group with no surviving rows. Defaults to
    /// missing; countable primitives override it (count and sum use 0).
    pub fn with_empty(mut self, value: Value) -> Self {
        self.empty = value;
        self
    }

    /// Mark a multi-input primitive as argument-order independent. The
    /// planner then enumerates unordered argument sets instead of every
    /// permutation.
    pub fn with_commutative(mut self) -> Self {
        self.commutative = true;
        self
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn output(&self) -> ColumnType { self.output }
    pub fn input_types(&self) -> &[ColumnType] { &self.inputs }
    pub fn empty_value(&self) -> &Value { &self.empty }
    pub fn is_commutative(&self) -> bool { self.commutative }

    pub fn kind(&self) -> PrimitiveKind {
        match self.compute {
            Compute::Transform(_) => PrimitiveKind::Transform,
            Compute::Aggregation(_) => PrimitiveKind::Aggregation,
        }
    }

    /// Whether the declared inputs exactly match `got`, in order.
    pub fn accepts(&self, got: &[ColumnType]) -> bool {
        self.inputs.len() == got.len() && self.inputs.iter().zip(got).all(|(a, b)| a == b)
    }

    /// Evaluate a transform on one row of arguments.
    pub fn apply_row(&self, args: &[Value]) -> Result<Value> {
        let Compute::Transform(f) = &self.compute else {
            return Err(Error::Primitive(format!("'{}' is not a transform", self.name)));
        };
        if args.len() != self.inputs.len() {
            return Err(Error::Primitive(format!(
                "'{}' expects {} inputs, got {}",
                self.name,
                self.inputs.len(),
                args.len()
            )));
        }
        if args.iter().any(Value::is_missing) {
            return Ok(Value::Missing);
        }
        f(args)
    }

    /// Evaluate an aggregation over row-aligned input columns.
    pub fn apply_group(&self, columns: &[Vec<Value>]) -> Result<Value> {
        let Compute::Aggregation(f) = &self.compute else {
            return Err(Error::Primitive(format!("'{}' is not an aggregation", self.name)));
        };
        if columns.len() != self.inputs.len() {
            return Err(Error::Primitive(format!(
                "'{}' expects {} inputs, got {}",
                self.name,
                self.inputs.len(),
                columns.len()
            )));
        }
        let rows = columns.first().map_or(0, Vec::len);
        if columns.iter().any(|c| c.len() != rows) {
            return Err(Error::Primitive(format!(
                "'{}' given input columns of mismatched lengths",
                self.name
            )));
        }

        // Row-aligned missing drop across all inputs
        let mut kept: Vec<Vec<Value>> =
            columns.iter().map(|_| Vec::with_capacity(rows)).collect();
        for row in 0..rows {
            if columns.iter().any(|c| c[row].is_missing()) {
                continue;
            }
            for (out, col) in kept.iter_mut().zip(columns) {
                out.push(col[row].clone());
            }
        }
        if kept.first().is_none_or(Vec::is_empty) {
            return Ok(self.empty.clone());
        }
        f(&kept)
    }
}

impl fmt::Debug for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Primitive")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("inputs", &self.inputs)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Library
// ============================================================================

/// Registry of primitives, keyed by `(kind, name)` with name lookups
/// normalized to uppercase.
#[derive(Debug, Default, Clone)]
pub struct PrimitiveLibrary {
    primitives: Vec<Arc<Primitive>>,
    by_key: HashMap<(PrimitiveKind, String), usize>,
}

impl PrimitiveLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard set: date parts, sign transforms, and the usual
    /// counting and folding aggregations.
    pub fn standard() -> Result<Self> {
        let mut lib = Self::new();
        for primitive in builtin::all() {
            lib.register(primitive)?;
        }
        Ok(lib)
    }

    /// Register a primitive. Fails with `Error::Primitive` when the name
    /// is already taken for that kind.
    pub fn register(&mut self, primitive: Primitive) -> Result<()> {
        if primitive.name().is_empty() {
            return Err(Error::Primitive("primitive name is empty".into()));
        }
        if primitive.input_types().is_empty() {
            return Err(Error::Primitive(format!(
                "'{}' declares no inputs",
                primitive.name()
            )));
        }
        let key = (primitive.kind(), primitive.name().to_owned());
        if self.by_key.contains_key(&key) {
            return Err(Error::Primitive(format!(
                "{} '{}' is already registered",
                key.0, key.1
            )));
        }
        self.by_key.insert(key, self.primitives.len());
        self.primitives.push(Arc::new(primitive));
        Ok(())
    }

    pub fn get(&self, kind: PrimitiveKind, name: &str) -> Option<&Arc<Primitive>> {
        let key = (kind, name.to_ascii_uppercase());
        self.by_key.get(&key).map(|&i| &self.primitives[i])
    }

    /// Primitives of `kind` with an input slot accepting a column of
    /// `input`, in registration order. Discovery surface for callers
    /// assembling a selection; the planner applies the same slot rules
    /// to its candidate tuples, so type mismatches never survive
    /// planning.
    pub fn compatible(
        &self,
        kind: PrimitiveKind,
        input: ColumnType,
    ) -> impl Iterator<Item = &Arc<Primitive>> {
        self.primitives
            .iter()
            .filter(move |p| p.kind() == kind && p.input_types().contains(&input))
    }

    /// Transforms in registration order.
    pub fn transforms(&self) -> impl Iterator<Item = &Arc<Primitive>> {
        self.primitives
            .iter()
            .filter(|p| p.kind() == PrimitiveKind::Transform)
    }

    /// Aggregations in registration order.
    pub fn aggregations(&self) -> impl Iterator<Item = &Arc<Primitive>> {
        self.primitives
            .iter()
            .filter(|p| p.kind() == PrimitiveKind::Aggregation)
    }

    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }
}
