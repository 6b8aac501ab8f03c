//! # Schema Registry
//!
//! An `EntitySet` owns entity definitions, parent→child relationships,
//! and the backing tables for the lifetime of a synthesis run.
//!
//! Every registration call validates eagerly and fails with
//! `Error::Schema` on a caller mistake — nothing downstream re-checks:
//! the planner walks relationships without cycle detection and the
//! evaluator projects keys without type checks, because this module has
//! already enforced acyclicity, key typing, index uniqueness, and
//! time-column population.

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{ColumnType, Key, Table, Value};
use crate::{Error, Result};

// ============================================================================
// Entity definition
// ============================================================================

/// Declared shape of one entity (table): its name, unique index column,
/// optional time column, and per-column types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    name: String,
    index: String,
    time_index: Option<String>,
    columns: Vec<(String, ColumnType)>,
}

impl EntityDef {
    /// Start a definition. The index column must still be declared via
    /// `with_column` — registration fails if it is absent.
    pub fn new(name: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: index.into(),
            time_index: None,
            columns: Vec::new(),
        }
    }

    /// Declare the time column (must also appear via `with_column`,
    /// typed Timestamp).
    pub fn with_time(mut self, column: impl Into<String>) -> Self {
        self.time_index = Some(column.into());
        self
    }

    /// Declare a column. Declaration order is kept and drives the
    /// deterministic ordering of base features.
    pub fn with_column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.push((name.into(), ty));
        self
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn index(&self) -> &str { &self.index }
    pub fn time_index(&self) -> Option<&str> { self.time_index.as_deref() }

    /// Declared columns in declaration order.
    pub fn columns(&self) -> &[(String, ColumnType)] {
        &self.columns
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, ty)| *ty)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }
}

// ============================================================================
// Relationship
// ============================================================================

/// Directed one-to-many link: each child row references at most one
/// parent row through `(parent_key, child_key)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub parent: String,
    pub parent_key: String,
    pub child: String,
    pub child_key: String,
}

impl std::fmt::Display for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.parent, self.parent_key, self.child, self.child_key
        )
    }
}

// ============================================================================
// EntitySet
// ============================================================================

/// The registry: entities, relationships, and data, validated on the way
/// in and read-only afterwards.
#[derive(Debug, Default)]
pub struct EntitySet {
    entities: Vec<EntityDef>,
    by_name: HashMap<String, usize>,
    tables: HashMap<String, Table>,
    relationships: Vec<Relationship>,
}

impl EntitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity together with its data.
    ///
    /// Fails with `Error::Schema` if the name is taken, the index or time
    /// column is missing or mistyped, the table's columns don't match the
    /// declaration, any cell violates its declared type, index values are
    /// not unique, or a declared time column has a missing value.
    pub fn add_entity(&mut self, def: EntityDef, table: Table) -> Result<()> {
        if self.by_name.contains_key(def.name()) {
            return Err(Error::Schema(format!(
                "entity '{}' already registered",
                def.name()
            )));
        }
        if def.columns.is_empty() {
            return Err(Error::Schema(format!(
                "entity '{}' declares no columns",
                def.name()
            )));
        }

        // Duplicate declarations. The set borrows the declared names, so
        // it must drop before `def` moves into the registry below.
        {
            let mut seen: HashSet<&str> = HashSet::with_capacity(def.columns.len());
            for (name, _) in &def.columns {
                if !seen.insert(name.as_str()) {
                    return Err(Error::Schema(format!(
                        "entity '{}' declares column '{}' twice",
                        def.name(),
                        name
                    )));
                }
            }
        }

        // Index column: declared, Identifier-typed
        match def.column_type(def.index()) {
            None => {
                return Err(Error::Schema(format!(
                    "index column '{}' is not declared on entity '{}'",
                    def.index(),
                    def.name()
                )));
            }
            Some(ColumnType::Identifier) => {}
            Some(other) => {
                return Err(Error::Schema(format!(
                    "index column '{}' on entity '{}' must be Identifier, got {}",
                    def.index(),
                    def.name(),
                    other
                )));
            }
        }

        // Time column: declared, Timestamp-typed
        if let Some(time_col) = def.time_index() {
            match def.column_type(time_col) {
                None => {
                    return Err(Error::Schema(format!(
                        "time column '{}' is not declared on entity '{}'",
                        time_col,
                        def.name()
                    )));
                }
                Some(ColumnType::Timestamp) => {}
                Some(other) => {
                    return Err(Error::Schema(format!(
                        "time column '{}' on entity '{}' must be Timestamp, got {}",
                        time_col,
                        def.name(),
                        other
                    )));
                }
            }
        }

        // Declared columns and table columns must be the same set
        for (name, _) in &def.columns {
            if !table.has_column(name) {
                return Err(Error::Schema(format!(
                    "declared column '{}' is absent from the table for entity '{}'",
                    name,
                    def.name()
                )));
            }
        }
        for name in table.column_names() {
            if !def.has_column(name) {
                return Err(Error::Schema(format!(
                    "table column '{}' is not declared on entity '{}'",
                    name,
                    def.name()
                )));
            }
        }

        // Cell-level type check
        for (name, ty) in &def.columns {
            let col = table
                .column(name)
                .ok_or_else(|| Error::Schema(format!("column '{name}' vanished")))?;
            for (row, value) in col.iter().enumerate() {
                if !ty.accepts_value(value) {
                    return Err(Error::Schema(format!(
                        "entity '{}' column '{}' row {}: {} value not accepted by {} column",
                        def.name(),
                        name,
                        row,
                        value.type_name(),
                        ty
                    )));
                }
            }
        }

        // Index uniqueness
        let index_col = table
            .column(def.index())
            .ok_or_else(|| Error::Schema(format!("index column '{}' vanished", def.index())))?;
        let mut keys: HashSet<Key> = HashSet::with_capacity(index_col.len());
        for (row, value) in index_col.iter().enumerate() {
            let key = Key::try_from(value).map_err(|_| {
                Error::Schema(format!(
                    "entity '{}' index row {}: {} is not a valid key",
                    def.name(),
                    row,
                    value.type_name()
                ))
            })?;
            if !keys.insert(key) {
                return Err(Error::Schema(format!(
                    "entity '{}' index value '{}' appears more than once",
                    def.name(),
                    value
                )));
            }
        }

        // Time column must be populated on every row
        if let Some(time_col) = def.time_index() {
            let col = table
                .column(time_col)
                .ok_or_else(|| Error::Schema(format!("time column '{time_col}' vanished")))?;
            if let Some(row) = col.iter().position(Value::is_missing) {
                return Err(Error::Schema(format!(
                    "entity '{}' time column '{}' is missing at row {}",
                    def.name(),
                    time_col,
                    row
                )));
            }
        }

        debug!(entity = %def.name(), rows = table.len(), "registered entity");
        self.by_name.insert(def.name().to_owned(), self.entities.len());
        self.tables.insert(def.name().to_owned(), table);
        self.entities.push(def);
        Ok(())
    }

    /// Register a one-to-many relationship.
    ///
    /// Fails with `Error::Schema` if either entity is unregistered, a key
    /// column is missing or not Identifier-typed, parent key values are
    /// not unique, the pair is already linked, or the edge would close a
    /// cycle in the parent→child graph.
    pub fn add_relationship(
        &mut self,
        parent: &str,
        parent_key: &str,
        child: &str,
        child_key: &str,
    ) -> Result<()> {
        let parent_def = self
            .entity(parent)
            .ok_or_else(|| Error::Schema(format!("parent entity '{parent}' is not registered")))?;
        let child_def = self
            .entity(child)
            .ok_or_else(|| Error::Schema(format!("child entity '{child}' is not registered")))?;

        for (def, key) in [(parent_def, parent_key), (child_def, child_key)] {
            match def.column_type(key) {
                None => {
                    return Err(Error::Schema(format!(
                        "key column '{}' is not declared on entity '{}'",
                        key,
                        def.name()
                    )));
                }
                Some(ColumnType::Identifier) => {}
                Some(other) => {
                    return Err(Error::Schema(format!(
                        "key column '{}' on entity '{}' must be Identifier, got {}",
                        key,
                        def.name(),
                        other
                    )));
                }
            }
        }

        // Parent key must identify exactly one row
        let parent_col = self
            .tables
            .get(parent)
            .and_then(|t| t.column(parent_key))
            .ok_or_else(|| Error::Schema(format!("key column '{parent_key}' vanished")))?;
        let mut keys: HashSet<Key> = HashSet::with_capacity(parent_col.len());
        for value in parent_col {
            let key = Key::try_from(value)
                .map_err(|_| Error::Schema(format!("parent key '{value}' is not a valid key")))?;
            if !keys.insert(key) {
                return Err(Error::Schema(format!(
                    "parent key column '{parent_key}' on entity '{parent}' is not unique \
                     (value '{value}' repeats)"
                )));
            }
        }

        // One relationship per entity pair keeps feature names collision-free
        if self
            .relationships
            .iter()
            .any(|r| r.parent == parent && r.child == child)
        {
            return Err(Error::Schema(format!(
                "entities '{parent}' and '{child}' are already linked"
            )));
        }

        // Acyclicity: adding parent→child closes a cycle iff the parent is
        // already reachable from the child
        if parent == child || self.reaches(child, parent) {
            return Err(Error::Schema(format!(
                "relationship {parent}.{parent_key} -> {child}.{child_key} would create a cycle"
            )));
        }

        debug!(%parent, %child, "registered relationship");
        self.relationships.push(Relationship {
            parent: parent.to_owned(),
            parent_key: parent_key.to_owned(),
            child: child.to_owned(),
            child_key: child_key.to_owned(),
        });
        Ok(())
    }

    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut stack: Vec<&str> = vec![from];
        let mut seen: Vec<&str> = Vec::new();
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if seen.contains(&current) {
                continue;
            }
            seen.push(current);
            for rel in self.relationships.iter().filter(|r| r.parent == current) {
                stack.push(rel.child.as_str());
            }
        }
        false
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub fn entity(&self, name: &str) -> Option<&EntityDef> {
        self.by_name.get(name).map(|&i| &self.entities[i])
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Position of an entity in registration order, used as a dense id by
    /// the evaluator's slice bookkeeping.
    pub fn entity_position(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Entities in registration order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityDef> {
        self.entities.iter()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// All relationships in registration order.
    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Relationships whose parent is `entity`, in registration order.
    pub fn relationships_from(&self, entity: &str) -> impl Iterator<Item = &Relationship> {
        self.relationships.iter().filter(move |r| r.parent == entity)
    }

    /// Relationships whose child is `entity`, in registration order.
    pub fn relationships_to(&self, entity: &str) -> impl Iterator<Item = &Relationship> {
        self.relationships.iter().filter(move |r| r.child == entity)
    }

    /// Whether an identical relationship is registered. The evaluator
    /// calls this before trusting a spec's stored path.
    pub fn has_relationship(&self, rel: &Relationship) -> bool {
        self.relationships.iter().any(|r| r == rel)
    }
}
