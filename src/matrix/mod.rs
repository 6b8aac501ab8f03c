//! # Feature Matrix Assembler
//!
//! Merges the evaluator's per-feature value maps into one wide table
//! keyed by the target entity's index, columns in plan order. The merge
//! is deliberately single-threaded and checks coverage: every feature
//! must supply a value for every target row, or assembly fails — a hole
//! here means an upstream consistency bug, never a data condition.

use hashbrown::{HashMap, HashSet};
use tracing::debug;

use crate::eval::ValueMap;
use crate::model::{ColumnType, Key, Value};
use crate::plan::FeatureSpec;
use crate::schema::EntitySet;
use crate::{Error, Result};

/// Wide output table: one row per target index value (in target row
/// order), one column per planned feature (in plan order).
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    index_name: String,
    index: Vec<Key>,
    columns: Vec<String>,
    column_types: Vec<ColumnType>,
    /// Column-major values, aligned with `columns` and `index`.
    data: Vec<Vec<Value>>,
    row_of: HashMap<Key, usize>,
}

impl FeatureMatrix {
    pub(crate) fn new(
        index_name: String,
        index: Vec<Key>,
        columns: Vec<String>,
        column_types: Vec<ColumnType>,
        data: Vec<Vec<Value>>,
    ) -> Self {
        let row_of = index
            .iter()
            .enumerate()
            .map(|(row, key)| (key.clone(), row))
            .collect();
        Self {
            index_name,
            index,
            columns,
            column_types,
            data,
            row_of,
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Target index values in row order.
    pub fn index(&self) -> &[Key] {
        &self.index
    }

    /// Column names in plan order.
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn column_types(&self) -> &[ColumnType] {
        &self.column_types
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        let at = self.columns.iter().position(|c| c == name)?;
        Some(&self.data[at])
    }

    pub(crate) fn require_column(&self, name: &str) -> Result<&[Value]> {
        self.column(name)
            .ok_or_else(|| Error::NotFound(format!("matrix has no column '{name}'")))
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        let at = self.columns.iter().position(|c| c == name)?;
        Some(self.column_types[at])
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        self.column(column)?.get(row)
    }

    /// Value for a specific target key.
    pub fn get(&self, key: &Key, column: &str) -> Option<&Value> {
        self.value(*self.row_of.get(key)?, column)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// Merge value maps into the final matrix.
///
/// Fails with `Error::Assembly` on a spec/map count mismatch, a
/// duplicate column name, or any feature lacking a value for a target
/// row — a feature must produce a value for every row, even if it is
/// only the primitive's empty default.
pub fn assemble(
    set: &EntitySet,
    target: &str,
    specs: &[FeatureSpec],
    maps: &[ValueMap],
) -> Result<FeatureMatrix> {
    if specs.len() != maps.len() {
        return Err(Error::Assembly(format!(
            "{} planned features but {} value maps",
            specs.len(),
            maps.len()
        )));
    }
    let def = set
        .entity(target)
        .ok_or_else(|| Error::Assembly(format!("target entity '{target}' is not registered")))?;
    let table = set
        .table(target)
        .ok_or_else(|| Error::Assembly(format!("entity '{target}' has no table")))?;
    let index_col = table.column(def.index()).ok_or_else(|| {
        Error::Assembly(format!(
            "index column '{}' is missing from the table",
            def.index()
        ))
    })?;

    let mut index = Vec::with_capacity(index_col.len());
    for value in index_col {
        index.push(Key::try_from(value).map_err(|_| {
            Error::Assembly(format!("index value '{value}' is not a valid key"))
        })?);
    }

    let mut seen: HashSet<String> = HashSet::with_capacity(specs.len());
    for spec in specs {
        let name = spec.name();
        if !seen.insert(name.clone()) {
            return Err(Error::Assembly(format!("duplicate column name '{name}'")));
        }
    }

    let mut columns = Vec::with_capacity(specs.len());
    let mut column_types = Vec::with_capacity(specs.len());
    let mut data = Vec::with_capacity(specs.len());
    for (spec, map) in specs.iter().zip(maps) {
        let name = spec.name();
        let mut column = Vec::with_capacity(index.len());
        for key in &index {
            let value = map.get(key).ok_or_else(|| {
                Error::Assembly(format!("feature '{name}' has no value for row '{key}'"))
            })?;
            column.push(value.clone());
        }
        columns.push(name);
        column_types.push(spec.output());
        data.push(column);
    }

    debug!(entity = %target, rows = index.len(), columns = columns.len(), "assembled matrix");
    Ok(FeatureMatrix::new(
        def.index().to_owned(),
        index,
        columns,
        column_types,
        data,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Table;
    use crate::schema::EntityDef;

    fn one_entity_set() -> EntitySet {
        let mut es = EntitySet::new();
        let def = EntityDef::new("rows", "id")
            .with_column("id", ColumnType::Identifier)
            .with_column("x", ColumnType::Numeric);
        let mut table = Table::new(["id", "x"]).unwrap();
        table.push_row([Value::Int(1), Value::Int(10)]).unwrap();
        table.push_row([Value::Int(2), Value::Int(20)]).unwrap();
        es.add_entity(def, table).unwrap();
        es
    }

    fn base_spec() -> FeatureSpec {
        FeatureSpec::Column {
            entity: "rows".into(),
            column: "x".into(),
            output: ColumnType::Numeric,
        }
    }

    #[test]
    fn test_assemble_aligns_rows_and_columns() {
        let es = one_entity_set();
        let specs = vec![base_spec()];
        let mut map = ValueMap::new();
        map.insert(Key::from(1), Value::Int(10));
        map.insert(Key::from(2), Value::Int(20));

        let matrix = assemble(&es, "rows", &specs, &[map]).unwrap();
        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix.index_name(), "id");
        assert_eq!(matrix.column_names(), &["x".to_string()]);
        assert_eq!(matrix.get(&Key::from(2), "x"), Some(&Value::Int(20)));
        assert_eq!(matrix.column_type("x"), Some(ColumnType::Numeric));
    }

    #[test]
    fn test_missing_row_value_fails() {
        let es = one_entity_set();
        let specs = vec![base_spec()];
        let mut map = ValueMap::new();
        map.insert(Key::from(1), Value::Int(10));
        // key 2 absent

        let err = assemble(&es, "rows", &specs, &[map]).unwrap_err();
        assert!(matches!(err, Error::Assembly(_)));
    }

    #[test]
    fn test_map_count_mismatch_fails() {
        let es = one_entity_set();
        let specs = vec![base_spec()];
        let err = assemble(&es, "rows", &specs, &[]).unwrap_err();
        assert!(matches!(err, Error::Assembly(_)));
    }
}
