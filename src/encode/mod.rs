//! Two-phase categorical encoding.
//!
//! `CategoryEncoder::fit` scans one matrix and freezes the top-n
//! categories per categorical column into an immutable
//! `CategoryEncoding`; `apply` then rewrites any matrix using only that
//! frozen state. Apply never re-derives statistics, which keeps the
//! leakage boundary explicit: fit on the training slice, apply anywhere.

use std::cmp::Ordering;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::matrix::FeatureMatrix;
use crate::model::{ColumnType, Value};
use crate::{Error, Result};

/// Fit-phase configuration.
#[derive(Debug, Clone)]
pub struct CategoryEncoder {
    top_n: usize,
}

impl Default for CategoryEncoder {
    fn default() -> Self {
        Self { top_n: 10 }
    }
}

impl CategoryEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the `n` most frequent categories per column.
    pub fn with_top_n(mut self, n: usize) -> Self {
        self.top_n = n;
        self
    }

    /// Fit every categorical column of the matrix.
    pub fn fit(&self, matrix: &FeatureMatrix) -> Result<CategoryEncoding> {
        let columns: Vec<&str> = matrix
            .column_names()
            .iter()
            .zip(matrix.column_types())
            .filter(|(_, ty)| **ty == ColumnType::Categorical)
            .map(|(name, _)| name.as_str())
            .collect();
        self.fit_columns(matrix, &columns)
    }

    /// Fit the named columns, which must exist and be categorical.
    pub fn fit_columns(
        &self,
        matrix: &FeatureMatrix,
        columns: &[&str],
    ) -> Result<CategoryEncoding> {
        let mut fitted = Vec::with_capacity(columns.len());
        for &name in columns {
            match matrix.column_type(name) {
                None => {
                    return Err(Error::Encoding(format!(
                        "matrix has no column '{name}' to fit"
                    )));
                }
                Some(ColumnType::Categorical) => {}
                Some(other) => {
                    return Err(Error::Encoding(format!(
                        "column '{name}' is {other}, not categorical"
                    )));
                }
            }
            let values = matrix.require_column(name)?;
            fitted.push((name.to_owned(), top_categories(values, self.top_n)));
        }
        debug!(columns = fitted.len(), top_n = self.top_n, "fitted category encoding");
        Ok(CategoryEncoding { fitted })
    }
}

/// Frozen fit artifact: per column, the categories that get their own
/// 0/1 column, most frequent first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryEncoding {
    fitted: Vec<(String, Vec<Value>)>,
}

impl CategoryEncoding {
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fitted.iter().map(|(name, _)| name.as_str())
    }

    pub fn categories(&self, column: &str) -> Option<&[Value]> {
        self.fitted
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, cats)| cats.as_slice())
    }

    /// Rewrite a matrix: each fitted column becomes one `name=value` 0/1
    /// column per frozen category (values unseen at fit time encode as
    /// all zeros); everything else copies through in order.
    pub fn apply(&self, matrix: &FeatureMatrix) -> Result<FeatureMatrix> {
        for (name, _) in &self.fitted {
            // A lookup miss here means the caller applied the encoding
            // to a matrix it was never fitted against
            matrix.require_column(name)?;
        }

        let mut columns = Vec::new();
        let mut column_types = Vec::new();
        let mut data = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for (at, name) in matrix.column_names().iter().enumerate() {
            match self.categories(name) {
                None => {
                    let values = matrix.require_column(name)?;
                    push_column(
                        &mut columns,
                        &mut column_types,
                        &mut data,
                        &mut seen,
                        name.clone(),
                        matrix.column_types()[at],
                        values.to_vec(),
                    )?;
                }
                Some(categories) => {
                    let values = matrix.require_column(name)?;
                    for category in categories {
                        let encoded: Vec<Value> = values
                            .iter()
                            .map(|v| Value::Int(i64::from(v == category)))
                            .collect();
                        push_column(
                            &mut columns,
                            &mut column_types,
                            &mut data,
                            &mut seen,
                            format!("{name}={category}"),
                            ColumnType::Numeric,
                            encoded,
                        )?;
                    }
                }
            }
        }

        Ok(FeatureMatrix::new(
            matrix.index_name().to_owned(),
            matrix.index().to_vec(),
            columns,
            column_types,
            data,
        ))
    }
}

fn push_column(
    columns: &mut Vec<String>,
    column_types: &mut Vec<ColumnType>,
    data: &mut Vec<Vec<Value>>,
    seen: &mut HashSet<String>,
    name: String,
    ty: ColumnType,
    values: Vec<Value>,
) -> Result<()> {
    if !seen.insert(name.clone()) {
        return Err(Error::Encoding(format!(
            "encoded column name '{name}' collides"
        )));
    }
    columns.push(name);
    column_types.push(ty);
    data.push(values);
    Ok(())
}

/// Most frequent non-missing values, ties broken toward the smaller
/// value, at most `top_n` of them.
fn top_categories(values: &[Value], top_n: usize) -> Vec<Value> {
    let mut sorted: Vec<&Value> = values.iter().filter(|v| !v.is_missing()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut runs: Vec<(&Value, usize)> = Vec::new();
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i + 1;
        while j < sorted.len() && sorted[j].total_cmp(sorted[i]) == Ordering::Equal {
            j += 1;
        }
        runs.push((sorted[i], j - i));
        i = j;
    }
    // Frequency desc, then value asc — already value-ascending, and the
    // sort below is stable
    runs.sort_by(|a, b| b.1.cmp(&a.1));
    runs.into_iter()
        .take(top_n)
        .map(|(v, _)| v.clone())
        .collect()
}
