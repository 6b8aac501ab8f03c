//! Standard primitives: calendar parts and sign transforms, plus the
//! counting and folding aggregations. Numeric folds keep integer inputs
//! integer where the operation allows it; mean and std always widen to
//! float. Order-sensitive folds (mode ties, min/max over mixed numerics)
//! resolve through `Value::total_cmp` so results never depend on row
//! order.

use std::cmp::Ordering;

use chrono::{DateTime, Datelike, Timelike, Utc};

use super::Primitive;
use crate::model::{ColumnType, Value};
use crate::{Error, Result};

/// Every builtin, transforms first, in the order the planner enumerates
/// them.
pub fn all() -> Vec<Primitive> {
    let mut out = transforms();
    out.extend(aggregations());
    out
}

// ============================================================================
// Transforms
// ============================================================================

fn transforms() -> Vec<Primitive> {
    use ColumnType::{Boolean, Categorical, FreeText, Numeric, Timestamp};

    vec![
        Primitive::transform("YEAR", &[Timestamp], Numeric, |args| {
            Ok(Value::Int(i64::from(expect_timestamp(&args[0])?.year())))
        }),
        // Calendar positions are labels, not magnitudes
        Primitive::transform("MONTH", &[Timestamp], Categorical, |args| {
            Ok(Value::Int(i64::from(expect_timestamp(&args[0])?.month())))
        }),
        Primitive::transform("DAY", &[Timestamp], Numeric, |args| {
            Ok(Value::Int(i64::from(expect_timestamp(&args[0])?.day())))
        }),
        Primitive::transform("HOUR", &[Timestamp], Categorical, |args| {
            Ok(Value::Int(i64::from(expect_timestamp(&args[0])?.hour())))
        }),
        // Monday = 0 .. Sunday = 6
        Primitive::transform("WEEKDAY", &[Timestamp], Categorical, |args| {
            let ts = expect_timestamp(&args[0])?;
            Ok(Value::Int(i64::from(ts.weekday().num_days_from_monday())))
        }),
        Primitive::transform("IS_WEEKEND", &[Timestamp], Boolean, |args| {
            let ts = expect_timestamp(&args[0])?;
            Ok(Value::Bool(ts.weekday().num_days_from_monday() >= 5))
        }),
        Primitive::transform("ABSOLUTE", &[Numeric], Numeric, |args| match &args[0] {
            Value::Int(i) => Ok(Value::Int(i.saturating_abs())),
            Value::Float(x) => Ok(Value::Float(x.abs())),
            other => Err(type_error("numeric", other)),
        }),
        Primitive::transform("NEGATE", &[Numeric], Numeric, |args| match &args[0] {
            Value::Int(i) => Ok(Value::Int(i.saturating_neg())),
            Value::Float(x) => Ok(Value::Float(-x)),
            other => Err(type_error("numeric", other)),
        }),
        Primitive::transform("NUM_CHARACTERS", &[FreeText], Numeric, |args| {
            let text = expect_str(&args[0])?;
            Ok(Value::Int(text.chars().count() as i64))
        }),
        Primitive::transform("NUM_WORDS", &[FreeText], Numeric, |args| {
            let text = expect_str(&args[0])?;
            Ok(Value::Int(text.split_whitespace().count() as i64))
        }),
        Primitive::transform("ADD_NUMERIC", &[Numeric, Numeric], Numeric, |args| {
            match (&args[0], &args[1]) {
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.saturating_add(*b))),
                (a, b) => Ok(Value::Float(expect_float(a)? + expect_float(b)?)),
            }
        })
        .with_commutative(),
        Primitive::transform("MULTIPLY_NUMERIC", &[Numeric, Numeric], Numeric, |args| {
            match (&args[0], &args[1]) {
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.saturating_mul(*b))),
                (a, b) => Ok(Value::Float(expect_float(a)? * expect_float(b)?)),
            }
        })
        .with_commutative(),
    ]
}

// ============================================================================
// Aggregations
// ============================================================================

fn aggregations() -> Vec<Primitive> {
    use ColumnType::{Boolean, Categorical, Identifier, Numeric};

    vec![
        // Counts rows through the child's index column, which is never
        // missing, so the count covers the whole group.
        Primitive::aggregation("COUNT", &[Identifier], Numeric, |cols| {
            Ok(Value::Int(cols[0].len() as i64))
        })
        .with_empty(Value::Int(0)),
        Primitive::aggregation("SUM", &[Numeric], Numeric, |cols| sum(&cols[0]))
            .with_empty(Value::Int(0)),
        Primitive::aggregation("MEAN", &[Numeric], Numeric, |cols| mean(&cols[0])),
        Primitive::aggregation("MIN", &[Numeric], Numeric, |cols| {
            Ok(extreme(&cols[0], Ordering::Less))
        }),
        Primitive::aggregation("MAX", &[Numeric], Numeric, |cols| {
            Ok(extreme(&cols[0], Ordering::Greater))
        }),
        Primitive::aggregation("STD", &[Numeric], Numeric, |cols| std_dev(&cols[0])),
        Primitive::aggregation("MODE", &[Categorical], Categorical, |cols| {
            Ok(mode(&cols[0]))
        }),
        Primitive::aggregation("NUM_UNIQUE", &[Categorical], Numeric, |cols| {
            Ok(Value::Int(unique_count(&cols[0]) as i64))
        })
        .with_empty(Value::Int(0)),
        Primitive::aggregation("PERCENT_TRUE", &[Boolean], Numeric, |cols| {
            let trues = count_true(&cols[0])?;
            Ok(Value::Float(trues as f64 / cols[0].len() as f64))
        }),
        Primitive::aggregation("ANY", &[Boolean], Boolean, |cols| {
            Ok(Value::Bool(count_true(&cols[0])? > 0))
        })
        .with_empty(Value::Bool(false)),
        Primitive::aggregation("ALL", &[Boolean], Boolean, |cols| {
            let trues = count_true(&cols[0])?;
            Ok(Value::Bool(trues == cols[0].len()))
        })
        .with_empty(Value::Bool(true)),
    ]
}

// ============================================================================
// Helpers
// ============================================================================

fn type_error(expected: &str, got: &Value) -> Error {
    Error::TypeError {
        expected: expected.to_owned(),
        got: got.type_name().to_owned(),
    }
}

fn expect_timestamp(value: &Value) -> Result<DateTime<Utc>> {
    value
        .as_timestamp()
        .ok_or_else(|| type_error("timestamp", value))
}

fn expect_float(value: &Value) -> Result<f64> {
    value.as_float().ok_or_else(|| type_error("numeric", value))
}

fn expect_bool(value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| type_error("boolean", value))
}

fn expect_str(value: &Value) -> Result<&str> {
    value.as_str().ok_or_else(|| type_error("string", value))
}

/// Integer sum while every input is an integer, float sum otherwise.
fn sum(values: &[Value]) -> Result<Value> {
    if values.iter().all(|v| matches!(v, Value::Int(_))) {
        let mut total: i64 = 0;
        for value in values {
            if let Value::Int(i) = value {
                total = total.saturating_add(*i);
            }
        }
        return Ok(Value::Int(total));
    }
    let mut total = 0.0;
    for value in values {
        total += expect_float(value)?;
    }
    Ok(Value::Float(total))
}

fn mean(values: &[Value]) -> Result<Value> {
    let mut total = 0.0;
    for value in values {
        total += expect_float(value)?;
    }
    Ok(Value::Float(total / values.len() as f64))
}

/// Sample standard deviation; below two observations there is none.
fn std_dev(values: &[Value]) -> Result<Value> {
    if values.len() < 2 {
        return Ok(Value::Missing);
    }
    let mut floats = Vec::with_capacity(values.len());
    for value in values {
        floats.push(expect_float(value)?);
    }
    let n = floats.len() as f64;
    let mean = floats.iter().sum::<f64>() / n;
    let variance = floats.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Ok(Value::Float(variance.sqrt()))
}

/// Min or max under the total order, keeping the original representation
/// of the winning value.
fn extreme(values: &[Value], keep: Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for value in values {
        match best {
            None => best = Some(value),
            Some(current) if value.total_cmp(current) == keep => best = Some(value),
            Some(_) => {}
        }
    }
    best.cloned().unwrap_or(Value::Missing)
}

/// Most frequent value; ties go to the smallest under the total order.
fn mode(values: &[Value]) -> Value {
    let mut sorted = values.to_vec();
    sorted.sort_by(Value::total_cmp);

    let mut best_start = 0;
    let mut best_run = 0;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i + 1;
        while j < sorted.len() && sorted[j].total_cmp(&sorted[i]) == Ordering::Equal {
            j += 1;
        }
        if j - i > best_run {
            best_run = j - i;
            best_start = i;
        }
        i = j;
    }
    if best_run == 0 {
        return Value::Missing;
    }
    sorted[best_start].clone()
}

fn unique_count(values: &[Value]) -> usize {
    let mut sorted = values.to_vec();
    sorted.sort_by(Value::total_cmp);
    let mut count = 0;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i + 1;
        while j < sorted.len() && sorted[j].total_cmp(&sorted[i]) == Ordering::Equal {
            j += 1;
        }
        count += 1;
        i = j;
    }
    count
}

fn count_true(values: &[Value]) -> Result<usize> {
    values
        .iter()
        .try_fold(0usize, |acc, v| expect_bool(v).map(|b| acc + usize::from(b)))
}
