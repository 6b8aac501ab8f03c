//! Feature matrix export — flat renditions of an assembled matrix.
//!
//! ```text
//! FeatureMatrix → write_csv() → header + one line per target row
//!              → to_json()   → array of row objects keyed by column name
//! ```
//!
//! Both forms are meant for the modeling step downstream: deterministic
//! column order (the plan order), index first, missing values as empty
//! CSV fields / JSON nulls.

use std::io::Write;

use crate::matrix::FeatureMatrix;
use crate::model::Value;
use crate::Result;

/// Write the matrix as CSV: a header row, then one line per target row,
/// index column first. Fields containing separators, quotes, or line
/// breaks are double-quoted with `""` escaping.
pub fn write_csv(matrix: &FeatureMatrix, writer: &mut dyn Write) -> Result<()> {
    let columns: Vec<&[Value]> = matrix
        .column_names()
        .iter()
        .map(|name| matrix.require_column(name))
        .collect::<Result<_>>()?;

    write!(writer, "{}", csv_field(matrix.index_name()))?;
    for name in matrix.column_names() {
        write!(writer, ",{}", csv_field(name))?;
    }
    writeln!(writer)?;

    for (row, key) in matrix.index().iter().enumerate() {
        write!(writer, "{}", csv_field(&key.to_string()))?;
        for column in &columns {
            write!(writer, ",{}", format_csv_value(&column[row]))?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

/// Render the matrix as a JSON array of row objects, index included.
pub fn to_json(matrix: &FeatureMatrix) -> Result<serde_json::Value> {
    let columns: Vec<&[Value]> = matrix
        .column_names()
        .iter()
        .map(|name| matrix.require_column(name))
        .collect::<Result<_>>()?;

    let mut rows = Vec::with_capacity(matrix.len());
    for (row, key) in matrix.index().iter().enumerate() {
        let mut object = serde_json::Map::with_capacity(1 + columns.len());
        object.insert(
            matrix.index_name().to_owned(),
            json_value(&Value::from(key)),
        );
        for (name, column) in matrix.column_names().iter().zip(&columns) {
            object.insert(name.clone(), json_value(&column[row]));
        }
        rows.push(serde_json::Value::Object(object));
    }
    Ok(serde_json::Value::Array(rows))
}

/// Format one value as a CSV field. Missing renders as an empty field.
fn format_csv_value(value: &Value) -> String {
    match value {
        Value::Missing => String::new(),
        Value::String(s) => csv_field(s),
        other => other.to_string(),
    }
}

/// Quote a field when it contains a separator, quote, or line break.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_owned()
    }
}

/// Map a value to its plain JSON form (no type tags — this is the
/// model-facing rendition, not the serde round-trip one).
fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Missing => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::from(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        // Non-finite floats become null rather than invalid JSON
        Value::Float(x) => serde_json::Value::from(*x),
        Value::String(s) => serde_json::Value::from(s.as_str()),
        Value::Timestamp(ts) => serde_json::Value::from(ts.to_rfc3339()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnType, Key};

    fn small_matrix() -> FeatureMatrix {
        FeatureMatrix::new(
            "id".into(),
            vec![Key::from(1), Key::from(2)],
            vec!["amount".into(), "note".into()],
            vec![ColumnType::Numeric, ColumnType::FreeText],
            vec![
                vec![Value::Int(10), Value::Missing],
                vec![Value::from("plain"), Value::from("has, comma")],
            ],
        )
    }

    #[test]
    fn test_csv_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("has, comma"), "\"has, comma\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_write_csv_shape() {
        let mut out = Vec::new();
        write_csv(&small_matrix(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "id,amount,note");
        assert_eq!(lines[1], "1,10,plain");
        assert_eq!(lines[2], "2,,\"has, comma\"");
    }

    #[test]
    fn test_json_rows() {
        let json = to_json(&small_matrix()).unwrap();
        let rows = json.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], 1);
        assert_eq!(rows[0]["amount"], 10);
        assert_eq!(rows[1]["amount"], serde_json::Value::Null);
        assert_eq!(rows[1]["note"], "has, comma");
    }
}
