//! JSON record tables and cell access on polars frames.
//!
//! The provider delivers an array of flat JSON objects. Column order is the
//! order in which keys are first seen; each column gets the narrowest type
//! that holds every non-null value.

use polars::prelude::*;
use serde_json::{Map, Value};

use crate::error::{DataLicenseError, Result};

/// Inferred column kind for a run of JSON values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Null,
    Boolean,
    Integer,
    Float,
    Text,
}

impl ColumnKind {
    fn of(value: &Value) -> Self {
        match value {
            Value::Null => ColumnKind::Null,
            Value::Bool(_) => ColumnKind::Boolean,
            Value::Number(n) if n.is_i64() => ColumnKind::Integer,
            Value::Number(_) => ColumnKind::Float,
            _ => ColumnKind::Text,
        }
    }

    fn merge(self, other: ColumnKind) -> ColumnKind {
        use ColumnKind::{Float, Integer, Null, Text};
        match (self, other) {
            (Null, k) | (k, Null) => k,
            (a, b) if a == b => a,
            (Integer, Float) | (Float, Integer) => Float,
            _ => Text,
        }
    }
}

/// Parse a JSON array of records into a frame.
pub fn records_to_frame(bytes: &[u8]) -> Result<DataFrame> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| DataLicenseError::Payload(format!("invalid JSON: {e}")))?;
    let Value::Array(rows) = value else {
        return Err(DataLicenseError::Payload("top-level value is not an array".into()));
    };

    let mut records: Vec<Map<String, Value>> = Vec::with_capacity(rows.len());
    for (i, row) in rows.into_iter().enumerate() {
        match row {
            Value::Object(map) => records.push(map),
            other => {
                return Err(DataLicenseError::Payload(format!(
                    "row {i} is not an object: {other}"
                )))
            }
        }
    }

    let mut names: Vec<String> = Vec::new();
    for record in &records {
        for key in record.keys() {
            if !names.iter().any(|n| n == key) {
                names.push(key.clone());
            }
        }
    }

    let columns = names
        .iter()
        .map(|name| build_column(name, &records))
        .collect::<Result<Vec<Column>>>()?;
    Ok(DataFrame::new(columns)?)
}

fn build_column(name: &str, records: &[Map<String, Value>]) -> Result<Column> {
    let cells: Vec<&Value> = records
        .iter()
        .map(|r| r.get(name).unwrap_or(&Value::Null))
        .collect();
    let kind = cells
        .iter()
        .fold(ColumnKind::Null, |acc, v| acc.merge(ColumnKind::of(v)));

    let column = match kind {
        ColumnKind::Null => Column::full_null(name.into(), cells.len(), &DataType::String),
        ColumnKind::Boolean => {
            let values: Vec<Option<bool>> = cells.iter().map(|v| v.as_bool()).collect();
            Column::new(name.into(), values)
        }
        ColumnKind::Integer => {
            let values: Vec<Option<i64>> = cells.iter().map(|v| v.as_i64()).collect();
            Column::new(name.into(), values)
        }
        ColumnKind::Float => {
            let values: Vec<Option<f64>> = cells.iter().map(|v| v.as_f64()).collect();
            Column::new(name.into(), values)
        }
        ColumnKind::Text => {
            let values: Vec<Option<String>> = cells
                .iter()
                .map(|v| match v {
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                })
                .collect();
            Column::new(name.into(), values)
        }
    };
    Ok(column)
}

/// Render a cell as text, or `None` when it is null or NaN.
///
/// Floats with no fractional part lose their `.0`, so a date delivered as
/// `20240101.0` reads back as `"20240101"`.
pub fn cell_text(value: &AnyValue) -> Option<String> {
    match value {
        AnyValue::Null => None,
        AnyValue::String(s) => Some((*s).to_string()),
        AnyValue::StringOwned(s) => Some(s.to_string()),
        AnyValue::Float64(f) => float_text(*f),
        AnyValue::Float32(f) => float_text(f64::from(*f)),
        AnyValue::Int64(i) => Some(i.to_string()),
        AnyValue::Int32(i) => Some(i.to_string()),
        AnyValue::UInt64(i) => Some(i.to_string()),
        AnyValue::UInt32(i) => Some(i.to_string()),
        AnyValue::Boolean(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn float_text(f: f64) -> Option<String> {
    if f.is_nan() {
        None
    } else if f.fract() == 0.0 && f.abs() < 1e15 {
        Some(format!("{}", f as i64))
    } else {
        Some(f.to_string())
    }
}

/// Column values as text. A missing column reads as all-null.
pub fn text_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let height = df.height();
    let Ok(column) = df.column(name) else {
        return Ok(vec![None; height]);
    };
    let series = column.as_materialized_series();
    (0..height)
        .map(|i| Ok(cell_text(&series.get(i)?)))
        .collect()
}

pub fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}
