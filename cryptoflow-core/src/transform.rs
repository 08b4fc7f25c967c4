//! Transform stage: raw JSON collections into typed Polars frames.
//!
//! Every step is driven by the kind's [`RecordSchema`]:
//! 1. unwrap the `data` list of the payload
//! 2. drop the pruned source fields
//! 3. build declared columns, strictly cast to their scalar type
//! 4. pass undeclared fields through as strings
//! 5. append the capture timestamp

use crate::record::{
    captured_at_dtype, ColumnSpec, ColumnType, RecordKind, RecordSchema, CAPTURED_AT_COLUMN,
};
use crate::source::Snapshot;
use chrono::NaiveDateTime;
use polars::prelude::*;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

type Row = Map<String, Value>;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("{resource} payload has no `data` array")]
    MissingData { resource: &'static str },

    #[error("{resource} row {index} is not a JSON object")]
    NotAnObject { resource: &'static str, index: usize },

    #[error("cannot coerce {resource}.{column} to {target:?}: {message}")]
    Coercion {
        resource: &'static str,
        column: &'static str,
        target: ColumnType,
        message: String,
    },

    #[error("failed to assemble {resource} table: {message}")]
    Frame { resource: &'static str, message: String },
}

/// One record kind's transformed table.
#[derive(Debug, Clone)]
pub struct Batch {
    pub kind: RecordKind,
    /// Capture time shared by every row of `frame`.
    pub captured_at: NaiveDateTime,
    pub frame: DataFrame,
}

impl Batch {
    pub fn schema(&self) -> &'static RecordSchema {
        self.kind.schema()
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Undeclared source fields carried through as strings.
    pub fn passthrough_columns(&self) -> Vec<String> {
        let schema = self.schema();
        self.frame
            .get_column_names()
            .into_iter()
            .filter(|name| name.as_str() != CAPTURED_AT_COLUMN && schema.column(name).is_none())
            .map(|name| name.to_string())
            .collect()
    }
}

/// Wall-clock capture time, local and timezone-naive.
pub fn capture_time() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Transform all four payloads of a snapshot, stamping every batch with the
/// same capture time.
pub fn transform_all(
    snapshot: &Snapshot,
    captured_at: NaiveDateTime,
) -> Result<Vec<Batch>, TransformError> {
    let batches = RecordKind::ALL
        .into_iter()
        .map(|kind| transform(kind, snapshot.payload(kind), captured_at))
        .collect::<Result<Vec<_>, _>>()?;

    info!(
        captured_at = %captured_at,
        rows = batches.iter().map(Batch::height).sum::<usize>(),
        "transformed snapshot"
    );
    Ok(batches)
}

/// Transform one raw payload (`{"data": [...]}`) into a typed batch.
pub fn transform(
    kind: RecordKind,
    payload: &Value,
    captured_at: NaiveDateTime,
) -> Result<Batch, TransformError> {
    let resource = kind.resource();
    let data = payload
        .get("data")
        .and_then(Value::as_array)
        .ok_or(TransformError::MissingData { resource })?;

    let rows = data
        .iter()
        .enumerate()
        .map(|(index, v)| {
            v.as_object()
                .ok_or(TransformError::NotAnObject { resource, index })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let frame = build_frame(kind.schema(), &rows, captured_at)?;
    debug!(resource, rows = frame.height(), "transformed resource");

    Ok(Batch {
        kind,
        captured_at,
        frame,
    })
}

/// Build the typed frame for a set of rows.
///
/// Column order: declared columns, then passthrough columns in key order,
/// then the capture timestamp.
pub fn build_frame(
    schema: &RecordSchema,
    rows: &[&Row],
    captured_at: NaiveDateTime,
) -> Result<DataFrame, TransformError> {
    let resource = schema.kind.resource();
    let mut columns: Vec<Column> = Vec::with_capacity(schema.columns.len() + 1);

    for spec in schema.columns {
        columns.push(Column::from(typed_series(resource, spec, rows)?));
    }

    for name in passthrough_names(schema, rows) {
        let values: Vec<Option<String>> = rows.iter().map(|r| cell_text(r.get(name))).collect();
        columns.push(Column::from(Series::new(name.into(), values)));
    }

    columns.push(Column::from(captured_at_series(resource, captured_at, rows.len())?));

    DataFrame::new(columns).map_err(|e| TransformError::Frame {
        resource,
        message: e.to_string(),
    })
}

/// Source fields that are neither declared nor pruned, first-seen order.
fn passthrough_names<'a>(schema: &RecordSchema, rows: &[&'a Row]) -> Vec<&'a str> {
    let mut names: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.keys() {
            let key = key.as_str();
            if key == CAPTURED_AT_COLUMN
                || schema.is_dropped(key)
                || schema.column(key).is_some()
                || names.contains(&key)
            {
                continue;
            }
            names.push(key);
        }
    }
    names
}

fn typed_series(
    resource: &'static str,
    spec: &ColumnSpec,
    rows: &[&Row],
) -> Result<Series, TransformError> {
    let raw: Vec<Option<String>> = rows
        .iter()
        .map(|r| match spec.kind {
            ColumnType::Int => int_text(r.get(spec.source)),
            ColumnType::Text | ColumnType::Float => cell_text(r.get(spec.source)),
        })
        .collect();
    let series = Series::new(spec.source.into(), raw);

    match spec.kind {
        ColumnType::Text => Ok(series),
        ColumnType::Int | ColumnType::Float => {
            series
                .strict_cast(&spec.kind.dtype())
                .map_err(|e| TransformError::Coercion {
                    resource,
                    column: spec.source,
                    target: spec.kind,
                    message: e.to_string(),
                })
        }
    }
}

fn captured_at_series(
    resource: &'static str,
    captured_at: NaiveDateTime,
    len: usize,
) -> Result<Series, TransformError> {
    let micros = captured_at.and_utc().timestamp_micros();
    Series::new(CAPTURED_AT_COLUMN.into(), vec![micros; len])
        .cast(&captured_at_dtype())
        .map_err(|e| TransformError::Frame {
            resource,
            message: e.to_string(),
        })
}

/// String form of a JSON cell. `null` and absent fields become nulls.
fn cell_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Like [`cell_text`], but whole JSON floats (`3.0`) are written as integers.
/// Numeric strings are left as-is, so `"3.0"` still fails the integer cast.
fn int_text(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::Number(n)) if n.as_i64().is_none() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Some((f as i64).to_string())
            }
            _ => Some(n.to_string()),
        },
        other => cell_text(other),
    }
}
