//! Multi-row `INSERT ... ON CONFLICT DO NOTHING` statements built from batches.

use super::LoadError;
use crate::record::{ColumnType, RecordSchema};
use crate::transform::Batch;
use chrono::NaiveDateTime;
use sqlx::{Postgres, QueryBuilder};

/// Upper bound on bind parameters in one Postgres statement.
pub const MAX_BIND_PARAMS: usize = u16::MAX as usize;

/// One bound cell, positionally matching the schema's destination columns.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(Option<String>),
    Int(Option<i64>),
    Float(Option<f64>),
    Timestamp(NaiveDateTime),
}

/// Flatten a batch into row tuples in destination column order.
pub fn batch_rows(batch: &Batch) -> Result<Vec<Vec<SqlValue>>, LoadError> {
    let schema = batch.schema();
    let table = schema.table;
    let schema_err = |message: String| LoadError::Schema { table, message };

    schema
        .validate(&batch.frame)
        .map_err(|e| schema_err(e.to_string()))?;

    let width = schema.columns.len() + 1;
    let mut rows: Vec<Vec<SqlValue>> = (0..batch.height())
        .map(|_| Vec::with_capacity(width))
        .collect();

    for spec in schema.columns {
        let column = batch
            .frame
            .column(spec.source)
            .map_err(|e| schema_err(e.to_string()))?;

        match spec.kind {
            ColumnType::Text => {
                let values = column.str().map_err(|e| schema_err(e.to_string()))?;
                for (row, v) in rows.iter_mut().zip(values.into_iter()) {
                    row.push(SqlValue::Text(v.map(str::to_owned)));
                }
            }
            ColumnType::Int => {
                let values = column.i64().map_err(|e| schema_err(e.to_string()))?;
                for (row, v) in rows.iter_mut().zip(values.into_iter()) {
                    row.push(SqlValue::Int(v));
                }
            }
            ColumnType::Float => {
                let values = column.f64().map_err(|e| schema_err(e.to_string()))?;
                for (row, v) in rows.iter_mut().zip(values.into_iter()) {
                    row.push(SqlValue::Float(v));
                }
            }
        }
    }

    for row in &mut rows {
        row.push(SqlValue::Timestamp(batch.captured_at));
    }

    Ok(rows)
}

/// Build the upsert for one table. The column list is always pinned from the
/// schema so bound values line up positionally.
///
/// `rows` must be non-empty; Postgres has no zero-row `VALUES` list.
pub fn insert_statement(
    schema: &RecordSchema,
    rows: Vec<Vec<SqlValue>>,
) -> Result<QueryBuilder<'static, Postgres>, LoadError> {
    let columns = schema.dest_columns();
    let params = rows.len() * columns.len();
    if params > MAX_BIND_PARAMS {
        return Err(LoadError::TooManyParameters {
            table: schema.table,
            params,
        });
    }

    let mut query_builder = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        schema.table,
        columns.join(", ")
    ));

    query_builder.push_values(rows, |mut b, row| {
        for value in row {
            match value {
                SqlValue::Text(v) => {
                    b.push_bind(v);
                }
                SqlValue::Int(v) => {
                    b.push_bind(v);
                }
                SqlValue::Float(v) => {
                    b.push_bind(v);
                }
                SqlValue::Timestamp(v) => {
                    b.push_bind(v);
                }
            }
        }
    });

    query_builder.push(" ON CONFLICT DO NOTHING");

    Ok(query_builder)
}
