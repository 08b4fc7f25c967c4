//! Load stage: conflict-skipping bulk upserts into the relational store.

pub mod postgres;
pub mod statement;

pub use postgres::PostgresLoader;
pub use statement::{batch_rows, insert_statement, SqlValue, MAX_BIND_PARAMS};

use crate::record::RecordKind;
use crate::transform::Batch;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid database configuration: {0}")]
    Config(String),

    #[error("failed to start database runtime: {0}")]
    Runtime(String),

    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("failed to begin transaction: {0}")]
    Begin(#[source] sqlx::Error),

    #[error("batch for table {table} does not match its schema: {message}")]
    Schema { table: &'static str, message: String },

    #[error("insert into {table} needs {params} bind parameters (limit 65535)")]
    TooManyParameters { table: &'static str, params: usize },

    #[error("insert into {table} failed: {source}")]
    Insert {
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to commit transaction: {0}")]
    Commit(#[source] sqlx::Error),
}

/// Outcome of loading one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableLoad {
    pub kind: RecordKind,
    /// Rows offered to the insert.
    pub rows: usize,
    /// Rows actually written; the rest hit a uniqueness constraint.
    pub inserted: usize,
}

impl TableLoad {
    pub fn skipped(&self) -> usize {
        self.rows.saturating_sub(self.inserted)
    }
}

/// Outcome of one committed load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub tables: Vec<TableLoad>,
}

impl LoadSummary {
    pub fn table(&self, kind: RecordKind) -> Option<&TableLoad> {
        self.tables.iter().find(|t| t.kind == kind)
    }

    pub fn inserted(&self) -> usize {
        self.tables.iter().map(|t| t.inserted).sum()
    }
}

/// Destination for transformed batches.
///
/// A load is all-or-nothing: either every batch is committed or none is.
pub trait Sink {
    fn name(&self) -> &str;

    fn load(&self, batches: &[Batch]) -> Result<LoadSummary, LoadError>;
}
