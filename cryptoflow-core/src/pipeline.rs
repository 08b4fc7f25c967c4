//! Fetch → transform → load, once per invocation.

use crate::load::{LoadError, LoadSummary, Sink};
use crate::record::RecordKind;
use crate::source::{FetchError, MarketSource};
use crate::transform::{capture_time, transform_all, Batch, TransformError};
use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),

    #[error("load failed: {0}")]
    Load(#[from] LoadError),
}

/// Per-kind row counts of one completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindReport {
    pub kind: RecordKind,
    pub fetched: usize,
    pub inserted: usize,
}

impl KindReport {
    pub fn skipped(&self) -> usize {
        self.fetched.saturating_sub(self.inserted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub captured_at: NaiveDateTime,
    pub kinds: Vec<KindReport>,
}

impl RunReport {
    fn new(captured_at: NaiveDateTime, batches: &[Batch], summary: &LoadSummary) -> Self {
        let kinds = batches
            .iter()
            .map(|batch| KindReport {
                kind: batch.kind,
                fetched: batch.height(),
                inserted: summary
                    .table(batch.kind)
                    .map(|t| t.inserted)
                    .unwrap_or(0),
            })
            .collect();
        Self { captured_at, kinds }
    }

    pub fn kind(&self, kind: RecordKind) -> Option<&KindReport> {
        self.kinds.iter().find(|k| k.kind == kind)
    }

    pub fn total_inserted(&self) -> usize {
        self.kinds.iter().map(|k| k.inserted).sum()
    }
}

/// Fetch all four resources and transform them without loading.
///
/// One capture time is taken after every fetch completes and shared by all
/// batches.
pub fn extract<S: MarketSource>(source: &S) -> Result<Vec<Batch>, PipelineError> {
    info!(source = source.name(), "fetching snapshot");
    let snapshot = source.snapshot()?;
    Ok(transform_all(&snapshot, capture_time())?)
}

/// The ETL pipeline over a source and a sink.
pub struct Pipeline<S, K> {
    source: S,
    sink: K,
}

impl<S: MarketSource, K: Sink> Pipeline<S, K> {
    pub fn new(source: S, sink: K) -> Self {
        Self { source, sink }
    }

    /// Fetch and transform without loading. See [`extract`].
    pub fn extract(&self) -> Result<Vec<Batch>, PipelineError> {
        extract(&self.source)
    }

    /// Run the full pipeline once. Any failure aborts before commit.
    pub fn run(&self) -> Result<RunReport, PipelineError> {
        let batches = self.extract()?;
        let captured_at = batches
            .first()
            .map(|b| b.captured_at)
            .unwrap_or_else(capture_time);

        info!(sink = self.sink.name(), "loading batches");
        let summary = self.sink.load(&batches)?;

        let report = RunReport::new(captured_at, &batches, &summary);
        info!(
            captured_at = %report.captured_at,
            inserted = report.total_inserted(),
            "run complete"
        );
        Ok(report)
    }
}
