//! Integration tests for the full pipeline over fixture payloads.
//!
//! The sink here is an in-memory table set that skips rows already present,
//! the way the Postgres tables' uniqueness constraints do.

use cryptoflow_core::load::{batch_rows, LoadError, LoadSummary, Sink, SqlValue, TableLoad};
use cryptoflow_core::pipeline::{extract, Pipeline, PipelineError};
use cryptoflow_core::record::{RecordKind, CAPTURED_AT_COLUMN};
use cryptoflow_core::source::{FetchError, StaticSource};
use cryptoflow_core::transform::{transform, Batch};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

fn fixture(name: &str) -> Value {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    let content = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&content).unwrap()
}

fn fixture_source() -> StaticSource {
    StaticSource::new()
        .with(RecordKind::Asset, fixture("assets.json"))
        .with(RecordKind::Rate, fixture("rates.json"))
        .with(RecordKind::Exchange, fixture("exchanges.json"))
        .with(RecordKind::Market, fixture("markets.json"))
}

/// Tables keyed on the whole bound row.
#[derive(Default)]
struct MemorySink {
    tables: Mutex<HashMap<&'static str, HashSet<String>>>,
    loads: Mutex<usize>,
}

impl MemorySink {
    fn row_count(&self, kind: RecordKind) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(kind.schema().table)
            .map(HashSet::len)
            .unwrap_or(0)
    }
}

impl Sink for &MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn load(&self, batches: &[Batch]) -> Result<LoadSummary, LoadError> {
        let mut staged = self.tables.lock().unwrap().clone();
        let mut summary = LoadSummary::default();

        for batch in batches {
            let rows = batch_rows(batch)?;
            let table = staged.entry(batch.schema().table).or_default();
            let mut inserted = 0;
            for row in &rows {
                assert!(matches!(row.last(), Some(SqlValue::Timestamp(_))));
                if table.insert(format!("{row:?}")) {
                    inserted += 1;
                }
            }
            summary.tables.push(TableLoad {
                kind: batch.kind,
                rows: rows.len(),
                inserted,
            });
        }

        *self.tables.lock().unwrap() = staged;
        *self.loads.lock().unwrap() += 1;
        Ok(summary)
    }
}

struct FailingSink;

impl Sink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    fn load(&self, _batches: &[Batch]) -> Result<LoadSummary, LoadError> {
        Err(LoadError::Runtime("database unavailable".into()))
    }
}

#[test]
fn run_loads_every_fixture_row() {
    let sink = MemorySink::default();
    let report = Pipeline::new(fixture_source(), &sink).run().unwrap();

    assert_eq!(report.kind(RecordKind::Asset).unwrap().inserted, 2);
    assert_eq!(report.kind(RecordKind::Rate).unwrap().inserted, 3);
    assert_eq!(report.kind(RecordKind::Exchange).unwrap().inserted, 2);
    assert_eq!(report.kind(RecordKind::Market).unwrap().fetched, 2);
    assert_eq!(report.total_inserted(), 9);
    assert_eq!(sink.row_count(RecordKind::Rate), 3);
}

#[test]
fn extract_shares_one_capture_time_across_kinds() {
    let sink = MemorySink::default();
    let batches = Pipeline::new(fixture_source(), &sink).extract().unwrap();

    assert_eq!(batches.len(), 4);
    let first = batches[0].captured_at;
    assert!(batches.iter().all(|b| b.captured_at == first));
    for batch in &batches {
        let dates = batch
            .frame
            .column(CAPTURED_AT_COLUMN)
            .unwrap()
            .as_materialized_series()
            .clone();
        assert_eq!(dates.n_unique().unwrap(), 1);
    }
    assert_eq!(*sink.loads.lock().unwrap(), 0);
}

#[test]
fn fixture_columns_are_typed_and_pruned() {
    let sink = MemorySink::default();
    let batches = Pipeline::new(fixture_source(), &sink).extract().unwrap();

    let exchange = batches.iter().find(|b| b.kind == RecordKind::Exchange).unwrap();
    for dropped in ["socket", "exchangeUrl", "updated"] {
        assert!(exchange.frame.column(dropped).is_err(), "{dropped} survived");
    }
    let pairs = exchange.frame.column("tradingPairs").unwrap().i64().unwrap().clone();
    assert_eq!(pairs.get(0), Some(1160));

    let market = batches.iter().find(|b| b.kind == RecordKind::Market).unwrap();
    assert!(market.frame.column("updated").is_err());
    let trades = market.frame.column("tradesCount24Hr").unwrap().f64().unwrap().clone();
    assert_eq!(trades.get(0), Some(381954.0));
    assert_eq!(trades.get(1), None);

    let asset = batches.iter().find(|b| b.kind == RecordKind::Asset).unwrap();
    assert!(asset.passthrough_columns().is_empty());
}

#[test]
fn rerunning_the_same_batch_is_idempotent() {
    let sink = MemorySink::default();
    let at = chrono::NaiveDate::from_ymd_opt(2023, 10, 5)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap();
    let payload = serde_json::json!({ "data": [{
        "id": "bitcoin", "rank": "1", "supply": "19000000", "maxSupply": "21000000",
        "marketCapUsd": "500000000000", "volumeUsd24Hr": "1000000", "priceUsd": "26000.5",
        "changePercent24Hr": "1.2", "vwap24Hr": "26010", "explorer": "http://x"
    }]});
    let batch = transform(RecordKind::Asset, &payload, at).unwrap();

    let first = (&sink).load(std::slice::from_ref(&batch)).unwrap();
    assert_eq!(first.table(RecordKind::Asset).unwrap().inserted, 1);

    let second = (&sink).load(std::slice::from_ref(&batch)).unwrap();
    assert_eq!(second.table(RecordKind::Asset).unwrap().inserted, 0);
    assert_eq!(second.table(RecordKind::Asset).unwrap().skipped(), 1);
    assert_eq!(sink.row_count(RecordKind::Asset), 1);
}

#[test]
fn fetch_failure_aborts_before_load() {
    let sink = MemorySink::default();
    let source = StaticSource::new().with(RecordKind::Asset, fixture("assets.json"));
    let err = Pipeline::new(source, &sink).run().unwrap_err();

    assert!(matches!(err, PipelineError::Fetch(FetchError::Missing(_))));
    assert_eq!(*sink.loads.lock().unwrap(), 0);
}

#[test]
fn coercion_failure_aborts_before_load() {
    let sink = MemorySink::default();
    let source = fixture_source().with(
        RecordKind::Rate,
        serde_json::json!({ "data": [{ "id": "usd", "rateUsd": "n/a" }] }),
    );
    let err = Pipeline::new(source, &sink).run().unwrap_err();

    assert!(matches!(err, PipelineError::Transform(_)));
    assert_eq!(*sink.loads.lock().unwrap(), 0);
    assert_eq!(sink.row_count(RecordKind::Asset), 0);
}

#[test]
fn load_failure_surfaces_as_pipeline_error() {
    let err = Pipeline::new(fixture_source(), FailingSink).run().unwrap_err();
    assert!(matches!(err, PipelineError::Load(LoadError::Runtime(_))));
}

#[test]
fn empty_resources_run_cleanly() {
    let sink = MemorySink::default();
    let report = Pipeline::new(StaticSource::empty(), &sink).run().unwrap();
    assert_eq!(report.kinds.len(), 4);
    assert_eq!(report.total_inserted(), 0);
    assert!(report.kinds.iter().all(|k| k.fetched == 0));
}

#[test]
fn extract_without_a_sink_matches_the_pipeline() {
    let batches = extract(&fixture_source()).unwrap();
    let kinds: Vec<RecordKind> = batches.iter().map(|b| b.kind).collect();
    assert_eq!(kinds, RecordKind::ALL.to_vec());
    assert_eq!(batches.iter().map(Batch::height).sum::<usize>(), 9);

    let err = extract(&StaticSource::new()).unwrap_err();
    assert!(matches!(err, PipelineError::Fetch(FetchError::Missing(_))));
}
