//! Parquet export of transformed batches.
//!
//! Layout: `{dir}/{table}.parquet`. Writes are atomic: write to `.tmp`, then
//! rename into place.

use crate::transform::Batch;
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to create export dir {path}: {message}")]
    CreateDir { path: String, message: String },

    #[error("parquet I/O error for {table}: {message}")]
    Parquet { table: &'static str, message: String },
}

/// Write each batch to `{dir}/{table}.parquet`, returning the written paths.
pub fn export_parquet(batches: &[Batch], dir: &Path) -> Result<Vec<PathBuf>, ExportError> {
    fs::create_dir_all(dir).map_err(|e| ExportError::CreateDir {
        path: dir.display().to_string(),
        message: e.to_string(),
    })?;

    batches.iter().map(|batch| write_batch(batch, dir)).collect()
}

fn write_batch(batch: &Batch, dir: &Path) -> Result<PathBuf, ExportError> {
    let table = batch.schema().table;
    let parquet_err = |message: String| ExportError::Parquet { table, message };

    let path = dir.join(format!("{table}.parquet"));
    let tmp_path = path.with_extension("parquet.tmp");

    let file = fs::File::create(&tmp_path).map_err(|e| parquet_err(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut batch.frame.clone())
        .map_err(|e| parquet_err(format!("write parquet: {e}")))?;

    fs::rename(&tmp_path, &path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        parquet_err(format!("atomic rename failed: {e}"))
    })?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordKind;
    use crate::transform::transform;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn exports_one_file_per_table_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let at = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let rates = transform(
            RecordKind::Rate,
            &json!({ "data": [{ "id": "usd", "symbol": "USD", "rateUsd": "1" }] }),
            at,
        )
        .unwrap();
        let markets = transform(RecordKind::Market, &json!({ "data": [] }), at).unwrap();

        let paths = export_parquet(&[rates, markets], dir.path()).unwrap();
        assert_eq!(paths, vec![dir.path().join("rates.parquet"), dir.path().join("market.parquet")]);
        assert!(!dir.path().join("rates.parquet.tmp").exists());

        let file = fs::File::open(&paths[0]).unwrap();
        let df = ParquetReader::new(file).finish().unwrap();
        assert_eq!(df.height(), 1);
        assert_eq!(df.column("rateUsd").unwrap().f64().unwrap().get(0), Some(1.0));
    }
}
