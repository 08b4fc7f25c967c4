//! cryptoflow core: the CoinCap market data ETL.
//!
//! This crate contains the three pipeline stages and their glue:
//! - Fetch: raw JSON payloads from the CoinCap REST API (`source`)
//! - Transform: schema-driven typing and pruning into Polars frames
//!   (`record`, `transform`)
//! - Load: conflict-skipping bulk upserts into PostgreSQL in one
//!   transaction (`load`)
//! - Configuration, Parquet export and the pipeline runner

pub mod config;
pub mod export;
pub mod load;
pub mod pipeline;
pub mod record;
pub mod source;
pub mod transform;

pub use config::Config;
pub use load::{LoadSummary, PostgresLoader, Sink};
pub use pipeline::{Pipeline, PipelineError, RunReport};
pub use record::RecordKind;
pub use source::{CoinCapClient, MarketSource};
pub use transform::Batch;
