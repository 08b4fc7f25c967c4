//! Market data source trait and structured fetch errors.
//!
//! The `MarketSource` trait abstracts over where raw payloads come from (the
//! CoinCap HTTP API, or fixtures in tests) so the pipeline can be exercised
//! without network access.

use crate::record::RecordKind;
use serde_json::Value;
use thiserror::Error;

/// Errors raised while fetching a resource. All are fatal to a run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("network error fetching {resource}: {message}")]
    Network { resource: &'static str, message: String },

    #[error("HTTP {status} from {resource}")]
    Status { resource: &'static str, status: u16 },

    #[error("response from {resource} is not valid JSON: {message}")]
    InvalidJson { resource: &'static str, message: String },

    #[error("no fixture registered for {0}")]
    Missing(&'static str),
}

/// Raw, unmodified JSON payloads of one fetch round.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub assets: Value,
    pub rates: Value,
    pub exchanges: Value,
    pub markets: Value,
}

impl Snapshot {
    pub fn payload(&self, kind: RecordKind) -> &Value {
        match kind {
            RecordKind::Asset => &self.assets,
            RecordKind::Rate => &self.rates,
            RecordKind::Exchange => &self.exchanges,
            RecordKind::Market => &self.markets,
        }
    }
}

/// A source of raw market payloads.
///
/// Implementations return the parsed JSON body unchanged; unwrapping the
/// `data` list is the transform stage's job.
pub trait MarketSource {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetch the raw payload for one record kind.
    fn fetch(&self, kind: RecordKind) -> Result<Value, FetchError>;

    fn get_assets(&self) -> Result<Value, FetchError> {
        self.fetch(RecordKind::Asset)
    }

    fn get_rates(&self) -> Result<Value, FetchError> {
        self.fetch(RecordKind::Rate)
    }

    fn get_exchanges(&self) -> Result<Value, FetchError> {
        self.fetch(RecordKind::Exchange)
    }

    fn get_markets(&self) -> Result<Value, FetchError> {
        self.fetch(RecordKind::Market)
    }

    /// Fetch all four resources in order. The first failure aborts the round.
    fn snapshot(&self) -> Result<Snapshot, FetchError> {
        Ok(Snapshot {
            rates: self.get_rates()?,
            assets: self.get_assets()?,
            exchanges: self.get_exchanges()?,
            markets: self.get_markets()?,
        })
    }
}

/// In-memory source serving canned payloads.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    assets: Option<Value>,
    rates: Option<Value>,
    exchanges: Option<Value>,
    markets: Option<Value>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: RecordKind, payload: Value) -> Self {
        let slot = match kind {
            RecordKind::Asset => &mut self.assets,
            RecordKind::Rate => &mut self.rates,
            RecordKind::Exchange => &mut self.exchanges,
            RecordKind::Market => &mut self.markets,
        };
        *slot = Some(payload);
        self
    }

    /// A source where every resource returns `{"data": []}`.
    pub fn empty() -> Self {
        RecordKind::ALL
            .into_iter()
            .fold(Self::new(), |src, kind| src.with(kind, serde_json::json!({ "data": [] })))
    }
}

impl MarketSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    fn fetch(&self, kind: RecordKind) -> Result<Value, FetchError> {
        let slot = match kind {
            RecordKind::Asset => &self.assets,
            RecordKind::Rate => &self.rates,
            RecordKind::Exchange => &self.exchanges,
            RecordKind::Market => &self.markets,
        };
        slot.clone().ok_or(FetchError::Missing(kind.resource()))
    }
}
