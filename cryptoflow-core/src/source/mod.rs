//! Fetch stage: raw payloads from the market data API.

pub mod coincap;
pub mod provider;

pub use coincap::CoinCapClient;
pub use provider::{FetchError, MarketSource, Snapshot, StaticSource};
