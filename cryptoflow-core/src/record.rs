//! Record kinds and their declarative column schemas.
//!
//! Each record kind maps one CoinCap resource to one destination table. The
//! schema tables below are the only place column names, scalar types and
//! pruned fields are written down; the transform and load stages are driven
//! entirely by them.

use polars::prelude::{DataFrame, DataType, Field, Schema, SchemaExt, TimeUnit};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the capture timestamp column appended to every batch.
pub const CAPTURED_AT_COLUMN: &str = "date";

/// The four data categories handled by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Asset,
    Rate,
    Exchange,
    Market,
}

impl RecordKind {
    /// All kinds, in pipeline order.
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Asset,
        RecordKind::Rate,
        RecordKind::Exchange,
        RecordKind::Market,
    ];

    /// Resource path under the API base URL.
    pub fn resource(self) -> &'static str {
        match self {
            RecordKind::Asset => "assets",
            RecordKind::Rate => "rates",
            RecordKind::Exchange => "exchanges",
            RecordKind::Market => "markets",
        }
    }

    /// Declarative schema for this kind.
    pub fn schema(self) -> &'static RecordSchema {
        match self {
            RecordKind::Asset => &ASSET,
            RecordKind::Rate => &RATE,
            RecordKind::Exchange => &EXCHANGE,
            RecordKind::Market => &MARKET,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.schema().table)
    }
}

/// Target scalar type of a declared column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Text,
    Int,
    Float,
}

impl ColumnType {
    pub fn dtype(self) -> DataType {
        match self {
            ColumnType::Text => DataType::String,
            ColumnType::Int => DataType::Int64,
            ColumnType::Float => DataType::Float64,
        }
    }
}

/// One declared column: source field name, destination column name, type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub source: &'static str,
    pub dest: &'static str,
    pub kind: ColumnType,
}

const fn text(source: &'static str, dest: &'static str) -> ColumnSpec {
    ColumnSpec { source, dest, kind: ColumnType::Text }
}

const fn int(source: &'static str, dest: &'static str) -> ColumnSpec {
    ColumnSpec { source, dest, kind: ColumnType::Int }
}

const fn float(source: &'static str, dest: &'static str) -> ColumnSpec {
    ColumnSpec { source, dest, kind: ColumnType::Float }
}

/// Column typing and pruning rules for one record kind.
#[derive(Debug)]
pub struct RecordSchema {
    pub kind: RecordKind,
    /// Destination table name.
    pub table: &'static str,
    /// Declared columns in destination order. The capture timestamp is not
    /// listed; it is always appended last.
    pub columns: &'static [ColumnSpec],
    /// Source fields removed before typing.
    pub dropped: &'static [&'static str],
}

impl RecordSchema {
    pub fn column(&self, source: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.source == source)
    }

    pub fn is_dropped(&self, source: &str) -> bool {
        self.dropped.contains(&source)
    }

    /// Destination column list, capture timestamp included, in insert order.
    pub fn dest_columns(&self) -> Vec<&'static str> {
        self.columns
            .iter()
            .map(|c| c.dest)
            .chain(std::iter::once(CAPTURED_AT_COLUMN))
            .collect()
    }

    /// Polars schema of the declared part of a transformed batch.
    pub fn frame_schema(&self) -> Schema {
        Schema::from_iter(
            self.columns
                .iter()
                .map(|c| Field::new(c.source.into(), c.kind.dtype()))
                .chain(std::iter::once(Field::new(
                    CAPTURED_AT_COLUMN.into(),
                    captured_at_dtype(),
                ))),
        )
    }

    /// Check that a frame carries every declared column with its declared type.
    ///
    /// Extra passthrough columns are allowed.
    pub fn validate(&self, df: &DataFrame) -> Result<(), SchemaError> {
        let expected = self.frame_schema();
        let actual = df.schema();

        for field in expected.iter_fields() {
            let actual_dtype = actual
                .get(field.name())
                .ok_or_else(|| SchemaError::MissingColumn(field.name().to_string()))?;
            if actual_dtype != field.dtype() {
                return Err(SchemaError::TypeMismatch {
                    column: field.name().to_string(),
                    expected: field.dtype().clone(),
                    actual: actual_dtype.clone(),
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("missing required column: {0}")]
    MissingColumn(String),

    #[error("type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },
}

/// Data type of the capture timestamp column.
pub fn captured_at_dtype() -> DataType {
    DataType::Datetime(TimeUnit::Microseconds, None)
}

pub static ASSET: RecordSchema = RecordSchema {
    kind: RecordKind::Asset,
    table: "asset",
    columns: &[
        text("id", "id"),
        int("rank", "rank"),
        text("symbol", "symbol"),
        text("name", "name"),
        float("supply", "supply"),
        float("maxSupply", "maxsupply"),
        float("marketCapUsd", "marketcapusd"),
        float("volumeUsd24Hr", "volumeusd24hr"),
        float("priceUsd", "priceusd"),
        float("changePercent24Hr", "changepercent24hr"),
    ],
    dropped: &["vwap24Hr", "explorer"],
};

pub static RATE: RecordSchema = RecordSchema {
    kind: RecordKind::Rate,
    table: "rates",
    columns: &[
        text("id", "id"),
        text("symbol", "symbol"),
        text("currencySymbol", "currencysymbol"),
        text("type", "type"),
        float("rateUsd", "rateusd"),
    ],
    dropped: &[],
};

pub static EXCHANGE: RecordSchema = RecordSchema {
    kind: RecordKind::Exchange,
    table: "exchange",
    columns: &[
        text("exchangeId", "exchangeid"),
        text("name", "name"),
        int("rank", "rank"),
        float("percentTotalVolume", "percenttotalvolume"),
        float("volumeUsd", "volumeusd"),
        int("tradingPairs", "tradingpairs"),
    ],
    dropped: &["socket", "exchangeUrl", "updated"],
};

pub static MARKET: RecordSchema = RecordSchema {
    kind: RecordKind::Market,
    table: "market",
    columns: &[
        text("exchangeId", "exchangeid"),
        int("rank", "rank"),
        text("baseSymbol", "basesymbol"),
        text("baseId", "baseid"),
        text("quoteSymbol", "quotesymbol"),
        text("quoteId", "quoteid"),
        float("priceQuote", "pricequote"),
        float("priceUsd", "priceusd"),
        float("volumeUsd24Hr", "volumeusd24hr"),
        float("percentExchangeVolume", "percentexchangevolume"),
        float("tradesCount24Hr", "tradescount"),
    ],
    dropped: &["updated"],
};
