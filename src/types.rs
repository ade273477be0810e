use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Kalshi,
    Polymarket,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::Kalshi, Source::Polymarket];

    /// Prefix used to namespace native ids into `market_id`.
    pub fn tag(self) -> &'static str {
        match self {
            Source::Kalshi => "kalshi",
            Source::Polymarket => "poly",
        }
    }

    /// Value stored in `markets.source`.
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Kalshi => "kalshi",
            Source::Polymarket => "polymarket",
        }
    }

    /// Accepts the stored name or the id tag, case-insensitively.
    pub fn from_name(s: &str) -> Option<Self> {
        let s = s.trim();
        Source::ALL
            .into_iter()
            .find(|src| s.eq_ignore_ascii_case(src.as_str()) || s.eq_ignore_ascii_case(src.tag()))
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Market status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Open,
    Closed,
    Settled,
}

impl MarketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MarketStatus::Open => "open",
            MarketStatus::Closed => "closed",
            MarketStatus::Settled => "settled",
        }
    }
}

impl std::fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Canonical market
// ---------------------------------------------------------------------------

/// The primary side every reference source exposes.
pub const YES_SIDE: &str = "YES";

/// A source-independent prediction market, ready for filtering and ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMarket {
    /// `"<source tag>_<native id>"`.
    pub market_id: String,
    pub source: Source,
    pub title: String,
    pub category: Option<String>,
    pub status: MarketStatus,
    pub expiry: Option<DateTime<Utc>>,
    /// Source-reported volume used by the volume filter. The reporting window
    /// differs per source and is deliberately left as reported.
    pub volume: Option<i64>,
    pub contracts: Vec<ContractQuote>,
}

/// One tradeable side of a market with the prices observed this run.
/// Prices are implied probability on a 0–100 scale; `None` means not reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractQuote {
    pub side: String,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
    pub volume: Option<i64>,
}

impl ContractQuote {
    pub fn yes() -> Self {
        Self {
            side: YES_SIDE.to_string(),
            bid: None,
            ask: None,
            last: None,
            volume: None,
        }
    }
}

/// Build the namespaced market id. Pure: same inputs, same id.
pub fn market_id(source: Source, native_id: &str) -> String {
    format!("{}_{}", source.tag(), native_id)
}

/// Build the contract ticker for one side of a market. Pure: same inputs, same ticker.
pub fn contract_ticker(market_id: &str, side: &str) -> String {
    format!("{market_id}_{side}")
}
