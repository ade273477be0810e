//! Maps source-specific raw records onto the canonical market schema.

pub mod fields;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::sources::{KalshiMarket, PolymarketMarket, RawMarket};
use crate::types::{market_id, CanonicalMarket, ContractQuote, MarketStatus, Source};

/// Why a raw record was excluded from the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("{0} record has no native identifier")]
    MissingId(Source),
    #[error("{source_name} record {native_id} has no title")]
    MissingTitle { source_name: Source, native_id: String },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NormalizeStats {
    pub accepted: usize,
    pub rejected_missing_id: usize,
    pub rejected_missing_title: usize,
}

impl NormalizeStats {
    pub fn rejected(&self) -> usize {
        self.rejected_missing_id + self.rejected_missing_title
    }
}

/// Normalize one raw record. Only a missing identity or title rejects it;
/// every other field degrades to absent.
pub fn normalize(raw: &RawMarket) -> Result<CanonicalMarket, Rejection> {
    match raw {
        RawMarket::Kalshi(m) => normalize_kalshi(m),
        RawMarket::Polymarket(m) => normalize_polymarket(m),
    }
}

/// Normalize a batch, dropping rejects and counting them.
pub fn normalize_all(raws: &[RawMarket]) -> (Vec<CanonicalMarket>, NormalizeStats) {
    let mut stats = NormalizeStats::default();
    let mut markets = Vec::with_capacity(raws.len());

    for raw in raws {
        match normalize(raw) {
            Ok(market) => {
                stats.accepted += 1;
                markets.push(market);
            }
            Err(rejection) => {
                debug!("[NORMALIZE] rejected: {rejection}");
                match rejection {
                    Rejection::MissingId(_) => stats.rejected_missing_id += 1,
                    Rejection::MissingTitle { .. } => stats.rejected_missing_title += 1,
                }
            }
        }
    }

    (markets, stats)
}

/// Validate the two upsert keys shared by every source.
fn identity(
    source: Source,
    native_id: Option<&str>,
    title: Option<&str>,
) -> Result<(String, String), Rejection> {
    let native_id = native_id
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(Rejection::MissingId(source))?;
    let title = title
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Rejection::MissingTitle {
            source_name: source,
            native_id: native_id.to_string(),
        })?;
    Ok((market_id(source, native_id), title.to_string()))
}

fn expiry(raw: Option<&String>) -> Option<chrono::DateTime<chrono::Utc>> {
    raw.and_then(|s| fields::expiry(s))
}

fn parse_with(v: Option<&Value>, f: fn(&Value) -> Option<f64>) -> Option<f64> {
    v.and_then(f)
}

// ---------------------------------------------------------------------------
// Kalshi
// ---------------------------------------------------------------------------

fn normalize_kalshi(m: &KalshiMarket) -> Result<CanonicalMarket, Rejection> {
    let (market_id, title) = identity(Source::Kalshi, m.ticker.as_deref(), m.title.as_deref())?;

    // Cents first; the dollar strings only stand in when cents are missing or malformed.
    let price = |cents: Option<&Value>, dollars: Option<&Value>| {
        parse_with(cents, fields::percent).or_else(|| parse_with(dollars, fields::probability))
    };

    let volume_24h = m.volume_24h.as_ref().and_then(fields::integer);
    let quote = ContractQuote {
        bid: price(m.yes_bid.as_ref(), m.yes_bid_dollars.as_ref()),
        ask: price(m.yes_ask.as_ref(), m.yes_ask_dollars.as_ref()),
        last: price(m.last_price.as_ref(), m.last_price_dollars.as_ref()),
        volume: volume_24h,
        ..ContractQuote::yes()
    };

    Ok(CanonicalMarket {
        market_id,
        source: Source::Kalshi,
        title,
        category: fields::category(m.category.as_deref(), &m.tags),
        status: kalshi_status(m.status.as_deref(), m.result.as_deref()),
        expiry: expiry(m.close_time.as_ref()),
        volume: m.volume.as_ref().and_then(fields::integer).or(volume_24h),
        contracts: vec![quote],
    })
}

/// A reported result means the market has resolved, whatever `status` says.
fn kalshi_status(raw: Option<&str>, result: Option<&str>) -> MarketStatus {
    if result.is_some_and(|r| !r.trim().is_empty()) {
        return MarketStatus::Settled;
    }
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("closed") => MarketStatus::Closed,
        Some("settled" | "finalized" | "determined") => MarketStatus::Settled,
        _ => MarketStatus::Open,
    }
}

// ---------------------------------------------------------------------------
// Polymarket
// ---------------------------------------------------------------------------

fn normalize_polymarket(m: &PolymarketMarket) -> Result<CanonicalMarket, Rejection> {
    let (market_id, title) = identity(
        Source::Polymarket,
        m.condition_id.as_deref(),
        m.question.as_deref(),
    )?;

    // A non-empty outcome-price array is authoritative, even when it fails to parse.
    let outcome_prices = m.outcome_prices.as_ref().filter(|p| !is_blank(p));
    let last = match outcome_prices {
        Some(prices) => fields::outcome_price(prices),
        None => parse_with(m.best_ask.as_ref(), fields::probability)
            .or_else(|| parse_with(m.last_trade_price.as_ref(), fields::probability)),
    };

    let volume = m.volume.as_ref().and_then(fields::integer);
    let quote = ContractQuote {
        bid: parse_with(m.best_bid.as_ref(), fields::probability),
        ask: parse_with(m.best_ask.as_ref(), fields::probability),
        last,
        volume,
        ..ContractQuote::yes()
    };

    let status = if m.closed == Some(true) {
        MarketStatus::Closed
    } else if m.active == Some(true) {
        MarketStatus::Open
    } else {
        MarketStatus::Closed
    };

    Ok(CanonicalMarket {
        market_id,
        source: Source::Polymarket,
        title,
        category: fields::category(m.category.as_deref(), &m.tags),
        status,
        expiry: expiry(m.end_date.as_ref()),
        volume,
        contracts: vec![quote],
    })
}

/// `""` and `[]` carry no prices and count as absent.
fn is_blank(v: &Value) -> bool {
    match v {
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
