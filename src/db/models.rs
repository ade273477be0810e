//! Database row types matching `migrations/0001_init.sql`.
//! Timestamps are unix nanoseconds (UTC).
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct MarketRow {
    pub market_id: String,
    pub source: String,
    pub title: String,
    pub category: Option<String>,
    pub status: String,
    pub expiry_ts: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct ContractRow {
    pub contract_ticker: String,
    pub market_id: String,
    pub side: String,
    pub description: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct PriceRow {
    pub id: i64,
    pub contract_id: String,
    pub timestamp: i64,
    pub bid_price: Option<f64>,
    pub ask_price: Option<f64>,
    pub last_price: Option<f64>,
    pub volume: Option<i64>,
}

/// One contract of a market joined with its most recent snapshot.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct LatestQuoteRow {
    pub market_id: String,
    pub source: String,
    pub title: String,
    pub category: Option<String>,
    pub status: String,
    pub expiry_ts: Option<i64>,
    pub updated_at: i64,
    pub contract_ticker: String,
    pub side: String,
    pub last_price: Option<f64>,
    pub bid_price: Option<f64>,
    pub ask_price: Option<f64>,
    pub volume: Option<i64>,
    pub price_timestamp: i64,
}

/// Returned by a market upsert.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MarketHandle {
    pub market_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Returned by a contract upsert; snapshots are appended against it.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ContractHandle {
    pub contract_ticker: String,
    pub market_id: String,
    pub side: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub markets: i64,
    pub contracts: i64,
    pub prices: i64,
}
