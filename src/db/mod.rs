pub mod models;
pub mod store;

use chrono::{DateTime, Utc};

pub use models::{ContractHandle, LatestQuoteRow, MarketHandle, MarketRow, PriceRow, StoreCounts};
pub use store::{MarketQuery, MarketScope, Store, StoreBatch};

/// Unix nanoseconds as stored in every timestamp column. Instants outside the
/// representable range (before 1677 or after 2262) saturate toward their own side.
pub fn to_ns(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt()
        .unwrap_or(if ts.timestamp() < 0 { i64::MIN } else { i64::MAX })
}

pub fn from_ns(ns: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(ns)
}
