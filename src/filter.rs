use chrono::{DateTime, Utc};

use crate::types::CanonicalMarket;

/// Independent predicates applied to normalized markets before ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarketFilter {
    /// Case-insensitive substring of `category`. `None` passes everything.
    pub category: Option<String>,
    /// Markets reporting less volume are dropped; absent volume counts as 0.
    pub min_volume: Option<i64>,
    /// Drop markets whose known expiry is at or before `now`.
    pub future_only: bool,
}

impl MarketFilter {
    pub fn matches(&self, market: &CanonicalMarket, now: DateTime<Utc>) -> bool {
        self.category_matches(market) && self.volume_matches(market) && self.expiry_matches(market, now)
    }

    fn category_matches(&self, market: &CanonicalMarket) -> bool {
        let Some(wanted) = &self.category else {
            return true;
        };
        let wanted = wanted.to_lowercase();
        market
            .category
            .as_deref()
            .unwrap_or("")
            .to_lowercase()
            .contains(&wanted)
    }

    fn volume_matches(&self, market: &CanonicalMarket) -> bool {
        self.min_volume
            .map_or(true, |min| market.volume.unwrap_or(0) >= min)
    }

    /// Unknown expiry is never evidence of closure, so it always passes.
    fn expiry_matches(&self, market: &CanonicalMarket, now: DateTime<Utc>) -> bool {
        if !self.future_only {
            return true;
        }
        match market.expiry {
            Some(expiry) => expiry.naive_utc() > now.naive_utc(),
            None => true,
        }
    }
}

/// Keep the markets that pass every predicate, preserving input order.
pub fn filter_markets(
    markets: Vec<CanonicalMarket>,
    filter: &MarketFilter,
    now: DateTime<Utc>,
) -> Vec<CanonicalMarket> {
    markets.into_iter().filter(|m| filter.matches(m, now)).collect()
}
