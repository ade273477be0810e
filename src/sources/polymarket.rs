use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{
    array_field, bool_field, first_raw, first_text, get_json, raw_field, try_endpoints,
    FetchError, RawMarket, SourceAdapter,
};
use crate::config::GAMMA_PAGE_SIZE;
use crate::types::Source;

/// A Polymarket market as served by the Gamma `GET /markets` endpoint.
///
/// Gamma reports prices as 0–1 probabilities. `outcomePrices` usually arrives
/// as a JSON array encoded inside a string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolymarketMarket {
    /// `conditionId`, falling back to `condition_id`.
    pub condition_id: Option<String>,
    /// `question`, falling back to `title`.
    pub question: Option<String>,
    /// `category`, falling back to the first event's category.
    pub category: Option<String>,
    pub tags: Vec<Value>,
    pub active: Option<bool>,
    pub closed: Option<bool>,
    /// `endDate`, then `end_date_iso`, then `endDateIso`.
    pub end_date: Option<String>,
    pub outcome_prices: Option<Value>,
    pub best_bid: Option<Value>,
    pub best_ask: Option<Value>,
    pub last_trade_price: Option<Value>,
    /// Lifetime USD volume: `volume`, falling back to `volumeNum`.
    pub volume: Option<Value>,
}

impl PolymarketMarket {
    pub fn from_value(v: &Value) -> Self {
        let event_category = v
            .get("events")
            .and_then(|e| e.as_array())
            .and_then(|a| a.first())
            .and_then(|e| e.get("category"))
            .and_then(|c| c.as_str())
            .filter(|c| !c.trim().is_empty())
            .map(|c| c.to_string());

        Self {
            condition_id: first_text(v, &["conditionId", "condition_id"]),
            question: first_text(v, &["question", "title"]),
            category: first_text(v, &["category"]).or(event_category),
            tags: array_field(v, "tags"),
            active: bool_field(v, "active"),
            closed: bool_field(v, "closed"),
            end_date: first_text(v, &["endDate", "end_date_iso", "endDateIso"]),
            outcome_prices: raw_field(v, "outcomePrices"),
            best_bid: raw_field(v, "bestBid"),
            best_ask: raw_field(v, "bestAsk"),
            last_trade_price: raw_field(v, "lastTradePrice"),
            volume: first_raw(v, &["volume", "volumeNum"]),
        }
    }
}

pub struct PolymarketAdapter {
    endpoints: Vec<String>,
}

impl PolymarketAdapter {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self { endpoints }
    }

    /// Page through active, unclosed markets by offset until `limit` is reached.
    async fn fetch_from(
        &self,
        client: &reqwest::Client,
        base: &str,
        limit: usize,
    ) -> Result<Vec<Value>, String> {
        let url = format!("{}/markets", base.trim_end_matches('/'));
        let mut markets = Vec::new();
        let mut offset = 0usize;

        while markets.len() < limit {
            let page_size = (limit - markets.len()).min(GAMMA_PAGE_SIZE);
            let params = [
                ("limit", page_size.to_string()),
                ("offset", offset.to_string()),
                ("active", "true".to_string()),
                ("closed", "false".to_string()),
            ];

            let resp = get_json(client, &url, &params).await?;
            let items = match resp.as_array() {
                Some(a) => a.clone(),
                None => return Err("malformed response: GAMMA /markets was not an array".to_string()),
            };
            debug!(source = "polymarket", offset, page = items.len(), "fetched markets page");

            let page_len = items.len();
            markets.extend(items);
            if page_len < page_size {
                break;
            }
            offset += page_len;
        }

        markets.truncate(limit);
        Ok(markets)
    }
}

#[async_trait]
impl SourceAdapter for PolymarketAdapter {
    fn source(&self) -> Source {
        Source::Polymarket
    }

    async fn fetch(&self, client: &reqwest::Client, limit: usize) -> Result<Vec<Value>, FetchError> {
        try_endpoints(Source::Polymarket, &self.endpoints, |base| async move {
            self.fetch_from(client, &base, limit).await
        })
        .await
    }

    fn parse(&self, payload: &Value) -> RawMarket {
        RawMarket::Polymarket(PolymarketMarket::from_value(payload))
    }
}
