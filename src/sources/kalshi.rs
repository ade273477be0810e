use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{
    array_field, first_raw, first_text, get_json, raw_field, text_field, try_endpoints, FetchError,
    RawMarket, SourceAdapter,
};
use crate::config::KALSHI_PAGE_SIZE;
use crate::types::Source;

/// A Kalshi market as served by `GET /markets`.
///
/// Kalshi quotes in cents (0–100). Newer payloads also carry `*_dollars`
/// strings ("0.5600"); both are kept and the normalizer picks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KalshiMarket {
    pub ticker: Option<String>,
    /// `title`, falling back to `subtitle`.
    pub title: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<Value>,
    pub status: Option<String>,
    /// `close_time`, falling back to `expiration_time`.
    pub close_time: Option<String>,
    pub yes_bid: Option<Value>,
    pub yes_ask: Option<Value>,
    pub last_price: Option<Value>,
    pub yes_bid_dollars: Option<Value>,
    pub yes_ask_dollars: Option<Value>,
    pub last_price_dollars: Option<Value>,
    /// Lifetime contracts traded.
    pub volume: Option<Value>,
    pub volume_24h: Option<Value>,
    /// Resolved outcome (`yes` / `no`); empty until the market settles.
    pub result: Option<String>,
}

impl KalshiMarket {
    pub fn from_value(v: &Value) -> Self {
        Self {
            ticker: text_field(v, "ticker"),
            title: first_text(v, &["title", "subtitle"]),
            category: text_field(v, "category"),
            tags: array_field(v, "tags"),
            status: text_field(v, "status"),
            close_time: first_text(v, &["close_time", "expiration_time"]),
            yes_bid: raw_field(v, "yes_bid"),
            yes_ask: raw_field(v, "yes_ask"),
            last_price: raw_field(v, "last_price"),
            yes_bid_dollars: raw_field(v, "yes_bid_dollars"),
            yes_ask_dollars: raw_field(v, "yes_ask_dollars"),
            last_price_dollars: raw_field(v, "last_price_dollars"),
            volume: raw_field(v, "volume"),
            volume_24h: first_raw(v, &["volume_24h", "volume24h"]),
            result: text_field(v, "result"),
        }
    }
}

pub struct KalshiAdapter {
    endpoints: Vec<String>,
}

impl KalshiAdapter {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self { endpoints }
    }

    /// Pull open markets from one base URL, following `cursor` until `limit` is reached.
    async fn fetch_from(
        &self,
        client: &reqwest::Client,
        base: &str,
        limit: usize,
    ) -> Result<Vec<Value>, String> {
        let url = format!("{}/markets", base.trim_end_matches('/'));
        let mut markets = Vec::new();
        let mut cursor: Option<String> = None;

        while markets.len() < limit {
            let page_size = (limit - markets.len()).min(KALSHI_PAGE_SIZE);
            let mut params = vec![("limit", page_size.to_string()), ("status", "open".to_string())];
            if let Some(c) = &cursor {
                params.push(("cursor", c.clone()));
            }

            let resp = get_json(client, &url, &params).await?;
            let (items, next) = parse_markets_page(&resp)?;
            debug!(source = "kalshi", page = items.len(), "fetched markets page");

            let page_len = items.len();
            markets.extend(items);

            match next {
                Some(c) if page_len > 0 => cursor = Some(c),
                _ => break,
            }
        }

        markets.truncate(limit);
        Ok(markets)
    }
}

#[async_trait]
impl SourceAdapter for KalshiAdapter {
    fn source(&self) -> Source {
        Source::Kalshi
    }

    async fn fetch(&self, client: &reqwest::Client, limit: usize) -> Result<Vec<Value>, FetchError> {
        try_endpoints(Source::Kalshi, &self.endpoints, |base| async move {
            self.fetch_from(client, &base, limit).await
        })
        .await
    }

    fn parse(&self, payload: &Value) -> RawMarket {
        RawMarket::Kalshi(KalshiMarket::from_value(payload))
    }
}

/// Split a `GET /markets` response into its items and the next cursor.
/// A body without a `markets` array is a malformed top-level response.
fn parse_markets_page(resp: &Value) -> Result<(Vec<Value>, Option<String>), String> {
    let items = resp
        .get("markets")
        .and_then(|m| m.as_array())
        .cloned()
        .ok_or_else(|| "malformed response: no `markets` array".to_string())?;
    let cursor = resp
        .get("cursor")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(|c| c.to_string());
    Ok((items, cursor))
}
