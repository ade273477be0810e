//! Source adapters: one per prediction-market provider.
//!
//! An adapter owns everything provider-specific up to the normalizer boundary:
//! the HTTP endpoints it pulls from, the paging convention, and the typed raw
//! record each payload object is read into. Fields whose type varies between
//! payloads are kept as `serde_json::Value` so only the normalizer decides how
//! to interpret them.

pub mod kalshi;
pub mod polymarket;

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::config::Config;
use crate::types::Source;

pub use kalshi::{KalshiAdapter, KalshiMarket};
pub use polymarket::{PolymarketAdapter, PolymarketMarket};

/// A raw market record in its source's own shape.
#[derive(Debug, Clone, PartialEq)]
pub enum RawMarket {
    Kalshi(KalshiMarket),
    Polymarket(PolymarketMarket),
}

impl RawMarket {
    pub fn source(&self) -> Source {
        match self {
            RawMarket::Kalshi(_) => Source::Kalshi,
            RawMarket::Polymarket(_) => Source::Polymarket,
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    /// Fetch up to `limit` raw payload objects. Endpoints are tried in order;
    /// the attempt log of a total failure is carried by the returned error.
    async fn fetch(&self, client: &reqwest::Client, limit: usize) -> Result<Vec<Value>, FetchError>;

    /// Read one payload object into this source's raw record.
    fn parse(&self, payload: &Value) -> RawMarket;
}

/// Build the adapter for `source` from configuration.
pub fn adapter_for(source: Source, cfg: &Config) -> Box<dyn SourceAdapter> {
    match source {
        Source::Kalshi => Box::new(KalshiAdapter::new(cfg.kalshi_api_urls.clone())),
        Source::Polymarket => Box::new(PolymarketAdapter::new(vec![cfg.gamma_api_url.clone()])),
    }
}

// ---------------------------------------------------------------------------
// Fetch errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchAttempt {
    pub endpoint: String,
    pub error: String,
}

/// Every endpoint of a source failed. Surfaces as "zero markets this run".
#[derive(Debug, Clone, Error)]
#[error("{provider} fetch failed after {} attempt(s): {}", .attempts.len(), describe_attempts(.attempts))]
pub struct FetchError {
    pub provider: Source,
    pub attempts: Vec<FetchAttempt>,
}

fn describe_attempts(attempts: &[FetchAttempt]) -> String {
    if attempts.is_empty() {
        return "no endpoints configured".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{} ({})", a.endpoint, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Run `fetch` against each endpoint in order and return the first success.
pub async fn try_endpoints<T, F, Fut>(
    provider: Source,
    endpoints: &[String],
    mut fetch: F,
) -> Result<T, FetchError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let mut attempts = Vec::new();
    for endpoint in endpoints {
        match fetch(endpoint.clone()).await {
            Ok(v) => return Ok(v),
            Err(error) => {
                warn!(source = %provider, endpoint = %endpoint, "fetch attempt failed: {error}");
                attempts.push(FetchAttempt {
                    endpoint: endpoint.clone(),
                    error,
                });
            }
        }
    }
    Err(FetchError { provider, attempts })
}

/// GET `url` with query `params` and decode the body as JSON.
/// Errors are flattened to a message so they can join an attempt log.
pub(crate) async fn get_json(
    client: &reqwest::Client,
    url: &str,
    params: &[(&str, String)],
) -> Result<Value, String> {
    let url = reqwest::Url::parse_with_params(url, params).map_err(|e| format!("bad url {url}: {e}"))?;
    let resp = client.get(url).send().await.map_err(describe_http_error)?;
    let resp = resp.error_for_status().map_err(describe_http_error)?;
    resp.json::<Value>().await.map_err(describe_http_error)
}

fn describe_http_error(e: reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if let Some(status) = e.status() {
        format!("HTTP {status}")
    } else {
        e.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tolerant field readers shared by the adapters
// ---------------------------------------------------------------------------

/// A text field. Numbers are accepted (some ids arrive numeric); anything else is absent.
pub(crate) fn text_field(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First present text field among `keys`, skipping empty strings.
pub(crate) fn first_text(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| text_field(v, k))
        .find(|s| !s.trim().is_empty())
}

/// A field kept verbatim for the normalizer. JSON null reads as absent.
pub(crate) fn raw_field(v: &Value, key: &str) -> Option<Value> {
    v.get(key).filter(|x| !x.is_null()).cloned()
}

/// First non-null raw field among `keys`.
pub(crate) fn first_raw(v: &Value, keys: &[&str]) -> Option<Value> {
    keys.iter().find_map(|k| raw_field(v, k))
}

pub(crate) fn bool_field(v: &Value, key: &str) -> Option<bool> {
    match v.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

pub(crate) fn array_field(v: &Value, key: &str) -> Vec<Value> {
    v.get(key)
        .and_then(|a| a.as_array())
        .cloned()
        .unwrap_or_default()
}
