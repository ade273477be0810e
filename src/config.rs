use std::time::Duration;

use crate::error::{AppError, Result};
use crate::filter::MarketFilter;
use crate::types::Source;

/// Kalshi public endpoints, tried in order until one answers.
pub const KALSHI_API_URLS: &[&str] = &[
    "https://api.elections.kalshi.com/trade-api/v2",
    "https://trading-api.kalshi.com/trade-api/v2",
];
pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";

pub const DEFAULT_DB_PATH: &str = "prediction_pulse.db";

/// Per-request HTTP timeout (seconds).
pub const FETCH_TIMEOUT_SECS: u64 = 30;

/// Markets requested per source per run.
pub const DEFAULT_INGEST_LIMIT: usize = 100;

/// Kalshi caps `limit` at 1000; Gamma pages are kept smaller.
pub const KALSHI_PAGE_SIZE: usize = 1000;
pub const GAMMA_PAGE_SIZE: usize = 500;

/// How many per-market errors the run summary prints before collapsing the rest.
pub const ERROR_SAMPLE_SIZE: usize = 5;

/// Default look-back for the price history endpoint.
pub const HISTORY_DEFAULT_DAYS: i64 = 7;
/// Upper bound on the history look-back; larger requests are clamped.
pub const HISTORY_MAX_DAYS: i64 = 3650;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Sources to ingest this run (INGEST_SOURCES, comma-separated).
    pub sources: Vec<Source>,
    /// Max markets fetched per source (INGEST_LIMIT)
    pub ingest_limit: usize,
    /// Ordered Kalshi base URLs (KALSHI_API_URLS, comma-separated)
    pub kalshi_api_urls: Vec<String>,
    pub gamma_api_url: String,
    /// HTTP timeout in seconds (FETCH_TIMEOUT_SECS)
    pub fetch_timeout_secs: u64,
    /// Case-insensitive category substring (FILTER_CATEGORY)
    pub filter_category: Option<String>,
    /// Minimum source-reported volume (FILTER_MIN_VOLUME)
    pub filter_min_volume: Option<i64>,
    /// Keep markets whose expiry has passed (INCLUDE_EXPIRED)
    pub include_expired: bool,
    pub error_sample_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            sources: parse_sources(
                &std::env::var("INGEST_SOURCES").unwrap_or_else(|_| "kalshi,polymarket".to_string()),
            )?,
            ingest_limit: std::env::var("INGEST_LIMIT")
                .ok()
                .map(|s| s.parse::<usize>())
                .transpose()
                .map_err(|_| AppError::Config("INGEST_LIMIT must be a positive integer".to_string()))?
                .unwrap_or(DEFAULT_INGEST_LIMIT),
            kalshi_api_urls: std::env::var("KALSHI_API_URLS")
                .map(|v| split_list(&v))
                .ok()
                .filter(|urls| !urls.is_empty())
                .unwrap_or_else(|| KALSHI_API_URLS.iter().map(|u| u.to_string()).collect()),
            gamma_api_url: std::env::var("GAMMA_API_URL")
                .unwrap_or_else(|_| GAMMA_API_URL.to_string()),
            fetch_timeout_secs: std::env::var("FETCH_TIMEOUT_SECS")
                .unwrap_or_else(|_| FETCH_TIMEOUT_SECS.to_string())
                .parse::<u64>()
                .unwrap_or(FETCH_TIMEOUT_SECS),
            filter_category: std::env::var("FILTER_CATEGORY")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            filter_min_volume: std::env::var("FILTER_MIN_VOLUME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().parse::<i64>())
                .transpose()
                .map_err(|_| AppError::Config("FILTER_MIN_VOLUME must be an integer".to_string()))?,
            include_expired: std::env::var("INCLUDE_EXPIRED")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            error_sample_size: std::env::var("ERROR_SAMPLE_SIZE")
                .unwrap_or_else(|_| ERROR_SAMPLE_SIZE.to_string())
                .parse::<usize>()
                .unwrap_or(ERROR_SAMPLE_SIZE),
        })
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn market_filter(&self) -> MarketFilter {
        MarketFilter {
            category: self.filter_category.clone(),
            min_volume: self.filter_min_volume,
            future_only: !self.include_expired,
        }
    }

    /// sqlx connection URL for `db_path`.
    pub fn database_url(&self) -> String {
        format!("sqlite:{}", self.db_path)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_sources(raw: &str) -> Result<Vec<Source>> {
    let mut sources = Vec::new();
    for name in split_list(raw) {
        let source = Source::from_name(&name)
            .ok_or_else(|| AppError::Config(format!("unknown source in INGEST_SOURCES: {name}")))?;
        if !sources.contains(&source) {
            sources.push(source);
        }
    }
    if sources.is_empty() {
        return Err(AppError::Config("INGEST_SOURCES names no source".to_string()));
    }
    Ok(sources)
}
