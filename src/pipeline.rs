//! One ingestion run: fetch every configured source concurrently, then
//! normalize, filter and ingest each source's records in turn.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde_json::Value;
use tracing::{error, info};

use crate::config::Config;
use crate::db::Store;
use crate::error::Result;
use crate::filter::{filter_markets, MarketFilter};
use crate::ingest::{ingest_at, IngestionStats};
use crate::normalizer::{normalize_all, NormalizeStats};
use crate::sources::{adapter_for, RawMarket, SourceAdapter};
use crate::types::Source;

/// What happened to one source's records during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReport {
    pub source: Source,
    pub fetched: usize,
    pub normalize: NormalizeStats,
    /// Normalized markets dropped by the filter.
    pub filtered_out: usize,
    pub ingest: IngestionStats,
    /// Set when every endpoint failed; the source then contributes nothing.
    pub fetch_error: Option<String>,
}

impl SourceReport {
    fn empty(source: Source) -> Self {
        Self {
            source,
            fetched: 0,
            normalize: NormalizeStats::default(),
            filtered_out: 0,
            ingest: IngestionStats::default(),
            fetch_error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub sources: Vec<SourceReport>,
}

impl RunReport {
    /// Ingestion stats summed over all sources.
    pub fn totals(&self) -> IngestionStats {
        let mut total = IngestionStats::default();
        for report in &self.sources {
            total.absorb(report.ingest.clone());
        }
        total
    }
}

pub fn http_client(cfg: &Config) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(cfg.fetch_timeout())
        .user_agent(concat!("prediction-pulse/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Run the pipeline once for every source in `cfg.sources`.
pub async fn run_once(cfg: &Config, store: &Store) -> Result<RunReport> {
    let client = http_client(cfg)?;
    let adapters: Vec<Box<dyn SourceAdapter>> = cfg
        .sources
        .iter()
        .map(|&source| adapter_for(source, cfg))
        .collect();
    run_adapters(
        &adapters,
        &client,
        cfg.ingest_limit,
        &cfg.market_filter(),
        store,
        Utc::now(),
    )
    .await
}

/// Fetch from all adapters concurrently, then process each source's payloads
/// sequentially against the store. A source whose fetch failed is reported
/// with zero records and does not abort the run.
pub async fn run_adapters(
    adapters: &[Box<dyn SourceAdapter>],
    client: &reqwest::Client,
    limit: usize,
    filter: &MarketFilter,
    store: &Store,
    now: DateTime<Utc>,
) -> Result<RunReport> {
    let fetches = join_all(adapters.iter().map(|a| a.fetch(client, limit))).await;

    let mut report = RunReport::default();
    for (adapter, fetched) in adapters.iter().zip(fetches) {
        let source_report = match fetched {
            Ok(payloads) => {
                info!(source = %adapter.source(), count = payloads.len(), "[FETCH] fetched raw markets");
                ingest_payloads(&**adapter, &payloads, filter, store, now).await?
            }
            Err(e) => {
                error!(source = %adapter.source(), "[FETCH] {e}");
                SourceReport {
                    fetch_error: Some(e.to_string()),
                    ..SourceReport::empty(adapter.source())
                }
            }
        };
        report.sources.push(source_report);
    }
    Ok(report)
}

/// Parse, normalize, filter and ingest one source's payload objects.
pub async fn ingest_payloads(
    adapter: &dyn SourceAdapter,
    payloads: &[Value],
    filter: &MarketFilter,
    store: &Store,
    now: DateTime<Utc>,
) -> Result<SourceReport> {
    let source = adapter.source();
    let raws: Vec<RawMarket> = payloads.iter().map(|p| adapter.parse(p)).collect();

    let (markets, normalize) = normalize_all(&raws);
    let normalized = markets.len();
    let markets = filter_markets(markets, filter, now);
    let filtered_out = normalized - markets.len();

    info!(
        source = %source,
        accepted = normalize.accepted,
        rejected_missing_id = normalize.rejected_missing_id,
        rejected_missing_title = normalize.rejected_missing_title,
        filtered_out,
        "[FILTER] {source}: {} of {} records kept",
        markets.len(),
        payloads.len(),
    );

    let ingest = ingest_at(&markets, store, now).await?;

    Ok(SourceReport {
        source,
        fetched: payloads.len(),
        normalize,
        filtered_out,
        ingest,
        fetch_error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{FetchAttempt, FetchError, KalshiAdapter};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;

    struct FailingAdapter;

    #[async_trait]
    impl SourceAdapter for FailingAdapter {
        fn source(&self) -> Source {
            Source::Polymarket
        }

        async fn fetch(&self, _client: &reqwest::Client, _limit: usize) -> std::result::Result<Vec<Value>, FetchError> {
            Err(FetchError {
                provider: Source::Polymarket,
                attempts: vec![FetchAttempt {
                    endpoint: "http://gamma.invalid".to_string(),
                    error: "HTTP 503 Service Unavailable".to_string(),
                }],
            })
        }

        fn parse(&self, _payload: &Value) -> RawMarket {
            unreachable!("no payloads from a failed fetch")
        }
    }

    /// Serves a fixed Kalshi page without touching the network.
    struct CannedKalshi(Vec<Value>);

    #[async_trait]
    impl SourceAdapter for CannedKalshi {
        fn source(&self) -> Source {
            Source::Kalshi
        }

        async fn fetch(&self, _client: &reqwest::Client, limit: usize) -> std::result::Result<Vec<Value>, FetchError> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }

        fn parse(&self, payload: &Value) -> RawMarket {
            KalshiAdapter::new(Vec::new()).parse(payload)
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn failed_source_contributes_nothing() {
        let store = Store::in_memory().await.unwrap();
        let adapters: Vec<Box<dyn SourceAdapter>> = vec![
            Box::new(CannedKalshi(vec![json!({"ticker": "CPI-26", "title": "CPI above 3%?", "last_price": 55})])),
            Box::new(FailingAdapter),
        ];

        let report = run_adapters(&adapters, &reqwest::Client::new(), 10, &MarketFilter::default(), &store, now())
            .await
            .unwrap();

        assert_eq!(report.sources.len(), 2);
        assert_eq!(report.sources[0].ingest.markets_processed, 1);
        let failed = &report.sources[1];
        assert_eq!(failed.fetched, 0);
        assert!(failed.fetch_error.as_deref().unwrap().contains("gamma.invalid"));
        assert_eq!(report.totals().markets_processed, 1);
        assert_eq!(store.counts().await.unwrap().markets, 1);
    }

    #[tokio::test]
    async fn rejections_and_filter_are_counted_per_source() {
        let store = Store::in_memory().await.unwrap();
        let payloads = vec![
            json!({"ticker": "A", "title": "Rates up?", "category": "Economics", "volume": 500}),
            json!({"ticker": "B", "title": "Quiet market", "category": "Economics", "volume": 1}),
            json!({"title": "No ticker"}),
            json!({"ticker": "D"}),
        ];
        let filter = MarketFilter {
            min_volume: Some(100),
            ..Default::default()
        };

        let report = ingest_payloads(&CannedKalshi(Vec::new()), &payloads, &filter, &store, now())
            .await
            .unwrap();

        assert_eq!(report.fetched, 4);
        assert_eq!(report.normalize.rejected_missing_id, 1);
        assert_eq!(report.normalize.rejected_missing_title, 1);
        assert_eq!(report.filtered_out, 1);
        assert_eq!(report.ingest.markets_processed, 1);
        assert!(store.market("kalshi_A").await.unwrap().is_some());
    }
}
