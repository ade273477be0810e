use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{HISTORY_DEFAULT_DAYS, HISTORY_MAX_DAYS};
use crate::db::{from_ns, LatestQuoteRow, MarketQuery, PriceRow, Store, StoreCounts};
use crate::error::AppError;
use crate::types::Source;

#[derive(Clone)]
pub struct ApiState {
    pub store: Store,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/markets", get(get_markets))
        .route("/contracts/:ticker/history", get(get_contract_history))
        .route("/categories", get(get_categories))
        .route("/sources", get(get_sources))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct MarketsQuery {
    pub category: Option<String>,
    pub source: Option<String>,
    pub include_closed: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub days: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub counts: StoreCounts,
}

#[derive(Debug, Serialize)]
pub struct MarketResponse {
    pub market_id: String,
    pub source: String,
    pub title: String,
    pub category: Option<String>,
    pub status: String,
    /// RFC 3339, absent when the source gave no usable expiry.
    pub expiry: Option<String>,
    pub updated_at: String,
    pub contracts: Vec<QuoteResponse>,
}

#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    pub contract_ticker: String,
    pub side: String,
    pub last_price: Option<f64>,
    pub bid_price: Option<f64>,
    pub ask_price: Option<f64>,
    pub volume: Option<i64>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct PricePoint {
    pub timestamp: String,
    pub last_price: Option<f64>,
    pub bid_price: Option<f64>,
    pub ask_price: Option<f64>,
    pub volume: Option<i64>,
}

fn rfc3339(ns: i64) -> String {
    from_ns(ns).to_rfc3339()
}

/// Fold contract rows into one entry per market, keeping row order.
fn group_by_market(rows: Vec<LatestQuoteRow>) -> Vec<MarketResponse> {
    let mut markets: Vec<MarketResponse> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for row in rows {
        let quote = QuoteResponse {
            contract_ticker: row.contract_ticker,
            side: row.side,
            last_price: row.last_price,
            bid_price: row.bid_price,
            ask_price: row.ask_price,
            volume: row.volume,
            timestamp: rfc3339(row.price_timestamp),
        };
        match index.get(&row.market_id) {
            Some(&i) => markets[i].contracts.push(quote),
            None => {
                index.insert(row.market_id.clone(), markets.len());
                markets.push(MarketResponse {
                    market_id: row.market_id,
                    source: row.source,
                    title: row.title,
                    category: row.category,
                    status: row.status,
                    expiry: row.expiry_ts.map(rfc3339),
                    updated_at: rfc3339(row.updated_at),
                    contracts: vec![quote],
                });
            }
        }
    }
    markets
}

impl From<PriceRow> for PricePoint {
    fn from(row: PriceRow) -> Self {
        Self {
            timestamp: rfc3339(row.timestamp),
            last_price: row.last_price,
            bid_price: row.bid_price,
            ask_price: row.ask_price,
            volume: row.volume,
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, AppError> {
    let counts = state.store.counts().await?;
    Ok(Json(HealthResponse { status: "ok", counts }))
}

async fn get_markets(
    State(state): State<ApiState>,
    Query(params): Query<MarketsQuery>,
) -> Result<Json<Vec<MarketResponse>>, AppError> {
    let source = match params.source.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(name) => Some(
            Source::from_name(name).ok_or_else(|| AppError::BadRequest(format!("unknown source '{name}'")))?,
        ),
        None => None,
    };
    let query = MarketQuery {
        include_closed: params.include_closed.unwrap_or(false),
        category: params.category.filter(|c| !c.trim().is_empty()),
        source,
    };

    let rows = state.store.latest_quotes(&query).await?;
    Ok(Json(group_by_market(rows)))
}

async fn get_contract_history(
    State(state): State<ApiState>,
    Path(ticker): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<PricePoint>>, AppError> {
    if state.store.contract(&ticker).await?.is_none() {
        return Err(AppError::NotFound(format!("contract {ticker}")));
    }
    let days = params
        .days
        .unwrap_or(HISTORY_DEFAULT_DAYS)
        .clamp(0, HISTORY_MAX_DAYS);
    let since = Utc::now() - Duration::days(days);

    let rows = state.store.price_history(&ticker, since).await?;
    Ok(Json(rows.into_iter().map(PricePoint::from).collect()))
}

async fn get_categories(State(state): State<ApiState>) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.store.categories().await?))
}

async fn get_sources(State(state): State<ApiState>) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.store.sources().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ingest_at;
    use crate::types::{CanonicalMarket, ContractQuote, MarketStatus};

    fn market(id: &str, source: Source, category: &str, status: MarketStatus, last: f64) -> CanonicalMarket {
        CanonicalMarket {
            market_id: id.to_string(),
            source,
            title: format!("Market {id}"),
            category: Some(category.to_string()),
            status,
            expiry: None,
            volume: Some(1),
            contracts: vec![ContractQuote {
                last: Some(last),
                volume: Some(1),
                ..ContractQuote::yes()
            }],
        }
    }

    async fn seeded() -> ApiState {
        let store = Store::in_memory().await.unwrap();
        let markets = vec![
            market("kalshi_A", Source::Kalshi, "Economics", MarketStatus::Open, 71.0),
            market("poly_B", Source::Polymarket, "Politics", MarketStatus::Open, 62.0),
            market("poly_C", Source::Polymarket, "Politics", MarketStatus::Closed, 5.0),
        ];
        ingest_at(&markets, &store, Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        ApiState { store }
    }

    fn ids(markets: &[MarketResponse]) -> Vec<&str> {
        let mut ids: Vec<&str> = markets.iter().map(|m| m.market_id.as_str()).collect();
        ids.sort();
        ids
    }

    fn quote_row(market_id: &str, side: &str, volume: i64) -> LatestQuoteRow {
        LatestQuoteRow {
            market_id: market_id.to_string(),
            source: "kalshi".to_string(),
            title: market_id.to_string(),
            category: None,
            status: "open".to_string(),
            expiry_ts: None,
            updated_at: 0,
            contract_ticker: format!("{market_id}_{side}"),
            side: side.to_string(),
            last_price: Some(50.0),
            bid_price: None,
            ask_price: None,
            volume: Some(volume),
            price_timestamp: 0,
        }
    }

    #[test]
    fn grouping_collects_interleaved_contracts() {
        let markets = group_by_market(vec![
            quote_row("m1", "YES", 30),
            quote_row("m2", "YES", 20),
            quote_row("m1", "NO", 10),
        ]);
        assert_eq!(markets.len(), 2);
        assert_eq!(markets[0].market_id, "m1");
        let tickers: Vec<&str> = markets[0].contracts.iter().map(|c| c.contract_ticker.as_str()).collect();
        assert_eq!(tickers, vec!["m1_YES", "m1_NO"]);
        assert_eq!(markets[1].contracts.len(), 1);
    }

    #[tokio::test]
    async fn markets_defaults_to_open_only() {
        let state = seeded().await;
        let Json(markets) = get_markets(State(state), Query(MarketsQuery::default()))
            .await
            .unwrap();
        assert_eq!(ids(&markets), vec!["kalshi_A", "poly_B"]);
        let a = markets.iter().find(|m| m.market_id == "kalshi_A").unwrap();
        assert_eq!(a.contracts.len(), 1);
        assert_eq!(a.contracts[0].last_price, Some(71.0));
        assert_eq!(a.contracts[0].contract_ticker, "kalshi_A_YES");
    }

    #[tokio::test]
    async fn markets_filters_by_source_category_and_closed() {
        let state = seeded().await;
        let Json(markets) = get_markets(
            State(state.clone()),
            Query(MarketsQuery {
                category: Some("poli".to_string()),
                source: Some("poly".to_string()),
                include_closed: Some(true),
            }),
        )
        .await
        .unwrap();
        assert_eq!(ids(&markets), vec!["poly_B", "poly_C"]);

        let err = get_markets(
            State(state),
            Query(MarketsQuery {
                source: Some("predictit".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn history_returns_points_or_not_found() {
        let state = seeded().await;
        let Json(points) = get_contract_history(
            State(state.clone()),
            Path("poly_B_YES".to_string()),
            Query(HistoryQuery::default()),
        )
        .await
        .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].last_price, Some(62.0));

        let Json(none) = get_contract_history(
            State(state.clone()),
            Path("poly_B_YES".to_string()),
            Query(HistoryQuery { days: Some(0) }),
        )
        .await
        .unwrap();
        assert!(none.is_empty());

        for days in [i64::MAX, i64::MIN, 200_000] {
            let Json(points) = get_contract_history(
                State(state.clone()),
                Path("poly_B_YES".to_string()),
                Query(HistoryQuery { days: Some(days) }),
            )
            .await
            .unwrap();
            let expected = if days > 0 { 1 } else { 0 };
            assert_eq!(points.len(), expected, "days={days}");
        }

        let err = get_contract_history(State(state), Path("nope".to_string()), Query(HistoryQuery::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn listing_endpoints() {
        let state = seeded().await;
        let Json(categories) = get_categories(State(state.clone())).await.unwrap();
        assert_eq!(categories, vec!["Economics", "Politics"]);
        let Json(sources) = get_sources(State(state.clone())).await.unwrap();
        assert_eq!(sources, vec!["kalshi", "polymarket"]);
        let Json(health) = get_health(State(state)).await.unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.counts.markets, 3);
        assert_eq!(health.counts.prices, 3);
    }
}
