//! SQLite-backed store for markets, contracts and price snapshots.
//!
//! Writes go through a [`StoreBatch`] (one transaction per ingestion run),
//! and each market is written inside a [`MarketScope`] savepoint so a failing
//! market can be undone without losing the rest of the batch. Upserts are
//! single `INSERT … ON CONFLICT DO UPDATE` statements; snapshots are plain
//! inserts and are never updated or deleted here.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Acquire, Sqlite, Transaction};
use tracing::info;

use super::models::{
    ContractHandle, ContractRow, LatestQuoteRow, MarketHandle, MarketRow, PriceRow, StoreCounts,
};
use super::to_ns;
use crate::error::Result;
use crate::types::{CanonicalMarket, ContractQuote, Source};

/// Pool size for file-backed databases. The ingest path is single-writer;
/// the extra connections serve API reads.
const MAX_CONNECTIONS: u32 = 4;

/// Read filter for [`Store::latest_quotes`].
#[derive(Debug, Clone, Default)]
pub struct MarketQuery {
    /// Include closed and settled markets.
    pub include_closed: bool,
    /// Case-insensitive substring of the category.
    pub category: Option<String>,
    pub source: Option<Source>,
}

#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) a database and apply migrations.
    pub async fn open(database_url: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        info!("Database ready at {database_url}");
        Ok(store)
    }

    /// A private in-memory database. Pinned to one connection that never
    /// expires, since every new in-memory connection is a fresh database.
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Start the write transaction for one ingestion run. Dropping the batch
    /// without [`StoreBatch::commit`] rolls everything back.
    pub async fn begin(&self) -> Result<StoreBatch> {
        Ok(StoreBatch {
            tx: self.pool.begin().await?,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Every contract of the matching markets with its most recent snapshot,
    /// highest volume first. Contracts without any snapshot are omitted.
    pub async fn latest_quotes(&self, query: &MarketQuery) -> Result<Vec<LatestQuoteRow>> {
        let rows = sqlx::query_as::<_, LatestQuoteRow>(
            r#"
            SELECT m.market_id, m.source, m.title, m.category, m.status, m.expiry_ts, m.updated_at,
                   c.contract_ticker, c.side,
                   p.last_price, p.bid_price, p.ask_price, p.volume,
                   p.timestamp AS price_timestamp
            FROM markets m
            JOIN contracts c ON c.market_id = m.market_id
            JOIN prices p ON p.id = (
                SELECT p2.id FROM prices p2
                WHERE p2.contract_id = c.contract_ticker
                ORDER BY p2.timestamp DESC, p2.id DESC
                LIMIT 1
            )
            WHERE (?1 OR m.status = 'open')
              AND (?2 IS NULL OR instr(lower(coalesce(m.category, '')), lower(?2)) > 0)
              AND (?3 IS NULL OR m.source = ?3)
            ORDER BY p.volume DESC, m.market_id, c.contract_ticker
            "#,
        )
        .bind(query.include_closed)
        .bind(query.category.as_deref())
        .bind(query.source.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Snapshots of one contract at or after `since`, oldest first.
    pub async fn price_history(
        &self,
        contract_ticker: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceRow>> {
        let rows = sqlx::query_as::<_, PriceRow>(
            r#"
            SELECT id, contract_id, timestamp, bid_price, ask_price, last_price, volume
            FROM prices
            WHERE contract_id = ? AND timestamp >= ?
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(contract_ticker)
        .bind(to_ns(since))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn market(&self, market_id: &str) -> Result<Option<MarketRow>> {
        let row = sqlx::query_as::<_, MarketRow>(
            r#"
            SELECT market_id, source, title, category, status, expiry_ts, created_at, updated_at
            FROM markets
            WHERE market_id = ?
            "#,
        )
        .bind(market_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn contract(&self, contract_ticker: &str) -> Result<Option<ContractRow>> {
        let row = sqlx::query_as::<_, ContractRow>(
            "SELECT contract_ticker, market_id, side, description, created_at FROM contracts WHERE contract_ticker = ?",
        )
        .bind(contract_ticker)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Distinct non-empty categories, sorted.
    pub async fn categories(&self) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT category FROM markets WHERE category IS NOT NULL AND category != '' ORDER BY category",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Distinct sources that have at least one market, sorted.
    pub async fn sources(&self) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>("SELECT DISTINCT source FROM markets ORDER BY source")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn counts(&self) -> Result<StoreCounts> {
        let (markets, contracts, prices) = sqlx::query_as::<_, (i64, i64, i64)>(
            r#"
            SELECT (SELECT COUNT(*) FROM markets),
                   (SELECT COUNT(*) FROM contracts),
                   (SELECT COUNT(*) FROM prices)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(StoreCounts {
            markets,
            contracts,
            prices,
        })
    }
}

// ---------------------------------------------------------------------------
// Write path
// ---------------------------------------------------------------------------

/// The write transaction of one ingestion run.
pub struct StoreBatch {
    tx: Transaction<'static, Sqlite>,
}

impl StoreBatch {
    /// Open a savepoint for one market's writes.
    pub async fn market_scope(&mut self) -> Result<MarketScope<'_>> {
        Ok(MarketScope {
            tx: (&mut self.tx).begin().await?,
        })
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// A savepoint covering one market's metadata, contracts and snapshots.
/// Dropping it without [`MarketScope::commit`] undoes its writes.
pub struct MarketScope<'b> {
    tx: Transaction<'b, Sqlite>,
}

impl MarketScope<'_> {
    /// Insert the market, or overwrite its mutable fields and `updated_at`.
    /// `created_at` and `source` keep their first-insert values. An expiry
    /// outside the nanosecond range is stored as unknown.
    pub async fn upsert_market(
        &mut self,
        market: &CanonicalMarket,
        now: DateTime<Utc>,
    ) -> Result<MarketHandle> {
        let now_ns = to_ns(now);
        let handle = sqlx::query_as::<_, MarketHandle>(
            r#"
            INSERT INTO markets (market_id, source, title, category, status, expiry_ts, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(market_id) DO UPDATE SET
                title = excluded.title,
                category = excluded.category,
                status = excluded.status,
                expiry_ts = excluded.expiry_ts,
                updated_at = excluded.updated_at
            RETURNING market_id, created_at, updated_at
            "#,
        )
        .bind(&market.market_id)
        .bind(market.source.as_str())
        .bind(&market.title)
        .bind(market.category.as_deref())
        .bind(market.status.as_str())
        .bind(market.expiry.and_then(|e| e.timestamp_nanos_opt()))
        .bind(now_ns)
        .bind(now_ns)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(handle)
    }

    /// Insert the contract, or overwrite its side and description.
    pub async fn upsert_contract(
        &mut self,
        market_id: &str,
        contract_ticker: &str,
        side: &str,
        now: DateTime<Utc>,
    ) -> Result<ContractHandle> {
        let description = format!("{side} contract for {market_id}");
        let handle = sqlx::query_as::<_, ContractHandle>(
            r#"
            INSERT INTO contracts (contract_ticker, market_id, side, description, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(contract_ticker) DO UPDATE SET
                market_id = excluded.market_id,
                side = excluded.side,
                description = excluded.description
            RETURNING contract_ticker, market_id, side
            "#,
        )
        .bind(contract_ticker)
        .bind(market_id)
        .bind(side)
        .bind(description)
        .bind(to_ns(now))
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(handle)
    }

    /// Append one snapshot. Returns the new row id.
    pub async fn append_price(
        &mut self,
        contract: &ContractHandle,
        quote: &ContractQuote,
        timestamp: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO prices (contract_id, timestamp, bid_price, ask_price, last_price, volume)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&contract.contract_ticker)
        .bind(to_ns(timestamp))
        .bind(quote.bid)
        .bind(quote.ask)
        .bind(quote.last)
        .bind(quote.volume)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Release the savepoint, keeping this market's writes in the batch.
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    /// Roll back to the savepoint, discarding this market's writes.
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::from_ns;
    use crate::types::{contract_ticker, MarketStatus, YES_SIDE};
    use chrono::{Duration, TimeZone};

    fn market(id: &str, title: &str, category: Option<&str>, status: MarketStatus) -> CanonicalMarket {
        CanonicalMarket {
            market_id: id.to_string(),
            source: Source::Polymarket,
            title: title.to_string(),
            category: category.map(|c| c.to_string()),
            status,
            expiry: None,
            volume: None,
            contracts: vec![ContractQuote::yes()],
        }
    }

    fn quote(last: f64, volume: i64) -> ContractQuote {
        ContractQuote {
            last: Some(last),
            volume: Some(volume),
            ..ContractQuote::yes()
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    async fn write(store: &Store, m: &CanonicalMarket, q: &ContractQuote, at: DateTime<Utc>) {
        let mut batch = store.begin().await.unwrap();
        let mut scope = batch.market_scope().await.unwrap();
        scope.upsert_market(m, at).await.unwrap();
        let ticker = contract_ticker(&m.market_id, YES_SIDE);
        let c = scope.upsert_contract(&m.market_id, &ticker, YES_SIDE, at).await.unwrap();
        scope.append_price(&c, q, at).await.unwrap();
        scope.commit().await.unwrap();
        batch.commit().await.unwrap();
    }

    #[tokio::test]
    async fn upsert_market_overwrites_and_keeps_created_at() {
        let store = Store::in_memory().await.unwrap();
        let first = market("poly_a", "A", Some("Crypto"), MarketStatus::Open);
        write(&store, &first, &quote(40.0, 1), t0()).await;

        let mut second = market("poly_a", "B", None, MarketStatus::Closed);
        second.expiry = Some(t0() + Duration::days(2));
        write(&store, &second, &quote(41.0, 1), t0() + Duration::hours(1)).await;

        let row = store.market("poly_a").await.unwrap().unwrap();
        assert_eq!(row.title, "B");
        assert_eq!(row.category, None);
        assert_eq!(row.status, "closed");
        assert_eq!(row.expiry_ts.map(from_ns), second.expiry);
        assert_eq!(from_ns(row.created_at), t0());
        assert_eq!(from_ns(row.updated_at), t0() + Duration::hours(1));

        let counts = store.counts().await.unwrap();
        assert_eq!((counts.markets, counts.contracts, counts.prices), (1, 1, 2));
    }

    #[tokio::test]
    async fn dropped_scope_discards_market_writes() {
        let store = Store::in_memory().await.unwrap();
        let mut batch = store.begin().await.unwrap();
        {
            let mut scope = batch.market_scope().await.unwrap();
            scope
                .upsert_market(&market("poly_x", "X", None, MarketStatus::Open), t0())
                .await
                .unwrap();
            scope.rollback().await.unwrap();
        }
        let mut scope = batch.market_scope().await.unwrap();
        scope
            .upsert_market(&market("poly_y", "Y", None, MarketStatus::Open), t0())
            .await
            .unwrap();
        scope.commit().await.unwrap();
        batch.commit().await.unwrap();

        assert!(store.market("poly_x").await.unwrap().is_none());
        assert!(store.market("poly_y").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn uncommitted_batch_rolls_back() {
        let store = Store::in_memory().await.unwrap();
        {
            let mut batch = store.begin().await.unwrap();
            let mut scope = batch.market_scope().await.unwrap();
            scope
                .upsert_market(&market("poly_x", "X", None, MarketStatus::Open), t0())
                .await
                .unwrap();
            scope.commit().await.unwrap();
            drop(batch);
        }
        assert_eq!(store.counts().await.unwrap(), StoreCounts::default());
    }

    #[tokio::test]
    async fn out_of_range_price_is_rejected_by_store() {
        let store = Store::in_memory().await.unwrap();
        let m = market("poly_bad", "Bad", None, MarketStatus::Open);
        let mut batch = store.begin().await.unwrap();
        let mut scope = batch.market_scope().await.unwrap();
        scope.upsert_market(&m, t0()).await.unwrap();
        let c = scope
            .upsert_contract(&m.market_id, "poly_bad_YES", YES_SIDE, t0())
            .await
            .unwrap();
        assert!(scope.append_price(&c, &quote(150.0, 1), t0()).await.is_err());
    }

    #[tokio::test]
    async fn latest_quotes_picks_newest_snapshot_and_filters() {
        let store = Store::in_memory().await.unwrap();
        let a = market("poly_a", "A", Some("Crypto"), MarketStatus::Open);
        let b = market("poly_b", "B", Some("Politics"), MarketStatus::Open);
        let c = market("poly_c", "C", Some("Crypto"), MarketStatus::Settled);

        write(&store, &a, &quote(10.0, 5), t0()).await;
        write(&store, &a, &quote(12.0, 7), t0() + Duration::minutes(10)).await;
        write(&store, &b, &quote(50.0, 100), t0()).await;
        write(&store, &c, &quote(99.0, 1), t0()).await;

        let open = store.latest_quotes(&MarketQuery::default()).await.unwrap();
        let summary: Vec<_> = open
            .iter()
            .map(|r| (r.market_id.as_str(), r.last_price))
            .collect();
        assert_eq!(summary, vec![("poly_b", Some(50.0)), ("poly_a", Some(12.0))]);
        assert_eq!(from_ns(open[1].price_timestamp), t0() + Duration::minutes(10));

        let crypto = store
            .latest_quotes(&MarketQuery {
                include_closed: true,
                category: Some("CRYPTO".to_string()),
                source: Some(Source::Polymarket),
            })
            .await
            .unwrap();
        assert_eq!(crypto.len(), 2);

        let kalshi = store
            .latest_quotes(&MarketQuery {
                source: Some(Source::Kalshi),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(kalshi.is_empty());
    }

    #[tokio::test]
    async fn price_history_is_windowed_and_ordered() {
        let store = Store::in_memory().await.unwrap();
        let a = market("poly_a", "A", None, MarketStatus::Open);
        for (i, last) in [10.0, 20.0, 30.0].into_iter().enumerate() {
            write(&store, &a, &quote(last, 1), t0() + Duration::days(i as i64)).await;
        }

        let all = store.price_history("poly_a_YES", t0()).await.unwrap();
        assert_eq!(all.iter().map(|p| p.last_price).collect::<Vec<_>>(), vec![Some(10.0), Some(20.0), Some(30.0)]);

        let recent = store
            .price_history("poly_a_YES", t0() + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
        assert!(store.price_history("missing", t0()).await.unwrap().is_empty());

        let ancient = Utc.with_ymd_and_hms(1600, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(store.price_history("poly_a_YES", ancient).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unrepresentable_expiry_is_stored_as_unknown() {
        let store = Store::in_memory().await.unwrap();
        let mut past = market("poly_old", "Old", None, MarketStatus::Open);
        past.expiry = Some(Utc.with_ymd_and_hms(1600, 1, 1, 0, 0, 0).unwrap());
        let mut far = market("poly_far", "Far", None, MarketStatus::Open);
        far.expiry = Some(Utc.with_ymd_and_hms(2300, 1, 1, 0, 0, 0).unwrap());
        write(&store, &past, &quote(1.0, 1), t0()).await;
        write(&store, &far, &quote(1.0, 1), t0()).await;

        assert_eq!(store.market("poly_old").await.unwrap().unwrap().expiry_ts, None);
        assert_eq!(store.market("poly_far").await.unwrap().unwrap().expiry_ts, None);
    }

    #[tokio::test]
    async fn categories_and_sources() {
        let store = Store::in_memory().await.unwrap();
        write(&store, &market("poly_a", "A", Some("Politics"), MarketStatus::Open), &quote(1.0, 1), t0()).await;
        write(&store, &market("poly_b", "B", Some("Crypto"), MarketStatus::Open), &quote(1.0, 1), t0()).await;
        write(&store, &market("poly_c", "C", None, MarketStatus::Open), &quote(1.0, 1), t0()).await;

        assert_eq!(store.categories().await.unwrap(), vec!["Crypto", "Politics"]);
        assert_eq!(store.sources().await.unwrap(), vec!["polymarket"]);
        let contract = store.contract("poly_a_YES").await.unwrap().unwrap();
        assert_eq!(contract.market_id, "poly_a");
        assert_eq!(contract.description.as_deref(), Some("YES contract for poly_a"));
    }
}
