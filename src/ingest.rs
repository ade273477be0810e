use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::db::{MarketScope, Store};
use crate::error::Result;
use crate::types::{contract_ticker, CanonicalMarket};

/// Outcome of one ingestion batch.
///
/// Every input market lands in exactly one of `markets_processed`, `skipped`
/// or `errors`. Each processed contract gets exactly one snapshot, so
/// `prices_inserted == contracts_processed`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestionStats {
    pub markets_processed: usize,
    pub contracts_processed: usize,
    pub prices_inserted: usize,
    /// Markets with a blank id or title.
    pub skipped: usize,
    /// `"<market_id>: <message>"` per market whose writes were rolled back.
    pub errors: Vec<String>,
}

impl IngestionStats {
    pub fn total(&self) -> usize {
        self.markets_processed + self.skipped + self.errors.len()
    }

    /// Fold another batch's stats into this one.
    pub fn absorb(&mut self, other: IngestionStats) {
        self.markets_processed += other.markets_processed;
        self.contracts_processed += other.contracts_processed;
        self.prices_inserted += other.prices_inserted;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
    }

    /// Human-readable summary: counts, then at most `sample` errors and a
    /// trailing `... and N more` when some were left out.
    pub fn summary_lines(&self, sample: usize) -> Vec<String> {
        let mut lines = vec![format!(
            "markets={} contracts={} prices={} skipped={} errors={}",
            self.markets_processed,
            self.contracts_processed,
            self.prices_inserted,
            self.skipped,
            self.errors.len(),
        )];
        lines.extend(self.errors.iter().take(sample).map(|e| format!("  {e}")));
        if self.errors.len() > sample {
            lines.push(format!("  ... and {} more", self.errors.len() - sample));
        }
        lines
    }

    pub fn log_summary(&self, label: &str, sample: usize) {
        let mut lines = self.summary_lines(sample).into_iter();
        if let Some(head) = lines.next() {
            info!("[INGEST] {label}: {head}");
        }
        for line in lines {
            warn!("[INGEST] {label}: {line}");
        }
    }
}

/// Write a batch of markets, stamping snapshots with the current time.
pub async fn ingest(markets: &[CanonicalMarket], store: &Store) -> Result<IngestionStats> {
    ingest_at(markets, store, Utc::now()).await
}

/// Write a batch of markets in one transaction, each market under its own
/// savepoint. A failing market is rolled back and recorded in `errors`; only
/// transaction-level failures are returned as `Err`, in which case nothing
/// from the batch is kept.
pub async fn ingest_at(
    markets: &[CanonicalMarket],
    store: &Store,
    now: DateTime<Utc>,
) -> Result<IngestionStats> {
    let mut stats = IngestionStats::default();
    let mut batch = store.begin().await?;

    for market in markets {
        if market.market_id.trim().is_empty() || market.title.trim().is_empty() {
            debug!(market_id = %market.market_id, "[INGEST] skipping market with blank id or title");
            stats.skipped += 1;
            continue;
        }

        let mut scope = batch.market_scope().await?;
        match write_market(&mut scope, market, now).await {
            Ok(contracts) => {
                scope.commit().await?;
                stats.markets_processed += 1;
                stats.contracts_processed += contracts;
                stats.prices_inserted += contracts;
            }
            Err(e) => {
                scope.rollback().await?;
                warn!(market_id = %market.market_id, "[INGEST] market rolled back: {e}");
                stats.errors.push(format!("{}: {e}", market.market_id));
            }
        }
    }

    batch.commit().await?;
    Ok(stats)
}

/// Upsert the market and its contracts and append one snapshot per contract.
/// Returns the number of contracts written.
async fn write_market(
    scope: &mut MarketScope<'_>,
    market: &CanonicalMarket,
    now: DateTime<Utc>,
) -> Result<usize> {
    scope.upsert_market(market, now).await?;
    for quote in &market.contracts {
        let ticker = contract_ticker(&market.market_id, &quote.side);
        let contract = scope
            .upsert_contract(&market.market_id, &ticker, &quote.side, now)
            .await?;
        scope.append_price(&contract, quote, now).await?;
    }
    Ok(market.contracts.len())
}
