use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use prediction_pulse::config::Config;
use prediction_pulse::db::Store;
use prediction_pulse::error::Result;
use prediction_pulse::pipeline::run_once;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let store = Store::open(&cfg.database_url()).await?;

    let sources: Vec<&str> = cfg.sources.iter().map(|s| s.as_str()).collect();
    info!(
        "Ingesting from {} (limit={} per source, category={}, min_volume={}, include_expired={})",
        sources.join(", "),
        cfg.ingest_limit,
        cfg.filter_category.as_deref().unwrap_or("any"),
        cfg.filter_min_volume.unwrap_or(0),
        cfg.include_expired,
    );

    let report = run_once(&cfg, &store).await;
    store.close().await;
    let report = report?;

    for source in &report.sources {
        let label = source.source.as_str();
        if let Some(e) = &source.fetch_error {
            error!("[INGEST] {label}: no markets ingested ({e})");
            continue;
        }
        info!(
            "[INGEST] {label}: fetched={} rejected={} filtered_out={}",
            source.fetched,
            source.normalize.rejected(),
            source.filtered_out,
        );
        source.ingest.log_summary(label, cfg.error_sample_size);
    }
    report.totals().log_summary("total", cfg.error_sample_size);

    Ok(())
}
