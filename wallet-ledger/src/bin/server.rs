//! Wallet ledger server binary

use anyhow::Context;
use std::sync::Arc;
use wallet_ledger::{http, seed, Config, Ledger, LedgerOptions, Metrics, RocksStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match std::env::var("LEDGER_CONFIG") {
        Ok(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => Config::from_env()?,
    };
    config.validate()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        "Starting wallet ledger"
    );

    // Open store and seed providers
    let store = Arc::new(RocksStore::open(&config).context("opening wallet store")?);
    seed::ensure_providers(store.as_ref(), &config.providers)?;

    let metrics = Metrics::new()?;
    let ledger = Ledger::new(Arc::clone(&store), LedgerOptions::from(&config))
        .with_metrics(metrics.clone());

    let listener = tokio::net::TcpListener::bind(&config.metrics_listen_addr)
        .await
        .with_context(|| format!("binding {}", config.metrics_listen_addr))?;
    let metrics_server = tokio::spawn(http::serve_metrics(listener, metrics.clone()));

    let wallets = ledger.list_wallets()?;
    let stats = store.get_stats()?;
    tracing::info!(
        wallets = wallets.len(),
        entries = stats.total_entries,
        "Ledger opened successfully"
    );

    let report = tokio::task::spawn_blocking({
        let ledger = ledger.clone();
        move || ledger.audit()
    })
    .await??;
    if !report.is_clean() {
        tracing::warn!(
            summary = %serde_json::json!({
                "unpaired": report.unpaired.len(),
                "mismatched": report.mismatched().map(|r| r.wallet_id.get()).collect::<Vec<_>>(),
            }),
            "Startup audit found inconsistencies"
        );
    }

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down wallet ledger");
    metrics_server.abort();
    tracing::debug!(metrics = %metrics.render()?, "Final metrics");

    drop(ledger);
    match Arc::try_unwrap(store) {
        Ok(store) => store.close()?,
        Err(_) => tracing::warn!("Store still shared at shutdown, skipping flush"),
    }

    Ok(())
}
