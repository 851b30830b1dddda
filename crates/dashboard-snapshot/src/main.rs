use std::sync::Arc;

use anyhow::{Context, Result};
use dashboard_aggregator::DashboardAggregator;
use dashboard_core::RowStore;
use row_store_client::{MemoryStore, RestStoreClient};

mod config;

use config::SnapshotConfig;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    // Logs go to stderr so stdout carries only the snapshot.
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    let config = SnapshotConfig::from_env()?;
    tracing::info!(
        "Feature flags: read_v2={} evidence={} transmission={} ai_debate={}",
        config.dashboard.flags.read_v2,
        config.dashboard.flags.evidence_layer,
        config.dashboard.flags.transmission_layer,
        config.dashboard.flags.ai_debate_view
    );

    let store: Arc<dyn RowStore> = match &config.store {
        Some(store_config) => {
            tracing::info!("Reading from {}", store_config.url);
            Arc::new(RestStoreClient::new(store_config))
        }
        None => {
            tracing::warn!("DASHBOARD_STORE_URL or DASHBOARD_STORE_KEY not set, running offline");
            Arc::new(MemoryStore::offline())
        }
    };

    let aggregator = DashboardAggregator::new(store, config.dashboard.flags).with_rules(config.rules);
    let snapshot = aggregator.build_snapshot().await;
    tracing::info!(
        "Snapshot ready: risk {}, freshness {} min",
        snapshot.market_snapshot.risk_level.as_str(),
        snapshot.data_quality.freshness_minutes
    );

    let body = if config.pretty {
        serde_json::to_string_pretty(&snapshot)?
    } else {
        serde_json::to_string(&snapshot)?
    };
    match &config.output {
        Some(path) => {
            std::fs::write(path, body).with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!("Snapshot written to {}", path.display());
        }
        None => println!("{}", body),
    }

    Ok(())
}
