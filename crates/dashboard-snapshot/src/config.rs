use anyhow::{bail, Context, Result};
use dashboard_aggregator::{DashboardConfig, RelevanceRules};
use row_store_client::StoreConfig;
use std::env;
use std::path::PathBuf;

pub struct SnapshotConfig {
    pub dashboard: DashboardConfig,
    /// `None` runs offline: every read fails and the snapshot degrades.
    pub store: Option<StoreConfig>,
    pub rules: RelevanceRules,
    pub pretty: bool,
    /// Write the snapshot here instead of stdout.
    pub output: Option<PathBuf>,
}

impl SnapshotConfig {
    pub fn from_env() -> Result<Self> {
        let dashboard = DashboardConfig::from_env();
        let rules = dashboard.relevance_rules()?;

        let config = Self {
            store: StoreConfig::from_env(),
            rules,
            pretty: env::var("DASHBOARD_SNAPSHOT_PRETTY")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .context("DASHBOARD_SNAPSHOT_PRETTY must be true or false")?,
            output: env::var("DASHBOARD_SNAPSHOT_OUT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            dashboard,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let Some(store) = &self.store {
            if !store.url.starts_with("http://") && !store.url.starts_with("https://") {
                bail!("DASHBOARD_STORE_URL must be an http(s) URL, got {}", store.url);
            }
            if store.timeout.is_zero() {
                bail!("DASHBOARD_STORE_TIMEOUT_SECS must be positive");
            }
        }
        Ok(())
    }
}
