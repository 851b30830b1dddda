use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

use crate::relevance::RelevanceRules;

const TRUE_VALUES: [&str; 4] = ["1", "true", "yes", "on"];

/// Process-wide switches, read once and injected into the aggregator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    pub read_v2: bool,
    pub evidence_layer: bool,
    pub transmission_layer: bool,
    pub ai_debate_view: bool,
}

impl FeatureFlags {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build flags from any key lookup, so tests never touch the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| lookup(key).map(|raw| is_truthy(&raw)).unwrap_or(false);
        Self {
            read_v2: flag("DASHBOARD_READ_V2"),
            evidence_layer: flag("DASHBOARD_EVIDENCE_LAYER"),
            transmission_layer: flag("DASHBOARD_TRANSMISSION_LAYER"),
            ai_debate_view: flag("DASHBOARD_AI_DEBATE_VIEW"),
        }
    }

    /// Any of the opportunity enrichment layers is on.
    pub fn enriches_opportunities(&self) -> bool {
        self.evidence_layer || self.transmission_layer || self.ai_debate_view
    }
}

pub fn is_truthy(raw: &str) -> bool {
    let normalized = raw.trim().to_lowercase();
    TRUE_VALUES.contains(&normalized.as_str())
}

#[derive(Debug, Clone, Default)]
pub struct DashboardConfig {
    pub flags: FeatureFlags,
    pub relevance_rules_path: Option<PathBuf>,
}

impl DashboardConfig {
    pub fn from_env() -> Self {
        Self {
            flags: FeatureFlags::from_env(),
            relevance_rules_path: env::var("DASHBOARD_RELEVANCE_RULES")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    /// Built-in allow-lists unless a rules file is configured.
    pub fn relevance_rules(&self) -> Result<RelevanceRules> {
        match &self.relevance_rules_path {
            Some(path) => RelevanceRules::load(path)
                .with_context(|| format!("Failed to load relevance rules from {}", path.display())),
            None => Ok(RelevanceRules::default()),
        }
    }
}
