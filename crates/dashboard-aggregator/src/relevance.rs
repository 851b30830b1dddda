//! Stock-relevance heuristics for signals, clusters and relation text.
//!
//! A payload is relevant when it carries a ticker-like token (a run of 2 to 5
//! letters that is on the allow-list) or one of the bilingual finance hints.
//! The lists are data, loadable from a JSON file.

use anyhow::{Context, Result};
use dashboard_core::SentinelSignal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

const STOCK_TICKERS: [&str; 27] = [
    "SPY", "QQQ", "DIA", "IWM", "VTI", "VOO", "XLF", "XLK", "XLE", "XLV", "XLI", "XLP", "XLY",
    "XLU", "XLRE", "SMH", "SOXX", "TLT", "DXY", "VIX", "AAPL", "MSFT", "NVDA", "AMZN", "GOOGL",
    "META", "TSLA",
];

const FALLBACK_TICKERS: [&str; 8] = ["SPY", "QQQ", "DIA", "IWM", "XLF", "XLK", "XLE", "XLV"];

const SIGNAL_HINTS: [&str; 19] = [
    "美股", "纳斯达克", "納斯達克", "道琼斯", "道瓊斯", "标普", "標普", "华尔街", "華爾街", "ETF",
    "EARNINGS", "RATE CUT", "RATE HIKE", "FED", "FOMC", "TREASURY", "YIELD", "DXY", "VIX",
];

const CLUSTER_HINTS: [&str; 27] = [
    "美股", "美國股市", "财报", "財報", "业绩", "業績", "股价", "股價", "估值", "加息", "降息",
    "纳斯达克", "納斯達克", "标普", "標普", "道琼斯", "道瓊斯", "华尔街", "華爾街", "ETF",
    "EARNINGS", "GUIDANCE", "IPO", "FED", "FOMC", "TREASURY", "YIELD",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceRules {
    /// Symbols accepted as ticker tokens.
    pub tickers: BTreeSet<String>,
    /// Watch list used when no digest or opportunity rows are available.
    pub fallback_tickers: Vec<String>,
    pub signal_hints: Vec<String>,
    /// Hints for clusters and relation text.
    pub cluster_hints: Vec<String>,
}

impl Default for RelevanceRules {
    fn default() -> Self {
        Self {
            tickers: STOCK_TICKERS.iter().map(|t| t.to_string()).collect(),
            fallback_tickers: FALLBACK_TICKERS.iter().map(|t| t.to_string()).collect(),
            signal_hints: SIGNAL_HINTS.iter().map(|h| h.to_string()).collect(),
            cluster_hints: CLUSTER_HINTS.iter().map(|h| h.to_string()).collect(),
        }
    }
}

impl RelevanceRules {
    /// Load rules from a JSON file. Fields absent from the file keep their
    /// built-in values.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        let mut rules: RelevanceRules = serde_json::from_str(&raw).context("Invalid relevance rules JSON")?;
        rules.tickers = rules.tickers.iter().map(|t| t.trim().to_uppercase()).collect();
        Ok(rules)
    }

    pub fn is_known_ticker(&self, ticker: &str) -> bool {
        self.tickers.contains(&ticker.trim().to_uppercase())
    }

    /// Allow-listed ticker tokens in `text`, in order of appearance.
    pub fn ticker_tokens(&self, text: &str) -> Vec<String> {
        word_runs(&text.to_uppercase())
            .into_iter()
            .filter(|run| (2..=5).contains(&run.len()) && run.bytes().all(|b| b.is_ascii_uppercase()))
            .filter(|run| self.tickers.contains(*run))
            .map(str::to_string)
            .collect()
    }

    pub fn has_signal_hint(&self, text: &str) -> bool {
        contains_any(text, &self.signal_hints)
    }

    pub fn has_cluster_hint(&self, text: &str) -> bool {
        contains_any(text, &self.cluster_hints)
    }

    /// `related_tickers` comes from the signal's detail payload and wins
    /// outright when any entry is allow-listed.
    pub fn is_stock_signal(
        &self,
        sentinel_id: &str,
        description: &str,
        trigger_reasons: &[String],
        related_tickers: &[String],
    ) -> bool {
        if related_tickers.iter().any(|t| self.is_known_ticker(t)) {
            return true;
        }
        let payload = signal_payload(sentinel_id, description, trigger_reasons);
        !self.ticker_tokens(&payload).is_empty() || self.has_signal_hint(&payload)
    }

    pub fn signal_mentions_ticker(&self, signal: &SentinelSignal, tickers: &BTreeSet<String>) -> bool {
        let payload = signal_payload(&signal.sentinel_id, &signal.description, &signal.trigger_reasons);
        if self.ticker_tokens(&payload).iter().any(|t| tickers.contains(t)) {
            return true;
        }
        let upper = payload.to_uppercase();
        tickers.iter().any(|t| !t.is_empty() && upper.contains(t.as_str()))
    }

    pub fn is_stock_cluster(&self, title: &str, summary: &str) -> bool {
        self.is_stock_relation_text(&format!("{} {}", title, summary))
    }

    pub fn is_stock_relation_text(&self, text: &str) -> bool {
        !self.ticker_tokens(text).is_empty() || self.has_cluster_hint(text)
    }

    /// Keep signals that mention one of `focus` tickers, or every stock
    /// relevant signal when there is no focus set.
    pub fn filter_signals(&self, signals: &[SentinelSignal], focus: &BTreeSet<String>) -> Vec<SentinelSignal> {
        signals
            .iter()
            .filter(|signal| {
                if focus.is_empty() {
                    self.is_stock_signal(&signal.sentinel_id, &signal.description, &signal.trigger_reasons, &[])
                } else {
                    self.signal_mentions_ticker(signal, focus)
                }
            })
            .cloned()
            .collect()
    }
}

fn signal_payload(sentinel_id: &str, description: &str, trigger_reasons: &[String]) -> String {
    let mut parts = vec![sentinel_id, description];
    parts.extend(trigger_reasons.iter().map(String::as_str));
    parts.join(" ")
}

/// Maximal runs of ASCII word characters. Anything else, CJK included, is a
/// boundary.
fn word_runs(text: &str) -> Vec<&str> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|run| !run.is_empty())
        .collect()
}

fn contains_any(text: &str, hints: &[String]) -> bool {
    let upper = text.to_uppercase();
    hints.iter().any(|hint| !hint.is_empty() && upper.contains(&hint.to_uppercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dashboard_core::RiskLevel;

    fn signal(sentinel_id: &str, description: &str) -> SentinelSignal {
        SentinelSignal {
            id: 1,
            cluster_id: None,
            sentinel_id: sentinel_id.to_string(),
            alert_level: RiskLevel::L2,
            risk_score: 0.5,
            description: description.to_string(),
            trigger_reasons: Vec::new(),
            evidence_links: Vec::new(),
            source_mix: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_ticker_tokens() {
        let rules = RelevanceRules::default();
        assert_eq!(rules.ticker_tokens("nvda beats; AAPL flat"), vec!["NVDA", "AAPL"]);
        assert_eq!(rules.ticker_tokens("英伟达NVDA财报"), vec!["NVDA"]);
        assert_eq!(rules.ticker_tokens("stock_v2:TSLA"), vec!["TSLA"]);
        // Part of a longer word or not allow-listed.
        assert!(rules.ticker_tokens("NVDAX METAL_A THE CEO").is_empty());
        assert!(rules.ticker_tokens("SPY2").is_empty());
    }

    #[test]
    fn test_signal_relevance() {
        let rules = RelevanceRules::default();
        assert!(rules.is_stock_signal("watch:macro", "FOMC minutes tonight", &[], &[]));
        assert!(rules.is_stock_signal("watch:misc", "港股波动", &[], &["msft".to_string()]));
        assert!(rules.is_stock_signal("watch:misc", "quiet day", &["标普 回撤".to_string()], &[]));
        assert!(!rules.is_stock_signal("watch:misc", "Local weather alert", &[], &["ZZZZ".to_string()]));
    }

    #[test]
    fn test_cluster_and_relation_hints() {
        let rules = RelevanceRules::default();
        assert!(rules.is_stock_cluster("苹果财报超预期", ""));
        assert!(rules.is_stock_cluster("Chip rally", "SMH up 3%"));
        assert!(rules.is_stock_relation_text("Company guidance raised"));
        assert!(!rules.is_stock_relation_text("rate hike"));
        assert!(rules.has_signal_hint("surprise rate hike"));
    }

    #[test]
    fn test_filter_signals_is_idempotent() {
        let rules = RelevanceRules::default();
        let signals = vec![
            signal("stock:NVDA", "Data center demand"),
            signal("misc", "Rainfall warning"),
            signal("misc", "美股 open lower"),
            signal("stock:AAPL", "Supply chain check"),
        ];

        let generic = rules.filter_signals(&signals, &BTreeSet::new());
        assert_eq!(generic.len(), 3);
        assert_eq!(rules.filter_signals(&generic, &BTreeSet::new()), generic);

        let focus: BTreeSet<String> = ["NVDA".to_string()].into_iter().collect();
        let focused = rules.filter_signals(&signals, &focus);
        assert_eq!(focused.len(), 1);
        assert_eq!(rules.filter_signals(&focused, &focus), focused);
    }

    #[test]
    fn test_mentions_by_substring() {
        let rules = RelevanceRules::default();
        let focus: BTreeSet<String> = ["PLTR".to_string()].into_iter().collect();
        assert!(rules.signal_mentions_ticker(&signal("x", "pltr contract win"), &focus));
        assert!(!rules.signal_mentions_ticker(&signal("x", "NVDA only"), &focus));
    }

    #[test]
    fn test_partial_rules_file() {
        let dir = std::env::temp_dir().join(format!("relevance-rules-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rules.json");
        std::fs::write(&path, r#"{"tickers": ["pltr", "NVDA"]}"#).unwrap();

        let rules = RelevanceRules::load(&path).unwrap();
        assert!(rules.is_known_ticker("PLTR"));
        assert!(!rules.is_known_ticker("AAPL"));
        assert_eq!(rules.fallback_tickers, RelevanceRules::default().fallback_tickers);

        std::fs::remove_dir_all(&dir).ok();
    }
}
