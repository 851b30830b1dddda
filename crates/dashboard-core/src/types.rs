use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sentinel severity, L0 (lowest) to L4 (highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum RiskLevel {
    L0,
    #[default]
    L1,
    L2,
    L3,
    L4,
}

impl RiskLevel {
    /// Parse a stored level label. Anything unrecognized maps to L1.
    pub fn from_label(text: &str) -> Self {
        match text.trim().to_uppercase().as_str() {
            "L0" => RiskLevel::L0,
            "L1" => RiskLevel::L1,
            "L2" => RiskLevel::L2,
            "L3" => RiskLevel::L3,
            "L4" => RiskLevel::L4,
            _ => RiskLevel::L1,
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            RiskLevel::L0 => 0,
            RiskLevel::L1 => 1,
            RiskLevel::L2 => 2,
            RiskLevel::L3 => 3,
            RiskLevel::L4 => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::L0 => "L0",
            RiskLevel::L1 => "L1",
            RiskLevel::L2 => "L2",
            RiskLevel::L3 => "L3",
            RiskLevel::L4 => "L4",
        }
    }

    /// L3 and L4 count as high severity in briefs.
    pub fn is_high(&self) -> bool {
        matches!(self, RiskLevel::L3 | RiskLevel::L4)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    #[default]
    Long,
    Short,
}

impl Side {
    /// Only an explicit SHORT is short; everything else is long.
    pub fn from_label(text: &str) -> Self {
        if text.trim().eq_ignore_ascii_case("SHORT") {
            Side::Short
        } else {
            Side::Long
        }
    }
}

/// Short (A) vs longer (B) duration opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Horizon {
    #[default]
    A,
    B,
}

impl Horizon {
    pub fn from_label(text: &str) -> Self {
        if text.trim().eq_ignore_ascii_case("B") {
            Horizon::B
        } else {
            Horizon::A
        }
    }
}

/// Direction of a transmission path or an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
    #[default]
    Neutral,
}

impl Direction {
    pub fn from_label(text: &str) -> Self {
        match text.trim().to_uppercase().as_str() {
            "LONG" => Direction::Long,
            "SHORT" => Direction::Short,
            _ => Direction::Neutral,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SourceOrigin {
    #[default]
    Direct,
    Indirect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreshnessLevel {
    Fresh,
    Stale,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    #[default]
    Pending,
    Sent,
    Deduped,
    Dropped,
}

impl AlertStatus {
    pub fn from_label(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "sent" => AlertStatus::Sent,
            "deduped" => AlertStatus::Deduped,
            "dropped" => AlertStatus::Dropped,
            _ => AlertStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackLabel {
    Useful,
    Noise,
}

impl FeedbackLabel {
    pub fn from_label(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "useful" => Some(FeedbackLabel::Useful),
            "noise" => Some(FeedbackLabel::Noise),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Equity,
    Etf,
    Index,
    Macro,
    #[default]
    Unknown,
}

impl AssetType {
    pub fn from_label(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "equity" => AssetType::Equity,
            "etf" => AssetType::Etf,
            "index" => AssetType::Index,
            "macro" => AssetType::Macro,
            _ => AssetType::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactScope {
    Index,
    #[default]
    Sector,
    Ticker,
}

impl ImpactScope {
    pub fn from_label(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "index" => ImpactScope::Index,
            "ticker" => ImpactScope::Ticker,
            _ => ImpactScope::Sector,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromotionStatus {
    #[default]
    Pending,
    Promoted,
    Rejected,
}

impl PromotionStatus {
    pub fn from_label(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "promoted" => PromotionStatus::Promoted,
            "rejected" => PromotionStatus::Rejected,
            _ => PromotionStatus::Pending,
        }
    }
}

/// Blend of X-platform posts vs news articles behind a signal or opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMix {
    pub x_count: u32,
    pub article_count: u32,
    pub other_count: u32,
    pub source_total: u32,
    pub x_ratio: f64, // 0.0 to 1.0
    pub mixed_sources: bool,
    pub top_x_handles: Vec<String>,
    pub latest_x_at: DateTime<Utc>,
    pub latest_news_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentinelSignal {
    pub id: i64,
    pub cluster_id: Option<i64>,
    pub sentinel_id: String,
    pub alert_level: RiskLevel,
    pub risk_score: f64, // 0.0 to 1.0
    pub description: String,
    pub trigger_reasons: Vec<String>,
    pub evidence_links: Vec<String>,
    #[serde(default)]
    pub source_mix: Option<SourceMix>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: i64,
    pub opportunity_id: i64,
    pub ticker: String,
    pub source_type: String,
    pub source_ref: String,
    pub source_url: String,
    pub source_name: String,
    pub published_at: DateTime<Utc>,
    pub quote_snippet: String,
    pub numeric_facts: Vec<serde_json::Map<String, serde_json::Value>>,
    pub confidence: f64,
    pub as_of: DateTime<Utc>,
}

/// A claimed macro -> industry -> ticker causal chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmissionPath {
    pub id: i64,
    pub opportunity_id: i64,
    pub path_key: String,
    pub ticker: String,
    pub macro_factor: String,
    pub industry: String,
    pub direction: Direction,
    pub strength: f64,
    pub reason: String,
    pub evidence_ids: Vec<i64>,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiDebateView {
    pub pro_case: String,
    pub counter_case: String,
    pub uncertainties: Vec<String>,
    pub pre_trade_checks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityItem {
    pub id: i64,
    pub ticker: String,
    pub side: Side,
    pub horizon: Horizon,
    pub opportunity_score: f64,
    pub confidence: f64, // 0.0 to 1.0
    pub risk_level: RiskLevel,
    pub why_now: String,
    pub invalid_if: String,
    pub catalysts: Vec<String>,
    pub factor_breakdown: BTreeMap<String, f64>,
    pub source_signal_ids: Vec<i64>,
    pub source_event_ids: Vec<i64>,
    pub source_cluster_ids: Vec<i64>,
    #[serde(default)]
    pub source_mix: Option<SourceMix>,
    pub evidence_ids: Vec<i64>,
    pub path_ids: Vec<i64>,
    pub uncertainty_flags: Vec<String>,
    pub counter_view: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidences: Option<Vec<EvidenceItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transmission_paths: Option<Vec<TransmissionPath>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_debate_view: Option<AiDebateView>,
    pub source_origin: SourceOrigin,
    pub expires_at: DateTime<Utc>,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerSignalDigest {
    pub ticker: String,
    pub signal_count_24h: u32,
    pub related_cluster_count_24h: u32,
    pub risk_level: RiskLevel,
    pub top_sentinel_levels: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Consolidated macro readout. Risk level and brief are always recomputed
/// from live signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub snapshot_date: DateTime<Utc>,
    pub spy: Option<f64>,
    pub qqq: Option<f64>,
    pub dia: Option<f64>,
    pub vix: Option<f64>,
    pub us10y: Option<f64>,
    pub dxy: Option<f64>,
    pub risk_level: RiskLevel,
    pub daily_brief: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRegime {
    pub regime_date: DateTime<Utc>,
    pub risk_state: String,
    pub vol_state: String,
    pub liquidity_state: String,
    pub regime_score: f64,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotCluster {
    pub id: i64,
    pub category: String,
    pub primary_title: String,
    pub summary: String,
    pub article_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRelationItem {
    pub id: i64,
    pub entity1_name: String,
    pub entity2_name: String,
    pub relation_text: String,
    pub confidence: f64,
    pub last_seen: DateTime<Utc>,
}

/// Latest status count per source, from the health table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceHealthCounts {
    pub healthy: u32,
    pub degraded: u32,
    pub critical: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualitySnapshot {
    pub freshness_minutes: i64,
    pub freshness_level: FreshnessLevel,
    pub source_health_status: HealthStatus,
    pub source_health_healthy: u32,
    pub source_health_degraded: u32,
    pub source_health_critical: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCenterItem {
    pub id: i64,
    pub user_id: String,
    pub ticker: String,
    pub signal_type: String,
    pub signal_level: RiskLevel,
    pub alert_score: f64, // 0 to 100
    pub side: Direction,
    pub title: String,
    pub why_now: String,
    pub session_tag: String,
    pub status: AlertStatus,
    pub dedupe_window: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub feedback_useful_count: u32,
    pub feedback_noise_count: u32,
    pub latest_feedback_label: Option<FeedbackLabel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertUserPrefs {
    pub user_id: String,
    pub enable_premarket: bool,
    pub enable_postmarket: bool,
    pub daily_alert_cap: u32,
    pub quiet_hours_start: u32,
    pub quiet_hours_end: u32,
    pub watch_tickers: Vec<String>,
    pub muted_signal_types: Vec<String>,
}

impl Default for AlertUserPrefs {
    fn default() -> Self {
        Self {
            user_id: "system".to_string(),
            enable_premarket: false,
            enable_postmarket: true,
            daily_alert_cap: 20,
            quiet_hours_start: 0,
            quiet_hours_end: 0,
            watch_tickers: Vec::new(),
            muted_signal_types: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioHoldingItem {
    pub id: i64,
    pub portfolio_id: i64,
    pub user_id: String,
    pub ticker: String,
    pub side: Side,
    pub quantity: f64,
    pub avg_cost: f64,
    pub market_value: f64,
    pub weight: f64,
    pub notes: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerProfile {
    pub ticker: String,
    pub display_name: String,
    pub asset_type: AssetType,
    pub sector: String,
    pub industry: String,
    pub summary: String,
}

/// A macro/thematic observation not yet tied to a specific ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndirectImpactItem {
    pub id: i64,
    pub theme: String,
    pub impact_scope: ImpactScope,
    pub summary: String,
    pub candidate_tickers: Vec<String>,
    pub relevance_score: f64, // 0 to 100
    pub confidence: f64,
    pub promotion_status: PromotionStatus,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XSourceRadarItem {
    pub handle: String,
    pub mentions: u32,
    pub mixed_count: u32,
    pub avg_x_ratio: f64,
    pub latest_at: DateTime<Utc>,
}

/// The read model handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub opportunities: Vec<OpportunityItem>,
    pub alerts: Vec<AlertCenterItem>,
    pub alert_prefs: AlertUserPrefs,
    pub portfolio_holdings: Vec<PortfolioHoldingItem>,
    pub ticker_profiles: BTreeMap<String, TickerProfile>,
    pub market_regime: Option<MarketRegime>,
    pub market_snapshot: MarketSnapshot,
    pub data_quality: DataQualitySnapshot,
    pub sentinel_signals: Vec<SentinelSignal>,
    pub ticker_digest: Vec<TickerSignalDigest>,
    pub x_source_radar: Vec<XSourceRadarItem>,
    pub indirect_impacts: Vec<IndirectImpactItem>,
    pub hot_clusters: Vec<HotCluster>,
    pub relations: Vec<EntityRelationItem>,
    pub data_updated_at: DateTime<Utc>,
}
