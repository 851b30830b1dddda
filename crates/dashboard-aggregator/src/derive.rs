//! Derived fields: everything in the snapshot that is not a direct column copy.
//!
//! All functions here are pure. Malformed input has already been coerced by
//! the fetchers, so nothing in this module can fail.

use chrono::{DateTime, Duration, Utc};
use dashboard_core::coerce::{object, text, text_or, timestamp_or};
use dashboard_core::{
    AiDebateView, AssetType, DataQualitySnapshot, EntityRelationItem, FreshnessLevel, HealthStatus,
    HotCluster, Horizon, MarketSnapshot, OpportunityItem, RiskLevel, Row, SentinelSignal, Side,
    SourceHealthCounts, SourceMix, SourceOrigin, TickerProfile, TickerSignalDigest, XSourceRadarItem,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::relevance::RelevanceRules;

/// Minutes reported when there is no usable data timestamp.
pub const MISSING_FRESHNESS_MINUTES: i64 = 9999;

const FRESH_MINUTES: i64 = 30;
const STALE_MINUTES: i64 = 120;
const RADAR_LIMIT: usize = 10;
const CLUSTER_LIMIT: usize = 20;
const RELATION_LIMIT: usize = 20;

pub const NO_ALERT_BRIEF: &str = "No stock-related L1-L4 alerts in the last 24h.";
pub const NO_SNAPSHOT_BRIEF: &str = "No aggregated market snapshot available; showing stock-related signals only.";

/// Highest alert level. The floor is L1, so an empty list never reads as
/// "no risk".
pub fn top_risk(signals: &[SentinelSignal]) -> RiskLevel {
    signals
        .iter()
        .map(|s| s.alert_level)
        .fold(RiskLevel::L1, |max, level| if level > max { level } else { max })
}

/// One-line brief from severity buckets plus the most recent description.
pub fn derive_brief(signals: &[SentinelSignal]) -> String {
    if signals.is_empty() {
        return NO_ALERT_BRIEF.to_string();
    }

    let high = signals.iter().filter(|s| s.alert_level.is_high()).count();
    let medium = signals.iter().filter(|s| s.alert_level == RiskLevel::L2).count();
    let latest = signals
        .first()
        .map(|s| s.description.trim())
        .filter(|d| !d.is_empty())
        .unwrap_or("The monitor picked up new risk leads.");

    if high > 0 {
        format!("{} high-risk stock alerts in the last 24h, prioritize L3/L4. {}", high, latest)
    } else if medium > 0 {
        format!("{} medium-risk stock alerts in the last 24h, keep tracking. {}", medium, latest)
    } else {
        format!("{} low-risk stock alerts captured, sentiment looks contained. {}", signals.len(), latest)
    }
}

/// Placeholder snapshot used when the daily snapshot row is missing.
pub fn base_market_snapshot(now: DateTime<Utc>) -> MarketSnapshot {
    MarketSnapshot {
        snapshot_date: now,
        spy: None,
        qqq: None,
        dia: None,
        vix: None,
        us10y: None,
        dxy: None,
        risk_level: RiskLevel::L1,
        daily_brief: NO_SNAPSHOT_BRIEF.to_string(),
        updated_at: now,
    }
}

/// Risk level and brief always come from the live signals, never the row.
pub fn market_snapshot_from_signals(
    row: Option<MarketSnapshot>,
    signals: &[SentinelSignal],
    now: DateTime<Utc>,
) -> MarketSnapshot {
    let mut snapshot = row.unwrap_or_else(|| base_market_snapshot(now));
    snapshot.risk_level = top_risk(signals);
    snapshot.daily_brief = derive_brief(signals);
    snapshot
}

pub fn freshness_minutes(updated_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    match updated_at {
        Some(ts) => {
            let seconds = (now - ts).num_seconds().max(0);
            (seconds as f64 / 60.0).round() as i64
        }
        None => MISSING_FRESHNESS_MINUTES,
    }
}

pub fn classify_freshness(minutes: i64) -> FreshnessLevel {
    if minutes <= FRESH_MINUTES {
        FreshnessLevel::Fresh
    } else if minutes <= STALE_MINUTES {
        FreshnessLevel::Stale
    } else {
        FreshnessLevel::Critical
    }
}

/// Latest reported status of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStatus {
    pub source_id: String,
    pub status: String,
}

/// Rows must be newest first; only the first row per source counts.
pub fn summarize_source_health(rows: &[SourceStatus]) -> SourceHealthCounts {
    let mut seen = HashSet::new();
    let mut counts = SourceHealthCounts::default();
    for row in rows {
        let source_id = row.source_id.trim();
        if source_id.is_empty() || !seen.insert(source_id.to_string()) {
            continue;
        }
        match row.status.trim().to_lowercase().as_str() {
            "healthy" => counts.healthy += 1,
            "degraded" => counts.degraded += 1,
            "critical" => counts.critical += 1,
            _ => {}
        }
    }
    counts
}

/// Fails open: no health data reads as healthy.
pub fn health_status(counts: &SourceHealthCounts) -> HealthStatus {
    if counts.critical > 0 {
        HealthStatus::Critical
    } else if counts.degraded > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

pub fn build_data_quality(
    data_updated_at: Option<DateTime<Utc>>,
    counts: SourceHealthCounts,
    now: DateTime<Utc>,
) -> DataQualitySnapshot {
    let minutes = freshness_minutes(data_updated_at, now);
    DataQualitySnapshot {
        freshness_minutes: minutes,
        freshness_level: classify_freshness(minutes),
        source_health_status: health_status(&counts),
        source_health_healthy: counts.healthy,
        source_health_degraded: counts.degraded,
        source_health_critical: counts.critical,
    }
}

/// Group signals by the ticker in a `prefix:TICKER` sentinel id.
pub fn digest_from_signals(signals: &[SentinelSignal]) -> Vec<TickerSignalDigest> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&SentinelSignal>> = HashMap::new();
    for signal in signals {
        let ticker = match signal.sentinel_id.split(':').nth(1) {
            Some(t) if !t.trim().is_empty() => t.trim().to_uppercase(),
            _ => continue,
        };
        if !groups.contains_key(&ticker) {
            order.push(ticker.clone());
        }
        groups.entry(ticker).or_default().push(signal);
    }

    let mut digest: Vec<TickerSignalDigest> = order
        .into_iter()
        .filter_map(|ticker| {
            let rows = groups.remove(&ticker)?;
            let levels: Vec<SentinelSignal> = rows.iter().map(|s| (*s).clone()).collect();
            Some(TickerSignalDigest {
                signal_count_24h: rows.len() as u32,
                related_cluster_count_24h: 0,
                risk_level: top_risk(&levels),
                top_sentinel_levels: rows.iter().take(3).map(|s| s.alert_level.as_str().to_string()).collect(),
                updated_at: rows[0].created_at,
                ticker,
            })
        })
        .collect();
    digest.sort_by(|a, b| b.signal_count_24h.cmp(&a.signal_count_24h));
    digest
}

/// Signal grouping first; with no groupable signals, one row per opportunity.
pub fn digest_from_v2(signals: &[SentinelSignal], opportunities: &[OpportunityItem]) -> Vec<TickerSignalDigest> {
    let from_signals = digest_from_signals(signals);
    if !from_signals.is_empty() {
        return from_signals;
    }
    opportunities
        .iter()
        .take(20)
        .map(|opp| TickerSignalDigest {
            ticker: opp.ticker.clone(),
            signal_count_24h: opp.source_signal_ids.len().max(1) as u32,
            related_cluster_count_24h: opp.source_cluster_ids.len() as u32,
            risk_level: opp.risk_level,
            top_sentinel_levels: vec![opp.risk_level.as_str().to_string()],
            updated_at: opp.as_of,
        })
        .collect()
}

/// Last resort: scan descriptions for the fallback watch list. Tickers
/// nobody mentions are left out.
pub fn digest_from_mentions(
    signals: &[SentinelSignal],
    rules: &RelevanceRules,
    now: DateTime<Utc>,
) -> Vec<TickerSignalDigest> {
    rules
        .fallback_tickers
        .iter()
        .filter_map(|ticker| {
            let matched = mentioning(signals, ticker);
            if matched.is_empty() {
                return None;
            }
            Some(TickerSignalDigest {
                ticker: ticker.clone(),
                signal_count_24h: matched.len() as u32,
                related_cluster_count_24h: matched.len() as u32,
                risk_level: top_risk(&matched),
                top_sentinel_levels: matched.iter().take(3).map(|s| s.alert_level.as_str().to_string()).collect(),
                updated_at: now,
            })
        })
        .collect()
}

fn mentioning(signals: &[SentinelSignal], ticker: &str) -> Vec<SentinelSignal> {
    let ticker = ticker.to_uppercase();
    signals
        .iter()
        .filter(|s| s.description.to_uppercase().contains(&ticker))
        .cloned()
        .collect()
}

/// Placeholder opportunities for watch-list tickers that have signals, used
/// when the opportunity table cannot be read.
pub fn fallback_opportunities(
    digest: &[TickerSignalDigest],
    signals: &[SentinelSignal],
    rules: &RelevanceRules,
    now: DateTime<Utc>,
) -> Vec<OpportunityItem> {
    let by_ticker: HashMap<&str, &TickerSignalDigest> = digest.iter().map(|d| (d.ticker.as_str(), d)).collect();

    rules
        .fallback_tickers
        .iter()
        .take(8)
        .enumerate()
        .filter_map(|(idx, ticker)| {
            let entry = by_ticker.get(ticker.as_str())?;
            let count = entry.signal_count_24h;
            if count == 0 {
                return None;
            }
            let side = if idx % 3 == 0 { Side::Short } else { Side::Long };
            let invalid_if = match side {
                Side::Long => "Invalid if risk appetite weakens and related signals clear out.",
                Side::Short => "Invalid if risk appetite recovers quickly and negative signals fade.",
            };
            Some(OpportunityItem {
                id: idx as i64 + 1,
                ticker: ticker.clone(),
                side,
                horizon: Horizon::A,
                opportunity_score: (45.0 + count as f64 * 5.0).clamp(20.0, 85.0),
                confidence: (0.5 + count as f64 * 0.04).clamp(0.45, 0.8),
                risk_level: entry.risk_level,
                why_now: format!("{} saw {} related signals in the last 24h, a short-term window is open.", ticker, count),
                invalid_if: invalid_if.to_string(),
                catalysts: mentioning(signals, ticker).into_iter().take(2).map(|s| s.description).collect(),
                factor_breakdown: BTreeMap::new(),
                source_signal_ids: Vec::new(),
                source_event_ids: Vec::new(),
                source_cluster_ids: Vec::new(),
                source_mix: None,
                evidence_ids: Vec::new(),
                path_ids: Vec::new(),
                uncertainty_flags: Vec::new(),
                counter_view: String::new(),
                evidences: None,
                transmission_paths: None,
                ai_debate_view: None,
                source_origin: SourceOrigin::Direct,
                expires_at: now + Duration::hours(48),
                as_of: now,
            })
        })
        .collect()
}

/// One ticker-to-event link from the event/ticker join table.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTickerLink {
    pub event_id: i64,
    pub ticker: String,
    pub confidence: f64,
}

struct PairStats {
    count: u32,
    confidence: f64,
    last_seen: DateTime<Utc>,
}

/// Ticker pairs that appear together in the same event.
///
/// Pairs are keyed in sorted order so (A, B) and (B, A) land on the same
/// relation. Per-pair confidence is a running average of per-event averages.
pub fn co_occurrence_relations(
    event_times: &HashMap<i64, DateTime<Utc>>,
    links: &[EventTickerLink],
    now: DateTime<Utc>,
) -> Vec<EntityRelationItem> {
    let mut event_order: Vec<i64> = Vec::new();
    let mut by_event: HashMap<i64, Vec<&EventTickerLink>> = HashMap::new();
    for link in links {
        if link.event_id <= 0 || link.ticker.trim().is_empty() {
            continue;
        }
        if !by_event.contains_key(&link.event_id) {
            event_order.push(link.event_id);
        }
        by_event.entry(link.event_id).or_default().push(link);
    }

    let mut pairs: BTreeMap<(String, String), PairStats> = BTreeMap::new();
    for event_id in event_order {
        let Some(rows) = by_event.get(&event_id) else {
            continue;
        };
        let tickers: Vec<String> = rows
            .iter()
            .map(|l| l.ticker.trim().to_uppercase())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if tickers.len() < 2 {
            continue;
        }
        let avg = rows.iter().map(|l| l.confidence.clamp(0.0, 1.0)).sum::<f64>() / rows.len() as f64;
        let seen = event_times.get(&event_id).copied().unwrap_or(now);

        for i in 0..tickers.len() - 1 {
            for j in i + 1..tickers.len() {
                let key = (tickers[i].clone(), tickers[j].clone());
                match pairs.get_mut(&key) {
                    Some(stats) => {
                        stats.count += 1;
                        stats.confidence = (stats.confidence + avg) / 2.0;
                        if seen > stats.last_seen {
                            stats.last_seen = seen;
                        }
                    }
                    None => {
                        pairs.insert(key, PairStats { count: 1, confidence: avg, last_seen: seen });
                    }
                }
            }
        }
    }

    let mut relations: Vec<EntityRelationItem> = pairs
        .into_iter()
        .map(|((left, right), stats)| EntityRelationItem {
            id: stable_id_from_text(&format!("{}|{}", left, right)),
            relation_text: format!("Co-mentioned in {} stock events", stats.count),
            confidence: (0.45 + stats.count as f64 * 0.08 + stats.confidence * 0.2).clamp(0.0, 1.0),
            last_seen: stats.last_seen,
            entity1_name: left,
            entity2_name: right,
        })
        .collect();
    relations.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| b.last_seen.cmp(&a.last_seen))
    });
    relations.truncate(RELATION_LIMIT);
    relations
}

/// 32-bit rolling hash over UTF-16 units, made positive. Display ids only:
/// collisions are possible.
pub fn stable_id_from_text(text: &str) -> i64 {
    let hash = text
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_shl(5).wrapping_sub(h).wrapping_add(unit as i32));
    let positive = (hash as i64).abs();
    if positive == 0 {
        1
    } else {
        positive
    }
}

#[derive(Default)]
struct HandleStats {
    mentions: u32,
    mixed: u32,
    ratio_sum: f64,
    latest_at: Option<DateTime<Utc>>,
}

/// Fold every source mix with X posts into per-handle stats.
pub fn x_source_radar(signals: &[SentinelSignal], opportunities: &[OpportunityItem]) -> Vec<XSourceRadarItem> {
    let mut bucket: BTreeMap<String, HandleStats> = BTreeMap::new();
    let mut merge = |mix: Option<&SourceMix>, at: DateTime<Utc>| {
        let Some(mix) = mix.filter(|m| m.x_count > 0) else {
            return;
        };
        let ratio = mix.x_ratio.clamp(0.0, 1.0);
        for raw in &mix.top_x_handles {
            let handle = normalize_handle(raw);
            if handle.is_empty() {
                continue;
            }
            let stats = bucket.entry(handle).or_default();
            stats.mentions += 1;
            stats.ratio_sum += ratio;
            if mix.mixed_sources {
                stats.mixed += 1;
            }
            if stats.latest_at.map_or(true, |prev| at > prev) {
                stats.latest_at = Some(at);
            }
        }
    };

    for signal in signals {
        merge(signal.source_mix.as_ref(), signal.created_at);
    }
    for opp in opportunities {
        merge(opp.source_mix.as_ref(), opp.as_of);
    }

    let mut radar: Vec<XSourceRadarItem> = bucket
        .into_iter()
        .filter_map(|(handle, stats)| {
            Some(XSourceRadarItem {
                avg_x_ratio: round4(stats.ratio_sum / stats.mentions.max(1) as f64),
                mentions: stats.mentions,
                mixed_count: stats.mixed,
                latest_at: stats.latest_at?,
                handle,
            })
        })
        .collect();
    // Handles are unique, so the order is total and independent of input order.
    radar.sort_by(|a, b| {
        b.mentions
            .cmp(&a.mentions)
            .then_with(|| b.avg_x_ratio.total_cmp(&a.avg_x_ratio))
            .then_with(|| a.handle.cmp(&b.handle))
    });
    radar.truncate(RADAR_LIMIT);
    radar
}

fn normalize_handle(raw: &str) -> String {
    raw.trim().trim_start_matches('@').trim().to_string()
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Indirect when any backing event was promoted from the indirect pool.
pub fn tag_source_origin(opportunities: Vec<OpportunityItem>, indirect_event_ids: &HashSet<i64>) -> Vec<OpportunityItem> {
    opportunities
        .into_iter()
        .map(|mut opp| {
            opp.source_origin = if opp.source_event_ids.iter().any(|id| indirect_event_ids.contains(id)) {
                SourceOrigin::Indirect
            } else {
                SourceOrigin::Direct
            };
            opp
        })
        .collect()
}

/// Latest of the known instants, else `now`.
pub fn latest_instant(values: &[Option<DateTime<Utc>>], now: DateTime<Utc>) -> DateTime<Utc> {
    values.iter().flatten().copied().max().unwrap_or(now)
}

const PRE_TRADE_CHECKS: [&str; 3] = [
    "Verify key figures and publish times against the original sources.",
    "Check for opposing catalysts within the next 24h.",
    "Size the entry against position and risk limits.",
];

/// Pro/counter summary of an opportunity. `None` when it has nothing to debate.
pub fn build_ai_debate_view(opportunity: &OpportunityItem) -> Option<AiDebateView> {
    let pro_case = opportunity.why_now.trim();
    let counter_case = opportunity.counter_view.trim();
    let uncertainties: Vec<String> = opportunity
        .uncertainty_flags
        .iter()
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .collect();

    if pro_case.is_empty() && counter_case.is_empty() && uncertainties.is_empty() {
        return None;
    }

    Some(AiDebateView {
        pro_case: non_empty_or(pro_case, "Current signals and catalysts support this direction."),
        counter_case: non_empty_or(counter_case, "An opposing macro or sector catalyst would invalidate this view."),
        uncertainties: if uncertainties.is_empty() {
            vec!["Evidence may be stale or biased toward a single source.".to_string()]
        } else {
            uncertainties
        },
        pre_trade_checks: PRE_TRADE_CHECKS.iter().map(|c| c.to_string()).collect(),
    })
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

/// Display label for an event type or cluster category.
pub fn event_type_label(event_type: &str) -> &'static str {
    match event_type.trim().to_lowercase().as_str() {
        "earnings" => "Earnings",
        "macro" => "Macro",
        "policy" => "Policy",
        "flow" => "Fund flow",
        "sector" => "Sector",
        _ => "News",
    }
}

/// Group V2 event rows (newest first) into one cluster per event type.
pub fn cluster_events_by_type(events: &[Row], now: DateTime<Utc>) -> Vec<HotCluster> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&Row>> = HashMap::new();
    for row in events {
        let event_type = text_or(row.get("event_type"), "news").trim().to_lowercase();
        if !groups.contains_key(&event_type) {
            order.push(event_type.clone());
        }
        groups.entry(event_type).or_default().push(row);
    }

    let mut clusters: Vec<HotCluster> = order
        .iter()
        .filter_map(|event_type| {
            let items = groups.get(event_type)?;
            let latest = items.first()?;
            let category = event_type_label(event_type);
            let details = object(latest.get("details"));
            let detail_title = details
                .map(|d| {
                    let title = text(d.get("title_zh")).trim().to_string();
                    if title.is_empty() {
                        text(d.get("summary_zh")).trim().to_string()
                    } else {
                        title
                    }
                })
                .unwrap_or_default();
            let latest_summary = text(latest.get("summary")).trim().to_string();
            let primary_title = [detail_title, latest_summary]
                .into_iter()
                .find(|t| !t.is_empty())
                .unwrap_or_else(|| format!("{} event cluster", category));

            let summary = items
                .iter()
                .take(3)
                .map(|item| {
                    let detail_summary = object(item.get("details"))
                        .map(|d| text(d.get("summary_zh")).trim().to_string())
                        .unwrap_or_default();
                    if detail_summary.is_empty() {
                        text(item.get("summary")).trim().to_string()
                    } else {
                        detail_summary
                    }
                })
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("; ");

            Some(HotCluster {
                id: dashboard_core::coerce::integer(latest.get("id")),
                category: category.to_string(),
                primary_title,
                summary: if summary.is_empty() { "No summary available".to_string() } else { summary },
                article_count: items.len() as u32,
                created_at: timestamp_or(latest.get("as_of"), now),
            })
        })
        .collect();

    clusters.sort_by(|a, b| {
        b.article_count
            .cmp(&a.article_count)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    clusters.truncate(CLUSTER_LIMIT);
    clusters
}

const PROFILE_SEED: [(&str, &str, AssetType, &str, &str, &str); 17] = [
    ("SPY", "SPDR S&P 500 ETF", AssetType::Etf, "Index", "US Large Cap", "Tracks the S&P 500, a gauge of overall US risk appetite and trend."),
    ("QQQ", "Invesco QQQ Trust", AssetType::Etf, "Index", "Nasdaq 100", "Tracks the Nasdaq 100, tech heavy and sensitive to growth style and rates."),
    ("DIA", "SPDR Dow Jones Industrial Average ETF", AssetType::Etf, "Index", "Dow 30", "Tracks the Dow industrials, large-cap blue chips with a defensive tilt."),
    ("IWM", "iShares Russell 2000 ETF", AssetType::Etf, "Index", "Small Cap", "Tracks the Russell 2000, a read on risk appetite and domestic demand."),
    ("XLF", "Financial Select Sector SPDR", AssetType::Etf, "Financials", "Sector ETF", "Financials, sensitive to the yield curve, credit and regulation."),
    ("XLK", "Technology Select Sector SPDR", AssetType::Etf, "Technology", "Sector ETF", "Technology, driven by AI capex, earnings expectations and valuation."),
    ("XLE", "Energy Select Sector SPDR", AssetType::Etf, "Energy", "Sector ETF", "Energy, tied to oil prices, geopolitics and the supply cycle."),
    ("XLV", "Health Care Select Sector SPDR", AssetType::Etf, "Healthcare", "Sector ETF", "Healthcare, defensive but exposed to policy and regulation."),
    ("SMH", "VanEck Semiconductor ETF", AssetType::Etf, "Technology", "Semiconductors", "Semiconductors, driven by the AI compute cycle, inventory and capex."),
    ("TLT", "iShares 20+ Year Treasury Bond ETF", AssetType::Etf, "Rates", "US Treasury", "Long-duration Treasuries, a read on rate expectations and risk-off flows."),
    ("AAPL", "Apple Inc.", AssetType::Equity, "Technology", "Consumer Electronics", "Consumer electronics leader, watch product cycles, services and global demand."),
    ("MSFT", "Microsoft Corporation", AssetType::Equity, "Technology", "Software", "Software and cloud leader, watch cloud growth, AI monetization and margins."),
    ("NVDA", "NVIDIA Corporation", AssetType::Equity, "Technology", "Semiconductors", "Core AI chip supplier, watch data center demand, supply and valuation."),
    ("AMZN", "Amazon.com, Inc.", AssetType::Equity, "Consumer Discretionary", "E-commerce & Cloud", "Retail and cloud, watch AWS growth, consumer strength and margins."),
    ("GOOGL", "Alphabet Inc.", AssetType::Equity, "Technology", "Internet Services", "Search and ads leader, watch ad demand, cloud and AI competition."),
    ("META", "Meta Platforms, Inc.", AssetType::Equity, "Technology", "Social Media", "Social ads platform, watch ad efficiency, user growth and AI spend."),
    ("TSLA", "Tesla, Inc.", AssetType::Equity, "Consumer Discretionary", "EV & Energy Storage", "EV leader, watch deliveries, pricing and autonomy progress."),
];

pub const DEFAULT_PROFILE_SUMMARY: &str =
    "US watch-list name; cross-check source evidence and sector context before acting.";

/// Seeded profile for well-known tickers, a generic one otherwise.
pub fn fallback_ticker_profile(ticker: &str) -> TickerProfile {
    let upper = ticker.trim().to_uppercase();
    match PROFILE_SEED.iter().find(|seed| seed.0 == upper) {
        Some((ticker, name, asset_type, sector, industry, summary)) => TickerProfile {
            ticker: ticker.to_string(),
            display_name: name.to_string(),
            asset_type: *asset_type,
            sector: sector.to_string(),
            industry: industry.to_string(),
            summary: summary.to_string(),
        },
        None => TickerProfile {
            display_name: upper.clone(),
            ticker: upper,
            asset_type: AssetType::Unknown,
            sector: "Unknown".to_string(),
            industry: "Unknown".to_string(),
            summary: DEFAULT_PROFILE_SUMMARY.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn signal(id: i64, sentinel_id: &str, level: RiskLevel, description: &str) -> SentinelSignal {
        SentinelSignal {
            id,
            cluster_id: None,
            sentinel_id: sentinel_id.to_string(),
            alert_level: level,
            risk_score: 0.5,
            description: description.to_string(),
            trigger_reasons: Vec::new(),
            evidence_links: Vec::new(),
            source_mix: None,
            created_at: now() - Duration::minutes(id),
        }
    }

    fn mix(handles: &[&str], x_ratio: f64, x_count: u32, mixed: bool) -> SourceMix {
        SourceMix {
            x_count,
            article_count: 1,
            other_count: 0,
            source_total: x_count + 1,
            x_ratio,
            mixed_sources: mixed,
            top_x_handles: handles.iter().map(|h| h.to_string()).collect(),
            latest_x_at: now(),
            latest_news_at: now(),
        }
    }

    fn opportunity(id: i64, ticker: &str) -> OpportunityItem {
        OpportunityItem {
            id,
            ticker: ticker.to_string(),
            side: Side::Long,
            horizon: Horizon::A,
            opportunity_score: 60.0,
            confidence: 0.6,
            risk_level: RiskLevel::L2,
            why_now: String::new(),
            invalid_if: String::new(),
            catalysts: Vec::new(),
            factor_breakdown: BTreeMap::new(),
            source_signal_ids: Vec::new(),
            source_event_ids: Vec::new(),
            source_cluster_ids: Vec::new(),
            source_mix: None,
            evidence_ids: Vec::new(),
            path_ids: Vec::new(),
            uncertainty_flags: Vec::new(),
            counter_view: String::new(),
            evidences: None,
            transmission_paths: None,
            ai_debate_view: None,
            source_origin: SourceOrigin::Direct,
            expires_at: now() + Duration::hours(4),
            as_of: now(),
        }
    }

    #[test]
    fn test_top_risk_default_and_monotonic() {
        assert_eq!(top_risk(&[]), RiskLevel::L1);

        let mut signals = vec![signal(1, "a", RiskLevel::L2, "x")];
        let mut previous = top_risk(&signals);
        for level in [RiskLevel::L0, RiskLevel::L4, RiskLevel::L1, RiskLevel::L3] {
            signals.push(signal(2, "a", level, "x"));
            let current = top_risk(&signals);
            assert!(current >= previous);
            previous = current;
        }
        assert_eq!(previous, RiskLevel::L4);
    }

    #[test]
    fn test_brief_buckets() {
        assert_eq!(derive_brief(&[]), NO_ALERT_BRIEF);

        let high = derive_brief(&[
            signal(1, "a", RiskLevel::L3, "Fed surprise"),
            signal(2, "a", RiskLevel::L2, "older"),
        ]);
        assert!(high.starts_with("1 high-risk"));
        assert!(high.ends_with("Fed surprise"));

        let medium = derive_brief(&[signal(1, "a", RiskLevel::L2, "Yield spike")]);
        assert!(medium.starts_with("1 medium-risk"));

        let low = derive_brief(&[signal(1, "a", RiskLevel::L1, ""), signal(2, "a", RiskLevel::L0, "y")]);
        assert!(low.starts_with("2 low-risk"));
        assert!(low.ends_with("The monitor picked up new risk leads."));
    }

    #[test]
    fn test_freshness_boundaries() {
        let cases = [
            (29, FreshnessLevel::Fresh),
            (30, FreshnessLevel::Fresh),
            (31, FreshnessLevel::Stale),
            (120, FreshnessLevel::Stale),
            (121, FreshnessLevel::Critical),
        ];
        for (minutes, expected) in cases {
            let updated = now() - Duration::minutes(minutes);
            let elapsed = freshness_minutes(Some(updated), now());
            assert_eq!(elapsed, minutes);
            assert_eq!(classify_freshness(elapsed), expected, "{minutes} minutes");
        }
    }

    #[test]
    fn test_missing_timestamp_is_critical() {
        let quality = build_data_quality(None, SourceHealthCounts::default(), now());
        assert_eq!(quality.freshness_minutes, MISSING_FRESHNESS_MINUTES);
        assert_eq!(quality.freshness_level, FreshnessLevel::Critical);
        assert_eq!(quality.source_health_status, HealthStatus::Healthy);

        // Future timestamps clamp to zero elapsed minutes.
        assert_eq!(freshness_minutes(Some(now() + Duration::minutes(5)), now()), 0);
    }

    #[test]
    fn test_source_health_first_row_wins() {
        let rows = vec![
            SourceStatus { source_id: "rss".into(), status: "degraded".into() },
            SourceStatus { source_id: "rss".into(), status: "critical".into() },
            SourceStatus { source_id: "x".into(), status: "Healthy".into() },
            SourceStatus { source_id: "".into(), status: "critical".into() },
        ];
        let counts = summarize_source_health(&rows);
        assert_eq!(counts, SourceHealthCounts { healthy: 1, degraded: 1, critical: 0 });
        assert_eq!(health_status(&counts), HealthStatus::Degraded);
        assert_eq!(health_status(&SourceHealthCounts { healthy: 3, degraded: 2, critical: 1 }), HealthStatus::Critical);
        assert_eq!(health_status(&SourceHealthCounts::default()), HealthStatus::Healthy);
    }

    #[test]
    fn test_digest_from_signals() {
        let signals = vec![
            signal(1, "stock:NVDA", RiskLevel::L2, "a"),
            signal(2, "stock:AAPL", RiskLevel::L3, "b"),
            signal(3, "stock:NVDA", RiskLevel::L4, "c"),
            signal(4, "no_ticker", RiskLevel::L4, "d"),
            signal(5, "stock:NVDA", RiskLevel::L0, "e"),
            signal(6, "stock:NVDA", RiskLevel::L1, "f"),
        ];
        let digest = digest_from_signals(&signals);
        assert_eq!(digest.len(), 2);
        assert_eq!(digest[0].ticker, "NVDA");
        assert_eq!(digest[0].signal_count_24h, 4);
        assert_eq!(digest[0].risk_level, RiskLevel::L4);
        assert_eq!(digest[0].top_sentinel_levels, vec!["L2", "L4", "L0"]);
        assert_eq!(digest[0].updated_at, signals[0].created_at);
        assert_eq!(digest[1].ticker, "AAPL");
    }

    #[test]
    fn test_digest_from_v2_uses_opportunities() {
        let mut opp = opportunity(1, "MSFT");
        opp.source_signal_ids = vec![4, 5];
        let digest = digest_from_v2(&[signal(1, "untagged", RiskLevel::L3, "x")], &[opp, opportunity(2, "TSLA")]);
        assert_eq!(digest.len(), 2);
        assert_eq!(digest[0].signal_count_24h, 2);
        assert_eq!(digest[1].signal_count_24h, 1);
        assert_eq!(digest[1].top_sentinel_levels, vec!["L2"]);
    }

    #[test]
    fn test_mentions_and_fallback_opportunities() {
        let rules = RelevanceRules::default();
        let signals = vec![
            signal(1, "w", RiskLevel::L3, "SPY gap down"),
            signal(2, "w", RiskLevel::L2, "spy puts bid"),
            signal(3, "w", RiskLevel::L2, "QQQ flat"),
        ];
        let digest = digest_from_mentions(&signals, &rules, now());
        let tickers: Vec<&str> = digest.iter().map(|d| d.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["SPY", "QQQ"]);
        assert_eq!(digest[0].risk_level, RiskLevel::L3);

        let opps = fallback_opportunities(&digest, &signals, &rules, now());
        assert_eq!(opps.len(), 2);
        assert_eq!(opps[0].ticker, "SPY");
        assert_eq!(opps[0].side, Side::Short);
        assert_eq!(opps[0].opportunity_score, 55.0);
        assert!((opps[0].confidence - 0.58).abs() < 1e-9);
        assert_eq!(opps[0].catalysts, vec!["SPY gap down", "spy puts bid"]);
        assert_eq!(opps[1].side, Side::Long);
        assert_eq!(opps[1].id, 2);
        assert!(opps.iter().all(|o| o.expires_at == now() + Duration::hours(48)));

        assert!(fallback_opportunities(&[], &signals, &rules, now()).is_empty());
    }

    #[test]
    fn test_relations_are_symmetric() {
        let times = HashMap::from([(1, now() - Duration::hours(2)), (2, now())]);
        let link = |event_id, ticker: &str, confidence| EventTickerLink { event_id, ticker: ticker.into(), confidence };

        let forward = co_occurrence_relations(
            &times,
            &[link(1, "NVDA", 0.8), link(1, "AAPL", 0.6), link(2, "AAPL", 1.0), link(2, "NVDA", 1.0)],
            now(),
        );
        let backward = co_occurrence_relations(
            &times,
            &[link(1, "AAPL", 0.6), link(1, "NVDA", 0.8), link(2, "NVDA", 1.0), link(2, "AAPL", 1.0)],
            now(),
        );
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 1);

        let rel = &forward[0];
        assert_eq!((rel.entity1_name.as_str(), rel.entity2_name.as_str()), ("AAPL", "NVDA"));
        // avg 0.7 then (0.7 + 1.0) / 2 = 0.85; 0.45 + 0.16 + 0.17
        assert!((rel.confidence - 0.78).abs() < 1e-9);
        assert_eq!(rel.last_seen, now());
        assert_eq!(rel.id, stable_id_from_text("AAPL|NVDA"));
    }

    #[test]
    fn test_relations_skip_single_ticker_events_and_sort() {
        let times = HashMap::new();
        let links = vec![
            EventTickerLink { event_id: 1, ticker: "SPY".into(), confidence: 0.9 },
            EventTickerLink { event_id: 1, ticker: "spy".into(), confidence: 0.9 },
            EventTickerLink { event_id: 2, ticker: "QQQ".into(), confidence: 0.1 },
            EventTickerLink { event_id: 2, ticker: "TLT".into(), confidence: 0.1 },
            EventTickerLink { event_id: 3, ticker: "XLE".into(), confidence: 0.9 },
            EventTickerLink { event_id: 3, ticker: "XLF".into(), confidence: 0.9 },
        ];
        let relations = co_occurrence_relations(&times, &links, now());
        assert_eq!(relations.len(), 2);
        assert_eq!(relations[0].entity1_name, "XLE");
        assert!(relations.iter().all(|r| r.last_seen == now()));
    }

    #[test]
    fn test_stable_id() {
        assert_eq!(stable_id_from_text(""), 1);
        assert_eq!(stable_id_from_text("a"), 97);
        assert_eq!(stable_id_from_text("ab"), 97 * 31 + 98);
        assert_eq!(stable_id_from_text("AAPL|NVDA"), stable_id_from_text("AAPL|NVDA"));
        assert!(stable_id_from_text("a much longer key that overflows 32 bits|XYZ") > 0);
    }

    #[test]
    fn test_radar_shared_handle() {
        let mut first = signal(1, "stock_v2:NVDA", RiskLevel::L2, "NVDA");
        first.source_mix = Some(mix(&["@trader1"], 0.6, 3, true));
        let mut second = signal(2, "stock_v2:NVDA", RiskLevel::L2, "NVDA");
        second.source_mix = Some(mix(&[" trader1 ", "@macro_desk"], 0.8, 2, false));

        let radar = x_source_radar(&[first.clone(), second.clone()], &[]);
        assert_eq!(radar[0].handle, "trader1");
        assert_eq!(radar[0].mentions, 2);
        assert_eq!(radar[0].mixed_count, 1);
        assert!((radar[0].avg_x_ratio - 0.7).abs() < 1e-9);
        assert_eq!(radar[0].latest_at, first.created_at);
        assert_eq!(radar[1].handle, "macro_desk");
    }

    #[test]
    fn test_radar_is_order_independent() {
        let mut items: Vec<SentinelSignal> = (0..6)
            .map(|i| {
                let mut s = signal(i, "a", RiskLevel::L1, "x");
                let handles: &[&str] = if i % 2 == 0 { &["@a", "@b"] } else { &["@b", "@c"] };
                s.source_mix = Some(mix(handles, 0.1 * (i + 1) as f64, 1, i % 3 == 0));
                s
            })
            .collect();
        let mut opp = opportunity(1, "SPY");
        opp.source_mix = Some(mix(&["@c"], 0.33, 4, true));
        let mut skipped = signal(9, "a", RiskLevel::L1, "x");
        skipped.source_mix = Some(mix(&["@ghost"], 1.0, 0, true));
        items.push(skipped);

        let expected = x_source_radar(&items, std::slice::from_ref(&opp));
        items.reverse();
        items.swap(0, 3);
        let shuffled = x_source_radar(&items, std::slice::from_ref(&opp));

        assert_eq!(expected.len(), 3);
        assert!(expected.iter().all(|r| r.handle != "ghost"));
        for (a, b) in expected.iter().zip(shuffled.iter()) {
            assert_eq!(a.handle, b.handle);
            assert_eq!(a.mentions, b.mentions);
            assert!((a.avg_x_ratio - b.avg_x_ratio).abs() < 1e-9);
        }
    }

    #[test]
    fn test_tag_source_origin() {
        let mut indirect = opportunity(1, "XLE");
        indirect.source_event_ids = vec![3, 7];
        let mut direct = opportunity(2, "XLF");
        direct.source_event_ids = vec![8];
        let tagged = tag_source_origin(vec![indirect, direct, opportunity(3, "SPY")], &HashSet::from([7]));
        let origins: Vec<SourceOrigin> = tagged.iter().map(|o| o.source_origin).collect();
        assert_eq!(origins, vec![SourceOrigin::Indirect, SourceOrigin::Direct, SourceOrigin::Direct]);
    }

    #[test]
    fn test_latest_instant() {
        assert_eq!(latest_instant(&[None, Some(now() - Duration::hours(1)), None], now()), now() - Duration::hours(1));
        assert_eq!(latest_instant(&[], now()), now());
    }

    #[test]
    fn test_ai_debate_view() {
        let opp = opportunity(1, "NVDA");
        assert!(build_ai_debate_view(&opp).is_none());

        let mut opp = opportunity(1, "NVDA");
        opp.counter_view = " Export curbs ".into();
        opp.uncertainty_flags = vec!["".into(), " guidance ".into()];
        let view = build_ai_debate_view(&opp).unwrap();
        assert_eq!(view.counter_case, "Export curbs");
        assert_eq!(view.uncertainties, vec!["guidance"]);
        assert!(view.pro_case.starts_with("Current signals"));
        assert_eq!(view.pre_trade_checks.len(), 3);
    }

    #[test]
    fn test_cluster_events_by_type() {
        let events: Vec<Row> = vec![
            json!({"id": 10, "event_type": "Earnings", "summary": "NVDA beat", "details": {"title_zh": "英伟达财报"}, "as_of": "2026-03-02T10:00:00Z"}),
            json!({"id": 11, "event_type": "macro", "summary": "CPI hot", "as_of": "2026-03-02T09:00:00Z"}),
            json!({"id": 12, "event_type": "earnings", "summary": "AAPL inline", "details": {"summary_zh": "苹果符合预期"}, "as_of": "2026-03-02T08:00:00Z"}),
            json!({"id": 13, "summary": "", "as_of": "2026-03-02T11:00:00Z"}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();

        let clusters = cluster_events_by_type(&events, now());
        assert_eq!(clusters.len(), 3);
        assert_eq!(clusters[0].category, "Earnings");
        assert_eq!(clusters[0].id, 10);
        assert_eq!(clusters[0].article_count, 2);
        assert_eq!(clusters[0].primary_title, "英伟达财报");
        assert_eq!(clusters[0].summary, "NVDA beat; 苹果符合预期");
        // Equal counts fall back to recency.
        assert_eq!(clusters[1].category, "News");
        assert_eq!(clusters[1].primary_title, "News event cluster");
        assert_eq!(clusters[1].summary, "No summary available");
        assert_eq!(clusters[2].primary_title, "CPI hot");
    }

    #[test]
    fn test_market_snapshot_from_signals() {
        let signals = vec![signal(1, "a", RiskLevel::L2, "x"), signal(2, "a", RiskLevel::L4, "y")];
        let snapshot = market_snapshot_from_signals(None, &signals, now());
        assert_eq!(snapshot.risk_level, RiskLevel::L4);
        assert_eq!(snapshot.updated_at, now());
        assert!(snapshot.spy.is_none());

        let empty = market_snapshot_from_signals(None, &[], now());
        assert_eq!(empty.risk_level, RiskLevel::L1);
        assert_eq!(empty.daily_brief, NO_ALERT_BRIEF);
    }

    #[test]
    fn test_fallback_ticker_profile() {
        let seeded = fallback_ticker_profile("nvda");
        assert_eq!(seeded.display_name, "NVIDIA Corporation");
        assert_eq!(seeded.asset_type, AssetType::Equity);

        let generic = fallback_ticker_profile(" pltr ");
        assert_eq!(generic.ticker, "PLTR");
        assert_eq!(generic.display_name, "PLTR");
        assert_eq!(generic.asset_type, AssetType::Unknown);
        assert_eq!(generic.summary, DEFAULT_PROFILE_SUMMARY);
    }
}
