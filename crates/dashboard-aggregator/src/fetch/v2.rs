use chrono::{DateTime, Utc};
use dashboard_core::coerce::{
    catalyst_list, clamp, id_list, integer, number_or_zero, object_list, score, source_mix,
    string_list, text, text_or, timestamp_or, upper_text,
};
use dashboard_core::{
    Direction, EntityRelationItem, EvidenceItem, FetchOutcome, HotCluster, ImpactScope,
    IndirectImpactItem, MarketRegime, OpportunityItem, PromotionStatus, RiskLevel, Row, RowQuery,
    RowStore, SentinelSignal, TransmissionPath,
};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::legacy::regime_from_row;
use super::{first_row, is_live_opportunity, opportunity_from_row, read, unique_ids};
use crate::derive::{cluster_events_by_type, co_occurrence_relations, EventTickerLink};

const OPPORTUNITY_COLUMNS_NARROW: &str = "id,ticker,side,horizon,opportunity_score,confidence,risk_level,why_now,invalid_if,\
    catalysts,source_signal_ids,source_event_ids,source_mix,expires_at,as_of";

/// Columns added by the evidence/transmission migration. Older schemas lack them.
pub const OPTIONAL_OPPORTUNITY_COLUMNS: [&str; 4] = ["evidence_ids", "path_ids", "uncertainty_flags", "counter_view"];

const EVIDENCE_PER_OPPORTUNITY: usize = 6;
const PATHS_PER_OPPORTUNITY: usize = 3;

/// Latest row of the V2 dashboard snapshot table.
#[derive(Debug, Clone, PartialEq)]
pub struct V2SnapshotRow {
    pub snapshot_time: DateTime<Utc>,
    pub market_brief: String,
    pub risk_badge: RiskLevel,
    pub as_of: DateTime<Utc>,
}

pub fn signal_from_row(row: &Row, now: DateTime<Utc>) -> SentinelSignal {
    let ticker = upper_text(row.get("ticker"));
    let label = if ticker.is_empty() { "UNKNOWN".to_string() } else { ticker };
    SentinelSignal {
        id: integer(row.get("id")),
        cluster_id: None,
        sentinel_id: format!("stock_v2:{}", label),
        alert_level: RiskLevel::from_label(&text(row.get("level"))),
        risk_score: clamp(number_or_zero(row.get("signal_score")) / 100.0, 0.0, 1.0),
        description: text_or(row.get("explanation"), &format!("{} stock signal", label)),
        trigger_reasons: catalyst_list(row.get("trigger_factors")),
        evidence_links: id_list(row.get("source_event_ids"))
            .into_iter()
            .take(5)
            .map(|id| format!("event:{}", id))
            .collect(),
        source_mix: source_mix(row.get("source_mix"), now),
        created_at: timestamp_or(row.get("as_of"), now),
    }
}

pub async fn signals(store: &dyn RowStore, now: DateTime<Utc>) -> FetchOutcome<Vec<SentinelSignal>> {
    let query = RowQuery::table("stock_signals_v2")
        .select("id,ticker,level,signal_score,explanation,trigger_factors,source_event_ids,source_mix,as_of")
        .eq("is_active", true)
        .order_desc("signal_score")
        .limit(30);

    read(store, &query, "v2_signal_fallback")
        .await
        .map_rows(|rows| rows.iter().map(|row| signal_from_row(row, now)).collect())
}

fn opportunity_query(columns: &str) -> RowQuery {
    RowQuery::table("stock_opportunities_v2")
        .select(columns)
        .eq("is_active", true)
        .order_desc("opportunity_score")
        .limit(40)
}

/// Reads with the optional evidence columns first. If the schema predates
/// them, retries once without; any other failure is final.
pub async fn opportunities(store: &dyn RowStore, now: DateTime<Utc>) -> FetchOutcome<Vec<OpportunityItem>> {
    let wide = format!("{},{}", OPPORTUNITY_COLUMNS_NARROW, OPTIONAL_OPPORTUNITY_COLUMNS.join(","));
    let outcome = match store.select(&opportunity_query(&wide)).await {
        Ok(rows) => FetchOutcome::from_rows(rows),
        Err(e) if e.is_missing_any(&OPTIONAL_OPPORTUNITY_COLUMNS) => {
            tracing::warn!("v2_opp_select_fallback: {}, retrying with the narrow column set", e);
            read(store, &opportunity_query(OPPORTUNITY_COLUMNS_NARROW), "v2_opportunity_fallback").await
        }
        Err(e) => {
            tracing::warn!("v2_opportunity_fallback: {}", e);
            FetchOutcome::Failed(e)
        }
    };

    outcome.map_rows(|rows| {
        rows.iter()
            .map(|row| opportunity_from_row(row, now))
            .filter(|opp| is_live_opportunity(opp, now))
            .collect()
    })
}

pub async fn market_regime(store: &dyn RowStore, now: DateTime<Utc>) -> FetchOutcome<MarketRegime> {
    let query = RowQuery::table("stock_market_regime_v2")
        .select("regime_date,risk_state,vol_state,liquidity_state,regime_score,summary,as_of")
        .eq("is_active", true)
        .order_desc("as_of")
        .limit(1);

    first_row(read(store, &query, "v2_regime_fallback").await).map(|row| regime_from_row(&row, "regime_date", now))
}

pub async fn snapshot_row(store: &dyn RowStore, now: DateTime<Utc>) -> FetchOutcome<V2SnapshotRow> {
    let query = RowQuery::table("stock_dashboard_snapshot_v2")
        .select("snapshot_time,market_brief,risk_badge,as_of")
        .eq("is_active", true)
        .order_desc("snapshot_time")
        .limit(1);

    first_row(read(store, &query, "v2_snapshot_fallback").await).map(|row| V2SnapshotRow {
        snapshot_time: timestamp_or(row.get("snapshot_time"), now),
        market_brief: text(row.get("market_brief")).trim().to_string(),
        risk_badge: RiskLevel::from_label(&text(row.get("risk_badge"))),
        as_of: timestamp_or(row.get("as_of"), now),
    })
}

fn theme_label(theme: &str) -> String {
    match theme.trim() {
        "macro" => "Macro".to_string(),
        "rate_fx" => "Rates/FX".to_string(),
        "policy" => "Policy".to_string(),
        "geopolitics" => "Geopolitics".to_string(),
        "commodity" => "Commodities".to_string(),
        "supply_chain" => "Supply chain".to_string(),
        "" => "Other".to_string(),
        other => other.to_string(),
    }
}

pub fn indirect_from_row(row: &Row, now: DateTime<Utc>) -> IndirectImpactItem {
    IndirectImpactItem {
        id: integer(row.get("id")),
        theme: theme_label(&text(row.get("theme"))),
        impact_scope: ImpactScope::from_label(&text(row.get("impact_scope"))),
        summary: text(row.get("summary")),
        candidate_tickers: string_list(row.get("candidate_tickers"), 4)
            .into_iter()
            .map(|t| t.to_uppercase())
            .collect(),
        relevance_score: clamp(number_or_zero(row.get("relevance_score")), 0.0, 100.0),
        confidence: score(row.get("confidence")),
        promotion_status: PromotionStatus::from_label(&text(row.get("promotion_status"))),
        as_of: timestamp_or(row.get("as_of"), now),
    }
}

pub async fn indirect_impacts(store: &dyn RowStore, now: DateTime<Utc>) -> FetchOutcome<Vec<IndirectImpactItem>> {
    let query = RowQuery::table("stock_indirect_events_v2")
        .select("id,theme,impact_scope,summary,candidate_tickers,relevance_score,confidence,promotion_status,as_of")
        .eq("is_active", true)
        .order_desc("relevance_score")
        .order_desc("as_of")
        .limit(16);

    read(store, &query, "v2_indirect_fallback")
        .await
        .map_rows(|rows| rows.iter().map(|row| indirect_from_row(row, now)).collect())
}

/// Group rows by opportunity id, keeping at most `cap` per opportunity in
/// read order. Rows without a positive opportunity id are dropped.
fn group_by_opportunity<T>(items: Vec<(i64, T)>, cap: usize) -> BTreeMap<i64, Vec<T>> {
    let mut grouped: BTreeMap<i64, Vec<T>> = BTreeMap::new();
    for (opportunity_id, item) in items {
        if opportunity_id <= 0 {
            continue;
        }
        let bucket = grouped.entry(opportunity_id).or_default();
        if bucket.len() < cap {
            bucket.push(item);
        }
    }
    grouped
}

pub fn evidence_from_row(row: &Row, now: DateTime<Utc>) -> EvidenceItem {
    EvidenceItem {
        id: integer(row.get("id")),
        opportunity_id: integer(row.get("opportunity_id")),
        ticker: upper_text(row.get("ticker")),
        source_type: text_or(row.get("source_type"), "article"),
        source_ref: text(row.get("source_ref")),
        source_url: text(row.get("source_url")),
        source_name: text(row.get("source_name")),
        published_at: timestamp_or(row.get("published_at"), now),
        quote_snippet: text(row.get("quote_snippet")),
        numeric_facts: object_list(row.get("numeric_facts")),
        confidence: score(row.get("confidence")),
        as_of: timestamp_or(row.get("as_of"), now),
    }
}

pub async fn evidence_map(
    store: &dyn RowStore,
    opportunity_ids: &[i64],
    now: DateTime<Utc>,
) -> FetchOutcome<BTreeMap<i64, Vec<EvidenceItem>>> {
    if opportunity_ids.is_empty() {
        return FetchOutcome::Empty;
    }
    let query = RowQuery::table("stock_evidence_v2")
        .select("id,opportunity_id,ticker,source_type,source_ref,source_url,source_name,published_at,quote_snippet,numeric_facts,confidence,as_of")
        .eq("is_active", true)
        .in_list("opportunity_id", opportunity_ids.iter().copied())
        .order_desc("confidence")
        .limit(1200);

    match read(store, &query, "v2_evidence_fallback").await {
        FetchOutcome::Rows(rows) => {
            let items = rows
                .iter()
                .map(|row| evidence_from_row(row, now))
                .map(|item| (item.opportunity_id, item))
                .collect();
            FetchOutcome::Rows(group_by_opportunity(items, EVIDENCE_PER_OPPORTUNITY))
        }
        FetchOutcome::Empty => FetchOutcome::Empty,
        FetchOutcome::Failed(e) => FetchOutcome::Failed(e),
    }
}

pub fn path_from_row(row: &Row, now: DateTime<Utc>) -> TransmissionPath {
    TransmissionPath {
        id: integer(row.get("id")),
        opportunity_id: integer(row.get("opportunity_id")),
        path_key: text(row.get("path_key")),
        ticker: upper_text(row.get("ticker")),
        macro_factor: text_or(row.get("macro_factor"), "Macro factor"),
        industry: text_or(row.get("industry"), "Unknown"),
        direction: Direction::from_label(&text(row.get("direction"))),
        strength: score(row.get("strength")),
        reason: text(row.get("reason")),
        evidence_ids: id_list(row.get("evidence_ids")),
        as_of: timestamp_or(row.get("as_of"), now),
    }
}

pub async fn transmission_map(
    store: &dyn RowStore,
    opportunity_ids: &[i64],
    now: DateTime<Utc>,
) -> FetchOutcome<BTreeMap<i64, Vec<TransmissionPath>>> {
    if opportunity_ids.is_empty() {
        return FetchOutcome::Empty;
    }
    let query = RowQuery::table("stock_transmission_paths_v2")
        .select("id,opportunity_id,path_key,ticker,macro_factor,industry,direction,strength,reason,evidence_ids,as_of")
        .eq("is_active", true)
        .in_list("opportunity_id", opportunity_ids.iter().copied())
        .order_desc("strength")
        .limit(800);

    match read(store, &query, "v2_path_fallback").await {
        FetchOutcome::Rows(rows) => {
            let items = rows
                .iter()
                .map(|row| path_from_row(row, now))
                .map(|item| (item.opportunity_id, item))
                .collect();
            FetchOutcome::Rows(group_by_opportunity(items, PATHS_PER_OPPORTUNITY))
        }
        FetchOutcome::Empty => FetchOutcome::Empty,
        FetchOutcome::Failed(e) => FetchOutcome::Failed(e),
    }
}

/// Ids among `event_ids` whose events were promoted from the indirect pool.
pub async fn indirect_event_ids(store: &dyn RowStore, event_ids: &[i64]) -> FetchOutcome<HashSet<i64>> {
    if event_ids.is_empty() {
        return FetchOutcome::Empty;
    }
    let query = RowQuery::table("stock_events_v2")
        .select("id,source_type")
        .in_list("id", event_ids.iter().copied())
        .limit(2000);

    match read(store, &query, "v2_event_source_fallback").await {
        FetchOutcome::Rows(rows) => FetchOutcome::Rows(
            rows.iter()
                .filter(|row| text(row.get("source_type")).trim().eq_ignore_ascii_case("indirect_promoted"))
                .map(|row| integer(row.get("id")))
                .filter(|id| *id > 0)
                .collect(),
        ),
        FetchOutcome::Empty => FetchOutcome::Empty,
        FetchOutcome::Failed(e) => FetchOutcome::Failed(e),
    }
}

/// Latest events grouped into one cluster per event type.
pub async fn hot_clusters(store: &dyn RowStore, now: DateTime<Utc>) -> FetchOutcome<Vec<HotCluster>> {
    let query = RowQuery::table("stock_events_v2")
        .select("id,event_type,summary,details,as_of")
        .eq("is_active", true)
        .order_desc("as_of")
        .limit(240);

    read(store, &query, "v2_cluster_fallback")
        .await
        .map_rows(|rows| cluster_events_by_type(&rows, now))
}

/// Ticker co-occurrence across the latest events.
pub async fn relations(store: &dyn RowStore, now: DateTime<Utc>) -> FetchOutcome<Vec<EntityRelationItem>> {
    let query = RowQuery::table("stock_events_v2")
        .select("id,as_of")
        .eq("is_active", true)
        .order_desc("as_of")
        .limit(300);

    let events = match read(store, &query, "v2_relation_fallback").await {
        FetchOutcome::Rows(rows) => rows,
        FetchOutcome::Empty => return FetchOutcome::Empty,
        FetchOutcome::Failed(e) => return FetchOutcome::Failed(e),
    };
    let event_times: HashMap<i64, DateTime<Utc>> = events
        .iter()
        .map(|row| (integer(row.get("id")), timestamp_or(row.get("as_of"), now)))
        .filter(|(id, _)| *id > 0)
        .collect();
    let event_ids = unique_ids(events.iter().map(|row| integer(row.get("id"))));
    if event_ids.is_empty() {
        return FetchOutcome::Empty;
    }

    let query = RowQuery::table("stock_event_tickers_v2")
        .select("event_id,ticker,confidence")
        .in_list("event_id", event_ids);

    read(store, &query, "v2_relation_fallback").await.map_rows(|rows| {
        let links: Vec<EventTickerLink> = rows
            .iter()
            .map(|row| EventTickerLink {
                event_id: integer(row.get("event_id")),
                ticker: upper_text(row.get("ticker")),
                confidence: score(row.get("confidence")),
            })
            .collect();
        co_occurrence_relations(&event_times, &links, now)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_v2_signal_mapping() {
        let row = json!({
            "id": 9,
            "ticker": "nvda",
            "level": "L3",
            "signal_score": 142,
            "trigger_factors": [{"event_type": "earnings", "count": 3}],
            "source_event_ids": [1, 2, 3, 4, 5, 6],
            "source_mix": {"x_count": 2, "article_count": 1, "x_ratio": 0.66, "top_x_handles": ["@trader1"]},
            "as_of": "2026-03-02T11:30:00Z"
        });
        let signal = signal_from_row(row.as_object().unwrap(), now());
        assert_eq!(signal.sentinel_id, "stock_v2:NVDA");
        assert_eq!(signal.risk_score, 1.0);
        assert_eq!(signal.description, "NVDA stock signal");
        assert_eq!(signal.trigger_reasons, vec!["earnings x3"]);
        assert_eq!(signal.evidence_links, vec!["event:1", "event:2", "event:3", "event:4", "event:5"]);
        assert_eq!(signal.source_mix.unwrap().source_total, 3);
    }

    #[test]
    fn test_indirect_mapping() {
        let row = json!({
            "id": 2,
            "theme": "rate_fx",
            "impact_scope": "INDEX",
            "candidate_tickers": ["tlt", "spy", "qqq", "iwm", "dia"],
            "relevance_score": 140,
            "confidence": "0.4",
            "promotion_status": "unknown"
        });
        let item = indirect_from_row(row.as_object().unwrap(), now());
        assert_eq!(item.theme, "Rates/FX");
        assert_eq!(item.impact_scope, ImpactScope::Index);
        assert_eq!(item.candidate_tickers, vec!["TLT", "SPY", "QQQ", "IWM"]);
        assert_eq!(item.relevance_score, 100.0);
        assert_eq!(item.confidence, 0.4);
        assert_eq!(item.promotion_status, PromotionStatus::Pending);
    }

    #[test]
    fn test_group_by_opportunity_caps() {
        let items: Vec<(i64, u32)> = vec![(1, 10), (2, 20), (1, 11), (0, 99), (1, 12), (1, 13)];
        let grouped = group_by_opportunity(items, 3);
        assert_eq!(grouped[&1], vec![10, 11, 12]);
        assert_eq!(grouped[&2], vec![20]);
        assert!(!grouped.contains_key(&0));
    }

    #[test]
    fn test_path_mapping() {
        let row = json!({"id": 1, "opportunity_id": 5, "direction": "short", "strength": 2, "evidence_ids": [3, "x"]});
        let path = path_from_row(row.as_object().unwrap(), now());
        assert_eq!(path.direction, Direction::Short);
        assert_eq!(path.strength, 1.0);
        assert_eq!(path.macro_factor, "Macro factor");
        assert_eq!(path.evidence_ids, vec![3]);
    }
}
