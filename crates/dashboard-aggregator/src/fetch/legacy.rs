use chrono::{DateTime, Utc};
use dashboard_core::coerce::{
    clamp, count, integer, number, number_or_zero, object, score, source_mix, string_list, text,
    text_or, timestamp_or, upper_text,
};
use dashboard_core::{
    EntityRelationItem, FetchOutcome, HotCluster, MarketRegime, MarketSnapshot, OpportunityItem,
    RiskLevel, Row, RowQuery, RowStore, SentinelSignal, TickerSignalDigest,
};
use std::collections::HashMap;

use super::{first_row, is_live_opportunity, opportunity_from_row, read, unique_ids};
use crate::derive::event_type_label;
use crate::relevance::RelevanceRules;

const SIGNAL_COLUMNS: &str =
    "id,cluster_id,sentinel_id,alert_level,risk_score,description,trigger_reasons,evidence_links,details,created_at";
const OPPORTUNITY_COLUMNS: &str = "id,ticker,side,horizon,opportunity_score,confidence,risk_level,why_now,invalid_if,\
    catalysts,factor_breakdown,source_signal_ids,source_cluster_ids,expires_at,as_of";
const CLUSTER_COLUMNS: &str = "id,category,primary_title,summary,article_count,created_at";

const SIGNAL_LIMIT: usize = 24;
const CLUSTER_LIMIT: usize = 20;

pub fn signal_from_row(row: &Row, now: DateTime<Utc>) -> SentinelSignal {
    SentinelSignal {
        id: integer(row.get("id")),
        cluster_id: number(row.get("cluster_id")).map(|n| n.trunc() as i64),
        sentinel_id: text_or(row.get("sentinel_id"), "unknown_sentinel"),
        alert_level: RiskLevel::from_label(&text(row.get("alert_level"))),
        risk_score: score(row.get("risk_score")),
        description: text_or(row.get("description"), "Sentinel alert"),
        trigger_reasons: string_list(row.get("trigger_reasons"), 5),
        evidence_links: string_list(row.get("evidence_links"), 5),
        source_mix: source_mix(row.get("source_mix"), now),
        created_at: timestamp_or(row.get("created_at"), now),
    }
}

/// Latest watch-list alerts, keeping only the stock relevant ones.
pub async fn signals(store: &dyn RowStore, rules: &RelevanceRules, now: DateTime<Utc>) -> FetchOutcome<Vec<SentinelSignal>> {
    let query = RowQuery::table("analysis_signals")
        .select(SIGNAL_COLUMNS)
        .eq("signal_type", "watchlist_alert")
        .order_desc("created_at")
        .limit(60);

    read(store, &query, "signal_query_fallback").await.map_rows(|rows| {
        rows.iter()
            .filter_map(|row| {
                let signal = signal_from_row(row, now);
                let related = object(row.get("details"))
                    .map(|details| string_list(details.get("related_tickers"), usize::MAX))
                    .unwrap_or_default();
                rules
                    .is_stock_signal(&signal.sentinel_id, &signal.description, &signal.trigger_reasons, &related)
                    .then_some(signal)
            })
            .take(SIGNAL_LIMIT)
            .collect()
    })
}

pub fn digest_from_row(row: &Row, now: DateTime<Utc>) -> TickerSignalDigest {
    TickerSignalDigest {
        ticker: upper_text(row.get("ticker")),
        signal_count_24h: count(row.get("signal_count_24h")),
        related_cluster_count_24h: count(row.get("related_cluster_count_24h")),
        risk_level: RiskLevel::from_label(&text(row.get("risk_level"))),
        top_sentinel_levels: string_list(row.get("top_sentinel_levels"), 3),
        updated_at: timestamp_or(row.get("updated_at"), now),
    }
}

pub async fn ticker_digest(store: &dyn RowStore, now: DateTime<Utc>) -> FetchOutcome<Vec<TickerSignalDigest>> {
    let query = RowQuery::table("ticker_signal_digest")
        .select("ticker,signal_count_24h,related_cluster_count_24h,risk_level,top_sentinel_levels,updated_at")
        .order_desc("signal_count_24h")
        .limit(20);

    read(store, &query, "ticker_digest_fallback").await.map_rows(|rows| {
        rows.iter()
            .map(|row| digest_from_row(row, now))
            .filter(|digest| !digest.ticker.is_empty())
            .collect()
    })
}

pub async fn opportunities(store: &dyn RowStore, now: DateTime<Utc>) -> FetchOutcome<Vec<OpportunityItem>> {
    let query = RowQuery::table("opportunities")
        .select(OPPORTUNITY_COLUMNS)
        .order_desc("opportunity_score")
        .limit(30);

    read(store, &query, "opportunity_fallback").await.map_rows(|rows| {
        rows.iter()
            .map(|row| opportunity_from_row(row, now))
            .filter(|opp| is_live_opportunity(opp, now))
            .collect()
    })
}

pub fn regime_from_row(row: &Row, date_column: &str, now: DateTime<Utc>) -> MarketRegime {
    MarketRegime {
        regime_date: timestamp_or(row.get(date_column), now),
        risk_state: text_or(row.get("risk_state"), "neutral"),
        vol_state: text_or(row.get("vol_state"), "mid_vol"),
        liquidity_state: text_or(row.get("liquidity_state"), "neutral"),
        regime_score: number_or_zero(row.get("regime_score")),
        summary: text(row.get("summary")),
    }
}

pub async fn market_regime(store: &dyn RowStore, now: DateTime<Utc>) -> FetchOutcome<MarketRegime> {
    let query = RowQuery::table("market_regime_daily")
        .select("regime_date,risk_state,vol_state,liquidity_state,regime_score,summary")
        .order_desc("regime_date")
        .limit(1);

    first_row(read(store, &query, "regime_fallback").await).map(|row| regime_from_row(&row, "regime_date", now))
}

/// Raw daily snapshot row. Its risk level and brief are placeholders until
/// the assembler recomputes them from signals.
pub async fn market_snapshot_row(store: &dyn RowStore, now: DateTime<Utc>) -> FetchOutcome<MarketSnapshot> {
    let query = RowQuery::table("market_snapshot_daily")
        .select("snapshot_date,spy,qqq,dia,vix,us10y,dxy,risk_level,daily_brief,updated_at")
        .order_desc("snapshot_date")
        .limit(1);

    first_row(read(store, &query, "market_snapshot_fallback").await).map(|row| MarketSnapshot {
        snapshot_date: timestamp_or(row.get("snapshot_date"), now),
        spy: number(row.get("spy")),
        qqq: number(row.get("qqq")),
        dia: number(row.get("dia")),
        vix: number(row.get("vix")),
        us10y: number(row.get("us10y")),
        dxy: number(row.get("dxy")),
        risk_level: RiskLevel::from_label(&text(row.get("risk_level"))),
        daily_brief: text(row.get("daily_brief")),
        updated_at: timestamp_or(row.get("updated_at"), now),
    })
}

pub fn cluster_from_row(row: &Row, now: DateTime<Utc>) -> HotCluster {
    let raw_category = text(row.get("category")).trim().to_string();
    let category = if raw_category.is_empty() {
        event_type_label("news").to_string()
    } else {
        raw_category
    };
    let title = text(row.get("primary_title")).trim().to_string();
    let summary = text(row.get("summary")).trim().to_string();

    HotCluster {
        id: integer(row.get("id")),
        primary_title: if title.is_empty() { format!("{} event cluster", category) } else { title },
        summary: if summary.is_empty() { "No summary available".to_string() } else { summary },
        category,
        article_count: count(row.get("article_count")),
        created_at: timestamp_or(row.get("created_at"), now),
    }
}

/// Clusters referenced by the given opportunities and signals, or the latest
/// stock relevant clusters when nothing references one.
pub async fn hot_clusters(
    store: &dyn RowStore,
    signals: &[SentinelSignal],
    opportunities: &[OpportunityItem],
    rules: &RelevanceRules,
    now: DateTime<Utc>,
) -> FetchOutcome<Vec<HotCluster>> {
    let referenced = unique_ids(
        opportunities
            .iter()
            .flat_map(|opp| opp.source_cluster_ids.iter().copied())
            .chain(signals.iter().filter_map(|s| s.cluster_id)),
    );

    if !referenced.is_empty() {
        let query = RowQuery::table("analysis_clusters")
            .select(CLUSTER_COLUMNS)
            .in_list("id", referenced.into_iter().take(40))
            .order_desc("created_at")
            .limit(CLUSTER_LIMIT);
        return read(store, &query, "cluster_query_fallback")
            .await
            .map_rows(|rows| rows.iter().map(|row| cluster_from_row(row, now)).collect());
    }

    let query = RowQuery::table("analysis_clusters")
        .select(CLUSTER_COLUMNS)
        .order_desc("created_at")
        .limit(60);
    read(store, &query, "cluster_query_fallback").await.map_rows(|rows| {
        rows.iter()
            .filter(|row| rules.is_stock_cluster(&text(row.get("primary_title")), &text(row.get("summary"))))
            .take(CLUSTER_LIMIT)
            .map(|row| cluster_from_row(row, now))
            .collect()
    })
}

/// Recent entity relations with resolved names, kept when the relation reads
/// as stock related. A failed name lookup falls back to `Entity#id`.
pub async fn entity_relations(
    store: &dyn RowStore,
    rules: &RelevanceRules,
    now: DateTime<Utc>,
) -> FetchOutcome<Vec<EntityRelationItem>> {
    let query = RowQuery::table("entity_relations")
        .select("id,entity1_id,entity2_id,relation_text,confidence,last_seen")
        .order_desc("last_seen")
        .limit(20);

    let rows = match read(store, &query, "relation_query_fallback").await {
        FetchOutcome::Rows(rows) => rows,
        FetchOutcome::Empty => return FetchOutcome::Empty,
        FetchOutcome::Failed(e) => return FetchOutcome::Failed(e),
    };

    let entity_ids = unique_ids(
        rows.iter()
            .flat_map(|row| [integer(row.get("entity1_id")), integer(row.get("entity2_id"))]),
    );
    let mut names: HashMap<i64, String> = HashMap::new();
    if !entity_ids.is_empty() {
        let query = RowQuery::table("entities").select("id,name").in_list("id", entity_ids);
        for row in read(store, &query, "entity_name_fallback").await.into_rows() {
            let name = text(row.get("name")).trim().to_string();
            if !name.is_empty() {
                names.insert(integer(row.get("id")), name);
            }
        }
    }

    let name_of = |id: i64| names.get(&id).cloned().unwrap_or_else(|| format!("Entity#{}", id));
    FetchOutcome::from_rows(
        rows.iter()
            .map(|row| EntityRelationItem {
                id: integer(row.get("id")),
                entity1_name: name_of(integer(row.get("entity1_id"))),
                entity2_name: name_of(integer(row.get("entity2_id"))),
                relation_text: text_or(row.get("relation_text"), "related"),
                confidence: clamp(number_or_zero(row.get("confidence")), 0.0, 1.0),
                last_seen: timestamp_or(row.get("last_seen"), now),
            })
            .filter(|rel| {
                rules.is_stock_relation_text(&format!("{} {} {}", rel.entity1_name, rel.entity2_name, rel.relation_text))
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_signal_row_clamping() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let row = json!({
            "id": 4,
            "cluster_id": "12",
            "sentinel_id": "us_equity:NVDA",
            "alert_level": "l4",
            "risk_score": 1.4,
            "description": "NVDA halted",
            "trigger_reasons": ["a", "b", "c", "d", "e", "f"],
            "evidence_links": "not-a-list",
            "created_at": "2026-03-02T11:00:00Z"
        });
        let signal = signal_from_row(row.as_object().unwrap(), now);
        assert_eq!(signal.cluster_id, Some(12));
        assert_eq!(signal.alert_level, RiskLevel::L4);
        assert_eq!(signal.risk_score, 1.0);
        assert_eq!(signal.trigger_reasons.len(), 5);
        assert!(signal.evidence_links.is_empty());
        assert!(signal.source_mix.is_none());

        let row = json!({"risk_score": -0.2, "alert_level": "critical"});
        let signal = signal_from_row(row.as_object().unwrap(), now);
        assert_eq!(signal.risk_score, 0.0);
        assert_eq!(signal.alert_level, RiskLevel::L1);
        assert_eq!(signal.sentinel_id, "unknown_sentinel");
        assert_eq!(signal.cluster_id, None);
        assert_eq!(signal.created_at, now);
    }

    #[test]
    fn test_cluster_row_defaults() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let cluster = cluster_from_row(json!({"id": 3, "article_count": -4}).as_object().unwrap(), now);
        assert_eq!(cluster.category, "News");
        assert_eq!(cluster.primary_title, "News event cluster");
        assert_eq!(cluster.article_count, 0);
    }
}
