//! Row fetchers, one per source table.
//!
//! Each fetcher issues a single bounded read and coerces the raw rows into
//! typed records. Read failures are logged here and reported as
//! `FetchOutcome::Failed`; callers decide the fallback.

pub mod legacy;
pub mod shared;
pub mod v2;

use chrono::{DateTime, Utc};
use dashboard_core::coerce::{
    catalyst_list, clamp, id_list, integer, number_map, number_or_zero, score, source_mix,
    string_list, text, timestamp_or, upper_text,
};
use dashboard_core::{
    FetchOutcome, Horizon, OpportunityItem, RiskLevel, Row, RowQuery, RowStore, Side, SourceOrigin,
};

/// Run one read, logging failures under `tag`.
pub(crate) async fn read(store: &dyn RowStore, query: &RowQuery, tag: &str) -> FetchOutcome<Vec<Row>> {
    match store.select(query).await {
        Ok(rows) => {
            tracing::debug!("{}: {} rows from {}", tag, rows.len(), query.table);
            FetchOutcome::from_rows(rows)
        }
        Err(e) => {
            tracing::warn!("{}: read of {} failed: {}", tag, query.table, e);
            FetchOutcome::Failed(e)
        }
    }
}

/// Single-row reads collapse to the first row.
pub(crate) fn first_row(outcome: FetchOutcome<Vec<Row>>) -> FetchOutcome<Row> {
    match outcome {
        FetchOutcome::Rows(rows) => rows.into_iter().next().map_or(FetchOutcome::Empty, FetchOutcome::Rows),
        FetchOutcome::Empty => FetchOutcome::Empty,
        FetchOutcome::Failed(e) => FetchOutcome::Failed(e),
    }
}

/// Positive ids in first-seen order, without duplicates.
pub(crate) fn unique_ids(ids: impl IntoIterator<Item = i64>) -> Vec<i64> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| *id > 0 && seen.insert(*id)).collect()
}

/// Opportunity row of either schema generation. Columns a generation lacks
/// come back empty.
pub fn opportunity_from_row(row: &Row, now: DateTime<Utc>) -> OpportunityItem {
    OpportunityItem {
        id: integer(row.get("id")),
        ticker: upper_text(row.get("ticker")),
        side: Side::from_label(&text(row.get("side"))),
        horizon: Horizon::from_label(&text(row.get("horizon"))),
        opportunity_score: clamp(number_or_zero(row.get("opportunity_score")), 0.0, 100.0),
        confidence: score(row.get("confidence")),
        risk_level: RiskLevel::from_label(&text(row.get("risk_level"))),
        why_now: text(row.get("why_now")),
        invalid_if: text(row.get("invalid_if")),
        catalysts: catalyst_list(row.get("catalysts")),
        factor_breakdown: number_map(row.get("factor_breakdown")),
        source_signal_ids: id_list(row.get("source_signal_ids")),
        source_event_ids: id_list(row.get("source_event_ids")),
        source_cluster_ids: id_list(row.get("source_cluster_ids")),
        source_mix: source_mix(row.get("source_mix"), now),
        evidence_ids: id_list(row.get("evidence_ids")),
        path_ids: id_list(row.get("path_ids")),
        uncertainty_flags: string_list(row.get("uncertainty_flags"), 5),
        counter_view: text(row.get("counter_view")).trim().to_string(),
        evidences: None,
        transmission_paths: None,
        ai_debate_view: None,
        source_origin: SourceOrigin::Direct,
        expires_at: timestamp_or(row.get("expires_at"), now),
        as_of: timestamp_or(row.get("as_of"), now),
    }
}

/// Expired or ticker-less opportunities never leave a fetcher.
pub(crate) fn is_live_opportunity(opportunity: &OpportunityItem, now: DateTime<Utc>) -> bool {
    !opportunity.ticker.is_empty() && opportunity.expires_at >= now
}
