//! Tables read the same way by both schema paths: source health, the alert
//! center, portfolio holdings and ticker profiles.

use chrono::{DateTime, Duration, Utc};
use dashboard_core::coerce::{boolean, clamp, integer, number, number_or_zero, string_list, text, text_or, timestamp_or, upper_text};
use dashboard_core::{
    AlertCenterItem, AlertStatus, AlertUserPrefs, AssetType, Direction, FeedbackLabel, FetchOutcome,
    PortfolioHoldingItem, RiskLevel, Row, RowQuery, RowStore, Side, TickerProfile,
};
use std::collections::{BTreeMap, HashMap};

use super::{first_row, read, unique_ids};
use crate::derive::{fallback_ticker_profile, SourceStatus};

const SYSTEM_USER: &str = "system";
const HEALTH_LOOKBACK_HOURS: i64 = 72;

/// Health rows from the last 72 hours, newest first.
pub async fn source_health(store: &dyn RowStore, now: DateTime<Utc>) -> FetchOutcome<Vec<SourceStatus>> {
    let since = (now - Duration::hours(HEALTH_LOOKBACK_HOURS)).to_rfc3339();
    let query = RowQuery::table("source_health_daily")
        .select("source_id,status,as_of")
        .gte("as_of", since)
        .order_desc("as_of")
        .limit(120);

    read(store, &query, "source_health_fallback").await.map_rows(|rows| {
        rows.iter()
            .map(|row| SourceStatus {
                source_id: text(row.get("source_id")).trim().to_string(),
                status: text_or(row.get("status"), "healthy"),
            })
            .collect()
    })
}

#[derive(Debug, Default)]
struct FeedbackStats {
    useful: u32,
    noise: u32,
    latest: Option<(DateTime<Utc>, FeedbackLabel)>,
}

fn feedback_stats(rows: &[Row], now: DateTime<Utc>) -> HashMap<i64, FeedbackStats> {
    let mut stats: HashMap<i64, FeedbackStats> = HashMap::new();
    for row in rows {
        let alert_id = integer(row.get("alert_id"));
        if alert_id <= 0 {
            continue;
        }
        let Some(label) = FeedbackLabel::from_label(&text(row.get("label"))) else {
            continue;
        };
        let created_at = timestamp_or(row.get("created_at"), now);
        let entry = stats.entry(alert_id).or_default();
        match label {
            FeedbackLabel::Useful => entry.useful += 1,
            FeedbackLabel::Noise => entry.noise += 1,
        }
        if entry.latest.map_or(true, |(at, _)| created_at > at) {
            entry.latest = Some((created_at, label));
        }
    }
    stats
}

fn alert_from_row(row: &Row, stats: Option<&FeedbackStats>, now: DateTime<Utc>) -> AlertCenterItem {
    AlertCenterItem {
        id: integer(row.get("id")),
        user_id: text_or(row.get("user_id"), SYSTEM_USER),
        ticker: upper_text(row.get("ticker")),
        signal_type: text_or(row.get("signal_type"), "opportunity"),
        signal_level: RiskLevel::from_label(&text(row.get("signal_level"))),
        alert_score: clamp(number_or_zero(row.get("alert_score")), 0.0, 100.0),
        side: Direction::from_label(&text(row.get("side"))),
        title: text(row.get("title")),
        why_now: text(row.get("why_now")),
        session_tag: text_or(row.get("session_tag"), "regular"),
        status: AlertStatus::from_label(&text(row.get("status"))),
        dedupe_window: timestamp_or(row.get("dedupe_window"), now),
        created_at: timestamp_or(row.get("created_at"), now),
        feedback_useful_count: stats.map_or(0, |s| s.useful),
        feedback_noise_count: stats.map_or(0, |s| s.noise),
        latest_feedback_label: stats.and_then(|s| s.latest.map(|(_, label)| label)),
    }
}

/// Active alerts with their feedback tallies. A failed feedback read keeps
/// the alerts with zero counts.
pub async fn alert_center(store: &dyn RowStore, now: DateTime<Utc>) -> FetchOutcome<Vec<AlertCenterItem>> {
    let query = RowQuery::table("stock_alert_events_v1")
        .select(
            "id,user_id,ticker,signal_type,signal_level,alert_score,side,title,why_now,\
             session_tag,status,dedupe_window,created_at",
        )
        .eq("is_active", true)
        .order_desc("created_at")
        .limit(120);

    let events = match read(store, &query, "alert_center_fallback").await {
        FetchOutcome::Rows(rows) => rows,
        FetchOutcome::Empty => return FetchOutcome::Empty,
        FetchOutcome::Failed(e) => return FetchOutcome::Failed(e),
    };

    let alert_ids = unique_ids(events.iter().map(|row| integer(row.get("id"))));
    let stats = if alert_ids.is_empty() {
        HashMap::new()
    } else {
        let query = RowQuery::table("stock_alert_feedback_v1")
            .select("alert_id,label,created_at")
            .in_list("alert_id", alert_ids)
            .order_desc("created_at")
            .limit(2000);
        feedback_stats(&read(store, &query, "alert_feedback_fallback").await.into_rows(), now)
    };

    FetchOutcome::from_rows(
        events
            .iter()
            .map(|row| alert_from_row(row, stats.get(&integer(row.get("id"))), now))
            .collect(),
    )
}

pub fn prefs_from_row(row: &Row) -> AlertUserPrefs {
    let hour = |column: &str| clamp(number_or_zero(row.get(column)), 0.0, 23.0) as u32;
    AlertUserPrefs {
        user_id: text_or(row.get("user_id"), SYSTEM_USER),
        enable_premarket: boolean(row.get("enable_premarket")),
        enable_postmarket: boolean(row.get("enable_postmarket")),
        daily_alert_cap: number(row.get("daily_alert_cap"))
            .filter(|cap| *cap != 0.0)
            .map_or(20, |cap| clamp(cap, 1.0, 200.0) as u32),
        quiet_hours_start: hour("quiet_hours_start"),
        quiet_hours_end: hour("quiet_hours_end"),
        watch_tickers: string_list(row.get("watch_tickers"), usize::MAX)
            .into_iter()
            .map(|t| t.to_uppercase())
            .collect(),
        muted_signal_types: string_list(row.get("muted_signal_types"), usize::MAX)
            .into_iter()
            .map(|t| t.to_lowercase())
            .collect(),
    }
}

/// Preferences of the system user, defaults when no row exists.
pub async fn alert_prefs(store: &dyn RowStore) -> AlertUserPrefs {
    let query = RowQuery::table("stock_alert_user_prefs_v1")
        .select(
            "user_id,enable_premarket,enable_postmarket,daily_alert_cap,quiet_hours_start,\
             quiet_hours_end,watch_tickers,muted_signal_types",
        )
        .eq("is_active", true)
        .eq("user_id", SYSTEM_USER)
        .order_desc("updated_at")
        .limit(1);

    first_row(read(store, &query, "alert_prefs_fallback").await)
        .into_option()
        .map(|row| prefs_from_row(&row))
        .unwrap_or_default()
}

pub fn holding_from_row(row: &Row, portfolio_id: i64, now: DateTime<Utc>) -> PortfolioHoldingItem {
    let side = if text(row.get("side")).trim().eq_ignore_ascii_case("SHORT") { Side::Short } else { Side::Long };
    let row_portfolio = integer(row.get("portfolio_id"));
    PortfolioHoldingItem {
        id: integer(row.get("id")),
        portfolio_id: if row_portfolio > 0 { row_portfolio } else { portfolio_id },
        user_id: text_or(row.get("user_id"), SYSTEM_USER),
        ticker: upper_text(row.get("ticker")),
        side,
        quantity: number_or_zero(row.get("quantity")),
        avg_cost: number_or_zero(row.get("avg_cost")),
        market_value: number_or_zero(row.get("market_value")),
        weight: number_or_zero(row.get("weight")),
        notes: text(row.get("notes")),
        updated_at: timestamp_or(row.get("updated_at"), now),
    }
}

/// Holdings of the system user's default portfolio.
pub async fn portfolio_holdings(store: &dyn RowStore, now: DateTime<Utc>) -> FetchOutcome<Vec<PortfolioHoldingItem>> {
    let query = RowQuery::table("stock_portfolios_v1")
        .select("id")
        .eq("is_active", true)
        .eq("user_id", SYSTEM_USER)
        .eq("portfolio_key", "default")
        .limit(1);

    let portfolio_id = match first_row(read(store, &query, "portfolio_fallback").await) {
        FetchOutcome::Rows(row) => integer(row.get("id")),
        FetchOutcome::Empty => return FetchOutcome::Empty,
        FetchOutcome::Failed(e) => return FetchOutcome::Failed(e),
    };
    if portfolio_id <= 0 {
        return FetchOutcome::Empty;
    }

    let query = RowQuery::table("stock_portfolio_holdings_v1")
        .select("id,portfolio_id,user_id,ticker,side,quantity,avg_cost,market_value,weight,notes,updated_at")
        .eq("is_active", true)
        .eq("portfolio_id", portfolio_id)
        .order_desc("updated_at")
        .limit(300);

    read(store, &query, "portfolio_holdings_fallback")
        .await
        .map_rows(|rows| rows.iter().map(|row| holding_from_row(row, portfolio_id, now)).collect())
}

pub fn profile_from_row(row: &Row) -> Option<TickerProfile> {
    let ticker = upper_text(row.get("ticker"));
    if ticker.is_empty() {
        return None;
    }
    let fallback_summary = || fallback_ticker_profile(&ticker).summary;
    Some(TickerProfile {
        display_name: text_or(row.get("display_name"), &ticker),
        asset_type: AssetType::from_label(&text(row.get("asset_type"))),
        sector: text_or(row.get("sector"), "Unknown"),
        industry: text_or(row.get("industry"), "Unknown"),
        summary: {
            let summary = text(row.get("summary_cn"));
            if summary.is_empty() { fallback_summary() } else { summary }
        },
        ticker,
    })
}

/// One profile per requested ticker: the stored row when present, the seeded
/// fallback otherwise. A failed read leaves only fallbacks.
pub async fn ticker_profiles(store: &dyn RowStore, tickers: &[String]) -> BTreeMap<String, TickerProfile> {
    let mut requested: Vec<String> = Vec::new();
    for ticker in tickers {
        let ticker = ticker.trim().to_uppercase();
        if !ticker.is_empty() && !requested.contains(&ticker) {
            requested.push(ticker);
        }
    }

    let mut profiles: BTreeMap<String, TickerProfile> = requested
        .iter()
        .map(|ticker| (ticker.clone(), fallback_ticker_profile(ticker)))
        .collect();
    if requested.is_empty() {
        return profiles;
    }

    let query = RowQuery::table("stock_ticker_profiles_v1")
        .select("ticker,display_name,asset_type,sector,industry,summary_cn")
        .eq("is_active", true)
        .in_list("ticker", requested)
        .limit(500);
    for row in read(store, &query, "ticker_profile_fallback").await.into_rows() {
        if let Some(profile) = profile_from_row(&row) {
            profiles.insert(profile.ticker.clone(), profile);
        }
    }
    profiles
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn rows(values: Vec<serde_json::Value>) -> Vec<Row> {
        values.into_iter().filter_map(|v| v.as_object().cloned()).collect()
    }

    #[test]
    fn test_feedback_tally_tracks_latest_label() {
        let feedback = rows(vec![
            json!({"alert_id": 1, "label": "noise", "created_at": "2026-03-02T09:00:00Z"}),
            json!({"alert_id": 1, "label": "useful", "created_at": "2026-03-02T11:00:00Z"}),
            json!({"alert_id": 1, "label": "useful", "created_at": "2026-03-02T10:00:00Z"}),
            json!({"alert_id": 1, "label": "meh", "created_at": "2026-03-02T11:30:00Z"}),
            json!({"alert_id": 0, "label": "useful"}),
        ]);
        let stats = feedback_stats(&feedback, now());
        let one = &stats[&1];
        assert_eq!(one.useful, 2);
        assert_eq!(one.noise, 1);
        assert_eq!(one.latest.map(|(_, l)| l), Some(FeedbackLabel::Useful));
        assert_eq!(stats.len(), 1);
    }

    #[test]
    fn test_alert_defaults() {
        let row = json!({"id": 4, "ticker": "aapl", "alert_score": 180, "side": "sideways", "status": "sent"});
        let alert = alert_from_row(row.as_object().unwrap(), None, now());
        assert_eq!(alert.user_id, "system");
        assert_eq!(alert.signal_type, "opportunity");
        assert_eq!(alert.session_tag, "regular");
        assert_eq!(alert.alert_score, 100.0);
        assert_eq!(alert.side, Direction::Neutral);
        assert_eq!(alert.status, AlertStatus::Sent);
        assert_eq!(alert.feedback_useful_count, 0);
        assert_eq!(alert.latest_feedback_label, None);
    }

    #[test]
    fn test_prefs_clamping() {
        let row = json!({
            "daily_alert_cap": 500,
            "quiet_hours_start": 30,
            "quiet_hours_end": -3,
            "enable_postmarket": false,
            "watch_tickers": ["nvda", " ", "spy"],
            "muted_signal_types": ["RISK"]
        });
        let prefs = prefs_from_row(row.as_object().unwrap());
        assert_eq!(prefs.user_id, "system");
        assert_eq!(prefs.daily_alert_cap, 200);
        assert_eq!(prefs.quiet_hours_start, 23);
        assert_eq!(prefs.quiet_hours_end, 0);
        assert!(!prefs.enable_postmarket);
        assert_eq!(prefs.watch_tickers, vec!["NVDA", "SPY"]);
        assert_eq!(prefs.muted_signal_types, vec!["risk"]);

        let prefs = prefs_from_row(json!({"daily_alert_cap": 0}).as_object().unwrap());
        assert_eq!(prefs.daily_alert_cap, 20);
    }

    #[test]
    fn test_holding_side_and_portfolio() {
        let row = json!({"id": 3, "ticker": "tsla", "side": "short", "quantity": "12.5"});
        let holding = holding_from_row(row.as_object().unwrap(), 9, now());
        assert_eq!(holding.side, Side::Short);
        assert_eq!(holding.portfolio_id, 9);
        assert_eq!(holding.quantity, 12.5);
        assert_eq!(holding.ticker, "TSLA");
    }

    #[test]
    fn test_profile_row_falls_back_per_field() {
        let row = json!({"ticker": "nvda", "asset_type": "EQUITY"});
        let profile = profile_from_row(row.as_object().unwrap()).unwrap();
        assert_eq!(profile.display_name, "NVDA");
        assert_eq!(profile.asset_type, AssetType::Equity);
        assert_eq!(profile.sector, "Unknown");
        assert_eq!(profile.summary, fallback_ticker_profile("NVDA").summary);
        assert!(profile_from_row(json!({"ticker": ""}).as_object().unwrap()).is_none());
    }
}
