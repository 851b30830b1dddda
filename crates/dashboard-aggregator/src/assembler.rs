use chrono::{DateTime, Utc};
use dashboard_core::{
    AlertCenterItem, DashboardSnapshot, FetchOutcome, OpportunityItem, PortfolioHoldingItem, RowStore,
    SentinelSignal, TickerSignalDigest,
};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::config::FeatureFlags;
use crate::derive;
use crate::fetch::{legacy, shared, unique_ids, v2};
use crate::reconciler::{v2_has_primary_rows, SchemaPath};
use crate::relevance::RelevanceRules;

/// Builds dashboard snapshots from a row store.
///
/// A pass never fails. Unreadable tables degrade to empty sections and the
/// market snapshot falls back to its placeholder. With nothing timestamped
/// to read, `data_updated_at` is the pass clock, so freshness reads fresh.
pub struct DashboardAggregator {
    store: Arc<dyn RowStore>,
    flags: FeatureFlags,
    rules: RelevanceRules,
}

impl DashboardAggregator {
    pub fn new(store: Arc<dyn RowStore>, flags: FeatureFlags) -> Self {
        Self {
            store,
            flags,
            rules: RelevanceRules::default(),
        }
    }

    /// Replace the built-in relevance allow-lists.
    pub fn with_rules(mut self, rules: RelevanceRules) -> Self {
        self.rules = rules;
        self
    }

    pub async fn build_snapshot(&self) -> DashboardSnapshot {
        self.build_snapshot_at(Utc::now()).await
    }

    /// Run one aggregation pass with `now` as the reference clock.
    pub async fn build_snapshot_at(&self, now: DateTime<Utc>) -> DashboardSnapshot {
        let path = SchemaPath::from_flags(&self.flags);
        tracing::info!("Building dashboard snapshot ({} path)", path.as_str());

        if path == SchemaPath::V2 {
            if let Some(snapshot) = self.build_from_v2(now).await {
                return snapshot;
            }
            tracing::warn!("v2_empty_fallback: V2 tables returned no signals, opportunities or snapshot, reading legacy tables");
        }
        self.build_from_legacy(now).await
    }

    async fn build_from_legacy(&self, now: DateTime<Utc>) -> DashboardSnapshot {
        let store = self.store.as_ref();
        let rules = &self.rules;

        let (signals, digest, opportunities, market_regime, alerts, alert_prefs, holdings) = tokio::join!(
            legacy::signals(store, rules, now),
            legacy::ticker_digest(store, now),
            legacy::opportunities(store, now),
            legacy::market_regime(store, now),
            shared::alert_center(store, now),
            shared::alert_prefs(store),
            shared::portfolio_holdings(store, now),
        );

        let signals = signals.into_rows();
        let ticker_digest = match digest {
            FetchOutcome::Failed(_) => {
                let derived = derive::digest_from_signals(&signals);
                if derived.is_empty() {
                    derive::digest_from_mentions(&signals, rules, now)
                } else {
                    derived
                }
            }
            other => other.into_rows(),
        };
        let opportunities = match opportunities {
            FetchOutcome::Failed(_) => {
                let fallback = derive::fallback_opportunities(&ticker_digest, &signals, rules, now);
                tracing::info!("Synthesized {} fallback opportunities from the ticker digest", fallback.len());
                fallback
            }
            other => other.into_rows(),
        };
        let alerts = alerts.into_rows();
        let portfolio_holdings = holdings.into_rows();

        let sentinel_signals = self.focus_signals(&signals, &opportunities);

        let (snapshot_row, hot_clusters, relations, health) = tokio::join!(
            legacy::market_snapshot_row(store, now),
            legacy::hot_clusters(store, &sentinel_signals, &opportunities, rules, now),
            legacy::entity_relations(store, rules, now),
            shared::source_health(store, now),
        );
        let market_snapshot = derive::market_snapshot_from_signals(snapshot_row.into_option(), &sentinel_signals, now);
        let hot_clusters = hot_clusters.into_rows();
        let relations = relations.into_rows();

        let universe = ticker_universe(&opportunities, &alerts, &ticker_digest, &portfolio_holdings);
        let ticker_profiles = shared::ticker_profiles(store, &universe).await;
        let x_source_radar = derive::x_source_radar(&sentinel_signals, &opportunities);

        let data_updated_at = derive::latest_instant(
            &[
                Some(market_snapshot.updated_at),
                opportunities.first().map(|o| o.as_of),
                sentinel_signals.first().map(|s| s.created_at),
                hot_clusters.first().map(|c| c.created_at),
                relations.first().map(|r| r.last_seen),
            ],
            now,
        );
        let counts = derive::summarize_source_health(&health.into_rows());
        let data_quality = derive::build_data_quality(Some(data_updated_at), counts, now);

        tracing::info!(
            "Legacy snapshot: {} opportunities, {} signals, {} clusters, {} relations",
            opportunities.len(),
            sentinel_signals.len(),
            hot_clusters.len(),
            relations.len()
        );

        DashboardSnapshot {
            opportunities,
            alerts,
            alert_prefs,
            portfolio_holdings,
            ticker_profiles,
            market_regime: market_regime.into_option(),
            market_snapshot,
            data_quality,
            sentinel_signals,
            ticker_digest,
            x_source_radar,
            indirect_impacts: Vec::new(),
            hot_clusters,
            relations,
            data_updated_at,
        }
    }

    /// `None` when the V2 tables have nothing to show.
    async fn build_from_v2(&self, now: DateTime<Utc>) -> Option<DashboardSnapshot> {
        let store = self.store.as_ref();

        let (signals, opportunities, market_regime, snapshot_row, indirect_impacts, alerts, alert_prefs, holdings) = tokio::join!(
            v2::signals(store, now),
            v2::opportunities(store, now),
            v2::market_regime(store, now),
            v2::snapshot_row(store, now),
            v2::indirect_impacts(store, now),
            shared::alert_center(store, now),
            shared::alert_prefs(store),
            shared::portfolio_holdings(store, now),
        );

        let signals = signals.into_rows();
        let opportunities = opportunities.into_rows();
        let snapshot_row = snapshot_row.into_option();
        if !v2_has_primary_rows(&signals, &opportunities, snapshot_row.as_ref()) {
            return None;
        }

        let opportunities = self.enrich_opportunities(opportunities, now).await;
        let opportunities = if opportunities.is_empty() {
            opportunities
        } else {
            let event_ids = unique_ids(opportunities.iter().flat_map(|o| o.source_event_ids.iter().copied()));
            let indirect: HashSet<i64> = v2::indirect_event_ids(store, &event_ids).await.into_option().unwrap_or_default();
            derive::tag_source_origin(opportunities, &indirect)
        };

        let ticker_digest = derive::digest_from_v2(&signals, &opportunities);
        let sentinel_signals = self.focus_signals(&signals, &opportunities);
        let x_source_radar = derive::x_source_radar(&sentinel_signals, &opportunities);
        let alerts = alerts.into_rows();
        let portfolio_holdings = holdings.into_rows();
        let indirect_impacts = indirect_impacts.into_rows();

        let (legacy_row, hot_clusters, relations, health) = tokio::join!(
            legacy::market_snapshot_row(store, now),
            v2::hot_clusters(store, now),
            v2::relations(store, now),
            shared::source_health(store, now),
        );
        let mut market_snapshot = derive::market_snapshot_from_signals(legacy_row.into_option(), &sentinel_signals, now);
        if let Some(row) = &snapshot_row {
            market_snapshot.risk_level = row.risk_badge;
            if !row.market_brief.is_empty() {
                market_snapshot.daily_brief = row.market_brief.clone();
            }
            market_snapshot.updated_at = row.as_of;
        }
        let hot_clusters = hot_clusters.into_rows();
        let relations = relations.into_rows();

        let universe = ticker_universe(&opportunities, &alerts, &ticker_digest, &portfolio_holdings);
        let ticker_profiles = shared::ticker_profiles(store, &universe).await;

        let data_updated_at = derive::latest_instant(
            &[
                Some(market_snapshot.updated_at),
                snapshot_row.as_ref().map(|r| r.snapshot_time),
                opportunities.first().map(|o| o.as_of),
                sentinel_signals.first().map(|s| s.created_at),
                hot_clusters.first().map(|c| c.created_at),
                relations.first().map(|r| r.last_seen),
                indirect_impacts.first().map(|i| i.as_of),
            ],
            now,
        );
        let counts = derive::summarize_source_health(&health.into_rows());
        let data_quality = derive::build_data_quality(Some(data_updated_at), counts, now);

        tracing::info!(
            "V2 snapshot: {} opportunities, {} signals, {} indirect impacts, {} clusters",
            opportunities.len(),
            sentinel_signals.len(),
            indirect_impacts.len(),
            hot_clusters.len()
        );

        Some(DashboardSnapshot {
            opportunities,
            alerts,
            alert_prefs,
            portfolio_holdings,
            ticker_profiles,
            market_regime: market_regime.into_option(),
            market_snapshot,
            data_quality,
            sentinel_signals,
            ticker_digest,
            x_source_radar,
            indirect_impacts,
            hot_clusters,
            relations,
            data_updated_at,
        })
    }

    /// Attach the enrichment layers that are switched on. Layers that are off
    /// leave their field unset.
    async fn enrich_opportunities(&self, opportunities: Vec<OpportunityItem>, now: DateTime<Utc>) -> Vec<OpportunityItem> {
        if opportunities.is_empty() || !self.flags.enriches_opportunities() {
            return opportunities;
        }
        let store = self.store.as_ref();
        let ids = unique_ids(opportunities.iter().map(|o| o.id));

        let (evidence, paths) = tokio::join!(
            async {
                if self.flags.evidence_layer {
                    v2::evidence_map(store, &ids, now).await.into_option().unwrap_or_default()
                } else {
                    Default::default()
                }
            },
            async {
                if self.flags.transmission_layer {
                    v2::transmission_map(store, &ids, now).await.into_option().unwrap_or_default()
                } else {
                    Default::default()
                }
            },
        );

        opportunities
            .into_iter()
            .map(|mut opp| {
                if self.flags.evidence_layer {
                    opp.evidences = Some(evidence.get(&opp.id).cloned().unwrap_or_default());
                }
                if self.flags.transmission_layer {
                    opp.transmission_paths = Some(paths.get(&opp.id).cloned().unwrap_or_default());
                }
                if self.flags.ai_debate_view {
                    opp.ai_debate_view = derive::build_ai_debate_view(&opp);
                }
                opp
            })
            .collect()
    }

    /// Signals that mention an opportunity ticker, or the stock relevant ones
    /// when there are no opportunities.
    fn focus_signals(&self, signals: &[SentinelSignal], opportunities: &[OpportunityItem]) -> Vec<SentinelSignal> {
        let focus: BTreeSet<String> = opportunities
            .iter()
            .map(|o| o.ticker.clone())
            .filter(|t| !t.is_empty())
            .collect();
        self.rules.filter_signals(signals, &focus)
    }
}

/// Every ticker the snapshot shows, in first-seen order.
fn ticker_universe(
    opportunities: &[OpportunityItem],
    alerts: &[AlertCenterItem],
    digest: &[TickerSignalDigest],
    holdings: &[PortfolioHoldingItem],
) -> Vec<String> {
    let mut seen = HashSet::new();
    opportunities
        .iter()
        .map(|o| o.ticker.as_str())
        .chain(alerts.iter().map(|a| a.ticker.as_str()))
        .chain(digest.iter().map(|d| d.ticker.as_str()))
        .chain(holdings.iter().map(|h| h.ticker.as_str()))
        .filter(|t| !t.is_empty() && seen.insert(*t))
        .map(str::to_string)
        .collect()
}
