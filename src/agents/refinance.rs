//! Refinance watchlist and retention
//!
//! The sweep scores every active mortgage, keeps the ones worth a call and
//! ranks them. Status changes on watchlist items go through the
//! `WatchlistStatus` state machine; terminal items are never touched again.

use crate::agents::ForecastingAgent;
use crate::config::AlertThresholds;
use crate::error::PipelineError;
use crate::models::{
    Alert, AlertType, RefinanceInputs, RefinanceProbability, RetentionStrategy, Severity,
    WatchlistItem, WatchlistStatus,
};
use crate::notify::{dispatch, Notifier};
use crate::store::PredictiveStore;
use crate::Result;
use chrono::Utc;
use serde_json::json;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct RefinanceAgent {
    store: Arc<dyn PredictiveStore>,
    forecasting: ForecastingAgent,
    notifier: Arc<dyn Notifier>,
    thresholds: AlertThresholds,
}

impl RefinanceAgent {
    pub fn new(
        store: Arc<dyn PredictiveStore>,
        forecasting: ForecastingAgent,
        notifier: Arc<dyn Notifier>,
        thresholds: AlertThresholds,
    ) -> Self {
        Self {
            store,
            forecasting,
            notifier,
            thresholds,
        }
    }

    /// Score every active mortgage and upsert the eligible ones, highest priority first
    pub async fn generate_refinance_watchlist(&self) -> Result<Vec<WatchlistItem>> {
        let mortgages = self.store.active_mortgages().await?;

        let mut candidates = Vec::new();
        for mortgage in &mortgages {
            let inputs = RefinanceInputs::from(mortgage);
            match self
                .forecasting
                .predict_refinance_probability(mortgage.user_id, &inputs)
                .await
            {
                Ok(score) => {
                    if score.probability >= self.thresholds.refinance_probability
                        && score.potential_savings > 0.0
                    {
                        candidates.push(score);
                    }
                }
                Err(e) => {
                    warn!(user_id = %mortgage.user_id, error = %e, "Refinance scoring failed");
                }
            }
        }

        rank_candidates(&mut candidates);

        let mut items = Vec::with_capacity(candidates.len());
        for score in candidates {
            items.push(self.upsert_item(&score).await?);
        }

        info!(
            scanned = mortgages.len(),
            watchlisted = items.len(),
            "Refinance watchlist generated"
        );

        Ok(items)
    }

    /// Refresh the user's open item in place, or open a new one
    async fn upsert_item(&self, score: &RefinanceProbability) -> Result<WatchlistItem> {
        let now = Utc::now();
        let open = self
            .store
            .watchlist_for_user(score.user_id)
            .await?
            .into_iter()
            .find(|item| !item.status.is_terminal());

        match open {
            Some(mut item) => {
                item.priority_score = score.priority_score;
                item.probability = score.probability;
                item.potential_savings = score.potential_savings;
                item.updated_at = now;
                self.store.update_watchlist_item(&item).await?;
                Ok(item)
            }
            None => {
                let item = WatchlistItem {
                    id: Uuid::new_v4(),
                    user_id: score.user_id,
                    status: WatchlistStatus::Pending,
                    notes: None,
                    priority_score: score.priority_score,
                    probability: score.probability,
                    potential_savings: score.potential_savings,
                    created_at: now,
                    updated_at: now,
                };
                self.store.insert_watchlist_item(&item).await?;
                Ok(item)
            }
        }
    }

    pub async fn get_refinance_watchlist(&self, user_id: Uuid) -> Result<Vec<WatchlistItem>> {
        let mut items = self.store.watchlist_for_user(user_id).await?;
        items.sort_by(|a, b| {
            b.priority_score
                .partial_cmp(&a.priority_score)
                .unwrap_or(Ordering::Equal)
        });
        Ok(items)
    }

    pub async fn update_watchlist_item(
        &self,
        id: Uuid,
        status: WatchlistStatus,
        notes: Option<String>,
    ) -> Result<WatchlistItem> {
        let mut item = self
            .store
            .load_watchlist_item(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("watchlist item {}", id)))?;

        if !item.status.can_transition_to(status) {
            return Err(PipelineError::InvalidTransition(format!(
                "{} -> {}",
                item.status, status
            )));
        }

        debug!(item_id = %id, from = %item.status, to = %status, "Watchlist status changed");

        item.status = status;
        if notes.is_some() {
            item.notes = notes;
        }
        item.updated_at = Utc::now();
        self.store.update_watchlist_item(&item).await?;
        Ok(item)
    }

    /// Retention plays for a user, most urgent first
    pub async fn generate_retention_strategies(&self, user_id: Uuid) -> Result<Vec<RetentionStrategy>> {
        let mortgage = self
            .store
            .load_mortgage(user_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("mortgage for user {}", user_id)))?;

        let score = self
            .forecasting
            .predict_refinance_probability(user_id, &RefinanceInputs::from(&mortgage))
            .await?;
        let rate_gap = mortgage.current_rate - score.best_available_rate;
        let ltv = if mortgage.property_value > 0.0 {
            mortgage.balance / mortgage.property_value
        } else {
            1.0
        };

        let mut strategies = Vec::new();

        if score.probability >= 0.6 && score.potential_savings > 0.0 {
            strategies.push(RetentionStrategy {
                strategy_type: "rate_match".to_string(),
                title: "Offer a competitive rate match".to_string(),
                description: format!(
                    "Borrower is likely to refinance elsewhere; matching {:.2}% keeps the loan in-house.",
                    score.best_available_rate
                ),
                priority: Severity::High,
                estimated_savings: score.potential_savings,
            });
        }

        if score.probability >= self.thresholds.refinance_probability {
            strategies.push(RetentionStrategy {
                strategy_type: "proactive_outreach".to_string(),
                title: "Schedule a proactive review call".to_string(),
                description: format!(
                    "Refinance probability is {:.0}%; reach out before a competitor does.",
                    score.probability * 100.0
                ),
                priority: Severity::Medium,
                estimated_savings: score.potential_savings,
            });
        }

        if ltv <= 0.8 {
            strategies.push(RetentionStrategy {
                strategy_type: "equity_review".to_string(),
                title: "Review available home equity".to_string(),
                description: format!(
                    "Loan-to-value is {:.0}%; the borrower may qualify for better terms or an equity product.",
                    ltv * 100.0
                ),
                priority: Severity::Low,
                estimated_savings: 0.0,
            });
        }

        if mortgage.remaining_term_months <= 24 {
            strategies.push(RetentionStrategy {
                strategy_type: "early_renewal".to_string(),
                title: "Offer early renewal".to_string(),
                description: format!(
                    "{} months remain on the term; lock in a renewal now.",
                    mortgage.remaining_term_months
                ),
                priority: Severity::Medium,
                estimated_savings: score.potential_savings,
            });
        }

        if strategies.is_empty() || rate_gap < self.thresholds.rate_drop {
            strategies.push(RetentionStrategy {
                strategy_type: "rate_watch".to_string(),
                title: "Monitor rates".to_string(),
                description: "No immediate action; alert the borrower if market rates fall further."
                    .to_string(),
                priority: Severity::Info,
                estimated_savings: 0.0,
            });
        }

        strategies.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(strategies)
    }

    /// Alert on every active mortgage whose locked rate sits at least the
    /// configured drop above the best rate now expected in its region
    pub async fn check_rate_drop_alerts(&self) -> Result<Vec<Alert>> {
        let mortgages = self.store.active_mortgages().await?;
        let mut market_rates: HashMap<String, f64> = HashMap::new();
        let mut alerts = Vec::new();

        for mortgage in &mortgages {
            let market = match market_rates.get(&mortgage.region) {
                Some(rate) => *rate,
                None => match self.forecasting.market_rate(&mortgage.region).await {
                    Ok(rate) => {
                        market_rates.insert(mortgage.region.clone(), rate);
                        rate
                    }
                    Err(e) => {
                        warn!(region = %mortgage.region, error = %e, "Market rate unavailable");
                        continue;
                    }
                },
            };

            let drop = mortgage.current_rate - market;
            if drop < self.thresholds.rate_drop {
                continue;
            }

            let severity = if drop >= 2.0 * self.thresholds.rate_drop {
                Severity::High
            } else {
                Severity::Medium
            };
            let alert = Alert::new(
                AlertType::RateDrop,
                severity,
                format!(
                    "Market rate {:.2}% is {:.2} points below the locked {:.2}%",
                    market, drop, mortgage.current_rate
                ),
                json!({
                    "userId": mortgage.user_id,
                    "region": mortgage.region,
                    "lockedRate": mortgage.current_rate,
                    "marketRate": market,
                    "drop": drop,
                }),
            );
            dispatch(self.notifier.as_ref(), &alert).await;
            alerts.push(alert);
        }

        info!(checked = mortgages.len(), alerts = alerts.len(), "Rate drop check complete");
        Ok(alerts)
    }
}

/// Priority descending, ties broken by savings descending
pub fn rank_candidates(candidates: &mut [RefinanceProbability]) {
    candidates.sort_by(|a, b| {
        b.priority_score
            .partial_cmp(&a.priority_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.potential_savings
                    .partial_cmp(&a.potential_savings)
                    .unwrap_or(Ordering::Equal)
            })
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::InMemoryNotifier;
    use crate::store::InMemoryStore;
    use crate::testing::{seeded_store, snapshot};

    async fn agent() -> (RefinanceAgent, Arc<InMemoryStore>, Arc<InMemoryNotifier>) {
        let store = seeded_store(&["CA"]).await;
        let notifier = Arc::new(InMemoryNotifier::new());
        let agent = RefinanceAgent::new(
            store.clone(),
            ForecastingAgent::new(store.clone()),
            notifier.clone(),
            AlertThresholds::default(),
        );
        (agent, store, notifier)
    }

    fn score(priority: f64, savings: f64) -> RefinanceProbability {
        RefinanceProbability {
            user_id: Uuid::new_v4(),
            probability: 0.5,
            potential_savings: savings,
            priority_score: priority,
            current_rate: 7.0,
            best_available_rate: 6.0,
        }
    }

    #[test]
    fn test_rank_ties_broken_by_savings() {
        let mut candidates = vec![score(10.0, 5.0), score(20.0, 1.0), score(10.0, 9.0)];
        rank_candidates(&mut candidates);
        assert_eq!(candidates[0].priority_score, 20.0);
        assert_eq!(candidates[1].potential_savings, 9.0);
        assert_eq!(candidates[2].potential_savings, 5.0);
    }

    #[tokio::test]
    async fn test_watchlist_sweep_ranks_and_refreshes() {
        let (agent, store, _) = agent().await;
        let high = snapshot("CA", 9.5);
        let mid = snapshot("CA", 8.0);
        let low = snapshot("CA", 4.0);
        for m in [&high, &mid, &low] {
            store.upsert_mortgage(m).await.unwrap();
        }

        let items = agent.generate_refinance_watchlist().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].user_id, high.user_id);
        assert!(items[0].priority_score >= items[1].priority_score);

        // A second sweep refreshes the same open items
        let again = agent.generate_refinance_watchlist().await.unwrap();
        assert_eq!(again[0].id, items[0].id);
        assert_eq!(agent.get_refinance_watchlist(high.user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_watchlist_round_trip() {
        let (agent, store, _) = agent().await;
        let user = snapshot("CA", 9.0);
        store.upsert_mortgage(&user).await.unwrap();

        let items = agent.generate_refinance_watchlist().await.unwrap();
        let fetched = agent.get_refinance_watchlist(user.user_id).await.unwrap();
        assert_eq!(fetched[0].id, items[0].id);
        assert_eq!(fetched[0].priority_score, items[0].priority_score);
    }

    #[tokio::test]
    async fn test_status_state_machine() {
        let (agent, store, _) = agent().await;
        let user = snapshot("CA", 9.0);
        store.upsert_mortgage(&user).await.unwrap();
        let id = agent.generate_refinance_watchlist().await.unwrap()[0].id;

        let contacted = agent
            .update_watchlist_item(id, WatchlistStatus::Contacted, Some("left voicemail".into()))
            .await
            .unwrap();
        assert_eq!(contacted.status, WatchlistStatus::Contacted);

        agent
            .update_watchlist_item(id, WatchlistStatus::Converted, None)
            .await
            .unwrap();

        let err = agent
            .update_watchlist_item(id, WatchlistStatus::Pending, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition(_)));

        let stored = store.load_watchlist_item(id).await.unwrap().unwrap();
        assert_eq!(stored.status, WatchlistStatus::Converted);
        assert_eq!(stored.notes.as_deref(), Some("left voicemail"));
    }

    #[tokio::test]
    async fn test_update_unknown_item() {
        let (agent, _, _) = agent().await;
        let result = agent
            .update_watchlist_item(Uuid::new_v4(), WatchlistStatus::Contacted, None)
            .await;
        assert!(matches!(result, Err(PipelineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_converted_item_is_not_refreshed() {
        let (agent, store, _) = agent().await;
        let user = snapshot("CA", 9.0);
        store.upsert_mortgage(&user).await.unwrap();
        let first = agent.generate_refinance_watchlist().await.unwrap()[0].id;
        agent.update_watchlist_item(first, WatchlistStatus::Dismissed, None).await.unwrap();

        let second = agent.generate_refinance_watchlist().await.unwrap()[0].id;
        assert_ne!(first, second);
        let closed = store.load_watchlist_item(first).await.unwrap().unwrap();
        assert_eq!(closed.status, WatchlistStatus::Dismissed);
    }

    #[tokio::test]
    async fn test_rate_drop_alerts_dispatched() {
        let (agent, store, notifier) = agent().await;
        let locked_high = snapshot("CA", 9.0);
        let locked_low = snapshot("CA", 3.0);
        store.upsert_mortgage(&locked_high).await.unwrap();
        store.upsert_mortgage(&locked_low).await.unwrap();

        let alerts = agent.check_rate_drop_alerts().await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::RateDrop);
        assert_eq!(alerts[0].severity, Severity::High);
        assert_eq!(notifier.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn test_retention_strategies_sorted() {
        let (agent, store, _) = agent().await;
        let user = snapshot("CA", 9.5);
        store.upsert_mortgage(&user).await.unwrap();

        let strategies = agent.generate_retention_strategies(user.user_id).await.unwrap();
        assert!(!strategies.is_empty());
        assert!(strategies.windows(2).all(|w| w[0].priority >= w[1].priority));
        assert!(strategies.iter().any(|s| s.strategy_type == "rate_match"));
    }
}
