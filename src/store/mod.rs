//! Persistence layer
//!
//! Every agent reads and writes through `PredictiveStore` with independent
//! point operations. The in-memory store backs development and tests;
//! `PgStore` backs deployments.

use crate::error::PipelineError;
use crate::models::{
    Explanation, ExplanationMethod, Forecast, HistoricalDataPoint, MortgageSnapshot, PipelineRunSummary,
    ScenarioSimulationResult, Series, WatchlistItem,
};
use crate::Result;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub mod postgres;
pub use postgres::PgStore;

/// Trait for pipeline persistence
#[async_trait::async_trait]
pub trait PredictiveStore: Send + Sync {
    /// Insert or overwrite points keyed by (series, region, date); returns rows written
    async fn upsert_historical(&self, points: &[HistoricalDataPoint]) -> Result<usize>;
    /// Points in `[start, end]`, ascending by date
    async fn historical_range(
        &self,
        series: Series,
        region: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<HistoricalDataPoint>>;

    async fn insert_forecasts(&self, forecasts: &[Forecast]) -> Result<()>;
    /// Forecasts for a series/region, scoped to `user_id` or to system-wide runs when `None`
    async fn forecasts_for(
        &self,
        series: Series,
        region: &str,
        user_id: Option<Uuid>,
    ) -> Result<Vec<Forecast>>;
    async fn load_forecast(&self, id: Uuid) -> Result<Option<Forecast>>;

    async fn upsert_mortgage(&self, snapshot: &MortgageSnapshot) -> Result<()>;
    async fn load_mortgage(&self, user_id: Uuid) -> Result<Option<MortgageSnapshot>>;
    async fn active_mortgages(&self) -> Result<Vec<MortgageSnapshot>>;

    async fn insert_watchlist_item(&self, item: &WatchlistItem) -> Result<()>;
    async fn update_watchlist_item(&self, item: &WatchlistItem) -> Result<()>;
    async fn load_watchlist_item(&self, id: Uuid) -> Result<Option<WatchlistItem>>;
    async fn watchlist_for_user(&self, user_id: Uuid) -> Result<Vec<WatchlistItem>>;

    async fn insert_simulation(&self, result: &ScenarioSimulationResult) -> Result<()>;
    async fn load_simulation(&self, id: Uuid) -> Result<Option<ScenarioSimulationResult>>;

    /// Store an explanation unless one exists for its forecast and method.
    /// Returns the stored row, which is the earlier one on conflict.
    async fn insert_explanation(&self, explanation: &Explanation) -> Result<Explanation>;
    async fn load_explanation(&self, id: Uuid) -> Result<Option<Explanation>>;
    async fn find_explanation(
        &self,
        forecast_id: Uuid,
        method: ExplanationMethod,
    ) -> Result<Option<Explanation>>;

    async fn insert_run_summary(&self, summary: &PipelineRunSummary) -> Result<()>;
    async fn latest_run_summary(&self) -> Result<Option<PipelineRunSummary>>;
}

type HistoryKey = (Series, String);

/// In-memory store for development and tests
pub struct InMemoryStore {
    history: Arc<RwLock<HashMap<HistoryKey, BTreeMap<NaiveDate, f64>>>>,
    forecasts: Arc<RwLock<Vec<Forecast>>>,
    mortgages: Arc<RwLock<HashMap<Uuid, MortgageSnapshot>>>,
    watchlist: Arc<RwLock<HashMap<Uuid, WatchlistItem>>>,
    simulations: Arc<RwLock<HashMap<Uuid, ScenarioSimulationResult>>>,
    explanations: Arc<RwLock<HashMap<Uuid, Explanation>>>,
    runs: Arc<RwLock<Vec<PipelineRunSummary>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            history: Arc::new(RwLock::new(HashMap::new())),
            forecasts: Arc::new(RwLock::new(Vec::new())),
            mortgages: Arc::new(RwLock::new(HashMap::new())),
            watchlist: Arc::new(RwLock::new(HashMap::new())),
            simulations: Arc::new(RwLock::new(HashMap::new())),
            explanations: Arc::new(RwLock::new(HashMap::new())),
            runs: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PredictiveStore for InMemoryStore {
    async fn upsert_historical(&self, points: &[HistoricalDataPoint]) -> Result<usize> {
        let mut history = self.history.write().await;
        for point in points {
            history
                .entry((point.series, point.region.clone()))
                .or_default()
                .insert(point.date, point.value);
        }
        Ok(points.len())
    }

    async fn historical_range(
        &self,
        series: Series,
        region: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<HistoricalDataPoint>> {
        if start > end {
            return Ok(Vec::new());
        }
        let history = self.history.read().await;
        let points = history
            .get(&(series, region.to_string()))
            .map(|by_date| {
                by_date
                    .range(start..=end)
                    .map(|(date, value)| HistoricalDataPoint {
                        series,
                        region: region.to_string(),
                        date: *date,
                        value: *value,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(points)
    }

    async fn insert_forecasts(&self, forecasts: &[Forecast]) -> Result<()> {
        let mut stored = self.forecasts.write().await;
        stored.extend(forecasts.iter().cloned());
        Ok(())
    }

    async fn forecasts_for(
        &self,
        series: Series,
        region: &str,
        user_id: Option<Uuid>,
    ) -> Result<Vec<Forecast>> {
        let stored = self.forecasts.read().await;
        Ok(stored
            .iter()
            .filter(|f| f.series == series && f.region == region && f.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn load_forecast(&self, id: Uuid) -> Result<Option<Forecast>> {
        let stored = self.forecasts.read().await;
        Ok(stored.iter().find(|f| f.id == id).cloned())
    }

    async fn upsert_mortgage(&self, snapshot: &MortgageSnapshot) -> Result<()> {
        let mut mortgages = self.mortgages.write().await;
        mortgages.insert(snapshot.user_id, snapshot.clone());
        Ok(())
    }

    async fn load_mortgage(&self, user_id: Uuid) -> Result<Option<MortgageSnapshot>> {
        let mortgages = self.mortgages.read().await;
        Ok(mortgages.get(&user_id).cloned())
    }

    async fn active_mortgages(&self) -> Result<Vec<MortgageSnapshot>> {
        let mortgages = self.mortgages.read().await;
        let mut active: Vec<MortgageSnapshot> =
            mortgages.values().filter(|m| m.active).cloned().collect();
        active.sort_by_key(|m| m.user_id);
        Ok(active)
    }

    async fn insert_watchlist_item(&self, item: &WatchlistItem) -> Result<()> {
        let mut watchlist = self.watchlist.write().await;
        if watchlist.contains_key(&item.id) {
            return Err(PipelineError::PersistenceFailure(format!(
                "watchlist item {} already exists",
                item.id
            )));
        }
        watchlist.insert(item.id, item.clone());
        Ok(())
    }

    async fn update_watchlist_item(&self, item: &WatchlistItem) -> Result<()> {
        let mut watchlist = self.watchlist.write().await;
        match watchlist.get_mut(&item.id) {
            Some(existing) => {
                *existing = item.clone();
                Ok(())
            }
            None => Err(PipelineError::NotFound(format!("watchlist item {}", item.id))),
        }
    }

    async fn load_watchlist_item(&self, id: Uuid) -> Result<Option<WatchlistItem>> {
        let watchlist = self.watchlist.read().await;
        Ok(watchlist.get(&id).cloned())
    }

    async fn watchlist_for_user(&self, user_id: Uuid) -> Result<Vec<WatchlistItem>> {
        let watchlist = self.watchlist.read().await;
        let mut items: Vec<WatchlistItem> = watchlist
            .values()
            .filter(|item| item.user_id == user_id)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.created_at);
        Ok(items)
    }

    async fn insert_simulation(&self, result: &ScenarioSimulationResult) -> Result<()> {
        let mut simulations = self.simulations.write().await;
        simulations.insert(result.simulation_id, result.clone());
        Ok(())
    }

    async fn load_simulation(&self, id: Uuid) -> Result<Option<ScenarioSimulationResult>> {
        let simulations = self.simulations.read().await;
        Ok(simulations.get(&id).cloned())
    }

    async fn insert_explanation(&self, explanation: &Explanation) -> Result<Explanation> {
        let mut explanations = self.explanations.write().await;
        if let Some(existing) = explanations.values().find(|e| {
            e.forecast_id == explanation.forecast_id
                && e.explanation_type == explanation.explanation_type
        }) {
            return Ok(existing.clone());
        }
        explanations.insert(explanation.id, explanation.clone());
        Ok(explanation.clone())
    }

    async fn load_explanation(&self, id: Uuid) -> Result<Option<Explanation>> {
        let explanations = self.explanations.read().await;
        Ok(explanations.get(&id).cloned())
    }

    async fn find_explanation(
        &self,
        forecast_id: Uuid,
        method: ExplanationMethod,
    ) -> Result<Option<Explanation>> {
        let explanations = self.explanations.read().await;
        Ok(explanations
            .values()
            .find(|e| e.forecast_id == forecast_id && e.explanation_type == method)
            .cloned())
    }

    async fn insert_run_summary(&self, summary: &PipelineRunSummary) -> Result<()> {
        let mut runs = self.runs.write().await;
        runs.push(summary.clone());
        Ok(())
    }

    async fn latest_run_summary(&self) -> Result<Option<PipelineRunSummary>> {
        let runs = self.runs.read().await;
        Ok(runs.iter().max_by_key(|r| r.timestamp).cloned())
    }
}

/// Forecasts belonging to the most recent generation, ascending by target date
pub fn latest_generation(mut forecasts: Vec<Forecast>) -> Vec<Forecast> {
    let Some(newest) = forecasts
        .iter()
        .max_by_key(|f| f.generated_at)
        .map(|f| f.generation_id)
    else {
        return Vec::new();
    };
    forecasts.retain(|f| f.generation_id == newest);
    forecasts.sort_by_key(|f| f.target_date);
    forecasts
}
