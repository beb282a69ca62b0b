//! Shared test fixtures

use crate::agents::DataIngestionAgent;
use crate::error::PipelineError;
use crate::models::{
    Explanation, ExplanationMethod, Forecast, HistoricalDataPoint, MortgageSnapshot, PipelineRunSummary,
    ScenarioSimulationResult, Series, WatchlistItem,
};
use crate::sources::{MarketDataSource, SyntheticMarketSource};
use crate::store::{InMemoryStore, PredictiveStore};
use crate::Result;
use chrono::NaiveDate;
use std::sync::Arc;
use uuid::Uuid;

pub const FIXTURE_SEED: u64 = 42;

/// A prime-credit borrower at 67% loan-to-value
pub fn snapshot(region: &str, current_rate: f64) -> MortgageSnapshot {
    MortgageSnapshot {
        user_id: Uuid::new_v4(),
        region: region.to_string(),
        current_rate,
        balance: 400_000.0,
        property_value: 600_000.0,
        credit_score: 780,
        annual_income: 160_000.0,
        monthly_debts: 400.0,
        remaining_term_months: 300,
        active: true,
    }
}

/// Store with two years of synthetic history for `regions`
pub async fn seeded_store(regions: &[&str]) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    let ingestion = DataIngestionAgent::new(
        store.clone(),
        Arc::new(SyntheticMarketSource::current(FIXTURE_SEED)),
    );
    let regions: Vec<String> = regions.iter().map(|r| r.to_string()).collect();
    ingestion.run_full_ingestion(&regions).await;
    store
}

/// Synthetic source that fails for the listed series
pub struct FailingSource {
    inner: SyntheticMarketSource,
    failing: Vec<Series>,
}

impl FailingSource {
    pub fn new(failing: &[Series]) -> Self {
        Self {
            inner: SyntheticMarketSource::current(FIXTURE_SEED),
            failing: failing.to_vec(),
        }
    }
}

#[async_trait::async_trait]
impl MarketDataSource for FailingSource {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn fetch(&self, series: Series, region: &str) -> Result<Vec<HistoricalDataPoint>> {
        if self.failing.contains(&series) {
            return Err(PipelineError::SourceUnavailable(format!(
                "{} feed is down",
                series
            )));
        }
        self.inner.fetch(series, region).await
    }
}

/// In-memory store whose listed operations always fail
pub struct FlakyStore {
    inner: Arc<InMemoryStore>,
    failing: Vec<&'static str>,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryStore>, failing: &[&'static str]) -> Self {
        Self {
            inner,
            failing: failing.to_vec(),
        }
    }

    fn check(&self, operation: &str) -> Result<()> {
        if self.failing.contains(&operation) {
            return Err(PipelineError::PersistenceFailure(format!(
                "{} rejected by flaky store",
                operation
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl PredictiveStore for FlakyStore {
    async fn upsert_historical(&self, points: &[HistoricalDataPoint]) -> Result<usize> {
        self.check("upsert_historical")?;
        self.inner.upsert_historical(points).await
    }

    async fn historical_range(
        &self,
        series: Series,
        region: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<HistoricalDataPoint>> {
        self.check("historical_range")?;
        self.inner.historical_range(series, region, start, end).await
    }

    async fn insert_forecasts(&self, forecasts: &[Forecast]) -> Result<()> {
        self.check("insert_forecasts")?;
        self.inner.insert_forecasts(forecasts).await
    }

    async fn forecasts_for(
        &self,
        series: Series,
        region: &str,
        user_id: Option<Uuid>,
    ) -> Result<Vec<Forecast>> {
        self.check("forecasts_for")?;
        self.inner.forecasts_for(series, region, user_id).await
    }

    async fn load_forecast(&self, id: Uuid) -> Result<Option<Forecast>> {
        self.check("load_forecast")?;
        self.inner.load_forecast(id).await
    }

    async fn upsert_mortgage(&self, snapshot: &MortgageSnapshot) -> Result<()> {
        self.check("upsert_mortgage")?;
        self.inner.upsert_mortgage(snapshot).await
    }

    async fn load_mortgage(&self, user_id: Uuid) -> Result<Option<MortgageSnapshot>> {
        self.check("load_mortgage")?;
        self.inner.load_mortgage(user_id).await
    }

    async fn active_mortgages(&self) -> Result<Vec<MortgageSnapshot>> {
        self.check("active_mortgages")?;
        self.inner.active_mortgages().await
    }

    async fn insert_watchlist_item(&self, item: &WatchlistItem) -> Result<()> {
        self.check("insert_watchlist_item")?;
        self.inner.insert_watchlist_item(item).await
    }

    async fn update_watchlist_item(&self, item: &WatchlistItem) -> Result<()> {
        self.check("update_watchlist_item")?;
        self.inner.update_watchlist_item(item).await
    }

    async fn load_watchlist_item(&self, id: Uuid) -> Result<Option<WatchlistItem>> {
        self.check("load_watchlist_item")?;
        self.inner.load_watchlist_item(id).await
    }

    async fn watchlist_for_user(&self, user_id: Uuid) -> Result<Vec<WatchlistItem>> {
        self.check("watchlist_for_user")?;
        self.inner.watchlist_for_user(user_id).await
    }

    async fn insert_simulation(&self, result: &ScenarioSimulationResult) -> Result<()> {
        self.check("insert_simulation")?;
        self.inner.insert_simulation(result).await
    }

    async fn load_simulation(&self, id: Uuid) -> Result<Option<ScenarioSimulationResult>> {
        self.check("load_simulation")?;
        self.inner.load_simulation(id).await
    }

    async fn insert_explanation(&self, explanation: &Explanation) -> Result<Explanation> {
        self.check("insert_explanation")?;
        self.inner.insert_explanation(explanation).await
    }

    async fn load_explanation(&self, id: Uuid) -> Result<Option<Explanation>> {
        self.check("load_explanation")?;
        self.inner.load_explanation(id).await
    }

    async fn find_explanation(
        &self,
        forecast_id: Uuid,
        method: ExplanationMethod,
    ) -> Result<Option<Explanation>> {
        self.check("find_explanation")?;
        self.inner.find_explanation(forecast_id, method).await
    }

    async fn insert_run_summary(&self, summary: &PipelineRunSummary) -> Result<()> {
        self.check("insert_run_summary")?;
        self.inner.insert_run_summary(summary).await
    }

    async fn latest_run_summary(&self) -> Result<Option<PipelineRunSummary>> {
        self.check("latest_run_summary")?;
        self.inner.latest_run_summary().await
    }
}
