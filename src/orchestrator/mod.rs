//! Predictive insights orchestrator
//!
//! Runs the enabled stages in order (ingestion, forecasting, refinance,
//! prescriptive, simulation, explainability) through one `StageRunner`, so a
//! failing stage is recorded and the next one still runs. Nothing returned
//! from a pipeline run is an error: failures live in the summary.
//!
//! Overlapping runs are not serialized. Forecasts are append-only generations
//! and readers select the newest one, so the last run to write wins.

pub mod stage;

pub use stage::StageRunner;

use crate::agents::{
    DataIngestionAgent, ExplainabilityAgent, ForecastingAgent, PrescriptiveAgent, RefinanceAgent,
    ScenarioSimulator,
};
use crate::audit::{AuditLog, AuditSubject};
use crate::completion::CompletionService;
use crate::config::PredictiveConfig;
use crate::error::PipelineError;
use crate::models::{
    Alert, AlertType, Forecast, ModelType, PipelineRunSummary, Scenario,
    ScenarioSimulationResult, Series, Severity, StressTestParams, UserInsights,
};
use crate::notify::{dispatch, Notifier};
use crate::sources::MarketDataSource;
use crate::store::PredictiveStore;
use crate::Result;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const DATA_INGESTION: &str = "dataIngestion";
pub const FORECASTING: &str = "forecasting";
pub const REFINANCE_WATCHLIST: &str = "refinanceWatchlist";
pub const PRESCRIPTIVE_ANALYTICS: &str = "prescriptiveAnalytics";
pub const SCENARIO_SIMULATION: &str = "scenarioSimulation";
pub const EXPLAINABILITY: &str = "explainability";

pub const USER_FORECASTS: &str = "forecasts";
pub const USER_REFINANCE: &str = "refinance";
pub const USER_RECOMMENDATIONS: &str = "recommendations";
pub const USER_SIMULATIONS: &str = "simulations";

/// Volatilities used by sweep stress tests
const SWEEP_RATE_VOLATILITY: f64 = 0.15;
const SWEEP_PROPERTY_VOLATILITY: f64 = 0.10;
const SWEEP_INCOME_VOLATILITY: f64 = 0.05;
const SWEEP_HORIZON_MONTHS: u32 = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running(String),
    Aggregating,
    Complete,
}

/// External collaborators shared by every agent
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn PredictiveStore>,
    pub source: Arc<dyn MarketDataSource>,
    pub completion: Arc<dyn CompletionService>,
    pub notifier: Arc<dyn Notifier>,
    pub audit: Arc<AuditLog>,
}

pub struct PredictiveOrchestrator {
    config: PredictiveConfig,
    store: Arc<dyn PredictiveStore>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<AuditLog>,
    ingestion: DataIngestionAgent,
    forecasting: ForecastingAgent,
    refinance: RefinanceAgent,
    prescriptive: PrescriptiveAgent,
    simulator: ScenarioSimulator,
    explainability: ExplainabilityAgent,
    phase: Arc<RwLock<RunPhase>>,
    latest: Arc<RwLock<Option<PipelineRunSummary>>>,
}

impl PredictiveOrchestrator {
    /// Build every agent from `config`; fails only on an unusable config
    pub fn new(config: PredictiveConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let Collaborators {
            store,
            source,
            completion,
            notifier,
            audit,
        } = collaborators;

        let forecasting =
            ForecastingAgent::new(store.clone()).with_priority_weight(config.priority_weight);

        Ok(Self {
            ingestion: DataIngestionAgent::new(store.clone(), source),
            refinance: RefinanceAgent::new(
                store.clone(),
                forecasting.clone(),
                notifier.clone(),
                config.alert_thresholds.clone(),
            ),
            prescriptive: PrescriptiveAgent::new(
                store.clone(),
                completion.clone(),
                config.completion_model.clone(),
            ),
            simulator: ScenarioSimulator::new(
                store.clone(),
                config.simulation_iterations,
                config.simulation_seed,
            ),
            explainability: ExplainabilityAgent::new(
                store.clone(),
                completion,
                config.completion_model.clone(),
                audit.clone(),
            ),
            forecasting,
            store,
            notifier,
            audit,
            config,
            phase: Arc::new(RwLock::new(RunPhase::Idle)),
            latest: Arc::new(RwLock::new(None)),
        })
    }

    pub fn config(&self) -> &PredictiveConfig {
        &self.config
    }

    pub fn ingestion(&self) -> &DataIngestionAgent {
        &self.ingestion
    }

    pub fn forecasting(&self) -> &ForecastingAgent {
        &self.forecasting
    }

    pub fn refinance(&self) -> &RefinanceAgent {
        &self.refinance
    }

    pub fn prescriptive(&self) -> &PrescriptiveAgent {
        &self.prescriptive
    }

    pub fn simulator(&self) -> &ScenarioSimulator {
        &self.simulator
    }

    pub fn explainability(&self) -> &ExplainabilityAgent {
        &self.explainability
    }

    pub async fn phase(&self) -> RunPhase {
        self.phase.read().await.clone()
    }

    async fn enter(&self, phase: RunPhase) {
        *self.phase.write().await = phase;
    }

    //
    // ================= Full Sweep =================
    //

    pub async fn run_predictive_insights_pipeline(&self) -> PipelineRunSummary {
        let run_id = Uuid::new_v4();
        let timestamp = Utc::now();
        let started = Instant::now();
        let config = &self.config;
        let (regions, unsupported) = config.partition_regions();

        info!(run_id = %run_id, regions = ?config.regions, "Pipeline run started");

        let mut runner = StageRunner::new();
        let mut alerts: Vec<Alert> = Vec::new();

        // Ingestion
        self.enter(RunPhase::Running(DATA_INGESTION.to_string())).await;
        runner
            .run(DATA_INGESTION, config.enable_data_ingestion, async {
                let report = self.ingestion.run_full_ingestion(&config.regions).await;
                let invalid = report.invalid_regions();
                if !invalid.is_empty() {
                    return Err(PipelineError::InvalidConfiguration(format!(
                        "unsupported regions: {} ({} points ingested for the rest)",
                        invalid.join(", "),
                        report.total_points
                    )));
                }
                if report.total_points == 0 && !report.failures.is_empty() {
                    return Err(PipelineError::SourceUnavailable(format!(
                        "every source fetch failed ({} failures)",
                        report.failures.len()
                    )));
                }
                let details = serde_json::to_value(&report)?;
                Ok::<_, PipelineError>(((), details))
            })
            .await;

        // Forecasting
        self.enter(RunPhase::Running(FORECASTING.to_string())).await;
        let rate_forecasts = runner
            .run(FORECASTING, config.enable_forecasting, async {
                let (latest, failures, count) = self.forecast_regions(&regions).await;
                let mut problems: Vec<String> = failures;
                if !unsupported.is_empty() {
                    problems.push(format!("unsupported regions: {}", unsupported.join(", ")));
                }
                if !problems.is_empty() {
                    return Err(PipelineError::InvalidConfiguration(problems.join("; ")));
                }
                let details = json!({ "regions": regions.len(), "forecasts": count });
                Ok::<_, PipelineError>((latest, details))
            })
            .await
            .unwrap_or_default();

        // Refinance watchlist and rate-drop alerts
        self.enter(RunPhase::Running(REFINANCE_WATCHLIST.to_string())).await;
        let watchlist_users = runner
            .run(REFINANCE_WATCHLIST, config.enable_refinance_watchlist, async {
                let items = self.refinance.generate_refinance_watchlist().await?;
                let mut stage_alerts = self.refinance.check_rate_drop_alerts().await?;
                if !items.is_empty() {
                    let alert = Alert::new(
                        AlertType::RefinanceOpportunity,
                        Severity::Info,
                        format!("{} borrowers on the refinance watchlist", items.len()),
                        json!({
                            "count": items.len(),
                            "topUserId": items[0].user_id,
                            "topPriorityScore": items[0].priority_score,
                        }),
                    );
                    dispatch(self.notifier.as_ref(), &alert).await;
                    stage_alerts.push(alert);
                }
                let details = json!({ "watchlist": items.len(), "alerts": stage_alerts.len() });
                let users: Vec<Uuid> = items.iter().map(|i| i.user_id).collect();
                Ok::<_, PipelineError>(((users, stage_alerts), details))
            })
            .await
            .map(|(users, stage_alerts)| {
                alerts.extend(stage_alerts);
                users
            });

        let sweep_users = self
            .sweep_users(watchlist_users.unwrap_or_default(), config.max_users_per_sweep)
            .await;

        // Prescriptive recommendations
        self.enter(RunPhase::Running(PRESCRIPTIVE_ANALYTICS.to_string())).await;
        runner
            .run(PRESCRIPTIVE_ANALYTICS, config.enable_prescriptive_analytics, async {
                let mut recommendations = 0;
                let mut failures = Vec::new();
                for user_id in &sweep_users {
                    match self.prescriptive.generate_optimal_recommendations(*user_id).await {
                        Ok(found) => recommendations += found.len(),
                        Err(e) => {
                            warn!(user_id = %user_id, error = %e, "Recommendations failed");
                            failures.push(e);
                        }
                    }
                }
                all_failed(sweep_users.len(), failures)?;
                let details = json!({ "users": sweep_users.len(), "recommendations": recommendations });
                Ok::<_, PipelineError>(((), details))
            })
            .await;

        // Stress simulations
        self.enter(RunPhase::Running(SCENARIO_SIMULATION.to_string())).await;
        if let Some(stage_alerts) = runner
            .run(SCENARIO_SIMULATION, config.enable_scenario_simulation, async {
                let mut simulations = 0;
                let mut stage_alerts = Vec::new();
                let mut failures = Vec::new();
                for user_id in &sweep_users {
                    match self.stress_user(*user_id).await {
                        Ok(result) => {
                            simulations += 1;
                            if let Some(alert) = self.stress_alert(&result).await {
                                stage_alerts.push(alert);
                            }
                        }
                        Err(e) => {
                            warn!(user_id = %user_id, error = %e, "Stress simulation failed");
                            failures.push(e);
                        }
                    }
                }
                all_failed(sweep_users.len(), failures)?;
                let details = json!({
                    "users": sweep_users.len(),
                    "simulations": simulations,
                    "alerts": stage_alerts.len(),
                });
                Ok::<_, PipelineError>((stage_alerts, details))
            })
            .await
        {
            alerts.extend(stage_alerts);
        }

        // Explainability on the furthest rate forecast per region
        self.enter(RunPhase::Running(EXPLAINABILITY.to_string())).await;
        runner
            .run(EXPLAINABILITY, config.enable_explainability, async {
                let mut explained = 0;
                let mut failures = Vec::new();
                for forecast in &rate_forecasts {
                    match self.explain(forecast).await {
                        Ok(()) => explained += 1,
                        Err(e) => {
                            warn!(forecast_id = %forecast.id, error = %e, "Explanation failed");
                            failures.push(e);
                        }
                    }
                }
                all_failed(rate_forecasts.len(), failures)?;
                Ok::<_, PipelineError>(((), json!({ "explanations": explained })))
            })
            .await;

        // Aggregation
        self.enter(RunPhase::Aggregating).await;
        for (name, outcome) in runner.failed() {
            let alert = Alert::new(
                AlertType::StageFailure,
                Severity::High,
                format!("Stage {} failed", name),
                json!({
                    "runId": run_id,
                    "stage": name,
                    "error": outcome.error,
                }),
            );
            dispatch(self.notifier.as_ref(), &alert).await;
            alerts.push(alert);
        }

        let summary = PipelineRunSummary {
            run_id,
            timestamp,
            duration_ms: started.elapsed().as_millis() as u64,
            stages: runner.into_outcomes(),
            alerts,
        };

        if let Err(e) = self.store.insert_run_summary(&summary).await {
            error!(run_id = %run_id, error = %e, "Failed to persist run summary");
        }
        if let Err(e) = self.audit.record(AuditSubject::PipelineRun, &summary).await {
            error!(run_id = %run_id, error = %e, "Failed to audit run summary");
        }

        *self.latest.write().await = Some(summary.clone());
        self.enter(RunPhase::Complete).await;

        info!(
            run_id = %run_id,
            duration_ms = summary.duration_ms,
            alerts = summary.alerts.len(),
            "Pipeline run completed"
        );

        summary
    }

    /// Forecast rates and property values per region concurrently.
    /// Returns the furthest rate forecast per region, failure messages and the forecast count.
    async fn forecast_regions(&self, regions: &[String]) -> (Vec<Forecast>, Vec<String>, usize) {
        let horizon = self.config.forecast_horizon;
        let mut set = tokio::task::JoinSet::new();
        for region in regions {
            let agent = self.forecasting.clone();
            let region = region.clone();
            set.spawn(async move {
                let rates = agent.forecast_mortgage_rates(&region, horizon).await;
                let values = agent.forecast_property_appreciation(&region, horizon).await;
                (region, rates, values)
            });
        }

        let mut latest = Vec::new();
        let mut failures = Vec::new();
        let mut count = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((region, rates, values)) => {
                    match rates {
                        Ok(mut rates) => {
                            count += rates.len();
                            if let Some(last) = rates.pop() {
                                latest.push(last);
                            }
                        }
                        Err(e) => failures.push(format!("{} rates: {}", region, e)),
                    }
                    match values {
                        Ok(values) => count += values.len(),
                        Err(e) => failures.push(format!("{} property values: {}", region, e)),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Forecast task failed");
                    failures.push(format!("forecast task: {}", e));
                }
            }
        }
        latest.sort_by(|a, b| a.region.cmp(&b.region));
        failures.sort();
        (latest, failures, count)
    }

    /// Watchlisted users first in priority order, then other active borrowers
    async fn sweep_users(&self, mut users: Vec<Uuid>, limit: usize) -> Vec<Uuid> {
        if users.len() < limit {
            match self.store.active_mortgages().await {
                Ok(mortgages) => {
                    for mortgage in mortgages {
                        if !users.contains(&mortgage.user_id) {
                            users.push(mortgage.user_id);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Could not list active mortgages"),
            }
        }
        users.truncate(limit);
        users
    }

    async fn stress_user(&self, user_id: Uuid) -> Result<ScenarioSimulationResult> {
        let scenario = self.user_scenario(user_id).await?;
        let params = StressTestParams {
            base_scenario: scenario,
            iterations: self.config.simulation_iterations,
            rate_volatility: SWEEP_RATE_VOLATILITY,
            property_volatility: SWEEP_PROPERTY_VOLATILITY,
            income_volatility: SWEEP_INCOME_VOLATILITY,
            time_horizon: SWEEP_HORIZON_MONTHS,
            seed: None,
        };
        self.simulator.run_stress_test_simulation(user_id, &params).await
    }

    async fn user_scenario(&self, user_id: Uuid) -> Result<Scenario> {
        let mortgage = self
            .store
            .load_mortgage(user_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("mortgage for user {}", user_id)))?;
        Ok(Scenario::from_snapshot(&mortgage))
    }

    /// Raise a stress-risk alert when too many draws fail qualification
    async fn stress_alert(&self, result: &ScenarioSimulationResult) -> Option<Alert> {
        let failure_rate = 1.0 - result.results.qualification_pass_rate;
        let threshold = self.config.alert_thresholds.stress_failure_rate;
        if failure_rate <= threshold {
            return None;
        }

        let severity = if failure_rate >= 2.0 * threshold {
            Severity::High
        } else {
            Severity::Medium
        };
        let alert = Alert::new(
            AlertType::StressRisk,
            severity,
            format!(
                "{:.0}% of simulated outcomes fail qualification",
                failure_rate * 100.0
            ),
            json!({
                "userId": result.user_id,
                "simulationId": result.simulation_id,
                "failureRate": failure_rate,
            }),
        );
        dispatch(self.notifier.as_ref(), &alert).await;
        Some(alert)
    }

    async fn explain(&self, forecast: &Forecast) -> Result<()> {
        let features = self.explainability.derive_forecast_features(forecast).await?;
        self.explainability
            .generate_shap_explanation(forecast.id, &features, ModelType::for_series(forecast.series))
            .await?;
        Ok(())
    }

    //
    // ================= User Bundle =================
    //

    /// Everything the pipeline knows about one user. Each part fails on its own;
    /// the call itself always resolves.
    pub async fn run_user_predictive_insights(&self, user_id: Uuid) -> UserInsights {
        let config = &self.config;
        let mut runner = StageRunner::new();
        let mut alerts = Vec::new();

        let forecasts = runner
            .run(USER_FORECASTS, config.enable_forecasting, async {
                let mut forecasts = self
                    .forecasting
                    .get_latest_forecasts(user_id, Series::MortgageRate)
                    .await?;
                if forecasts.is_empty() {
                    let mortgage = self.store.load_mortgage(user_id).await?.ok_or_else(|| {
                        PipelineError::NotFound(format!("mortgage for user {}", user_id))
                    })?;
                    forecasts = self
                        .forecasting
                        .forecast_series(
                            Series::MortgageRate,
                            &mortgage.region,
                            config.forecast_horizon,
                            Some(user_id),
                        )
                        .await?;
                }
                let details = json!({ "count": forecasts.len() });
                Ok::<_, PipelineError>((forecasts, details))
            })
            .await
            .unwrap_or_default();

        let refinance_opportunities = runner
            .run(USER_REFINANCE, config.enable_refinance_watchlist, async {
                let mortgage = self.store.load_mortgage(user_id).await?.ok_or_else(|| {
                    PipelineError::NotFound(format!("mortgage for user {}", user_id))
                })?;
                let score = self
                    .forecasting
                    .predict_refinance_probability(user_id, &(&mortgage).into())
                    .await?;
                let mut stage_alerts = Vec::new();
                if score.probability >= config.alert_thresholds.refinance_probability
                    && score.potential_savings > 0.0
                {
                    let alert = Alert::new(
                        AlertType::RefinanceOpportunity,
                        Severity::Medium,
                        format!(
                            "Refinancing to {:.2}% could save {:.0}",
                            score.best_available_rate, score.potential_savings
                        ),
                        json!({
                            "userId": user_id,
                            "probability": score.probability,
                            "potentialSavings": score.potential_savings,
                        }),
                    );
                    dispatch(self.notifier.as_ref(), &alert).await;
                    stage_alerts.push(alert);
                }
                let details = json!({ "probability": score.probability });
                Ok::<_, PipelineError>(((vec![score], stage_alerts), details))
            })
            .await
            .map(|(scores, stage_alerts)| {
                alerts.extend(stage_alerts);
                scores
            })
            .unwrap_or_default();

        let recommendations = runner
            .run(USER_RECOMMENDATIONS, config.enable_prescriptive_analytics, async {
                let found = self.prescriptive.generate_optimal_recommendations(user_id).await?;
                let details = json!({ "count": found.len() });
                Ok::<_, PipelineError>((found, details))
            })
            .await
            .unwrap_or_default();

        let simulations = runner
            .run(USER_SIMULATIONS, config.enable_scenario_simulation, async {
                let scenario = self.user_scenario(user_id).await?;
                let results = self
                    .simulator
                    .run_comprehensive_stress_test(user_id, &scenario)
                    .await?;
                let mut stage_alerts = Vec::new();
                for result in &results {
                    if let Some(alert) = self.stress_alert(result).await {
                        stage_alerts.push(alert);
                    }
                }
                let details = json!({ "count": results.len() });
                Ok::<_, PipelineError>(((results, stage_alerts), details))
            })
            .await
            .map(|(results, stage_alerts)| {
                alerts.extend(stage_alerts);
                results
            })
            .unwrap_or_default();

        info!(
            user_id = %user_id,
            forecasts = forecasts.len(),
            recommendations = recommendations.len(),
            simulations = simulations.len(),
            "User insights assembled"
        );

        UserInsights {
            user_id,
            timestamp: Utc::now(),
            forecasts,
            refinance_opportunities,
            recommendations,
            simulations,
            alerts,
            stages: runner.into_outcomes(),
        }
    }

    /// Latest run summary without re-running the pipeline
    pub async fn get_predictive_insights_summary(&self) -> Result<Option<PipelineRunSummary>> {
        if let Some(summary) = self.latest.read().await.clone() {
            return Ok(Some(summary));
        }
        self.store.latest_run_summary().await
    }
}

/// A per-user stage fails only when every user failed
fn all_failed(attempted: usize, mut failures: Vec<PipelineError>) -> Result<()> {
    if attempted > 0 && failures.len() == attempted {
        let count = failures.len();
        if let Some(first) = failures.pop() {
            warn!(failed = count, "Every user failed in stage");
            return Err(first);
        }
    }
    Ok(())
}
