//! Scenario simulator
//!
//! Stochastic stress tests draw perturbed scenarios from a seeded RNG. Rate
//! shocks apply named deterministic deltas. Both persist their result.

use crate::affordability::{evaluate, validate_scenario};
use crate::error::PipelineError;
use crate::modeling::{summarize, GaussianShockModel, SimulationModel, Volatility};
use crate::modeling::simulation::reprice_property;
use crate::models::{
    RateShock, Scenario, ScenarioSimulationResult, ShockOutcome, SimulationSummary,
    SimulationType, StressTestParams,
};
use crate::store::PredictiveStore;
use crate::Result;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct ScenarioSimulator {
    store: Arc<dyn PredictiveStore>,
    model: Arc<dyn SimulationModel>,
    default_iterations: u32,
    seed: Option<u64>,
}

impl ScenarioSimulator {
    pub fn new(store: Arc<dyn PredictiveStore>, default_iterations: u32, seed: Option<u64>) -> Self {
        Self {
            store,
            model: Arc::new(GaussianShockModel),
            default_iterations,
            seed,
        }
    }

    pub fn with_model(mut self, model: Arc<dyn SimulationModel>) -> Self {
        self.model = model;
        self
    }

    pub fn default_iterations(&self) -> u32 {
        self.default_iterations
    }

    pub async fn run_stress_test_simulation(
        &self,
        user_id: Uuid,
        params: &StressTestParams,
    ) -> Result<ScenarioSimulationResult> {
        if params.iterations == 0 {
            return Err(PipelineError::InvalidParameter(
                "iterations must be a positive integer".to_string(),
            ));
        }
        for (name, value) in [
            ("rateVolatility", params.rate_volatility),
            ("propertyVolatility", params.property_volatility),
            ("incomeVolatility", params.income_volatility),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PipelineError::InvalidParameter(format!(
                    "{} must be a non-negative fraction",
                    name
                )));
            }
        }
        validate_scenario(&params.base_scenario)?;

        let seed = params.seed.or(self.seed).unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);
        let volatility = Volatility {
            rate: params.rate_volatility,
            property: params.property_volatility,
            income: params.income_volatility,
            horizon_months: params.time_horizon,
        };

        let mut payments = Vec::with_capacity(params.iterations as usize);
        let mut tds = Vec::with_capacity(params.iterations as usize);
        let mut passed = 0u32;
        for _ in 0..params.iterations {
            let scenario = self.model.perturb(&params.base_scenario, &volatility, &mut rng);
            let metrics = evaluate(&scenario);
            payments.push(metrics.monthly_payment);
            tds.push(metrics.tds_ratio);
            if metrics.qualifies {
                passed += 1;
            }
        }

        let result = ScenarioSimulationResult {
            simulation_id: Uuid::new_v4(),
            user_id,
            simulation_type: SimulationType::StressTest,
            iterations: params.iterations,
            seed: Some(seed),
            results: SimulationSummary {
                monthly_payment: summarize(&payments),
                tds_ratio: summarize(&tds),
                qualification_pass_rate: passed as f64 / params.iterations as f64,
                shocks: Vec::new(),
            },
            created_at: Utc::now(),
        };
        self.store.insert_simulation(&result).await?;

        info!(
            user_id = %user_id,
            simulation_id = %result.simulation_id,
            iterations = params.iterations,
            seed,
            model = self.model.name(),
            pass_rate = result.results.qualification_pass_rate,
            "Stress test complete"
        );

        Ok(result)
    }

    pub async fn run_rate_shock_simulation(
        &self,
        user_id: Uuid,
        base_scenario: &Scenario,
        shocks: &[RateShock],
    ) -> Result<ScenarioSimulationResult> {
        if shocks.is_empty() {
            return Err(PipelineError::InvalidParameter(
                "at least one shock scenario is required".to_string(),
            ));
        }
        validate_scenario(base_scenario)?;
        let base_payment = evaluate(base_scenario).monthly_payment;

        let mut outcomes = Vec::with_capacity(shocks.len());
        for shock in shocks {
            let scenario = apply_shock(base_scenario, shock);
            let metrics = evaluate(&scenario);
            debug!(shock = %shock.name, payment = metrics.monthly_payment, "Shock applied");
            outcomes.push(ShockOutcome {
                name: shock.name.clone(),
                monthly_payment_change: metrics.monthly_payment - base_payment,
                scenario,
                metrics,
            });
        }

        let payments: Vec<f64> = outcomes.iter().map(|o| o.metrics.monthly_payment).collect();
        let tds: Vec<f64> = outcomes.iter().map(|o| o.metrics.tds_ratio).collect();
        let passed = outcomes.iter().filter(|o| o.metrics.qualifies).count();

        let result = ScenarioSimulationResult {
            simulation_id: Uuid::new_v4(),
            user_id,
            simulation_type: SimulationType::RateShock,
            iterations: shocks.len() as u32,
            seed: None,
            results: SimulationSummary {
                monthly_payment: summarize(&payments),
                tds_ratio: summarize(&tds),
                qualification_pass_rate: passed as f64 / outcomes.len() as f64,
                shocks: outcomes,
            },
            created_at: Utc::now(),
        };
        self.store.insert_simulation(&result).await?;

        info!(
            user_id = %user_id,
            simulation_id = %result.simulation_id,
            shocks = shocks.len(),
            "Rate shock simulation complete"
        );

        Ok(result)
    }

    /// Stress test at the simulator's default iterations plus the standard shock set
    pub async fn run_comprehensive_stress_test(
        &self,
        user_id: Uuid,
        base_scenario: &Scenario,
    ) -> Result<Vec<ScenarioSimulationResult>> {
        let params = StressTestParams {
            base_scenario: base_scenario.clone(),
            iterations: self.default_iterations,
            rate_volatility: 0.15,
            property_volatility: 0.10,
            income_volatility: 0.05,
            time_horizon: 12,
            seed: None,
        };

        let stress = self.run_stress_test_simulation(user_id, &params).await?;
        let shocks = self
            .run_rate_shock_simulation(user_id, base_scenario, &standard_shocks())
            .await?;
        Ok(vec![stress, shocks])
    }

    pub async fn get_simulation(&self, simulation_id: Uuid) -> Result<ScenarioSimulationResult> {
        self.store
            .load_simulation(simulation_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("simulation {}", simulation_id)))
    }
}

pub fn standard_shocks() -> Vec<RateShock> {
    vec![
        RateShock::rate("+1% rate", 1.0),
        RateShock::rate("+2% rate", 2.0),
        RateShock::rate("+3% rate", 3.0),
        RateShock {
            name: "property -10%".to_string(),
            rate_delta: 0.0,
            property_delta: -0.10,
            income_delta: 0.0,
        },
        RateShock {
            name: "income -15%".to_string(),
            rate_delta: 0.0,
            property_delta: 0.0,
            income_delta: -0.15,
        },
        RateShock {
            name: "combined downturn".to_string(),
            rate_delta: 2.0,
            property_delta: -0.10,
            income_delta: -0.10,
        },
    ]
}

fn apply_shock(base: &Scenario, shock: &RateShock) -> Scenario {
    let mut scenario = base.clone();
    scenario.interest_rate = (base.interest_rate + shock.rate_delta).max(0.0);
    reprice_property(&mut scenario, (1.0 + shock.property_delta).max(0.0));
    scenario.annual_income = (base.annual_income * (1.0 + shock.income_delta)).max(0.0);
    scenario
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use tokio_test::{assert_err, assert_ok};

    fn scenario() -> Scenario {
        Scenario {
            home_price: 600_000.0,
            down_payment: 120_000.0,
            interest_rate: 5.5,
            amortization_years: 25,
            annual_income: 150_000.0,
            monthly_debts: 500.0,
            property_tax_monthly: 500.0,
            heating_monthly: 100.0,
            loan_balance: None,
        }
    }

    fn params(iterations: u32, seed: Option<u64>) -> StressTestParams {
        StressTestParams {
            base_scenario: scenario(),
            iterations,
            rate_volatility: 0.2,
            property_volatility: 0.1,
            income_volatility: 0.05,
            time_horizon: 12,
            seed,
        }
    }

    fn simulator() -> ScenarioSimulator {
        ScenarioSimulator::new(Arc::new(InMemoryStore::new()), 500, None)
    }

    #[tokio::test]
    async fn test_stress_test_is_reproducible() {
        let sim = simulator();
        let user = Uuid::new_v4();
        let a = sim.run_stress_test_simulation(user, &params(250, Some(7))).await.unwrap();
        let b = sim.run_stress_test_simulation(user, &params(250, Some(7))).await.unwrap();

        assert_eq!(a.iterations, 250);
        assert_eq!(a.seed, Some(7));
        assert_eq!(a.results, b.results);
        assert_ne!(a.simulation_id, b.simulation_id);
        assert!((0.0..=1.0).contains(&a.results.qualification_pass_rate));
        assert!(a.results.monthly_payment.p5 <= a.results.monthly_payment.p95);
    }

    #[tokio::test]
    async fn test_configured_seed_used_when_params_unseeded() {
        let sim = ScenarioSimulator::new(Arc::new(InMemoryStore::new()), 100, Some(99));
        let result = sim
            .run_stress_test_simulation(Uuid::new_v4(), &params(10, None))
            .await
            .unwrap();
        assert_eq!(result.seed, Some(99));
    }

    #[tokio::test]
    async fn test_stress_test_rejects_bad_params() {
        let sim = simulator();
        assert_err!(sim.run_stress_test_simulation(Uuid::new_v4(), &params(0, None)).await);

        let mut negative = params(10, None);
        negative.rate_volatility = -0.1;
        assert_err!(sim.run_stress_test_simulation(Uuid::new_v4(), &negative).await);
    }

    #[tokio::test]
    async fn test_rate_shocks_are_deterministic() {
        let sim = simulator();
        let user = Uuid::new_v4();
        let shocks = vec![RateShock::rate("+2% rate", 2.0), RateShock::rate("-1% rate", -1.0)];

        let result = sim.run_rate_shock_simulation(user, &scenario(), &shocks).await.unwrap();
        assert_eq!(result.simulation_type, SimulationType::RateShock);
        assert_eq!(result.iterations, 2);
        assert_eq!(result.results.shocks.len(), 2);
        assert!(result.results.shocks[0].monthly_payment_change > 0.0);
        assert!(result.results.shocks[1].monthly_payment_change < 0.0);
        assert_eq!(result.results.shocks[0].scenario.interest_rate, 7.5);

        let again = sim.run_rate_shock_simulation(user, &scenario(), &shocks).await.unwrap();
        assert_eq!(result.results, again.results);
    }

    #[tokio::test]
    async fn test_empty_shocks_rejected() {
        let result = simulator()
            .run_rate_shock_simulation(Uuid::new_v4(), &scenario(), &[])
            .await;
        assert!(matches!(result, Err(PipelineError::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn test_comprehensive_stress_test_persists_both() {
        let sim = simulator();
        let results = sim
            .run_comprehensive_stress_test(Uuid::new_v4(), &scenario())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].iterations, 500);
        assert_eq!(results[1].results.shocks.len(), standard_shocks().len());

        for result in &results {
            let stored = assert_ok!(sim.get_simulation(result.simulation_id).await);
            assert_eq!(&stored, result);
        }
    }

    #[tokio::test]
    async fn test_unknown_simulation() {
        let result = simulator().get_simulation(Uuid::new_v4()).await;
        assert!(matches!(result, Err(PipelineError::NotFound(_))));
    }
}
