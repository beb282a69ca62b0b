//! Prescriptive analytics
//!
//! What-if analysis applies each modification to its own copy of the base
//! scenario. Optimal recommendations search a small grid of levers and keep
//! the Pareto front over (monthly payment, total interest, upfront cost).

use crate::affordability::{evaluate, validate_scenario};
use crate::completion::{enrich_rationale, CompletionService};
use crate::error::PipelineError;
use crate::models::{
    AffordabilityMetrics, Modification, Recommendation, Scenario, ScenarioParameter,
    WhatIfAnalysis, WhatIfResult,
};
use crate::store::PredictiveStore;
use crate::Result;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Recommendations beyond this rank get template rationale only
const ENRICHED_RECOMMENDATIONS: usize = 3;

/// Cost of one discount point as a fraction of the loan
const POINT_COST: f64 = 0.01;
/// Rate reduction bought by one point, in percentage points
const POINT_RATE_REDUCTION: f64 = 0.25;

#[derive(Clone)]
pub struct PrescriptiveAgent {
    store: Arc<dyn PredictiveStore>,
    completion: Arc<dyn CompletionService>,
    model: String,
}

impl PrescriptiveAgent {
    pub fn new(
        store: Arc<dyn PredictiveStore>,
        completion: Arc<dyn CompletionService>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            completion,
            model: model.into(),
        }
    }

    pub async fn analyze_what_if_scenarios(
        &self,
        user_id: Uuid,
        base_scenario: &Scenario,
        modifications: &[Modification],
    ) -> Result<WhatIfAnalysis> {
        validate_scenario(base_scenario)?;
        let base_metrics = evaluate(base_scenario);

        let mut results = Vec::with_capacity(modifications.len());
        for modification in modifications {
            let scenario = apply_modification(base_scenario, modification)?;
            validate_scenario(&scenario)?;
            let metrics = evaluate(&scenario);

            results.push(WhatIfResult {
                modification: modification.clone(),
                monthly_payment_change: metrics.monthly_payment - base_metrics.monthly_payment,
                total_interest_change: metrics.total_interest - base_metrics.total_interest,
                improvement_score: improvement_score(&base_metrics, &metrics),
                scenario,
                metrics,
            });
        }

        let mut improving: Vec<&WhatIfResult> =
            results.iter().filter(|r| r.improvement_score > 0.0).collect();
        improving.sort_by(|a, b| {
            b.improvement_score
                .partial_cmp(&a.improvement_score)
                .unwrap_or(Ordering::Equal)
        });

        let mut recommendations = Vec::with_capacity(improving.len());
        for (rank, result) in improving.into_iter().enumerate() {
            let upfront_cost = match result.modification.parameter {
                ScenarioParameter::DownPayment => {
                    (result.scenario.down_payment - base_scenario.down_payment).max(0.0)
                }
                _ => 0.0,
            };
            let mut recommendation = Recommendation {
                title: describe(&result.modification),
                modifications: vec![result.modification.clone()],
                metrics: result.metrics.clone(),
                monthly_savings: -result.monthly_payment_change,
                interest_savings: -result.total_interest_change,
                upfront_cost,
                rationale: String::new(),
            };
            recommendation.rationale = self.rationale(&recommendation, rank).await;
            recommendations.push(recommendation);
        }

        info!(
            user_id = %user_id,
            modifications = results.len(),
            recommendations = recommendations.len(),
            "What-if analysis complete"
        );

        Ok(WhatIfAnalysis {
            user_id,
            base_scenario: base_scenario.clone(),
            base_metrics,
            modifications: results,
            recommendations,
        })
    }

    /// Search common levers against the user's current mortgage and return
    /// the non-dominated options, largest monthly savings first
    pub async fn generate_optimal_recommendations(&self, user_id: Uuid) -> Result<Vec<Recommendation>> {
        let mortgage = self
            .store
            .load_mortgage(user_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("mortgage for user {}", user_id)))?;
        let base = Scenario::from_snapshot(&mortgage);
        validate_scenario(&base)?;
        let base_metrics = evaluate(&base);

        let candidates: Vec<(Candidate, AffordabilityMetrics)> = lever_grid(&base)
            .into_iter()
            .filter_map(|candidate| {
                let scenario = candidate.scenario(&base).ok()?;
                validate_scenario(&scenario).ok()?;
                let metrics = evaluate(&scenario);
                Some((candidate, metrics))
            })
            .collect();

        let base_point = [base_metrics.monthly_payment, base_metrics.total_interest, 0.0];
        let points: Vec<[f64; 3]> = candidates
            .iter()
            .map(|(c, m)| [m.monthly_payment, m.total_interest, c.upfront_cost])
            .collect();

        let mut front = Vec::new();
        for (i, (candidate, metrics)) in candidates.iter().enumerate() {
            let dominated = dominates(&base_point, &points[i])
                || points
                    .iter()
                    .enumerate()
                    .any(|(j, other)| j != i && dominates(other, &points[i]));
            if !dominated {
                front.push(Recommendation {
                    title: candidate.title.clone(),
                    modifications: candidate.modifications.clone(),
                    metrics: metrics.clone(),
                    monthly_savings: base_metrics.monthly_payment - metrics.monthly_payment,
                    interest_savings: base_metrics.total_interest - metrics.total_interest,
                    upfront_cost: candidate.upfront_cost,
                    rationale: String::new(),
                });
            }
        }

        front.sort_by(|a, b| {
            b.monthly_savings
                .partial_cmp(&a.monthly_savings)
                .unwrap_or(Ordering::Equal)
        });
        for (rank, recommendation) in front.iter_mut().enumerate() {
            recommendation.rationale = self.rationale(recommendation, rank).await;
        }

        debug!(
            user_id = %user_id,
            searched = candidates.len(),
            front = front.len(),
            "Optimal recommendations generated"
        );

        Ok(front)
    }

    async fn rationale(&self, recommendation: &Recommendation, rank: usize) -> String {
        let fallback = template_rationale(recommendation);
        if rank >= ENRICHED_RECOMMENDATIONS {
            return fallback;
        }

        let prompt = format!(
            "Recommendation: {}\nMonthly savings: {:.2}\nLifetime interest savings: {:.2}\nUpfront cost: {:.2}\nQualifies: {}",
            recommendation.title,
            recommendation.monthly_savings,
            recommendation.interest_savings,
            recommendation.upfront_cost,
            recommendation.metrics.qualifies
        );
        enrich_rationale(self.completion.as_ref(), &self.model, &prompt, fallback)
            .await
            .text
    }
}

fn apply_modification(base: &Scenario, modification: &Modification) -> Result<Scenario> {
    let value = modification.new_value;
    if !value.is_finite() || value < 0.0 {
        return Err(PipelineError::InvalidParameter(format!(
            "{:?} must be a non-negative number",
            modification.parameter
        )));
    }

    let mut scenario = base.clone();
    match modification.parameter {
        ScenarioParameter::InterestRate => scenario.interest_rate = value,
        ScenarioParameter::DownPayment => {
            scenario.down_payment = value;
            scenario.loan_balance = None;
        }
        ScenarioParameter::AmortizationYears => scenario.amortization_years = value.round() as u32,
        ScenarioParameter::HomePrice => {
            scenario.home_price = value;
            scenario.loan_balance = None;
        }
        ScenarioParameter::AnnualIncome => scenario.annual_income = value,
        ScenarioParameter::MonthlyDebts => scenario.monthly_debts = value,
    }
    Ok(scenario)
}

/// Relative payment reduction plus half the relative interest reduction,
/// nudged by a change in qualification
fn improvement_score(base: &AffordabilityMetrics, candidate: &AffordabilityMetrics) -> f64 {
    let relative = |before: f64, after: f64| {
        if before > 0.0 {
            (before - after) / before
        } else {
            0.0
        }
    };

    let mut score = relative(base.monthly_payment, candidate.monthly_payment)
        + 0.5 * relative(base.total_interest, candidate.total_interest);
    match (base.qualifies, candidate.qualifies) {
        (false, true) => score += 0.25,
        (true, false) => score -= 0.25,
        _ => {}
    }
    score
}

fn describe(modification: &Modification) -> String {
    let v = modification.new_value;
    match modification.parameter {
        ScenarioParameter::InterestRate => format!("Secure a {:.2}% rate", v),
        ScenarioParameter::DownPayment => format!("Put {:.0} down", v),
        ScenarioParameter::AmortizationYears => format!("Amortize over {:.0} years", v),
        ScenarioParameter::HomePrice => format!("Target a {:.0} home price", v),
        ScenarioParameter::AnnualIncome => format!("Qualify on {:.0} annual income", v),
        ScenarioParameter::MonthlyDebts => format!("Reduce monthly debts to {:.0}", v),
    }
}

fn template_rationale(recommendation: &Recommendation) -> String {
    let mut text = format!(
        "{} changes the monthly payment by {:.2} and lifetime interest by {:.2}.",
        recommendation.title, -recommendation.monthly_savings, -recommendation.interest_savings
    );
    if recommendation.upfront_cost > 0.0 {
        text.push_str(&format!(" It requires {:.2} upfront.", recommendation.upfront_cost));
    }
    if !recommendation.metrics.qualifies {
        text.push_str(" The result does not meet GDS/TDS limits at the qualifying rate.");
    }
    text
}

struct Candidate {
    title: String,
    modifications: Vec<Modification>,
    upfront_cost: f64,
}

impl Candidate {
    fn scenario(&self, base: &Scenario) -> Result<Scenario> {
        self.modifications
            .iter()
            .try_fold(base.clone(), |scenario, m| apply_modification(&scenario, m))
    }
}

fn lever_grid(base: &Scenario) -> Vec<Candidate> {
    let mut grid = Vec::new();
    let loan = base.loan_amount();

    for share in [0.05, 0.10, 0.20] {
        let extra = base.home_price * share;
        let down = (base.down_payment + extra).min(base.home_price);
        if down <= base.down_payment {
            continue;
        }
        grid.push(Candidate {
            title: format!("Add {:.0}% of the home price to the down payment", share * 100.0),
            modifications: vec![Modification {
                parameter: ScenarioParameter::DownPayment,
                new_value: down,
            }],
            upfront_cost: down - base.down_payment,
        });
    }

    for years in [15u32, 20, 25, 30] {
        if years == base.amortization_years {
            continue;
        }
        grid.push(Candidate {
            title: format!("Switch to a {}-year amortization", years),
            modifications: vec![Modification {
                parameter: ScenarioParameter::AmortizationYears,
                new_value: years as f64,
            }],
            upfront_cost: 0.0,
        });
    }

    for reduction in [0.25, 0.5, 1.0] {
        let rate = base.interest_rate - reduction;
        if rate <= 0.0 {
            continue;
        }
        let points = reduction / POINT_RATE_REDUCTION;
        grid.push(Candidate {
            title: format!("Buy down the rate by {:.2} points to {:.2}%", reduction, rate),
            modifications: vec![Modification {
                parameter: ScenarioParameter::InterestRate,
                new_value: rate,
            }],
            upfront_cost: loan * POINT_COST * points,
        });
    }

    grid
}

/// `a` is no worse than `b` everywhere and strictly better somewhere (lower is better)
fn dominates(a: &[f64; 3], b: &[f64; 3]) -> bool {
    a.iter().zip(b).all(|(x, y)| x <= y) && a.iter().zip(b).any(|(x, y)| x < y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::tests::StaticCompletion;
    use crate::completion::DisabledCompletion;
    use crate::store::InMemoryStore;
    use crate::testing::snapshot;

    fn base() -> Scenario {
        Scenario {
            home_price: 600_000.0,
            down_payment: 120_000.0,
            interest_rate: 6.0,
            amortization_years: 25,
            annual_income: 150_000.0,
            monthly_debts: 500.0,
            property_tax_monthly: 500.0,
            heating_monthly: 100.0,
            loan_balance: None,
        }
    }

    fn agent(completion: Arc<dyn CompletionService>) -> (PrescriptiveAgent, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (PrescriptiveAgent::new(store.clone(), completion, "test-model"), store)
    }

    #[tokio::test]
    async fn test_modifications_are_independent() {
        let (agent, _) = agent(Arc::new(DisabledCompletion));
        let modifications = vec![
            Modification { parameter: ScenarioParameter::InterestRate, new_value: 4.5 },
            Modification { parameter: ScenarioParameter::DownPayment, new_value: 150_000.0 },
        ];

        let analysis = agent
            .analyze_what_if_scenarios(Uuid::new_v4(), &base(), &modifications)
            .await
            .unwrap();

        assert_eq!(analysis.modifications.len(), 2);
        let rate = &analysis.modifications[0];
        assert_eq!(rate.scenario.interest_rate, 4.5);
        assert_eq!(rate.scenario.down_payment, 120_000.0);
        let down = &analysis.modifications[1];
        assert_eq!(down.scenario.down_payment, 150_000.0);
        assert_eq!(down.scenario.interest_rate, 6.0);

        assert!(rate.monthly_payment_change < 0.0);
        assert!(down.monthly_payment_change < 0.0);
        assert_eq!(analysis.recommendations.len(), 2);
        assert!(analysis.recommendations[0].rationale.contains("changes the monthly payment"));
    }

    #[tokio::test]
    async fn test_worse_modifications_not_recommended() {
        let (agent, _) = agent(Arc::new(DisabledCompletion));
        let modifications = vec![Modification {
            parameter: ScenarioParameter::InterestRate,
            new_value: 8.0,
        }];
        let analysis = agent
            .analyze_what_if_scenarios(Uuid::new_v4(), &base(), &modifications)
            .await
            .unwrap();
        assert_eq!(analysis.modifications.len(), 1);
        assert!(analysis.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_modification_rejected() {
        let (agent, _) = agent(Arc::new(DisabledCompletion));
        let modifications = vec![Modification {
            parameter: ScenarioParameter::AmortizationYears,
            new_value: 0.0,
        }];
        let result = agent
            .analyze_what_if_scenarios(Uuid::new_v4(), &base(), &modifications)
            .await;
        assert!(matches!(result, Err(PipelineError::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn test_optimal_recommendations_are_non_dominated() {
        let (agent, store) = agent(Arc::new(DisabledCompletion));
        let mortgage = snapshot("CA", 6.5);
        store.upsert_mortgage(&mortgage).await.unwrap();

        let recommendations = agent
            .generate_optimal_recommendations(mortgage.user_id)
            .await
            .unwrap();
        assert!(!recommendations.is_empty());

        let point = |r: &Recommendation| {
            [r.metrics.monthly_payment, r.metrics.total_interest, r.upfront_cost]
        };
        for a in &recommendations {
            for b in &recommendations {
                assert!(!dominates(&point(a), &point(b)));
            }
            assert!(!a.rationale.is_empty());
        }
        assert!(recommendations
            .windows(2)
            .all(|w| w[0].monthly_savings >= w[1].monthly_savings));
    }

    #[tokio::test]
    async fn test_rationale_enriched_when_available() {
        let completion = StaticCompletion(
            r#"{"summary": "A lower rate cuts the payment.", "keyFactors": ["rate"]}"#.to_string(),
        );
        let (agent, _) = agent(Arc::new(completion));
        let modifications = vec![Modification {
            parameter: ScenarioParameter::InterestRate,
            new_value: 5.0,
        }];
        let analysis = agent
            .analyze_what_if_scenarios(Uuid::new_v4(), &base(), &modifications)
            .await
            .unwrap();
        assert_eq!(
            analysis.recommendations[0].rationale,
            "A lower rate cuts the payment. Key factors: rate."
        );
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let (agent, _) = agent(Arc::new(DisabledCompletion));
        let result = agent.generate_optimal_recommendations(Uuid::new_v4()).await;
        assert!(matches!(result, Err(PipelineError::NotFound(_))));
    }

    #[test]
    fn test_dominates() {
        assert!(dominates(&[1.0, 1.0, 0.0], &[1.0, 2.0, 0.0]));
        assert!(!dominates(&[1.0, 1.0, 0.0], &[1.0, 1.0, 0.0]));
        assert!(!dominates(&[1.0, 3.0, 0.0], &[2.0, 2.0, 0.0]));
    }
}
