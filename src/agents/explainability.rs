//! Explainability and model compliance
//!
//! Attributions are computed against a linear surrogate per model type.
//! SHAP contributions are signed and sum to `predicted - base`; LIME
//! contributions come from a locally weighted fit and are normalized so their
//! absolute values sum to one.

use crate::audit::{AuditLog, AuditSubject};
use crate::compliance::{
    assess_bias, classification_metrics, create_default_compliance_engine, fairness_metrics,
    ComplianceContext, ComplianceEngine,
};
use crate::completion::{enrich_rationale, CompletionService};
use crate::error::PipelineError;
use crate::models::{
    ComplianceReport, Explanation, ExplanationMethod, Forecast, ModelType, Series, TestRecord,
};
use crate::store::PredictiveStore;
use crate::Result;
use chrono::{Months, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub const UNEXPLAINED: &str = "unexplained";

const LIME_SAMPLES: usize = 200;

/// (feature, baseline value, weight)
type SurrogateTerm = (&'static str, f64, f64);

struct Surrogate {
    base: f64,
    terms: &'static [SurrogateTerm],
}

const MORTGAGE_RATE_TERMS: &[SurrogateTerm] = &[
    ("current_rate", 6.0, 0.8),
    ("rate_trend", 0.0, 6.0),
    ("market_index_change", 0.0, -2.0),
    ("income_growth", 0.0, 1.5),
];

const PROPERTY_VALUE_TERMS: &[SurrogateTerm] = &[
    ("current_value", 500_000.0, 1.0),
    ("appreciation_trend", 0.0, 2_000_000.0),
    ("mortgage_rate", 6.0, -15_000.0),
    ("income_growth", 0.0, 200_000.0),
];

const REFINANCE_TERMS: &[SurrogateTerm] = &[
    ("rate_differential", 0.0, 0.3),
    ("credit_score", 700.0, 0.001),
    ("loan_to_value", 0.8, -0.5),
    ("debt_to_income", 0.35, -0.6),
];

fn surrogate(model_type: ModelType) -> Surrogate {
    match model_type {
        ModelType::MortgageRate => Surrogate { base: 6.0, terms: MORTGAGE_RATE_TERMS },
        ModelType::PropertyValue => Surrogate { base: 500_000.0, terms: PROPERTY_VALUE_TERMS },
        ModelType::RefinanceProbability => Surrogate { base: 0.4, terms: REFINANCE_TERMS },
    }
}

impl Surrogate {
    fn value_of(&self, features: &BTreeMap<String, f64>, name: &str, baseline: f64) -> f64 {
        features
            .get(name)
            .copied()
            .filter(|v| v.is_finite())
            .unwrap_or(baseline)
    }

    fn predict(&self, features: &BTreeMap<String, f64>) -> f64 {
        self.base
            + self
                .terms
                .iter()
                .map(|(name, baseline, weight)| weight * (self.value_of(features, name, *baseline) - baseline))
                .sum::<f64>()
    }

    fn predict_point(&self, point: &[f64]) -> f64 {
        self.base
            + self
                .terms
                .iter()
                .zip(point)
                .map(|((_, baseline, weight), x)| weight * (x - baseline))
                .sum::<f64>()
    }
}

#[derive(Clone)]
pub struct ExplainabilityAgent {
    store: Arc<dyn PredictiveStore>,
    completion: Arc<dyn CompletionService>,
    model: String,
    audit: Arc<AuditLog>,
    rules: Arc<ComplianceEngine>,
}

impl ExplainabilityAgent {
    pub fn new(
        store: Arc<dyn PredictiveStore>,
        completion: Arc<dyn CompletionService>,
        model: impl Into<String>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            store,
            completion,
            model: model.into(),
            audit,
            rules: Arc::new(create_default_compliance_engine()),
        }
    }

    pub fn with_rules(mut self, rules: ComplianceEngine) -> Self {
        self.rules = Arc::new(rules);
        self
    }

    /// Predicted value to explain: the stored forecast, or the surrogate's own
    /// output for refinance scoring which has no stored forecast
    async fn predicted_value(
        &self,
        forecast_id: Uuid,
        features: &BTreeMap<String, f64>,
        model_type: ModelType,
    ) -> Result<f64> {
        match self.store.load_forecast(forecast_id).await? {
            Some(forecast) => Ok(forecast.predicted_value),
            None if model_type == ModelType::RefinanceProbability => {
                Ok(surrogate(model_type).predict(features))
            }
            None => Err(PipelineError::NotFound(format!("forecast {}", forecast_id))),
        }
    }

    pub async fn generate_shap_explanation(
        &self,
        forecast_id: Uuid,
        input_features: &BTreeMap<String, f64>,
        model_type: ModelType,
    ) -> Result<Explanation> {
        if let Some(existing) = self
            .store
            .find_explanation(forecast_id, ExplanationMethod::Shap)
            .await?
        {
            return Ok(existing);
        }
        let predicted_value = self.predicted_value(forecast_id, input_features, model_type).await?;
        let model = surrogate(model_type);

        let mut contributions: BTreeMap<String, f64> = input_features
            .keys()
            .map(|name| (name.clone(), 0.0))
            .collect();
        for (name, baseline, weight) in model.terms {
            let x = model.value_of(input_features, name, *baseline);
            contributions.insert(name.to_string(), weight * (x - baseline));
        }

        let explained: f64 = contributions.values().sum();
        let residual = predicted_value - model.base - explained;
        if residual.abs() > 1e-9 {
            contributions.insert(UNEXPLAINED.to_string(), residual);
        }

        self.finish(
            forecast_id,
            ExplanationMethod::Shap,
            model_type,
            contributions,
            model.base,
            predicted_value,
        )
        .await
    }

    pub async fn generate_lime_explanation(
        &self,
        forecast_id: Uuid,
        input_features: &BTreeMap<String, f64>,
        model_type: ModelType,
    ) -> Result<Explanation> {
        if let Some(existing) = self
            .store
            .find_explanation(forecast_id, ExplanationMethod::Lime)
            .await?
        {
            return Ok(existing);
        }
        let predicted_value = self.predicted_value(forecast_id, input_features, model_type).await?;
        let model = surrogate(model_type);

        let origin: Vec<f64> = model
            .terms
            .iter()
            .map(|(name, baseline, _)| model.value_of(input_features, name, *baseline))
            .collect();
        let scales: Vec<f64> = origin
            .iter()
            .zip(model.terms)
            .map(|(x, (_, baseline, _))| 0.1 * x.abs().max(baseline.abs()).max(0.01))
            .collect();

        // Seeded from the forecast id so repeated explanations agree
        let mut rng = StdRng::seed_from_u64(forecast_id.as_u64_pair().0);
        let width = 0.75 * (origin.len() as f64).sqrt();

        let mut samples: Vec<(Vec<f64>, f64, f64)> = Vec::with_capacity(LIME_SAMPLES);
        for _ in 0..LIME_SAMPLES {
            let mut distance = 0.0;
            let point: Vec<f64> = origin
                .iter()
                .zip(&scales)
                .map(|(x, scale)| {
                    let z = Normal::new(0.0, 1.0).map(|n| n.sample(&mut rng)).unwrap_or(0.0);
                    distance += z * z;
                    x + z * scale
                })
                .collect();
            let kernel = (-distance / (width * width)).exp();
            let y = model.predict_point(&point);
            samples.push((point, y, kernel));
        }

        let total_weight: f64 = samples.iter().map(|(_, _, w)| w).sum();
        let mean_y = samples.iter().map(|(_, y, w)| y * w).sum::<f64>() / total_weight;

        let mut contributions: BTreeMap<String, f64> = input_features
            .keys()
            .map(|name| (name.clone(), 0.0))
            .collect();
        for (j, (name, baseline, _)) in model.terms.iter().enumerate() {
            let mean_x = samples.iter().map(|(p, _, w)| p[j] * w).sum::<f64>() / total_weight;
            let (cov, var) = samples.iter().fold((0.0, 0.0), |(cov, var), (p, y, w)| {
                let dx = p[j] - mean_x;
                (cov + w * dx * (y - mean_y), var + w * dx * dx)
            });
            let slope = if var > 0.0 { cov / var } else { 0.0 };
            contributions.insert(name.to_string(), slope * (origin[j] - baseline));
        }

        let norm: f64 = contributions.values().map(|c| c.abs()).sum();
        if norm > 0.0 {
            for c in contributions.values_mut() {
                *c /= norm;
            }
        }

        self.finish(
            forecast_id,
            ExplanationMethod::Lime,
            model_type,
            contributions,
            model.base,
            predicted_value,
        )
        .await
    }

    async fn finish(
        &self,
        forecast_id: Uuid,
        method: ExplanationMethod,
        model_type: ModelType,
        contributions: BTreeMap<String, f64>,
        base_value: f64,
        predicted_value: f64,
    ) -> Result<Explanation> {
        let mut ranked: Vec<(&String, &f64)> = contributions.iter().collect();
        ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        let top: Vec<String> = ranked
            .iter()
            .take(3)
            .filter(|(_, v)| v.abs() > 0.0)
            .map(|(k, v)| format!("{} ({:+.3})", k, v))
            .collect();

        let fallback = if top.is_empty() {
            format!(
                "The prediction of {:.3} matches the baseline of {:.3}.",
                predicted_value, base_value
            )
        } else {
            format!(
                "The prediction of {:.3} differs from the baseline of {:.3} mainly because of {}.",
                predicted_value,
                base_value,
                top.join(", ")
            )
        };
        let prompt = format!(
            "Model: {:?}\nMethod: {:?}\nBaseline: {:.4}\nPrediction: {:.4}\nTop contributions: {}",
            model_type,
            method,
            base_value,
            predicted_value,
            top.join(", ")
        );
        let rationale = enrich_rationale(self.completion.as_ref(), &self.model, &prompt, fallback).await;

        let explanation = Explanation {
            id: Uuid::new_v4(),
            forecast_id,
            explanation_type: method,
            model_type,
            feature_contributions: contributions,
            base_value,
            predicted_value,
            rationale: rationale.text,
            created_at: Utc::now(),
        };
        // A concurrent call may have stored one first
        let explanation = self.store.insert_explanation(&explanation).await?;

        debug!(
            explanation_id = %explanation.id,
            forecast_id = %forecast_id,
            method = ?method,
            generated_rationale = rationale.generated,
            "Explanation generated"
        );

        Ok(explanation)
    }

    pub async fn get_explanation(&self, id: Uuid) -> Result<Explanation> {
        self.store
            .load_explanation(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("explanation {}", id)))
    }

    /// Surrogate inputs for a stored forecast, derived from the trailing year of history
    pub async fn derive_forecast_features(&self, forecast: &Forecast) -> Result<BTreeMap<String, f64>> {
        let end = forecast.generated_at.date_naive();
        let start = end.checked_sub_months(Months::new(12)).unwrap_or(end);

        let mut window = BTreeMap::new();
        for series in Series::ALL {
            let values: Vec<f64> = self
                .store
                .historical_range(series, &forecast.region, start, end)
                .await?
                .into_iter()
                .map(|p| p.value)
                .collect();
            window.insert(series, values);
        }

        let last = |s: Series| window.get(&s).and_then(|v| v.last().copied());
        let growth = |s: Series| {
            window.get(&s).and_then(|v| match (v.first(), v.last()) {
                (Some(first), Some(last)) if *first > 0.0 => Some(last / first - 1.0),
                _ => None,
            })
        };
        let per_step = |s: Series| {
            window.get(&s).and_then(|v| match (v.first(), v.last()) {
                (Some(first), Some(last)) if v.len() > 1 => Some((last - first) / (v.len() - 1) as f64),
                _ => None,
            })
        };

        let mut features = BTreeMap::new();
        let mut put = |name: &str, value: Option<f64>| {
            if let Some(v) = value {
                features.insert(name.to_string(), v);
            }
        };

        match ModelType::for_series(forecast.series) {
            ModelType::PropertyValue => {
                let current = last(Series::PropertyValue);
                put("current_value", current);
                put(
                    "appreciation_trend",
                    per_step(Series::PropertyValue)
                        .zip(current)
                        .filter(|(_, c)| *c > 0.0)
                        .map(|(step, c)| step / c),
                );
                put("mortgage_rate", last(Series::MortgageRate));
                put("income_growth", growth(Series::Income));
            }
            _ => {
                put("current_rate", last(Series::MortgageRate));
                put("rate_trend", per_step(Series::MortgageRate));
                put("market_index_change", growth(Series::MarketIndex));
                put("income_growth", growth(Series::Income));
            }
        }

        Ok(features)
    }

    pub async fn generate_compliance_report(
        &self,
        model_type: ModelType,
        model_version: &str,
        test_data: &[TestRecord],
    ) -> Result<ComplianceReport> {
        if test_data.is_empty() {
            return Err(PipelineError::InsufficientData(
                "compliance report requires at least one test record".to_string(),
            ));
        }

        let metrics = classification_metrics(test_data);
        let fairness = fairness_metrics(test_data);
        let bias_assessment = assess_bias(&fairness);
        let checks = self.rules.evaluate(&ComplianceContext {
            metrics: &metrics,
            fairness: &fairness,
        });

        let mut report = ComplianceReport {
            id: Uuid::new_v4(),
            model_type,
            model_version: model_version.to_string(),
            compliant: checks.iter().all(|c| c.passed),
            metrics,
            bias_assessment,
            fairness_metrics: fairness,
            regulatory_compliance: checks,
            audit_id: Uuid::nil(),
            generated_at: Utc::now(),
        };

        // The audited payload is the report as computed, before it carries its own audit id
        report.audit_id = self.audit.record(AuditSubject::ComplianceReport, &report).await?;

        info!(
            report_id = %report.id,
            model_type = ?model_type,
            model_version,
            compliant = report.compliant,
            bias = ?report.bias_assessment.level,
            "Compliance report generated"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ForecastingAgent;
    use crate::completion::DisabledCompletion;
    use crate::models::BiasLevel;
    use crate::store::InMemoryStore;
    use crate::testing::seeded_store;
    use approx::assert_relative_eq;

    async fn setup() -> (ExplainabilityAgent, Arc<InMemoryStore>, Arc<AuditLog>) {
        let store = seeded_store(&["CA"]).await;
        let audit = Arc::new(AuditLog::new());
        let agent = ExplainabilityAgent::new(
            store.clone(),
            Arc::new(DisabledCompletion),
            "test-model",
            audit.clone(),
        );
        (agent, store, audit)
    }

    async fn rate_forecast(store: Arc<InMemoryStore>) -> Forecast {
        ForecastingAgent::new(store)
            .forecast_mortgage_rates("CA", 6)
            .await
            .unwrap()
            .remove(5)
    }

    #[tokio::test]
    async fn test_shap_contributions_sum_to_deviation() {
        let (agent, store, _) = setup().await;
        let forecast = rate_forecast(store).await;
        let features = agent.derive_forecast_features(&forecast).await.unwrap();
        assert!(features.contains_key("current_rate"));

        let explanation = agent
            .generate_shap_explanation(forecast.id, &features, ModelType::MortgageRate)
            .await
            .unwrap();

        let total: f64 = explanation.feature_contributions.values().sum();
        assert_relative_eq!(
            total,
            explanation.predicted_value - explanation.base_value,
            epsilon = 1e-9
        );
        assert_eq!(explanation.explanation_type, ExplanationMethod::Shap);
        assert!(!explanation.rationale.is_empty());

        let stored = agent.get_explanation(explanation.id).await.unwrap();
        assert_eq!(stored, explanation);
    }

    #[tokio::test]
    async fn test_lime_contributions_normalized() {
        let (agent, store, _) = setup().await;
        let forecast = rate_forecast(store).await;
        let features = BTreeMap::from([
            ("current_rate".to_string(), 7.2),
            ("rate_trend".to_string(), -0.05),
            ("market_index_change".to_string(), 0.04),
            ("income_growth".to_string(), 0.02),
        ]);

        let a = agent
            .generate_lime_explanation(forecast.id, &features, ModelType::MortgageRate)
            .await
            .unwrap();
        let b = agent
            .generate_lime_explanation(forecast.id, &features, ModelType::MortgageRate)
            .await
            .unwrap();

        let abs_sum: f64 = a.feature_contributions.values().map(|c| c.abs()).sum();
        assert_relative_eq!(abs_sum, 1.0, epsilon = 1e-9);
        assert_eq!(a.feature_contributions, b.feature_contributions);
        assert!(a.feature_contributions["current_rate"] > 0.0);
    }

    #[tokio::test]
    async fn test_one_explanation_per_forecast_and_method() {
        let (agent, store, _) = setup().await;
        let forecast = rate_forecast(store.clone()).await;
        let features = agent.derive_forecast_features(&forecast).await.unwrap();

        let first = agent
            .generate_shap_explanation(forecast.id, &features, ModelType::MortgageRate)
            .await
            .unwrap();
        let mut shifted = features.clone();
        shifted.insert("current_rate".to_string(), 9.0);
        let second = agent
            .generate_shap_explanation(forecast.id, &shifted, ModelType::MortgageRate)
            .await
            .unwrap();
        let lime = agent
            .generate_lime_explanation(forecast.id, &features, ModelType::MortgageRate)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first, second);
        assert_ne!(first.id, lime.id);
        let stored = store
            .find_explanation(forecast.id, ExplanationMethod::Shap)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, first.id);
    }

    #[tokio::test]
    async fn test_unknown_features_contribute_nothing() {
        let (agent, _, _) = setup().await;
        let features = BTreeMap::from([
            ("rate_differential".to_string(), 1.5),
            ("shoe_size".to_string(), 44.0),
        ]);
        let explanation = agent
            .generate_shap_explanation(Uuid::new_v4(), &features, ModelType::RefinanceProbability)
            .await
            .unwrap();
        assert_eq!(explanation.feature_contributions["shoe_size"], 0.0);
        assert_relative_eq!(explanation.feature_contributions["rate_differential"], 0.45);
        assert!(!explanation.feature_contributions.contains_key(UNEXPLAINED));
    }

    #[tokio::test]
    async fn test_missing_forecast_is_not_found() {
        let (agent, _, _) = setup().await;
        let result = agent
            .generate_shap_explanation(Uuid::new_v4(), &BTreeMap::new(), ModelType::MortgageRate)
            .await;
        assert!(matches!(result, Err(PipelineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_compliance_report_is_audited() {
        let (agent, _, audit) = setup().await;
        let mut records = Vec::new();
        for i in 0..40 {
            let group = if i < 20 { "urban" } else { "rural" };
            records.push(TestRecord {
                predicted: i % 4 != 3,
                actual: i % 4 != 3,
                sensitive_attributes: BTreeMap::from([("area".to_string(), group.to_string())]),
            });
        }

        let report = agent
            .generate_compliance_report(ModelType::RefinanceProbability, "v1.2.0", &records)
            .await
            .unwrap();

        assert_relative_eq!(report.metrics.accuracy, 1.0);
        assert_eq!(report.fairness_metrics.len(), 1);
        assert_eq!(report.bias_assessment.level, BiasLevel::Low);
        assert!(report.compliant);
        assert!(audit.verify_integrity(report.audit_id).await.unwrap());

        let entry = audit.get(report.audit_id).await.unwrap().unwrap();
        assert_eq!(entry.payload["id"], serde_json::json!(report.id));
    }

    #[tokio::test]
    async fn test_compliance_report_requires_data() {
        let (agent, _, _) = setup().await;
        let result = agent
            .generate_compliance_report(ModelType::MortgageRate, "v1", &[])
            .await;
        assert!(matches!(result, Err(PipelineError::InsufficientData(_))));
    }
}
