//! Core data models for the predictive insights pipeline

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Series {
    MortgageRate,
    PropertyValue,
    Income,
    MarketIndex,
}

impl Series {
    pub const ALL: [Series; 4] = [
        Series::MortgageRate,
        Series::PropertyValue,
        Series::Income,
        Series::MarketIndex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Series::MortgageRate => "mortgage_rate",
            Series::PropertyValue => "property_value",
            Series::Income => "income",
            Series::MarketIndex => "market_index",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Series::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WatchlistStatus {
    Pending,
    Contacted,
    Converted,
    Dismissed,
}

impl WatchlistStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WatchlistStatus::Converted | WatchlistStatus::Dismissed)
    }

    /// Allowed moves: pending → {contacted, dismissed}, contacted → {converted, dismissed}
    pub fn can_transition_to(&self, next: WatchlistStatus) -> bool {
        use WatchlistStatus::*;
        matches!(
            (self, next),
            (Pending, Contacted) | (Pending, Dismissed) | (Contacted, Converted) | (Contacted, Dismissed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WatchlistStatus::Pending => "pending",
            WatchlistStatus::Contacted => "contacted",
            WatchlistStatus::Converted => "converted",
            WatchlistStatus::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for WatchlistStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SimulationType {
    StressTest,
    RateShock,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExplanationMethod {
    Shap,
    Lime,
}

impl ExplanationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExplanationMethod::Shap => "shap",
            ExplanationMethod::Lime => "lime",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    MortgageRate,
    PropertyValue,
    RefinanceProbability,
}

impl ModelType {
    pub fn for_series(series: Series) -> Self {
        match series {
            Series::PropertyValue => ModelType::PropertyValue,
            _ => ModelType::MortgageRate,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    RateDrop,
    RefinanceOpportunity,
    StressRisk,
    StageFailure,
}

//
// ================= Market Data =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalDataPoint {
    pub series: Series,
    pub region: String,
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    pub id: Uuid,
    /// All forecasts produced by one call share a generation id
    pub generation_id: Uuid,
    pub series: Series,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    pub target_date: NaiveDate,
    pub predicted_value: f64,
    pub confidence_score: f64,
    pub generated_at: DateTime<Utc>,
}

//
// ================= Mortgages & Refinance =================
//

/// Current mortgage position of a user, as held by the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MortgageSnapshot {
    pub user_id: Uuid,
    pub region: String,
    /// Locked annual rate in percent (e.g. 6.25)
    pub current_rate: f64,
    pub balance: f64,
    pub property_value: f64,
    pub credit_score: u16,
    pub annual_income: f64,
    pub monthly_debts: f64,
    pub remaining_term_months: u32,
    pub active: bool,
}

/// Inputs for a single refinance prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinanceInputs {
    pub current_rate: f64,
    pub current_balance: f64,
    pub property_value: f64,
    pub credit_score: u16,
    pub annual_income: f64,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub remaining_term_months: Option<u32>,
}

impl From<&MortgageSnapshot> for RefinanceInputs {
    fn from(snapshot: &MortgageSnapshot) -> Self {
        Self {
            current_rate: snapshot.current_rate,
            current_balance: snapshot.balance,
            property_value: snapshot.property_value,
            credit_score: snapshot.credit_score,
            annual_income: snapshot.annual_income,
            region: Some(snapshot.region.clone()),
            remaining_term_months: Some(snapshot.remaining_term_months),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefinanceProbability {
    pub user_id: Uuid,
    pub probability: f64,
    pub potential_savings: f64,
    pub priority_score: f64,
    pub current_rate: f64,
    pub best_available_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: WatchlistStatus,
    pub notes: Option<String>,
    pub priority_score: f64,
    pub probability: f64,
    pub potential_savings: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetentionStrategy {
    pub strategy_type: String,
    pub title: String,
    pub description: String,
    pub priority: Severity,
    pub estimated_savings: f64,
}

//
// ================= Scenarios =================
//

/// Purchase or refinance scenario evaluated for affordability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub home_price: f64,
    pub down_payment: f64,
    /// Annual rate in percent
    pub interest_rate: f64,
    pub amortization_years: u32,
    pub annual_income: f64,
    pub monthly_debts: f64,
    #[serde(default)]
    pub property_tax_monthly: f64,
    #[serde(default)]
    pub heating_monthly: f64,
    /// Amount owed when it exceeds the home price (negative equity)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loan_balance: Option<f64>,
}

impl Scenario {
    pub fn loan_amount(&self) -> f64 {
        match self.loan_balance {
            Some(balance) => balance.max(0.0),
            None => (self.home_price - self.down_payment).max(0.0),
        }
    }

    pub fn from_snapshot(snapshot: &MortgageSnapshot) -> Self {
        let years = (snapshot.remaining_term_months as f64 / 12.0).ceil().max(1.0) as u32;
        Self {
            home_price: snapshot.property_value,
            down_payment: (snapshot.property_value - snapshot.balance).max(0.0),
            interest_rate: snapshot.current_rate,
            amortization_years: years,
            annual_income: snapshot.annual_income,
            monthly_debts: snapshot.monthly_debts,
            property_tax_monthly: snapshot.property_value * 0.01 / 12.0,
            heating_monthly: 100.0,
            loan_balance: (snapshot.balance > snapshot.property_value).then_some(snapshot.balance),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ScenarioParameter {
    InterestRate,
    DownPayment,
    AmortizationYears,
    HomePrice,
    AnnualIncome,
    MonthlyDebts,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Modification {
    pub parameter: ScenarioParameter,
    pub new_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AffordabilityMetrics {
    pub loan_amount: f64,
    pub monthly_payment: f64,
    pub total_interest: f64,
    pub gds_ratio: f64,
    pub tds_ratio: f64,
    pub qualifies: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WhatIfResult {
    pub modification: Modification,
    pub scenario: Scenario,
    pub metrics: AffordabilityMetrics,
    pub monthly_payment_change: f64,
    pub total_interest_change: f64,
    pub improvement_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub title: String,
    pub modifications: Vec<Modification>,
    pub metrics: AffordabilityMetrics,
    pub monthly_savings: f64,
    pub interest_savings: f64,
    pub upfront_cost: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WhatIfAnalysis {
    pub user_id: Uuid,
    pub base_scenario: Scenario,
    pub base_metrics: AffordabilityMetrics,
    pub modifications: Vec<WhatIfResult>,
    pub recommendations: Vec<Recommendation>,
}

//
// ================= Simulation =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StressTestParams {
    pub base_scenario: Scenario,
    pub iterations: u32,
    pub rate_volatility: f64,
    pub property_volatility: f64,
    pub income_volatility: f64,
    /// Horizon in months over which volatility accumulates
    pub time_horizon: u32,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateShock {
    pub name: String,
    /// Added to the rate, in percentage points
    pub rate_delta: f64,
    /// Fractional change to property value
    #[serde(default)]
    pub property_delta: f64,
    /// Fractional change to income
    #[serde(default)]
    pub income_delta: f64,
}

impl RateShock {
    pub fn rate(name: &str, rate_delta: f64) -> Self {
        Self {
            name: name.to_string(),
            rate_delta,
            property_delta: 0.0,
            income_delta: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DistributionSummary {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShockOutcome {
    pub name: String,
    pub scenario: Scenario,
    pub metrics: AffordabilityMetrics,
    pub monthly_payment_change: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimulationSummary {
    pub monthly_payment: DistributionSummary,
    pub tds_ratio: DistributionSummary,
    pub qualification_pass_rate: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shocks: Vec<ShockOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSimulationResult {
    pub simulation_id: Uuid,
    pub user_id: Uuid,
    pub simulation_type: SimulationType,
    pub iterations: u32,
    #[serde(default)]
    pub seed: Option<u64>,
    pub results: SimulationSummary,
    pub created_at: DateTime<Utc>,
}

//
// ================= Explainability =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Explanation {
    pub id: Uuid,
    pub forecast_id: Uuid,
    pub explanation_type: ExplanationMethod,
    pub model_type: ModelType,
    pub feature_contributions: BTreeMap<String, f64>,
    pub base_value: f64,
    pub predicted_value: f64,
    pub rationale: String,
    pub created_at: DateTime<Utc>,
}

/// One labelled prediction used for compliance evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRecord {
    pub predicted: bool,
    pub actual: bool,
    #[serde(default)]
    pub sensitive_attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationMetrics {
    pub sample_size: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupRates {
    pub group: String,
    pub count: usize,
    pub positive_rate: f64,
    /// None when the group has no actual positives
    pub true_positive_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FairnessMetrics {
    pub attribute: String,
    pub groups: Vec<GroupRates>,
    /// Lowest group positive rate divided by the highest
    pub disparate_impact_ratio: f64,
    /// Spread between highest and lowest group true positive rate, over
    /// groups with at least one actual positive
    pub equal_opportunity_difference: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BiasLevel {
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BiasAssessment {
    pub level: BiasLevel,
    pub flagged_attributes: Vec<String>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceCheck {
    pub rule_name: String,
    pub passed: bool,
    pub severity: Severity,
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub id: Uuid,
    pub model_type: ModelType,
    pub model_version: String,
    pub metrics: ClassificationMetrics,
    pub bias_assessment: BiasAssessment,
    pub fairness_metrics: Vec<FairnessMetrics>,
    pub regulatory_compliance: Vec<ComplianceCheck>,
    pub compliant: bool,
    pub audit_id: Uuid,
    pub generated_at: DateTime<Utc>,
}

//
// ================= Alerts & Runs =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        alert_type: AlertType,
        severity: Severity,
        message: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_type,
            severity,
            message: message.into(),
            metadata,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Success,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StageOutcome {
    pub status: StageStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunSummary {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    /// Keyed by stage name, flattened next to `timestamp` on the wire
    #[serde(flatten)]
    pub stages: BTreeMap<String, StageOutcome>,
    pub alerts: Vec<Alert>,
}

impl PipelineRunSummary {
    pub fn stage(&self, name: &str) -> Option<&StageOutcome> {
        self.stages.get(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserInsights {
    pub user_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub forecasts: Vec<Forecast>,
    pub refinance_opportunities: Vec<RefinanceProbability>,
    pub recommendations: Vec<Recommendation>,
    pub simulations: Vec<ScenarioSimulationResult>,
    pub alerts: Vec<Alert>,
    pub stages: BTreeMap<String, StageOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watchlist_transitions() {
        use WatchlistStatus::*;
        assert!(Pending.can_transition_to(Contacted));
        assert!(Pending.can_transition_to(Dismissed));
        assert!(Contacted.can_transition_to(Converted));
        assert!(!Pending.can_transition_to(Converted));
        assert!(!Converted.can_transition_to(Pending));
        assert!(!Dismissed.can_transition_to(Contacted));
        assert!(Converted.is_terminal());
    }

    #[test]
    fn test_modification_wire_format() {
        let modification: Modification =
            serde_json::from_str(r#"{"parameter":"interestRate","newValue":4.5}"#).unwrap();
        assert_eq!(modification.parameter, ScenarioParameter::InterestRate);
        assert_eq!(modification.new_value, 4.5);
    }

    #[test]
    fn test_summary_flattens_stages() {
        let mut stages = BTreeMap::new();
        stages.insert(
            "dataIngestion".to_string(),
            StageOutcome {
                status: StageStatus::Error,
                duration_ms: 3,
                error: Some("boom".to_string()),
                details: serde_json::Value::Null,
            },
        );
        let summary = PipelineRunSummary {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            duration_ms: 3,
            stages,
            alerts: vec![],
        };

        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("timestamp").is_some());
        assert_eq!(json["dataIngestion"]["status"], "error");
    }

    #[test]
    fn test_series_parse() {
        assert_eq!(Series::parse("market_index"), Some(Series::MarketIndex));
        assert_eq!(Series::parse("gold"), None);
    }
}
