//! Orchestrator configuration and supported region profiles

use crate::error::PipelineError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Baselines used by the synthetic market source and fallback forecasts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionProfile {
    pub code: &'static str,
    /// Typical 5-year fixed rate in percent
    pub base_rate: f64,
    pub median_home_value: f64,
    pub median_income: f64,
    pub market_index: f64,
}

pub const REGION_PROFILES: &[RegionProfile] = &[
    RegionProfile { code: "CA", base_rate: 6.4, median_home_value: 780_000.0, median_income: 91_000.0, market_index: 1_000.0 },
    RegionProfile { code: "TX", base_rate: 6.6, median_home_value: 340_000.0, median_income: 73_000.0, market_index: 1_000.0 },
    RegionProfile { code: "FL", base_rate: 6.7, median_home_value: 410_000.0, median_income: 67_000.0, market_index: 1_000.0 },
    RegionProfile { code: "NY", base_rate: 6.5, median_home_value: 520_000.0, median_income: 81_000.0, market_index: 1_000.0 },
    RegionProfile { code: "WA", base_rate: 6.4, median_home_value: 610_000.0, median_income: 90_000.0, market_index: 1_000.0 },
    RegionProfile { code: "ON", base_rate: 5.2, median_home_value: 870_000.0, median_income: 95_000.0, market_index: 1_000.0 },
    RegionProfile { code: "BC", base_rate: 5.3, median_home_value: 990_000.0, median_income: 90_000.0, market_index: 1_000.0 },
    RegionProfile { code: "AB", base_rate: 5.4, median_home_value: 450_000.0, median_income: 100_000.0, market_index: 1_000.0 },
    RegionProfile { code: "QC", base_rate: 5.3, median_home_value: 500_000.0, median_income: 80_000.0, market_index: 1_000.0 },
];

pub fn region_profile(code: &str) -> Option<&'static RegionProfile> {
    REGION_PROFILES.iter().find(|p| p.code.eq_ignore_ascii_case(code))
}

pub fn ensure_supported_region(code: &str) -> Result<&'static RegionProfile> {
    region_profile(code).ok_or_else(|| {
        PipelineError::InvalidConfiguration(format!("unsupported region '{}'", code))
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlertThresholds {
    /// Percentage points below the locked rate that trigger a rate-drop alert
    pub rate_drop: f64,
    /// Minimum refinance probability for a watchlist entry
    pub refinance_probability: f64,
    /// Qualification failure rate above which a stress alert is raised
    pub stress_failure_rate: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            rate_drop: 0.5,
            refinance_probability: 0.3,
            stress_failure_rate: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PredictiveConfig {
    pub enable_data_ingestion: bool,
    pub enable_forecasting: bool,
    pub enable_refinance_watchlist: bool,
    pub enable_prescriptive_analytics: bool,
    pub enable_scenario_simulation: bool,
    pub enable_explainability: bool,
    pub regions: Vec<String>,
    pub forecast_horizon: u32,
    pub simulation_iterations: u32,
    pub alert_thresholds: AlertThresholds,
    /// Seed for stochastic simulations; unseeded runs draw from entropy
    pub simulation_seed: Option<u64>,
    /// Multiplier applied to `probability × potentialSavings`
    pub priority_weight: f64,
    /// Number of top watchlist users that receive recommendations and simulations per sweep
    pub max_users_per_sweep: usize,
    pub completion_model: String,
}

impl Default for PredictiveConfig {
    fn default() -> Self {
        Self {
            enable_data_ingestion: true,
            enable_forecasting: true,
            enable_refinance_watchlist: true,
            enable_prescriptive_analytics: true,
            enable_scenario_simulation: true,
            enable_explainability: true,
            regions: vec!["CA".to_string()],
            forecast_horizon: 12,
            simulation_iterations: 1_000,
            alert_thresholds: AlertThresholds::default(),
            simulation_seed: None,
            priority_weight: 1.0,
            max_users_per_sweep: 25,
            completion_model: "gemini-2.0-flash".to_string(),
        }
    }
}

impl PredictiveConfig {
    /// Reject values no stage could run with. Unsupported regions are not
    /// checked here; they degrade the affected stages instead.
    pub fn validate(&self) -> Result<()> {
        if self.forecast_horizon == 0 {
            return Err(PipelineError::InvalidConfiguration(
                "forecast_horizon must be at least 1".to_string(),
            ));
        }
        if self.simulation_iterations == 0 {
            return Err(PipelineError::InvalidConfiguration(
                "simulation_iterations must be at least 1".to_string(),
            ));
        }
        if !self.priority_weight.is_finite() || self.priority_weight < 0.0 {
            return Err(PipelineError::InvalidConfiguration(
                "priority_weight must be a non-negative number".to_string(),
            ));
        }
        let thresholds = &self.alert_thresholds;
        for (name, value) in [
            ("rate_drop", thresholds.rate_drop),
            ("refinance_probability", thresholds.refinance_probability),
            ("stress_failure_rate", thresholds.stress_failure_rate),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PipelineError::InvalidConfiguration(format!(
                    "alert threshold {} must be a non-negative number",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Split configured regions into supported and unsupported codes
    pub fn partition_regions(&self) -> (Vec<String>, Vec<String>) {
        let mut supported = Vec::new();
        let mut unsupported = Vec::new();
        for region in &self.regions {
            match region_profile(region) {
                Some(profile) => supported.push(profile.code.to_string()),
                None => unsupported.push(region.clone()),
            }
        }
        (supported, unsupported)
    }

    /// Build a config from `PREDICTIVE_*` environment variables on top of defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = read_var::<bool>(&lookup, "PREDICTIVE_ENABLE_DATA_INGESTION")? {
            config.enable_data_ingestion = v;
        }
        if let Some(v) = read_var::<bool>(&lookup, "PREDICTIVE_ENABLE_FORECASTING")? {
            config.enable_forecasting = v;
        }
        if let Some(v) = read_var::<bool>(&lookup, "PREDICTIVE_ENABLE_REFINANCE_WATCHLIST")? {
            config.enable_refinance_watchlist = v;
        }
        if let Some(v) = read_var::<bool>(&lookup, "PREDICTIVE_ENABLE_PRESCRIPTIVE_ANALYTICS")? {
            config.enable_prescriptive_analytics = v;
        }
        if let Some(v) = read_var::<bool>(&lookup, "PREDICTIVE_ENABLE_SCENARIO_SIMULATION")? {
            config.enable_scenario_simulation = v;
        }
        if let Some(v) = read_var::<bool>(&lookup, "PREDICTIVE_ENABLE_EXPLAINABILITY")? {
            config.enable_explainability = v;
        }
        if let Some(regions) = lookup("PREDICTIVE_REGIONS") {
            config.regions = regions
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = read_var::<u32>(&lookup, "PREDICTIVE_FORECAST_HORIZON")? {
            config.forecast_horizon = v;
        }
        if let Some(v) = read_var::<u32>(&lookup, "PREDICTIVE_SIMULATION_ITERATIONS")? {
            config.simulation_iterations = v;
        }
        if let Some(v) = read_var::<u64>(&lookup, "PREDICTIVE_SIMULATION_SEED")? {
            config.simulation_seed = Some(v);
        }
        if let Some(v) = read_var::<f64>(&lookup, "PREDICTIVE_RATE_DROP_THRESHOLD")? {
            config.alert_thresholds.rate_drop = v;
        }
        if let Some(v) = read_var::<f64>(&lookup, "PREDICTIVE_REFINANCE_PROBABILITY_THRESHOLD")? {
            config.alert_thresholds.refinance_probability = v;
        }
        if let Some(v) = read_var::<f64>(&lookup, "PREDICTIVE_STRESS_FAILURE_RATE")? {
            config.alert_thresholds.stress_failure_rate = v;
        }
        if let Some(v) = read_var::<f64>(&lookup, "PREDICTIVE_PRIORITY_WEIGHT")? {
            config.priority_weight = v;
        }
        if let Some(v) = read_var::<usize>(&lookup, "PREDICTIVE_MAX_USERS_PER_SWEEP")? {
            config.max_users_per_sweep = v;
        }
        if let Some(model) = lookup("PREDICTIVE_COMPLETION_MODEL") {
            config.completion_model = model;
        }

        config.validate()?;
        Ok(config)
    }
}

fn read_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            PipelineError::InvalidConfiguration(format!("{} has invalid value '{}'", key, raw))
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PredictiveConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.forecast_horizon, 12);
    }

    #[test]
    fn test_zero_horizon_rejected() {
        let config = PredictiveConfig {
            forecast_horizon: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_from_lookup_reads_thresholds() {
        let vars = std::collections::HashMap::from([
            ("PREDICTIVE_STRESS_FAILURE_RATE", "0.4"),
            ("PREDICTIVE_MAX_USERS_PER_SWEEP", "5"),
            ("PREDICTIVE_REGIONS", "CA, tx"),
        ]);
        let config =
            PredictiveConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(config.alert_thresholds.stress_failure_rate, 0.4);
        assert_eq!(config.max_users_per_sweep, 5);
        assert_eq!(config.regions, vec!["CA".to_string(), "tx".to_string()]);
        assert_eq!(config.alert_thresholds.rate_drop, AlertThresholds::default().rate_drop);
    }

    #[test]
    fn test_from_lookup_rejects_bad_number() {
        let result = PredictiveConfig::from_lookup(|key| {
            (key == "PREDICTIVE_STRESS_FAILURE_RATE").then(|| "often".to_string())
        });
        assert!(matches!(result, Err(PipelineError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_partition_regions() {
        let config = PredictiveConfig {
            regions: vec!["ca".to_string(), "INVALID_REGION".to_string()],
            ..Default::default()
        };
        let (supported, unsupported) = config.partition_regions();
        assert_eq!(supported, vec!["CA".to_string()]);
        assert_eq!(unsupported, vec!["INVALID_REGION".to_string()]);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: PredictiveConfig =
            serde_json::from_str(r#"{"regions":["TX"],"enableExplainability":false}"#).unwrap();
        assert_eq!(config.regions, vec!["TX".to_string()]);
        assert!(!config.enable_explainability);
        assert!(config.enable_forecasting);
    }
}
