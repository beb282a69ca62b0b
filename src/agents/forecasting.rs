//! Forecasting agent
//!
//! Produces monthly forecasts from stored history and scores refinance
//! likelihood for individual mortgages.

use crate::affordability::{monthly_payment, refinance_savings};
use crate::config::{ensure_supported_region, REGION_PROFILES};
use crate::error::PipelineError;
use crate::modeling::{DampedTrendModel, FlatModel, ForecastModel};
use crate::models::{Forecast, RefinanceInputs, RefinanceProbability, Series};
use crate::sources::first_of_month;
use crate::store::{latest_generation, PredictiveStore};
use crate::Result;
use chrono::{Months, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Remaining term assumed when the caller does not supply one
const DEFAULT_REMAINING_MONTHS: u32 = 300;

#[derive(Clone)]
pub struct ForecastingAgent {
    store: Arc<dyn PredictiveStore>,
    model: Arc<dyn ForecastModel>,
    lookback_months: u32,
    priority_weight: f64,
}

impl ForecastingAgent {
    pub fn new(store: Arc<dyn PredictiveStore>) -> Self {
        Self {
            store,
            model: Arc::new(DampedTrendModel::default()),
            lookback_months: 24,
            priority_weight: 1.0,
        }
    }

    pub fn with_model(mut self, model: Arc<dyn ForecastModel>) -> Self {
        self.model = model;
        self
    }

    pub fn with_priority_weight(mut self, weight: f64) -> Self {
        self.priority_weight = weight;
        self
    }

    pub async fn forecast_mortgage_rates(&self, region: &str, horizon: u32) -> Result<Vec<Forecast>> {
        self.forecast_series(Series::MortgageRate, region, horizon, None).await
    }

    pub async fn forecast_property_appreciation(
        &self,
        region: &str,
        horizon: u32,
    ) -> Result<Vec<Forecast>> {
        self.forecast_series(Series::PropertyValue, region, horizon, None).await
    }

    /// Project `series` `horizon` months forward and persist the generation.
    ///
    /// Target dates are the first of each month after the current one.
    pub async fn forecast_series(
        &self,
        series: Series,
        region: &str,
        horizon: u32,
        user_id: Option<Uuid>,
    ) -> Result<Vec<Forecast>> {
        if horizon == 0 {
            return Err(PipelineError::InvalidParameter(
                "forecast horizon must be at least 1".to_string(),
            ));
        }
        let profile = ensure_supported_region(region)?;

        let today = Utc::now().date_naive();
        let start = today
            .checked_sub_months(Months::new(self.lookback_months))
            .unwrap_or(NaiveDate::MIN);
        let history: Vec<f64> = self
            .store
            .historical_range(series, profile.code, start, today)
            .await?
            .into_iter()
            .map(|p| p.value)
            .collect();

        let projections = if history.len() < 2 {
            let baseline = history.last().copied().unwrap_or(match series {
                Series::MortgageRate => profile.base_rate,
                Series::PropertyValue => profile.median_home_value,
                Series::Income => profile.median_income,
                Series::MarketIndex => profile.market_index,
            });
            warn!(
                series = %series,
                region = profile.code,
                points = history.len(),
                "Insufficient history, using flat forecast"
            );
            FlatModel::with_baseline(baseline).project(&history, horizon as usize)
        } else {
            self.model.project(&history, horizon as usize)
        };

        if projections.len() != horizon as usize {
            return Err(PipelineError::InvalidConfiguration(format!(
                "forecast model {} returned {} projections for horizon {}",
                self.model.name(),
                projections.len(),
                horizon
            )));
        }

        let base_month = first_of_month(today);
        let generation_id = Uuid::new_v4();
        let generated_at = Utc::now();

        let mut forecasts = Vec::with_capacity(projections.len());
        // Confidence stays in [0, 1] and never rises with the horizon
        let mut ceiling = 1.0_f64;
        for (step, projection) in projections.into_iter().enumerate() {
            let confidence = if projection.confidence.is_nan() {
                0.0
            } else {
                projection.confidence.clamp(0.0, ceiling)
            };
            ceiling = confidence;
            let target_date = base_month
                .checked_add_months(Months::new(step as u32 + 1))
                .ok_or_else(|| {
                    PipelineError::InvalidParameter(format!("horizon {} overflows the calendar", horizon))
                })?;
            forecasts.push(Forecast {
                id: Uuid::new_v4(),
                generation_id,
                series,
                region: profile.code.to_string(),
                user_id,
                target_date,
                predicted_value: projection.value,
                confidence_score: confidence,
                generated_at,
            });
        }

        self.store.insert_forecasts(&forecasts).await?;

        info!(
            series = %series,
            region = profile.code,
            horizon,
            generation_id = %generation_id,
            model = self.model.name(),
            "Forecast generated"
        );

        Ok(forecasts)
    }

    /// Best rate currently expected in the region: the lower of the latest
    /// observation and the latest system forecast over the next year
    pub async fn market_rate(&self, region: &str) -> Result<f64> {
        let profile = ensure_supported_region(region)?;
        let today = Utc::now().date_naive();
        let start = today
            .checked_sub_months(Months::new(self.lookback_months))
            .unwrap_or(NaiveDate::MIN);
        let year_out = today.checked_add_months(Months::new(12)).unwrap_or(today);

        let observed = self
            .store
            .historical_range(Series::MortgageRate, profile.code, start, today)
            .await?
            .last()
            .map(|p| p.value);

        let forecast = latest_generation(
            self.store
                .forecasts_for(Series::MortgageRate, profile.code, None)
                .await?,
        )
        .into_iter()
        .filter(|f| f.target_date <= year_out)
        .map(|f| f.predicted_value)
        .reduce(f64::min);

        let rate = match (observed, forecast) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => profile.base_rate,
        };
        Ok(rate)
    }

    /// Score how likely a borrower is to refinance and what it would save them
    pub async fn predict_refinance_probability(
        &self,
        user_id: Uuid,
        inputs: &RefinanceInputs,
    ) -> Result<RefinanceProbability> {
        validate_inputs(inputs)?;

        let region = match &inputs.region {
            Some(region) => Some(region.clone()),
            None => self.store.load_mortgage(user_id).await?.map(|m| m.region),
        };
        let market = match region {
            Some(region) => self.market_rate(&region).await?,
            None => {
                REGION_PROFILES.iter().map(|p| p.base_rate).sum::<f64>() / REGION_PROFILES.len() as f64
            }
        };

        let best_available_rate = market + credit_spread(inputs.credit_score);
        let months = inputs.remaining_term_months.unwrap_or(DEFAULT_REMAINING_MONTHS).max(1);

        let rate_differential = inputs.current_rate - best_available_rate;
        let rate_factor = 1.0 / (1.0 + (-(rate_differential - 0.5) * 3.0).exp());

        let ltv = if inputs.property_value > 0.0 {
            inputs.current_balance / inputs.property_value
        } else {
            1.0
        };
        let ltv_factor = match ltv {
            l if l <= 0.80 => 1.0,
            l if l <= 0.90 => 0.8,
            l if l <= 0.95 => 0.6,
            _ => 0.3,
        };

        let payment = monthly_payment(inputs.current_balance, inputs.current_rate, months);
        let monthly_income = inputs.annual_income / 12.0;
        let income_factor = if monthly_income > 0.0 && payment / monthly_income > 0.44 {
            0.6
        } else {
            1.0
        };

        let probability =
            (rate_factor * credit_factor(inputs.credit_score) * ltv_factor * income_factor).clamp(0.0, 1.0);
        let potential_savings = refinance_savings(
            inputs.current_balance,
            inputs.current_rate,
            best_available_rate,
            months,
        );

        debug!(
            user_id = %user_id,
            probability,
            potential_savings,
            best_available_rate,
            "Refinance probability scored"
        );

        Ok(RefinanceProbability {
            user_id,
            probability,
            potential_savings,
            priority_score: probability * potential_savings * self.priority_weight,
            current_rate: inputs.current_rate,
            best_available_rate,
        })
    }

    /// Latest forecasts relevant to a user: their own if any exist,
    /// otherwise the region's latest system generation
    pub async fn get_latest_forecasts(&self, user_id: Uuid, series: Series) -> Result<Vec<Forecast>> {
        let mortgage = self
            .store
            .load_mortgage(user_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("mortgage for user {}", user_id)))?;
        let profile = ensure_supported_region(&mortgage.region)?;

        let own = latest_generation(
            self.store
                .forecasts_for(series, profile.code, Some(user_id))
                .await?,
        );
        if !own.is_empty() {
            return Ok(own);
        }

        Ok(latest_generation(
            self.store.forecasts_for(series, profile.code, None).await?,
        ))
    }
}

fn validate_inputs(inputs: &RefinanceInputs) -> Result<()> {
    for (name, value) in [
        ("currentRate", inputs.current_rate),
        ("currentBalance", inputs.current_balance),
        ("propertyValue", inputs.property_value),
        ("annualIncome", inputs.annual_income),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(PipelineError::InvalidParameter(format!(
                "{} must be a non-negative number",
                name
            )));
        }
    }
    Ok(())
}

/// Percentage points added to the market rate for a credit band
fn credit_spread(score: u16) -> f64 {
    match score {
        760.. => 0.0,
        700..=759 => 0.15,
        640..=699 => 0.35,
        580..=639 => 0.75,
        _ => 1.25,
    }
}

fn credit_factor(score: u16) -> f64 {
    match score {
        760.. => 1.0,
        700..=759 => 0.85,
        640..=699 => 0.65,
        580..=639 => 0.4,
        _ => 0.2,
    }
}
