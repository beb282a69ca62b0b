//! Scenario perturbation strategies and distribution summaries

use crate::models::{DistributionSummary, Scenario};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

/// Fractional standard deviations applied over a horizon
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Volatility {
    pub rate: f64,
    pub property: f64,
    pub income: f64,
    pub horizon_months: u32,
}

impl Volatility {
    /// Volatility grows with the square root of elapsed years
    pub fn horizon_scale(&self) -> f64 {
        (self.horizon_months.max(1) as f64 / 12.0).sqrt()
    }
}

/// Trait for drawing one perturbed scenario
pub trait SimulationModel: Send + Sync {
    fn name(&self) -> &'static str;
    fn perturb(&self, base: &Scenario, volatility: &Volatility, rng: &mut StdRng) -> Scenario;
}

/// Independent Gaussian shocks on rate, property value and income
pub struct GaussianShockModel;

fn draw(sigma: f64, rng: &mut StdRng) -> f64 {
    match Normal::new(0.0, sigma) {
        Ok(normal) if sigma > 0.0 => normal.sample(rng),
        _ => 0.0,
    }
}

/// Reprice the property while keeping the amount owed fixed.
/// Equity below zero moves into `loan_balance`; the down payment floors at 0.
pub fn reprice_property(scenario: &mut Scenario, factor: f64) {
    let loan = scenario.loan_amount();
    let base_price = scenario.home_price;
    scenario.home_price = (base_price * factor).max(0.0);
    scenario.down_payment = (scenario.home_price - loan).max(0.0);
    scenario.loan_balance = (loan > scenario.home_price).then_some(loan);
    if base_price > 0.0 {
        scenario.property_tax_monthly *= scenario.home_price / base_price;
    }
}

impl SimulationModel for GaussianShockModel {
    fn name(&self) -> &'static str {
        "gaussian_shock"
    }

    fn perturb(&self, base: &Scenario, volatility: &Volatility, rng: &mut StdRng) -> Scenario {
        let scale = volatility.horizon_scale();
        let rate_shock = draw(volatility.rate * scale, rng);
        let property_shock = draw(volatility.property * scale, rng);
        let income_shock = draw(volatility.income * scale, rng);

        let mut scenario = base.clone();
        scenario.interest_rate = (base.interest_rate * (1.0 + rate_shock)).max(0.0);
        reprice_property(&mut scenario, (1.0 + property_shock).max(0.0));
        scenario.annual_income = (base.annual_income * (1.0 + income_shock)).max(0.0);
        scenario
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// Mean, spread and percentile bands of a sample
pub fn summarize(samples: &[f64]) -> DistributionSummary {
    if samples.is_empty() {
        return DistributionSummary::default();
    }

    let mut sorted: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    if sorted.is_empty() {
        return DistributionSummary::default();
    }

    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    DistributionSummary {
        mean,
        std_dev: variance.sqrt(),
        min: sorted[0],
        p5: percentile(&sorted, 0.05),
        p25: percentile(&sorted, 0.25),
        p50: percentile(&sorted, 0.50),
        p75: percentile(&sorted, 0.75),
        p95: percentile(&sorted, 0.95),
        max: sorted[sorted.len() - 1],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn scenario() -> Scenario {
        Scenario {
            home_price: 500_000.0,
            down_payment: 100_000.0,
            interest_rate: 5.0,
            amortization_years: 25,
            annual_income: 120_000.0,
            monthly_debts: 300.0,
            property_tax_monthly: 400.0,
            heating_monthly: 100.0,
            loan_balance: None,
        }
    }

    #[test]
    fn test_summarize_percentiles() {
        let samples: Vec<f64> = (1..=101).map(|v| v as f64).collect();
        let summary = summarize(&samples);
        assert_relative_eq!(summary.mean, 51.0);
        assert_relative_eq!(summary.p50, 51.0);
        assert_relative_eq!(summary.p5, 6.0);
        assert_relative_eq!(summary.p95, 96.0);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 101.0);
    }

    #[test]
    fn test_summarize_empty() {
        assert_eq!(summarize(&[]), DistributionSummary::default());
    }

    #[test]
    fn test_reprice_keeps_loan() {
        let mut s = scenario();
        reprice_property(&mut s, 0.7);
        assert_relative_eq!(s.loan_amount(), 400_000.0);
        assert_relative_eq!(s.home_price, 350_000.0);
        assert_relative_eq!(s.property_tax_monthly, 280.0);
        assert_eq!(s.down_payment, 0.0);
        assert_eq!(s.loan_balance, Some(400_000.0));
        assert!(crate::affordability::validate_scenario(&s).is_ok());

        // Recovering above the balance restores ordinary equity
        reprice_property(&mut s, 2.0);
        assert_relative_eq!(s.loan_amount(), 400_000.0);
        assert_relative_eq!(s.down_payment, 300_000.0);
        assert_eq!(s.loan_balance, None);
    }

    #[test]
    fn test_perturb_is_seeded() {
        let volatility = Volatility { rate: 0.1, property: 0.05, income: 0.05, horizon_months: 12 };
        let mut a = StdRng::seed_from_u64(9);
        let mut b = StdRng::seed_from_u64(9);
        let model = GaussianShockModel;
        assert_eq!(
            model.perturb(&scenario(), &volatility, &mut a),
            model.perturb(&scenario(), &volatility, &mut b)
        );
    }

    #[test]
    fn test_zero_volatility_is_identity() {
        let volatility = Volatility { rate: 0.0, property: 0.0, income: 0.0, horizon_months: 12 };
        let mut rng = StdRng::seed_from_u64(1);
        let perturbed = GaussianShockModel.perturb(&scenario(), &volatility, &mut rng);
        assert_eq!(perturbed, scenario());
    }
}
