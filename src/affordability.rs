//! Mortgage affordability math shared by the agents
//!
//! Payments use standard monthly amortization. Qualification follows
//! GDS/TDS limits evaluated at a stress-tested qualifying rate.

use crate::models::{AffordabilityMetrics, Scenario};

pub const MAX_GDS: f64 = 0.39;
pub const MAX_TDS: f64 = 0.44;
/// Floor for the qualifying rate, in percent
pub const QUALIFYING_RATE_FLOOR: f64 = 5.25;
/// Buffer added to the contract rate when qualifying, in percentage points
pub const QUALIFYING_RATE_BUFFER: f64 = 2.0;

const RATIO_CAP: f64 = 10.0;

/// Monthly payment for a fully amortizing loan
pub fn monthly_payment(principal: f64, annual_rate_pct: f64, months: u32) -> f64 {
    if principal <= 0.0 || months == 0 {
        return 0.0;
    }
    let n = months as f64;
    let r = annual_rate_pct / 100.0 / 12.0;
    if r.abs() < f64::EPSILON {
        return principal / n;
    }
    principal * r / (1.0 - (1.0 + r).powf(-n))
}

pub fn total_interest(principal: f64, annual_rate_pct: f64, months: u32) -> f64 {
    (monthly_payment(principal, annual_rate_pct, months) * months as f64 - principal).max(0.0)
}

pub fn qualifying_rate(contract_rate_pct: f64) -> f64 {
    (contract_rate_pct + QUALIFYING_RATE_BUFFER).max(QUALIFYING_RATE_FLOOR)
}

/// Savings from moving the remaining balance to a lower rate over the remaining term
pub fn refinance_savings(balance: f64, current_rate: f64, new_rate: f64, months: u32) -> f64 {
    if new_rate >= current_rate {
        return 0.0;
    }
    let delta = monthly_payment(balance, current_rate, months) - monthly_payment(balance, new_rate, months);
    (delta * months as f64).max(0.0)
}

fn ratio(numerator: f64, monthly_income: f64) -> f64 {
    if monthly_income <= 0.0 {
        return RATIO_CAP;
    }
    (numerator / monthly_income).min(RATIO_CAP)
}

/// Evaluate payment, interest and GDS/TDS qualification for a scenario
pub fn evaluate(scenario: &Scenario) -> AffordabilityMetrics {
    let months = scenario.amortization_years.saturating_mul(12);
    let loan = scenario.loan_amount();
    let payment = monthly_payment(loan, scenario.interest_rate, months);
    let qualifying_payment = monthly_payment(loan, qualifying_rate(scenario.interest_rate), months);

    let monthly_income = scenario.annual_income / 12.0;
    let housing = qualifying_payment + scenario.property_tax_monthly + scenario.heating_monthly;
    let gds = ratio(housing, monthly_income);
    let tds = ratio(housing + scenario.monthly_debts, monthly_income);

    AffordabilityMetrics {
        loan_amount: loan,
        monthly_payment: payment,
        total_interest: total_interest(loan, scenario.interest_rate, months),
        gds_ratio: gds,
        tds_ratio: tds,
        qualifies: gds <= MAX_GDS && tds <= MAX_TDS,
    }
}

/// Basic sanity check before a scenario is evaluated
pub fn validate_scenario(scenario: &Scenario) -> crate::Result<()> {
    let fields = [
        ("homePrice", scenario.home_price),
        ("downPayment", scenario.down_payment),
        ("interestRate", scenario.interest_rate),
        ("annualIncome", scenario.annual_income),
        ("monthlyDebts", scenario.monthly_debts),
    ];
    for (name, value) in fields {
        if !value.is_finite() || value < 0.0 {
            return Err(crate::error::PipelineError::InvalidParameter(format!(
                "{} must be a non-negative number",
                name
            )));
        }
    }
    if scenario.home_price <= 0.0 {
        return Err(crate::error::PipelineError::InvalidParameter(
            "homePrice must be positive".to_string(),
        ));
    }
    if scenario.amortization_years == 0 || scenario.amortization_years > 40 {
        return Err(crate::error::PipelineError::InvalidParameter(
            "amortizationYears must be between 1 and 40".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scenario() -> Scenario {
        Scenario {
            home_price: 600_000.0,
            down_payment: 120_000.0,
            interest_rate: 5.0,
            amortization_years: 25,
            annual_income: 160_000.0,
            monthly_debts: 500.0,
            property_tax_monthly: 400.0,
            heating_monthly: 100.0,
            loan_balance: None,
        }
    }

    #[test]
    fn test_monthly_payment_known_value() {
        // 300k at 6% over 30 years
        assert_relative_eq!(monthly_payment(300_000.0, 6.0, 360), 1798.65, epsilon = 0.01);
    }

    #[test]
    fn test_zero_rate_is_linear() {
        assert_relative_eq!(monthly_payment(120_000.0, 0.0, 120), 1000.0);
    }

    #[test]
    fn test_refinance_savings_only_when_cheaper() {
        assert!(refinance_savings(400_000.0, 6.5, 5.5, 300) > 0.0);
        assert_eq!(refinance_savings(400_000.0, 5.5, 6.5, 300), 0.0);
        assert_eq!(refinance_savings(400_000.0, 5.5, 5.5, 300), 0.0);
    }

    #[test]
    fn test_evaluate_qualifies() {
        let metrics = evaluate(&scenario());
        assert_relative_eq!(metrics.loan_amount, 480_000.0);
        assert!(metrics.monthly_payment > 2_700.0 && metrics.monthly_payment < 2_900.0);
        assert!(metrics.qualifies);
        assert!(metrics.tds_ratio > metrics.gds_ratio);
    }

    #[test]
    fn test_zero_income_caps_ratios() {
        let mut s = scenario();
        s.annual_income = 0.0;
        let metrics = evaluate(&s);
        assert!(!metrics.qualifies);
        assert_eq!(metrics.tds_ratio, 10.0);
    }

    #[test]
    fn test_validate_scenario() {
        assert!(validate_scenario(&scenario()).is_ok());
        let mut s = scenario();
        s.amortization_years = 0;
        assert!(validate_scenario(&s).is_err());
    }
}
