//! Model compliance evaluation
//!
//! Classification metrics and per-group fairness are computed from labelled
//! test records; a rules engine then turns them into regulatory checks.

use crate::models::{
    BiasAssessment, BiasLevel, ClassificationMetrics, ComplianceCheck, FairnessMetrics,
    GroupRates, Severity, TestRecord,
};
use std::collections::BTreeMap;
use tracing::info;

/// Disparate impact below this ratio fails the four-fifths rule
pub const FOUR_FIFTHS: f64 = 0.8;

//
// ================= Metrics =================
//

fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

pub fn classification_metrics(records: &[TestRecord]) -> ClassificationMetrics {
    let mut m = ClassificationMetrics {
        sample_size: records.len(),
        ..Default::default()
    };
    for r in records {
        match (r.predicted, r.actual) {
            (true, true) => m.true_positives += 1,
            (true, false) => m.false_positives += 1,
            (false, false) => m.true_negatives += 1,
            (false, true) => m.false_negatives += 1,
        }
    }

    let tp = m.true_positives as f64;
    m.accuracy = safe_div(tp + m.true_negatives as f64, records.len() as f64);
    m.precision = safe_div(tp, tp + m.false_positives as f64);
    m.recall = safe_div(tp, tp + m.false_negatives as f64);
    m.f1_score = safe_div(2.0 * m.precision * m.recall, m.precision + m.recall);
    m
}

/// Per-group rates for every sensitive attribute present in the records
pub fn fairness_metrics(records: &[TestRecord]) -> Vec<FairnessMetrics> {
    // attribute -> group -> records
    let mut grouped: BTreeMap<&str, BTreeMap<&str, Vec<&TestRecord>>> = BTreeMap::new();
    for r in records {
        for (attribute, group) in &r.sensitive_attributes {
            grouped
                .entry(attribute.as_str())
                .or_default()
                .entry(group.as_str())
                .or_default()
                .push(r);
        }
    }

    grouped
        .into_iter()
        .map(|(attribute, groups)| {
            let groups: Vec<GroupRates> = groups
                .into_iter()
                .map(|(group, members)| {
                    let positives = members.iter().filter(|r| r.predicted).count() as f64;
                    let actual_positives = members.iter().filter(|r| r.actual).count() as f64;
                    let true_positives =
                        members.iter().filter(|r| r.predicted && r.actual).count() as f64;
                    GroupRates {
                        group: group.to_string(),
                        count: members.len(),
                        positive_rate: safe_div(positives, members.len() as f64),
                        true_positive_rate: (actual_positives > 0.0)
                            .then(|| true_positives / actual_positives),
                    }
                })
                .collect();

            let (min_rate, max_rate) = spread(groups.iter().map(|g| g.positive_rate));
            let (min_tpr, max_tpr) = spread(groups.iter().filter_map(|g| g.true_positive_rate));

            FairnessMetrics {
                attribute: attribute.to_string(),
                disparate_impact_ratio: if max_rate > 0.0 { min_rate / max_rate } else { 1.0 },
                equal_opportunity_difference: if max_tpr >= min_tpr { max_tpr - min_tpr } else { 0.0 },
                groups,
            }
        })
        .collect()
}

fn spread(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

pub fn assess_bias(fairness: &[FairnessMetrics]) -> BiasAssessment {
    let mut level = BiasLevel::Low;
    let mut flagged = Vec::new();
    let mut notes = Vec::new();

    for f in fairness {
        let attribute_level = if f.disparate_impact_ratio < FOUR_FIFTHS {
            BiasLevel::High
        } else if f.disparate_impact_ratio < 0.9 || f.equal_opportunity_difference > 0.1 {
            BiasLevel::Moderate
        } else {
            BiasLevel::Low
        };

        if attribute_level != BiasLevel::Low {
            flagged.push(f.attribute.clone());
            notes.push(format!(
                "{}: disparate impact {:.3}, equal opportunity difference {:.3}",
                f.attribute, f.disparate_impact_ratio, f.equal_opportunity_difference
            ));
        }
        level = match (level, attribute_level) {
            (BiasLevel::High, _) | (_, BiasLevel::High) => BiasLevel::High,
            (BiasLevel::Moderate, _) | (_, BiasLevel::Moderate) => BiasLevel::Moderate,
            _ => BiasLevel::Low,
        };
    }

    if fairness.is_empty() {
        notes.push("No sensitive attributes present; fairness not assessed".to_string());
    }

    BiasAssessment {
        level,
        flagged_attributes: flagged,
        notes,
    }
}

//
// ================= Rules Engine =================
//

/// Everything a rule can inspect
pub struct ComplianceContext<'a> {
    pub metrics: &'a ClassificationMetrics,
    pub fairness: &'a [FairnessMetrics],
}

pub struct RuleOutcome {
    pub passed: bool,
    pub details: String,
}

/// Trait for compliance rules
pub trait ComplianceRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Severity reported when the rule fails
    fn severity(&self) -> Severity;

    fn evaluate(&self, context: &ComplianceContext<'_>) -> RuleOutcome;
}

pub struct ComplianceEngine {
    rules: Vec<Box<dyn ComplianceRule>>,
}

impl ComplianceEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn ComplianceRule>) {
        self.rules.push(rule);
    }

    pub fn evaluate(&self, context: &ComplianceContext<'_>) -> Vec<ComplianceCheck> {
        let checks: Vec<ComplianceCheck> = self
            .rules
            .iter()
            .map(|rule| {
                let outcome = rule.evaluate(context);
                ComplianceCheck {
                    rule_name: rule.name().to_string(),
                    passed: outcome.passed,
                    severity: if outcome.passed { Severity::Info } else { rule.severity() },
                    details: outcome.details,
                }
            })
            .collect();

        info!(
            rule_count = self.rules.len(),
            failed = checks.iter().filter(|c| !c.passed).count(),
            "Compliance rules evaluated"
        );

        checks
    }
}

impl Default for ComplianceEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Rule: enough labelled records to trust the metrics
pub struct MinimumSampleSizeRule(pub usize);

impl ComplianceRule for MinimumSampleSizeRule {
    fn name(&self) -> &'static str {
        "minimum_sample_size"
    }

    fn severity(&self) -> Severity {
        Severity::Medium
    }

    fn evaluate(&self, context: &ComplianceContext<'_>) -> RuleOutcome {
        RuleOutcome {
            passed: context.metrics.sample_size >= self.0,
            details: format!("Sample size: {} (minimum {})", context.metrics.sample_size, self.0),
        }
    }
}

/// Rule: model accuracy floor
pub struct MinimumAccuracyRule(pub f64);

impl ComplianceRule for MinimumAccuracyRule {
    fn name(&self) -> &'static str {
        "minimum_accuracy"
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn evaluate(&self, context: &ComplianceContext<'_>) -> RuleOutcome {
        RuleOutcome {
            passed: context.metrics.accuracy >= self.0,
            details: format!("Accuracy: {:.3} (minimum {:.2})", context.metrics.accuracy, self.0),
        }
    }
}

/// Rule: adverse impact ratio across groups (four-fifths rule)
pub struct FourFifthsRule(pub f64);

impl ComplianceRule for FourFifthsRule {
    fn name(&self) -> &'static str {
        "four_fifths_rule"
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }

    fn evaluate(&self, context: &ComplianceContext<'_>) -> RuleOutcome {
        let failing: Vec<String> = context
            .fairness
            .iter()
            .filter(|f| f.disparate_impact_ratio < self.0)
            .map(|f| format!("{} ({:.3})", f.attribute, f.disparate_impact_ratio))
            .collect();

        RuleOutcome {
            passed: failing.is_empty(),
            details: if failing.is_empty() {
                format!("All {} attributes at or above {:.2}", context.fairness.len(), self.0)
            } else {
                format!("Below {:.2}: {}", self.0, failing.join(", "))
            },
        }
    }
}

/// Rule: true positive rates stay close across groups
pub struct EqualOpportunityRule(pub f64);

impl ComplianceRule for EqualOpportunityRule {
    fn name(&self) -> &'static str {
        "equal_opportunity"
    }

    fn severity(&self) -> Severity {
        Severity::Medium
    }

    fn evaluate(&self, context: &ComplianceContext<'_>) -> RuleOutcome {
        let worst = context
            .fairness
            .iter()
            .map(|f| f.equal_opportunity_difference)
            .fold(0.0, f64::max);

        RuleOutcome {
            passed: worst <= self.0,
            details: format!("Largest TPR difference: {:.3} (maximum {:.2})", worst, self.0),
        }
    }
}

pub fn create_default_compliance_engine() -> ComplianceEngine {
    let mut engine = ComplianceEngine::new();
    engine.add_rule(Box::new(MinimumSampleSizeRule(30)));
    engine.add_rule(Box::new(MinimumAccuracyRule(0.7)));
    engine.add_rule(Box::new(FourFifthsRule(FOUR_FIFTHS)));
    engine.add_rule(Box::new(EqualOpportunityRule(0.1)));
    engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn record(predicted: bool, actual: bool, group: &str) -> TestRecord {
        TestRecord {
            predicted,
            actual,
            sensitive_attributes: BTreeMap::from([("region".to_string(), group.to_string())]),
        }
    }

    #[test]
    fn test_classification_metrics() {
        let records = vec![
            record(true, true, "a"),
            record(true, false, "a"),
            record(false, false, "b"),
            record(false, true, "b"),
        ];
        let m = classification_metrics(&records);
        assert_eq!(m.true_positives, 1);
        assert_relative_eq!(m.accuracy, 0.5);
        assert_relative_eq!(m.precision, 0.5);
        assert_relative_eq!(m.recall, 0.5);
        assert_relative_eq!(m.f1_score, 0.5);
    }

    #[test]
    fn test_disparate_impact() {
        // group a approves 4/5, group b approves 2/5
        let mut records = Vec::new();
        for i in 0..5 {
            records.push(record(i < 4, true, "a"));
            records.push(record(i < 2, true, "b"));
        }
        let fairness = fairness_metrics(&records);
        assert_eq!(fairness.len(), 1);
        assert_relative_eq!(fairness[0].disparate_impact_ratio, 0.5);
        assert_relative_eq!(fairness[0].equal_opportunity_difference, 0.4);

        let bias = assess_bias(&fairness);
        assert_eq!(bias.level, BiasLevel::High);
        assert_eq!(bias.flagged_attributes, vec!["region".to_string()]);
    }

    #[test]
    fn test_group_without_actual_positives() {
        let mut records = Vec::new();
        for _ in 0..10 {
            records.push(record(true, true, "a"));
            records.push(record(true, false, "b"));
        }
        let fairness = fairness_metrics(&records);

        let b = fairness[0].groups.iter().find(|g| g.group == "b").unwrap();
        assert_eq!(b.true_positive_rate, None);
        assert_eq!(fairness[0].equal_opportunity_difference, 0.0);
        assert_relative_eq!(fairness[0].disparate_impact_ratio, 1.0);

        let metrics = classification_metrics(&records);
        let checks = create_default_compliance_engine().evaluate(&ComplianceContext {
            metrics: &metrics,
            fairness: &fairness,
        });
        let equal_opportunity = checks.iter().find(|c| c.rule_name == "equal_opportunity").unwrap();
        assert!(equal_opportunity.passed);
        assert_eq!(assess_bias(&fairness).level, BiasLevel::Low);
    }

    #[test]
    fn test_engine_flags_failures() {
        let records: Vec<TestRecord> = (0..10).map(|i| record(i % 2 == 0, true, "a")).collect();
        let metrics = classification_metrics(&records);
        let fairness = fairness_metrics(&records);
        let checks = create_default_compliance_engine().evaluate(&ComplianceContext {
            metrics: &metrics,
            fairness: &fairness,
        });

        let by_name = |name: &str| checks.iter().find(|c| c.rule_name == name).unwrap();
        assert!(!by_name("minimum_sample_size").passed);
        assert!(!by_name("minimum_accuracy").passed);
        assert_eq!(by_name("minimum_accuracy").severity, Severity::High);
        assert!(by_name("four_fifths_rule").passed);
    }

    #[test]
    fn test_no_sensitive_attributes() {
        let bias = assess_bias(&[]);
        assert_eq!(bias.level, BiasLevel::Low);
        assert_eq!(bias.notes.len(), 1);
    }
}
