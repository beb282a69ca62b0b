//! Forecast projection strategies

/// One projected step with its confidence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub value: f64,
    pub confidence: f64,
}

/// Trait for projecting a monthly series forward
pub trait ForecastModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Project `horizon` steps past the end of `history`.
    ///
    /// Implementations must return exactly `horizon` projections whose
    /// confidence lies in [0, 1] and never increases with the step.
    fn project(&self, history: &[f64], horizon: usize) -> Vec<Projection>;
}

/// Linear trend fitted on a trailing window, damped as it extends
#[derive(Debug, Clone)]
pub struct DampedTrendModel {
    pub window: usize,
    /// Per-step damping of the trend, in (0, 1]
    pub damping: f64,
    /// Per-step multiplicative confidence decay, in (0, 1]
    pub decay: f64,
    pub max_confidence: f64,
    pub min_confidence: f64,
}

impl Default for DampedTrendModel {
    fn default() -> Self {
        Self {
            window: 12,
            damping: 0.9,
            decay: 0.95,
            max_confidence: 0.95,
            min_confidence: 0.05,
        }
    }
}

/// Least-squares slope and intercept of `values` against their index
fn linear_fit(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        cov += dx * (y - mean_y);
        var += dx * dx;
    }

    let slope = if var > 0.0 { cov / var } else { 0.0 };
    (slope, mean_y - slope * mean_x)
}

impl ForecastModel for DampedTrendModel {
    fn name(&self) -> &'static str {
        "damped_trend"
    }

    fn project(&self, history: &[f64], horizon: usize) -> Vec<Projection> {
        if history.len() < 2 {
            return FlatModel::default().project(history, horizon);
        }

        let start = history.len().saturating_sub(self.window.max(2));
        let window = &history[start..];
        let (slope, intercept) = linear_fit(window);

        let residual_var = window
            .iter()
            .enumerate()
            .map(|(i, y)| (y - (intercept + slope * i as f64)).powi(2))
            .sum::<f64>()
            / window.len() as f64;
        let mean = window.iter().sum::<f64>() / window.len() as f64;
        let dispersion = if mean.abs() > f64::EPSILON {
            residual_var.sqrt() / mean.abs()
        } else {
            1.0
        };

        // Noisier fits start from a lower confidence
        let base = (self.max_confidence / (1.0 + 10.0 * dispersion))
            .clamp(self.min_confidence, self.max_confidence);
        let damping = self.damping.clamp(0.0, 1.0);
        let decay = self.decay.clamp(0.0, 1.0);

        let last = history[history.len() - 1];
        let mut projections = Vec::with_capacity(horizon);
        let mut cumulative = 0.0;
        let mut phi = 1.0;
        let mut confidence = base;

        for _ in 0..horizon {
            phi *= damping;
            cumulative += phi;
            projections.push(Projection {
                value: (last + slope * cumulative).max(0.0),
                confidence: confidence.clamp(0.0, 1.0),
            });
            confidence = (confidence * decay).max(self.min_confidence.min(confidence));
        }

        projections
    }
}

/// Carries the last value forward; used when history is too short to fit
#[derive(Debug, Clone)]
pub struct FlatModel {
    pub baseline: f64,
    pub initial_confidence: f64,
    pub decay: f64,
}

impl Default for FlatModel {
    fn default() -> Self {
        Self {
            baseline: 0.0,
            initial_confidence: 0.5,
            decay: 0.9,
        }
    }
}

impl FlatModel {
    pub fn with_baseline(baseline: f64) -> Self {
        Self {
            baseline,
            ..Default::default()
        }
    }
}

impl ForecastModel for FlatModel {
    fn name(&self) -> &'static str {
        "flat"
    }

    fn project(&self, history: &[f64], horizon: usize) -> Vec<Projection> {
        let value = history.last().copied().unwrap_or(self.baseline);
        let decay = self.decay.clamp(0.0, 1.0);
        let mut confidence = self.initial_confidence.clamp(0.0, 1.0);

        (0..horizon)
            .map(|_| {
                let projection = Projection { value, confidence };
                confidence *= decay;
                projection
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_confidence_non_increasing(projections: &[Projection]) {
        for p in projections {
            assert!((0.0..=1.0).contains(&p.confidence));
        }
        for w in projections.windows(2) {
            assert!(w[1].confidence <= w[0].confidence);
        }
    }

    #[test]
    fn test_linear_fit() {
        let (slope, intercept) = linear_fit(&[1.0, 3.0, 5.0, 7.0]);
        assert_relative_eq!(slope, 2.0);
        assert_relative_eq!(intercept, 1.0);
    }

    #[test]
    fn test_damped_trend_follows_direction() {
        let history: Vec<f64> = (0..12).map(|i| 7.0 - 0.05 * i as f64).collect();
        let projections = DampedTrendModel::default().project(&history, 24);

        assert_eq!(projections.len(), 24);
        assert!(projections[0].value < history[11]);
        assert!(projections[23].value < projections[0].value);
        assert_confidence_non_increasing(&projections);
    }

    #[test]
    fn test_noisy_history_lowers_confidence() {
        let smooth: Vec<f64> = (0..12).map(|i| 100.0 + i as f64).collect();
        let noisy: Vec<f64> = (0..12)
            .map(|i| 100.0 + if i % 2 == 0 { 15.0 } else { -15.0 })
            .collect();

        let model = DampedTrendModel::default();
        let a = model.project(&smooth, 1)[0].confidence;
        let b = model.project(&noisy, 1)[0].confidence;
        assert!(a > b);
    }

    #[test]
    fn test_short_history_falls_back_to_flat() {
        let projections = DampedTrendModel::default().project(&[6.2], 6);
        assert_eq!(projections.len(), 6);
        assert!(projections.iter().all(|p| p.value == 6.2));
        assert_confidence_non_increasing(&projections);
    }

    #[test]
    fn test_flat_model_uses_baseline_without_history() {
        let projections = FlatModel::with_baseline(5.5).project(&[], 3);
        assert!(projections.iter().all(|p| p.value == 5.5));
        assert_relative_eq!(projections[0].confidence, 0.5);
        assert_confidence_non_increasing(&projections);
    }
}
