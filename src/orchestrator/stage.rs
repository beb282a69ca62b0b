//! Uniform stage execution and outcome recording

use crate::models::{StageOutcome, StageStatus};
use crate::Result;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Instant;
use tracing::{debug, warn};

/// Runs stages one after another and records `{status, durationMs, error}`
/// for each. A failing stage never stops the next one from running.
#[derive(Debug, Default)]
pub struct StageRunner {
    outcomes: BTreeMap<String, StageOutcome>,
}

impl StageRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `stage` when `enabled`, returning its value on success.
    ///
    /// The future is not polled when the stage is disabled.
    pub async fn run<T, F>(&mut self, name: &str, enabled: bool, stage: F) -> Option<T>
    where
        F: Future<Output = Result<(T, serde_json::Value)>>,
    {
        if !enabled {
            debug!(stage = name, "Stage skipped");
            self.record(name, StageStatus::Skipped, 0, None, serde_json::Value::Null);
            return None;
        }

        let start = Instant::now();
        let result = stage.await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok((value, details)) => {
                debug!(stage = name, duration_ms, "Stage succeeded");
                self.record(name, StageStatus::Success, duration_ms, None, details);
                Some(value)
            }
            Err(e) => {
                warn!(stage = name, duration_ms, error = %e, "Stage failed");
                self.record(
                    name,
                    StageStatus::Error,
                    duration_ms,
                    Some(e.to_string()),
                    serde_json::Value::Null,
                );
                None
            }
        }
    }

    fn record(
        &mut self,
        name: &str,
        status: StageStatus,
        duration_ms: u64,
        error: Option<String>,
        details: serde_json::Value,
    ) {
        self.outcomes.insert(
            name.to_string(),
            StageOutcome {
                status,
                duration_ms,
                error,
                details,
            },
        );
    }

    pub fn failed(&self) -> Vec<(&str, &StageOutcome)> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.status == StageStatus::Error)
            .map(|(name, o)| (name.as_str(), o))
            .collect()
    }

    pub fn into_outcomes(self) -> BTreeMap<String, StageOutcome> {
        self.outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    #[tokio::test]
    async fn test_records_each_status() {
        let mut runner = StageRunner::new();

        let ok = runner
            .run("first", true, async { Ok::<_, PipelineError>((5, serde_json::json!({"count": 5}))) })
            .await;
        let err: Option<()> = runner
            .run("second", true, async {
                Err::<((), serde_json::Value), _>(PipelineError::SourceUnavailable("down".into()))
            })
            .await;
        let skipped: Option<()> = runner
            .run("third", false, async { Ok::<_, PipelineError>(((), serde_json::Value::Null)) })
            .await;

        assert_eq!(ok, Some(5));
        assert!(err.is_none());
        assert!(skipped.is_none());
        assert_eq!(runner.failed().len(), 1);

        let outcomes = runner.into_outcomes();
        assert_eq!(outcomes["first"].status, StageStatus::Success);
        assert_eq!(outcomes["first"].details["count"], 5);
        assert_eq!(outcomes["second"].status, StageStatus::Error);
        assert!(outcomes["second"].error.as_deref().unwrap().contains("down"));
        assert_eq!(outcomes["third"].status, StageStatus::Skipped);
    }
}
