//! Alert delivery
//!
//! Delivery is fire-and-forget from the pipeline's perspective: `dispatch`
//! logs failures and never returns them.

use crate::error::PipelineError;
use crate::models::Alert;
use crate::Result;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Trait for an alert sink
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<()>;
}

/// Deliver an alert, logging rather than propagating failures
pub async fn dispatch(notifier: &dyn Notifier, alert: &Alert) {
    if let Err(e) = notifier.notify(alert).await {
        warn!(
            alert_id = %alert.id,
            alert_type = ?alert.alert_type,
            error = %e,
            "Alert delivery failed"
        );
    }
}

/// Writes alerts to the tracing log
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        info!(
            alert_id = %alert.id,
            alert_type = ?alert.alert_type,
            severity = ?alert.severity,
            metadata = %alert.metadata,
            "{}",
            alert.message
        );
        Ok(())
    }
}

/// Keeps delivered alerts in memory
pub struct InMemoryNotifier {
    sent: Arc<RwLock<Vec<Alert>>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn sent(&self) -> Vec<Alert> {
        self.sent.read().await.clone()
    }
}

impl Default for InMemoryNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        self.sent.write().await.push(alert.clone());
        Ok(())
    }
}

/// Posts alerts as JSON to a webhook
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .map_err(|e| PipelineError::NotificationError(format!("Webhook request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::NotificationError(format!(
                "Webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertType, Severity};

    struct BrokenNotifier;

    #[async_trait::async_trait]
    impl Notifier for BrokenNotifier {
        async fn notify(&self, _alert: &Alert) -> Result<()> {
            Err(PipelineError::NotificationError("smtp down".to_string()))
        }
    }

    fn alert() -> Alert {
        Alert::new(
            AlertType::RateDrop,
            Severity::Medium,
            "Rates dropped",
            serde_json::json!({"drop": 0.6}),
        )
    }

    #[tokio::test]
    async fn test_in_memory_notifier_records() {
        let notifier = InMemoryNotifier::new();
        dispatch(&notifier, &alert()).await;
        assert_eq!(notifier.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_swallows_failures() {
        // Must return normally even though delivery fails
        dispatch(&BrokenNotifier, &alert()).await;
    }
}
