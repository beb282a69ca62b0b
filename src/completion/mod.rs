//! AI completion service boundary
//!
//! Completions only ever enrich agent output with rationale text. Every
//! payload is validated against `RationalePayload`; anything else falls back
//! to the caller's template.

use crate::error::PipelineError;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub mod gemini;
pub use gemini::GeminiClient;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Chat-completion style collaborator
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Completion service used when no provider is configured
pub struct DisabledCompletion;

#[async_trait]
impl CompletionService for DisabledCompletion {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        Err(PipelineError::EnrichmentFailure(
            "completion service not configured".to_string(),
        ))
    }
}

/// Expected JSON shape of every rationale completion
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RationalePayload {
    pub summary: String,
    #[serde(default)]
    pub key_factors: Vec<String>,
}

const MAX_SUMMARY_CHARS: usize = 1_200;

/// Strip code fences and validate a rationale payload
pub fn parse_rationale(raw: &str) -> Result<RationalePayload> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let payload: RationalePayload = serde_json::from_str(cleaned).map_err(|e| {
        PipelineError::EnrichmentFailure(format!("unparseable rationale payload: {}", e))
    })?;

    let summary = payload.summary.trim();
    if summary.is_empty() {
        return Err(PipelineError::EnrichmentFailure(
            "rationale summary is empty".to_string(),
        ));
    }
    if summary.chars().count() > MAX_SUMMARY_CHARS {
        return Err(PipelineError::EnrichmentFailure(
            "rationale summary exceeds length limit".to_string(),
        ));
    }

    Ok(RationalePayload {
        summary: summary.to_string(),
        key_factors: payload
            .key_factors
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .take(5)
            .collect(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rationale {
    pub text: String,
    /// False when the template fallback was used
    pub generated: bool,
}

const RATIONALE_INSTRUCTIONS: &str = r#"You explain mortgage analytics to loan officers.
Respond with ONLY valid JSON of the form:
{"summary": "<two sentences>", "keyFactors": ["<factor>", "..."]}"#;

/// Ask the completion service for rationale text, falling back to `fallback`
pub async fn enrich_rationale(
    service: &dyn CompletionService,
    model: &str,
    prompt: &str,
    fallback: String,
) -> Rationale {
    let request = CompletionRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage::system(RATIONALE_INSTRUCTIONS),
            ChatMessage::user(prompt),
        ],
        temperature: 0.2,
        max_tokens: 400,
    };

    let parsed = match service.complete(&request).await {
        Ok(raw) => parse_rationale(&raw),
        Err(e) => Err(e),
    };

    match parsed {
        Ok(payload) => {
            debug!(factors = payload.key_factors.len(), "Rationale generated");
            let text = if payload.key_factors.is_empty() {
                payload.summary
            } else {
                format!("{} Key factors: {}.", payload.summary, payload.key_factors.join(", "))
            };
            Rationale { text, generated: true }
        }
        Err(e) => {
            warn!(error = %e, "Rationale enrichment failed, using template");
            Rationale { text: fallback, generated: false }
        }
    }
}
