//! Gemini API client implementing `CompletionService`
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use super::{ChatRole, CompletionRequest, CompletionService};
use crate::error::PipelineError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

fn build_request(request: &CompletionRequest) -> GeminiRequest {
    let system_text: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(|m| m.content.as_str())
        .collect();

    let contents = request
        .messages
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .map(|m| Content {
            role: Some(match m.role {
                ChatRole::Assistant => "model".to_string(),
                _ => "user".to_string(),
            }),
            parts: vec![Part { text: m.content.clone() }],
        })
        .collect();

    GeminiRequest {
        contents,
        generation_config: GenerationConfig {
            temperature: request.temperature,
            top_p: 0.9,
            top_k: 40,
            max_output_tokens: request.max_tokens as i32,
            response_mime_type: "application/json".to_string(),
        },
        system_instruction: (!system_text.is_empty()).then(|| SystemInstruction {
            parts: vec![Part { text: system_text.join("\n\n") }],
        }),
    }
}

#[async_trait]
impl CompletionService for GeminiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(PipelineError::EnrichmentFailure(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!(
            "{}/{}:generateContent?key={}",
            self.base_url, request.model, self.api_key
        );

        info!(model = %request.model, "Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&build_request(request))
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                PipelineError::EnrichmentFailure(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(PipelineError::EnrichmentFailure(format!(
                "Gemini API error: {}",
                error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            PipelineError::EnrichmentFailure(format!("Gemini parse error: {}", e))
        })?;

        let candidate = gemini_response.candidates.first().ok_or_else(|| {
            PipelineError::EnrichmentFailure("No response from Gemini API".to_string())
        })?;

        let answer = candidate
            .content
            .parts
            .first()
            .ok_or_else(|| PipelineError::EnrichmentFailure("Empty response from Gemini".to_string()))?
            .text
            .clone();

        info!(
            finish_reason = candidate.finish_reason.as_deref().unwrap_or("unknown"),
            "Gemini response received"
        );

        Ok(answer)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
    response_mime_type: String,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Content,
    finish_reason: Option<String>,
}
