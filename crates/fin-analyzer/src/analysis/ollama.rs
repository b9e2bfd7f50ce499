//! Ollama-backed analysis pipeline
//!
//! Makes a single non-streaming generate call per attempt; retries are the
//! worker's decision, driven by the error classification below.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{Error, Result};

use super::prompt::PromptBuilder;
use super::{AnalysisError, Analyzer};

/// Ollama API client for document analysis
pub struct OllamaAnalyzer {
    /// HTTP client
    client: Client,
    /// Configuration
    config: LlmConfig,
}

#[derive(Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaAnalyzer {
    /// Create a new Ollama analyzer
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(5)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Server errors and rate limiting are worth another attempt; other
    /// client errors mean the request itself is wrong
    fn classify_status(status: StatusCode, body: &str) -> AnalysisError {
        let message = format!("Generation failed: HTTP {} - {}", status, body);
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            AnalysisError::Retryable(message)
        } else {
            AnalysisError::Permanent(message)
        }
    }
}

#[async_trait]
impl Analyzer for OllamaAnalyzer {
    async fn analyze(&self, document_text: &str, query: &str) -> std::result::Result<String, AnalysisError> {
        let url = format!("{}/api/generate", self.config.base_url);
        let request = GenerateRequest {
            model: self.config.model.clone(),
            prompt: PromptBuilder::build_analysis_prompt(
                document_text,
                query,
                self.config.max_document_chars,
            ),
            stream: false,
            options: GenerateOptions {
                temperature: self.config.temperature,
            },
        };

        tracing::info!("Generating analysis with model: {}", self.config.model);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AnalysisError::retryable(format!("Generation request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        let generated: GenerateResponse = response.json().await.map_err(|e| {
            AnalysisError::permanent(format!("Failed to parse generation response: {}", e))
        })?;

        let analysis = generated.response.trim().to_string();
        if analysis.is_empty() {
            return Err(AnalysisError::retryable("Model returned an empty analysis"));
        }
        Ok(analysis)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
