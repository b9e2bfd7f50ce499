//! External collaborators of the worker: text extraction and the analysis pipeline
//!
//! Both are opaque to the job subsystem and sit behind traits so tests can
//! swap in stubs.

pub mod extract;
pub mod ollama;
pub mod prompt;

pub use extract::DocumentTextExtractor;
pub use ollama::OllamaAnalyzer;
pub use prompt::PromptBuilder;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::AnalyzerConfig;

/// Failure of one analysis attempt, classified for the retry policy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    /// May succeed if the whole task is run again
    #[error("{0}")]
    Retryable(String),
    /// Will fail the same way on every attempt
    #[error("{0}")]
    Permanent(String),
}

impl AnalysisError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AnalysisError::Retryable(_))
    }
}

/// Turns uploaded bytes into plain text
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, filename: &str, data: &[u8]) -> Result<String, AnalysisError>;
}

/// The document analysis pipeline
///
/// Implementations:
/// - `OllamaAnalyzer`: local Ollama server
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Produce a report answering `query` about `document_text`
    async fn analyze(&self, document_text: &str, query: &str) -> Result<String, AnalysisError>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}

/// Per-process collaborators, built once at worker startup and passed to every task
#[derive(Clone)]
pub struct WorkerContext {
    extractor: Arc<dyn TextExtractor>,
    analyzer: Arc<dyn Analyzer>,
}

impl WorkerContext {
    pub fn new(extractor: Arc<dyn TextExtractor>, analyzer: Arc<dyn Analyzer>) -> Self {
        Self {
            extractor,
            analyzer,
        }
    }

    /// Default collaborators: PDF/text extraction and an Ollama-backed analyzer
    pub fn from_config(config: &AnalyzerConfig) -> crate::error::Result<Self> {
        let analyzer = OllamaAnalyzer::new(&config.llm)?;
        tracing::info!(
            "Analyzer initialized ({} at {}, model {})",
            analyzer.name(),
            config.llm.base_url,
            config.llm.model
        );
        Ok(Self::new(
            Arc::new(DocumentTextExtractor::new()),
            Arc::new(analyzer),
        ))
    }

    pub fn extractor(&self) -> &Arc<dyn TextExtractor> {
        &self.extractor
    }

    pub fn analyzer(&self) -> &Arc<dyn Analyzer> {
        &self.analyzer
    }
}
