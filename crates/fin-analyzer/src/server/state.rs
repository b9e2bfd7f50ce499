//! Application state for the analysis server

use parking_lot::RwLock;
use std::sync::Arc;

use crate::config::AnalyzerConfig;
use crate::processing::Broker;
use crate::storage::DocumentStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Configuration
    config: AnalyzerConfig,
    /// Job queue and result backend
    broker: Arc<dyn Broker>,
    /// Upload storage shared with the workers
    documents: Arc<dyn DocumentStore>,
    /// Ready state
    ready: RwLock<bool>,
}

impl AppState {
    /// Create new application state
    ///
    /// Starts not ready; the caller flips readiness once workers are running.
    pub fn new(
        config: AnalyzerConfig,
        broker: Arc<dyn Broker>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        tracing::info!(
            "Application state initialized (broker: {}, documents: {})",
            broker.name(),
            documents.name()
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                broker,
                documents,
                ready: RwLock::new(false),
            }),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &AnalyzerConfig {
        &self.inner.config
    }

    /// Get the broker
    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.inner.broker
    }

    /// Get the document store
    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.inner.documents
    }

    /// Check if ready
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.read()
    }

    /// Set ready state
    pub fn set_ready(&self, ready: bool) {
        *self.inner.ready.write() = ready;
    }
}
