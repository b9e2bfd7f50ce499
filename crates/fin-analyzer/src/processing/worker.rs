//! Background worker running the analysis task state machine

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::Instrument;

use crate::analysis::{AnalysisError, WorkerContext};
use crate::config::WorkerConfig;
use crate::error::Error;
use crate::storage::{DocumentStore, StorageError};
use crate::types::{AnalysisReport, JobMessage, ProgressMeta, StateUpdate};

use super::job_queue::{Broker, Delivery};

/// How a delivery ended from the worker's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// SUCCESS recorded and document cleaned up
    Succeeded,
    /// FAILURE recorded and document cleaned up
    Failed,
    /// Another delivery of the same job already finished it
    AlreadyFinished,
    /// The job record could not be read or the terminal state could not be
    /// written; the delivery must not be acked
    Unrecorded,
}

impl JobOutcome {
    pub fn should_ack(&self) -> bool {
        !matches!(self, JobOutcome::Unrecorded)
    }
}

/// Runs one job at a time: claim, process (with retries), clean up, ack
pub struct AnalysisWorker {
    id: usize,
    broker: Arc<dyn Broker>,
    documents: Arc<dyn DocumentStore>,
    context: WorkerContext,
    config: WorkerConfig,
}

impl AnalysisWorker {
    pub fn new(
        id: usize,
        broker: Arc<dyn Broker>,
        documents: Arc<dyn DocumentStore>,
        context: WorkerContext,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id,
            broker,
            documents,
            context,
            config,
        }
    }

    /// Claim and process jobs until `shutdown` turns true
    ///
    /// A job in progress is always finished before the worker exits.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Worker {} started: {} attempts max, {}s retry delay, broker {}",
            self.id,
            self.config.max_attempts(),
            self.config.retry_delay_secs,
            self.broker.name()
        );

        while !*shutdown.borrow() {
            let delivery = match self.broker.claim(self.config.claim_wait()).await {
                Ok(Some(delivery)) => delivery,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!("Worker {} failed to claim a job: {}", self.id, e);
                    tokio::time::sleep(self.config.claim_wait()).await;
                    continue;
                }
            };

            let job_id = delivery.message.job_id;
            let span = tracing::info_span!("analysis_job", worker = self.id, %job_id);
            let processed = AssertUnwindSafe(self.process(&delivery).instrument(span))
                .catch_unwind()
                .await;

            match processed {
                Ok(outcome) if outcome.should_ack() => {
                    if let Err(e) = self.broker.ack(&delivery).await {
                        tracing::error!("Failed to acknowledge job {}: {}", job_id, e);
                    }
                }
                Ok(_) => {
                    tracing::warn!("Job {} left unacknowledged for redelivery", job_id);
                }
                Err(_) => {
                    tracing::error!(
                        "Worker {} panicked while processing job {}; leaving it for redelivery",
                        self.id,
                        job_id
                    );
                }
            }
        }

        tracing::info!("Worker {} stopped", self.id);
    }

    /// Drive one delivery to a terminal state
    pub async fn process(&self, delivery: &Delivery) -> JobOutcome {
        let message = &delivery.message;
        let job_id = message.job_id;
        let max_attempts = self.config.max_attempts();

        let mut attempt = match self.broker.lookup(job_id).await {
            Ok(Some(record)) if record.is_terminal() => {
                tracing::info!(
                    "Job {} is already {}; skipping redelivered message",
                    job_id,
                    record.state
                );
                // The finishing delivery may have died before its cleanup
                self.cleanup(message).await;
                return JobOutcome::AlreadyFinished;
            }
            Ok(Some(record)) => record.attempt_count,
            Ok(None) => 0,
            Err(e) => {
                // Without the stored attempt count the retry budget is unknown
                tracing::error!("Could not read record for job {}: {}", job_id, e);
                return JobOutcome::Unrecorded;
            }
        };

        let outcome = loop {
            if attempt >= max_attempts {
                let error = format!("Retry budget exhausted after {} attempts", attempt);
                break self.finish(job_id, StateUpdate::Failed { error }).await;
            }
            attempt += 1;

            let meta = if attempt == 1 {
                ProgressMeta::new("Analysis pipeline started", message.document_ref.as_str())
            } else {
                ProgressMeta::new(
                    format!("Retrying analysis (attempt {} of {})", attempt, max_attempts),
                    message.document_ref.as_str(),
                )
            };
            match self
                .broker
                .report(job_id, StateUpdate::Started { attempt, meta })
                .await
            {
                Ok(_) => {}
                Err(Error::InvalidTransition { from, .. }) => {
                    tracing::info!("Job {} was finished elsewhere ({})", job_id, from);
                    break JobOutcome::AlreadyFinished;
                }
                Err(e) => tracing::warn!("Failed to record start of job {}: {}", job_id, e),
            }

            tracing::info!("Attempt {}/{} for '{}'", attempt, max_attempts, message.filename);
            match self.run_attempt(message).await {
                Ok(analysis) => {
                    let report = AnalysisReport::new(message.query.clone(), analysis);
                    break self.finish(job_id, StateUpdate::Succeeded(report)).await;
                }
                Err(e) => {
                    let retry = e.is_retryable() || self.config.retry_permanent_failures;
                    if retry && attempt < max_attempts {
                        tracing::warn!(
                            "Attempt {}/{} failed: {}; retrying in {}s",
                            attempt,
                            max_attempts,
                            e,
                            self.config.retry_delay_secs
                        );
                        tokio::time::sleep(self.config.retry_delay()).await;
                        continue;
                    }
                    tracing::error!("Attempt {}/{} failed: {}", attempt, max_attempts, e);
                    break self
                        .finish(job_id, StateUpdate::Failed { error: e.to_string() })
                        .await;
                }
            }
        };

        if outcome != JobOutcome::Unrecorded {
            self.cleanup(message).await;
        }
        outcome
    }

    /// Read, extract and analyze; one attempt of the task body
    async fn run_attempt(&self, message: &JobMessage) -> Result<String, AnalysisError> {
        let data = self
            .documents
            .read(&message.document_ref)
            .await
            .map_err(|e| match e {
                StorageError::NotFound(_) | StorageError::InvalidRef(_) => {
                    AnalysisError::permanent(e.to_string())
                }
                _ => AnalysisError::retryable(e.to_string()),
            })?;

        let text = self
            .context
            .extractor()
            .extract_text(&message.filename, &data)
            .await?;

        let analyzer = self.context.analyzer();
        let analysis = analyzer.analyze(&text, &message.query);
        match self.config.analysis_timeout() {
            Some(limit) => timeout(limit, analysis).await.map_err(|_| {
                AnalysisError::retryable(format!(
                    "Analysis timed out after {}s ({})",
                    limit.as_secs(),
                    analyzer.name()
                ))
            })?,
            None => analysis.await,
        }
    }

    /// Record the terminal state
    async fn finish(&self, job_id: uuid::Uuid, update: StateUpdate) -> JobOutcome {
        let succeeded = matches!(update, StateUpdate::Succeeded(_));
        match self.broker.report(job_id, update).await {
            Ok(record) => {
                tracing::info!("Job {} finished: {}", job_id, record.state);
                if succeeded {
                    JobOutcome::Succeeded
                } else {
                    JobOutcome::Failed
                }
            }
            Err(Error::InvalidTransition { from, .. }) => {
                tracing::info!("Job {} was finished elsewhere ({})", job_id, from);
                JobOutcome::AlreadyFinished
            }
            Err(e) => {
                tracing::error!("Failed to record final state of job {}: {}", job_id, e);
                JobOutcome::Unrecorded
            }
        }
    }

    /// Best-effort removal of the job's document; never changes job state
    async fn cleanup(&self, message: &JobMessage) {
        match self.documents.delete(&message.document_ref).await {
            Ok(()) => tracing::debug!("Removed {}", message.document_ref),
            Err(StorageError::NotFound(_)) => {
                tracing::debug!("{} was already removed", message.document_ref)
            }
            Err(e) => tracing::warn!("Failed to remove {}: {}", message.document_ref, e),
        }
    }
}
