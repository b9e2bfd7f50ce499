//! Broker contract: a durable message channel plus a result backend keyed by job id

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{JobMessage, JobRecord, JobState, StateUpdate};

/// A claimed message; it stays in flight until acknowledged
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-specific handle used to acknowledge the delivery
    pub tag: String,
    pub message: JobMessage,
}

/// Job queue with at-least-once delivery
///
/// Implementations:
/// - `MemoryBroker`: single process, in-memory
/// - `RedisBroker`: Redis lists and keys (feature `redis`)
#[async_trait]
pub trait Broker: Send + Sync {
    /// Queue a job and record it as PENDING
    async fn enqueue(&self, message: JobMessage) -> Result<Uuid>;

    /// Wait up to `wait` for a message; `None` when nothing arrived
    async fn claim(&self, wait: Duration) -> Result<Option<Delivery>>;

    /// Acknowledge a fully processed delivery so it is never redelivered
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Apply a state update to the job's record and return the new record
    async fn report(&self, job_id: Uuid, update: StateUpdate) -> Result<JobRecord>;

    /// Current record, or `None` for unknown or expired jobs
    async fn lookup(&self, job_id: Uuid) -> Result<Option<JobRecord>>;

    /// Return deliveries claimed longer than `older_than` ago to the queue
    async fn requeue_stale(&self, older_than: Duration) -> Result<usize>;

    /// Drop terminal records past their retention window
    async fn purge_expired(&self) -> Result<usize>;

    /// Queue statistics
    async fn stats(&self) -> Result<QueueStats>;

    /// Get broker name for logging
    fn name(&self) -> &str;
}

/// Queue statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub backend: String,
    /// Messages waiting to be claimed
    pub queued: usize,
    /// Claimed, not yet acknowledged
    pub in_flight: usize,
    /// Record counts by state, when the backend can enumerate them
    pub records: Option<RecordStats>,
}

/// Result-backend record counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordStats {
    pub pending: usize,
    pub started: usize,
    pub success: usize,
    pub failure: usize,
}

impl RecordStats {
    pub fn count(&mut self, state: JobState) {
        match state {
            JobState::Pending => self.pending += 1,
            JobState::Started => self.started += 1,
            JobState::Success => self.success += 1,
            JobState::Failure => self.failure += 1,
        }
    }
}
