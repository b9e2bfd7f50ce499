//! In-process broker and result backend

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{JobMessage, JobRecord, StateUpdate};

use super::job_queue::{Broker, Delivery, QueueStats, RecordStats};

struct InFlight {
    message: JobMessage,
    claimed_at: Instant,
}

struct StoredRecord {
    record: JobRecord,
    /// Set once the job is terminal
    expires_at: Option<Instant>,
}

impl StoredRecord {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Broker for a single process: API handlers and workers share one instance
pub struct MemoryBroker {
    /// Messages waiting to be claimed
    queue: Mutex<VecDeque<JobMessage>>,
    /// Wakes claimers when a message arrives
    notify: Notify,
    /// Claimed deliveries by tag
    in_flight: DashMap<String, InFlight>,
    /// Result backend
    records: DashMap<Uuid, StoredRecord>,
    next_tag: AtomicU64,
    result_ttl: Duration,
}

impl MemoryBroker {
    pub fn new(result_ttl: Duration) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            in_flight: DashMap::new(),
            records: DashMap::new(),
            next_tag: AtomicU64::new(1),
            result_ttl,
        }
    }

    /// Records held in memory, including expired ones not yet purged
    pub fn tracked_records(&self) -> usize {
        self.records.len()
    }

    fn push_back(&self, message: JobMessage) {
        self.queue.lock().push_back(message);
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<Delivery> {
        let message = self.queue.lock().pop_front()?;
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst).to_string();
        self.in_flight.insert(
            tag.clone(),
            InFlight {
                message: message.clone(),
                claimed_at: Instant::now(),
            },
        );
        Some(Delivery { tag, message })
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn enqueue(&self, message: JobMessage) -> Result<Uuid> {
        let job_id = message.job_id;
        self.records.entry(job_id).or_insert_with(|| StoredRecord {
            record: JobRecord::pending(job_id),
            expires_at: None,
        });
        self.push_back(message);
        tracing::debug!("Enqueued job {}", job_id);
        Ok(job_id)
    }

    async fn claim(&self, wait: Duration) -> Result<Option<Delivery>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(delivery) = self.try_pop() {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        if self.in_flight.remove(&delivery.tag).is_none() {
            tracing::warn!(
                "Ack for unknown delivery {} (job {}); it was probably requeued",
                delivery.tag,
                delivery.message.job_id
            );
        }
        Ok(())
    }

    async fn report(&self, job_id: Uuid, update: StateUpdate) -> Result<JobRecord> {
        let mut entry = self.records.entry(job_id).or_insert_with(|| StoredRecord {
            record: JobRecord::pending(job_id),
            expires_at: None,
        });
        entry.record.apply(update)?;
        if entry.record.is_terminal() {
            entry.expires_at = Some(Instant::now() + self.result_ttl);
        }
        Ok(entry.record.clone())
    }

    async fn lookup(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        let now = Instant::now();
        let found = self.records.get(&job_id).map(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.record.clone())
            }
        });

        match found {
            Some(Some(record)) => Ok(Some(record)),
            Some(None) => {
                self.records.remove_if(&job_id, |_, entry| entry.is_expired(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<usize> {
        let now = Instant::now();
        let stale: Vec<String> = self
            .in_flight
            .iter()
            .filter(|entry| now.duration_since(entry.claimed_at) >= older_than)
            .map(|entry| entry.key().clone())
            .collect();

        let mut requeued = 0;
        for tag in stale {
            if let Some((_, in_flight)) = self.in_flight.remove(&tag) {
                tracing::warn!(
                    "Redelivering job {} (delivery {} was never acknowledged)",
                    in_flight.message.job_id,
                    tag
                );
                self.queue.lock().push_front(in_flight.message);
                self.notify.notify_one();
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, entry| !entry.is_expired(now));
        let purged = before.saturating_sub(self.records.len());
        if purged > 0 {
            tracing::debug!("Purged {} expired job records", purged);
        }
        Ok(purged)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let now = Instant::now();
        let mut records = RecordStats::default();
        for entry in self.records.iter().filter(|e| !e.is_expired(now)) {
            records.count(entry.record.state);
        }

        Ok(QueueStats {
            backend: self.name().to_string(),
            queued: self.queue.lock().len(),
            in_flight: self.in_flight.len(),
            records: Some(records),
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}
