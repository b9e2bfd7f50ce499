//! Job queue, result backend and the workers that drain them

mod job_queue;
mod memory;
mod pool;
#[cfg(feature = "redis")]
mod redis;
mod worker;

pub use job_queue::{Broker, Delivery, QueueStats, RecordStats};
pub use memory::MemoryBroker;
pub use pool::WorkerPool;
#[cfg(feature = "redis")]
pub use self::redis::RedisBroker;
pub use worker::{AnalysisWorker, JobOutcome};

use std::sync::Arc;

use crate::config::{BrokerBackend, BrokerConfig};
use crate::error::Result;

/// Build the broker selected by configuration
pub async fn connect_broker(config: &BrokerConfig) -> Result<Arc<dyn Broker>> {
    match config.backend {
        BrokerBackend::Memory => {
            tracing::info!(
                "Using in-memory broker (results kept {}s)",
                config.result_ttl_secs
            );
            Ok(Arc::new(MemoryBroker::new(config.result_ttl())))
        }
        #[cfg(feature = "redis")]
        BrokerBackend::Redis => {
            let broker =
                RedisBroker::connect(&config.url, &config.namespace, config.result_ttl()).await?;
            Ok(Arc::new(broker))
        }
        #[cfg(not(feature = "redis"))]
        BrokerBackend::Redis => Err(crate::error::Error::Config(
            "Redis broker selected but the redis feature is not enabled".to_string(),
        )),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use std::time::Duration;
    use uuid::Uuid;

    use super::{Broker, Delivery, MemoryBroker, QueueStats};
    use crate::error::{Error, Result};
    use crate::types::{JobMessage, JobRecord, StateUpdate};

    /// Memory broker whose result backend cannot be read
    pub struct UnreadableBroker {
        pub inner: MemoryBroker,
    }

    impl UnreadableBroker {
        pub fn new() -> Self {
            Self {
                inner: MemoryBroker::new(Duration::from_secs(3600)),
            }
        }
    }

    #[async_trait]
    impl Broker for UnreadableBroker {
        async fn enqueue(&self, message: JobMessage) -> Result<Uuid> {
            self.inner.enqueue(message).await
        }

        async fn claim(&self, wait: Duration) -> Result<Option<Delivery>> {
            self.inner.claim(wait).await
        }

        async fn ack(&self, delivery: &Delivery) -> Result<()> {
            self.inner.ack(delivery).await
        }

        async fn report(&self, job_id: Uuid, update: StateUpdate) -> Result<JobRecord> {
            self.inner.report(job_id, update).await
        }

        async fn lookup(&self, _job_id: Uuid) -> Result<Option<JobRecord>> {
            Err(Error::broker("connection reset by peer"))
        }

        async fn requeue_stale(&self, older_than: Duration) -> Result<usize> {
            self.inner.requeue_stale(older_than).await
        }

        async fn purge_expired(&self) -> Result<usize> {
            self.inner.purge_expired().await
        }

        async fn stats(&self) -> Result<QueueStats> {
            self.inner.stats().await
        }

        fn name(&self) -> &str {
            "unreadable"
        }
    }
}
