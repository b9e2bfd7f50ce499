//! Redis-backed broker for running the API and workers as separate processes
//!
//! Layout under the configured namespace:
//! - `{ns}:queue`       list of pending messages (LPUSH in, LMOVE out)
//! - `{ns}:processing`  list of claimed, unacknowledged messages
//! - `{ns}:claims`      sorted set of claimed payloads scored by claim time (ms)
//! - `{ns}:job:{id}`    JSON job record; terminal records carry an EX ttl
//!
//! Moves between the lists and the claim index run as Lua scripts so a
//! message is always reachable from either the queue or the claim index.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{JobMessage, JobRecord, StateUpdate};

use super::job_queue::{Broker, Delivery, QueueStats};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// KEYS: queue, processing, claims. ARGV: claim time (ms)
const CLAIM_SCRIPT: &str = r"
local payload = redis.call('LMOVE', KEYS[1], KEYS[2], 'RIGHT', 'LEFT')
if payload then
    redis.call('ZADD', KEYS[3], ARGV[1], payload)
end
return payload
";

/// KEYS: queue, processing, claims. ARGV: cutoff (ms)
const REQUEUE_SCRIPT: &str = r"
local stale = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', ARGV[1])
local moved = 0
for _, payload in ipairs(stale) do
    redis.call('ZREM', KEYS[3], payload)
    if redis.call('LREM', KEYS[2], 1, payload) > 0 then
        redis.call('RPUSH', KEYS[1], payload)
        moved = moved + 1
    end
end
return moved
";

pub struct RedisBroker {
    conn: MultiplexedConnection,
    namespace: String,
    result_ttl: Duration,
    claim_script: redis::Script,
    requeue_script: redis::Script,
}

impl RedisBroker {
    /// Connect to `url` and verify the server answers
    pub async fn connect(url: &str, namespace: &str, result_ttl: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Config(format!("Invalid broker URL {}: {}", url, e)))?;
        let mut conn = client.get_multiplexed_async_connection().await?;

        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        tracing::info!("Connected to Redis broker at {} ({})", url, pong);

        Ok(Self {
            conn,
            namespace: namespace.to_string(),
            result_ttl,
            claim_script: redis::Script::new(CLAIM_SCRIPT),
            requeue_script: redis::Script::new(REQUEUE_SCRIPT),
        })
    }

    fn queue_key(&self) -> String {
        format!("{}:queue", self.namespace)
    }

    fn processing_key(&self) -> String {
        format!("{}:processing", self.namespace)
    }

    fn claims_key(&self) -> String {
        format!("{}:claims", self.namespace)
    }

    fn record_key(&self, job_id: &Uuid) -> String {
        format!("{}:job:{}", self.namespace, job_id)
    }

    async fn write_record(&self, record: &JobRecord) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(record)?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.record_key(&record.job_id)).arg(payload);
        if record.is_terminal() {
            cmd.arg("EX").arg(self.result_ttl.as_secs().max(1));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn read_record(&self, job_id: &Uuid) -> Result<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = redis::cmd("GET")
            .arg(self.record_key(job_id))
            .query_async(&mut conn)
            .await?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(Error::from))
            .transpose()
    }

    /// Move one message from the queue to the processing list
    async fn try_claim(&self) -> Result<Option<Delivery>> {
        let mut conn = self.conn.clone();
        loop {
            let payload: Option<String> = self
                .claim_script
                .key(self.queue_key())
                .key(self.processing_key())
                .key(self.claims_key())
                .arg(chrono::Utc::now().timestamp_millis())
                .invoke_async(&mut conn)
                .await?;
            let Some(payload) = payload else {
                return Ok(None);
            };

            match serde_json::from_str::<JobMessage>(&payload) {
                Ok(message) => return Ok(Some(Delivery { tag: payload, message })),
                Err(e) => {
                    tracing::error!("Dropping undecodable broker message: {}", e);
                    self.forget(&payload).await?;
                }
            }
        }
    }

    /// Remove a payload from the processing list and the claim index
    async fn forget(&self, payload: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let (removed, _): (i64, i64) = redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(self.processing_key())
            .arg(1)
            .arg(payload)
            .cmd("ZREM")
            .arg(self.claims_key())
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn enqueue(&self, message: JobMessage) -> Result<Uuid> {
        let job_id = message.job_id;
        self.write_record(&JobRecord::pending(job_id)).await?;

        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(&message)?;
        let _: i64 = redis::cmd("LPUSH")
            .arg(self.queue_key())
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        tracing::debug!("Enqueued job {} on {}", job_id, self.queue_key());
        Ok(job_id)
    }

    async fn claim(&self, wait: Duration) -> Result<Option<Delivery>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(delivery) = self.try_claim().await? {
                return Ok(Some(delivery));
            }
            if tokio::time::Instant::now() + POLL_INTERVAL > deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        if self.forget(&delivery.tag).await? == 0 {
            tracing::warn!(
                "Ack for job {} found no in-flight entry; it was probably requeued",
                delivery.message.job_id
            );
        }
        Ok(())
    }

    async fn report(&self, job_id: Uuid, update: StateUpdate) -> Result<JobRecord> {
        // Only the worker holding the delivery writes, so read-modify-write is enough
        let mut record = self
            .read_record(&job_id)
            .await?
            .unwrap_or_else(|| JobRecord::pending(job_id));
        record.apply(update)?;
        self.write_record(&record).await?;
        Ok(record)
    }

    async fn lookup(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        self.read_record(&job_id).await
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<usize> {
        let mut conn = self.conn.clone();
        let cutoff = chrono::Utc::now().timestamp_millis() - older_than.as_millis() as i64;
        let requeued: usize = self
            .requeue_script
            .key(self.queue_key())
            .key(self.processing_key())
            .key(self.claims_key())
            .arg(cutoff)
            .invoke_async(&mut conn)
            .await?;
        if requeued > 0 {
            tracing::warn!("Redelivering {} unacknowledged job(s)", requeued);
        }
        Ok(requeued)
    }

    async fn purge_expired(&self) -> Result<usize> {
        // Redis expires terminal records on its own
        Ok(0)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let mut conn = self.conn.clone();
        let queued: usize = redis::cmd("LLEN")
            .arg(self.queue_key())
            .query_async(&mut conn)
            .await?;
        let in_flight: usize = redis::cmd("LLEN")
            .arg(self.processing_key())
            .query_async(&mut conn)
            .await?;

        Ok(QueueStats {
            backend: self.name().to_string(),
            queued,
            in_flight,
            records: None,
        })
    }

    fn name(&self) -> &str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnalysisReport, JobState, ProgressMeta};

    /// Broker on a fresh namespace, or None when REDIS_URL is unset
    async fn broker(result_ttl: Duration) -> Option<RedisBroker> {
        let Ok(url) = std::env::var("REDIS_URL") else {
            eprintln!("REDIS_URL not set; skipping");
            return None;
        };
        let namespace = format!("fin-analyzer-test-{}", Uuid::new_v4());
        Some(RedisBroker::connect(&url, &namespace, result_ttl).await.unwrap())
    }

    async fn clear(broker: &RedisBroker) {
        let mut conn = broker.conn.clone();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(format!("{}:*", broker.namespace))
            .query_async(&mut conn)
            .await
            .unwrap();
        if !keys.is_empty() {
            let _: i64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await.unwrap();
        }
    }

    fn message() -> JobMessage {
        let job_id = Uuid::new_v4();
        JobMessage::new(
            job_id,
            "Summarize".to_string(),
            crate::types::DocumentRef::new(format!("financial_document_{}.pdf", job_id)),
            "q3.pdf".to_string(),
        )
    }

    fn started() -> StateUpdate {
        StateUpdate::Started {
            attempt: 1,
            meta: ProgressMeta::new("Analysis pipeline started", "q3.pdf"),
        }
    }

    #[tokio::test]
    async fn test_enqueue_claim_ack() {
        let Some(broker) = broker(Duration::from_secs(3600)).await else {
            return;
        };

        let job_id = broker.enqueue(message()).await.unwrap();
        let record = broker.lookup(job_id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Pending);
        assert!(broker.lookup(Uuid::new_v4()).await.unwrap().is_none());

        let delivery = broker.claim(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(delivery.message.job_id, job_id);
        let stats = broker.stats().await.unwrap();
        assert_eq!((stats.queued, stats.in_flight), (0, 1));

        broker.ack(&delivery).await.unwrap();
        let stats = broker.stats().await.unwrap();
        assert_eq!((stats.queued, stats.in_flight), (0, 0));
        assert!(broker.claim(Duration::from_millis(10)).await.unwrap().is_none());

        clear(&broker).await;
    }

    #[tokio::test]
    async fn test_unacked_delivery_is_redelivered() {
        let Some(broker) = broker(Duration::from_secs(3600)).await else {
            return;
        };

        let job_id = broker.enqueue(message()).await.unwrap();
        let lost = broker.claim(Duration::from_millis(10)).await.unwrap().unwrap();

        assert_eq!(broker.requeue_stale(Duration::from_secs(3600)).await.unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(broker.requeue_stale(Duration::ZERO).await.unwrap(), 1);

        let again = broker.claim(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(again.message.job_id, job_id);
        broker.ack(&again).await.unwrap();

        // The lost delivery's ack finds nothing
        broker.ack(&lost).await.unwrap();
        let stats = broker.stats().await.unwrap();
        assert_eq!((stats.queued, stats.in_flight), (0, 0));

        clear(&broker).await;
    }

    #[tokio::test]
    async fn test_terminal_record_expires() {
        let Some(broker) = broker(Duration::from_secs(1)).await else {
            return;
        };

        let job_id = broker.enqueue(message()).await.unwrap();
        broker.report(job_id, started()).await.unwrap();

        let mut conn = broker.conn.clone();
        let ttl: i64 = redis::cmd("TTL")
            .arg(broker.record_key(&job_id))
            .query_async(&mut conn)
            .await
            .unwrap();
        assert_eq!(ttl, -1);

        broker
            .report(
                job_id,
                StateUpdate::Succeeded(AnalysisReport::new("Summarize", "Margins expanded")),
            )
            .await
            .unwrap();
        let ttl: i64 = redis::cmd("TTL")
            .arg(broker.record_key(&job_id))
            .query_async(&mut conn)
            .await
            .unwrap();
        assert_eq!(ttl, 1);
        assert_eq!(
            broker.lookup(job_id).await.unwrap().unwrap().state,
            JobState::Success
        );

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(broker.lookup(job_id).await.unwrap().is_none());

        clear(&broker).await;
    }

    #[tokio::test]
    async fn test_terminal_record_does_not_regress() {
        let Some(broker) = broker(Duration::from_secs(3600)).await else {
            return;
        };

        let job_id = broker.enqueue(message()).await.unwrap();
        broker.report(job_id, started()).await.unwrap();
        broker
            .report(job_id, StateUpdate::Failed { error: "Unreadable PDF".to_string() })
            .await
            .unwrap();

        let err = broker.report(job_id, started()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        let record = broker.lookup(job_id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Failure);
        assert_eq!(record.error.as_deref(), Some("Unreadable PDF"));

        clear(&broker).await;
    }
}
