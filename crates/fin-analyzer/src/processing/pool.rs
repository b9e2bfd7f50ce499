//! Worker pool and result reaper

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::analysis::WorkerContext;
use crate::config::AnalyzerConfig;
use crate::storage::DocumentStore;

use super::job_queue::Broker;
use super::worker::AnalysisWorker;

/// A set of workers sharing one broker, document store and context
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `config.worker.count` workers and the reaper
    pub fn spawn(
        config: &AnalyzerConfig,
        broker: Arc<dyn Broker>,
        documents: Arc<dyn DocumentStore>,
        context: WorkerContext,
    ) -> Self {
        let (shutdown, receiver) = watch::channel(false);

        if let Some(worst_case) = config.worker.worst_case_job_duration() {
            if config.broker.visibility_timeout() < worst_case {
                tracing::warn!(
                    "Visibility timeout ({}s) is shorter than the longest possible job ({}s); \
                     slow jobs may be delivered twice",
                    config.broker.visibility_timeout_secs,
                    worst_case.as_secs()
                );
            }
        }

        let mut handles: Vec<JoinHandle<()>> = (0..config.worker.count)
            .map(|id| {
                let worker = AnalysisWorker::new(
                    id,
                    broker.clone(),
                    documents.clone(),
                    context.clone(),
                    config.worker.clone(),
                );
                tokio::spawn(worker.run(receiver.clone()))
            })
            .collect();

        handles.push(tokio::spawn(run_reaper(
            broker,
            config.broker.reaper_interval(),
            config.broker.visibility_timeout(),
            receiver,
        )));

        tracing::info!("Worker pool started with {} workers", config.worker.count);
        Self { shutdown, handles }
    }

    /// Number of worker tasks, excluding the reaper
    pub fn size(&self) -> usize {
        self.handles.len().saturating_sub(1)
    }

    /// Signal every task to stop and wait for in-progress jobs to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                tracing::error!("Worker task ended abnormally: {}", e);
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

/// Periodically drop expired results and redeliver abandoned jobs
async fn run_reaper(
    broker: Arc<dyn Broker>,
    interval: Duration,
    visibility_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        if let Err(e) = broker.purge_expired().await {
            tracing::warn!("Result purge failed: {}", e);
        }
        match broker.requeue_stale(visibility_timeout).await {
            Ok(0) => {}
            Ok(n) => tracing::warn!("Requeued {} abandoned deliveries", n),
            Err(e) => tracing::warn!("Redelivery scan failed: {}", e),
        }
    }
}
