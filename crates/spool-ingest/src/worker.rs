//! Async worker loop
//!
//! A worker owns one `SpoolTask` and one sink. Each poll runs on the blocking
//! pool; the resulting batch is handed to the sink before the next poll, so a
//! file is never relocated while its last records are still in flight.
//! Cancellation is checked between polls and while backing off; a poll that
//! has started always runs to its batch boundary.

use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SpoolConfig;
use crate::offsets::{FileOffsetStore, MemoryOffsetStore, OffsetStore};
use crate::sink::{JsonLinesSink, RecordSink};
use crate::task::SpoolTask;

/// Wait schedule after consecutive empty polls: nothing after the first,
/// then `base`, doubling up to `max`
#[derive(Debug, Clone)]
pub struct EmptyPollBackoff {
    base: Duration,
    max: Duration,
    misses: u32,
}

impl EmptyPollBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            misses: 0,
        }
    }

    pub fn from_config(config: &SpoolConfig) -> Self {
        Self::new(config.empty_poll_wait(), config.empty_poll_max_wait())
    }

    /// Register an empty poll and return how long to wait
    pub fn next_wait(&mut self) -> Duration {
        let wait = match self.misses {
            0 => Duration::ZERO,
            n => {
                let factor = 1u32.checked_shl(n - 1).unwrap_or(u32::MAX);
                self.base.saturating_mul(factor).min(self.max)
            }
        };
        self.misses = self.misses.saturating_add(1);
        wait
    }

    pub fn reset(&mut self) {
        self.misses = 0;
    }
}

/// Counters reported when a worker stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub polls: u64,
    pub batches: u64,
    pub records: u64,
}

pub struct Worker {
    worker_id: Uuid,
    hostname: String,
    task_index: u32,
    task: SpoolTask,
    sink: Arc<dyn RecordSink>,
    backoff: EmptyPollBackoff,
}

impl Worker {
    pub fn new(task: SpoolTask, sink: Arc<dyn RecordSink>, config: &SpoolConfig) -> Self {
        Self {
            worker_id: Uuid::new_v4(),
            hostname: hostname::get()
                .unwrap_or_else(|_| "unknown".into())
                .to_string_lossy()
                .to_string(),
            task_index: config.task_index,
            task,
            sink,
            backoff: EmptyPollBackoff::from_config(config),
        }
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    /// Poll until cancelled or until a file error halts the worker
    pub async fn run(self, cancel: CancellationToken) -> Result<WorkerStats> {
        let Worker {
            worker_id,
            hostname,
            task_index,
            mut task,
            sink,
            mut backoff,
        } = self;
        let mut stats = WorkerStats::default();

        tracing::info!(
            worker_id = %worker_id,
            hostname = %hostname,
            task_index,
            "Worker started"
        );

        while !cancel.is_cancelled() {
            let (returned, polled) = tokio::task::spawn_blocking(move || {
                let batch = task.poll();
                (task, batch)
            })
            .await
            .context("Poll task panicked")?;
            task = returned;
            stats.polls += 1;

            let batch = polled.with_context(|| format!("Worker {} halted", worker_id))?;

            if batch.is_empty() {
                let wait = backoff.next_wait();
                if !wait.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                continue;
            }

            backoff.reset();
            let records = batch.len() as u64;
            sink.send(batch)
                .await
                .with_context(|| format!("Worker {} failed to deliver batch", worker_id))?;

            stats.batches += 1;
            stats.records += records;
            tracing::debug!(worker_id = %worker_id, records, "Batch delivered");
        }

        tracing::info!(
            worker_id = %worker_id,
            polls = stats.polls,
            batches = stats.batches,
            records = stats.records,
            "Worker stopped"
        );
        Ok(stats)
    }
}

/// Run the configured worker, or every `task_count` shard in-process when
/// `local_workers` is set, until `cancel` fires.
///
/// Workers share the offset store and the JSON-lines sink. Schemas are
/// resolved per worker; sampling ignores partitioning so all workers agree.
pub async fn run_workers(
    config: &SpoolConfig,
    cancel: CancellationToken,
    local_workers: bool,
) -> Result<Vec<WorkerStats>> {
    let offsets: Arc<dyn OffsetStore> = match config.offsets_path {
        Some(ref path) => Arc::new(
            FileOffsetStore::open(path)
                .with_context(|| format!("Failed to open offset store '{}'", path.display()))?,
        ),
        None => {
            tracing::warn!("No offsets_path configured; resume offsets are kept in memory only");
            Arc::new(MemoryOffsetStore::new())
        }
    };

    let output = config
        .output_path
        .as_ref()
        .context("output_path must be set to run workers")?;
    let sink: Arc<dyn RecordSink> = Arc::new(
        JsonLinesSink::open(output, Arc::clone(&offsets))
            .await
            .with_context(|| format!("Failed to open output '{}'", output.display()))?,
    );

    let indexes: Vec<u32> = if local_workers {
        (0..config.task_count).collect()
    } else {
        vec![config.task_index]
    };

    let mut workers = Vec::with_capacity(indexes.len());
    for index in indexes {
        let shard = SpoolConfig {
            task_index: index,
            ..config.clone()
        };
        let task = SpoolTask::from_config(&shard, Arc::clone(&offsets))
            .with_context(|| format!("Failed to start task {}", index))?;
        workers.push(Worker::new(task, Arc::clone(&sink), &shard));
    }

    let mut running: FuturesUnordered<_> = workers
        .into_iter()
        .map(|worker| tokio::spawn(worker.run(cancel.clone())))
        .collect();

    let mut stats = Vec::with_capacity(running.len());
    let mut failure = None;
    while let Some(result) = running.next().await {
        match result.context("Worker task panicked")? {
            Ok(s) => stats.push(s),
            Err(e) => {
                // One halted worker stops the others
                cancel.cancel();
                failure.get_or_insert(e);
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(stats),
    }
}
