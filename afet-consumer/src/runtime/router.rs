//! Partition-ordered dispatch
//!
//! One worker task per (topic, partition). A worker handles its queue
//! strictly in offset order and commits a message only after the handler
//! acknowledged it. A message the handler asks to retry blocks its partition
//! until it succeeds or the worker is cancelled; a cancelled worker leaves it
//! uncommitted so the next owner of the partition receives it again.
//!
//! Dispatch never waits on a worker. When a partition's queue is full its
//! messages are held in a per-partition backlog and the caller is told to
//! pause fetching that partition; [`PartitionRouter::drain_backlogs`] moves
//! held messages on once the worker catches up.

use super::metrics::ConsumerMetrics;
use crate::pipeline::{Disposition, MessageHandler};
use crate::transport::{InboundMessage, OffsetCommitter, PartitionId};
use afet_common::config::PipelineConfig;
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Messages queued per partition worker before the partition is paused
pub const WORKER_QUEUE_DEPTH: usize = 1024;

/// Exponential backoff between attempts of a retried message
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for RetryPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            initial_backoff: Duration::from_millis(config.retry_initial_backoff_ms),
            max_backoff: Duration::from_millis(config.retry_max_backoff_ms),
        }
    }
}

struct Worker {
    queue: mpsc::Sender<InboundMessage>,
    /// Messages that did not fit in `queue`, in offset order
    backlog: VecDeque<InboundMessage>,
    /// Fetching is paused on the consumer until the backlog drains
    paused: bool,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Push held messages into the queue until it is full again
    fn drain(&mut self, id: &PartitionId) {
        while let Some(message) = self.backlog.pop_front() {
            match self.queue.try_send(message) {
                Ok(()) => {}
                Err(TrySendError::Full(message)) => {
                    self.backlog.push_front(message);
                    return;
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(
                        partition = %id,
                        held = self.backlog.len() + 1,
                        "Partition worker gone, held messages left uncommitted"
                    );
                    self.backlog.clear();
                }
            }
        }
    }
}

/// State shared by every worker
#[derive(Clone)]
struct WorkerContext {
    handler: Arc<dyn MessageHandler>,
    committer: Arc<dyn OffsetCommitter>,
    metrics: Arc<ConsumerMetrics>,
    retry: RetryPolicy,
}

pub struct PartitionRouter {
    context: WorkerContext,
    shutdown: CancellationToken,
    workers: HashMap<PartitionId, Worker>,
}

impl PartitionRouter {
    pub fn new(
        handler: Arc<dyn MessageHandler>,
        committer: Arc<dyn OffsetCommitter>,
        metrics: Arc<ConsumerMetrics>,
        retry: RetryPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            context: WorkerContext {
                handler,
                committer,
                metrics,
                retry,
            },
            shutdown,
            workers: HashMap::new(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Messages held back across all partitions
    pub fn backlogged(&self) -> usize {
        self.workers.values().map(|w| w.backlog.len()).sum()
    }

    /// Queue `message` on its partition's worker, starting one if needed.
    ///
    /// Returns the partition to pause when this message started a backlog.
    pub fn dispatch(&mut self, message: InboundMessage) -> Option<PartitionId> {
        self.context
            .metrics
            .record_received(&message.topic, message.timestamp);

        let id = message.partition_id();
        if self.workers.get(&id).map_or(true, |w| w.handle.is_finished()) {
            let (backlog, paused) = self
                .workers
                .remove(&id)
                .map(|w| (w.backlog, w.paused))
                .unwrap_or_default();
            let mut worker = self.spawn_worker(id.clone(), backlog);
            worker.paused = paused;
            self.workers.insert(id.clone(), worker);
        }
        let worker = self.workers.get_mut(&id)?;

        if !worker.backlog.is_empty() {
            worker.backlog.push_back(message);
            return None;
        }
        match worker.queue.try_send(message) {
            Ok(()) => None,
            Err(TrySendError::Full(message)) => {
                debug!(partition = %id, "Partition worker queue full, holding messages");
                worker.backlog.push_back(message);
                if worker.paused {
                    return None;
                }
                worker.paused = true;
                Some(id)
            }
            Err(TrySendError::Closed(_)) => {
                warn!(partition = %id, "Partition worker gone, message left uncommitted");
                None
            }
        }
    }

    /// Move held messages to workers that have room again.
    ///
    /// Returns the partitions whose backlog emptied and can be resumed.
    pub fn drain_backlogs(&mut self) -> Vec<PartitionId> {
        let mut resumed = Vec::new();
        for (id, worker) in self.workers.iter_mut() {
            if !worker.paused {
                continue;
            }
            worker.drain(id);
            if worker.backlog.is_empty() {
                debug!(partition = %id, "Partition backlog drained");
                worker.paused = false;
                resumed.push(id.clone());
            }
        }
        resumed
    }

    /// Stop the workers of partitions this consumer no longer owns.
    ///
    /// Held messages are dropped uncommitted. Returns the revoked partitions
    /// that were paused, so the caller can lift their pause.
    pub async fn revoke(&mut self, partitions: &[PartitionId]) -> Vec<PartitionId> {
        let mut stopping = Vec::new();
        let mut paused = Vec::new();
        for id in partitions {
            if let Some(worker) = self.workers.remove(id) {
                worker.cancel.cancel();
                if worker.paused {
                    paused.push(id.clone());
                }
                stopping.push((id.clone(), worker.handle));
            }
        }

        join_workers(stopping).await;
        paused
    }

    /// Cancel every worker and wait for in-flight messages to finish
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        let held = self.backlogged();
        let workers: Vec<_> = self.workers.drain().collect();
        info!(workers = workers.len(), held, "Stopping partition workers");

        let handles = workers
            .into_iter()
            .map(|(id, worker)| (id, worker.handle))
            .collect();
        join_workers(handles).await;
    }

    fn spawn_worker(&self, id: PartitionId, backlog: VecDeque<InboundMessage>) -> Worker {
        let (queue, rx) = mpsc::channel(WORKER_QUEUE_DEPTH);
        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(run_worker(
            id.clone(),
            rx,
            self.context.clone(),
            cancel.clone(),
        ));
        debug!(partition = %id, "Partition worker started");

        let mut worker = Worker {
            queue,
            backlog,
            paused: false,
            cancel,
            handle,
        };
        worker.drain(&id);
        worker
    }
}

async fn join_workers(handles: Vec<(PartitionId, JoinHandle<()>)>) {
    let (ids, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
    for (id, result) in ids.iter().zip(join_all(handles).await) {
        if let Err(e) = result {
            warn!(partition = %id, error = %e, "Partition worker ended abnormally");
        }
    }
}

async fn run_worker(
    id: PartitionId,
    mut rx: mpsc::Receiver<InboundMessage>,
    context: WorkerContext,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(message) => message,
                None => break,
            },
        };

        if !process(&message, &context, &cancel).await {
            break;
        }
    }
    debug!(partition = %id, "Partition worker stopped");
}

/// Handle one message to completion. Returns false if cancelled mid-retry.
async fn process(
    message: &InboundMessage,
    context: &WorkerContext,
    cancel: &CancellationToken,
) -> bool {
    let mut backoff = context.retry.initial_backoff;
    let mut attempt = 1u32;

    loop {
        match context.handler.handle(message).await {
            Disposition::Ack => {
                context.metrics.record_ack();
                if let Err(e) = context.committer.commit(message) {
                    warn!(
                        topic = %message.topic,
                        partition = message.partition,
                        offset = message.offset,
                        error = %e,
                        "Offset commit failed"
                    );
                }
                return true;
            }
            Disposition::Retry => {
                context.metrics.record_retry();
                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Message not processed, retrying after backoff"
                );

                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(
                            topic = %message.topic,
                            partition = message.partition,
                            offset = message.offset,
                            "Worker cancelled during retry, message left uncommitted"
                        );
                        return false;
                    }
                    _ = tokio::time::sleep(backoff) => {}
                }

                backoff = (backoff * 2).min(context.retry.max_backoff);
                attempt += 1;
            }
        }
    }
}
