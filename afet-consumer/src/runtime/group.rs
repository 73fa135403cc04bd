//! Consumer group session loop
//!
//! Pulls messages from the group consumer and hands them to the
//! [`PartitionRouter`]; revocations reported by the consumer context stop
//! the affected workers. A partition whose worker falls behind is paused on
//! the consumer and resumed once its backlog drains, so the other partitions
//! keep flowing. Runs until the shutdown token is cancelled.

use super::router::PartitionRouter;
use crate::transport::kafka::{pause_partitions, resume_partitions, to_inbound, GroupConsumer};
use crate::transport::PartitionId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause after a receive error before polling again
const RECEIVE_ERROR_PAUSE: Duration = Duration::from_millis(500);

/// How often held messages are offered to their workers again
const BACKLOG_DRAIN_INTERVAL: Duration = Duration::from_millis(100);

pub struct ConsumerGroup {
    consumer: Arc<GroupConsumer>,
    revoked: mpsc::UnboundedReceiver<Vec<PartitionId>>,
    router: PartitionRouter,
}

impl ConsumerGroup {
    pub fn new(
        consumer: Arc<GroupConsumer>,
        revoked: mpsc::UnboundedReceiver<Vec<PartitionId>>,
        router: PartitionRouter,
    ) -> Self {
        Self {
            consumer,
            revoked,
            router,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let Self {
            consumer,
            mut revoked,
            mut router,
        } = self;

        let mut drain = tokio::time::interval(BACKLOG_DRAIN_INTERVAL);
        drain.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(partitions) = revoked.recv() => {
                    let paused = router.revoke(&partitions).await;
                    resume(&consumer, &paused);
                }
                _ = drain.tick() => {
                    let drained = router.drain_backlogs();
                    resume(&consumer, &drained);
                }
                received = consumer.recv() => match received {
                    Ok(message) => {
                        let inbound = to_inbound(&message);
                        drop(message);
                        if let Some(partition) = router.dispatch(inbound) {
                            info!(%partition, "Partition worker behind, pausing fetch");
                            if let Err(e) = pause_partitions(&consumer, &[partition]) {
                                warn!(error = %e, "Pausing partition failed");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Receive from consumer group failed");
                        tokio::time::sleep(RECEIVE_ERROR_PAUSE).await;
                    }
                },
            }
        }

        router.shutdown().await;
        info!("Consumer group stopped");
    }
}

fn resume(consumer: &GroupConsumer, partitions: &[PartitionId]) {
    if partitions.is_empty() {
        return;
    }
    debug!(count = partitions.len(), "Resuming partitions");
    if let Err(e) = resume_partitions(consumer, partitions) {
        warn!(error = %e, "Resuming partitions failed");
    }
}

/// Wait until the group has assigned partitions, or shutdown.
///
/// Returns false if shutdown came first.
pub async fn wait_until_ready(mut ready: watch::Receiver<bool>, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        changed = ready.wait_for(|ready| *ready) => changed.is_ok(),
        _ = shutdown.cancelled() => false,
    }
}
