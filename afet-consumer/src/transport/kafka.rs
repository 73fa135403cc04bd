//! Kafka adapter for the transport capabilities
//!
//! - `StreamConsumer` with auto commit disabled; offsets are committed per
//!   message by [`KafkaCommitter`] after side effects complete
//! - `FutureProducer` behind [`KafkaPublisher`] with a bounded delivery timeout
//! - [`GroupContext`] turns rebalance callbacks into a readiness signal and a
//!   stream of revoked partitions for the runtime

use super::{InboundMessage, OffsetCommitter, PartitionId, Publisher};
use afet_common::config::KafkaConfig;
use afet_common::{Error, Result};
use async_trait::async_trait;
use chrono::DateTime;
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::BorrowedMessage;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{ClientContext, Message, Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub type GroupConsumer = StreamConsumer<GroupContext>;

/// Consumer context reporting group membership changes
pub struct GroupContext {
    ready: watch::Sender<bool>,
    revoked: mpsc::UnboundedSender<Vec<PartitionId>>,
}

impl GroupContext {
    /// Returns the context plus the readiness and revocation receivers
    pub fn new() -> (
        Self,
        watch::Receiver<bool>,
        mpsc::UnboundedReceiver<Vec<PartitionId>>,
    ) {
        let (ready, ready_rx) = watch::channel(false);
        let (revoked, revoked_rx) = mpsc::unbounded_channel();
        (Self { ready, revoked }, ready_rx, revoked_rx)
    }
}

fn partition_ids(list: &TopicPartitionList) -> Vec<PartitionId> {
    list.elements()
        .iter()
        .map(|elem| PartitionId::new(elem.topic(), elem.partition()))
        .collect()
}

fn partition_list(partitions: &[PartitionId]) -> TopicPartitionList {
    let mut list = TopicPartitionList::new();
    for id in partitions {
        list.add_partition(&id.topic, id.partition);
    }
    list
}

/// Stop fetching `partitions` until they are resumed
pub fn pause_partitions(consumer: &GroupConsumer, partitions: &[PartitionId]) -> Result<()> {
    consumer
        .pause(&partition_list(partitions))
        .map_err(|e| Error::Transport(format!("Pause failed: {}", e)))
}

pub fn resume_partitions(consumer: &GroupConsumer, partitions: &[PartitionId]) -> Result<()> {
    consumer
        .resume(&partition_list(partitions))
        .map_err(|e| Error::Transport(format!("Resume failed: {}", e)))
}

impl ClientContext for GroupContext {}

impl ConsumerContext for GroupContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(list) = rebalance {
            let partitions = partition_ids(list);
            info!(count = partitions.len(), "Partitions revoked");
            // receiver gone means the runtime already stopped
            let _ = self.revoked.send(partitions);
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(list) => {
                info!(count = list.count(), "Partitions assigned");
                self.ready.send_replace(true);
            }
            Rebalance::Revoke(_) => {}
            Rebalance::Error(e) => warn!(error = %e, "Rebalance failed"),
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        if let Err(e) = result {
            warn!(error = %e, "Offset commit failed");
        }
    }
}

/// Build the group consumer and subscribe it to both pipeline topics
pub fn create_consumer(config: &KafkaConfig, context: GroupContext) -> Result<GroupConsumer> {
    let consumer: GroupConsumer = ClientConfig::new()
        .set("bootstrap.servers", &config.brokers)
        .set("group.id", &config.group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .set("enable.partition.eof", "false")
        .set("session.timeout.ms", config.session_timeout_ms.to_string())
        .set_log_level(RDKafkaLogLevel::Info)
        .create_with_context(context)
        .map_err(|e| Error::Transport(format!("Create consumer failed: {}", e)))?;

    consumer
        .subscribe(&[config.location_topic.as_str(), config.intent_topic.as_str()])
        .map_err(|e| Error::Transport(format!("Subscribe failed: {}", e)))?;

    info!(
        group_id = %config.group_id,
        location_topic = %config.location_topic,
        intent_topic = %config.intent_topic,
        "Consumer subscribed"
    );
    Ok(consumer)
}

/// Copy a borrowed message out of the client's buffers
pub fn to_inbound(message: &BorrowedMessage<'_>) -> InboundMessage {
    InboundMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec),
        timestamp: message
            .timestamp()
            .to_millis()
            .and_then(DateTime::from_timestamp_millis),
    }
}

/// Commits per-message offsets on the shared group consumer
pub struct KafkaCommitter {
    consumer: Arc<GroupConsumer>,
}

impl KafkaCommitter {
    pub fn new(consumer: Arc<GroupConsumer>) -> Self {
        Self { consumer }
    }
}

impl OffsetCommitter for KafkaCommitter {
    fn commit(&self, message: &InboundMessage) -> Result<()> {
        let mut list = TopicPartitionList::new();
        list.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )
        .map_err(|e| Error::Transport(format!("Build commit list failed: {}", e)))?;

        self.consumer
            .commit(&list, CommitMode::Async)
            .map_err(|e| Error::Transport(format!("Commit failed: {}", e)))
    }
}

/// Publisher backed by an rdkafka `FutureProducer`
pub struct KafkaPublisher {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.publish_timeout_ms.to_string())
            .set("acks", "all")
            .create()
            .map_err(|e| Error::Transport(format!("Create producer failed: {}", e)))?;

        Ok(Self {
            producer,
            timeout: Duration::from_millis(config.publish_timeout_ms),
        })
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, self.timeout).await {
            Ok((partition, offset)) => {
                debug!(topic, key, partition, offset, "Message delivered");
                Ok(())
            }
            Err((e, _)) => Err(Error::Transport(format!(
                "Publish to {} failed: {}",
                topic, e
            ))),
        }
    }
}
