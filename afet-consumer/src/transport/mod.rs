//! Message transport capabilities
//!
//! The pipeline and runtime only see [`Publisher`], [`OffsetCommitter`] and
//! [`InboundMessage`]; the Kafka adapter lives in [`kafka`].

pub mod kafka;

use afet_common::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One partition of one topic
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionId {
    pub topic: String,
    pub partition: i32,
}

impl PartitionId {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl std::fmt::Display for PartitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

/// A delivered message, detached from the client's buffers
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    /// Producer or broker timestamp, when the broker reports one
    pub timestamp: Option<DateTime<Utc>>,
}

impl InboundMessage {
    pub fn partition_id(&self) -> PartitionId {
        PartitionId::new(self.topic.clone(), self.partition)
    }

    /// Payload bytes, empty when the message has no value
    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or_default()
    }

    /// Payload as text for logging
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(self.payload_bytes()).into_owned()
    }

    pub fn key_lossy(&self) -> Option<String> {
        self.key
            .as_deref()
            .map(|k| String::from_utf8_lossy(k).into_owned())
    }
}

/// Sends keyed messages to a topic
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `payload` under `key`, returning once the broker acknowledged it
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()>;
}

/// Commits consumer progress
pub trait OffsetCommitter: Send + Sync {
    /// Record `message` as processed; the committed position is `offset + 1`
    fn commit(&self, message: &InboundMessage) -> Result<()>;
}
