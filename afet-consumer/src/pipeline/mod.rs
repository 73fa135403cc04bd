//! Feed enrichment pipeline
//!
//! Stage 1 ([`address_resolved`]) persists geocoded feeds and hands them to
//! Stage 2 ([`intent_resolved`]), which classifies, deduplicates and
//! projects them into the search index.
//!
//! Handlers never return errors. Each outcome is a [`Disposition`]: the
//! runtime commits the offset on `Ack` and re-runs the message on `Retry`.

pub mod address_resolved;
pub mod intent_resolved;

pub use address_resolved::AddressResolvedHandler;
pub use intent_resolved::IntentResolvedHandler;

use crate::resolvers::{DuplicateDetector, IntentClassifier, IntentPolicy, NeedsClassifier};
use crate::search::LocationIndex;
use crate::transport::{InboundMessage, Publisher};
use afet_common::config::ServiceConfig;
use afet_common::db::FeedStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// What the runtime should do with a handled message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Done with it (success or deliberately dropped); commit the offset
    Ack,
    /// Not durable yet; process the same message again
    Retry,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &InboundMessage) -> Disposition;
}

/// Shared handles the stages run against
#[derive(Clone)]
pub struct PipelineDeps {
    pub store: Arc<dyn FeedStore>,
    pub publisher: Arc<dyn Publisher>,
    pub index: Arc<dyn LocationIndex>,
    pub intents: Arc<dyn IntentClassifier>,
    pub needs: Arc<dyn NeedsClassifier>,
    pub duplicates: Arc<dyn DuplicateDetector>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub location_topic: String,
    pub intent_topic: String,
    pub policy: IntentPolicy,
    /// Deadline for index, publish, resolver and store update calls
    pub operation_timeout: Duration,
}

impl From<&ServiceConfig> for PipelineSettings {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            location_topic: config.kafka.location_topic.clone(),
            intent_topic: config.kafka.intent_topic.clone(),
            policy: IntentPolicy::from(&config.resolvers),
            operation_timeout: config.pipeline.operation_timeout(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&ServiceConfig::default())
    }
}

/// Routes each message to its stage by topic
pub struct FeedPipeline {
    location_topic: String,
    intent_topic: String,
    address: AddressResolvedHandler,
    intent: IntentResolvedHandler,
}

impl FeedPipeline {
    pub fn new(deps: PipelineDeps, settings: PipelineSettings) -> Self {
        let address = AddressResolvedHandler::new(
            deps.store.clone(),
            deps.publisher.clone(),
            settings.intent_topic.clone(),
            settings.operation_timeout,
        );
        let intent = IntentResolvedHandler::new(&deps, settings.policy, settings.operation_timeout);

        Self {
            location_topic: settings.location_topic,
            intent_topic: settings.intent_topic,
            address,
            intent,
        }
    }
}

#[async_trait]
impl MessageHandler for FeedPipeline {
    async fn handle(&self, message: &InboundMessage) -> Disposition {
        if message.topic == self.location_topic {
            self.address.handle(message).await
        } else if message.topic == self.intent_topic {
            self.intent.handle(message).await
        } else {
            warn!(topic = %message.topic, offset = message.offset, "Message from unexpected topic, skipping");
            Disposition::Ack
        }
    }
}
