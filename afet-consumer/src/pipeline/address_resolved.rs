//! Stage 1: persist a geocoded feed and request intent resolution

use super::Disposition;
use crate::transport::{InboundMessage, Publisher};
use afet_common::db::FeedStore;
use afet_common::error::with_deadline;
use afet_common::events::{FeedMessage, IntentResolutionEvent, LocationResolvedPayload};
use afet_common::models::Location;
use afet_common::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub struct AddressResolvedHandler {
    store: Arc<dyn FeedStore>,
    publisher: Arc<dyn Publisher>,
    intent_topic: String,
    timeout: Duration,
}

/// Fill location fields the geocoder left empty from the feed itself
fn inherit_feed_fields(
    mut location: Location,
    feed: &FeedMessage,
    ingested_at: DateTime<Utc>,
) -> Location {
    if location.timestamp.is_none() {
        location.timestamp = Some(ingested_at);
    }
    if location.channel.is_empty() {
        location.channel = feed.channel.clone();
    }
    if location.epoch == 0 {
        location.epoch = feed.epoch;
    }
    if location.extra_parameters.is_none() {
        location.extra_parameters = feed.extra_parameters.clone();
    }
    location
}

impl AddressResolvedHandler {
    pub fn new(
        store: Arc<dyn FeedStore>,
        publisher: Arc<dyn Publisher>,
        intent_topic: String,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            publisher,
            intent_topic,
            timeout,
        }
    }

    pub async fn handle(&self, message: &InboundMessage) -> Disposition {
        let payload: LocationResolvedPayload = match serde_json::from_slice(message.payload_bytes()) {
            Ok(payload) => payload,
            Err(e) => {
                error!(
                    partition = message.partition,
                    offset = message.offset,
                    key = ?message.key_lossy(),
                    payload = %message.payload_lossy(),
                    error = %e,
                    "Malformed location-resolved payload, dropping"
                );
                return Disposition::Ack;
            }
        };

        let entry = payload.feed.to_entry(Utc::now());
        let location = inherit_feed_fields(payload.location, &payload.feed, entry.timestamp);

        // the store bounds its own writes; a deadline here could fire after COMMIT
        let feed_id = match self.store.create_feed(&entry, &location).await {
            Ok(id) => id,
            Err(e) => {
                error!(
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Storing feed and location failed, will retry"
                );
                return Disposition::Retry;
            }
        };
        info!(feed_id, channel = %entry.channel, geolocated = location.is_geolocated(), "Feed stored");

        let event = IntentResolutionEvent {
            feed_id,
            full_text: entry.full_text,
            resolved_address: location.formatted_address,
        };
        if let Err(e) = self.publish(&event).await {
            // the feed is durable; reprocessing would insert it twice
            error!(feed_id, error = %e, "Publishing intent resolution event failed, feed left unenriched");
        }

        Disposition::Ack
    }

    async fn publish(&self, event: &IntentResolutionEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)?;
        with_deadline(
            self.timeout,
            self.publisher.publish(&self.intent_topic, &event.key(), &payload),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afet_common::models::ExtraParameters;

    fn feed() -> FeedMessage {
        FeedMessage {
            id: 0,
            raw_text: "su lazım".to_string(),
            is_resolved: false,
            channel: "babala".to_string(),
            timestamp: None,
            epoch: 1000,
            extra_parameters: Some(ExtraParameters::parse(r#"{"tel": "1"}"#)),
            formatted_address: String::new(),
            reason: None,
        }
    }

    #[test]
    fn test_location_inherits_missing_fields() {
        let now = Utc::now();
        let location = inherit_feed_fields(Location::default(), &feed(), now);

        assert_eq!(location.timestamp, Some(now));
        assert_eq!(location.channel, "babala");
        assert_eq!(location.epoch, 1000);
        assert!(location.extra_parameters.is_some());
    }

    #[test]
    fn test_location_keeps_own_fields() {
        let own = Location {
            channel: "twitter".to_string(),
            epoch: 5,
            ..Default::default()
        };
        let location = inherit_feed_fields(own, &feed(), Utc::now());

        assert_eq!(location.channel, "twitter");
        assert_eq!(location.epoch, 5);
    }
}
