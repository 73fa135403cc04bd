//! Stage 2: classify intent and needs, drop noise and duplicates, publish
//! the enriched location to the store and the search index
//!
//! Every step overwrites rather than appends, so a redelivered event
//! converges to the same location state.

use super::{Disposition, PipelineDeps};
use crate::resolvers::{
    DuplicateDetector, DuplicationRequest, IntentClassifier, IntentPolicy, IntentVerdict,
    NeedsClassifier,
};
use crate::search::{LocationDocument, LocationIndex};
use crate::transport::InboundMessage;
use afet_common::db::FeedStore;
use afet_common::error::with_deadline;
use afet_common::events::IntentResolutionEvent;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct IntentResolvedHandler {
    store: Arc<dyn FeedStore>,
    index: Arc<dyn LocationIndex>,
    intents: Arc<dyn IntentClassifier>,
    needs: Arc<dyn NeedsClassifier>,
    duplicates: Arc<dyn DuplicateDetector>,
    policy: IntentPolicy,
    timeout: Duration,
}

impl IntentResolvedHandler {
    pub fn new(deps: &PipelineDeps, policy: IntentPolicy, timeout: Duration) -> Self {
        Self {
            store: deps.store.clone(),
            index: deps.index.clone(),
            intents: deps.intents.clone(),
            needs: deps.needs.clone(),
            duplicates: deps.duplicates.clone(),
            policy,
            timeout,
        }
    }

    pub async fn handle(&self, message: &InboundMessage) -> Disposition {
        let event: IntentResolutionEvent = match serde_json::from_slice(message.payload_bytes()) {
            Ok(event) => event,
            Err(e) => {
                error!(
                    partition = message.partition,
                    offset = message.offset,
                    key = ?message.key_lossy(),
                    payload = %message.payload_lossy(),
                    error = %e,
                    "Malformed intent resolution event, dropping"
                );
                return Disposition::Ack;
            }
        };
        let feed_id = event.feed_id;

        let labels = match with_deadline(self.timeout, self.intents.classify(&event.full_text)).await {
            Ok(labels) => labels,
            Err(e) => {
                error!(feed_id, error = %e, "Intent resolution failed, feed left unenriched");
                return Disposition::Ack;
            }
        };

        let reasons = match self.policy.evaluate(&labels) {
            IntentVerdict::Irrelevant => {
                info!(feed_id, "Feed classified irrelevant, removing location");
                return self.remove_location(feed_id).await;
            }
            IntentVerdict::Accepted(reasons) => reasons,
        };

        let needs = match with_deadline(self.timeout, self.needs.classify(&event.full_text)).await {
            Ok(needs) => needs,
            Err(e) => {
                error!(feed_id, error = %e, "Needs resolution failed, feed left unenriched");
                return Disposition::Ack;
            }
        };

        let request = DuplicationRequest {
            address: event.resolved_address.clone(),
            reasons: reasons.clone(),
            needs: needs.iter().map(|n| n.label.clone()).collect(),
        };
        let is_duplicate = match with_deadline(self.timeout, self.duplicates.is_duplicate(&request)).await {
            Ok(is_duplicate) => is_duplicate,
            Err(e) => {
                warn!(feed_id, error = %e, "Duplicate check failed, treating feed as unique");
                false
            }
        };

        if is_duplicate {
            info!(feed_id, "Feed is a duplicate, removing location");
            return self.remove_location(feed_id).await;
        }

        let reason = reasons.join(",");
        match with_deadline(
            self.timeout,
            self.store.set_location_intent_and_needs(feed_id, &reason, &needs),
        )
        .await
        {
            Ok(0) => warn!(feed_id, "No location row to enrich"),
            Ok(_) => info!(feed_id, reason = %reason, needs = needs.len(), "Location enriched"),
            Err(e) => {
                error!(feed_id, error = %e, "Updating location intent and needs failed, will retry");
                return Disposition::Retry;
            }
        }

        self.project(feed_id, &event.full_text).await;
        Disposition::Ack
    }

    async fn remove_location(&self, feed_id: i64) -> Disposition {
        match with_deadline(self.timeout, self.store.soft_delete_location(feed_id)).await {
            Ok(_) => Disposition::Ack,
            Err(e) => {
                error!(feed_id, error = %e, "Soft-deleting location failed, will retry");
                Disposition::Retry
            }
        }
    }

    /// Best-effort write of the live location to the search index
    async fn project(&self, feed_id: i64, full_text: &str) {
        let location = match with_deadline(self.timeout, self.store.location_by_entry(feed_id)).await {
            Ok(Some(location)) => location,
            Ok(None) => {
                debug!(feed_id, "No live location, skipping index write");
                return;
            }
            Err(e) => {
                warn!(feed_id, error = %e, "Loading location for index failed");
                return;
            }
        };

        let document = LocationDocument::from_location(&location, full_text);
        if let Err(e) = with_deadline(self.timeout, self.index.upsert_location(location.id, &document)).await {
            warn!(feed_id, location_id = location.id, error = %e, "Index write failed");
        }
    }
}
