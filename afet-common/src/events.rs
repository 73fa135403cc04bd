//! Wire payloads exchanged over the message transport
//!
//! Both topics carry JSON values keyed by the feed ID in decimal, so every
//! message for one feed lands on the same partition.

use crate::models::{lenient_timestamp, ExtraParameters, FeedEntry, Location};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Feed part of a location-resolved message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedMessage {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub id: i64,
    pub raw_text: String,
    #[serde(default)]
    pub is_resolved: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel: String,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub epoch: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_parameters: Option<ExtraParameters>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub formatted_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn is_zero(id: &i64) -> bool {
    *id == 0
}

impl FeedMessage {
    /// Entry to insert, stamped with ingestion time
    pub fn to_entry(&self, ingested_at: DateTime<Utc>) -> FeedEntry {
        FeedEntry {
            id: 0,
            full_text: self.raw_text.clone(),
            is_resolved: self.is_resolved,
            channel: self.channel.clone(),
            timestamp: ingested_at,
            epoch: self.epoch,
            extra_parameters: self.extra_parameters.clone(),
            reason: self.reason.clone(),
        }
    }
}

/// Value of a location-resolved message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationResolvedPayload {
    pub location: Location,
    pub feed: FeedMessage,
}

/// Handoff from address resolution to intent resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentResolutionEvent {
    #[serde(rename = "id")]
    pub feed_id: i64,
    pub full_text: String,
    #[serde(default)]
    pub resolved_address: String,
}

impl IntentResolutionEvent {
    /// Partition key for this event
    pub fn key(&self) -> String {
        self.feed_id.to_string()
    }
}
