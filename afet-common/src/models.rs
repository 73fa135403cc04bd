//! Feed and location models
//!
//! A feed is one ingested disaster-relief report. Its geocoded, intent and
//! need enriched record is the [`Location`] row tied 1:1 to the entry.
//! `Location::reason` is the authoritative resolved intent.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Channel whose epoch filter is skipped on reads (static organisation points)
pub const UNTIMED_CHANNEL: &str = "ahbap_location";

/// A need tag attached to a location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeedItem {
    pub label: String,
    pub status: bool,
}

impl NeedItem {
    /// Open need with the given label
    pub fn open(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            status: true,
        }
    }
}

/// Free-form metadata attached to a feed by its source channel
///
/// Producers send either a JSON object or a string holding a loosely
/// formatted dictionary (single quotes, bare `nan`). Strings that cannot be
/// recovered into an object are kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtraParameters {
    Structured(Map<String, Value>),
    Opaque(String),
}

impl ExtraParameters {
    /// Parse a stored or transmitted parameter string
    pub fn parse(raw: &str) -> Self {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
            return Self::Structured(map);
        }

        let normalized = raw
            .replace(" nan,", "'',")
            .replace(" nan}", "''}")
            .replace('\'', "\"");

        match serde_json::from_str::<Value>(&normalized) {
            Ok(Value::Object(map)) => Self::Structured(map),
            _ => Self::Opaque(raw.to_string()),
        }
    }

    /// Parse an optional column value; blank strings carry no parameters
    pub fn from_column(raw: Option<&str>) -> Option<Self> {
        raw.filter(|s| !s.trim().is_empty()).map(Self::parse)
    }

    /// String form written to the `extra_parameters` column
    pub fn to_column(&self) -> String {
        match self {
            Self::Structured(map) => Value::Object(map.clone()).to_string(),
            Self::Opaque(raw) => raw.clone(),
        }
    }

    pub fn as_map(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Structured(map) => Some(map),
            Self::Opaque(_) => None,
        }
    }
}

impl Serialize for ExtraParameters {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Structured(map) => map.serialize(serializer),
            Self::Opaque(raw) => serializer.serialize_str(raw),
        }
    }
}

impl<'de> Deserialize<'de> for ExtraParameters {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::Object(map) => Self::Structured(map),
            Value::String(raw) => Self::parse(&raw),
            other => Self::Opaque(other.to_string()),
        })
    }
}

/// Accepts RFC 3339, naive ISO-8601 (read as UTC), or null.
///
/// Anything else is dropped rather than failing the whole payload, since the
/// consumer re-stamps ingestion time anyway.
pub fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        _ => None,
    };
    Ok(raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }))
}

/// Row of `feeds_entry`
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub id: i64,
    pub full_text: String,
    pub is_resolved: bool,
    pub channel: String,
    pub timestamp: DateTime<Utc>,
    pub epoch: i64,
    pub extra_parameters: Option<ExtraParameters>,
    pub reason: Option<String>,
}

/// Row of `feeds_location`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    pub id: i64,
    pub formatted_address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub northeast_lat: f64,
    pub northeast_lng: f64,
    pub southwest_lat: f64,
    pub southwest_lng: f64,
    pub entry_id: i64,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    pub epoch: i64,
    pub reason: String,
    pub channel: String,
    pub is_location_verified: bool,
    pub is_need_verified: bool,
    pub needs: Vec<NeedItem>,
    pub is_deleted: bool,
    pub extra_parameters: Option<ExtraParameters>,
}

impl Location {
    /// True when the row carries an address and a non-zero coordinate pair.
    ///
    /// Locations failing this check are never written.
    pub fn is_geolocated(&self) -> bool {
        !self.formatted_address.trim().is_empty() && self.latitude != 0.0 && self.longitude != 0.0
    }

    /// Resolved intents as individual labels
    pub fn reasons(&self) -> Vec<String> {
        split_labels(&self.reason)
    }
}

/// Split a comma-joined label string, dropping empty segments
pub fn split_labels(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Feed joined with its location, as returned to readers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedView {
    pub id: i64,
    pub full_text: String,
    pub is_resolved: bool,
    pub channel: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_parameters: Option<ExtraParameters>,
    pub formatted_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<NeedItem>,
}

/// Compact location row for map reads
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationSummary {
    pub id: i64,
    pub loc: [f64; 2],
    pub entry_id: i64,
    pub epoch: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_parameters: Option<ExtraParameters>,
    pub is_location_verified: bool,
    pub is_need_verified: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<NeedItem>,
}

/// Read filter shared by the store and the search index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationQuery {
    pub sw_lat: f64,
    pub sw_lng: f64,
    pub ne_lat: f64,
    pub ne_lng: f64,
    /// Minimum epoch; ignored for [`UNTIMED_CHANNEL`]
    pub since_epoch: Option<i64>,
    pub reason: Option<String>,
    pub channel: Option<String>,
    pub is_location_verified: Option<bool>,
    pub is_need_verified: Option<bool>,
    pub include_extra_parameters: bool,
}

impl LocationQuery {
    pub fn has_bounds(&self) -> bool {
        self.sw_lat != 0.0 || self.sw_lng != 0.0 || self.ne_lat != 0.0 || self.ne_lng != 0.0
    }

    /// Epoch lower bound after the channel exemption is applied
    pub fn effective_since_epoch(&self) -> Option<i64> {
        match self.channel.as_deref() {
            Some(UNTIMED_CHANNEL) => None,
            _ => self.since_epoch.filter(|e| *e != 0),
        }
    }
}

/// Manually verified coordinates for one feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationVerification {
    pub entry_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
}
