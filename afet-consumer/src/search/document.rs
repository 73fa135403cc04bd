//! Location document stored in the search index

use afet_common::masking::MaskingPolicy;
use afet_common::models::{split_labels, ExtraParameters, Location, LocationSummary, NeedItem};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Locations {
    pub center: Coordinates,
    pub top_right: Coordinates,
    pub bottom_left: Coordinates,
}

/// Read-side projection of a live location
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationDocument {
    pub formatted_address: String,
    pub locations: Locations,
    /// Geocoder output before any manual correction
    pub raw_locations: Locations,
    pub full_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_parameters: Option<ExtraParameters>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub channel: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reason: Vec<String>,
    pub entry_id: i64,
    pub epoch: i64,
    pub is_location_verified: bool,
    pub is_need_verified: bool,
    pub is_deleted: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<NeedItem>,
}

impl LocationDocument {
    pub fn from_location(location: &Location, full_text: &str) -> Self {
        let locations = Locations {
            center: Coordinates {
                lat: location.latitude,
                lon: location.longitude,
            },
            top_right: Coordinates {
                lat: location.northeast_lat,
                lon: location.northeast_lng,
            },
            bottom_left: Coordinates {
                lat: location.southwest_lat,
                lon: location.southwest_lng,
            },
        };

        Self {
            formatted_address: location.formatted_address.clone(),
            locations,
            raw_locations: locations,
            full_text: full_text.to_string(),
            extra_parameters: location.extra_parameters.clone(),
            channel: split_labels(&location.channel),
            reason: location.reasons(),
            entry_id: location.entry_id,
            epoch: location.epoch,
            is_location_verified: location.is_location_verified,
            is_need_verified: location.is_need_verified,
            is_deleted: location.is_deleted,
            needs: location.needs.clone(),
        }
    }

    /// Summary row for a search hit; `include_extra` controls whether the
    /// (masked) extra parameters are carried over
    pub fn into_summary(
        self,
        id: i64,
        include_extra: bool,
        masking: &MaskingPolicy,
    ) -> LocationSummary {
        let channel = self.channel.join(",");
        let reason = self.reason.join(",");
        let extra_parameters = if include_extra {
            masking.apply(&channel, self.extra_parameters)
        } else {
            None
        };

        LocationSummary {
            id,
            loc: [self.locations.center.lat, self.locations.center.lon],
            entry_id: self.entry_id,
            epoch: self.epoch,
            reason: (!reason.is_empty()).then_some(reason),
            channel: (!channel.is_empty()).then_some(channel),
            extra_parameters,
            is_location_verified: self.is_location_verified,
            is_need_verified: self.is_need_verified,
            needs: self.needs,
        }
    }
}
