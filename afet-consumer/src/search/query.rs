//! `_search` request body for location reads

use afet_common::models::LocationQuery;
use serde_json::{json, Value};

/// Hits returned per search; the map view loads everything in the box
pub const MAX_HITS: u32 = 10_000;

/// Filter-only bool query mirroring the store's read filters
pub fn build_search(query: &LocationQuery) -> Value {
    let mut filters = vec![json!({"term": {"is_deleted": false}})];

    if query.has_bounds() {
        filters.push(json!({"range": {"locations.top_right.lat": {"lte": query.ne_lat}}}));
        filters.push(json!({"range": {"locations.top_right.lon": {"lte": query.ne_lng}}}));
        filters.push(json!({"range": {"locations.bottom_left.lat": {"gte": query.sw_lat}}}));
        filters.push(json!({"range": {"locations.bottom_left.lon": {"gte": query.sw_lng}}}));
    }
    if let Some(epoch) = query.effective_since_epoch() {
        filters.push(json!({"range": {"epoch": {"gte": epoch}}}));
    }
    if let Some(reason) = query.reason.as_deref().filter(|r| !r.is_empty()) {
        filters.push(json!({"term": {"reason": reason}}));
    }
    if let Some(channel) = query.channel.as_deref().filter(|c| !c.is_empty()) {
        filters.push(json!({"term": {"channel": channel}}));
    }
    if let Some(verified) = query.is_location_verified {
        filters.push(json!({"term": {"is_location_verified": verified}}));
    }
    if let Some(verified) = query.is_need_verified {
        filters.push(json!({"term": {"is_need_verified": verified}}));
    }

    json!({
        "track_total_hits": true,
        "size": MAX_HITS,
        "query": {"bool": {"filter": filters}}
    })
}
