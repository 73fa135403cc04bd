//! Search index projection of live locations
//!
//! The index is rebuildable from the store; writes to it are best effort.

pub mod document;
pub mod elastic;
pub mod query;

pub use document::{Coordinates, LocationDocument, Locations};
pub use elastic::ElasticLocationIndex;

use afet_common::models::{LocationQuery, LocationSummary};
use afet_common::Result;
use async_trait::async_trait;

#[async_trait]
pub trait LocationIndex: Send + Sync {
    /// Create or replace the document with ID `id` (the location ID)
    async fn upsert_location(&self, id: i64, document: &LocationDocument) -> Result<()>;

    /// Matching summaries and the total hit count
    async fn search_locations(&self, query: &LocationQuery) -> Result<(Vec<LocationSummary>, u64)>;
}
