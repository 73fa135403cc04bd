//! afet-consumer library interface
//!
//! Feed enrichment consumer: reads geocoded feeds from the message
//! transport, stores them, classifies intent and needs, drops noise and
//! duplicates, and projects the result into the search index.

pub mod api;
pub mod pipeline;
pub mod resolvers;
pub mod runtime;
pub mod search;
pub mod transport;

pub use pipeline::{Disposition, FeedPipeline, MessageHandler, PipelineDeps, PipelineSettings};
pub use runtime::ConsumerMetrics;

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

/// State shared by the health and metrics handlers
#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<ConsumerMetrics>,
    /// Consumer group readiness, flipped on first partition assignment
    pub ready: watch::Receiver<bool>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(metrics: Arc<ConsumerMetrics>, ready: watch::Receiver<bool>) -> Self {
        Self {
            metrics,
            ready,
            startup_time: Utc::now(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new().merge(api::health_routes()).with_state(state)
}
