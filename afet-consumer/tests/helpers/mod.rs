//! Shared fakes for pipeline and runtime tests
//!
//! The store is the real SQLite implementation on an in-memory database;
//! the transport, resolvers and index are scripted in-process fakes.

#![allow(dead_code)]

use afet_common::config::DatabaseConfig;
use afet_common::db::{init_database, FeedStore, SqliteFeedStore};
use afet_common::models::{
    FeedEntry, FeedView, Location, LocationQuery, LocationSummary, LocationVerification, NeedItem,
};
use afet_common::{Error, Result};
use afet_consumer::resolvers::{
    DuplicateDetector, DuplicationRequest, IntentClassifier, NeedsClassifier, ScoredLabel,
};
use afet_consumer::search::{LocationDocument, LocationIndex};
use afet_consumer::transport::{InboundMessage, OffsetCommitter, Publisher};
use afet_consumer::{FeedPipeline, PipelineDeps, PipelineSettings};
use async_trait::async_trait;
use axum::Router;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const LOCATION_TOPIC: &str = "topic.feeds.location";
pub const INTENT_TOPIC: &str = "topic.feeds.intent";

pub async fn memory_store() -> Arc<SqliteFeedStore> {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
    };
    let pool = init_database(&config).await.expect("in-memory database");
    Arc::new(SqliteFeedStore::new(pool))
}

/// Make the next feed and location IDs equal `next`
pub async fn seed_ids(store: &SqliteFeedStore, next: i64) {
    for table in ["feeds_entry", "feeds_location"] {
        sqlx::query("INSERT INTO sqlite_sequence (name, seq) VALUES (?, ?)")
            .bind(table)
            .bind(next - 1)
            .execute(store.pool())
            .await
            .unwrap();
    }
}

pub async fn count_rows(store: &SqliteFeedStore, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(store.pool())
        .await
        .unwrap()
}

/// Location row regardless of its deleted flag
pub async fn raw_location(store: &SqliteFeedStore, entry_id: i64) -> (String, String, bool) {
    sqlx::query_as("SELECT reason, needs, is_deleted FROM feeds_location WHERE entry_id = ?")
        .bind(entry_id)
        .fetch_one(store.pool())
        .await
        .unwrap()
}

pub fn message(topic: &str, offset: i64, payload: &[u8]) -> InboundMessage {
    InboundMessage {
        topic: topic.to_string(),
        partition: 0,
        offset,
        key: None,
        payload: Some(payload.to_vec()),
        timestamp: None,
    }
}

pub fn scored(label: &str, score: f64) -> ScoredLabel {
    ScoredLabel {
        label: label.to_string(),
        score,
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub sent: Mutex<Vec<(String, String, Vec<u8>)>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Transport("broker unavailable".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((topic.to_string(), key.to_string(), payload.to_vec()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingCommitter {
    pub committed: Mutex<Vec<(String, i32, i64)>>,
}

impl OffsetCommitter for RecordingCommitter {
    fn commit(&self, message: &InboundMessage) -> Result<()> {
        self.committed.lock().unwrap().push((
            message.topic.clone(),
            message.partition,
            message.offset + 1,
        ));
        Ok(())
    }
}

#[derive(Default)]
pub struct ScriptedIntents {
    pub labels: Mutex<Vec<ScoredLabel>>,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl IntentClassifier for ScriptedIntents {
    async fn classify(&self, _text: &str) -> Result<Vec<ScoredLabel>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Resolver("intent returned 503".to_string()));
        }
        Ok(self.labels.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct ScriptedNeeds {
    pub needs: Mutex<Vec<NeedItem>>,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl NeedsClassifier for ScriptedNeeds {
    async fn classify(&self, _text: &str) -> Result<Vec<NeedItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Resolver("needs returned 500".to_string()));
        }
        Ok(self.needs.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct ScriptedDuplicates {
    pub duplicate: AtomicBool,
    pub fail: AtomicBool,
    pub requests: Mutex<Vec<DuplicationRequest>>,
}

#[async_trait]
impl DuplicateDetector for ScriptedDuplicates {
    async fn is_duplicate(&self, request: &DuplicationRequest) -> Result<bool> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Resolver("duplicate request failed".to_string()));
        }
        Ok(self.duplicate.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
pub struct RecordingIndex {
    pub documents: Mutex<Vec<(i64, LocationDocument)>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl LocationIndex for RecordingIndex {
    async fn upsert_location(&self, id: i64, document: &LocationDocument) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Index("cluster red".to_string()));
        }
        self.documents.lock().unwrap().push((id, document.clone()));
        Ok(())
    }

    async fn search_locations(&self, _query: &LocationQuery) -> Result<(Vec<LocationSummary>, u64)> {
        Ok((Vec::new(), 0))
    }
}

/// Store whose `create_feed` fails a set number of times before delegating,
/// then takes `settle` to return after the write is durable
pub struct FlakyStore {
    pub inner: Arc<SqliteFeedStore>,
    pub failures_left: AtomicUsize,
    pub settle: Duration,
}

impl FlakyStore {
    pub fn failing(inner: Arc<SqliteFeedStore>, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
            settle: Duration::ZERO,
        }
    }

    pub fn slow(inner: Arc<SqliteFeedStore>, settle: Duration) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(0),
            settle,
        }
    }
}

#[async_trait]
impl FeedStore for FlakyStore {
    async fn create_feed(&self, entry: &FeedEntry, location: &Location) -> Result<i64> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(Error::Internal("database is locked".to_string()));
        }
        let id = self.inner.create_feed(entry, location).await?;
        tokio::time::sleep(self.settle).await;
        Ok(id)
    }

    async fn set_location_intent_and_needs(
        &self,
        entry_id: i64,
        reason: &str,
        needs: &[NeedItem],
    ) -> Result<u64> {
        self.inner
            .set_location_intent_and_needs(entry_id, reason, needs)
            .await
    }

    async fn soft_delete_location(&self, entry_id: i64) -> Result<u64> {
        self.inner.soft_delete_location(entry_id).await
    }

    async fn location_by_entry(&self, entry_id: i64) -> Result<Option<Location>> {
        self.inner.location_by_entry(entry_id).await
    }

    async fn get_feed(&self, id: i64) -> Result<Option<FeedView>> {
        self.inner.get_feed(id).await
    }

    async fn get_locations(&self, query: &LocationQuery) -> Result<Vec<LocationSummary>> {
        self.inner.get_locations(query).await
    }

    async fn verify_feed_locations(&self, updates: &[LocationVerification]) -> Result<u64> {
        self.inner.verify_feed_locations(updates).await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

/// Pipeline wired to fakes, with handles to inspect each of them
pub struct Harness {
    pub store: Arc<SqliteFeedStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub intents: Arc<ScriptedIntents>,
    pub needs: Arc<ScriptedNeeds>,
    pub duplicates: Arc<ScriptedDuplicates>,
    pub index: Arc<RecordingIndex>,
    pub pipeline: Arc<FeedPipeline>,
}

impl Harness {
    pub async fn new() -> Self {
        let store = memory_store().await;
        Self::with_store(store.clone(), store).await
    }

    /// `pipeline_store` is what the pipeline writes through; `store` is
    /// what the test inspects
    pub async fn with_store(store: Arc<SqliteFeedStore>, pipeline_store: Arc<dyn FeedStore>) -> Self {
        Self::with_settings(store, pipeline_store, PipelineSettings::default()).await
    }

    pub async fn with_settings(
        store: Arc<SqliteFeedStore>,
        pipeline_store: Arc<dyn FeedStore>,
        settings: PipelineSettings,
    ) -> Self {
        let publisher = Arc::new(RecordingPublisher::default());
        let intents = Arc::new(ScriptedIntents::default());
        let needs = Arc::new(ScriptedNeeds::default());
        let duplicates = Arc::new(ScriptedDuplicates::default());
        let index = Arc::new(RecordingIndex::default());

        let deps = PipelineDeps {
            store: pipeline_store,
            publisher: publisher.clone(),
            index: index.clone(),
            intents: intents.clone(),
            needs: needs.clone(),
            duplicates: duplicates.clone(),
        };
        let pipeline = Arc::new(FeedPipeline::new(deps, settings));

        Self {
            store,
            publisher,
            intents,
            needs,
            duplicates,
            index,
            pipeline,
        }
    }

    pub fn script_intents(&self, labels: Vec<ScoredLabel>) {
        *self.intents.labels.lock().unwrap() = labels;
    }

    pub fn script_needs(&self, needs: Vec<NeedItem>) {
        *self.needs.needs.lock().unwrap() = needs;
    }

    pub fn published(&self) -> Vec<(String, String, Vec<u8>)> {
        self.publisher.sent.lock().unwrap().clone()
    }

    pub fn indexed(&self) -> Vec<(i64, LocationDocument)> {
        self.index.documents.lock().unwrap().clone()
    }
}

/// Serve `app` on an ephemeral local port, returning its base URL
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}
