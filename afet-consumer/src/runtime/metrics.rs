//! Consumer counters exposed on `/metrics`

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TopicStats {
    pub received: u64,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub topics: BTreeMap<String, TopicStats>,
    pub acked: u64,
    pub retried: u64,
}

#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    topics: Mutex<BTreeMap<String, TopicStats>>,
    acked: AtomicU64,
    retried: AtomicU64,
}

impl ConsumerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a delivered message; `timestamp` is the message's own timestamp
    pub fn record_received(&self, topic: &str, timestamp: Option<DateTime<Utc>>) {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let stats = topics.entry(topic.to_string()).or_default();
        stats.received += 1;
        if timestamp.is_some() {
            stats.last_message_at = timestamp;
        }
    }

    pub fn record_ack(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let topics = self
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        MetricsSnapshot {
            topics,
            acked: self.acked.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
        }
    }

    /// Plain-text exposition format
    pub fn render(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();

        let _ = writeln!(out, "# TYPE afet_consumer_messages_received_total counter");
        for (topic, stats) in &snapshot.topics {
            let _ = writeln!(
                out,
                "afet_consumer_messages_received_total{{topic=\"{}\"}} {}",
                topic, stats.received
            );
        }

        let _ = writeln!(out, "# TYPE afet_consumer_last_message_timestamp_seconds gauge");
        for (topic, stats) in &snapshot.topics {
            if let Some(at) = stats.last_message_at {
                let _ = writeln!(
                    out,
                    "afet_consumer_last_message_timestamp_seconds{{topic=\"{}\"}} {}",
                    topic,
                    at.timestamp()
                );
            }
        }

        let _ = writeln!(out, "# TYPE afet_consumer_messages_acked_total counter");
        let _ = writeln!(out, "afet_consumer_messages_acked_total {}", snapshot.acked);
        let _ = writeln!(out, "# TYPE afet_consumer_messages_retried_total counter");
        let _ = writeln!(out, "afet_consumer_messages_retried_total {}", snapshot.retried);

        out
    }
}
