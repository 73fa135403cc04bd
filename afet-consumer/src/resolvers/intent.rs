//! Intent classifier client and acceptance policy
//!
//! The classifier scores each candidate intent ("su", "enkaz", ...). Labels
//! at or above the acceptance threshold are kept, lowercased. The irrelevant
//! label at or above the rejection threshold marks the whole feed as noise.

use super::ResolverClient;
use afet_common::config::{Endpoint, ResolverConfig};
use afet_common::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredLabel {
    pub label: String,
    pub score: f64,
}

#[derive(Debug, Serialize)]
struct IntentRequest<'a> {
    inputs: &'a str,
}

/// Deployed classifiers answer with a bare nested list; the documented
/// contract wraps it in `Results`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IntentResponse {
    Bare(Vec<Vec<ScoredLabel>>),
    Wrapped {
        #[serde(rename = "Results")]
        results: Vec<Vec<ScoredLabel>>,
    },
}

impl IntentResponse {
    /// Scores for the single input that was sent
    fn into_first(self) -> Vec<ScoredLabel> {
        let results = match self {
            IntentResponse::Wrapped { results } => results,
            IntentResponse::Bare(results) => results,
        };
        results.into_iter().next().unwrap_or_default()
    }
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Scored labels for `text`, in classifier order
    async fn classify(&self, text: &str) -> Result<Vec<ScoredLabel>>;
}

pub struct HttpIntentClassifier {
    client: ResolverClient,
}

impl HttpIntentClassifier {
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: ResolverClient::new("intent", endpoint, timeout)?,
        })
    }
}

#[async_trait]
impl IntentClassifier for HttpIntentClassifier {
    async fn classify(&self, text: &str) -> Result<Vec<ScoredLabel>> {
        let response: IntentResponse = self
            .client
            .post_json(&IntentRequest { inputs: text })
            .await?;
        Ok(response.into_first())
    }
}

/// Outcome of applying [`IntentPolicy`] to a classification
#[derive(Debug, Clone, PartialEq)]
pub enum IntentVerdict {
    /// The feed is noise and should be removed
    Irrelevant,
    /// Accepted labels, lowercased, in classifier order (may be empty)
    Accepted(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntentPolicy {
    pub accept_threshold: f64,
    pub reject_threshold: f64,
    pub irrelevant_label: String,
}

impl Default for IntentPolicy {
    fn default() -> Self {
        Self::from(&ResolverConfig::default())
    }
}

impl From<&ResolverConfig> for IntentPolicy {
    fn from(config: &ResolverConfig) -> Self {
        Self {
            accept_threshold: config.accept_threshold,
            reject_threshold: config.reject_threshold,
            irrelevant_label: config.irrelevant_label.clone(),
        }
    }
}

impl IntentPolicy {
    pub fn evaluate(&self, labels: &[ScoredLabel]) -> IntentVerdict {
        let mut accepted = Vec::new();

        for scored in labels.iter().filter(|l| l.score >= self.accept_threshold) {
            if scored.label == self.irrelevant_label && scored.score >= self.reject_threshold {
                return IntentVerdict::Irrelevant;
            }
            accepted.push(scored.label.to_lowercase());
        }

        IntentVerdict::Accepted(accepted)
    }
}
