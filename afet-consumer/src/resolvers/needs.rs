//! Needs classifier client

use super::ResolverClient;
use afet_common::config::Endpoint;
use afet_common::models::NeedItem;
use afet_common::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct NeedsRequest<'a> {
    inputs: [&'a str; 1],
}

#[derive(Debug, Default, Deserialize)]
struct NeedsResponse {
    #[serde(default)]
    response: Vec<NeedsResult>,
}

#[derive(Debug, Default, Deserialize)]
struct NeedsResult {
    #[serde(default)]
    processed: Processed,
}

#[derive(Debug, Default, Deserialize)]
struct Processed {
    #[serde(default)]
    detailed_intent_tags: Vec<String>,
}

impl NeedsResponse {
    /// Open needs for the first input, labels lowercased
    fn into_needs(self) -> Vec<NeedItem> {
        self.response
            .into_iter()
            .next()
            .map(|result| {
                result
                    .processed
                    .detailed_intent_tags
                    .iter()
                    .map(|tag| NeedItem::open(tag.to_lowercase()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
pub trait NeedsClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Vec<NeedItem>>;
}

pub struct HttpNeedsClassifier {
    client: ResolverClient,
}

impl HttpNeedsClassifier {
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: ResolverClient::new("needs", endpoint, timeout)?,
        })
    }
}

#[async_trait]
impl NeedsClassifier for HttpNeedsClassifier {
    async fn classify(&self, text: &str) -> Result<Vec<NeedItem>> {
        let response: NeedsResponse = self
            .client
            .post_json(&NeedsRequest { inputs: [text] })
            .await?;
        Ok(response.into_needs())
    }
}
