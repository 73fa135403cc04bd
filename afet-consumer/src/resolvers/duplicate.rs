//! Duplicate report detector client

use super::ResolverClient;
use afet_common::config::Endpoint;
use afet_common::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the detector compares against recent reports
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicationRequest {
    pub address: String,
    pub reasons: Vec<String>,
    pub needs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DuplicationResponse {
    is_duplicate: bool,
}

#[async_trait]
pub trait DuplicateDetector: Send + Sync {
    async fn is_duplicate(&self, request: &DuplicationRequest) -> Result<bool>;
}

pub struct HttpDuplicateDetector {
    client: ResolverClient,
}

impl HttpDuplicateDetector {
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: ResolverClient::new("duplicate", endpoint, timeout)?,
        })
    }
}

#[async_trait]
impl DuplicateDetector for HttpDuplicateDetector {
    async fn is_duplicate(&self, request: &DuplicationRequest) -> Result<bool> {
        let response: DuplicationResponse = self.client.post_json(request).await?;
        Ok(response.is_duplicate)
    }
}
