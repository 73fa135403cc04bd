//! Resolver service clients
//!
//! Three stateless HTTP collaborators classify feed text. Each is a trait so
//! the intent stage can be exercised without the network; the reqwest
//! implementations share [`ResolverClient`] for auth, status and decoding.

pub mod duplicate;
pub mod intent;
pub mod needs;

pub use duplicate::{DuplicateDetector, DuplicationRequest, HttpDuplicateDetector};
pub use intent::{HttpIntentClassifier, IntentClassifier, IntentPolicy, IntentVerdict, ScoredLabel};
pub use needs::{HttpNeedsClassifier, NeedsClassifier};

use afet_common::config::Endpoint;
use afet_common::{Error, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// POSTs JSON to one resolver endpoint with bearer authorization
#[derive(Clone)]
pub struct ResolverClient {
    name: &'static str,
    http: Client,
    endpoint: Endpoint,
}

impl ResolverClient {
    pub fn new(name: &'static str, endpoint: Endpoint, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Resolver(format!("{} client build failed: {}", name, e)))?;

        Ok(Self {
            name,
            http,
            endpoint,
        })
    }

    /// Send `body` and decode a successful response.
    ///
    /// Transport failures, non-2xx statuses and undecodable bodies are all
    /// [`Error::Resolver`]; there is no retry here.
    pub async fn post_json<B, R>(&self, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .http
            .post(&self.endpoint.url)
            .bearer_auth(&self.endpoint.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Resolver(format!("{} request failed: {}", self.name, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Resolver(format!(
                "{} returned {}: {}",
                self.name, status, text
            )));
        }

        let decoded = response
            .json::<R>()
            .await
            .map_err(|e| Error::Resolver(format!("{} response decode failed: {}", self.name, e)))?;

        debug!(resolver = self.name, %status, "Resolver responded");
        Ok(decoded)
    }
}
