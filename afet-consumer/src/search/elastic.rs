//! Elasticsearch-compatible location index client

use super::document::LocationDocument;
use super::query::build_search;
use super::LocationIndex;
use afet_common::config::SearchConfig;
use afet_common::masking::MaskingPolicy;
use afet_common::models::{LocationQuery, LocationSummary};
use afet_common::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    total: Total,
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Total {
    value: u64,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source")]
    source: LocationDocument,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<Value>,
}

impl BulkResponse {
    /// First item-level error, for the failure message
    fn first_error(&self) -> Option<&Value> {
        self.items
            .iter()
            .filter_map(|item| item.as_object()?.values().next()?.get("error"))
            .next()
    }
}

pub struct ElasticLocationIndex {
    http: Client,
    base_url: String,
    index: String,
    masking: MaskingPolicy,
}

impl ElasticLocationIndex {
    pub fn new(config: &SearchConfig, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Index(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            masking: MaskingPolicy::default(),
        })
    }

    pub fn with_masking(mut self, masking: MaskingPolicy) -> Self {
        self.masking = masking;
        self
    }

    /// NDJSON `_bulk` body indexing `document` under `id`
    fn bulk_body(&self, id: i64, document: &LocationDocument) -> Result<String> {
        let action = json!({"index": {"_index": self.index, "_id": id.to_string()}});
        let mut body = serde_json::to_string(&action)?;
        body.push('\n');
        body.push_str(&serde_json::to_string(document)?);
        body.push('\n');
        Ok(body)
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Index(format!("{} request failed: {}", what, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Index(format!("{} returned {}: {}", what, status, text)));
        }
        Ok(response)
    }
}

#[async_trait]
impl LocationIndex for ElasticLocationIndex {
    async fn upsert_location(&self, id: i64, document: &LocationDocument) -> Result<()> {
        let body = self.bulk_body(id, document)?;
        let request = self
            .http
            .post(format!("{}/_bulk", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body);

        let response: BulkResponse = self
            .send(request, "bulk")
            .await?
            .json()
            .await
            .map_err(|e| Error::Index(format!("bulk response decode failed: {}", e)))?;

        if response.errors {
            let detail = response
                .first_error()
                .map(Value::to_string)
                .unwrap_or_else(|| "unknown item error".to_string());
            return Err(Error::Index(format!("bulk indexing of {} failed: {}", id, detail)));
        }

        debug!(id, index = %self.index, "Location document indexed");
        Ok(())
    }

    async fn search_locations(&self, query: &LocationQuery) -> Result<(Vec<LocationSummary>, u64)> {
        let request = self
            .http
            .post(format!("{}/{}/_search", self.base_url, self.index))
            .json(&build_search(query));

        let response: SearchResponse = self
            .send(request, "search")
            .await?
            .json()
            .await
            .map_err(|e| Error::Index(format!("search response decode failed: {}", e)))?;

        let total = response.hits.total.value;
        let mut results = Vec::with_capacity(response.hits.hits.len());
        for hit in response.hits.hits {
            let Ok(id) = hit.id.parse::<i64>() else {
                warn!(id = %hit.id, "Skipping hit with non-numeric id");
                continue;
            };
            results.push(
                hit.source
                    .into_summary(id, query.include_extra_parameters, &self.masking),
            );
        }

        Ok((results, total))
    }
}
