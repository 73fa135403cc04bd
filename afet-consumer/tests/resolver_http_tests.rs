//! Integration tests for the HTTP collaborators
//!
//! Each test serves a scripted endpoint on a local port and talks to it
//! through the real reqwest clients.
//!
//! Tests cover:
//! - Resolver request bodies, bearer auth and response shapes
//! - Resolver status and decode failures
//! - Search index bulk writes, item errors and search hits

mod helpers;

use afet_common::config::{Endpoint, SearchConfig};
use afet_common::models::{LocationQuery, NeedItem};
use afet_common::Error;
use afet_consumer::resolvers::{
    DuplicateDetector, DuplicationRequest, HttpDuplicateDetector, HttpIntentClassifier,
    HttpNeedsClassifier, IntentClassifier, NeedsClassifier,
};
use afet_consumer::search::{ElasticLocationIndex, LocationDocument, LocationIndex};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use helpers::{scored, serve};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

fn authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Endpoint at `path` answering every POST with `reply`, recording requests
async fn scripted_endpoint(path: &str, reply: Value) -> (Endpoint, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new().route(
        path,
        post({
            let seen = seen.clone();
            move |headers: HeaderMap, Json(body): Json<Value>| async move {
                seen.lock().unwrap().push((authorization(&headers), body));
                Json(reply)
            }
        }),
    );
    let base = serve(app).await;

    let endpoint = Endpoint {
        url: format!("{}{}", base, path),
        api_key: "secret-key".to_string(),
    };
    (endpoint, seen)
}

async fn failing_endpoint(status: StatusCode, body: &'static str) -> Endpoint {
    let app = Router::new().route("/", post(move || async move { (status, body) }));
    Endpoint {
        url: format!("{}/", serve(app).await),
        api_key: "secret-key".to_string(),
    }
}

fn timeout() -> Duration {
    Duration::from_secs(5)
}

#[tokio::test]
async fn test_intent_request_and_bare_response() {
    let (endpoint, seen) = scripted_endpoint(
        "/intent",
        json!([[{"label": "Su", "score": 0.62}, {"label": "Alakasiz", "score": 0.1}]]),
    )
    .await;
    let client = HttpIntentClassifier::new(endpoint, timeout()).unwrap();

    let labels = client.classify("su ve battaniye lazım").await.unwrap();

    assert_eq!(labels, vec![scored("Su", 0.62), scored("Alakasiz", 0.1)]);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0.as_deref(), Some("Bearer secret-key"));
    assert_eq!(seen[0].1, json!({"inputs": "su ve battaniye lazım"}));
}

#[tokio::test]
async fn test_intent_wrapped_response() {
    let (endpoint, _) = scripted_endpoint(
        "/intent",
        json!({"Results": [[{"label": "Enkaz", "score": 0.91}]]}),
    )
    .await;
    let client = HttpIntentClassifier::new(endpoint, timeout()).unwrap();

    let labels = client.classify("enkaz altındayız").await.unwrap();

    assert_eq!(labels, vec![scored("Enkaz", 0.91)]);
}

#[tokio::test]
async fn test_needs_request_and_response() {
    let (endpoint, seen) = scripted_endpoint(
        "/needs",
        json!({"response": [{"processed": {"detailed_intent_tags": ["Battaniye", "Gıda"]}}]}),
    )
    .await;
    let client = HttpNeedsClassifier::new(endpoint, timeout()).unwrap();

    let needs = client.classify("battaniye ve gıda").await.unwrap();

    assert_eq!(needs, vec![NeedItem::open("battaniye"), NeedItem::open("gıda")]);
    assert_eq!(seen.lock().unwrap()[0].1, json!({"inputs": ["battaniye ve gıda"]}));
}

#[tokio::test]
async fn test_needs_empty_response() {
    let (endpoint, _) = scripted_endpoint("/needs", json!({"response": []})).await;
    let client = HttpNeedsClassifier::new(endpoint, timeout()).unwrap();

    assert!(client.classify("yardım").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_request_and_response() {
    let (endpoint, seen) = scripted_endpoint("/duplicate", json!({"is_duplicate": true})).await;
    let client = HttpDuplicateDetector::new(endpoint, timeout()).unwrap();

    let request = DuplicationRequest {
        address: "Hatay, Turkey".to_string(),
        reasons: vec!["su".to_string()],
        needs: vec!["battaniye".to_string()],
    };
    assert!(client.is_duplicate(&request).await.unwrap());

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].0.as_deref(), Some("Bearer secret-key"));
    assert_eq!(
        seen[0].1,
        json!({"address": "Hatay, Turkey", "reasons": ["su"], "needs": ["battaniye"]})
    );
}

#[tokio::test]
async fn test_resolver_error_status() {
    let endpoint = failing_endpoint(StatusCode::INTERNAL_SERVER_ERROR, "model not loaded").await;
    let client = HttpIntentClassifier::new(endpoint, timeout()).unwrap();

    match client.classify("su").await {
        Err(Error::Resolver(message)) => {
            assert!(message.contains("500"), "unexpected message: {}", message);
            assert!(message.contains("model not loaded"));
        }
        other => panic!("expected resolver error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_resolver_undecodable_body() {
    let endpoint = failing_endpoint(StatusCode::OK, "<html>gateway</html>").await;
    let client = HttpDuplicateDetector::new(endpoint, timeout()).unwrap();

    let request = DuplicationRequest {
        address: String::new(),
        reasons: Vec::new(),
        needs: Vec::new(),
    };
    assert!(matches!(
        client.is_duplicate(&request).await,
        Err(Error::Resolver(_))
    ));
}

#[tokio::test]
async fn test_resolver_unreachable() {
    let endpoint = Endpoint {
        url: "http://127.0.0.1:1/intent".to_string(),
        api_key: String::new(),
    };
    let client = HttpIntentClassifier::new(endpoint, Duration::from_secs(1)).unwrap();

    assert!(matches!(client.classify("su").await, Err(Error::Resolver(_))));
}

type SeenBulk = Arc<Mutex<Vec<(Option<String>, String)>>>;

async fn bulk_endpoint(reply: Value) -> (ElasticLocationIndex, SeenBulk) {
    let seen: SeenBulk = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new().route(
        "/_bulk",
        post({
            let seen = seen.clone();
            move |headers: HeaderMap, body: String| async move {
                let content_type = headers
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                seen.lock().unwrap().push((content_type, body));
                Json(reply)
            }
        }),
    );
    let config = SearchConfig {
        url: format!("{}/", serve(app).await),
        index: "locations".to_string(),
    };
    (ElasticLocationIndex::new(&config, timeout()).unwrap(), seen)
}

#[tokio::test]
async fn test_index_upsert_sends_ndjson_bulk() {
    let (index, seen) = bulk_endpoint(json!({
        "errors": false,
        "items": [{"index": {"_id": "42", "status": 200}}]
    }))
    .await;
    let document = LocationDocument {
        formatted_address: "Hatay, Turkey".to_string(),
        entry_id: 42,
        reason: vec!["su".to_string()],
        ..Default::default()
    };

    index.upsert_location(42, &document).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].0.as_deref(), Some("application/x-ndjson"));
    let lines: Vec<Value> = seen[0]
        .1
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], json!({"index": {"_index": "locations", "_id": "42"}}));
    assert_eq!(lines[1]["formatted_address"], "Hatay, Turkey");
    assert_eq!(lines[1]["reason"], json!(["su"]));
    assert_eq!(lines[1]["is_deleted"], false);
}

#[tokio::test]
async fn test_index_upsert_item_error() {
    let (index, _) = bulk_endpoint(json!({
        "errors": true,
        "items": [{"index": {"_id": "42", "status": 400,
                   "error": {"type": "mapper_parsing_exception", "reason": "failed to parse"}}}]
    }))
    .await;

    match index.upsert_location(42, &LocationDocument::default()).await {
        Err(Error::Index(message)) => assert!(message.contains("mapper_parsing_exception")),
        other => panic!("expected index error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_index_search_parses_and_masks_hits() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new().route(
        "/locations/_search",
        post({
            let seen = seen.clone();
            move |Json(body): Json<Value>| async move {
                seen.lock().unwrap().push((None, body));
                Json(json!({
                    "hits": {
                        "total": {"value": 3, "relation": "eq"},
                        "hits": [
                            {"_id": "7", "_source": {
                                "locations": {"center": {"lat": 36.2, "lon": 36.16}},
                                "entry_id": 42, "epoch": 1000,
                                "channel": ["twitter"], "reason": ["su", "enkaz"],
                                "extra_parameters": {"tel": "535 555 55 55", "il": "hatay"},
                                "needs": [{"label": "battaniye", "status": true}]
                            }},
                            {"_id": "not-a-number", "_source": {}}
                        ]
                    }
                }))
            }
        }),
    );
    let config = SearchConfig {
        url: serve(app).await,
        index: "locations".to_string(),
    };
    let index = ElasticLocationIndex::new(&config, timeout()).unwrap();

    let query = LocationQuery {
        channel: Some("twitter".to_string()),
        include_extra_parameters: true,
        ..Default::default()
    };
    let (summaries, total) = index.search_locations(&query).await.unwrap();

    assert_eq!(total, 3);
    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary.id, 7);
    assert_eq!(summary.loc, [36.2, 36.16]);
    assert_eq!(summary.reason.as_deref(), Some("su,enkaz"));
    assert_eq!(summary.needs, vec![NeedItem::open("battaniye")]);
    let extra = summary.extra_parameters.as_ref().unwrap().as_map().unwrap();
    assert_eq!(extra["tel"], "(53)5555-****");
    assert_eq!(extra["il"], "hatay");

    let sent = seen.lock().unwrap()[0].1.clone();
    assert!(sent["query"]["bool"]["filter"].is_array());
}
