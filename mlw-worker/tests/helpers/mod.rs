//! Test Helper Utilities
//!
//! Scripted stand-in for the annotation API plus publisher fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use mlw_common::cache::CachedImage;
use mlw_common::{CacheStore, OpenMode};
use mlw_worker::api::{ApiClient, ApiRequest, ApiResponse, RetryPolicy, Transport};
use mlw_worker::models::ElementSource;
use mlw_worker::publishers::{PublishContext, Publishers, WorkerIdentity};
use mlw_worker::reporter::Reporter;
use mlw_worker::{ApiError, Element};
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use uuid::Uuid;

#[derive(Debug, Clone)]
enum Reply {
    Response(ApiResponse),
    ConnectionReset,
}

/// Transport answering from scripted replies, keyed by method and path
///
/// Replies for a route are consumed in order; the last one keeps being
/// served. Unscripted routes answer 404.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    calls: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, method: Method, path: &str, reply: Reply) {
        self.routes
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(reply);
    }

    pub fn reply(&self, method: Method, path: &str, status: u16, body: Value) {
        self.push(method, path, Reply::Response(ApiResponse { status, body }));
    }

    pub fn reset_connection(&self, method: Method, path: &str) {
        self.push(method, path, Reply::ConnectionReset);
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: Method, path: &str) -> Vec<ApiRequest> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method && c.path == path)
            .collect()
    }

    /// Every request that isn't a GET
    pub fn mutations(&self) -> Vec<ApiRequest> {
        self.calls()
            .into_iter()
            .filter(|c| c.method != Method::GET)
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.calls.lock().unwrap().push(request.clone());

        let reply = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&(request.method.clone(), request.path.clone())) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(Reply::Response(response)) => Ok(response),
            Some(Reply::ConnectionReset) => Err(ApiError::Network {
                operation: request.operation,
                message: "connection reset by peer".to_string(),
            }),
            None => Ok(ApiResponse {
                status: 404,
                body: json!({ "detail": "Not found." }),
            }),
        }
    }
}

pub fn api_client(transport: &Arc<MockTransport>) -> ApiClient {
    ApiClient::new(transport.clone(), RetryPolicy::immediate(5))
}

pub fn identity(dev_mode: bool) -> WorkerIdentity {
    WorkerIdentity {
        worker_run_id: Some(Uuid::new_v4()),
        worker_version_id: Some(Uuid::new_v4()),
        corpus_id: Some(Uuid::new_v4()),
        dev_mode,
    }
}

/// Publishers over the mock, with or without a cache
pub struct TestPublishers {
    pub transport: Arc<MockTransport>,
    pub publishers: Publishers,
    pub reporter: Arc<tokio::sync::Mutex<Reporter>>,
    pub cache: Option<CacheStore>,
    pub identity: WorkerIdentity,
    _temp_dir: TempDir,
}

pub async fn test_publishers(with_cache: bool, dev_mode: bool) -> TestPublishers {
    let temp_dir = TempDir::new().unwrap();
    let cache = if with_cache {
        Some(
            CacheStore::open(&temp_dir.path().join("db.sqlite"), OpenMode::CreateIfMissing)
                .await
                .unwrap(),
        )
    } else {
        None
    };
    let transport = MockTransport::new();
    let reporter = Arc::new(tokio::sync::Mutex::new(Reporter::new("test", None)));
    let identity = identity(dev_mode);
    let context = Arc::new(PublishContext::new(
        api_client(&transport),
        cache.clone(),
        reporter.clone(),
        identity.clone(),
    ));
    TestPublishers {
        transport,
        publishers: Publishers::new(context),
        reporter,
        cache,
        identity,
        _temp_dir: temp_dir,
    }
}

pub fn image() -> CachedImage {
    CachedImage {
        id: Uuid::new_v4(),
        width: 1000,
        height: 1000,
        url: "http://iiif.example.com/page".to_string(),
    }
}

pub fn square(size: f64) -> Vec<[f64; 2]> {
    vec![[0.0, 0.0], [0.0, size], [size, size], [size, 0.0]]
}

/// Page element with an image and a polygon, as fetched from the remote
pub fn page() -> Element {
    Element {
        id: Uuid::new_v4(),
        element_type: "page".to_string(),
        name: Some("1r".to_string()),
        parent_id: None,
        image: Some(image()),
        polygon: Some(square(1000.0)),
        rotation_angle: 0,
        mirrored: false,
        confidence: None,
        worker_version_id: None,
        worker_run_id: None,
        initial: true,
        source: ElementSource::Remote,
    }
}

/// Remote payload for an element with a zone
pub fn remote_element(id: Uuid, element_type: &str) -> Value {
    json!({
        "id": id,
        "type": element_type,
        "name": "element",
        "zone": {
            "polygon": [[0, 0], [0, 100], [100, 100], [100, 0]],
            "image": {
                "id": Uuid::new_v4(),
                "width": 100,
                "height": 100,
                "url": "http://iiif.example.com/img"
            }
        },
        "rotation_angle": 0,
        "mirrored": false
    })
}

/// Store an element and its image in the cache
pub async fn cache_element(cache: &CacheStore, element: &Element) {
    if let Some(image) = &element.image {
        cache.ensure_image(image).await.unwrap();
    }
    cache.insert_one(&element.to_cached()).await.unwrap();
}

/// Paginated list response
pub fn page_of(results: Vec<Value>, next: Option<&str>) -> Value {
    json!({
        "count": results.len(),
        "next": next,
        "results": results,
    })
}
