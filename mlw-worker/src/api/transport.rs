//! HTTP transport for the annotation API
//!
//! The client talks to the remote through the [`Transport`] trait so that
//! tests can script responses. [`HttpTransport`] is the reqwest-backed
//! implementation used in production.

use crate::error::ApiError;
use async_trait::async_trait;
use reqwest::{Method, Url};
use serde_json::Value;
use std::time::Duration;

const USER_AGENT: &str = concat!("mlw-worker/", env!("CARGO_PKG_VERSION"));

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One request, fully resolved
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub operation: &'static str,
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// Raw answer from the remote
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends requests to the remote
///
/// Implementations return `Ok` for any HTTP answer, whatever its status;
/// `Err` is reserved for requests that never got an answer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError>;
}

/// reqwest-backed transport with token authentication
pub struct HttpTransport {
    http_client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, ApiError> {
        // Url::join drops the last segment of a base without trailing slash
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url =
            Url::parse(&normalized).map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))?;

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network {
                operation: "Connect",
                message: e.to_string(),
            })?;

        Ok(Self {
            http_client,
            base_url,
            token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = self
            .base_url
            .join(&request.path)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {e}", request.path)))?;

        tracing::debug!(operation = request.operation, method = %request.method, url = %url, "Calling API");

        let mut builder = self
            .http_client
            .request(request.method.clone(), url)
            .query(&request.query);
        if let Some(token) = &self.token {
            builder = builder.header(reqwest::header::AUTHORIZATION, format!("Token {token}"));
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| ApiError::Network {
            operation: request.operation,
            message: e.to_string(),
        })?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| ApiError::Network {
            operation: request.operation,
            message: e.to_string(),
        })?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(ApiResponse { status, body })
    }
}
