//! Retrying facade over the annotation API
//!
//! `request` retries transient failures (5xx, dropped connections) with
//! exponential backoff and re-raises the last error once attempts run out.
//! `paginate` streams list results page by page.

use super::operations::Operation;
use super::transport::{ApiRequest, Transport};
use crate::error::ApiError;
use async_stream::try_stream;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Backoff parameters for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Same attempt count, no waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Query string and body of a request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Params {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn body(body: Value) -> Self {
        Self {
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }
}

/// Annotation API client
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Send one operation, retrying transient failures
    pub async fn request(&self, operation: &Operation, params: Params) -> Result<Value, ApiError> {
        let request = ApiRequest {
            operation: operation.name(),
            method: operation.method(),
            path: operation.path(),
            query: params.query,
            body: params.body,
        };
        send_with_retry(self.transport.as_ref(), &self.retry, &request).await
    }

    /// Send one operation and decode its response
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        operation: &Operation,
        params: Params,
    ) -> Result<T, ApiError> {
        let body = self.request(operation, params).await?;
        serde_json::from_value(body).map_err(|e| ApiError::Decode {
            operation: operation.name(),
            message: e.to_string(),
        })
    }

    /// Stream every item of a paginated list
    ///
    /// Pages are fetched one at a time as the stream is consumed. A response
    /// that is a bare JSON array is treated as a single page.
    pub fn paginate(
        &self,
        operation: Operation,
        params: Params,
    ) -> BoxStream<'static, Result<Value, ApiError>> {
        let client = self.clone();
        Box::pin(try_stream! {
            let mut page: u32 = 1;
            loop {
                let page_params = params.clone().query("page", page);
                let body = client.request(&operation, page_params).await?;

                let (items, has_next) = match body {
                    Value::Array(items) => (items, false),
                    Value::Object(mut object) => {
                        let items = match object.remove("results") {
                            Some(Value::Array(items)) => items,
                            _ => Err(ApiError::Decode {
                                operation: operation.name(),
                                message: "paginated response has no results array".to_string(),
                            })?,
                        };
                        let has_next = matches!(object.get("next"), Some(next) if !next.is_null());
                        (items, has_next)
                    }
                    other => Err(ApiError::Decode {
                        operation: operation.name(),
                        message: format!("unexpected paginated response: {other}"),
                    })?,
                };

                tracing::debug!(operation = operation.name(), page, count = items.len(), "Fetched page");
                for item in items {
                    yield item;
                }

                if !has_next {
                    break;
                }
                page += 1;
            }
        })
    }
}

async fn send_with_retry(
    transport: &dyn Transport,
    retry: &RetryPolicy,
    request: &ApiRequest,
) -> Result<Value, ApiError> {
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = match transport.send(request).await {
            Ok(response) if response.is_success() => Ok(response.body),
            Ok(response) => Err(ApiError::Http {
                operation: request.operation,
                status: response.status,
                body: response.body,
            }),
            Err(e) => Err(e),
        };

        match result {
            Ok(body) => {
                if attempt > 1 {
                    tracing::debug!(operation = request.operation, attempt, "API call succeeded after retry");
                }
                return Ok(body);
            }
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = retry.delay_after(attempt);
                tracing::warn!(
                    operation = request.operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Transient API error, will retry: {}",
                    err
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                if err.is_transient() {
                    tracing::error!(
                        operation = request.operation,
                        attempt,
                        "API call failed after retries: {}",
                        err
                    );
                }
                return Err(err);
            }
        }
    }
}
