//! Error types for mlw-worker
//!
//! `ApiError` is what the remote facade raises; publishers pattern-match on
//! its status and body. `WorkerError` is everything the worker library
//! returns to its callers.

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Remote API error
#[derive(Debug, Error)]
pub enum ApiError {
    /// Non-2xx response, with the parsed body (JSON, or the raw text as a string)
    #[error("{operation} failed with HTTP {status}: {body}")]
    Http {
        operation: &'static str,
        status: u16,
        body: Value,
    },

    /// Connection refused, reset, timed out...
    #[error("Network error on {operation}: {message}")]
    Network {
        operation: &'static str,
        message: String,
    },

    /// Response body could not be decoded into the expected shape
    #[error("Could not decode {operation} response: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },

    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// HTTP status, when the remote answered
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Parsed response body, when the remote answered
    pub fn body(&self) -> Option<&Value> {
        match self {
            ApiError::Http { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    /// Server-side failures and dropped connections are worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Http { status, .. } => *status >= 500,
            ApiError::Network { .. } => true,
            _ => false,
        }
    }

    /// Whether a 400 body lists `message` among its `non_field_errors`
    pub fn has_non_field_error(&self, message: &str) -> bool {
        if self.status() != Some(400) {
            return false;
        }
        self.body()
            .and_then(|body| body.get("non_field_errors"))
            .and_then(Value::as_array)
            .map(|errors| errors.iter().any(|e| e.as_str() == Some(message)))
            .unwrap_or(false)
    }
}

/// Worker library error
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Invalid argument handed to a publisher
    #[error("Validation error: {0}")]
    Validation(String),

    /// Filter the cache cannot answer
    #[error("Unsupported filter on cache: {0}")]
    UnsupportedFilter(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Cache error: {0}")]
    Cache(#[from] mlw_common::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Developer mode was given a model directory that doesn't exist
    #[error("Model directory not found: {0}")]
    ModelNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Element {0} has no image")]
    MissingImage(Uuid),

    #[error("Element {0} has no polygon")]
    MissingPolygon(Uuid),

    #[error("No elements to process")]
    NoElements,

    #[error("All {0} elements failed")]
    AllElementsFailed(usize),
}

impl WorkerError {
    /// Short class name recorded in the run report
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::Validation(_) => "ValidationError",
            WorkerError::UnsupportedFilter(_) => "UnsupportedFilter",
            WorkerError::Api(ApiError::Http { .. }) => "ApiHttpError",
            WorkerError::Api(_) => "ApiError",
            WorkerError::Cache(_) => "CacheError",
            WorkerError::Config(_) => "ConfigError",
            WorkerError::ModelNotFound(_) => "ModelNotFound",
            WorkerError::Io(_) => "IoError",
            WorkerError::Json(_) => "JsonError",
            WorkerError::Yaml(_) => "YamlError",
            WorkerError::Toml(_) => "TomlError",
            WorkerError::MissingImage(_) => "MissingImage",
            WorkerError::MissingPolygon(_) => "MissingPolygon",
            WorkerError::NoElements => "NoElements",
            WorkerError::AllElementsFailed(_) => "AllElementsFailed",
        }
    }

    /// Unsupported cache filters raised by the common crate keep their kind
    pub(crate) fn from_cache(err: mlw_common::Error) -> Self {
        match err {
            mlw_common::Error::UnsupportedFilter(msg) => WorkerError::UnsupportedFilter(msg),
            other => WorkerError::Cache(other),
        }
    }
}

/// Result type for the worker library
pub type Result<T> = std::result::Result<T, WorkerError>;
