//! Common error types for the worker cache

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Common result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the cache store and path layout helpers
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Embedded JSON column could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The cache file carries no version row, or a different one
    #[error(
        "Cache {} has version {}, expected {expected}",
        path.display(),
        found.map(|v| v.to_string()).unwrap_or_else(|| "<missing>".to_string())
    )]
    CacheVersionMismatch {
        path: PathBuf,
        found: Option<i64>,
        expected: i64,
    },

    /// Uniqueness, foreign key or check constraint violated on insert
    #[error("Cache constraint violated on {table}: {message}")]
    CacheConstraint { table: &'static str, message: String },

    /// Recursive element walk went deeper than allowed (cycle in parent_id)
    #[error("Element tree under {root} exceeds {max_depth} levels; parent_id likely forms a cycle")]
    RecursionLimit { root: Uuid, max_depth: u32 },

    /// A stored row could not be mapped back to its model
    #[error("Invalid cache row: {0}")]
    InvalidRow(String),

    /// Filter that the cache cannot answer faithfully
    #[error("Unsupported cache filter: {0}")]
    UnsupportedFilter(String),

    /// Path layout or open-mode misconfiguration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Map an insert failure to `CacheConstraint` when SQLite reports a
    /// constraint violation, leaving other database errors untouched.
    pub fn from_insert(table: &'static str, err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let constraint = matches!(
                db_err.kind(),
                sqlx::error::ErrorKind::UniqueViolation
                    | sqlx::error::ErrorKind::ForeignKeyViolation
                    | sqlx::error::ErrorKind::CheckViolation
                    | sqlx::error::ErrorKind::NotNullViolation
            ) || db_err.message().contains("constraint failed");
            if constraint {
                return Error::CacheConstraint {
                    table,
                    message: db_err.message().to_string(),
                };
            }
        }
        Error::Database(err)
    }

    /// Whether this error is a constraint violation the caller may ignore
    pub fn is_constraint(&self) -> bool {
        matches!(self, Error::CacheConstraint { .. })
    }
}
