//! Annotation API access

pub mod client;
pub mod operations;
pub mod transport;

pub use client::{ApiClient, Params, RetryPolicy};
pub use operations::Operation;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport, DEFAULT_TIMEOUT};
