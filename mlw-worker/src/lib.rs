//! mlw-worker library
//!
//! Worker side of the annotation pipeline: the annotation API client, the
//! publishers that write results to the remote and mirror them in the task
//! cache, activity tracking, the run report and the per-element driver.

pub mod activity;
pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod publishers;
pub mod reporter;
pub mod secrets;
pub mod worker;

pub use crate::error::{ApiError, Result, WorkerError};
pub use crate::models::Element;
pub use crate::publishers::Publishers;
pub use crate::worker::{ElementProcessor, ElementsWorker, RunSummary};
