//! Worker activity tracking
//!
//! The remote keeps one activity per (worker version, element). Moving an
//! element to `Started` is how concurrent workers sharing a worker version
//! avoid processing the same element twice: a conflict on that transition
//! means another worker already took it.

use crate::api::{ApiClient, Operation, Params};
use crate::error::{Result, WorkerError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Activity state of an element for a worker version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    /// Initial state, element waiting to be processed
    Queued,
    /// A worker is processing the element
    Started,
    /// Processing succeeded
    Processed,
    /// Processing failed
    Error,
}

impl ActivityState {
    /// No further transition leaves these states
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Error)
    }

    /// Queued -> Started -> {Processed, Error}, and Queued -> Error
    pub fn can_transition_to(&self, next: ActivityState) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Started)
                | (Self::Queued, Self::Error)
                | (Self::Started, Self::Processed)
                | (Self::Started, Self::Error)
        )
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Started => write!(f, "started"),
            Self::Processed => write!(f, "processed"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for ActivityState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "started" => Ok(Self::Started),
            "processed" => Ok(Self::Processed),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid activity state: {s}")),
        }
    }
}

/// Pushes activity transitions to the remote
///
/// When disabled (developer mode, activities not ready on the process, or no
/// worker version) every update is a no-op reporting success.
#[derive(Debug)]
pub struct ActivityTracker {
    api: ApiClient,
    worker_version_id: Option<Uuid>,
    process_id: Option<Uuid>,
    enabled: bool,
    states: HashMap<Uuid, ActivityState>,
}

impl ActivityTracker {
    pub fn new(
        api: ApiClient,
        worker_version_id: Option<Uuid>,
        process_id: Option<Uuid>,
        enabled: bool,
    ) -> Self {
        let enabled = enabled && worker_version_id.is_some();
        if !enabled {
            tracing::info!("Activity tracking disabled");
        }
        Self {
            api,
            worker_version_id,
            process_id,
            enabled,
            states: HashMap::new(),
        }
    }

    pub fn disabled(api: ApiClient) -> Self {
        Self::new(api, None, None, false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Last state pushed for an element
    pub fn state(&self, element_id: Uuid) -> Option<ActivityState> {
        self.states.get(&element_id).copied()
    }

    /// Move `element_id` to `state`
    ///
    /// Returns `Ok(false)` when the remote answers 409 to `Started`: the
    /// element belongs to another worker and must be skipped.
    pub async fn update(&mut self, element_id: Uuid, state: ActivityState) -> Result<bool> {
        let Some(worker_version_id) = self.worker_version_id.filter(|_| self.enabled) else {
            return Ok(true);
        };

        let current = self.state(element_id).unwrap_or(ActivityState::Queued);
        if !current.can_transition_to(state) {
            return Err(WorkerError::Validation(format!(
                "Activity of element {element_id} cannot go from {current} to {state}"
            )));
        }

        let body = json!({
            "element_id": element_id,
            "process_id": self.process_id,
            "state": state,
        });

        match self
            .api
            .request(
                &Operation::UpdateWorkerActivity { worker_version_id },
                Params::body(body),
            )
            .await
        {
            Ok(_) => {
                tracing::debug!(element_id = %element_id, %state, "Updated worker activity");
                self.states.insert(element_id, state);
                Ok(true)
            }
            Err(e) if e.is_conflict() && state == ActivityState::Started => {
                tracing::debug!(
                    element_id = %element_id,
                    "Element already taken by another worker, skipping"
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
