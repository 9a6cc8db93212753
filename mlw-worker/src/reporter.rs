//! Run report
//!
//! Counts what the worker published for each element and the errors it hit,
//! saved as `ml_report.json` at the end of the run. The report is advisory:
//! nothing reads it back.

use crate::error::WorkerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// File name of the report inside the task working directory
pub const REPORT_FILENAME: &str = "ml_report.json";

/// Error recorded against an element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedError {
    /// Error class (e.g. "ApiHttpError", "ValidationError")
    pub class: String,
    pub message: String,
    /// HTTP status, for remote failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Response body, for remote failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

impl ReportedError {
    /// Describe any error raised while processing an element
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<WorkerError>() {
            Some(worker_err) => Self::from_worker(worker_err),
            None => Self {
                class: "ProcessingError".to_string(),
                message: format!("{err:#}"),
                status: None,
                content: None,
            },
        }
    }

    pub fn from_worker(err: &WorkerError) -> Self {
        let (status, content) = match err {
            WorkerError::Api(api_err) => (api_err.status(), api_err.body().cloned()),
            _ => (None, None),
        };
        Self {
            class: err.kind().to_string(),
            message: err.to_string(),
            status,
            content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedMetadata {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub meta_type: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedEntity {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedTranscriptionEntity {
    pub transcription_id: Uuid,
    pub entity_id: Uuid,
}

/// Everything published for one element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementReport {
    pub started: DateTime<Utc>,
    /// Created children, by element type
    pub elements: BTreeMap<String, usize>,
    pub transcriptions: usize,
    /// Created classifications, by class name
    pub classifications: BTreeMap<String, usize>,
    pub entities: Vec<ReportedEntity>,
    pub transcription_entities: Vec<ReportedTranscriptionEntity>,
    pub metadata: Vec<ReportedMetadata>,
    pub errors: Vec<ReportedError>,
}

impl ElementReport {
    fn new() -> Self {
        Self {
            started: Utc::now(),
            elements: BTreeMap::new(),
            transcriptions: 0,
            classifications: BTreeMap::new(),
            entities: Vec::new(),
            transcription_entities: Vec::new(),
            metadata: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Per-run report, keyed by element id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reporter {
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub started: DateTime<Utc>,
    pub elements: BTreeMap<Uuid, ElementReport>,
}

impl Reporter {
    pub fn new(slug: impl Into<String>, version: Option<String>) -> Self {
        Self {
            slug: slug.into(),
            version,
            started: Utc::now(),
            elements: BTreeMap::new(),
        }
    }

    fn entry(&mut self, element_id: Uuid) -> &mut ElementReport {
        self.elements
            .entry(element_id)
            .or_insert_with(ElementReport::new)
    }

    /// Mark the start of an element's processing
    pub fn process(&mut self, element_id: Uuid) {
        self.entry(element_id);
    }

    pub fn add_element(&mut self, parent_id: Uuid, element_type: &str, count: usize) {
        *self
            .entry(parent_id)
            .elements
            .entry(element_type.to_string())
            .or_insert(0) += count;
    }

    pub fn add_transcription(&mut self, element_id: Uuid, count: usize) {
        self.entry(element_id).transcriptions += count;
    }

    pub fn add_classification(&mut self, element_id: Uuid, class_name: &str) {
        *self
            .entry(element_id)
            .classifications
            .entry(class_name.to_string())
            .or_insert(0) += 1;
    }

    pub fn add_entity(&mut self, element_id: Uuid, entity_id: Uuid, entity_type: &str, name: &str) {
        self.entry(element_id).entities.push(ReportedEntity {
            id: entity_id,
            entity_type: entity_type.to_string(),
            name: name.to_string(),
        });
    }

    pub fn add_transcription_entity(&mut self, element_id: Uuid, transcription_id: Uuid, entity_id: Uuid) {
        self.entry(element_id)
            .transcription_entities
            .push(ReportedTranscriptionEntity {
                transcription_id,
                entity_id,
            });
    }

    pub fn add_metadata(&mut self, element_id: Uuid, metadata_id: Uuid, meta_type: &str, name: &str) {
        self.entry(element_id).metadata.push(ReportedMetadata {
            id: metadata_id,
            meta_type: meta_type.to_string(),
            name: name.to_string(),
        });
    }

    pub fn error(&mut self, element_id: Uuid, error: ReportedError) {
        self.entry(element_id).errors.push(error);
    }

    pub fn element(&self, element_id: Uuid) -> Option<&ElementReport> {
        self.elements.get(&element_id)
    }

    /// Total transcriptions published during the run
    pub fn transcription_count(&self) -> usize {
        self.elements.values().map(|e| e.transcriptions).sum()
    }

    /// Total classifications published during the run
    pub fn classification_count(&self) -> usize {
        self.elements
            .values()
            .flat_map(|e| e.classifications.values())
            .sum()
    }

    pub fn error_count(&self) -> usize {
        self.elements.values().map(|e| e.errors.len()).sum()
    }

    /// Write the report as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<(), WorkerError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::info!("Saved ML report to {}", path.display());
        Ok(())
    }
}
