//! Remote operations used by the worker
//!
//! Each operation maps to one HTTP method and path on the annotation API.

use reqwest::Method;
use uuid::Uuid;

/// Remote API operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    RetrieveWorkerRun { id: Uuid },
    RetrieveSecret { name: String },
    UpdateWorkerActivity { worker_version_id: Uuid },

    RetrieveElement { id: Uuid },
    CreateElement,
    CreateElements { parent_id: Uuid },
    CreateElementParent { parent_id: Uuid, child_id: Uuid },
    ListElementChildren { id: Uuid },

    CreateTranscription { element_id: Uuid },
    CreateTranscriptions,
    CreateElementTranscriptions { element_id: Uuid },
    ListTranscriptions { element_id: Uuid },

    ListCorpusMLClasses { corpus_id: Uuid },
    CreateMLClass { corpus_id: Uuid },
    CreateClassification,
    CreateClassifications,

    CreateEntity,
    CreateTranscriptionEntity { transcription_id: Uuid },
    CreateTranscriptionEntities { transcription_id: Uuid },
    ListCorpusEntities { corpus_id: Uuid },

    CreateMetaData { element_id: Uuid },
    CreateMetaDataBulk { element_id: Uuid },
    ListElementMetaData { element_id: Uuid },
}

impl Operation {
    /// Operation name, used in logs and error messages
    pub fn name(&self) -> &'static str {
        match self {
            Operation::RetrieveWorkerRun { .. } => "RetrieveWorkerRun",
            Operation::RetrieveSecret { .. } => "RetrieveSecret",
            Operation::UpdateWorkerActivity { .. } => "UpdateWorkerActivity",
            Operation::RetrieveElement { .. } => "RetrieveElement",
            Operation::CreateElement => "CreateElement",
            Operation::CreateElements { .. } => "CreateElements",
            Operation::CreateElementParent { .. } => "CreateElementParent",
            Operation::ListElementChildren { .. } => "ListElementChildren",
            Operation::CreateTranscription { .. } => "CreateTranscription",
            Operation::CreateTranscriptions => "CreateTranscriptions",
            Operation::CreateElementTranscriptions { .. } => "CreateElementTranscriptions",
            Operation::ListTranscriptions { .. } => "ListTranscriptions",
            Operation::ListCorpusMLClasses { .. } => "ListCorpusMLClasses",
            Operation::CreateMLClass { .. } => "CreateMLClass",
            Operation::CreateClassification => "CreateClassification",
            Operation::CreateClassifications => "CreateClassifications",
            Operation::CreateEntity => "CreateEntity",
            Operation::CreateTranscriptionEntity { .. } => "CreateTranscriptionEntity",
            Operation::CreateTranscriptionEntities { .. } => "CreateTranscriptionEntities",
            Operation::ListCorpusEntities { .. } => "ListCorpusEntities",
            Operation::CreateMetaData { .. } => "CreateMetaData",
            Operation::CreateMetaDataBulk { .. } => "CreateMetaDataBulk",
            Operation::ListElementMetaData { .. } => "ListElementMetaData",
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Operation::RetrieveWorkerRun { .. }
            | Operation::RetrieveSecret { .. }
            | Operation::RetrieveElement { .. }
            | Operation::ListElementChildren { .. }
            | Operation::ListTranscriptions { .. }
            | Operation::ListCorpusMLClasses { .. }
            | Operation::ListCorpusEntities { .. }
            | Operation::ListElementMetaData { .. } => Method::GET,
            Operation::UpdateWorkerActivity { .. } => Method::PUT,
            _ => Method::POST,
        }
    }

    /// Path relative to the API root
    pub fn path(&self) -> String {
        match self {
            Operation::RetrieveWorkerRun { id } => format!("api/v1/process/workers/{id}/"),
            Operation::RetrieveSecret { name } => format!("api/v1/secret/{name}"),
            Operation::UpdateWorkerActivity { worker_version_id } => {
                format!("api/v1/workers/versions/{worker_version_id}/activity/")
            }
            Operation::RetrieveElement { id } => format!("api/v1/element/{id}/"),
            Operation::CreateElement => "api/v1/elements/create/".to_string(),
            Operation::CreateElements { parent_id } => {
                format!("api/v1/element/{parent_id}/children/bulk/")
            }
            Operation::CreateElementParent {
                parent_id,
                child_id,
            } => format!("api/v1/element/{child_id}/parent/{parent_id}/"),
            Operation::ListElementChildren { id } => format!("api/v1/elements/{id}/children/"),
            Operation::CreateTranscription { element_id } => {
                format!("api/v1/element/{element_id}/transcription/")
            }
            Operation::CreateTranscriptions => "api/v1/transcription/bulk/".to_string(),
            Operation::CreateElementTranscriptions { element_id } => {
                format!("api/v1/element/{element_id}/transcriptions/bulk/")
            }
            Operation::ListTranscriptions { element_id } => {
                format!("api/v1/element/{element_id}/transcriptions/")
            }
            Operation::ListCorpusMLClasses { corpus_id } => {
                format!("api/v1/corpus/{corpus_id}/classes/")
            }
            Operation::CreateMLClass { corpus_id } => format!("api/v1/corpus/{corpus_id}/classes/"),
            Operation::CreateClassification => "api/v1/classifications/".to_string(),
            Operation::CreateClassifications => "api/v1/classification/bulk/".to_string(),
            Operation::CreateEntity => "api/v1/entity/".to_string(),
            Operation::CreateTranscriptionEntity { transcription_id } => {
                format!("api/v1/transcription/{transcription_id}/entity/")
            }
            Operation::CreateTranscriptionEntities { transcription_id } => {
                format!("api/v1/transcription/{transcription_id}/entities/bulk/")
            }
            Operation::ListCorpusEntities { corpus_id } => {
                format!("api/v1/corpus/{corpus_id}/entities/")
            }
            Operation::CreateMetaData { element_id } => {
                format!("api/v1/element/{element_id}/metadata/")
            }
            Operation::CreateMetaDataBulk { element_id } => {
                format!("api/v1/element/{element_id}/metadata/bulk/")
            }
            Operation::ListElementMetaData { element_id } => {
                format!("api/v1/element/{element_id}/metadata/")
            }
        }
    }
}
