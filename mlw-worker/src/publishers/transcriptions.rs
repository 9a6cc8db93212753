//! Transcription publication and listing

use super::validation;
use super::{PublishContext, Publisher};
use crate::api::{Operation, Params};
use crate::error::{ApiError, Result, WorkerError};
use crate::models::{Created, Element, Polygon, RemoteTranscription, TextOrientation};
use crate::reporter::Reporter;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use mlw_common::cache::{
    CachedElement, CachedTranscription, TranscriptionQuery, WorkerRunFilter, WorkerVersionFilter,
};
use mlw_common::CacheStore;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Transcription of an element's text
#[derive(Debug, Clone, PartialEq)]
pub struct NewTranscription {
    pub text: String,
    pub confidence: f64,
    pub orientation: TextOrientation,
}

impl NewTranscription {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence,
            orientation: TextOrientation::default(),
        }
    }

    pub fn with_orientation(mut self, orientation: TextOrientation) -> Self {
        self.orientation = orientation;
        self
    }

    fn validate(&self) -> Result<()> {
        validation::non_empty("text", &self.text)?;
        validation::confidence("confidence", self.confidence)
    }
}

/// Entry of a multi-element transcription batch
#[derive(Debug, Clone, PartialEq)]
pub struct BulkTranscription {
    pub element_id: Uuid,
    pub transcription: NewTranscription,
}

/// Sub-element to create together with its transcription
#[derive(Debug, Clone, PartialEq)]
pub struct NewElementTranscription {
    pub polygon: Polygon,
    pub transcription: NewTranscription,
    pub element_confidence: Option<f64>,
}

/// Batch for [`TranscriptionPublisher::create_element_transcriptions`]
#[derive(Debug, Clone, PartialEq)]
pub struct ElementTranscriptions {
    pub sub_element_type: String,
    pub items: Vec<NewElementTranscription>,
}

/// One transcription created by `CreateElementTranscriptions`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreatedElementTranscription {
    /// Transcription id
    pub id: Uuid,
    pub element_id: Uuid,
    /// Whether the sub-element was created, or matched an existing one
    pub created: bool,
}

/// Filters accepted by [`TranscriptionPublisher::list_transcriptions`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptionFilter {
    pub element_type: Option<String>,
    pub recursive: bool,
    pub worker_version: WorkerVersionFilter,
    pub worker_run: WorkerRunFilter,
}

impl TranscriptionFilter {
    pub fn recursive() -> Self {
        Self {
            recursive: true,
            ..Default::default()
        }
    }

    fn to_query(&self, element_id: Uuid) -> TranscriptionQuery {
        let mut query = TranscriptionQuery::on(element_id)
            .with_worker_version(self.worker_version)
            .with_worker_run(self.worker_run);
        if self.recursive {
            query = query.recursive();
        }
        if let Some(element_type) = &self.element_type {
            query = query.with_element_type(element_type.clone());
        }
        query
    }

    fn to_params(&self) -> Params {
        let mut params = Params::none();
        if let Some(element_type) = &self.element_type {
            params = params.query("element_type", element_type);
        }
        if self.recursive {
            params = params.query("recursive", true);
        }
        match self.worker_version {
            WorkerVersionFilter::Any => {}
            WorkerVersionFilter::Manual => params = params.query("worker_version", "False"),
            WorkerVersionFilter::Version(id) => params = params.query("worker_version", id),
        }
        match self.worker_run {
            WorkerRunFilter::Any => {}
            WorkerRunFilter::Manual => params = params.query("worker_run", "False"),
            WorkerRunFilter::Run(id) => params = params.query("worker_run", id),
        }
        params
    }
}

#[derive(Debug, Deserialize)]
struct BulkTranscriptionsResponse {
    transcriptions: Vec<BulkTranscriptionCreated>,
}

#[derive(Debug, Deserialize)]
struct BulkTranscriptionCreated {
    id: Uuid,
    element_id: Uuid,
}

/// Publishes transcriptions
#[derive(Debug, Clone)]
pub struct TranscriptionPublisher {
    context: Arc<PublishContext>,
}

impl TranscriptionPublisher {
    pub fn new(context: Arc<PublishContext>) -> Self {
        Self { context }
    }

    /// Transcribe `element` with a horizontal left-to-right text
    pub async fn create_transcription(
        &self,
        element: &Element,
        text: impl Into<String>,
        confidence: f64,
    ) -> Result<Option<CachedTranscription>> {
        self.publish(element, NewTranscription::new(text, confidence))
            .await
    }

    /// Transcribe several elements in one call
    pub async fn create_transcriptions(
        &self,
        transcriptions: Vec<BulkTranscription>,
    ) -> Result<Option<Vec<CachedTranscription>>> {
        validation::non_empty_list("transcriptions", &transcriptions)?;
        for item in &transcriptions {
            item.transcription.validate()?;
        }
        if self.context.skip_read_only("transcriptions") {
            return Ok(None);
        }

        let body = json!({
            "worker_run_id": self.context.identity.worker_run_id,
            "transcriptions": transcriptions.iter().map(|t| json!({
                "element_id": t.element_id,
                "text": t.transcription.text,
                "confidence": t.transcription.confidence,
                "orientation": t.transcription.orientation,
            })).collect::<Vec<_>>(),
        });
        let response: BulkTranscriptionsResponse = self
            .context
            .api
            .request_as(&Operation::CreateTranscriptions, Params::body(body))
            .await?;
        if response.transcriptions.len() != transcriptions.len() {
            return Err(WorkerError::Api(ApiError::Decode {
                operation: "CreateTranscriptions",
                message: format!(
                    "sent {} transcriptions, got {} back",
                    transcriptions.len(),
                    response.transcriptions.len()
                ),
            }));
        }

        let created: Vec<CachedTranscription> = transcriptions
            .into_iter()
            .zip(response.transcriptions)
            .map(|(sent, returned)| self.to_cached(returned.id, returned.element_id, &sent.transcription))
            .collect();

        self.context.mirror_rows(&created).await;

        let mut reporter = self.context.reporter.lock().await;
        for transcription in &created {
            reporter.add_transcription(transcription.element_id, 1);
        }
        Ok(Some(created))
    }

    /// Create sub-elements of `element` along with one transcription each
    pub async fn create_element_transcriptions(
        &self,
        element: &Element,
        sub_element_type: impl Into<String>,
        items: Vec<NewElementTranscription>,
    ) -> Result<Option<Vec<CreatedElementTranscription>>> {
        self.publish(
            element,
            ElementTranscriptions {
                sub_element_type: sub_element_type.into(),
                items,
            },
        )
        .await
    }

    /// Transcriptions of `element`, from the cache when there is one
    pub async fn list_transcriptions(
        &self,
        element: &Element,
        filter: &TranscriptionFilter,
    ) -> Result<BoxStream<'static, Result<CachedTranscription>>> {
        if let Some(cache) = &self.context.cache {
            let transcriptions = cache
                .transcriptions(&filter.to_query(element.id))
                .await
                .map_err(WorkerError::from_cache)?;
            return Ok(Box::pin(transcriptions.map_err(WorkerError::from_cache)));
        }

        let element_id = element.id;
        let transcriptions = self
            .context
            .api
            .paginate(
                Operation::ListTranscriptions { element_id },
                filter.to_params(),
            )
            .map_err(WorkerError::from)
            .and_then(move |value| async move {
                let remote: RemoteTranscription = serde_json::from_value(value)?;
                Ok::<_, WorkerError>(remote.into_transcription(element_id))
            });
        Ok(Box::pin(transcriptions))
    }

    fn to_cached(&self, id: Uuid, element_id: Uuid, item: &NewTranscription) -> CachedTranscription {
        CachedTranscription {
            id,
            element_id,
            text: item.text.clone(),
            confidence: item.confidence,
            orientation: item.orientation,
            worker_version_id: self.context.identity.worker_version_id,
            worker_run_id: self.context.identity.worker_run_id,
        }
    }
}

#[async_trait]
impl Publisher<NewTranscription> for TranscriptionPublisher {
    type Created = CachedTranscription;
    const KIND: &'static str = "transcription";

    fn context(&self) -> &PublishContext {
        &self.context
    }

    fn validate(&self, _element: &Element, item: &NewTranscription) -> Result<()> {
        item.validate()
    }

    async fn send(&self, element: &Element, item: &NewTranscription) -> Result<Option<CachedTranscription>> {
        let body = json!({
            "text": item.text,
            "confidence": item.confidence,
            "orientation": item.orientation,
            "worker_run_id": self.context.identity.worker_run_id,
        });
        let created: Created = self
            .context
            .api
            .request_as(
                &Operation::CreateTranscription {
                    element_id: element.id,
                },
                Params::body(body),
            )
            .await?;
        Ok(Some(self.to_cached(created.id, element.id, item)))
    }

    async fn mirror(
        &self,
        cache: &CacheStore,
        _element: &Element,
        _item: &NewTranscription,
        created: &CachedTranscription,
    ) -> mlw_common::Result<()> {
        cache.insert_one(created).await
    }

    fn account(
        &self,
        reporter: &mut Reporter,
        element: &Element,
        _item: &NewTranscription,
        _created: &CachedTranscription,
    ) {
        reporter.add_transcription(element.id, 1);
    }
}

#[async_trait]
impl Publisher<ElementTranscriptions> for TranscriptionPublisher {
    type Created = Vec<CreatedElementTranscription>;
    const KIND: &'static str = "element transcriptions";

    fn context(&self) -> &PublishContext {
        &self.context
    }

    fn validate(&self, element: &Element, batch: &ElementTranscriptions) -> Result<()> {
        validation::non_empty("sub_element_type", &batch.sub_element_type)?;
        validation::non_empty_list("transcriptions", &batch.items)?;
        for item in &batch.items {
            validation::polygon("polygon", &item.polygon)?;
            item.transcription.validate()?;
            validation::optional_confidence("element_confidence", item.element_confidence)?;
        }
        element.require_image()?;
        Ok(())
    }

    async fn send(
        &self,
        element: &Element,
        batch: &ElementTranscriptions,
    ) -> Result<Option<Vec<CreatedElementTranscription>>> {
        let body = json!({
            "element_type": batch.sub_element_type,
            "worker_run_id": self.context.identity.worker_run_id,
            "transcriptions": batch.items.iter().map(|item| json!({
                "polygon": item.polygon,
                "text": item.transcription.text,
                "confidence": item.transcription.confidence,
                "orientation": item.transcription.orientation,
                "element_confidence": item.element_confidence,
            })).collect::<Vec<_>>(),
        });
        let response: Vec<CreatedElementTranscription> = self
            .context
            .api
            .request_as(
                &Operation::CreateElementTranscriptions {
                    element_id: element.id,
                },
                Params::body(body),
            )
            .await?;
        if response.len() != batch.items.len() {
            return Err(WorkerError::Api(ApiError::Decode {
                operation: "CreateElementTranscriptions",
                message: format!(
                    "sent {} transcriptions, got {} back",
                    batch.items.len(),
                    response.len()
                ),
            }));
        }
        Ok(Some(response))
    }

    async fn mirror(
        &self,
        cache: &CacheStore,
        element: &Element,
        batch: &ElementTranscriptions,
        created: &Vec<CreatedElementTranscription>,
    ) -> mlw_common::Result<()> {
        if let Some(image) = &element.image {
            cache.ensure_image(image).await?;
        }

        // Several transcriptions may land on the same new sub-element
        let mut new_elements: HashMap<Uuid, CachedElement> = HashMap::new();
        let mut order = Vec::new();
        for (item, result) in batch.items.iter().zip(created) {
            if result.created && !new_elements.contains_key(&result.element_id) {
                order.push(result.element_id);
                new_elements.insert(
                    result.element_id,
                    CachedElement {
                        id: result.element_id,
                        parent_id: Some(element.id),
                        element_type: batch.sub_element_type.clone(),
                        image_id: element.image.as_ref().map(|i| i.id),
                        polygon: Some(item.polygon.clone()),
                        rotation_angle: 0,
                        mirrored: false,
                        initial: false,
                        worker_version_id: self.context.identity.worker_version_id,
                        worker_run_id: self.context.identity.worker_run_id,
                        confidence: item.element_confidence,
                    },
                );
            }
        }
        let elements: Vec<CachedElement> = order
            .into_iter()
            .filter_map(|id| new_elements.remove(&id))
            .collect();
        cache.insert(&elements).await?;

        let transcriptions: Vec<CachedTranscription> = batch
            .items
            .iter()
            .zip(created)
            .map(|(item, result)| self.to_cached(result.id, result.element_id, &item.transcription))
            .collect();
        cache.insert(&transcriptions).await
    }

    fn account(
        &self,
        reporter: &mut Reporter,
        element: &Element,
        batch: &ElementTranscriptions,
        created: &Vec<CreatedElementTranscription>,
    ) {
        let mut created_elements: Vec<Uuid> = created
            .iter()
            .filter(|c| c.created)
            .map(|c| c.element_id)
            .collect();
        created_elements.sort();
        created_elements.dedup();
        if !created_elements.is_empty() {
            reporter.add_element(element.id, &batch.sub_element_type, created_elements.len());
        }
        reporter.add_transcription(element.id, created.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcription_validation() {
        assert!(NewTranscription::new("hello", 0.9).validate().is_ok());
        assert!(NewTranscription::new("", 0.9).validate().is_err());
        assert!(NewTranscription::new("hello", 1.5).validate().is_err());
    }

    #[test]
    fn test_recursive_filter_builds_recursive_query() {
        let id = Uuid::new_v4();
        let filter = TranscriptionFilter {
            element_type: Some("word".to_string()),
            ..TranscriptionFilter::recursive()
        };
        let query = filter.to_query(id);
        assert!(query.recursive);
        assert_eq!(query.element_type.as_deref(), Some("word"));

        let params = filter.to_params();
        assert!(params.query.contains(&("recursive".to_string(), "true".to_string())));
    }
}
