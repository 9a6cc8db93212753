//! Entity publication: named entities and their mentions in transcriptions

use super::validation;
use super::{PublishContext, Publisher};
use crate::api::{Operation, Params};
use crate::error::{ApiError, Result, WorkerError};
use crate::models::{Created, Element, RemoteEntity};
use crate::reporter::Reporter;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use mlw_common::cache::{CachedEntity, CachedTranscriptionEntity};
use mlw_common::CacheStore;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Entity to create in the worker's corpus
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    pub name: String,
    pub entity_type: String,
    pub metas: Option<Value>,
    pub validated: bool,
}

impl NewEntity {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            metas: None,
            validated: false,
        }
    }

    pub fn with_metas(mut self, metas: Value) -> Self {
        self.metas = Some(metas);
        self
    }

    fn validate(&self) -> Result<()> {
        validation::non_empty("name", &self.name)?;
        validation::non_empty("type", &self.entity_type)?;
        if let Some(metas) = &self.metas {
            if !metas.is_object() {
                return Err(WorkerError::Validation("metas should be a JSON object".to_string()));
            }
        }
        Ok(())
    }
}

fn validate_span(offset: i64, length: i64, confidence: Option<f64>) -> Result<()> {
    if offset < 0 {
        return Err(WorkerError::Validation(format!("offset should be positive, got {offset}")));
    }
    if length <= 0 {
        return Err(WorkerError::Validation(format!(
            "length should be strictly positive, got {length}"
        )));
    }
    validation::optional_confidence("confidence", confidence)
}

/// Mention of an existing entity in a transcription
#[derive(Debug, Clone, PartialEq)]
pub struct NewTranscriptionEntity {
    pub transcription_id: Uuid,
    pub entity_id: Uuid,
    pub offset: i64,
    pub length: i64,
    pub confidence: Option<f64>,
}

/// Entity created together with its mention, in a bulk call
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMention {
    pub name: String,
    pub entity_type: String,
    pub offset: i64,
    pub length: i64,
    pub confidence: Option<f64>,
}

/// Batch of mentions for one transcription
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionEntities {
    pub transcription_id: Uuid,
    pub mentions: Vec<EntityMention>,
}

/// Entity and mention created by a bulk call
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedMention {
    pub entity: CachedEntity,
    pub link: CachedTranscriptionEntity,
}

#[derive(Debug, Deserialize)]
struct MentionCreated {
    entity_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct BulkMentionsResponse {
    entities: Vec<MentionCreated>,
}

/// Publishes entities and transcription entities
#[derive(Debug, Clone)]
pub struct EntityPublisher {
    context: Arc<PublishContext>,
}

impl EntityPublisher {
    pub fn new(context: Arc<PublishContext>) -> Self {
        Self { context }
    }

    /// Create an entity; `element` is the element it was found on
    pub async fn create_entity(&self, element: &Element, entity: NewEntity) -> Result<Option<CachedEntity>> {
        self.publish(element, entity).await
    }

    /// Link an entity to a span of a transcription of `element`
    pub async fn create_transcription_entity(
        &self,
        element: &Element,
        mention: NewTranscriptionEntity,
    ) -> Result<Option<CachedTranscriptionEntity>> {
        self.publish(element, mention).await
    }

    /// Create entities and their mentions in one transcription in one call
    pub async fn create_transcription_entities(
        &self,
        element: &Element,
        batch: TranscriptionEntities,
    ) -> Result<Option<Vec<CreatedMention>>> {
        self.publish(element, batch).await
    }

    /// Entities of the worker's corpus, optionally filtered by name; remote only
    pub fn list_corpus_entities(&self, name: Option<&str>) -> Result<BoxStream<'static, Result<RemoteEntity>>> {
        let corpus_id = self.context.corpus_id()?;
        let mut params = Params::none();
        if let Some(name) = name {
            params = params.query("name", name);
        }
        let entities = self
            .context
            .api
            .paginate(Operation::ListCorpusEntities { corpus_id }, params)
            .map_err(WorkerError::from)
            .and_then(|value| async move { Ok::<_, WorkerError>(serde_json::from_value(value)?) });
        Ok(Box::pin(entities))
    }
}

#[async_trait]
impl Publisher<NewEntity> for EntityPublisher {
    type Created = CachedEntity;
    const KIND: &'static str = "entity";

    fn context(&self) -> &PublishContext {
        &self.context
    }

    fn validate(&self, _element: &Element, item: &NewEntity) -> Result<()> {
        item.validate()
    }

    async fn send(&self, _element: &Element, item: &NewEntity) -> Result<Option<CachedEntity>> {
        let body = json!({
            "name": item.name,
            "type": item.entity_type,
            "metas": item.metas,
            "validated": item.validated,
            "corpus": self.context.corpus_id()?,
            "worker_run_id": self.context.identity.worker_run_id,
        });
        let created: Created = self
            .context
            .api
            .request_as(&Operation::CreateEntity, Params::body(body))
            .await?;
        Ok(Some(CachedEntity {
            id: created.id,
            entity_type: item.entity_type.clone(),
            name: item.name.clone(),
            validated: item.validated,
            metas: item.metas.clone(),
            worker_run_id: self.context.identity.worker_run_id,
        }))
    }

    async fn mirror(
        &self,
        cache: &CacheStore,
        _element: &Element,
        _item: &NewEntity,
        created: &CachedEntity,
    ) -> mlw_common::Result<()> {
        cache.insert_one(created).await
    }

    fn account(&self, reporter: &mut Reporter, element: &Element, item: &NewEntity, created: &CachedEntity) {
        reporter.add_entity(element.id, created.id, &item.entity_type, &item.name);
    }
}

#[async_trait]
impl Publisher<NewTranscriptionEntity> for EntityPublisher {
    type Created = CachedTranscriptionEntity;
    const KIND: &'static str = "transcription entity";

    fn context(&self) -> &PublishContext {
        &self.context
    }

    fn validate(&self, _element: &Element, item: &NewTranscriptionEntity) -> Result<()> {
        validate_span(item.offset, item.length, item.confidence)
    }

    async fn send(
        &self,
        _element: &Element,
        item: &NewTranscriptionEntity,
    ) -> Result<Option<CachedTranscriptionEntity>> {
        let body = json!({
            "entity": item.entity_id,
            "offset": item.offset,
            "length": item.length,
            "worker_run_id": self.context.identity.worker_run_id,
            "confidence": item.confidence,
        });
        self.context
            .api
            .request(
                &Operation::CreateTranscriptionEntity {
                    transcription_id: item.transcription_id,
                },
                Params::body(body),
            )
            .await?;
        Ok(Some(CachedTranscriptionEntity {
            transcription_id: item.transcription_id,
            entity_id: item.entity_id,
            offset: item.offset,
            length: item.length,
            worker_run_id: self.context.identity.worker_run_id,
            confidence: item.confidence,
        }))
    }

    async fn mirror(
        &self,
        cache: &CacheStore,
        _element: &Element,
        _item: &NewTranscriptionEntity,
        created: &CachedTranscriptionEntity,
    ) -> mlw_common::Result<()> {
        cache.insert_one(created).await
    }

    fn account(
        &self,
        reporter: &mut Reporter,
        element: &Element,
        item: &NewTranscriptionEntity,
        _created: &CachedTranscriptionEntity,
    ) {
        reporter.add_transcription_entity(element.id, item.transcription_id, item.entity_id);
    }
}

#[async_trait]
impl Publisher<TranscriptionEntities> for EntityPublisher {
    type Created = Vec<CreatedMention>;
    const KIND: &'static str = "transcription entities";

    fn context(&self) -> &PublishContext {
        &self.context
    }

    fn validate(&self, _element: &Element, batch: &TranscriptionEntities) -> Result<()> {
        validation::non_empty_list("entities", &batch.mentions)?;
        for mention in &batch.mentions {
            validation::non_empty("name", &mention.name)?;
            validation::non_empty("type", &mention.entity_type)?;
            validate_span(mention.offset, mention.length, mention.confidence)?;
        }
        Ok(())
    }

    async fn send(
        &self,
        _element: &Element,
        batch: &TranscriptionEntities,
    ) -> Result<Option<Vec<CreatedMention>>> {
        let body = json!({
            "worker_run_id": self.context.identity.worker_run_id,
            "entities": batch.mentions.iter().map(|m| json!({
                "name": m.name,
                "type": m.entity_type,
                "offset": m.offset,
                "length": m.length,
                "confidence": m.confidence,
            })).collect::<Vec<_>>(),
        });
        let response: BulkMentionsResponse = self
            .context
            .api
            .request_as(
                &Operation::CreateTranscriptionEntities {
                    transcription_id: batch.transcription_id,
                },
                Params::body(body),
            )
            .await?;
        if response.entities.len() != batch.mentions.len() {
            return Err(WorkerError::Api(ApiError::Decode {
                operation: "CreateTranscriptionEntities",
                message: format!(
                    "sent {} entities, got {} back",
                    batch.mentions.len(),
                    response.entities.len()
                ),
            }));
        }

        let worker_run_id = self.context.identity.worker_run_id;
        Ok(Some(
            batch
                .mentions
                .iter()
                .zip(response.entities)
                .map(|(mention, created)| CreatedMention {
                    entity: CachedEntity {
                        id: created.entity_id,
                        entity_type: mention.entity_type.clone(),
                        name: mention.name.clone(),
                        validated: false,
                        metas: None,
                        worker_run_id,
                    },
                    link: CachedTranscriptionEntity {
                        transcription_id: batch.transcription_id,
                        entity_id: created.entity_id,
                        offset: mention.offset,
                        length: mention.length,
                        worker_run_id,
                        confidence: mention.confidence,
                    },
                })
                .collect(),
        ))
    }

    async fn mirror(
        &self,
        cache: &CacheStore,
        _element: &Element,
        _batch: &TranscriptionEntities,
        created: &Vec<CreatedMention>,
    ) -> mlw_common::Result<()> {
        // The remote reuses entities with the same name and type
        for mention in created {
            match cache.insert_one(&mention.entity).await {
                Err(e) if e.is_constraint() => {
                    tracing::debug!(entity_id = %mention.entity.id, "Entity already cached");
                }
                other => other?,
            }
        }
        let links: Vec<CachedTranscriptionEntity> = created.iter().map(|m| m.link.clone()).collect();
        cache.insert(&links).await
    }

    fn account(
        &self,
        reporter: &mut Reporter,
        element: &Element,
        batch: &TranscriptionEntities,
        created: &Vec<CreatedMention>,
    ) {
        for mention in created {
            reporter.add_entity(
                element.id,
                mention.entity.id,
                &mention.entity.entity_type,
                &mention.entity.name,
            );
            reporter.add_transcription_entity(element.id, batch.transcription_id, mention.entity.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_validation() {
        assert!(validate_span(0, 5, None).is_ok());
        assert!(validate_span(-1, 5, None).is_err());
        assert!(validate_span(0, 0, None).is_err());
        assert!(validate_span(0, 5, Some(1.2)).is_err());
    }

    #[test]
    fn test_entity_metas_must_be_object() {
        assert!(NewEntity::new("Paris", "location").validate().is_ok());
        assert!(NewEntity::new("Paris", "location")
            .with_metas(json!(["not", "an", "object"]))
            .validate()
            .is_err());
        assert!(NewEntity::new("", "location").validate().is_err());
    }
}
