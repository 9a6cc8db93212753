//! Classification publication
//!
//! Classifications reference corpus ML classes by id. Class names are resolved
//! through an in-memory map loaded from the corpus on first use; a missing
//! class is created on the remote.

use super::validation;
use super::{PublishContext, Publisher};
use crate::api::{Operation, Params};
use crate::error::{ApiError, Result, WorkerError};
use crate::models::Element;
use crate::reporter::Reporter;
use async_trait::async_trait;
use futures::TryStreamExt;
use mlw_common::cache::CachedClassification;
use mlw_common::CacheStore;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Message the remote returns when this worker run already classified an
/// element with the same class
pub const DUPLICATE_CLASSIFICATION: &str =
    "The fields element, worker_run, ml_class must make a unique set.";

const DEFAULT_STATE: &str = "pending";

#[derive(Debug, Clone, PartialEq)]
pub struct NewClassification {
    pub class_name: String,
    pub confidence: f64,
    pub high_confidence: bool,
}

impl NewClassification {
    pub fn new(class_name: impl Into<String>, confidence: f64) -> Self {
        Self {
            class_name: class_name.into(),
            confidence,
            high_confidence: false,
        }
    }

    pub fn high_confidence(mut self) -> Self {
        self.high_confidence = true;
        self
    }

    fn validate(&self) -> Result<()> {
        validation::non_empty("class_name", &self.class_name)?;
        validation::confidence("confidence", self.confidence)
    }
}

#[derive(Debug, Deserialize)]
struct MLClass {
    id: Uuid,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ClassificationCreated {
    id: Uuid,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BulkClassificationsResponse {
    classifications: Vec<ClassificationCreated>,
}

/// Publishes classifications
#[derive(Debug, Clone)]
pub struct ClassificationPublisher {
    context: Arc<PublishContext>,
    /// Corpus ML classes by name, loaded on first use
    classes: Arc<Mutex<Option<HashMap<String, Uuid>>>>,
}

impl ClassificationPublisher {
    pub fn new(context: Arc<PublishContext>) -> Self {
        Self {
            context,
            classes: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn create_classification(
        &self,
        element: &Element,
        classification: NewClassification,
    ) -> Result<Option<CachedClassification>> {
        self.publish(element, classification).await
    }

    pub async fn create_classifications(
        &self,
        element: &Element,
        classifications: Vec<NewClassification>,
    ) -> Result<Option<Vec<CachedClassification>>> {
        self.publish(element, classifications).await
    }

    async fn load_classes(&self) -> Result<HashMap<String, Uuid>> {
        let corpus_id = self.context.corpus_id()?;
        let classes: HashMap<String, Uuid> = self
            .context
            .api
            .paginate(Operation::ListCorpusMLClasses { corpus_id }, Params::none())
            .map_err(WorkerError::from)
            .and_then(|value| async move {
                let class: MLClass = serde_json::from_value(value)?;
                Ok::<_, WorkerError>((class.name, class.id))
            })
            .try_collect()
            .await?;
        tracing::info!(corpus_id = %corpus_id, count = classes.len(), "Loaded corpus ML classes");
        Ok(classes)
    }

    /// Id of the corpus ML class called `name`, created if needed
    pub async fn get_ml_class_id(&self, name: &str) -> Result<Uuid> {
        let mut classes = self.classes.lock().await;
        if classes.is_none() {
            *classes = Some(self.load_classes().await?);
        }
        if let Some(id) = classes.as_ref().and_then(|c| c.get(name)) {
            return Ok(*id);
        }

        let corpus_id = self.context.corpus_id()?;
        let created: std::result::Result<MLClass, ApiError> = self
            .context
            .api
            .request_as(
                &Operation::CreateMLClass { corpus_id },
                Params::body(json!({ "name": name })),
            )
            .await;

        match created {
            Ok(class) => {
                tracing::info!(class = name, id = %class.id, "Created ML class");
                classes
                    .get_or_insert_with(HashMap::new)
                    .insert(class.name, class.id);
                Ok(class.id)
            }
            Err(e) if e.status() == Some(400) => {
                // Created concurrently by someone else
                tracing::warn!(class = name, "ML class already exists, reloading corpus classes");
                let reloaded = self.load_classes().await?;
                let id = reloaded.get(name).copied();
                *classes = Some(reloaded);
                id.ok_or_else(|| {
                    WorkerError::Validation(format!("ML class {name} could not be created: {e}"))
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn to_cached(&self, element: &Element, item: &NewClassification, created: ClassificationCreated) -> CachedClassification {
        CachedClassification {
            id: created.id,
            element_id: element.id,
            class_name: item.class_name.clone(),
            confidence: item.confidence,
            state: created.state.unwrap_or_else(|| DEFAULT_STATE.to_string()),
            worker_run_id: self.context.identity.worker_run_id,
        }
    }
}

#[async_trait]
impl Publisher<NewClassification> for ClassificationPublisher {
    type Created = CachedClassification;
    const KIND: &'static str = "classification";

    fn context(&self) -> &PublishContext {
        &self.context
    }

    fn validate(&self, _element: &Element, item: &NewClassification) -> Result<()> {
        item.validate()
    }

    async fn send(&self, element: &Element, item: &NewClassification) -> Result<Option<CachedClassification>> {
        let ml_class = self.get_ml_class_id(&item.class_name).await?;
        let body = json!({
            "element": element.id,
            "ml_class": ml_class,
            "worker_run_id": self.context.identity.worker_run_id,
            "confidence": item.confidence,
            "high_confidence": item.high_confidence,
        });

        let created: std::result::Result<ClassificationCreated, ApiError> = self
            .context
            .api
            .request_as(&Operation::CreateClassification, Params::body(body))
            .await;

        match created {
            Ok(created) => Ok(Some(self.to_cached(element, item, created))),
            Err(e) if e.has_non_field_error(DUPLICATE_CLASSIFICATION) => {
                tracing::warn!(
                    element_id = %element.id,
                    class = %item.class_name,
                    "This worker run has already set this class on the element"
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn mirror(
        &self,
        cache: &CacheStore,
        _element: &Element,
        _item: &NewClassification,
        created: &CachedClassification,
    ) -> mlw_common::Result<()> {
        cache.insert_one(created).await
    }

    fn account(
        &self,
        reporter: &mut Reporter,
        element: &Element,
        item: &NewClassification,
        _created: &CachedClassification,
    ) {
        reporter.add_classification(element.id, &item.class_name);
    }
}

#[async_trait]
impl Publisher<Vec<NewClassification>> for ClassificationPublisher {
    type Created = Vec<CachedClassification>;
    const KIND: &'static str = "classifications";

    fn context(&self) -> &PublishContext {
        &self.context
    }

    fn validate(&self, _element: &Element, items: &Vec<NewClassification>) -> Result<()> {
        validation::non_empty_list("classifications", items)?;
        for item in items {
            item.validate()?;
        }
        Ok(())
    }

    async fn send(
        &self,
        element: &Element,
        items: &Vec<NewClassification>,
    ) -> Result<Option<Vec<CachedClassification>>> {
        let mut payload = Vec::with_capacity(items.len());
        for item in items {
            payload.push(json!({
                "ml_class": self.get_ml_class_id(&item.class_name).await?,
                "confidence": item.confidence,
                "high_confidence": item.high_confidence,
            }));
        }
        let body = json!({
            "parent": element.id,
            "worker_run_id": self.context.identity.worker_run_id,
            "classifications": payload,
        });

        let response: BulkClassificationsResponse = self
            .context
            .api
            .request_as(&Operation::CreateClassifications, Params::body(body))
            .await?;
        if response.classifications.len() != items.len() {
            return Err(WorkerError::Api(ApiError::Decode {
                operation: "CreateClassifications",
                message: format!(
                    "sent {} classifications, got {} back",
                    items.len(),
                    response.classifications.len()
                ),
            }));
        }

        Ok(Some(
            items
                .iter()
                .zip(response.classifications)
                .map(|(item, created)| self.to_cached(element, item, created))
                .collect(),
        ))
    }

    async fn mirror(
        &self,
        cache: &CacheStore,
        _element: &Element,
        _items: &Vec<NewClassification>,
        created: &Vec<CachedClassification>,
    ) -> mlw_common::Result<()> {
        cache.insert(created).await
    }

    fn account(
        &self,
        reporter: &mut Reporter,
        element: &Element,
        items: &Vec<NewClassification>,
        _created: &Vec<CachedClassification>,
    ) {
        for item in items {
            reporter.add_classification(element.id, &item.class_name);
        }
    }
}
