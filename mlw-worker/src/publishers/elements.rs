//! Element publication and children listing

use super::validation;
use super::{PublishContext, Publisher};
use crate::api::{Operation, Params};
use crate::error::{Result, WorkerError};
use crate::models::{Created, Element, Polygon, RemoteElement};
use crate::reporter::Reporter;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use mlw_common::cache::{
    CachedElement, ElementQuery, WorkerRunFilter, WorkerVersionFilter,
};
use mlw_common::CacheStore;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Child element to create under a parent
#[derive(Debug, Clone, PartialEq)]
pub struct NewElement {
    pub element_type: String,
    pub name: String,
    pub polygon: Polygon,
    pub confidence: Option<f64>,
}

impl NewElement {
    pub fn new(element_type: impl Into<String>, name: impl Into<String>, polygon: Polygon) -> Self {
        Self {
            element_type: element_type.into(),
            name: name.into(),
            polygon,
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    fn validate(&self) -> Result<()> {
        validation::non_empty("type", &self.element_type)?;
        validation::non_empty("name", &self.name)?;
        validation::polygon("polygon", &self.polygon)?;
        validation::optional_confidence("confidence", self.confidence)
    }

    fn to_cached(&self, id: Uuid, parent: &Element, context: &PublishContext) -> CachedElement {
        CachedElement {
            id,
            parent_id: Some(parent.id),
            element_type: self.element_type.clone(),
            image_id: parent.image.as_ref().map(|i| i.id),
            polygon: Some(self.polygon.clone()),
            rotation_angle: 0,
            mirrored: false,
            initial: false,
            worker_version_id: context.identity.worker_version_id,
            worker_run_id: context.identity.worker_run_id,
            confidence: self.confidence,
        }
    }
}

/// Filters accepted by [`ElementPublisher::list_element_children`]
///
/// With a cache, only `element_type`, `worker_version` and `worker_run` can be
/// answered; setting any other field is an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChildrenFilter {
    pub element_type: Option<String>,
    pub worker_version: WorkerVersionFilter,
    pub worker_run: WorkerRunFilter,
    pub name: Option<String>,
    pub recursive: bool,
    pub with_classes: bool,
    pub with_metadata: bool,
}

impl ChildrenFilter {
    pub fn of_type(element_type: impl Into<String>) -> Self {
        Self {
            element_type: Some(element_type.into()),
            ..Default::default()
        }
    }

    fn unsupported_on_cache(&self) -> Option<&'static str> {
        if self.name.is_some() {
            Some("name")
        } else if self.recursive {
            Some("recursive")
        } else if self.with_classes {
            Some("with_classes")
        } else if self.with_metadata {
            Some("with_metadata")
        } else {
            None
        }
    }

    fn to_params(&self) -> Params {
        let mut params = Params::none();
        if let Some(element_type) = &self.element_type {
            params = params.query("type", element_type);
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
        if let Some(name) = &self.name {
            params = params.query("name", name);
        }
        if self.recursive {
            params = params.query("recursive", true);
        }
        if self.with_classes {
            params = params.query("with_classes", true);
        }
        if self.with_metadata {
            params = params.query("with_metadata", true);
        }
        params
    }
}

/// Publishes child elements
#[derive(Debug, Clone)]
pub struct ElementPublisher {
    context: Arc<PublishContext>,
}

impl ElementPublisher {
    pub fn new(context: Arc<PublishContext>) -> Self {
        Self { context }
    }

    /// Create one child of `parent`, on the parent's image
    pub async fn create_sub_element(&self, parent: &Element, element: NewElement) -> Result<Option<Uuid>> {
        self.publish(parent, element).await
    }

    /// Create several children of `parent` in one call
    pub async fn create_elements(
        &self,
        parent: &Element,
        elements: Vec<NewElement>,
    ) -> Result<Option<Vec<Uuid>>> {
        self.publish(parent, elements).await
    }

    /// Link an existing element under another parent
    ///
    /// Returns whether the link was sent. Remote only: cached rows keep their
    /// original parent.
    pub async fn create_element_parent(&self, parent: &Element, child: &Element) -> Result<bool> {
        if parent.id == child.id {
            return Err(WorkerError::Validation(format!(
                "Element {} can't be its own parent",
                parent.id
            )));
        }
        if self.context.skip_read_only("element parent") {
            return Ok(false);
        }

        self.context
            .api
            .request(
                &Operation::CreateElementParent {
                    parent_id: parent.id,
                    child_id: child.id,
                },
                Params::none(),
            )
            .await?;
        Ok(true)
    }

    /// Children of `parent`, from the cache when there is one, else from the remote
    pub fn list_element_children(
        &self,
        parent: &Element,
        filter: &ChildrenFilter,
    ) -> Result<BoxStream<'static, Result<Element>>> {
        if let Some(cache) = &self.context.cache {
            if let Some(field) = filter.unsupported_on_cache() {
                return Err(WorkerError::UnsupportedFilter(format!(
                    "{field} can't be used when listing children from the cache"
                )));
            }

            let mut query = ElementQuery::children_of(parent.id)
                .with_worker_version(filter.worker_version)
                .with_worker_run(filter.worker_run);
            if let Some(element_type) = &filter.element_type {
                query = query.with_type(element_type.clone());
            }

            let store = cache.clone();
            let children = cache
                .elements(&query)
                .map_err(WorkerError::from_cache)
                .and_then(move |cached| {
                    let store = store.clone();
                    async move {
                        let image = match cached.image_id {
                            Some(image_id) => store.image(image_id).await.map_err(WorkerError::from_cache)?,
                            None => None,
                        };
                        Ok::<_, WorkerError>(Element::from_cached(cached, image))
                    }
                });
            return Ok(Box::pin(children));
        }

        let parent_id = (!filter.recursive).then_some(parent.id);
        let children = self
            .context
            .api
            .paginate(
                Operation::ListElementChildren { id: parent.id },
                filter.to_params(),
            )
            .map_err(WorkerError::from)
            .and_then(move |value| async move {
                let remote: RemoteElement = serde_json::from_value(value)?;
                Ok::<_, WorkerError>(Element::from_remote(remote, parent_id))
            });
        Ok(Box::pin(children))
    }

    fn element_payload(element: &NewElement) -> Value {
        json!({
            "type": element.element_type,
            "name": element.name,
            "polygon": element.polygon,
            "confidence": element.confidence,
        })
    }
}

#[async_trait]
impl Publisher<NewElement> for ElementPublisher {
    type Created = Uuid;
    const KIND: &'static str = "element";

    fn context(&self) -> &PublishContext {
        &self.context
    }

    fn validate(&self, parent: &Element, item: &NewElement) -> Result<()> {
        item.validate()?;
        parent.require_image()?;
        parent.require_polygon()?;
        Ok(())
    }

    async fn send(&self, parent: &Element, item: &NewElement) -> Result<Option<Uuid>> {
        let image = parent.require_image()?;
        let mut body = Self::element_payload(item);
        body["image"] = json!(image.id);
        body["corpus"] = json!(self.context.identity.corpus_id);
        body["parent"] = json!(parent.id);
        body["worker_run_id"] = json!(self.context.identity.worker_run_id);

        let created: Created = self
            .context
            .api
            .request_as(&Operation::CreateElement, Params::body(body))
            .await?;
        Ok(Some(created.id))
    }

    async fn mirror(
        &self,
        cache: &CacheStore,
        parent: &Element,
        item: &NewElement,
        created: &Uuid,
    ) -> mlw_common::Result<()> {
        if let Some(image) = &parent.image {
            cache.ensure_image(image).await?;
        }
        cache
            .insert_one(&item.to_cached(*created, parent, &self.context))
            .await
    }

    fn account(&self, reporter: &mut Reporter, parent: &Element, item: &NewElement, _created: &Uuid) {
        reporter.add_element(parent.id, &item.element_type, 1);
    }
}

#[async_trait]
impl Publisher<Vec<NewElement>> for ElementPublisher {
    type Created = Vec<Uuid>;
    const KIND: &'static str = "elements";

    fn context(&self) -> &PublishContext {
        &self.context
    }

    fn validate(&self, parent: &Element, items: &Vec<NewElement>) -> Result<()> {
        validation::non_empty_list("elements", items)?;
        for item in items {
            item.validate()?;
        }
        parent.require_image()?;
        Ok(())
    }

    async fn send(&self, parent: &Element, items: &Vec<NewElement>) -> Result<Option<Vec<Uuid>>> {
        let body = json!({
            "worker_run_id": self.context.identity.worker_run_id,
            "elements": items.iter().map(Self::element_payload).collect::<Vec<_>>(),
        });

        let created: Vec<Created> = self
            .context
            .api
            .request_as(
                &Operation::CreateElements { parent_id: parent.id },
                Params::body(body),
            )
            .await?;
        if created.len() != items.len() {
            return Err(WorkerError::Api(crate::error::ApiError::Decode {
                operation: "CreateElements",
                message: format!("sent {} elements, got {} ids back", items.len(), created.len()),
            }));
        }
        Ok(Some(created.into_iter().map(|c| c.id).collect()))
    }

    async fn mirror(
        &self,
        cache: &CacheStore,
        parent: &Element,
        items: &Vec<NewElement>,
        created: &Vec<Uuid>,
    ) -> mlw_common::Result<()> {
        // Element rows reference the parent's image
        if let Some(image) = &parent.image {
            cache.ensure_image(image).await?;
        }
        let rows: Vec<CachedElement> = items
            .iter()
            .zip(created)
            .map(|(item, id)| item.to_cached(*id, parent, &self.context))
            .collect();
        cache.insert(&rows).await
    }

    fn account(&self, reporter: &mut Reporter, parent: &Element, items: &Vec<NewElement>, _created: &Vec<Uuid>) {
        for item in items {
            reporter.add_element(parent.id, &item.element_type, 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_filter_support() {
        assert_eq!(ChildrenFilter::of_type("line").unsupported_on_cache(), None);
        let filter = ChildrenFilter {
            worker_version: WorkerVersionFilter::Manual,
            ..Default::default()
        };
        assert_eq!(filter.unsupported_on_cache(), None);

        let named = ChildrenFilter {
            name: Some("foo".to_string()),
            ..Default::default()
        };
        assert_eq!(named.unsupported_on_cache(), Some("name"));
    }

    #[test]
    fn test_manual_worker_version_sent_as_false() {
        let filter = ChildrenFilter {
            element_type: Some("line".to_string()),
            worker_version: WorkerVersionFilter::Manual,
            ..Default::default()
        };
        let params = filter.to_params();
        assert!(params.query.contains(&("type".to_string(), "line".to_string())));
        assert!(params.query.contains(&("worker_version".to_string(), "False".to_string())));
    }

    #[test]
    fn test_new_element_validation() {
        let square = vec![[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0]];
        assert!(NewElement::new("line", "1", square.clone()).validate().is_ok());
        assert!(NewElement::new("", "1", square.clone()).validate().is_err());
        assert!(NewElement::new("line", "1", square)
            .with_confidence(2.0)
            .validate()
            .is_err());
    }
}
