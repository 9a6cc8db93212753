//! Element metadata publication
//!
//! Metadata has no cache table: publication goes to the remote and the report
//! only.

use super::validation;
use super::{PublishContext, Publisher};
use crate::api::{Operation, Params};
use crate::error::{ApiError, Result, WorkerError};
use crate::models::{Created, Element};
use crate::reporter::Reporter;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use mlw_common::CacheStore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaType {
    Text,
    #[serde(rename = "html")]
    HTML,
    Date,
    Location,
    Reference,
    Numeric,
    Url,
}

impl MetaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetaType::Text => "text",
            MetaType::HTML => "html",
            MetaType::Date => "date",
            MetaType::Location => "location",
            MetaType::Reference => "reference",
            MetaType::Numeric => "numeric",
            MetaType::Url => "url",
        }
    }
}

impl fmt::Display for MetaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetaType {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(MetaType::Text),
            "html" => Ok(MetaType::HTML),
            "date" => Ok(MetaType::Date),
            "location" => Ok(MetaType::Location),
            "reference" => Ok(MetaType::Reference),
            "numeric" => Ok(MetaType::Numeric),
            "url" => Ok(MetaType::Url),
            other => Err(WorkerError::Validation(format!("Unknown metadata type: {other}"))),
        }
    }
}

/// Metadata to set on an element
#[derive(Debug, Clone, PartialEq)]
pub struct NewMetadata {
    pub meta_type: MetaType,
    pub name: String,
    pub value: String,
    pub entity_id: Option<Uuid>,
}

impl NewMetadata {
    pub fn new(meta_type: MetaType, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            meta_type,
            name: name.into(),
            value: value.into(),
            entity_id: None,
        }
    }

    pub fn with_entity(mut self, entity_id: Uuid) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    fn validate(&self) -> Result<()> {
        validation::non_empty("name", &self.name)?;
        validation::non_empty("value", &self.value)?;
        if self.meta_type == MetaType::Numeric && self.value.trim().parse::<f64>().is_err() {
            return Err(WorkerError::Validation(format!(
                "numeric metadata {} has a non numeric value: {}",
                self.name, self.value
            )));
        }
        Ok(())
    }

    fn payload(&self) -> serde_json::Value {
        json!({
            "type": self.meta_type,
            "name": self.name,
            "value": self.value,
            "entity_id": self.entity_id,
        })
    }
}

/// Metadata as returned by the remote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaData {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub meta_type: MetaType,
    pub name: String,
    pub value: serde_json::Value,
    #[serde(default, alias = "entity")]
    pub entity_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
struct BulkMetadataResponse {
    metadata_list: Vec<Created>,
}

/// Publishes element metadata
#[derive(Debug, Clone)]
pub struct MetadataPublisher {
    context: Arc<PublishContext>,
}

impl MetadataPublisher {
    pub fn new(context: Arc<PublishContext>) -> Self {
        Self { context }
    }

    pub async fn create_metadata(&self, element: &Element, metadata: NewMetadata) -> Result<Option<Uuid>> {
        self.publish(element, metadata).await
    }

    pub async fn create_metadatas(
        &self,
        element: &Element,
        metadatas: Vec<NewMetadata>,
    ) -> Result<Option<Vec<Uuid>>> {
        self.publish(element, metadatas).await
    }

    /// Metadata of `element`, optionally including its ancestors'; remote only
    pub fn list_element_metadata(
        &self,
        element: &Element,
        load_parents: bool,
    ) -> BoxStream<'static, Result<MetaData>> {
        let mut params = Params::none();
        if load_parents {
            params = params.query("load_parents", true);
        }
        Box::pin(
            self.context
                .api
                .paginate(Operation::ListElementMetaData { element_id: element.id }, params)
                .map_err(WorkerError::from)
                .and_then(|value| async move { Ok::<_, WorkerError>(serde_json::from_value(value)?) }),
        )
    }
}

#[async_trait]
impl Publisher<NewMetadata> for MetadataPublisher {
    type Created = Uuid;
    const KIND: &'static str = "metadata";

    fn context(&self) -> &PublishContext {
        &self.context
    }

    fn validate(&self, _element: &Element, item: &NewMetadata) -> Result<()> {
        item.validate()
    }

    async fn send(&self, element: &Element, item: &NewMetadata) -> Result<Option<Uuid>> {
        let mut body = item.payload();
        body["worker_run_id"] = json!(self.context.identity.worker_run_id);
        let created: Created = self
            .context
            .api
            .request_as(
                &Operation::CreateMetaData { element_id: element.id },
                Params::body(body),
            )
            .await?;
        Ok(Some(created.id))
    }

    async fn mirror(
        &self,
        _cache: &CacheStore,
        _element: &Element,
        _item: &NewMetadata,
        _created: &Uuid,
    ) -> mlw_common::Result<()> {
        Ok(())
    }

    fn account(&self, reporter: &mut Reporter, element: &Element, item: &NewMetadata, created: &Uuid) {
        reporter.add_metadata(element.id, *created, item.meta_type.as_str(), &item.name);
    }
}

#[async_trait]
impl Publisher<Vec<NewMetadata>> for MetadataPublisher {
    type Created = Vec<Uuid>;
    const KIND: &'static str = "metadata list";

    fn context(&self) -> &PublishContext {
        &self.context
    }

    fn validate(&self, _element: &Element, items: &Vec<NewMetadata>) -> Result<()> {
        validation::non_empty_list("metadata_list", items)?;
        items.iter().try_for_each(NewMetadata::validate)
    }

    async fn send(&self, element: &Element, items: &Vec<NewMetadata>) -> Result<Option<Vec<Uuid>>> {
        let body = json!({
            "worker_run_id": self.context.identity.worker_run_id,
            "metadata_list": items.iter().map(NewMetadata::payload).collect::<Vec<_>>(),
        });
        let response: BulkMetadataResponse = self
            .context
            .api
            .request_as(
                &Operation::CreateMetaDataBulk { element_id: element.id },
                Params::body(body),
            )
            .await?;
        if response.metadata_list.len() != items.len() {
            return Err(WorkerError::Api(ApiError::Decode {
                operation: "CreateMetaDataBulk",
                message: format!(
                    "sent {} metadata, got {} back",
                    items.len(),
                    response.metadata_list.len()
                ),
            }));
        }
        Ok(Some(response.metadata_list.into_iter().map(|c| c.id).collect()))
    }

    async fn mirror(
        &self,
        _cache: &CacheStore,
        _element: &Element,
        _items: &Vec<NewMetadata>,
        _created: &Vec<Uuid>,
    ) -> mlw_common::Result<()> {
        Ok(())
    }

    fn account(&self, reporter: &mut Reporter, element: &Element, items: &Vec<NewMetadata>, created: &Vec<Uuid>) {
        for (item, id) in items.iter().zip(created) {
            reporter.add_metadata(element.id, *id, item.meta_type.as_str(), &item.name);
        }
    }
}
