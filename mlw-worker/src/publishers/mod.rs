//! Publication of worker results
//!
//! Every publisher follows the same sequence for each create call:
//!
//! 1. Validate the arguments.
//! 2. Stop there in read-only mode (no worker run, or developer mode).
//! 3. Call the remote with the payload and the worker run id.
//! 4. Mirror the created rows into the cache, when there is one.
//! 5. Count the result in the run report.
//!
//! A cache row only ever exists for something the remote accepted. Failing to
//! write that row is logged and doesn't fail the publication.

pub mod classifications;
pub mod elements;
pub mod entities;
pub mod metadata;
pub mod transcriptions;
pub mod validation;

pub use classifications::{ClassificationPublisher, NewClassification};
pub use elements::{ChildrenFilter, ElementPublisher, NewElement};
pub use entities::{
    CreatedMention, EntityMention, EntityPublisher, NewEntity, NewTranscriptionEntity,
    TranscriptionEntities,
};
pub use metadata::{MetaData, MetaType, MetadataPublisher, NewMetadata};
pub use transcriptions::{
    BulkTranscription, CreatedElementTranscription, ElementTranscriptions,
    NewElementTranscription, NewTranscription, TranscriptionFilter, TranscriptionPublisher,
};

use crate::api::ApiClient;
use crate::error::{Result, WorkerError};
use crate::models::Element;
use crate::reporter::Reporter;
use async_trait::async_trait;
use mlw_common::cache::CacheRecord;
use mlw_common::CacheStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Who is publishing, and whether writes are allowed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub worker_run_id: Option<Uuid>,
    pub worker_version_id: Option<Uuid>,
    pub corpus_id: Option<Uuid>,
    pub dev_mode: bool,
}

impl WorkerIdentity {
    /// Without a worker run, or in developer mode, nothing is published
    pub fn is_read_only(&self) -> bool {
        self.dev_mode || self.worker_run_id.is_none()
    }
}

/// Shared state behind every publisher handle
#[derive(Debug)]
pub struct PublishContext {
    pub api: ApiClient,
    pub cache: Option<CacheStore>,
    pub reporter: Arc<Mutex<Reporter>>,
    pub identity: WorkerIdentity,
}

impl PublishContext {
    pub fn new(
        api: ApiClient,
        cache: Option<CacheStore>,
        reporter: Arc<Mutex<Reporter>>,
        identity: WorkerIdentity,
    ) -> Self {
        Self {
            api,
            cache,
            reporter,
            identity,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.identity.is_read_only()
    }

    pub fn use_cache(&self) -> bool {
        self.cache.is_some()
    }

    /// Logs and returns true when `what` must not be published
    pub(crate) fn skip_read_only(&self, what: &str) -> bool {
        if self.is_read_only() {
            tracing::warn!("Cannot create {what} as this worker is in read-only mode");
            return true;
        }
        false
    }

    pub(crate) fn corpus_id(&self) -> Result<Uuid> {
        self.identity
            .corpus_id
            .ok_or_else(|| WorkerError::Config("No corpus id configured for this worker".to_string()))
    }

    /// Insert rows in the cache, logging failures
    pub(crate) async fn mirror_rows<R: CacheRecord>(&self, rows: &[R]) {
        let Some(cache) = &self.cache else {
            return;
        };
        if rows.is_empty() {
            return;
        }
        if let Err(e) = cache.insert(rows).await {
            tracing::warn!("Couldn't save created {} in local cache: {}", R::TABLE, e);
        }
    }
}

/// One kind of annotation published for a parent element
///
/// Implementors provide the steps; [`Publisher::publish`] runs them in order.
#[async_trait]
pub trait Publisher<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// What the remote returned for a successful publication
    type Created: Send + Sync;

    /// Name used in logs
    const KIND: &'static str;

    fn context(&self) -> &PublishContext;

    fn validate(&self, parent: &Element, item: &T) -> Result<()>;

    /// Call the remote; `Ok(None)` means the remote already had it
    async fn send(&self, parent: &Element, item: &T) -> Result<Option<Self::Created>>;

    async fn mirror(
        &self,
        cache: &CacheStore,
        parent: &Element,
        item: &T,
        created: &Self::Created,
    ) -> mlw_common::Result<()>;

    fn account(&self, reporter: &mut Reporter, parent: &Element, item: &T, created: &Self::Created);

    async fn publish(&self, parent: &Element, item: T) -> Result<Option<Self::Created>> {
        self.validate(parent, &item)?;

        let context = self.context();
        if context.skip_read_only(Self::KIND) {
            return Ok(None);
        }

        let Some(created) = self.send(parent, &item).await? else {
            return Ok(None);
        };

        if let Some(cache) = &context.cache {
            if let Err(e) = self.mirror(cache, parent, &item, &created).await {
                tracing::warn!(
                    element_id = %parent.id,
                    "Couldn't save created {} in local cache: {}",
                    Self::KIND,
                    e
                );
            }
        }

        let mut reporter = context.reporter.lock().await;
        self.account(&mut reporter, parent, &item, &created);
        Ok(Some(created))
    }
}

/// Every publisher, sharing one context
#[derive(Debug, Clone)]
pub struct Publishers {
    pub elements: ElementPublisher,
    pub transcriptions: TranscriptionPublisher,
    pub classifications: ClassificationPublisher,
    pub entities: EntityPublisher,
    pub metadata: MetadataPublisher,
    context: Arc<PublishContext>,
}

impl Publishers {
    pub fn new(context: Arc<PublishContext>) -> Self {
        Self {
            elements: ElementPublisher::new(context.clone()),
            transcriptions: TranscriptionPublisher::new(context.clone()),
            classifications: ClassificationPublisher::new(context.clone()),
            entities: EntityPublisher::new(context.clone()),
            metadata: MetadataPublisher::new(context.clone()),
            context,
        }
    }

    pub fn context(&self) -> &Arc<PublishContext> {
        &self.context
    }
}
