//! Worker driver
//!
//! Runs the per-element loop: configure, open and seed the cache, list the
//! input elements, then for each one move its activity to `Started`, hand it
//! to the [`ElementProcessor`] and move it to `Processed`. A failing element
//! is recorded and the loop moves on; everything before the loop fails fast.

use crate::activity::{ActivityState, ActivityTracker};
use crate::api::{ApiClient, HttpTransport, Operation, Params};
use crate::cli::Args;
use crate::config::{default_config_path, DevConfig, WorkerRunPayload, WorkerSettings};
use crate::error::{Result, WorkerError};
use crate::models::{Element, ElementDescriptor, RemoteElement};
use crate::publishers::{PublishContext, Publishers, WorkerIdentity};
use crate::reporter::{ReportedError, Reporter, REPORT_FILENAME};
use crate::secrets::SecretStore;
use async_trait::async_trait;
use futures::TryStreamExt;
use mlw_common::cache::{CachedElement, ElementQuery, MergeTables};
use mlw_common::{paths, CacheStore, OpenMode};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What a worker does with each element
#[async_trait]
pub trait ElementProcessor: Send {
    /// Called once with the resolved configuration, before any element
    async fn configure(&mut self, _settings: &WorkerSettings) -> anyhow::Result<()> {
        Ok(())
    }

    async fn process_element(&mut self, element: &Element, publishers: &Publishers) -> anyhow::Result<()>;
}

/// Counts of a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub processed: usize,
    /// Elements another worker had already started
    pub skipped: usize,
    pub failed: usize,
    pub report_path: Option<PathBuf>,
}

/// One input of the run
#[derive(Debug, Clone)]
enum WorkItem {
    Cached(CachedElement),
    Remote(Uuid),
}

impl WorkItem {
    fn id(&self) -> Uuid {
        match self {
            WorkItem::Cached(element) => element.id,
            WorkItem::Remote(id) => *id,
        }
    }
}

/// Drives an [`ElementProcessor`] over the task's elements
#[derive(Debug)]
pub struct ElementsWorker {
    args: Args,
    api: ApiClient,
}

impl ElementsWorker {
    pub fn new(args: Args, api: ApiClient) -> Self {
        Self { args, api }
    }

    /// Worker talking to the remote over HTTP
    pub fn from_args(args: Args) -> Result<Self> {
        let transport = HttpTransport::new(&args.api_url, args.api_token.clone(), args.api_timeout())?;
        let api = ApiClient::new(Arc::new(transport), args.retry_policy());
        Ok(Self::new(args, api))
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    /// Load the worker run (or developer config) and its secrets
    pub async fn configure(&self) -> Result<WorkerSettings> {
        let mut settings = match self.args.worker_run_id.filter(|_| !self.args.dev) {
            Some(worker_run_id) => {
                info!(worker_run_id = %worker_run_id, "Loading worker run");
                let run: WorkerRunPayload = self
                    .api
                    .request_as(&Operation::RetrieveWorkerRun { id: worker_run_id }, Params::none())
                    .await?;
                WorkerSettings::from_worker_run(run, self.args.corpus_id)?
            }
            None => {
                warn!("Running in developer mode: nothing will be published");
                let config = match self.args.config.clone().or_else(default_config_path) {
                    Some(path) => DevConfig::load(&path)?,
                    None => DevConfig::default(),
                };
                let mut settings = WorkerSettings::from_dev_config(config, self.args.corpus_id);
                settings.worker_run_id = self.args.worker_run_id;
                settings
            }
        };

        if settings.dev_mode {
            if let Some(model_dir) = &self.args.model_dir {
                if !model_dir.is_dir() {
                    return Err(WorkerError::ModelNotFound(model_dir.display().to_string()));
                }
                info!("Using model from {}", model_dir.display());
            }
        }

        let secrets = SecretStore::new(self.api.clone(), self.args.secrets_dir.clone());
        for name in &settings.secret_names {
            let value = secrets.load(name).await?;
            settings.secrets.insert(name.clone(), value);
        }

        Ok(settings)
    }

    /// Where this task's cache lives, if it has one
    ///
    /// `--database` wins; otherwise the cache is `db.sqlite` (or the chunk's
    /// file) in the task working directory.
    pub fn cache_path(&self) -> Option<PathBuf> {
        if let Some(database) = &self.args.database {
            return Some(database.clone());
        }
        self.args.task_id.as_deref().map(|task_id| {
            paths::task_cache_path(&self.args.data_dir, task_id, self.args.task_chunk.as_deref())
        })
    }

    /// Open the cache and merge the parent tasks' caches into it
    ///
    /// Any parent that fails to merge aborts startup.
    pub async fn open_cache(&self) -> Result<Option<CacheStore>> {
        let Some(path) = self.cache_path() else {
            info!("No task cache configured, using the remote only");
            return Ok(None);
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }

        let cache = CacheStore::open(&path, OpenMode::CreateIfMissing).await?;

        let parents = match &self.args.task_id {
            Some(_) => paths::parent_cache_paths(
                &self.args.data_dir,
                &self.args.task_parents,
                self.args.task_chunk.as_deref(),
            ),
            None => Vec::new(),
        };
        let outcomes = cache.merge_from_parents(&parents, &MergeTables::default()).await?;
        if let Some(failed) = outcomes.into_iter().find(|o| !o.is_ok()) {
            if let Err(e) = failed.result {
                error!("Aborting: parent cache {} could not be merged", failed.path.display());
                return Err(e.into());
            }
        }

        Ok(Some(cache))
    }

    async fn list_elements(&self, cache: Option<&CacheStore>) -> Result<Vec<WorkItem>> {
        if let Some(cache) = cache {
            if cache.has_initial_elements().await? {
                let elements: Vec<CachedElement> =
                    cache.elements(&ElementQuery::initial()).try_collect().await?;
                info!(count = elements.len(), "Using initial elements from the cache");
                return Ok(elements.into_iter().map(WorkItem::Cached).collect());
            }
        }

        let ids: Vec<Uuid> = if let Some(path) = &self.args.elements_list {
            let content = tokio::fs::read_to_string(path).await?;
            let descriptors: Vec<ElementDescriptor> = serde_json::from_str(&content)?;
            descriptors.into_iter().map(|d| d.id).collect()
        } else {
            self.args.element.clone()
        };

        let mut seen = HashSet::new();
        let items: Vec<WorkItem> = ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .map(WorkItem::Remote)
            .collect();
        if items.is_empty() {
            return Err(WorkerError::NoElements);
        }
        Ok(items)
    }

    async fn resolve(&self, item: &WorkItem, cache: Option<&CacheStore>) -> Result<Element> {
        match item {
            WorkItem::Cached(cached) => {
                let image = match (cache, cached.image_id) {
                    (Some(cache), Some(image_id)) => cache.image(image_id).await?,
                    _ => None,
                };
                Ok(Element::from_cached(cached.clone(), image))
            }
            WorkItem::Remote(id) => {
                let remote: RemoteElement = self
                    .api
                    .request_as(&Operation::RetrieveElement { id: *id }, Params::none())
                    .await?;
                let mut element = Element::from_remote(remote, None);
                element.initial = true;
                if let Some(cache) = cache {
                    mirror_input(cache, &element).await;
                }
                Ok(element)
            }
        }
    }

    async fn process_one<P: ElementProcessor>(
        &self,
        item: &WorkItem,
        cache: Option<&CacheStore>,
        publishers: &Publishers,
        activity: &mut ActivityTracker,
        processor: &mut P,
    ) -> anyhow::Result<bool> {
        let element = self.resolve(item, cache).await?;

        if !activity.update(element.id, ActivityState::Started).await? {
            return Ok(false);
        }

        processor.process_element(&element, publishers).await?;

        activity.update(element.id, ActivityState::Processed).await?;
        Ok(true)
    }

    /// Configure, process every element, write the report
    ///
    /// Fails with [`WorkerError::NoElements`] when there is nothing to process
    /// and [`WorkerError::AllElementsFailed`] when no element succeeded.
    pub async fn run<P: ElementProcessor>(&self, processor: &mut P) -> Result<RunSummary> {
        let settings = self.configure().await?;
        processor
            .configure(&settings)
            .await
            .map_err(|e| WorkerError::Config(format!("{e:#}")))?;

        let cache = self.open_cache().await?;
        let result = self.process_all(&settings, cache.clone(), processor).await;

        if let Some(cache) = cache {
            if let Err(e) = cache.close().await {
                warn!("Failed to close the cache: {}", e);
            }
        }
        result
    }

    async fn process_all<P: ElementProcessor>(
        &self,
        settings: &WorkerSettings,
        cache: Option<CacheStore>,
        processor: &mut P,
    ) -> Result<RunSummary> {
        let items = self.list_elements(cache.as_ref()).await?;

        let reporter = Arc::new(Mutex::new(Reporter::new(
            settings.worker_slug.clone(),
            settings.worker_version.clone(),
        )));
        let identity = WorkerIdentity {
            worker_run_id: settings.worker_run_id,
            worker_version_id: settings.worker_version_id,
            corpus_id: settings.corpus_id,
            dev_mode: settings.dev_mode,
        };
        let publishers = Publishers::new(Arc::new(PublishContext::new(
            self.api.clone(),
            cache.clone(),
            reporter.clone(),
            identity,
        )));
        let mut activity = ActivityTracker::new(
            self.api.clone(),
            settings.worker_version_id,
            settings.process_id,
            settings.activities_enabled && !settings.dev_mode,
        );

        let mut summary = RunSummary {
            total: items.len(),
            ..Default::default()
        };

        for (index, item) in items.iter().enumerate() {
            let element_id = item.id();
            info!(element_id = %element_id, "Processing element {}/{}", index + 1, summary.total);
            reporter.lock().await.process(element_id);

            match self
                .process_one(item, cache.as_ref(), &publishers, &mut activity, processor)
                .await
            {
                Ok(true) => summary.processed += 1,
                Ok(false) => {
                    info!(element_id = %element_id, "Skipped element already handled by another worker");
                    summary.skipped += 1;
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(element_id = %element_id, "Failed running worker on element: {:#}", e);
                    if let Err(activity_err) = activity.update(element_id, ActivityState::Error).await {
                        warn!(element_id = %element_id, "Failed to set activity to error: {}", activity_err);
                    }
                    reporter.lock().await.error(element_id, ReportedError::from_anyhow(&e));
                }
            }
        }

        let report_dir = self.args.task_dir().unwrap_or_else(|| PathBuf::from("."));
        let report_path = report_dir.join(REPORT_FILENAME);
        let saved: Result<()> = async {
            tokio::fs::create_dir_all(&report_dir).await?;
            reporter.lock().await.save(&report_path)
        }
        .await;
        match saved {
            Ok(()) => {
                info!("Report saved to {}", report_path.display());
                summary.report_path = Some(report_path);
            }
            Err(e) => warn!("Failed to save report: {}", e),
        }

        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            "Ran on {} elements",
            summary.total
        );

        if summary.failed > 0 && summary.failed == summary.total {
            return Err(WorkerError::AllElementsFailed(summary.total));
        }
        Ok(summary)
    }
}

/// Keep a remotely fetched input element in the cache for child tasks
async fn mirror_input(cache: &CacheStore, element: &Element) {
    let mirrored: mlw_common::Result<()> = async {
        if let Some(image) = &element.image {
            cache.ensure_image(image).await?;
        }
        cache.insert_one(&element.to_cached()).await
    }
    .await;

    match mirrored {
        Ok(()) => debug!(element_id = %element.id, "Cached input element"),
        Err(e) if e.is_constraint() => debug!(element_id = %element.id, "Input element already cached"),
        Err(e) => warn!(element_id = %element.id, "Couldn't cache input element: {}", e),
    }
}
