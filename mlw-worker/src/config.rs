//! Worker configuration resolution
//!
//! In production the configuration comes from the worker run payload served by
//! the remote. In developer mode it comes from a local file (`.toml`,
//! `.yaml`/`.yml` or `.json`), by default `<config dir>/mlw-worker/config.toml`.
//!
//! Configuration parameters are layered: worker version defaults, then
//! defaults of the user configuration schema, then the run's own overrides.

use crate::error::{Result, WorkerError};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Activity state of a process where activities are tracked
const ACTIVITIES_READY: &str = "ready";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerInfo {
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserConfigurationField {
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default, rename = "type")]
    pub field_type: Option<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersionConfiguration {
    #[serde(default)]
    pub configuration: Map<String, Value>,
    #[serde(default)]
    pub user_configuration: BTreeMap<String, UserConfigurationField>,
    #[serde(default)]
    pub secrets: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerVersionInfo {
    pub id: Uuid,
    #[serde(default)]
    pub version: Option<serde_json::Value>,
    pub worker: WorkerInfo,
    #[serde(default)]
    pub configuration: VersionConfiguration,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunConfiguration {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub configuration: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelVersionInfo {
    pub id: Uuid,
    #[serde(default)]
    pub configuration: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessInfo {
    pub id: Uuid,
    pub corpus: Option<Uuid>,
    #[serde(default)]
    pub activity_state: Option<String>,
}

/// Worker run as served by `RetrieveWorkerRun`
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerRunPayload {
    pub id: Uuid,
    pub worker_version: WorkerVersionInfo,
    #[serde(default)]
    pub configuration: Option<RunConfiguration>,
    #[serde(default)]
    pub model_version: Option<ModelVersionInfo>,
    pub process: ProcessInfo,
    #[serde(default)]
    pub summary: Option<String>,
}

/// Local configuration used in developer mode
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DevConfig {
    #[serde(default)]
    pub worker_slug: Option<String>,
    #[serde(default)]
    pub corpus_id: Option<Uuid>,
    #[serde(default)]
    pub configuration: Map<String, Value>,
    #[serde(default)]
    pub model_configuration: Map<String, Value>,
    #[serde(default)]
    pub secrets: Vec<String>,
}

impl DevConfig {
    /// Parse a developer config file, by extension
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            WorkerError::Config(format!("Cannot read config file {}: {e}", path.display()))
        })?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let config = match extension.as_deref() {
            Some("toml") => toml::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            _ => {
                return Err(WorkerError::Config(format!(
                    "Unsupported config file format: {}",
                    path.display()
                )))
            }
        };
        info!("Loaded developer configuration from {}", path.display());
        Ok(config)
    }
}

/// Default developer config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("mlw-worker").join("config.toml"))
        .filter(|p| p.is_file())
}

/// Resolved worker configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerSettings {
    pub worker_slug: String,
    pub worker_version: Option<String>,
    pub worker_run_id: Option<Uuid>,
    pub worker_version_id: Option<Uuid>,
    pub corpus_id: Option<Uuid>,
    pub process_id: Option<Uuid>,
    pub activities_enabled: bool,
    pub configuration: Map<String, Value>,
    pub model_version_id: Option<Uuid>,
    pub model_configuration: Map<String, Value>,
    /// Names of the secrets to load
    pub secret_names: Vec<String>,
    /// Loaded secrets, by name
    pub secrets: BTreeMap<String, Value>,
    pub dev_mode: bool,
}

impl WorkerSettings {
    /// Settings of a production run; `corpus_override` replaces the process corpus
    pub fn from_worker_run(run: WorkerRunPayload, corpus_override: Option<Uuid>) -> Result<Self> {
        let version = run.worker_version;
        let mut configuration = version.configuration.configuration;

        for (key, field) in version.configuration.user_configuration {
            match field.default {
                Some(default) => {
                    configuration.insert(key, default);
                }
                None if field.required => {
                    warn!(parameter = %key, "Required user configuration has no default");
                }
                None => {}
            }
        }

        if let Some(run_configuration) = run.configuration {
            info!(
                configuration_id = ?run_configuration.id,
                "Applying worker run configuration"
            );
            configuration.extend(run_configuration.configuration);
        }

        let corpus_id = corpus_override.or(run.process.corpus);
        if corpus_id.is_none() {
            return Err(WorkerError::Config(format!(
                "Worker run {} has no corpus",
                run.id
            )));
        }

        let activities_enabled = run.process.activity_state.as_deref() == Some(ACTIVITIES_READY);

        let (model_version_id, model_configuration) = match run.model_version {
            Some(model) => (Some(model.id), model.configuration),
            None => (None, Map::new()),
        };

        if let Some(summary) = &run.summary {
            info!("Loaded {summary}");
        }

        Ok(Self {
            worker_slug: version.worker.slug,
            worker_version: version
                .version
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .or(version.worker.name),
            worker_run_id: Some(run.id),
            worker_version_id: Some(version.id),
            corpus_id,
            process_id: Some(run.process.id),
            activities_enabled,
            configuration,
            model_version_id,
            model_configuration,
            secret_names: version.configuration.secrets,
            secrets: BTreeMap::new(),
            dev_mode: false,
        })
    }

    /// Settings of a developer run
    pub fn from_dev_config(config: DevConfig, corpus_override: Option<Uuid>) -> Self {
        Self {
            worker_slug: config.worker_slug.unwrap_or_else(|| "local".to_string()),
            corpus_id: corpus_override.or(config.corpus_id),
            configuration: config.configuration,
            model_configuration: config.model_configuration,
            secret_names: config.secrets,
            dev_mode: true,
            ..Default::default()
        }
    }

    /// Whether publications reach the remote
    pub fn is_read_only(&self) -> bool {
        self.dev_mode || self.worker_run_id.is_none()
    }
}
