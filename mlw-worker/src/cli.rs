//! Command line arguments
//!
//! Flags fall back to `MLW_*` environment variables set by the task
//! orchestrator.

use crate::api::RetryPolicy;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

#[derive(Parser, Debug, Clone)]
#[command(name = "mlw-worker")]
#[command(about = "Runs a machine learning worker over document elements")]
#[command(version)]
pub struct Args {
    /// Local configuration file, for developer mode
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Cache database to use in developer mode
    #[arg(short, long)]
    pub database: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, env = "MLW_DEBUG")]
    pub verbose: bool,

    /// Developer mode: nothing is published
    #[arg(long)]
    pub dev: bool,

    /// Directory holding the model, checked in developer mode
    #[arg(long)]
    pub model_dir: Option<PathBuf>,

    /// JSON file listing the elements to process, as `[{"id": ..., "type": ...}]`
    #[arg(long)]
    pub elements_list: Option<PathBuf>,

    /// Elements to process
    #[arg(long, num_args = 1..)]
    pub element: Vec<Uuid>,

    /// Root of the task working directories
    #[arg(long, env = "MLW_DATA_DIR", default_value = "/data")]
    pub data_dir: PathBuf,

    #[arg(long, env = "MLW_TASK_ID")]
    pub task_id: Option<String>,

    /// Parent task ids, comma separated, in merge order
    #[arg(long, env = "MLW_TASK_PARENTS", value_delimiter = ',')]
    pub task_parents: Vec<String>,

    /// Chunk processed by this task
    #[arg(long, env = "MLW_TASK_CHUNK")]
    pub task_chunk: Option<String>,

    /// Worker run; without it the worker runs in developer mode
    #[arg(long, env = "MLW_WORKER_RUN_ID")]
    pub worker_run_id: Option<Uuid>,

    /// Corpus to use instead of the process corpus
    #[arg(long, env = "MLW_CORPUS_ID")]
    pub corpus_id: Option<Uuid>,

    #[arg(long, env = "MLW_API_URL", default_value = "http://localhost:8000/")]
    pub api_url: String,

    #[arg(long, env = "MLW_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Per request timeout, in seconds
    #[arg(long, env = "MLW_API_TIMEOUT", default_value_t = 30)]
    pub api_timeout: u64,

    /// Attempts for each remote call, including the first
    #[arg(long, env = "MLW_API_MAX_ATTEMPTS", default_value_t = 5)]
    pub api_max_attempts: u32,

    /// Directory searched for secrets the remote doesn't provide
    #[arg(long, env = "MLW_SECRETS_DIR")]
    pub secrets_dir: Option<PathBuf>,
}

impl Args {
    /// Developer mode is forced when there is no worker run
    pub fn is_dev(&self) -> bool {
        self.dev || self.worker_run_id.is_none()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.api_max_attempts.max(1),
            ..RetryPolicy::default()
        }
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout)
    }

    /// Working directory of the current task, if any
    pub fn task_dir(&self) -> Option<PathBuf> {
        self.task_id
            .as_deref()
            .map(|id| mlw_common::paths::task_dir(&self.data_dir, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_flags() {
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        let u3 = Uuid::new_v4();
        let args = Args::try_parse_from([
            "mlw-worker",
            "--element",
            &u1.to_string(),
            &u2.to_string(),
            "--element",
            &u3.to_string(),
        ])
        .unwrap();
        assert_eq!(args.element, vec![u1, u2, u3]);
    }

    #[test]
    fn test_invalid_element_id_rejected() {
        assert!(Args::try_parse_from(["mlw-worker", "--element", "not-a-uuid"]).is_err());
    }

    #[test]
    fn test_developer_flags() {
        let args = Args::try_parse_from([
            "mlw-worker",
            "--dev",
            "--database",
            "/tmp/db.sqlite",
            "--config",
            "worker.yml",
            "--model-dir",
            "/models",
            "--task-parents",
            "a,b",
        ])
        .unwrap();
        assert!(args.is_dev());
        assert_eq!(args.database, Some(PathBuf::from("/tmp/db.sqlite")));
        assert_eq!(args.task_parents, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(args.retry_policy().max_attempts, 5);
    }
}
