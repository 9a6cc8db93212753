//! Secret resolution
//!
//! Secrets are fetched from the remote by name. When the remote doesn't have
//! one, a local secrets directory is searched for a file with the same
//! relative path. Content is parsed according to the name's suffix.

use crate::api::{ApiClient, Operation, Params};
use crate::error::{Result, WorkerError};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct RemoteSecret {
    content: String,
}

/// Parse raw secret content according to the suffix of its name
///
/// `.yaml`/`.yml` and `.json` are parsed into a JSON value; anything else is
/// kept as a string.
pub fn parse_secret(name: &str, content: &str) -> Result<Value> {
    let extension = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(content)?),
        Some("json") => Ok(serde_json::from_str(content)?),
        _ => Ok(Value::String(content.to_string())),
    }
}

/// Resolves secrets by name
#[derive(Debug, Clone)]
pub struct SecretStore {
    api: ApiClient,
    local_dir: Option<PathBuf>,
}

impl SecretStore {
    pub fn new(api: ApiClient, local_dir: Option<PathBuf>) -> Self {
        Self { api, local_dir }
    }

    /// Raw content of a secret
    pub async fn fetch(&self, name: &str) -> Result<String> {
        let remote: std::result::Result<RemoteSecret, _> = self
            .api
            .request_as(
                &Operation::RetrieveSecret {
                    name: name.to_string(),
                },
                Params::none(),
            )
            .await;

        match remote {
            Ok(secret) => {
                info!(secret = name, "Loaded secret from remote");
                return Ok(secret.content);
            }
            Err(e) => warn!(secret = name, "Secret not available from remote: {}", e),
        }

        let Some(dir) = &self.local_dir else {
            return Err(WorkerError::Config(format!("Secret {name} not found")));
        };
        let path = dir.join(name.trim_start_matches('/'));
        debug!(secret = name, path = %path.display(), "Looking for local secret");
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                info!(secret = name, "Loaded secret from local directory");
                Ok(content)
            }
            Err(e) => Err(WorkerError::Config(format!(
                "Secret {name} not found remotely nor in {}: {e}",
                dir.display()
            ))),
        }
    }

    /// Fetch and parse a secret
    pub async fn load(&self, name: &str) -> Result<Value> {
        let content = self.fetch(name).await?;
        parse_secret(name, &content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_by_suffix() {
        assert_eq!(
            parse_secret("creds.yaml", "user: alice\nport: 22\n").unwrap(),
            json!({ "user": "alice", "port": 22 })
        );
        assert_eq!(
            parse_secret("dir/creds.YML", "- a\n- b\n").unwrap(),
            json!(["a", "b"])
        );
        assert_eq!(
            parse_secret("creds.json", r#"{"token": "abc"}"#).unwrap(),
            json!({ "token": "abc" })
        );
        assert_eq!(parse_secret("token", "abc").unwrap(), json!("abc"));
    }

    #[test]
    fn test_invalid_json_secret() {
        assert!(matches!(
            parse_secret("creds.json", "{not json"),
            Err(WorkerError::Json(_))
        ));
    }
}
