//! Per-repository override manifest (`.loom.repo.json`).
//!
//! Lives inside the repository itself and takes precedence over the
//! workspace config for that repository's commands.

use crate::config::PathsConfig;
use crate::error::{LoomError, Result};
use crate::installer::SourceSpec;
use crate::plugins::CommandSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoOverrides {
    #[serde(default)]
    pub commands: CommandSet,
    #[serde(default)]
    pub required_plugins: BTreeMap<String, SourceSpec>,
}

impl RepoOverrides {
    /// Read the override manifest in `repo_dir`, if there is one.
    pub async fn load(repo_dir: &Path) -> Result<Option<Self>> {
        let path = repo_dir.join(PathsConfig::REPO_OVERRIDE_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LoomError::io_with_path(e, path)),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| LoomError::Json {
                message: format!("Failed to parse {}: {}", path.display(), e),
                source: Some(e),
            })
    }
}
