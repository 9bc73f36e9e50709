//! Workspace configuration file (`.loom.json`).

use super::overrides::RepoOverrides;
use crate::config::PathsConfig;
use crate::error::Result;
use crate::installer::SourceSpec;
use crate::metadata::atomic_read_json;
use crate::plugins::CommandSet;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One repository in the workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoConfig {
    /// Directory relative to the workspace root. Defaults to the repo name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Remote URL the repository is cloned from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Explicit language plugin ids, in priority order.
    #[serde(
        default,
        alias = "language",
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub languages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<String>,
    #[serde(default)]
    pub commands: CommandSet,
    #[serde(default)]
    pub library: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub required_plugins: BTreeMap<String, SourceSpec>,
}

impl RepoConfig {
    /// Absolute directory of this repository.
    pub fn dir(&self, root: &Path, name: &str) -> PathBuf {
        match &self.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => root.join(path),
            None => root.join(name),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(one) => vec![one],
        OneOrMany::Many(many) => many,
    })
}

/// Parsed `.loom.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_package_manager: Option<String>,
    /// Declared external plugins: id → source.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plugins: BTreeMap<String, SourceSpec>,
    #[serde(default)]
    pub repos: BTreeMap<String, RepoConfig>,
}

impl WorkspaceConfig {
    /// Config file location for a workspace root.
    pub fn path_for(root: &Path) -> PathBuf {
        root.join(PathsConfig::WORKSPACE_CONFIG_FILE)
    }

    /// Load the workspace config. A missing file is an empty workspace.
    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::path_for(root);
        match atomic_read_json::<Self>(&path)? {
            Some(config) => {
                debug!("Loaded {} with {} repos", path.display(), config.repos.len());
                Ok(config)
            }
            None => {
                debug!("No workspace config at {}", path.display());
                Ok(Self::default())
            }
        }
    }

    pub fn repo(&self, name: &str) -> Option<&RepoConfig> {
        self.repos.get(name)
    }

    /// Every declared plugin dependency: the workspace `plugins` map, each
    /// repository's `requiredPlugins`, then each repository override file's
    /// `requiredPlugins`. The first declaration of an id wins.
    pub async fn declared_plugins(&self, root: &Path) -> BTreeMap<String, SourceSpec> {
        let mut declared = self.plugins.clone();
        let mut add = |id: &String, spec: &SourceSpec, from: &str| match declared.get(id) {
            Some(existing) if existing != spec => {
                warn!(
                    "Plugin {} declared again by {} with a different source; keeping the first",
                    id, from
                );
            }
            Some(_) => {}
            None => {
                declared.insert(id.clone(), spec.clone());
            }
        };

        for (name, repo) in &self.repos {
            for (id, spec) in &repo.required_plugins {
                add(id, spec, name.as_str());
            }
        }

        for (name, repo) in &self.repos {
            let dir = repo.dir(root, name);
            match RepoOverrides::load(&dir).await {
                Ok(Some(overrides)) => {
                    for (id, spec) in &overrides.required_plugins {
                        add(id, spec, name.as_str());
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Ignoring override file in {}: {}", dir.display(), e),
            }
        }

        declared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_workspace_config() {
        let config: WorkspaceConfig = serde_json::from_str(
            r#"{
                "defaultPackageManager": "pnpm",
                "plugins": {"loom-plugin-elixir": "^1.0.0"},
                "repos": {
                    "api": {"language": "python", "commands": {"lint": "make lint"}},
                    "web": {"path": "apps/web", "languages": ["node"], "packageManager": "yarn", "library": true}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.default_package_manager.as_deref(), Some("pnpm"));
        let api = config.repo("api").unwrap();
        assert_eq!(api.languages, vec!["python".to_string()]);
        assert_eq!(api.commands.lint.as_deref(), Some("make lint"));

        let web = config.repo("web").unwrap();
        assert!(web.library);
        assert_eq!(web.dir(Path::new("/ws"), "web"), PathBuf::from("/ws/apps/web"));
        assert_eq!(api.dir(Path::new("/ws"), "api"), PathBuf::from("/ws/api"));
    }

    #[test]
    fn test_missing_config_is_empty() {
        let temp = TempDir::new().unwrap();
        assert_eq!(WorkspaceConfig::load(temp.path()).unwrap(), WorkspaceConfig::default());
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(".loom.json"), "{ repos: ").unwrap();
        assert!(WorkspaceConfig::load(temp.path()).is_err());
    }

    #[tokio::test]
    async fn test_declared_plugins_union() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("api")).unwrap();
        std::fs::write(
            root.join("api/.loom.repo.json"),
            r#"{"requiredPlugins": {"loom-plugin-zig": "github:zig-dev/loom-zig", "elixir": "9.9.9"}}"#,
        )
        .unwrap();

        let config: WorkspaceConfig = serde_json::from_str(
            r#"{
                "plugins": {"elixir": "^1.0.0"},
                "repos": {
                    "api": {"requiredPlugins": {"loom-plugin-gleam": "file:../gleam"}},
                    "web": {}
                }
            }"#,
        )
        .unwrap();

        let declared = config.declared_plugins(root).await;
        let ids: Vec<_> = declared.keys().cloned().collect();
        assert_eq!(ids, vec!["elixir", "loom-plugin-gleam", "loom-plugin-zig"]);
        assert_eq!(declared["elixir"], SourceSpec::from("^1.0.0"));
    }
}
