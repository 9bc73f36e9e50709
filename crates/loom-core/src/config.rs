//! Centralized configuration for loom.
//!
//! Constants for file names, installer timeouts and the on-disk layout, plus
//! `PluginPaths` which pins those names to concrete directories.

use crate::error::{LoomError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "loom";
    /// Version compared against a plugin's `minHostVersion`.
    pub const HOST_VERSION: &'static str = env!("CARGO_PKG_VERSION");
    pub const HOME_ENV: &'static str = "LOOM_HOME";
    pub const REGISTRY_ENV: &'static str = "LOOM_REGISTRY";
}

/// Shared directory and file names.
pub struct PathsConfig;

impl PathsConfig {
    pub const HOME_DIR_NAME: &'static str = ".loom";
    pub const CACHE_DIR_NAME: &'static str = "plugins";
    pub const LOCK_FILE_NAME: &'static str = "plugins.lock.json";
    /// Workspace-local plugin directory, relative to the workspace root.
    pub const WORKSPACE_PLUGINS_DIR: &'static str = ".loom/plugins";
    pub const WORKSPACE_CONFIG_FILE: &'static str = ".loom.json";
    /// Override manifest living inside each repository.
    pub const REPO_OVERRIDE_FILE: &'static str = ".loom.repo.json";
    pub const STAGING_PREFIX: &'static str = ".staging-";
}

/// Configuration for the plugin installer.
pub struct InstallerConfig;

impl InstallerConfig {
    pub const LOCK_VERSION: u32 = 1;
    pub const GIT_TIMEOUT: Duration = Duration::from_secs(120);
    pub const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
    pub const LOCAL_COPY_TIMEOUT: Duration = Duration::from_secs(60);
    pub const DOWNLOAD_RETRY_ATTEMPTS: u32 = 3;
    pub const DEFAULT_REGISTRY: &'static str = "https://registry.npmjs.org";
    pub const USER_AGENT: &'static str = concat!("loom/", env!("CARGO_PKG_VERSION"));
}

/// Concrete locations used by discovery and the installer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginPaths {
    /// Installed-plugin cache; one subdirectory per plugin.
    pub cache_dir: PathBuf,
    /// Lock file recording installed plugins.
    pub lock_file: PathBuf,
    /// User-managed plugin directory inside the workspace.
    pub workspace_plugins_dir: Option<PathBuf>,
}

impl PluginPaths {
    /// Lay out cache and lock file under `home`.
    pub fn under_home(home: impl AsRef<Path>) -> Self {
        let home = home.as_ref();
        Self {
            cache_dir: home.join(PathsConfig::CACHE_DIR_NAME),
            lock_file: home.join(PathsConfig::LOCK_FILE_NAME),
            workspace_plugins_dir: None,
        }
    }

    /// Resolve the loom home from `LOOM_HOME`, falling back to `~/.loom`.
    pub fn from_env() -> Result<Self> {
        if let Some(home) = std::env::var_os(AppConfig::HOME_ENV) {
            return Ok(Self::under_home(PathBuf::from(home)));
        }

        let home = dirs::home_dir().ok_or_else(|| LoomError::Config {
            message: "Unable to determine home directory".to_string(),
        })?;
        Ok(Self::under_home(home.join(PathsConfig::HOME_DIR_NAME)))
    }

    /// Attach the workspace-local plugin directory for `workspace_root`.
    pub fn with_workspace(mut self, workspace_root: impl AsRef<Path>) -> Self {
        self.workspace_plugins_dir =
            Some(workspace_root.as_ref().join(PathsConfig::WORKSPACE_PLUGINS_DIR));
        self
    }
}

/// Registry base URL for registry-style installs.
pub fn registry_url() -> String {
    std::env::var(AppConfig::REGISTRY_ENV)
        .ok()
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| InstallerConfig::DEFAULT_REGISTRY.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_under_home() {
        let paths = PluginPaths::under_home("/tmp/loom-home").with_workspace("/work/space");
        assert_eq!(paths.cache_dir, PathBuf::from("/tmp/loom-home/plugins"));
        assert_eq!(
            paths.lock_file,
            PathBuf::from("/tmp/loom-home/plugins.lock.json")
        );
        assert_eq!(
            paths.workspace_plugins_dir,
            Some(PathBuf::from("/work/space/.loom/plugins"))
        );
    }

    #[test]
    fn test_lock_file_outside_cache() {
        let paths = PluginPaths::under_home("/h");
        assert!(!paths.lock_file.starts_with(&paths.cache_dir));
    }

    #[test]
    fn test_timeouts_are_reasonable() {
        assert!(InstallerConfig::GIT_TIMEOUT > Duration::from_secs(10));
        assert!(InstallerConfig::CONNECT_TIMEOUT <= InstallerConfig::HTTP_TIMEOUT);
    }
}
