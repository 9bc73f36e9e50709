//! Builder for configuring LoomApi initialization.

use super::{ApiInner, LoomApi};
use crate::config::{AppConfig, PluginPaths};
use crate::error::{LoomError, Result};
use crate::installer::PluginInstaller;
use crate::plugins::{builtin, PluginRegistry};
use crate::workspace::WorkspaceConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::debug;

/// Builder for configuring LoomApi initialization.
///
/// # Example
///
/// ```rust,ignore
/// use loom_core::LoomApi;
///
/// let api = LoomApi::builder("./my-workspace")
///     .with_external_plugins(false)
///     .build()?;
/// ```
pub struct LoomApiBuilder {
    workspace_root: PathBuf,
    paths: Option<PluginPaths>,
    config: Option<WorkspaceConfig>,
    host_version: Option<String>,
    registry_url: Option<String>,
    external_plugins: bool,
}

impl LoomApiBuilder {
    /// Create a new builder for the workspace at `workspace_root`.
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            paths: None,
            config: None,
            host_version: None,
            registry_url: None,
            external_plugins: true,
        }
    }

    /// Use explicit cache and lock locations instead of `LOOM_HOME`/`~/.loom`.
    ///
    /// The workspace plugin directory is filled in from the workspace root
    /// when not set.
    pub fn with_paths(mut self, paths: PluginPaths) -> Self {
        self.paths = Some(paths);
        self
    }

    /// Use an in-memory workspace config instead of reading `.loom.json`.
    pub fn with_config(mut self, config: WorkspaceConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Check plugin constraints against `version` instead of this build's.
    pub fn with_host_version(mut self, version: impl Into<String>) -> Self {
        self.host_version = Some(version.into());
        self
    }

    /// Registry base URL for registry-style installs.
    pub fn with_registry_url(mut self, url: impl Into<String>) -> Self {
        self.registry_url = Some(url.into());
        self
    }

    /// Enable or disable external plugin discovery.
    ///
    /// When disabled, only built-in plugins are registered.
    ///
    /// Default: `true`
    pub fn with_external_plugins(mut self, enable: bool) -> Self {
        self.external_plugins = enable;
        self
    }

    /// Build the LoomApi instance. Discovery runs on first use.
    pub fn build(self) -> Result<LoomApi> {
        let workspace_root = self.workspace_root;
        if !workspace_root.is_dir() {
            return Err(LoomError::Config {
                message: format!("Workspace root does not exist: {}", workspace_root.display()),
            });
        }

        let config = match self.config {
            Some(config) => config,
            None => WorkspaceConfig::load(&workspace_root)?,
        };

        let mut paths = match self.paths {
            Some(paths) => paths,
            None => PluginPaths::from_env()?,
        };
        if paths.workspace_plugins_dir.is_none() {
            paths = paths.with_workspace(&workspace_root);
        }

        let installer = match self.registry_url {
            Some(url) => PluginInstaller::with_registry(paths.clone(), &workspace_root, url)?,
            None => PluginInstaller::new(paths.clone(), &workspace_root)?,
        };

        let host_version = self
            .host_version
            .unwrap_or_else(|| AppConfig::HOST_VERSION.to_string());
        let mut registry = PluginRegistry::with_host_version(host_version);
        builtin::register_all(&mut registry);
        registry.finish_trusted_loading();

        debug!(
            "Built loom API for {} ({} repos, cache {})",
            workspace_root.display(),
            config.repos.len(),
            paths.cache_dir.display()
        );

        Ok(LoomApi {
            inner: Arc::new(ApiInner {
                workspace_root,
                config,
                paths,
                installer,
                registry: RwLock::new(registry),
                discovery: OnceCell::new(),
                external_plugins: self.external_plugins,
            }),
        })
    }
}
