//! Entry point for library consumers.
//!
//! `LoomApi` owns the plugin registry for a workspace. The registry is built
//! once: built-ins at construction, external discovery on the first call
//! that needs it. Resolution calls share a read lock and may run
//! concurrently; a live install takes the write lock, so readers wait until
//! the new plugins are registered.

mod builder;

pub use builder::LoomApiBuilder;

use crate::config::PluginPaths;
use crate::error::{LoomError, Result};
use crate::installer::{InstalledPlugin, PluginInstaller, SourceSpec};
use crate::plugins::{
    load_module_file, register_module, resolve_entry_point, CommandKind, CommandRunner,
    DiscoveryReport, PluginLoader, PluginOrigin, PluginRegistry, PluginSummary, RegisterOutcome,
};
use crate::resolve::{CommandResolver, Resolution};
use crate::workspace::{RepoConfig, WorkspaceConfig};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock, RwLockReadGuard};
use tracing::info;

/// Default number of repositories resolved concurrently.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Result of a live install.
#[derive(Debug, Clone, Serialize)]
pub struct LiveInstall {
    pub record: InstalledPlugin,
    pub outcomes: Vec<(String, String)>,
}

/// Resolution for one repository of the workspace.
#[derive(Debug, Clone, Serialize)]
pub struct RepoResolution {
    pub repo: String,
    pub path: PathBuf,
    pub library: bool,
    pub resolution: Resolution,
}

pub(crate) struct ApiInner {
    workspace_root: PathBuf,
    config: WorkspaceConfig,
    paths: PluginPaths,
    installer: PluginInstaller,
    registry: RwLock<PluginRegistry>,
    discovery: OnceCell<DiscoveryReport>,
    external_plugins: bool,
}

/// Handle to a loom workspace. Cheap to clone.
#[derive(Clone)]
pub struct LoomApi {
    inner: Arc<ApiInner>,
}

impl LoomApi {
    /// Create a builder for more control over initialization.
    pub fn builder(workspace_root: impl Into<PathBuf>) -> LoomApiBuilder {
        LoomApiBuilder::new(workspace_root)
    }

    /// Open the workspace at `workspace_root` with default settings.
    pub fn new(workspace_root: impl Into<PathBuf>) -> Result<Self> {
        LoomApiBuilder::new(workspace_root).build()
    }

    pub fn workspace_root(&self) -> &Path {
        &self.inner.workspace_root
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.inner.config
    }

    pub fn paths(&self) -> &PluginPaths {
        &self.inner.paths
    }

    /// Run external discovery. Only the first call does any work; later and
    /// concurrent calls wait for it and get the same report.
    pub async fn initialize(&self) -> &DiscoveryReport {
        let inner = &self.inner;
        inner
            .discovery
            .get_or_init(|| async {
                if !inner.external_plugins {
                    return DiscoveryReport::default();
                }
                let declared = inner.config.declared_plugins(&inner.workspace_root).await;
                let mut registry = inner.registry.write().await;
                PluginLoader::new(inner.paths.clone())
                    .discover(&mut registry, &inner.installer, &declared)
                    .await
            })
            .await
    }

    /// Initialized registry, read-locked.
    pub async fn registry(&self) -> RwLockReadGuard<'_, PluginRegistry> {
        self.initialize().await;
        self.inner.registry.read().await
    }

    /// Registered plugins in registration order.
    pub async fn list_plugins(&self) -> Vec<PluginSummary> {
        self.registry().await.list()
    }

    /// Plugins recorded in the lock file.
    pub fn installed_plugins(&self) -> Result<Vec<InstalledPlugin>> {
        self.inner.installer.list()
    }

    /// Config entry and directory for repository `name`.
    pub fn repo(&self, name: &str) -> Result<(&RepoConfig, PathBuf)> {
        let repo = self.inner.config.repo(name).ok_or_else(|| LoomError::Config {
            message: format!("Unknown repository '{}'", name),
        })?;
        Ok((repo, repo.dir(&self.inner.workspace_root, name)))
    }

    /// Resolve `kind` for repository `name`.
    pub async fn resolve(&self, name: &str, kind: CommandKind) -> Result<Resolution> {
        let (repo, dir) = self.repo(name)?;
        let registry = self.registry().await;
        Ok(self.resolver(&registry).resolve(repo, &dir, kind).await)
    }

    /// Command for `kind` in repository `name`, or `None` to skip it.
    pub async fn resolve_command(&self, name: &str, kind: CommandKind) -> Result<Option<String>> {
        let (repo, dir) = self.repo(name)?;
        let registry = self.registry().await;
        Ok(self
            .resolver(&registry)
            .resolve_command(repo, &dir, kind)
            .await
            .map(|(command, _)| command))
    }

    /// Runner for repository `name`.
    pub async fn command_runner(&self, name: &str) -> Result<CommandRunner> {
        let (repo, dir) = self.repo(name)?;
        let registry = self.registry().await;
        Ok(self.resolver(&registry).command_runner(repo, &dir).await)
    }

    /// Resolve `kind` for every repository, at most `concurrency` at a time.
    /// Results come back in repository name order.
    pub async fn resolve_all(&self, kind: CommandKind, concurrency: usize) -> Vec<RepoResolution> {
        self.initialize().await;
        let root = &self.inner.workspace_root;

        stream::iter(self.inner.config.repos.iter())
            .map(|(name, repo)| async move {
                let dir = repo.dir(root, name);
                let registry = self.inner.registry.read().await;
                let resolution = self.resolver(&registry).resolve(repo, &dir, kind).await;
                RepoResolution {
                    repo: name.clone(),
                    path: dir,
                    library: repo.library,
                    resolution,
                }
            })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    /// Install `id` and register its plugins without restarting.
    ///
    /// Holds the registry write lock for the whole install, so concurrent
    /// resolution waits rather than seeing a half-registered package.
    pub async fn install_plugin(&self, id: &str, spec: &SourceSpec) -> Result<LiveInstall> {
        self.initialize().await;
        let mut registry = self.inner.registry.write().await;
        if registry.origin(id).is_some_and(PluginOrigin::is_builtin) {
            return Err(LoomError::Validation {
                field: "id".to_string(),
                message: format!("'{}' is a built-in plugin and cannot be installed", id),
            });
        }

        let record = self.inner.installer.install(id, spec).await?;
        let entry = resolve_entry_point(&record.path)
            .await
            .ok_or_else(|| LoomError::InstallationFailed {
                id: id.to_string(),
                message: format!("no plugin module in {}", record.path.display()),
            })?;
        let module = load_module_file(&entry).await?;
        let outcomes = register_module(
            &mut registry,
            module,
            PluginOrigin::Installed(record.path.clone()),
        );

        info!(
            "Installed {} with {} of {} plugins registered",
            id,
            outcomes.iter().filter(|(_, o)| o.is_accepted()).count(),
            outcomes.len()
        );
        Ok(LiveInstall {
            record,
            outcomes: outcomes
                .into_iter()
                .map(|(id, outcome)| (id, describe(&outcome)))
                .collect(),
        })
    }

    /// Argument vector opening repository `name` in editor `editor`.
    pub async fn editor_command(&self, name: &str, editor: &str) -> Result<Vec<String>> {
        let (_, dir) = self.repo(name)?;
        let registry = self.registry().await;
        let plugin = registry.editor(editor).ok_or_else(|| LoomError::Config {
            message: format!("Unknown editor '{}'", editor),
        })?;
        Ok(plugin.open_command(&dir))
    }

    /// Uninstall `id`. Plugins it registered stay active until the next
    /// process start.
    pub async fn remove_plugin(&self, id: &str) -> Result<InstalledPlugin> {
        self.inner.installer.remove(id).await
    }

    fn resolver<'a>(&'a self, registry: &'a PluginRegistry) -> CommandResolver<'a> {
        CommandResolver::new(registry)
            .with_default_package_manager(self.inner.config.default_package_manager.as_deref())
    }
}

fn describe(outcome: &RegisterOutcome) -> String {
    match outcome {
        RegisterOutcome::Registered => "registered".to_string(),
        RegisterOutcome::Replaced => "replaced".to_string(),
        RegisterOutcome::Rejected(reason) => format!("rejected: {}", reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn api_for(temp: &TempDir, config: serde_json::Value) -> LoomApi {
        let config: WorkspaceConfig = serde_json::from_value(config).unwrap();
        LoomApi::builder(temp.path().join("ws"))
            .with_paths(PluginPaths::under_home(temp.path().join("home")))
            .with_config(config)
            .with_registry_url("http://127.0.0.1:9")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let plugins = temp.path().join("ws/.loom/plugins");
        std::fs::create_dir_all(&plugins).unwrap();
        std::fs::write(
            plugins.join("elixir.json"),
            json!({"metadata": {"id": "elixir", "name": "Elixir", "kind": "language"}}).to_string(),
        )
        .unwrap();

        let api = api_for(&temp, json!({}));
        let (a, b) = tokio::join!(api.initialize(), api.initialize());
        assert!(std::ptr::eq(a, b));
        assert_eq!(a.registered, vec!["elixir".to_string()]);
        assert_eq!(
            api.list_plugins()
                .await
                .iter()
                .filter(|p| p.id == "elixir")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_unknown_repository_is_config_error() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("ws")).unwrap();
        let api = api_for(&temp, json!({}));
        assert!(matches!(
            api.resolve("nope", CommandKind::Test).await,
            Err(LoomError::Config { .. })
        ));
    }

    #[tokio::test]
    async fn test_builtin_id_is_not_installed() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("ws/python-plugin");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(
            source.join("plugin.json"),
            json!({"metadata": {"id": "python", "name": "Python", "kind": "language"}}).to_string(),
        )
        .unwrap();

        let api = api_for(&temp, json!({}));
        let err = api
            .install_plugin("python", &SourceSpec::from("./python-plugin"))
            .await
            .unwrap_err();
        assert!(matches!(err, LoomError::Validation { .. }));
        assert!(api.installed_plugins().unwrap().is_empty());
        assert!(!api.paths().cache_dir.exists());
    }

    #[tokio::test]
    async fn test_resolution_waits_for_live_install() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("ws/app")).unwrap();
        let source = temp.path().join("ws/elixir-plugin");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(
            source.join("plugin.json"),
            json!({
                "metadata": {"id": "elixir", "name": "Elixir", "version": "1.0.0", "kind": "language"},
                "markers": ["mix.exs"],
                "commands": {"test": "mix test"}
            })
            .to_string(),
        )
        .unwrap();

        let api = api_for(&temp, json!({"repos": {"app": {"language": "elixir"}}}));
        api.initialize().await;
        let spec = SourceSpec::from("./elixir-plugin");

        let (installed, resolved) = tokio::join!(api.install_plugin("elixir", &spec), async {
            let mut gated = false;
            for _ in 0..100 {
                if api.inner.registry.try_read().is_err() {
                    gated = true;
                    break;
                }
                tokio::task::yield_now().await;
            }
            (gated, api.resolve_command("app", CommandKind::Test).await)
        });

        installed.unwrap();
        let (gated, command) = resolved;
        assert!(gated);
        assert_eq!(command.unwrap().as_deref(), Some("mix test"));
    }

    #[tokio::test]
    async fn test_editor_command_for_repository() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("ws/web")).unwrap();
        let api = api_for(&temp, json!({"repos": {"web": {}}}));

        let argv = api.editor_command("web", "zed").await.unwrap();
        assert_eq!(argv[0], "zed");
        assert_eq!(PathBuf::from(&argv[1]), temp.path().join("ws/web"));
        assert!(matches!(
            api.editor_command("web", "python").await,
            Err(LoomError::Config { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_workspace_root() {
        let temp = TempDir::new().unwrap();
        assert!(LoomApi::builder(temp.path().join("missing"))
            .with_paths(PluginPaths::under_home(temp.path().join("home")))
            .build()
            .is_err());
    }
}
