//! Plugin discovery.
//!
//! Loads external plugin modules into a sealed registry from three places,
//! in order: the workspace plugin directory, the installed plugin cache, and
//! declared dependencies (installing the missing ones first). A candidate
//! that fails to load is logged and skipped; discovery itself never fails.

use super::manifest::{load_module_file, PluginModule};
use super::registry::{PluginOrigin, PluginRegistry, RegisterOutcome, RejectReason};
use super::traits::{is_dir, is_file};
use crate::config::PluginPaths;
use crate::installer::{InstalledPlugin, PluginInstaller, SourceSpec};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Files tried, in order, when a candidate is a directory.
const ENTRY_FILES: &[&str] = &["loom-plugin.json", "plugin.json", "index.json"];

/// A candidate or plugin that did not make it into the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedCandidate {
    /// Path of the candidate, or the plugin id.
    pub source: String,
    pub reason: String,
}

/// Summary of one discovery run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryReport {
    /// Ids of plugins registered during discovery.
    pub registered: Vec<String>,
    /// Plugins parsed successfully but refused by the registry.
    pub rejected: Vec<SkippedCandidate>,
    /// Candidates that could not be loaded at all.
    pub failed: Vec<SkippedCandidate>,
    /// Declared dependencies installed during discovery.
    pub installed: Vec<String>,
}

impl DiscoveryReport {
    fn record(&mut self, outcomes: Vec<(String, RegisterOutcome)>) {
        for (id, outcome) in outcomes {
            match outcome {
                RegisterOutcome::Registered | RegisterOutcome::Replaced => self.registered.push(id),
                RegisterOutcome::Rejected(reason) => self.rejected.push(SkippedCandidate {
                    source: id,
                    reason: reason.to_string(),
                }),
            }
        }
    }

    fn fail(&mut self, source: impl Into<String>, reason: impl ToString) {
        self.failed.push(SkippedCandidate {
            source: source.into(),
            reason: reason.to_string(),
        });
    }
}

/// Discovers and registers external plugins.
pub struct PluginLoader {
    paths: PluginPaths,
}

impl PluginLoader {
    pub fn new(paths: PluginPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &PluginPaths {
        &self.paths
    }

    /// Run discovery into `registry`, which should already be sealed.
    pub async fn discover(
        &self,
        registry: &mut PluginRegistry,
        installer: &PluginInstaller,
        declared: &BTreeMap<String, SourceSpec>,
    ) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        let mut seen = HashSet::new();

        if let Some(dir) = &self.paths.workspace_plugins_dir {
            load_directory(dir, PluginOrigin::Workspace, registry, &mut seen, &mut report).await;
        }
        load_directory(
            &self.paths.cache_dir,
            PluginOrigin::Installed,
            registry,
            &mut seen,
            &mut report,
        )
        .await;

        for (id, spec) in declared {
            let Some(record) = ensure_installed(installer, id, spec, &mut report).await else {
                continue;
            };
            load_candidate(&record.path, PluginOrigin::Installed, registry, &mut seen, &mut report)
                .await;
        }

        info!(
            "Plugin discovery finished: {} registered, {} rejected, {} failed",
            report.registered.len(),
            report.rejected.len(),
            report.failed.len()
        );
        report
    }
}

async fn ensure_installed(
    installer: &PluginInstaller,
    id: &str,
    spec: &SourceSpec,
    report: &mut DiscoveryReport,
) -> Option<InstalledPlugin> {
    match installer.get(id) {
        Ok(Some(record)) => {
            if is_dir(&record.path).await {
                return Some(record);
            }
        }
        Ok(None) => {}
        Err(e) => {
            warn!("Failed to read plugin lock for {}: {}", id, e);
            report.fail(id, e);
            return None;
        }
    }

    info!("Installing declared plugin {}", id);
    match installer.install(id, spec).await {
        Ok(record) => {
            report.installed.push(id.to_string());
            Some(record)
        }
        Err(e) => {
            warn!("Failed to install declared plugin {}: {}", id, e);
            report.fail(id, e);
            None
        }
    }
}

async fn load_directory(
    dir: &Path,
    origin: fn(PathBuf) -> PluginOrigin,
    registry: &mut PluginRegistry,
    seen: &mut HashSet<PathBuf>,
    report: &mut DiscoveryReport,
) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Skipping plugin directory {}: {}", dir.display(), e);
            return;
        }
    };

    let mut candidates = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden {
            candidates.push(entry.path());
        }
    }
    candidates.sort();

    for candidate in candidates {
        load_candidate(&candidate, origin, registry, seen, report).await;
    }
}

async fn load_candidate(
    candidate: &Path,
    origin: fn(PathBuf) -> PluginOrigin,
    registry: &mut PluginRegistry,
    seen: &mut HashSet<PathBuf>,
    report: &mut DiscoveryReport,
) {
    let key = tokio::fs::canonicalize(candidate)
        .await
        .unwrap_or_else(|_| candidate.to_path_buf());
    if !seen.insert(key) {
        debug!("Plugin candidate {} already loaded", candidate.display());
        return;
    }

    let entry = if is_dir(candidate).await {
        match resolve_entry_point(candidate).await {
            Some(entry) => entry,
            None => {
                warn!("No plugin entry point in {}", candidate.display());
                report.fail(candidate.display().to_string(), "no plugin entry point");
                return;
            }
        }
    } else if candidate.extension().is_some_and(|ext| ext == "json") {
        candidate.to_path_buf()
    } else {
        debug!("Ignoring non-JSON file {}", candidate.display());
        return;
    };

    match load_module_file(&entry).await {
        Ok(module) => {
            debug!("Loaded plugin module {} ({})", entry.display(), module.version());
            let outcomes = register_module(registry, module, origin(candidate.to_path_buf()));
            report.record(outcomes);
        }
        Err(e) => {
            warn!("Failed to load plugin from {}: {}", entry.display(), e);
            report.fail(entry.display().to_string(), e);
        }
    }
}

/// Register every plugin in `module`.
///
/// Package-level constraints are checked once; if they fail, every plugin
/// in the package is rejected. Each plugin then passes its own gate.
pub fn register_module(
    registry: &mut PluginRegistry,
    module: PluginModule,
    origin: PluginOrigin,
) -> Vec<(String, RegisterOutcome)> {
    match module {
        PluginModule::Single(plugin) => {
            let id = plugin.id().to_string();
            vec![(id, registry.register_checked(plugin, origin))]
        }
        PluginModule::Package(package) => {
            let gate = registry
                .check_host_version(package.metadata.min_host_version.as_deref())
                .and_then(|_| registry.check_required_plugins(&package.requires))
                .and_then(|_| registry.check_required_languages(&package.requires_languages));

            if let Err(err) = gate {
                warn!(
                    "Skipping package {} from {}: {}",
                    package.metadata.name, origin, err
                );
                return package
                    .plugins
                    .iter()
                    .map(|p| {
                        let reason = RejectReason::Incompatible(err.clone());
                        (p.id().to_string(), RegisterOutcome::Rejected(reason))
                    })
                    .collect();
            }

            package
                .plugins
                .into_iter()
                .map(|plugin| {
                    let id = plugin.id().to_string();
                    (id, registry.register_checked(plugin, origin.clone()))
                })
                .collect()
        }
    }
}

/// Locate the module file inside a plugin directory: `package.json`'s
/// `main` (when it names a JSON file), then the conventional entry names,
/// then a lone JSON file.
pub async fn resolve_entry_point(dir: &Path) -> Option<PathBuf> {
    if let Ok(content) = tokio::fs::read_to_string(dir.join("package.json")).await {
        let main = serde_json::from_str::<Value>(&content)
            .ok()
            .and_then(|v| v.get("main").and_then(Value::as_str).map(str::to_string));
        if let Some(main) = main {
            let path = dir.join(main.trim_start_matches("./"));
            if path.extension().is_some_and(|ext| ext == "json") && is_file(&path).await {
                return Some(path);
            }
            debug!("Ignoring non-JSON main entry {} in {}", main, dir.display());
        }
    }

    for name in ENTRY_FILES {
        let path = dir.join(name);
        if is_file(&path).await {
            return Some(path);
        }
    }

    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut json_files = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        if is_json && entry.file_name() != "package.json" && is_file(&path).await {
            json_files.push(path);
        }
    }
    if json_files.len() == 1 {
        json_files.pop()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::schema::PluginKind;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_json(path: &Path, value: Value) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
    }

    fn language(id: &str) -> Value {
        json!({
            "metadata": {"id": id, "name": id, "version": "1.0.0", "kind": "language"},
            "markers": [format!("{}.marker", id)],
            "commands": {"test": format!("{} test", id)}
        })
    }

    struct Fixture {
        temp: TempDir,
        paths: PluginPaths,
        installer: PluginInstaller,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let paths = PluginPaths::under_home(temp.path().join("home"))
            .with_workspace(temp.path().join("ws"));
        let installer = PluginInstaller::with_registry(
            paths.clone(),
            temp.path().join("ws"),
            "http://127.0.0.1:9",
        )
        .unwrap();
        Fixture {
            temp,
            paths,
            installer,
        }
    }

    fn workspace_dir(fx: &Fixture) -> PathBuf {
        fx.paths.workspace_plugins_dir.clone().unwrap()
    }

    #[tokio::test]
    async fn test_loads_workspace_plugins_and_skips_broken() {
        let fx = fixture();
        let dir = workspace_dir(&fx);
        write_json(&dir.join("elixir.json"), language("elixir"));
        std::fs::write(dir.join("broken.json"), "{ nope").unwrap();
        std::fs::write(dir.join("README.md"), "not a plugin").unwrap();
        write_json(&dir.join("shapeless.json"), json!({"foo": 1}));

        let mut registry = PluginRegistry::with_builtins();
        let report = PluginLoader::new(fx.paths.clone())
            .discover(&mut registry, &fx.installer, &BTreeMap::new())
            .await;

        assert_eq!(report.registered, vec!["elixir".to_string()]);
        assert_eq!(report.failed.len(), 2);
        assert!(matches!(
            registry.origin("elixir"),
            Some(PluginOrigin::Workspace(_))
        ));
    }

    #[tokio::test]
    async fn test_external_plugin_cannot_shadow_builtin() {
        let fx = fixture();
        write_json(&workspace_dir(&fx).join("python.json"), language("python"));

        let mut registry = PluginRegistry::with_builtins();
        let report = PluginLoader::new(fx.paths.clone())
            .discover(&mut registry, &fx.installer, &BTreeMap::new())
            .await;

        assert!(report.registered.is_empty());
        assert_eq!(report.rejected.len(), 1);
        assert!(registry.origin("python").unwrap().is_builtin());
    }

    #[tokio::test]
    async fn test_package_level_gate_rejects_all_members() {
        let fx = fixture();
        write_json(
            &workspace_dir(&fx).join("beam/loom-plugin.json"),
            json!({
                "metadata": {"name": "beam", "version": "1.0.0"},
                "plugins": [language("elixir"), language("erlang")],
                "requires": ["foo"]
            }),
        );

        let mut registry = PluginRegistry::with_builtins();
        let report = PluginLoader::new(fx.paths.clone())
            .discover(&mut registry, &fx.installer, &BTreeMap::new())
            .await;

        assert_eq!(report.rejected.len(), 2);
        assert!(report.rejected[0].reason.contains("foo"));
        assert!(!registry.contains("elixir"));
        assert!(!registry.contains("erlang"));
    }

    #[tokio::test]
    async fn test_package_members_gated_individually() {
        let fx = fixture();
        let mut needs_missing = language("erlang");
        needs_missing["metadata"]["requiresLanguages"] = json!(["beam-vm"]);
        write_json(
            &workspace_dir(&fx).join("beam/loom-plugin.json"),
            json!({
                "metadata": {"name": "beam", "version": "1.0.0"},
                "plugins": [language("elixir"), needs_missing]
            }),
        );

        let mut registry = PluginRegistry::with_builtins();
        PluginLoader::new(fx.paths.clone())
            .discover(&mut registry, &fx.installer, &BTreeMap::new())
            .await;

        assert!(registry.contains("elixir"));
        assert!(!registry.contains("erlang"));
    }

    #[tokio::test]
    async fn test_declared_local_dependency_is_installed_and_loaded() {
        let fx = fixture();
        let source = fx.temp.path().join("src/zig");
        write_json(&source.join("plugin.json"), language("zig"));

        let mut declared = BTreeMap::new();
        declared.insert("zig".to_string(), SourceSpec::from(&*source.to_string_lossy()));

        let mut registry = PluginRegistry::with_builtins();
        let loader = PluginLoader::new(fx.paths.clone());
        let report = loader.discover(&mut registry, &fx.installer, &declared).await;
        assert_eq!(report.installed, vec!["zig".to_string()]);
        assert_eq!(registry.get("zig").unwrap().kind(), PluginKind::Language);

        // Second run finds it in the cache and does not reinstall.
        let mut registry = PluginRegistry::with_builtins();
        let report = loader.discover(&mut registry, &fx.installer, &declared).await;
        assert!(report.installed.is_empty());
        assert_eq!(report.registered, vec!["zig".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_declared_install_is_isolated() {
        let fx = fixture();
        write_json(&workspace_dir(&fx).join("elixir.json"), language("elixir"));

        let mut declared = BTreeMap::new();
        declared.insert("ghost".to_string(), SourceSpec::from("file:./does-not-exist"));

        let mut registry = PluginRegistry::with_builtins();
        let report = PluginLoader::new(fx.paths.clone())
            .discover(&mut registry, &fx.installer, &declared)
            .await;

        assert!(registry.contains("elixir"));
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].source, "ghost");
    }

    #[tokio::test]
    async fn test_entry_point_resolution_order() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        assert_eq!(resolve_entry_point(dir).await, None);

        write_json(&dir.join("custom.json"), json!({}));
        assert_eq!(resolve_entry_point(dir).await, Some(dir.join("custom.json")));

        write_json(&dir.join("index.json"), json!({}));
        assert_eq!(resolve_entry_point(dir).await, Some(dir.join("index.json")));

        write_json(&dir.join("loom-plugin.json"), json!({}));
        assert_eq!(resolve_entry_point(dir).await, Some(dir.join("loom-plugin.json")));

        write_json(&dir.join("package.json"), json!({"main": "./dist/entry.json"}));
        write_json(&dir.join("dist/entry.json"), json!({}));
        assert_eq!(resolve_entry_point(dir).await, Some(dir.join("dist/entry.json")));

        write_json(&dir.join("package.json"), json!({"main": "index.js"}));
        assert_eq!(resolve_entry_point(dir).await, Some(dir.join("loom-plugin.json")));
    }
}
