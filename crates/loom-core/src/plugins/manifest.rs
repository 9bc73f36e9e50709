//! JSON plugin modules.
//!
//! An external plugin module is a JSON document whose top level is either a
//! single plugin (`{ "metadata": {...}, ...kind fields }`) or a package
//! (`{ "metadata": {name, version}, "plugins": [...] }`). Parsing turns it
//! into a typed `PluginModule` or an `InvalidManifest` error; nothing is
//! registered here.

use super::registry::validate_metadata;
use super::schema::{CommandRunner, CommandSet, PluginKind, PluginMetadata, PluginRequirement, Toolchain};
use super::traits::{
    has_any_marker, EditorPlugin, GenericPlugin, HostingProviderPlugin, LanguagePlugin,
    PackageManagerPlugin, Plugin,
};
use crate::error::{LoomError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Package-level metadata.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub min_host_version: Option<String>,
}

fn default_version() -> String {
    "0.0.0".to_string()
}

/// A bundle of plugins sharing package-level constraints.
#[derive(Debug, Clone)]
pub struct PluginPackage {
    pub metadata: PackageMetadata,
    pub plugins: Vec<Plugin>,
    pub requires: Vec<PluginRequirement>,
    pub requires_languages: Vec<String>,
}

/// A parsed plugin module.
#[derive(Debug, Clone)]
pub enum PluginModule {
    Single(Plugin),
    Package(PluginPackage),
}

impl PluginModule {
    /// Version reported by the module (package version or plugin version).
    pub fn version(&self) -> &str {
        match self {
            PluginModule::Single(plugin) => &plugin.metadata().version,
            PluginModule::Package(package) => &package.metadata.version,
        }
    }

    pub fn plugin_ids(&self) -> Vec<String> {
        match self {
            PluginModule::Single(plugin) => vec![plugin.id().to_string()],
            PluginModule::Package(package) => {
                package.plugins.iter().map(|p| p.id().to_string()).collect()
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageManifest {
    metadata: PackageMetadata,
    #[serde(alias = "capabilities")]
    plugins: Vec<Value>,
    #[serde(default)]
    requires: Vec<PluginRequirement>,
    #[serde(default)]
    requires_languages: Vec<String>,
}

/// Parse a module document. `source` is only used for error context.
pub fn parse_module(value: Value, source: Option<&Path>) -> Result<PluginModule> {
    let invalid = |message: String| LoomError::InvalidManifest {
        path: source.map(Path::to_path_buf),
        message,
    };

    let Some(object) = value.as_object() else {
        return Err(invalid("unrecognized shape: top level is not an object".into()));
    };

    let is_package = object
        .get("plugins")
        .or_else(|| object.get("capabilities"))
        .is_some_and(Value::is_array);
    if is_package {
        let manifest: PackageManifest =
            serde_json::from_value(value).map_err(|e| invalid(format!("invalid package: {}", e)))?;
        if manifest.metadata.name.trim().is_empty() {
            return Err(invalid("package has empty name".into()));
        }
        let plugins = manifest
            .plugins
            .into_iter()
            .enumerate()
            .map(|(idx, item)| {
                parse_plugin(item).map_err(|msg| invalid(format!("plugins[{}]: {}", idx, msg)))
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(PluginModule::Package(PluginPackage {
            metadata: manifest.metadata,
            plugins,
            requires: manifest.requires,
            requires_languages: manifest.requires_languages,
        }));
    }

    if object.get("metadata").is_some_and(Value::is_object) {
        return parse_plugin(value).map(PluginModule::Single).map_err(invalid);
    }

    Err(invalid("unrecognized shape: expected `metadata` or `plugins`".into()))
}

/// Read and parse a module file.
pub async fn load_module_file(path: &Path) -> Result<PluginModule> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| LoomError::io_with_path(e, path))?;
    let value: Value = serde_json::from_str(&content).map_err(|e| LoomError::InvalidManifest {
        path: Some(path.to_path_buf()),
        message: format!("not valid JSON: {}", e),
    })?;
    parse_module(value, Some(path))
}

/// Parse a single plugin object, dispatching on `metadata.kind`.
pub fn parse_plugin(value: Value) -> std::result::Result<Plugin, String> {
    let kind_raw = value
        .get("metadata")
        .and_then(|m| m.get("kind"))
        .and_then(Value::as_str)
        .ok_or_else(|| "metadata.kind is missing".to_string())?;
    let kind: PluginKind = kind_raw.parse()?;

    let plugin = match kind {
        PluginKind::Language => Plugin::Language(Arc::new(decode::<LanguageManifest>(value)?)),
        PluginKind::PackageManager => {
            Plugin::PackageManager(Arc::new(decode::<PackageManagerManifest>(value)?))
        }
        PluginKind::HostingProvider => {
            Plugin::HostingProvider(Arc::new(decode::<ProviderManifest>(value)?))
        }
        PluginKind::Editor => Plugin::Editor(Arc::new(decode::<EditorManifest>(value)?)),
        PluginKind::Other => Plugin::Other(Arc::new(decode::<GenericManifest>(value)?)),
    };

    validate_metadata(plugin.metadata())?;
    Ok(plugin)
}

fn decode<T: DeserializeOwned>(value: Value) -> std::result::Result<T, String> {
    serde_json::from_value(value).map_err(|e| e.to_string())
}

/// Runner as `"poetry run"` or `{ "program": "poetry", "args": ["run"] }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RunnerSpec {
    Line(String),
    Parts {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl RunnerSpec {
    fn to_runner(&self) -> Option<CommandRunner> {
        match self {
            RunnerSpec::Line(line) => {
                let mut parts = line.split_whitespace();
                let program = parts.next()?;
                Some(CommandRunner::via(program, parts))
            }
            RunnerSpec::Parts { program, args } if !program.trim().is_empty() => {
                Some(CommandRunner::via(program.clone(), args.clone()))
            }
            RunnerSpec::Parts { .. } => None,
        }
    }
}

// ========================================
// Manifest-backed plugins
// ========================================

/// Declarative language plugin.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageManifest {
    metadata: PluginMetadata,
    #[serde(default)]
    markers: Vec<String>,
    #[serde(default)]
    commands: CommandSet,
    #[serde(default)]
    runner: Option<RunnerSpec>,
    #[serde(default)]
    toolchain: Toolchain,
}

#[async_trait]
impl LanguagePlugin for LanguageManifest {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn toolchain(&self) -> Toolchain {
        self.toolchain.clone()
    }

    fn project_markers(&self) -> Vec<String> {
        self.markers.clone()
    }

    async fn detect(&self, path: &Path) -> bool {
        has_any_marker(path, &self.markers).await
    }

    async fn discover_commands(&self, _path: &Path) -> CommandSet {
        self.commands.clone()
    }

    async fn command_runner(&self, _path: &Path) -> Option<CommandRunner> {
        self.runner.as_ref().and_then(RunnerSpec::to_runner)
    }
}

/// Declarative package manager plugin.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManagerManifest {
    metadata: PluginMetadata,
    executable: String,
    #[serde(default = "default_run_args")]
    run_args: Vec<String>,
    #[serde(default)]
    lockfiles: Vec<String>,
    #[serde(default)]
    install_command: Option<String>,
}

fn default_run_args() -> Vec<String> {
    vec!["run".to_string()]
}

#[async_trait]
impl PackageManagerPlugin for PackageManagerManifest {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn executable(&self) -> &str {
        &self.executable
    }

    fn run_prefix(&self) -> CommandRunner {
        CommandRunner::via(self.executable.clone(), self.run_args.clone())
    }

    fn lockfiles(&self) -> Vec<String> {
        self.lockfiles.clone()
    }

    fn install_command(&self) -> String {
        self.install_command
            .clone()
            .unwrap_or_else(|| format!("{} install", self.executable))
    }
}

/// Declarative hosting provider plugin.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderManifest {
    metadata: PluginMetadata,
    hosts: Vec<String>,
    /// `{owner}` and `{repo}` are substituted.
    clone_url: String,
}

impl HostingProviderPlugin for ProviderManifest {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn hosts(&self) -> Vec<String> {
        self.hosts.clone()
    }

    fn clone_url(&self, owner: &str, repo: &str) -> String {
        self.clone_url.replace("{owner}", owner).replace("{repo}", repo)
    }
}

/// Declarative editor plugin.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorManifest {
    metadata: PluginMetadata,
    executable: String,
    #[serde(default)]
    args: Vec<String>,
}

impl EditorPlugin for EditorManifest {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn open_command(&self, path: &Path) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 2);
        argv.push(self.executable.clone());
        argv.extend(self.args.iter().cloned());
        argv.push(path.display().to_string());
        argv
    }
}

/// Plugin of kind `other`.
#[derive(Debug, Deserialize)]
pub struct GenericManifest {
    metadata: PluginMetadata,
}

impl GenericPlugin for GenericManifest {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }
}
