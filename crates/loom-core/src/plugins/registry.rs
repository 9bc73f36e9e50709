//! In-memory plugin registry.
//!
//! Registration happens in two phases. During the trusted phase (built-ins)
//! a second registration under the same id replaces the first. Once
//! `finish_trusted_loading` has been called, any registration whose id is
//! already present is rejected, so an external plugin can never shadow a
//! built-in one.

use super::schema::{PluginKind, PluginMetadata, PluginRequirement};
use super::traits::{EditorPlugin, LanguagePlugin, PackageManagerPlugin, Plugin};
use super::version::{self, VersionCheck};
use crate::config::AppConfig;
use crate::error::CompatibilityError;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a registered plugin came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "path", rename_all = "kebab-case")]
pub enum PluginOrigin {
    Builtin,
    Workspace(PathBuf),
    Installed(PathBuf),
}

impl PluginOrigin {
    pub fn is_builtin(&self) -> bool {
        matches!(self, PluginOrigin::Builtin)
    }
}

impl fmt::Display for PluginOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginOrigin::Builtin => f.write_str("builtin"),
            PluginOrigin::Workspace(path) => write!(f, "workspace:{}", path.display()),
            PluginOrigin::Installed(path) => write!(f, "installed:{}", path.display()),
        }
    }
}

/// Why a registration was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    InvalidShape(String),
    Collision { id: String, existing: PluginOrigin },
    Incompatible(CompatibilityError),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InvalidShape(msg) => write!(f, "invalid shape: {}", msg),
            RejectReason::Collision { id, existing } => {
                write!(f, "id '{}' already registered ({})", id, existing)
            }
            RejectReason::Incompatible(err) => write!(f, "incompatible: {}", err),
        }
    }
}

/// Outcome of a registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    Replaced,
    Rejected(RejectReason),
}

impl RegisterOutcome {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, RegisterOutcome::Rejected(_))
    }
}

/// Listing row for a registered plugin.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub kind: PluginKind,
    pub origin: PluginOrigin,
}

struct Entry {
    plugin: Plugin,
    origin: PluginOrigin,
}

/// Registry of capabilities keyed by id, preserving registration order.
pub struct PluginRegistry {
    host_version: String,
    entries: HashMap<String, Entry>,
    order: Vec<String>,
    trusted_phase: bool,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    /// Create an empty registry in the trusted phase.
    pub fn new() -> Self {
        Self::with_host_version(AppConfig::HOST_VERSION)
    }

    /// Create an empty registry checking constraints against `host_version`.
    pub fn with_host_version(host_version: impl Into<String>) -> Self {
        Self {
            host_version: host_version.into(),
            entries: HashMap::new(),
            order: Vec::new(),
            trusted_phase: true,
        }
    }

    /// Create a registry holding every built-in plugin, already sealed.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::builtin::register_all(&mut registry);
        registry.finish_trusted_loading();
        registry
    }

    pub fn host_version(&self) -> &str {
        &self.host_version
    }

    /// End the trusted phase. Idempotent.
    pub fn finish_trusted_loading(&mut self) {
        if self.trusted_phase {
            debug!("Trusted plugin loading finished with {} plugins", self.len());
        }
        self.trusted_phase = false;
    }

    pub fn is_trusted_phase(&self) -> bool {
        self.trusted_phase
    }

    /// Structural check on a plugin before it may be registered.
    pub fn is_shape_valid(plugin: &Plugin) -> Result<(), String> {
        validate_metadata(plugin.metadata())?;
        if plugin.metadata().kind != plugin.kind() {
            return Err(format!(
                "declared kind '{}' does not match implementation kind '{}'",
                plugin.metadata().kind,
                plugin.kind()
            ));
        }
        Ok(())
    }

    /// Register `plugin`.
    ///
    /// Never fails hard: invalid shapes and post-trusted collisions come back
    /// as `Rejected` and are logged.
    pub fn register(&mut self, plugin: Plugin, origin: PluginOrigin) -> RegisterOutcome {
        if let Err(msg) = Self::is_shape_valid(&plugin) {
            warn!("Rejected plugin '{}': {}", plugin.id(), msg);
            return RegisterOutcome::Rejected(RejectReason::InvalidShape(msg));
        }

        let id = plugin.id().to_string();
        if let Some(existing) = self.entries.get_mut(&id) {
            if !self.trusted_phase {
                warn!(
                    "Ignoring plugin '{}' from {}: id already registered ({})",
                    id, origin, existing.origin
                );
                return RegisterOutcome::Rejected(RejectReason::Collision {
                    id,
                    existing: existing.origin.clone(),
                });
            }
            debug!("Replacing plugin '{}' during trusted loading", id);
            *existing = Entry { plugin, origin };
            return RegisterOutcome::Replaced;
        }

        debug!("Registered {} plugin '{}' ({})", plugin.kind(), id, origin);
        self.order.push(id.clone());
        self.entries.insert(id, Entry { plugin, origin });
        RegisterOutcome::Registered
    }

    /// Run the compatibility gate, then register.
    pub fn register_checked(&mut self, plugin: Plugin, origin: PluginOrigin) -> RegisterOutcome {
        if let Err(err) = self.check_compatibility(plugin.metadata()) {
            warn!("Skipping plugin '{}' from {}: {}", plugin.id(), origin, err);
            return RegisterOutcome::Rejected(RejectReason::Incompatible(err));
        }
        self.register(plugin, origin)
    }

    pub fn get(&self, id: &str) -> Option<&Plugin> {
        self.entries.get(id).map(|e| &e.plugin)
    }

    pub fn origin(&self, id: &str) -> Option<&PluginOrigin> {
        self.entries.get(id).map(|e| &e.origin)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Plugins of `kind`, in registration order.
    pub fn get_by_kind(&self, kind: PluginKind) -> Vec<&Plugin> {
        self.iter().filter(|p| p.kind() == kind).collect()
    }

    /// Language plugins in registration order.
    pub fn languages(&self) -> Vec<&Arc<dyn LanguagePlugin>> {
        self.iter().filter_map(Plugin::as_language).collect()
    }

    pub fn language(&self, id: &str) -> Option<&Arc<dyn LanguagePlugin>> {
        self.get(id).and_then(Plugin::as_language)
    }

    pub fn package_manager(&self, id: &str) -> Option<&Arc<dyn PackageManagerPlugin>> {
        self.get(id).and_then(Plugin::as_package_manager)
    }

    pub fn editor(&self, id: &str) -> Option<&Arc<dyn EditorPlugin>> {
        self.get(id).and_then(Plugin::as_editor)
    }

    /// All plugins in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Plugin> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).map(|e| &e.plugin))
    }

    pub fn list(&self) -> Vec<PluginSummary> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .map(|entry| {
                let meta = entry.plugin.metadata();
                PluginSummary {
                    id: meta.id.clone(),
                    name: meta.name.clone(),
                    version: meta.version.clone(),
                    kind: entry.plugin.kind(),
                    origin: entry.origin.clone(),
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // ========================================
    // Compatibility gate
    // ========================================

    /// Check a `minHostVersion` constraint against the running host.
    ///
    /// An unparsable host version satisfies every constraint.
    pub fn check_host_version(&self, min_host_version: Option<&str>) -> Result<(), CompatibilityError> {
        let Some(required) = min_host_version.filter(|v| !v.trim().is_empty()) else {
            return Ok(());
        };

        match version::check(required, &self.host_version) {
            VersionCheck::Satisfied => Ok(()),
            VersionCheck::Unknown => {
                debug!(
                    "Host version '{}' is not parsable; accepting constraint '{}'",
                    self.host_version, required
                );
                Ok(())
            }
            VersionCheck::Unsatisfied => Err(CompatibilityError::HostVersion {
                required: required.to_string(),
                host: self.host_version.clone(),
            }),
        }
    }

    /// Every required plugin must be registered (and match its version
    /// constraint, when given). All missing ids are reported together.
    pub fn check_required_plugins(
        &self,
        requirements: &[PluginRequirement],
    ) -> Result<(), CompatibilityError> {
        let missing: BTreeSet<String> = requirements
            .iter()
            .filter(|req| !self.contains(&req.id))
            .map(|req| req.id.clone())
            .collect();
        if !missing.is_empty() {
            return Err(CompatibilityError::MissingPlugins { ids: missing });
        }

        for req in requirements {
            let (Some(required), Some(plugin)) = (req.version.as_deref(), self.get(&req.id)) else {
                continue;
            };
            let found = &plugin.metadata().version;
            match version::check(required, found) {
                VersionCheck::Satisfied => {}
                VersionCheck::Unknown => debug!(
                    "Version '{}' of {} is not parsable; accepting constraint '{}'",
                    found, req.id, required
                ),
                VersionCheck::Unsatisfied => {
                    return Err(CompatibilityError::PluginVersion {
                        id: req.id.clone(),
                        required: required.to_string(),
                        found: found.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Every id must be registered as a language plugin.
    pub fn check_required_languages(&self, ids: &[String]) -> Result<(), CompatibilityError> {
        let missing: BTreeSet<String> = ids
            .iter()
            .filter(|id| self.language(id).is_none())
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CompatibilityError::MissingLanguages { ids: missing })
        }
    }

    /// Host version, required plugins and required languages, in that order.
    pub fn check_compatibility(&self, metadata: &PluginMetadata) -> Result<(), CompatibilityError> {
        self.check_host_version(metadata.min_host_version.as_deref())?;
        self.check_required_plugins(&metadata.requires)?;
        self.check_required_languages(&metadata.requires_languages)
    }
}

/// Metadata-level shape rules shared by the registry and the manifest parser.
pub fn validate_metadata(metadata: &PluginMetadata) -> Result<(), String> {
    if metadata.id.trim().is_empty() {
        return Err("empty id".to_string());
    }
    if metadata.id.chars().any(char::is_whitespace) {
        return Err(format!("id '{}' contains whitespace", metadata.id));
    }
    if metadata.name.trim().is_empty() {
        return Err(format!("plugin '{}' has empty name", metadata.id));
    }
    Ok(())
}
