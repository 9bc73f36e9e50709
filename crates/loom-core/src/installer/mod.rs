//! External plugin installation.
//!
//! Installs fetch into a staging directory inside the cache, verify that the
//! result holds a loadable plugin module, then move it to
//! `<cache>/<id>@<version>` and record it in the lock file. Nothing in the
//! cache or lock changes unless every step succeeds.

mod fetch;
mod lock;
mod source;

pub use fetch::{copy_dir_recursive, pick_registry_version};
pub use lock::{InstalledPlugin, LockFile};
pub use source::{ResolvedSource, SourceKind, SourceSpec};

use crate::config::{registry_url, PathsConfig, PluginPaths};
use crate::error::{LoomError, Result};
use crate::plugins::{is_dir, load_module_file, resolve_entry_point, PluginModule};
use chrono::Utc;
use fetch::Fetcher;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Installs, removes and lists external plugins.
pub struct PluginInstaller {
    paths: PluginPaths,
    /// Directory relative local sources are resolved against.
    base_dir: PathBuf,
    fetcher: Fetcher,
    /// Serializes lock-file read-modify-write cycles within this process.
    guard: Mutex<()>,
}

impl PluginInstaller {
    /// Create an installer using the registry from the environment.
    pub fn new(paths: PluginPaths, base_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_registry(paths, base_dir, registry_url())
    }

    pub fn with_registry(
        paths: PluginPaths,
        base_dir: impl Into<PathBuf>,
        registry_url: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            paths,
            base_dir: base_dir.into(),
            fetcher: Fetcher::new(registry_url)?,
            guard: Mutex::new(()),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.paths.cache_dir
    }

    pub fn lock_path(&self) -> &Path {
        &self.paths.lock_file
    }

    /// Lock record for `id`, if installed.
    pub fn get(&self, id: &str) -> Result<Option<InstalledPlugin>> {
        Ok(LockFile::load(&self.paths.lock_file)?.get(id).cloned())
    }

    /// Installed plugins, ordered by id.
    pub fn list(&self) -> Result<Vec<InstalledPlugin>> {
        Ok(LockFile::load(&self.paths.lock_file)?
            .plugins
            .into_values()
            .collect())
    }

    /// Whether `id` is recorded in the lock and still present in the cache.
    pub fn is_installed(&self, id: &str) -> Result<bool> {
        Ok(self.get(id)?.is_some_and(|record| record.path.is_dir()))
    }

    /// Install `id` from `spec`.
    ///
    /// Reinstalling from the same source is a no-op returning the existing
    /// record. A different source or version replaces the installed copy.
    pub async fn install(&self, id: &str, spec: &SourceSpec) -> Result<InstalledPlugin> {
        validate_id(id)?;
        let source = spec.resolve(id, &self.base_dir)?;
        let _guard = self.guard.lock().await;

        let mut lock = LockFile::load(&self.paths.lock_file)?;
        if let Some(existing) = lock.get(id) {
            if is_same_install(existing, &source) && is_dir(&existing.path).await {
                debug!("Plugin {} already installed at {}", id, existing.path.display());
                return Ok(existing.clone());
            }
        }

        let cache_dir = &self.paths.cache_dir;
        tokio::fs::create_dir_all(cache_dir)
            .await
            .map_err(|e| LoomError::io_with_path(e, cache_dir))?;

        // Dropping the staging dir removes everything left in it.
        let staging = tempfile::Builder::new()
            .prefix(PathsConfig::STAGING_PREFIX)
            .tempdir_in(cache_dir)
            .map_err(|e| LoomError::io_with_path(e, cache_dir))?;
        let content = staging.path().join("content");
        let scratch = staging.path().join("scratch");
        tokio::fs::create_dir_all(&scratch)
            .await
            .map_err(|e| LoomError::io_with_path(e, &scratch))?;

        let fetched = self.fetcher.fetch(id, &source, &content, &scratch).await?;
        let module = verify(id, &content).await?;
        let version = fetched
            .version
            .clone()
            .unwrap_or_else(|| module.version().to_string());

        let final_dir = cache_dir.join(format!("{}@{}", dir_stem(id), sanitize(&version)));
        // A copy already at `final_dir` waits in staging until the lock is saved.
        let previous = staging.path().join("previous");
        let displaced = tokio::fs::try_exists(&final_dir).await.unwrap_or(false);
        if displaced {
            tokio::fs::rename(&final_dir, &previous)
                .await
                .map_err(|e| LoomError::io_with_path(e, &final_dir))?;
        }

        let record = InstalledPlugin {
            id: id.to_string(),
            version,
            source: source.kind,
            location: source.location.clone(),
            requested: source.reference.clone(),
            installed_at: Utc::now(),
            path: final_dir.clone(),
            integrity: fetched.integrity,
            revision: fetched.revision,
        };
        let committed = async {
            tokio::fs::rename(&content, &final_dir)
                .await
                .map_err(|e| LoomError::io_with_path(e, &final_dir))?;
            lock.insert(record.clone());
            lock.save(&self.paths.lock_file)
        }
        .await;
        if let Err(e) = committed {
            if displaced {
                restore(&previous, &final_dir).await;
            }
            return Err(e);
        }

        self.remove_artifacts(id, Some(&final_dir)).await;
        info!(
            "Installed plugin {}@{} ({}) from {}",
            id,
            record.version,
            module.plugin_ids().join(", "),
            source
        );
        Ok(record)
    }

    /// Remove `id` from the cache and the lock.
    pub async fn remove(&self, id: &str) -> Result<InstalledPlugin> {
        let _guard = self.guard.lock().await;

        let mut lock = LockFile::load(&self.paths.lock_file)?;
        let record = lock.remove(id).ok_or_else(|| LoomError::PluginNotInstalled {
            id: id.to_string(),
        })?;

        self.remove_artifacts(id, None).await;
        lock.save(&self.paths.lock_file)?;
        info!("Removed plugin {}@{}", id, record.version);
        Ok(record)
    }

    /// Delete cache entries belonging to `id` (`<id>` or `<id>@*`), except
    /// `keep`. Failures are logged; a stale directory is harmless.
    async fn remove_artifacts(&self, id: &str, keep: Option<&Path>) {
        let stem = dir_stem(id);
        let versioned = format!("{}@", stem);

        let Ok(mut entries) = tokio::fs::read_dir(&self.paths.cache_dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name != stem && !name.starts_with(&versioned) {
                continue;
            }
            let path = entry.path();
            if keep == Some(path.as_path()) {
                continue;
            }

            let removed = if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match removed {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

/// Put a displaced cache directory back after a failed commit.
async fn restore(previous: &Path, final_dir: &Path) {
    if tokio::fs::try_exists(final_dir).await.unwrap_or(false) {
        if let Err(e) = tokio::fs::remove_dir_all(final_dir).await {
            warn!("Failed to clear {}: {}", final_dir.display(), e);
        }
    }
    match tokio::fs::rename(previous, final_dir).await {
        Ok(()) => debug!("Restored {}", final_dir.display()),
        Err(e) => warn!("Failed to restore {}: {}", final_dir.display(), e),
    }
}

fn validate_id(id: &str) -> Result<()> {
    let bad_chars = id.contains('\\') || id.chars().any(char::is_whitespace);
    let bad_segment = id
        .split('/')
        .any(|part| part.is_empty() || part == "." || part == "..");
    if bad_chars || bad_segment || id.rfind('@').is_some_and(|idx| idx > 0) {
        return Err(LoomError::Validation {
            field: "id".to_string(),
            message: format!("invalid plugin id '{}'", id),
        });
    }
    Ok(())
}

fn is_same_install(existing: &InstalledPlugin, source: &ResolvedSource) -> bool {
    existing.source == source.kind
        && existing.location == source.location
        && existing.requested == source.reference
}

/// Directory name prefix for `id`; scoped names keep their scope.
fn dir_stem(id: &str) -> String {
    id.replace('/', "+")
}

fn sanitize(version: &str) -> String {
    version
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

async fn verify(id: &str, content: &Path) -> Result<PluginModule> {
    let failed = |message: String| LoomError::InstallationFailed {
        id: id.to_string(),
        message,
    };

    let entry = resolve_entry_point(content)
        .await
        .ok_or_else(|| failed("fetched source contains no plugin module".to_string()))?;
    load_module_file(&entry)
        .await
        .map_err(|e| failed(format!("fetched module is not loadable: {}", e)))
}
