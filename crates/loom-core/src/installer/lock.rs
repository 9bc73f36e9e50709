//! Lock file recording installed plugins.
//!
//! Stored as `{ "version": 1, "plugins": { "<id>": {...} } }` next to the
//! plugin cache. A document without a `version` field predates versioning
//! and is upgraded in memory; a newer version is refused.

use super::source::SourceKind;
use crate::config::InstallerConfig;
use crate::error::{LoomError, Result};
use crate::metadata::{atomic_read_json, atomic_write_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One installed plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPlugin {
    pub id: String,
    /// Version of the installed module.
    pub version: String,
    pub source: SourceKind,
    /// Package name, URL or absolute path the plugin was fetched from.
    pub location: String,
    /// Requested version constraint or git ref, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested: Option<String>,
    pub installed_at: DateTime<Utc>,
    /// Directory holding the plugin inside the cache.
    pub path: PathBuf,
    /// `sha256-<hex>` of the downloaded archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    /// Commit checked out for git installs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

/// In-memory lock document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockFile {
    pub version: u32,
    #[serde(default)]
    pub plugins: BTreeMap<String, InstalledPlugin>,
}

impl Default for LockFile {
    fn default() -> Self {
        Self {
            version: InstallerConfig::LOCK_VERSION,
            plugins: BTreeMap::new(),
        }
    }
}

impl LockFile {
    /// Load the lock file. A missing file is an empty lock.
    pub fn load(path: &Path) -> Result<Self> {
        let Some(value) = atomic_read_json::<Value>(path)? else {
            return Ok(Self::default());
        };
        Self::from_value(value, path)
    }

    fn from_value(mut value: Value, path: &Path) -> Result<Self> {
        let found = match value.get("version") {
            None => 0,
            Some(v) => v
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| LoomError::Json {
                    message: format!("Lock file {} has a non-numeric version", path.display()),
                    source: None,
                })?,
        };

        if found > InstallerConfig::LOCK_VERSION {
            return Err(LoomError::UnsupportedLockVersion {
                found,
                supported: InstallerConfig::LOCK_VERSION,
            });
        }

        let plugins = match value.get_mut("plugins").map(Value::take) {
            Some(Value::Null) | None => BTreeMap::new(),
            Some(plugins) => serde_json::from_value(plugins)?,
        };

        if found < InstallerConfig::LOCK_VERSION {
            info!(
                "Upgrading lock file {} from version {} to {}",
                path.display(),
                found,
                InstallerConfig::LOCK_VERSION
            );
        }

        Ok(Self {
            version: InstallerConfig::LOCK_VERSION,
            plugins,
        })
    }

    /// Persist atomically, keeping a backup of the previous document.
    pub fn save(&self, path: &Path) -> Result<()> {
        debug!("Writing lock file {} ({} plugins)", path.display(), self.plugins.len());
        atomic_write_json(path, self, true)
    }

    pub fn get(&self, id: &str) -> Option<&InstalledPlugin> {
        self.plugins.get(id)
    }

    pub fn insert(&mut self, record: InstalledPlugin) {
        self.plugins.insert(record.id.clone(), record);
    }

    pub fn remove(&mut self, id: &str) -> Option<InstalledPlugin> {
        self.plugins.remove(id)
    }
}
