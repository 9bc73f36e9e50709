//! Error types for loom.
//!
//! Installer and configuration failures propagate to callers as `LoomError`.
//! Discovery never returns these for a single broken candidate; it logs them
//! and moves on.

use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the loom library.
#[derive(Debug, Error)]
pub enum LoomError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Plugin module errors
    #[error("Invalid plugin module {path:?}: {message}")]
    InvalidManifest {
        path: Option<PathBuf>,
        message: String,
    },

    #[error(transparent)]
    Incompatible(#[from] CompatibilityError),

    // Installer errors
    #[error("Plugin not installed: {id}")]
    PluginNotInstalled { id: String },

    #[error("Installation of {id} failed: {message}")]
    InstallationFailed { id: String, message: String },

    #[error("Unsupported lock file version {found} (supported: {supported})")]
    UnsupportedLockVersion { found: u32, supported: u32 },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    Other(String),
}

/// A capability failed the compatibility gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompatibilityError {
    #[error("requires host version {required}, running {host}")]
    HostVersion { required: String, host: String },

    #[error("missing required plugins: {}", join(ids))]
    MissingPlugins { ids: BTreeSet<String> },

    #[error("missing required languages: {}", join(ids))]
    MissingLanguages { ids: BTreeSet<String> },

    #[error("requires {id} {required}, found {found}")]
    PluginVersion {
        id: String,
        required: String,
        found: String,
    },
}

fn join(ids: &BTreeSet<String>) -> String {
    ids.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// Result type alias for loom operations.
pub type Result<T> = std::result::Result<T, LoomError>;

impl From<std::io::Error> for LoomError {
    fn from(err: std::io::Error) -> Self {
        LoomError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for LoomError {
    fn from(err: serde_json::Error) -> Self {
        LoomError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for LoomError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LoomError::Timeout(crate::config::InstallerConfig::HTTP_TIMEOUT)
        } else {
            LoomError::Network {
                message: err.to_string(),
                cause: err.url().map(|u| u.to_string()),
            }
        }
    }
}

impl LoomError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        LoomError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LoomError::Network { .. } | LoomError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LoomError::PluginNotInstalled {
            id: "loom-plugin-elixir".into(),
        };
        assert_eq!(err.to_string(), "Plugin not installed: loom-plugin-elixir");
    }

    #[test]
    fn test_missing_plugins_lists_every_id() {
        let err = CompatibilityError::MissingPlugins {
            ids: ["foo".to_string(), "bar".to_string()].into_iter().collect(),
        };
        assert_eq!(err.to_string(), "missing required plugins: bar, foo");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(LoomError::Timeout(std::time::Duration::from_secs(5)).is_retryable());
        assert!(!LoomError::PluginNotInstalled { id: "x".into() }.is_retryable());
    }
}
