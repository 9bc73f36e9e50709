//! Behavior surfaces for each plugin kind.
//!
//! A capability is one of a closed set of kinds; `Plugin` is the sum type the
//! registry stores. The kind of a stored plugin is the variant it lives in, so
//! it can never change after registration.

use super::schema::{CommandRunner, CommandSet, PluginKind, PluginMetadata, Toolchain};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// A language/toolchain capability.
#[async_trait]
pub trait LanguagePlugin: Send + Sync {
    fn metadata(&self) -> &PluginMetadata;

    /// Toolchain profile for this language.
    fn toolchain(&self) -> Toolchain;

    /// Files whose presence marks a project of this language.
    fn project_markers(&self) -> Vec<String>;

    /// Whether `path` holds a project of this language.
    async fn detect(&self, path: &Path) -> bool;

    /// Commands this language would run for the project at `path`.
    async fn discover_commands(&self, path: &Path) -> CommandSet;

    /// Runner the commands should be wrapped in, if any.
    async fn command_runner(&self, _path: &Path) -> Option<CommandRunner> {
        None
    }
}

/// A package manager capability.
#[async_trait]
pub trait PackageManagerPlugin: Send + Sync {
    fn metadata(&self) -> &PluginMetadata;

    fn executable(&self) -> &str;

    /// Prefix used to run a project script, e.g. `npm run`.
    fn run_prefix(&self) -> CommandRunner {
        CommandRunner::via(self.executable(), ["run"])
    }

    fn lockfiles(&self) -> Vec<String>;

    fn install_command(&self) -> String;

    async fn detect(&self, path: &Path) -> bool {
        has_any_marker(path, &self.lockfiles()).await
    }
}

/// A source hosting provider (GitHub, GitLab, ...).
pub trait HostingProviderPlugin: Send + Sync {
    fn metadata(&self) -> &PluginMetadata;

    /// Host names served by this provider.
    fn hosts(&self) -> Vec<String>;

    fn clone_url(&self, owner: &str, repo: &str) -> String;

    fn matches_url(&self, remote: &str) -> bool {
        let host = remote_host(remote);
        self.hosts()
            .iter()
            .any(|h| host.as_deref().is_some_and(|found| found.eq_ignore_ascii_case(h)))
    }
}

/// An editor integration.
pub trait EditorPlugin: Send + Sync {
    fn metadata(&self) -> &PluginMetadata;

    /// Argument vector that opens `path` in the editor.
    fn open_command(&self, path: &Path) -> Vec<String>;
}

/// A capability of kind `other`; only its metadata is interpreted.
pub trait GenericPlugin: Send + Sync {
    fn metadata(&self) -> &PluginMetadata;
}

/// A registered capability.
#[derive(Clone)]
pub enum Plugin {
    Language(Arc<dyn LanguagePlugin>),
    HostingProvider(Arc<dyn HostingProviderPlugin>),
    PackageManager(Arc<dyn PackageManagerPlugin>),
    Editor(Arc<dyn EditorPlugin>),
    Other(Arc<dyn GenericPlugin>),
}

impl Plugin {
    pub fn metadata(&self) -> &PluginMetadata {
        match self {
            Plugin::Language(p) => p.metadata(),
            Plugin::HostingProvider(p) => p.metadata(),
            Plugin::PackageManager(p) => p.metadata(),
            Plugin::Editor(p) => p.metadata(),
            Plugin::Other(p) => p.metadata(),
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata().id
    }

    /// Kind implied by the variant.
    pub fn kind(&self) -> PluginKind {
        match self {
            Plugin::Language(_) => PluginKind::Language,
            Plugin::HostingProvider(_) => PluginKind::HostingProvider,
            Plugin::PackageManager(_) => PluginKind::PackageManager,
            Plugin::Editor(_) => PluginKind::Editor,
            Plugin::Other(_) => PluginKind::Other,
        }
    }

    pub fn as_language(&self) -> Option<&Arc<dyn LanguagePlugin>> {
        match self {
            Plugin::Language(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_package_manager(&self) -> Option<&Arc<dyn PackageManagerPlugin>> {
        match self {
            Plugin::PackageManager(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_hosting_provider(&self) -> Option<&Arc<dyn HostingProviderPlugin>> {
        match self {
            Plugin::HostingProvider(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_editor(&self) -> Option<&Arc<dyn EditorPlugin>> {
        match self {
            Plugin::Editor(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meta = self.metadata();
        f.debug_struct("Plugin")
            .field("id", &meta.id)
            .field("kind", &self.kind())
            .field("version", &meta.version)
            .finish()
    }
}

/// Whether `dir` contains `marker`.
///
/// A marker of the form `*.ext` matches any file with that extension directly
/// inside `dir`.
pub async fn has_marker(dir: &Path, marker: &str) -> bool {
    if let Some(ext) = marker.strip_prefix("*.") {
        let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
            return false;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry
                .path()
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case(ext))
            {
                return true;
            }
        }
        return false;
    }

    tokio::fs::try_exists(dir.join(marker)).await.unwrap_or(false)
}

/// Whether `dir` contains any of `markers`.
pub async fn has_any_marker(dir: &Path, markers: &[String]) -> bool {
    for marker in markers {
        if has_marker(dir, marker).await {
            return true;
        }
    }
    false
}

pub(crate) async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_dir())
}

pub(crate) async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file())
}

/// Host part of a git remote, handling scp-style `git@host:owner/repo`.
pub fn remote_host(remote: &str) -> Option<String> {
    if let Ok(parsed) = url::Url::parse(remote) {
        if let Some(host) = parsed.host_str() {
            return Some(host.to_string());
        }
    }
    let rest = remote.split_once('@').map(|(_, rest)| rest)?;
    rest.split_once(':').map(|(host, _)| host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_path_kind_checks() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("plugin.json");
        std::fs::write(&file, "{}").unwrap();

        assert!(is_dir(temp.path()).await);
        assert!(!is_file(temp.path()).await);
        assert!(is_file(&file).await);
        assert!(!is_dir(&file).await);
        assert!(!is_file(&temp.path().join("missing.json")).await);
    }

    #[test]
    fn test_remote_host() {
        assert_eq!(
            remote_host("https://github.com/loom-dev/loom.git").as_deref(),
            Some("github.com")
        );
        assert_eq!(
            remote_host("git@gitlab.com:group/project.git").as_deref(),
            Some("gitlab.com")
        );
        assert_eq!(remote_host("not a remote"), None);
    }

    #[tokio::test]
    async fn test_has_marker_exact_and_extension() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("go.mod"), "module x").unwrap();
        std::fs::write(temp.path().join("App.csproj"), "<Project/>").unwrap();

        assert!(has_marker(temp.path(), "go.mod").await);
        assert!(has_marker(temp.path(), "*.csproj").await);
        assert!(!has_marker(temp.path(), "Cargo.toml").await);
        assert!(!has_any_marker(temp.path(), &["setup.py".to_string()]).await);
    }
}
