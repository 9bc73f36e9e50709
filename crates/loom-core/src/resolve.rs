//! Command and runner resolution.
//!
//! For a repository and a command kind, the first match wins:
//!
//! 1. the repository's own `.loom.repo.json` override,
//! 2. the workspace config entry for the repository,
//! 3. nothing for `start` (never auto-discovered),
//! 4. the declared language plugins in order, or every registered language
//!    plugin that recognizes the repository,
//! 5. absent.
//!
//! An absent command means "skip this repository", not an error.

use crate::plugins::{CommandKind, CommandRunner, LanguagePlugin, PluginRegistry};
use crate::workspace::{RepoConfig, RepoOverrides};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which step of the chain produced a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "kebab-case")]
pub enum CommandSource {
    RepoOverride,
    WorkspaceOverride,
    Language(String),
}

impl CommandSource {
    pub fn is_override(&self) -> bool {
        !matches!(self, CommandSource::Language(_))
    }
}

/// A resolved command together with the runner for its repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub kind: CommandKind,
    pub command: Option<String>,
    pub source: Option<CommandSource>,
    pub runner: CommandRunner,
}

impl Resolution {
    /// Line to execute. Overrides run verbatim; discovered commands go
    /// through the runner.
    pub fn command_line(&self) -> Option<String> {
        let command = self.command.as_deref()?;
        match &self.source {
            Some(source) if source.is_override() => Some(command.to_string()),
            _ => Some(self.runner.command_line(command)),
        }
    }
}

/// Resolves commands against a registry snapshot.
pub struct CommandResolver<'a> {
    registry: &'a PluginRegistry,
    default_package_manager: Option<&'a str>,
}

impl<'a> CommandResolver<'a> {
    pub fn new(registry: &'a PluginRegistry) -> Self {
        Self {
            registry,
            default_package_manager: None,
        }
    }

    /// Workspace-wide package manager used when nothing more specific
    /// supplies a runner and the manager recognizes the repository.
    pub fn with_default_package_manager(mut self, id: Option<&'a str>) -> Self {
        self.default_package_manager = id;
        self
    }

    /// Command and runner for `kind` in one call.
    ///
    /// A command discovered by a language plugin runs through that plugin's
    /// runner (or directly), never through another language's.
    pub async fn resolve(&self, repo: &RepoConfig, repo_dir: &Path, kind: CommandKind) -> Resolution {
        let (command, source) = match self.resolve_command(repo, repo_dir, kind).await {
            Some((command, source)) => (Some(command), Some(source)),
            None => (None, None),
        };
        let runner = match &source {
            Some(CommandSource::Language(id)) => self.language_runner(repo, repo_dir, id).await,
            _ => self.command_runner(repo, repo_dir).await,
        };
        Resolution {
            kind,
            command,
            source,
            runner,
        }
    }

    /// Walk the precedence chain for `kind`.
    pub async fn resolve_command(
        &self,
        repo: &RepoConfig,
        repo_dir: &Path,
        kind: CommandKind,
    ) -> Option<(String, CommandSource)> {
        match RepoOverrides::load(repo_dir).await {
            Ok(Some(overrides)) => {
                if let Some(command) = overrides.commands.get(kind) {
                    return Some((command.to_string(), CommandSource::RepoOverride));
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Ignoring override file in {}: {}", repo_dir.display(), e),
        }

        if let Some(command) = repo.commands.get(kind) {
            return Some((command.to_string(), CommandSource::WorkspaceOverride));
        }

        if kind == CommandKind::Start {
            debug!("No explicit start command for {}", repo_dir.display());
            return None;
        }

        if !repo.languages.is_empty() {
            for language in self.declared_languages(repo) {
                let commands = language.discover_commands(repo_dir).await;
                if let Some(command) = commands.get(kind) {
                    return Some((command.to_string(), language_source(language)));
                }
            }
            return None;
        }

        for language in self.registry.languages() {
            if !language.detect(repo_dir).await {
                continue;
            }
            let commands = language.discover_commands(repo_dir).await;
            if let Some(command) = commands.get(kind) {
                return Some((command.to_string(), language_source(language)));
            }
        }

        debug!("No {} command for {}", kind, repo_dir.display());
        None
    }

    /// Runner for commands in this repository.
    ///
    /// An explicit package manager wins. Otherwise the first language plugin
    /// (declared, or recognizing the repository) that supplies a runner,
    /// then the workspace default package manager if it recognizes the
    /// repository, then direct execution.
    pub async fn command_runner(&self, repo: &RepoConfig, repo_dir: &Path) -> CommandRunner {
        if let Some(runner) = self.explicit_runner(repo) {
            return runner;
        }

        for language in self.languages_for(repo, repo_dir).await {
            if let Some(runner) = language.command_runner(repo_dir).await {
                return runner;
            }
        }

        if let Some(manager) = self
            .default_package_manager
            .and_then(|id| self.registry.package_manager(id))
        {
            if manager.detect(repo_dir).await {
                return manager.run_prefix();
            }
        }

        CommandRunner::Direct
    }

    /// Runner for a command discovered by language plugin `id`: an explicit
    /// package manager, else that plugin's own runner, else direct.
    async fn language_runner(&self, repo: &RepoConfig, repo_dir: &Path, id: &str) -> CommandRunner {
        if let Some(runner) = self.explicit_runner(repo) {
            return runner;
        }
        match self.registry.language(id) {
            Some(language) => language
                .command_runner(repo_dir)
                .await
                .unwrap_or(CommandRunner::Direct),
            None => CommandRunner::Direct,
        }
    }

    fn explicit_runner(&self, repo: &RepoConfig) -> Option<CommandRunner> {
        let id = repo.package_manager.as_deref()?;
        Some(match self.registry.package_manager(id) {
            Some(manager) => manager.run_prefix(),
            None => {
                warn!("Unknown package manager '{}'; assuming '{} run'", id, id);
                CommandRunner::via(id, ["run"])
            }
        })
    }

    /// Declared language plugins, or the ones recognizing `repo_dir`.
    pub async fn languages_for(
        &self,
        repo: &RepoConfig,
        repo_dir: &Path,
    ) -> Vec<&'a Arc<dyn LanguagePlugin>> {
        if !repo.languages.is_empty() {
            return self.declared_languages(repo);
        }

        let mut detected = Vec::new();
        for language in self.registry.languages() {
            if language.detect(repo_dir).await {
                detected.push(language);
            }
        }
        detected
    }

    fn declared_languages(&self, repo: &RepoConfig) -> Vec<&'a Arc<dyn LanguagePlugin>> {
        repo.languages
            .iter()
            .filter_map(|id| {
                let language = self.registry.language(id);
                if language.is_none() {
                    warn!("Language plugin '{}' is not registered", id);
                }
                language
            })
            .collect()
    }
}

fn language_source(language: &Arc<dyn LanguagePlugin>) -> CommandSource {
    CommandSource::Language(language.metadata().id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    fn node_repo(dir: &Path) {
        write(
            dir,
            "package.json",
            r#"{"scripts": {"test": "vitest", "lint": "eslint .", "start": "node server.js"}}"#,
        );
    }

    #[tokio::test]
    async fn test_repo_override_beats_discovery() {
        let registry = PluginRegistry::with_builtins();
        let temp = TempDir::new().unwrap();
        node_repo(temp.path());
        write(temp.path(), ".loom.repo.json", r#"{"commands": {"lint": "custom-lint"}}"#);

        let repo = RepoConfig {
            commands: serde_json::from_str(r#"{"lint": "workspace-lint"}"#).unwrap(),
            ..Default::default()
        };
        let resolver = CommandResolver::new(&registry);
        let resolved = resolver.resolve(&repo, temp.path(), CommandKind::Lint).await;
        assert_eq!(resolved.command.as_deref(), Some("custom-lint"));
        assert_eq!(resolved.source, Some(CommandSource::RepoOverride));
        assert_eq!(resolved.command_line().as_deref(), Some("custom-lint"));
    }

    #[tokio::test]
    async fn test_workspace_override_beats_discovery() {
        let registry = PluginRegistry::with_builtins();
        let temp = TempDir::new().unwrap();
        node_repo(temp.path());

        let mut repo = RepoConfig::default();
        repo.commands.set(CommandKind::Test, "make test");
        let resolver = CommandResolver::new(&registry);
        assert_eq!(
            resolver.resolve_command(&repo, temp.path(), CommandKind::Test).await,
            Some(("make test".to_string(), CommandSource::WorkspaceOverride))
        );
    }

    #[tokio::test]
    async fn test_start_is_never_discovered() {
        let registry = PluginRegistry::with_builtins();
        let temp = TempDir::new().unwrap();
        node_repo(temp.path());
        write(temp.path(), "main.py", "print('hi')");

        let resolver = CommandResolver::new(&registry);
        let repo = RepoConfig::default();
        assert_eq!(
            resolver.resolve_command(&repo, temp.path(), CommandKind::Start).await,
            None
        );

        write(temp.path(), ".loom.repo.json", r#"{"commands": {"start": "npm start"}}"#);
        assert_eq!(
            resolver
                .resolve_command(&repo, temp.path(), CommandKind::Start)
                .await
                .map(|(cmd, _)| cmd),
            Some("npm start".to_string())
        );
    }

    #[tokio::test]
    async fn test_python_auto_detection() {
        let registry = PluginRegistry::with_builtins();
        let temp = TempDir::new().unwrap();
        write(temp.path(), "requirements.txt", "pytest\n");

        let resolver = CommandResolver::new(&registry);
        let resolved = resolver
            .resolve(&RepoConfig::default(), temp.path(), CommandKind::Test)
            .await;
        assert_eq!(resolved.command.as_deref(), Some("pytest"));
        assert_eq!(resolved.source, Some(CommandSource::Language("python".into())));
        assert_eq!(resolved.runner, CommandRunner::Direct);
    }

    #[tokio::test]
    async fn test_declared_languages_in_order() {
        let registry = PluginRegistry::with_builtins();
        let temp = TempDir::new().unwrap();
        let repo = RepoConfig {
            languages: vec!["cobol".into(), "go".into(), "python".into()],
            ..Default::default()
        };

        let resolver = CommandResolver::new(&registry);
        let (command, source) = resolver
            .resolve_command(&repo, temp.path(), CommandKind::Test)
            .await
            .unwrap();
        assert_eq!(command, "go test ./...");
        assert_eq!(source, CommandSource::Language("go".into()));
    }

    #[tokio::test]
    async fn test_unrecognized_repository_has_no_command() {
        let registry = PluginRegistry::with_builtins();
        let temp = TempDir::new().unwrap();
        let resolver = CommandResolver::new(&registry);

        let resolved = resolver
            .resolve(&RepoConfig::default(), temp.path(), CommandKind::Lint)
            .await;
        assert_eq!(resolved.command, None);
        assert_eq!(resolved.command_line(), None);
        assert!(resolved.runner.is_direct());
    }

    #[tokio::test]
    async fn test_runner_resolution() {
        let registry = PluginRegistry::with_builtins();
        let resolver = CommandResolver::new(&registry);

        let node = TempDir::new().unwrap();
        node_repo(node.path());
        write(node.path(), "pnpm-lock.yaml", "");
        let resolved = resolver
            .resolve(&RepoConfig::default(), node.path(), CommandKind::Test)
            .await;
        assert_eq!(resolved.command_line().as_deref(), Some("pnpm run test"));

        let explicit = RepoConfig {
            package_manager: Some("bun".into()),
            ..Default::default()
        };
        assert_eq!(
            resolver.command_runner(&explicit, node.path()).await,
            CommandRunner::via("bun", ["run"])
        );

        let rust = TempDir::new().unwrap();
        write(rust.path(), "Cargo.toml", "[package]\nname = \"x\"\n");
        assert!(resolver
            .command_runner(&RepoConfig::default(), rust.path())
            .await
            .is_direct());

        let python = TempDir::new().unwrap();
        write(python.path(), "pyproject.toml", "[project]\nname = \"x\"\n");
        write(python.path(), "uv.lock", "");
        assert_eq!(
            resolver.command_runner(&RepoConfig::default(), python.path()).await,
            CommandRunner::via("uv", ["run"])
        );
    }

    #[tokio::test]
    async fn test_runner_comes_from_the_commands_language() {
        let registry = PluginRegistry::with_builtins();
        let resolver = CommandResolver::new(&registry);
        let temp = TempDir::new().unwrap();
        write(temp.path(), "package.json", r#"{"devDependencies": {}}"#);
        write(temp.path(), "Cargo.toml", "[package]\nname = \"x\"\n");

        let resolved = resolver
            .resolve(&RepoConfig::default(), temp.path(), CommandKind::Test)
            .await;
        assert_eq!(resolved.source, Some(CommandSource::Language("rust".into())));
        assert!(resolved.runner.is_direct());
        assert_eq!(resolved.command_line().as_deref(), Some("cargo test"));

        // The standalone runner still reports the first language's runner.
        assert_eq!(
            resolver.command_runner(&RepoConfig::default(), temp.path()).await,
            CommandRunner::via("npm", ["run"])
        );
    }

    #[tokio::test]
    async fn test_default_package_manager_needs_detection() {
        let registry = PluginRegistry::with_builtins();
        let resolver = CommandResolver::new(&registry).with_default_package_manager(Some("poetry"));

        let bare = TempDir::new().unwrap();
        assert!(resolver
            .command_runner(&RepoConfig::default(), bare.path())
            .await
            .is_direct());

        write(bare.path(), "poetry.lock", "");
        assert_eq!(
            resolver.command_runner(&RepoConfig::default(), bare.path()).await,
            CommandRunner::via("poetry", ["run"])
        );
    }
}
