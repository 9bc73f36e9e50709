//! Built-in language plugins: JavaScript/TypeScript, Python, Rust and Go.

use crate::config::AppConfig;
use crate::plugins::schema::{CommandRunner, CommandSet, PluginKind, PluginMetadata, Toolchain};
use crate::plugins::traits::{has_any_marker, has_marker, LanguagePlugin};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

fn metadata(id: &str, name: &str) -> PluginMetadata {
    PluginMetadata::new(id, name, AppConfig::HOST_VERSION, PluginKind::Language)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

async fn read_optional(path: &Path) -> Option<String> {
    tokio::fs::read_to_string(path).await.ok()
}

// ========================================
// JavaScript / TypeScript
// ========================================

/// npm's placeholder test script.
const NPM_PLACEHOLDER_TEST: &str = "no test specified";

/// Node.js projects. Commands are `package.json` script names and run through
/// the project's package manager.
pub struct NodeLanguage {
    meta: PluginMetadata,
}

impl NodeLanguage {
    pub fn new() -> Self {
        Self {
            meta: metadata("node", "JavaScript/TypeScript")
                .with_description("Node.js projects driven by package.json scripts"),
        }
    }

    async fn package_json(path: &Path) -> Option<Value> {
        let content = read_optional(&path.join("package.json")).await?;
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Ignoring unparsable package.json in {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Package manager named by the `packageManager` field (`pnpm@9.1.0`).
    fn declared_manager(package: &Value) -> Option<String> {
        let field = package.get("packageManager")?.as_str()?;
        let name = field.split('@').next()?.trim();
        (!name.is_empty()).then(|| name.to_string())
    }
}

impl Default for NodeLanguage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguagePlugin for NodeLanguage {
    fn metadata(&self) -> &PluginMetadata {
        &self.meta
    }

    fn toolchain(&self) -> Toolchain {
        Toolchain {
            executable: Some("node".into()),
            install_command: Some("npm install".into()),
            build_command: Some("npm run build".into()),
            extensions: strings(&["js", "mjs", "cjs", "ts", "tsx", "jsx"]),
        }
    }

    fn project_markers(&self) -> Vec<String> {
        strings(&["package.json"])
    }

    async fn detect(&self, path: &Path) -> bool {
        has_any_marker(path, &self.project_markers()).await
    }

    async fn discover_commands(&self, path: &Path) -> CommandSet {
        let mut commands = CommandSet::default();
        let Some(package) = Self::package_json(path).await else {
            return commands;
        };
        let Some(scripts) = package.get("scripts").and_then(Value::as_object) else {
            return commands;
        };

        for kind in crate::plugins::CommandKind::ALL {
            let Some(script) = scripts.get(kind.as_str()).and_then(Value::as_str) else {
                continue;
            };
            if script.contains(NPM_PLACEHOLDER_TEST) {
                continue;
            }
            commands.set(kind, kind.as_str());
        }
        commands
    }

    async fn command_runner(&self, path: &Path) -> Option<CommandRunner> {
        if let Some(manager) = Self::package_json(path)
            .await
            .as_ref()
            .and_then(Self::declared_manager)
        {
            return Some(CommandRunner::via(manager, ["run"]));
        }

        let by_lockfile = [
            ("pnpm-lock.yaml", "pnpm"),
            ("yarn.lock", "yarn"),
            ("bun.lockb", "bun"),
            ("bun.lock", "bun"),
            ("package-lock.json", "npm"),
        ];
        for (lockfile, manager) in by_lockfile {
            if has_marker(path, lockfile).await {
                return Some(CommandRunner::via(manager, ["run"]));
            }
        }
        Some(CommandRunner::via("npm", ["run"]))
    }
}

// ========================================
// Python
// ========================================

/// Python projects.
pub struct PythonLanguage {
    meta: PluginMetadata,
}

impl PythonLanguage {
    pub fn new() -> Self {
        Self {
            meta: metadata("python", "Python"),
        }
    }
}

impl Default for PythonLanguage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguagePlugin for PythonLanguage {
    fn metadata(&self) -> &PluginMetadata {
        &self.meta
    }

    fn toolchain(&self) -> Toolchain {
        Toolchain {
            executable: Some("python3".into()),
            install_command: Some("pip install -e .".into()),
            build_command: None,
            extensions: strings(&["py"]),
        }
    }

    fn project_markers(&self) -> Vec<String> {
        strings(&[
            "pyproject.toml",
            "setup.py",
            "setup.cfg",
            "requirements.txt",
            "Pipfile",
        ])
    }

    async fn detect(&self, path: &Path) -> bool {
        has_any_marker(path, &self.project_markers()).await
    }

    async fn discover_commands(&self, path: &Path) -> CommandSet {
        let pyproject = read_optional(&path.join("pyproject.toml"))
            .await
            .unwrap_or_default();
        let setup_cfg = read_optional(&path.join("setup.cfg")).await.unwrap_or_default();

        let mut commands = CommandSet {
            test: Some("pytest".into()),
            ..Default::default()
        };

        if pyproject.contains("[tool.ruff")
            || has_any_marker(path, &strings(&["ruff.toml", ".ruff.toml"])).await
        {
            commands.lint = Some("ruff check .".into());
        } else if setup_cfg.contains("[flake8]") || has_marker(path, ".flake8").await {
            commands.lint = Some("flake8".into());
        }

        if has_marker(path, "manage.py").await {
            commands.start = Some("python manage.py runserver".into());
        } else if has_marker(path, "main.py").await {
            commands.start = Some("python main.py".into());
        }

        commands
    }

    async fn command_runner(&self, path: &Path) -> Option<CommandRunner> {
        if has_marker(path, "uv.lock").await {
            return Some(CommandRunner::via("uv", ["run"]));
        }
        if has_marker(path, "poetry.lock").await
            || read_optional(&path.join("pyproject.toml"))
                .await
                .is_some_and(|c| c.contains("[tool.poetry]"))
        {
            return Some(CommandRunner::via("poetry", ["run"]));
        }
        if has_marker(path, "Pipfile").await {
            return Some(CommandRunner::via("pipenv", ["run"]));
        }
        None
    }
}

// ========================================
// Rust
// ========================================

/// Cargo projects. Commands run directly.
pub struct RustLanguage {
    meta: PluginMetadata,
}

impl RustLanguage {
    pub fn new() -> Self {
        Self {
            meta: metadata("rust", "Rust"),
        }
    }
}

impl Default for RustLanguage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguagePlugin for RustLanguage {
    fn metadata(&self) -> &PluginMetadata {
        &self.meta
    }

    fn toolchain(&self) -> Toolchain {
        Toolchain {
            executable: Some("cargo".into()),
            install_command: Some("cargo fetch".into()),
            build_command: Some("cargo build".into()),
            extensions: strings(&["rs"]),
        }
    }

    fn project_markers(&self) -> Vec<String> {
        strings(&["Cargo.toml"])
    }

    async fn detect(&self, path: &Path) -> bool {
        has_any_marker(path, &self.project_markers()).await
    }

    async fn discover_commands(&self, path: &Path) -> CommandSet {
        let start = has_marker(&path.join("src"), "main.rs")
            .await
            .then(|| "cargo run".to_string());
        CommandSet {
            test: Some("cargo test".into()),
            lint: Some("cargo clippy --all-targets -- -D warnings".into()),
            start,
        }
    }
}

// ========================================
// Go
// ========================================

/// Go modules. Commands run directly.
pub struct GoLanguage {
    meta: PluginMetadata,
}

impl GoLanguage {
    pub fn new() -> Self {
        Self {
            meta: metadata("go", "Go"),
        }
    }
}

impl Default for GoLanguage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguagePlugin for GoLanguage {
    fn metadata(&self) -> &PluginMetadata {
        &self.meta
    }

    fn toolchain(&self) -> Toolchain {
        Toolchain {
            executable: Some("go".into()),
            install_command: Some("go mod download".into()),
            build_command: Some("go build ./...".into()),
            extensions: strings(&["go"]),
        }
    }

    fn project_markers(&self) -> Vec<String> {
        strings(&["go.mod"])
    }

    async fn detect(&self, path: &Path) -> bool {
        has_any_marker(path, &self.project_markers()).await
    }

    async fn discover_commands(&self, path: &Path) -> CommandSet {
        let lint = if has_any_marker(path, &strings(&[".golangci.yml", ".golangci.yaml"])).await {
            "golangci-lint run"
        } else {
            "go vet ./..."
        };
        let start = has_marker(path, "main.go")
            .await
            .then(|| "go run .".to_string());
        CommandSet {
            test: Some("go test ./...".into()),
            lint: Some(lint.into()),
            start,
        }
    }
}
