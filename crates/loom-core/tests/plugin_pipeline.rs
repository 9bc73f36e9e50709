//! Integration tests for the LoomApi public interface.
//!
//! Each test builds a throwaway workspace with its own loom home, so nothing
//! touches `~/.loom` and no network is needed.

use loom_core::{CommandKind, LoomApi, PluginOrigin, PluginPaths, SourceSpec};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct TestEnv {
    temp: TempDir,
}

impl TestEnv {
    fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        std::fs::create_dir_all(temp.path().join("ws")).unwrap();
        Self { temp }
    }

    fn root(&self) -> PathBuf {
        self.temp.path().join("ws")
    }

    fn home(&self) -> PathBuf {
        self.temp.path().join("home")
    }

    fn api(&self) -> LoomApi {
        LoomApi::builder(self.root())
            .with_paths(PluginPaths::under_home(self.home()))
            .with_registry_url("http://127.0.0.1:9")
            .build()
            .unwrap()
    }

    fn write(&self, relative: &str, content: &str) {
        write(&self.root().join(relative), content);
    }
}

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn language(id: &str, test: &str) -> Value {
    json!({
        "metadata": {"id": id, "name": id, "version": "1.2.0", "kind": "language"},
        "markers": [format!("{}.marker", id)],
        "commands": {"test": test}
    })
}

#[tokio::test]
async fn test_workspace_resolution_end_to_end() {
    let env = TestEnv::new();
    env.write(
        ".loom.json",
        &json!({
            "plugins": {"zig": "./plugin-src/zig"},
            "repos": {
                "web": {},
                "api": {"path": "services/api"},
                "tool": {"language": "zig"},
                "docs": {}
            }
        })
        .to_string(),
    );
    env.write(
        "plugin-src/zig/plugin.json",
        &language("zig", "zig build test").to_string(),
    );
    env.write("web/package.json", r#"{"scripts": {"test": "vitest"}}"#);
    env.write("web/pnpm-lock.yaml", "");
    env.write("services/api/requirements.txt", "pytest\n");
    std::fs::create_dir_all(env.root().join("tool")).unwrap();
    std::fs::create_dir_all(env.root().join("docs")).unwrap();

    let api = env.api();
    let report = api.initialize().await;
    assert_eq!(report.installed, vec!["zig".to_string()]);
    assert!(report.registered.contains(&"zig".to_string()));
    assert!(report.failed.is_empty());

    let results = api.resolve_all(CommandKind::Test, 2).await;
    let lines: Vec<(String, Option<String>)> = results
        .iter()
        .map(|r| (r.repo.clone(), r.resolution.command_line()))
        .collect();
    assert_eq!(
        lines,
        vec![
            ("api".to_string(), Some("pytest".to_string())),
            ("docs".to_string(), None),
            ("tool".to_string(), Some("zig build test".to_string())),
            ("web".to_string(), Some("pnpm run test".to_string())),
        ]
    );

    let installed = api.installed_plugins().unwrap();
    assert_eq!(installed.len(), 1);
    assert_eq!(installed[0].version, "1.2.0");
    assert!(installed[0].path.starts_with(env.home()));

    // A second process reuses the cache instead of reinstalling.
    let again = env.api();
    assert!(again.initialize().await.installed.is_empty());
    assert_eq!(
        again
            .resolve_command("tool", CommandKind::Test)
            .await
            .unwrap()
            .as_deref(),
        Some("zig build test")
    );
}

#[tokio::test]
async fn test_live_install_and_remove() {
    let env = TestEnv::new();
    env.write(
        ".loom.json",
        &json!({"repos": {"app": {"language": "elixir"}}}).to_string(),
    );
    std::fs::create_dir_all(env.root().join("app")).unwrap();
    let source = env.temp.path().join("elixir-plugin");
    write(
        &source.join("loom-plugin.json"),
        &language("elixir", "mix test").to_string(),
    );

    let api = env.api();
    assert_eq!(
        api.resolve_command("app", CommandKind::Test).await.unwrap(),
        None
    );

    let spec = SourceSpec::from(source.to_string_lossy().into_owned());
    let result = api.install_plugin("elixir", &spec).await.unwrap();
    assert_eq!(
        result.outcomes,
        vec![("elixir".to_string(), "registered".to_string())]
    );
    assert_eq!(
        api.resolve_command("app", CommandKind::Test).await.unwrap().as_deref(),
        Some("mix test")
    );
    let summary = api
        .list_plugins()
        .await
        .into_iter()
        .find(|p| p.id == "elixir")
        .unwrap();
    assert_eq!(summary.origin, PluginOrigin::Installed(result.record.path.clone()));

    let removed = api.remove_plugin("elixir").await.unwrap();
    assert_eq!(removed.id, "elixir");
    assert!(!removed.path.exists());
    assert!(api.installed_plugins().unwrap().is_empty());
}

#[tokio::test]
async fn test_incompatible_workspace_plugin_is_rejected() {
    let env = TestEnv::new();
    let mut plugin = language("nim", "nimble test");
    plugin["metadata"]["minHostVersion"] = json!(">=9.0.0");
    env.write(".loom/plugins/nim.json", &plugin.to_string());

    let api = LoomApi::builder(env.root())
        .with_paths(PluginPaths::under_home(env.home()))
        .with_host_version("0.4.0")
        .build()
        .unwrap();
    let report = api.initialize().await;
    assert!(report.registered.is_empty());
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].source, "nim");
    assert!(!api.registry().await.contains("nim"));
}

#[tokio::test]
async fn test_external_discovery_can_be_disabled() {
    let env = TestEnv::new();
    env.write(
        ".loom/plugins/nim.json",
        &language("nim", "nimble test").to_string(),
    );

    let api = LoomApi::builder(env.root())
        .with_paths(PluginPaths::under_home(env.home()))
        .with_external_plugins(false)
        .build()
        .unwrap();
    assert!(api.initialize().await.registered.is_empty());
    assert!(api.registry().await.contains("python"));
    assert!(!api.registry().await.contains("nim"));
}

#[tokio::test]
async fn test_api_creation_fails_for_nonexistent_path() {
    let result = LoomApi::new("/nonexistent/path/that/does/not/exist");
    assert!(result.is_err());
}
