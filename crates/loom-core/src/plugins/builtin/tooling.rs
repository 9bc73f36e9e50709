//! Built-in package managers, hosting providers and editors.
//!
//! These are table-driven: one struct per kind, one row per tool.

use crate::config::AppConfig;
use crate::plugins::schema::{PluginKind, PluginMetadata};
use crate::plugins::traits::{EditorPlugin, HostingProviderPlugin, PackageManagerPlugin};
use async_trait::async_trait;
use std::path::Path;

/// A package manager described by its executable and lockfiles.
pub struct BuiltinPackageManager {
    meta: PluginMetadata,
    executable: &'static str,
    lockfiles: &'static [&'static str],
    install: &'static str,
}

#[async_trait]
impl PackageManagerPlugin for BuiltinPackageManager {
    fn metadata(&self) -> &PluginMetadata {
        &self.meta
    }

    fn executable(&self) -> &str {
        self.executable
    }

    fn lockfiles(&self) -> Vec<String> {
        self.lockfiles.iter().map(|s| s.to_string()).collect()
    }

    fn install_command(&self) -> String {
        self.install.to_string()
    }
}

/// Package managers shipped with loom.
pub fn package_managers() -> Vec<BuiltinPackageManager> {
    const ROWS: &[(&str, &str, &[&str], &str)] = &[
        ("npm", "npm", &["package-lock.json"], "npm install"),
        ("pnpm", "pnpm", &["pnpm-lock.yaml"], "pnpm install"),
        ("yarn", "yarn", &["yarn.lock"], "yarn install"),
        ("bun", "bun", &["bun.lockb", "bun.lock"], "bun install"),
        ("uv", "uv", &["uv.lock"], "uv sync"),
        ("poetry", "poetry", &["poetry.lock"], "poetry install"),
    ];

    ROWS.iter()
        .map(|&(id, executable, lockfiles, install)| BuiltinPackageManager {
            meta: PluginMetadata::new(id, id, AppConfig::HOST_VERSION, PluginKind::PackageManager),
            executable,
            lockfiles,
            install,
        })
        .collect()
}

/// A hosting provider described by host names and a clone URL template.
pub struct BuiltinProvider {
    meta: PluginMetadata,
    hosts: &'static [&'static str],
    /// `{owner}` and `{repo}` are substituted.
    clone_template: &'static str,
}

impl HostingProviderPlugin for BuiltinProvider {
    fn metadata(&self) -> &PluginMetadata {
        &self.meta
    }

    fn hosts(&self) -> Vec<String> {
        self.hosts.iter().map(|s| s.to_string()).collect()
    }

    fn clone_url(&self, owner: &str, repo: &str) -> String {
        self.clone_template
            .replace("{owner}", owner)
            .replace("{repo}", repo)
    }
}

/// Hosting providers shipped with loom.
pub fn providers() -> Vec<BuiltinProvider> {
    const ROWS: &[(&str, &str, &[&str], &str)] = &[
        ("github", "GitHub", &["github.com"], "https://github.com/{owner}/{repo}.git"),
        ("gitlab", "GitLab", &["gitlab.com"], "https://gitlab.com/{owner}/{repo}.git"),
        (
            "bitbucket",
            "Bitbucket",
            &["bitbucket.org"],
            "https://bitbucket.org/{owner}/{repo}.git",
        ),
    ];

    ROWS.iter()
        .map(|&(id, name, hosts, clone_template)| BuiltinProvider {
            meta: PluginMetadata::new(id, name, AppConfig::HOST_VERSION, PluginKind::HostingProvider),
            hosts,
            clone_template,
        })
        .collect()
}

/// An editor launched as `executable [args...] <path>`.
pub struct BuiltinEditor {
    meta: PluginMetadata,
    executable: &'static str,
    args: &'static [&'static str],
}

impl EditorPlugin for BuiltinEditor {
    fn metadata(&self) -> &PluginMetadata {
        &self.meta
    }

    fn open_command(&self, path: &Path) -> Vec<String> {
        let mut argv = vec![self.executable.to_string()];
        argv.extend(self.args.iter().map(|a| a.to_string()));
        argv.push(path.display().to_string());
        argv
    }
}

/// Editors shipped with loom.
pub fn editors() -> Vec<BuiltinEditor> {
    const ROWS: &[(&str, &str, &str, &[&str])] = &[
        ("vscode", "Visual Studio Code", "code", &[]),
        ("cursor", "Cursor", "cursor", &[]),
        ("zed", "Zed", "zed", &[]),
    ];

    ROWS.iter()
        .map(|&(id, name, executable, args)| BuiltinEditor {
            meta: PluginMetadata::new(id, name, AppConfig::HOST_VERSION, PluginKind::Editor),
            executable,
            args,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::schema::CommandRunner;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_package_manager_detects_lockfile() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("pnpm-lock.yaml"), "").unwrap();

        let managers = package_managers();
        let pnpm = managers.iter().find(|m| m.metadata().id == "pnpm").unwrap();
        let npm = managers.iter().find(|m| m.metadata().id == "npm").unwrap();
        assert!(pnpm.detect(temp.path()).await);
        assert!(!npm.detect(temp.path()).await);
        assert_eq!(pnpm.run_prefix(), CommandRunner::via("pnpm", ["run"]));
    }

    #[test]
    fn test_provider_matching_and_clone_url() {
        let all = providers();
        let github = all.iter().find(|p| p.metadata().id == "github").unwrap();
        assert!(github.matches_url("git@github.com:loom-dev/loom.git"));
        assert!(!github.matches_url("https://gitlab.com/a/b"));
        assert_eq!(
            github.clone_url("loom-dev", "loom"),
            "https://github.com/loom-dev/loom.git"
        );
    }

    #[test]
    fn test_editor_open_command() {
        let all = editors();
        let zed = all.iter().find(|e| e.metadata().id == "zed").unwrap();
        assert_eq!(
            zed.open_command(Path::new("/work/api")),
            vec!["zed".to_string(), "/work/api".to_string()]
        );
    }
}
