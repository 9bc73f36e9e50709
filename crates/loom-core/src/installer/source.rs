//! Plugin source specifications.
//!
//! A declared plugin dependency is either a shorthand string
//! (`"^1.2.0"`, `"github:owner/repo#v1"`, `"file:../plugins/x"`,
//! `"https://example.com/x.tgz"`) or an explicit object
//! (`{"source": "git", "location": "...", "version": "..."}`). Both are
//! resolved against the declaring plugin id into a `ResolvedSource`.

use crate::error::{LoomError, Result};
use crate::plugins::builtin::providers;
use crate::plugins::HostingProviderPlugin;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Hosted shorthand: `github:owner/repo`, optionally followed by `#ref`.
static HOSTED_SHORTHAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(github|gitlab|bitbucket):([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+?)(?:\.git)?(?:#(.+))?$")
        .expect("hosted shorthand regex must compile")
});

/// Version constraint or exact version accepted for registry installs.
static VERSION_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[\^~]|>=|=)?\s*v?\d+(?:\.\d+){0,2}(?:[-+][0-9A-Za-z.-]+)?$")
        .expect("version regex must compile")
});

/// Where an installed plugin was fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Registry,
    Git,
    Local,
    Url,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Registry => "registry",
            SourceKind::Git => "git",
            SourceKind::Local => "local",
            SourceKind::Url => "url",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared plugin source, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceSpec {
    Shorthand(String),
    Explicit {
        #[serde(default)]
        source: Option<SourceKind>,
        #[serde(default)]
        location: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },
}

impl Default for SourceSpec {
    fn default() -> Self {
        SourceSpec::Shorthand(String::new())
    }
}

impl From<&str> for SourceSpec {
    fn from(raw: &str) -> Self {
        SourceSpec::Shorthand(raw.to_string())
    }
}

impl From<String> for SourceSpec {
    fn from(raw: String) -> Self {
        SourceSpec::Shorthand(raw)
    }
}

/// A source with its kind decided and relative paths made absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub kind: SourceKind,
    /// Registry package name, git URL, absolute local path, or download URL.
    pub location: String,
    /// Registry version constraint or git ref.
    pub reference: Option<String>,
}

impl ResolvedSource {
    fn new(kind: SourceKind, location: impl Into<String>, reference: Option<String>) -> Self {
        Self {
            kind,
            location: location.into(),
            reference: reference.filter(|r| !r.trim().is_empty()),
        }
    }
}

impl fmt::Display for ResolvedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reference {
            Some(reference) => write!(f, "{}:{}#{}", self.kind, self.location, reference),
            None => write!(f, "{}:{}", self.kind, self.location),
        }
    }
}

impl SourceSpec {
    /// Resolve against the plugin `id`. Relative local paths are taken
    /// relative to `base_dir`.
    pub fn resolve(&self, id: &str, base_dir: &Path) -> Result<ResolvedSource> {
        match self {
            SourceSpec::Shorthand(raw) => Ok(infer(id, raw.trim(), base_dir)),
            SourceSpec::Explicit {
                source,
                location,
                version,
            } => {
                let location = location.as_deref().map(str::trim).filter(|l| !l.is_empty());
                match (source, location) {
                    (None, None) => Ok(registry(id, version.clone())),
                    (None, Some(location)) => {
                        let mut resolved = infer(id, location, base_dir);
                        if version.is_some() {
                            resolved.reference = version.clone();
                        }
                        Ok(resolved)
                    }
                    (Some(SourceKind::Registry), location) => Ok(ResolvedSource::new(
                        SourceKind::Registry,
                        location.unwrap_or(id),
                        version.clone(),
                    )),
                    (Some(kind), None) => Err(LoomError::Validation {
                        field: format!("plugins.{}.location", id),
                        message: format!("{} source requires a location", kind),
                    }),
                    (Some(SourceKind::Local), Some(location)) => Ok(ResolvedSource::new(
                        SourceKind::Local,
                        local_path(location, base_dir).to_string_lossy(),
                        None,
                    )),
                    (Some(SourceKind::Git), Some(location)) => {
                        let (url, reference) = split_ref(location.trim_start_matches("git+"));
                        Ok(ResolvedSource::new(
                            SourceKind::Git,
                            url,
                            version.clone().or(reference),
                        ))
                    }
                    (Some(SourceKind::Url), Some(location)) => {
                        Ok(ResolvedSource::new(SourceKind::Url, location, None))
                    }
                }
            }
        }
    }
}

fn registry(id: &str, version: Option<String>) -> ResolvedSource {
    let version = version.filter(|v| !matches!(v.trim(), "" | "*" | "latest"));
    ResolvedSource::new(SourceKind::Registry, id, version)
}

fn split_ref(raw: &str) -> (&str, Option<String>) {
    match raw.split_once('#') {
        Some((url, reference)) => (url, Some(reference.to_string())),
        None => (raw, None),
    }
}

fn local_path(raw: &str, base_dir: &Path) -> PathBuf {
    let raw = raw.strip_prefix("file:").unwrap_or(raw);
    let expanded = match raw.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
        None => None,
    };
    let path = expanded.unwrap_or_else(|| PathBuf::from(raw));
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

/// Clone URL for a repository page on a known hosting provider
/// (`https://github.com/owner/repo`). Deeper paths such as release
/// downloads are not repositories.
fn hosted_repository(raw: &str) -> Option<String> {
    let provider = providers().into_iter().find(|p| p.matches_url(raw))?;
    let parsed = url::Url::parse(raw).ok()?;
    let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [owner, repo] => Some(provider.clone_url(owner, repo.trim_end_matches(".git"))),
        _ => None,
    }
}

fn infer(id: &str, raw: &str, base_dir: &Path) -> ResolvedSource {
    if matches!(raw, "" | "*" | "latest") {
        return registry(id, None);
    }

    if let Some(caps) = HOSTED_SHORTHAND.captures(raw) {
        if let Some(provider) = providers().into_iter().find(|p| p.metadata().id == caps[1]) {
            let url = provider.clone_url(&caps[2], &caps[3]);
            let reference = caps.get(4).map(|m| m.as_str().to_string());
            return ResolvedSource::new(SourceKind::Git, url, reference);
        }
    }

    if let Some(rest) = raw.strip_prefix("git+") {
        let (url, reference) = split_ref(rest);
        return ResolvedSource::new(SourceKind::Git, url, reference);
    }

    let (head, reference) = split_ref(raw);
    if head.starts_with("git@") || head.starts_with("git://") || head.ends_with(".git") {
        return ResolvedSource::new(SourceKind::Git, head, reference);
    }

    if raw.starts_with("http://") || raw.starts_with("https://") {
        if let Some(url) = hosted_repository(head) {
            return ResolvedSource::new(SourceKind::Git, url, reference);
        }
        return ResolvedSource::new(SourceKind::Url, raw, None);
    }

    let looks_local = raw.starts_with("file:")
        || raw.starts_with("./")
        || raw.starts_with("../")
        || raw.starts_with("~/")
        || Path::new(raw).is_absolute();
    if looks_local || (!VERSION_LIKE.is_match(raw) && base_dir.join(raw).exists()) {
        return ResolvedSource::new(
            SourceKind::Local,
            local_path(raw, base_dir).to_string_lossy(),
            None,
        );
    }

    if VERSION_LIKE.is_match(raw) || raw.starts_with('>') || raw.starts_with('<') {
        return registry(id, Some(raw.to_string()));
    }

    // `other-package@1.2.0` or a bare package name (an npm-style alias).
    match raw.rsplit_once('@') {
        Some((name, version)) if !name.is_empty() => {
            registry(name, Some(version.to_string()))
        }
        _ => registry(raw, None),
    }
}
