//! Fetching plugin sources into a staging directory.
//!
//! Every fetch writes only below the directory it is given; the caller owns
//! moving the result into the cache.

use super::source::{ResolvedSource, SourceKind};
use crate::config::InstallerConfig;
use crate::error::{LoomError, Result};
use crate::plugins::version::parse_loose;
use futures::StreamExt;
use semver::{Version, VersionReq};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Directories never copied from a local source.
const SKIPPED_DIRS: &[&str] = &[".git", "node_modules"];

/// File name used for a plugin fetched as a bare JSON document.
const SINGLE_FILE_NAME: &str = "plugin.json";

/// What a fetch learned about the plugin beyond its files.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// Authoritative version (registry installs).
    pub version: Option<String>,
    pub integrity: Option<String>,
    pub revision: Option<String>,
}

/// Fetches sources of every kind.
pub struct Fetcher {
    client: reqwest::Client,
    registry_url: String,
}

impl Fetcher {
    pub fn new(registry_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(InstallerConfig::CONNECT_TIMEOUT)
            .timeout(InstallerConfig::HTTP_TIMEOUT)
            .user_agent(InstallerConfig::USER_AGENT)
            .build()
            .map_err(|e| LoomError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: Some(e.to_string()),
            })?;

        Ok(Self {
            client,
            registry_url: registry_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Fetch `source` into `dest` (which must not exist yet). `scratch` is a
    /// directory for intermediate files such as downloaded archives.
    pub async fn fetch(
        &self,
        id: &str,
        source: &ResolvedSource,
        dest: &Path,
        scratch: &Path,
    ) -> Result<Fetched> {
        info!("Fetching plugin {} from {}", id, source);
        match source.kind {
            SourceKind::Registry => self.fetch_registry(id, source, dest, scratch).await,
            SourceKind::Git => {
                fetch_git(id, &source.location, source.reference.as_deref(), dest).await
            }
            SourceKind::Local => fetch_local(id, Path::new(&source.location), dest).await,
            SourceKind::Url => self.fetch_url(&source.location, dest, scratch).await,
        }
    }

    async fn fetch_registry(
        &self,
        id: &str,
        source: &ResolvedSource,
        dest: &Path,
        scratch: &Path,
    ) -> Result<Fetched> {
        let package = &source.location;
        let url = format!("{}/{}", self.registry_url, package.replace('/', "%2f"));
        debug!("Querying registry {}", url);

        let document: Value = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let version = pick_registry_version(&document, source.reference.as_deref()).ok_or_else(|| {
            LoomError::InstallationFailed {
                id: id.to_string(),
                message: format!(
                    "no published version of {} matches '{}'",
                    package,
                    source.reference.as_deref().unwrap_or("latest")
                ),
            }
        })?;

        let tarball = document
            .pointer(&format!("/versions/{}/dist/tarball", version))
            .and_then(Value::as_str)
            .ok_or_else(|| LoomError::InstallationFailed {
                id: id.to_string(),
                message: format!("registry entry for {}@{} has no tarball", package, version),
            })?;

        let archive = scratch.join("package.tgz");
        let integrity = self.download(tarball, &archive).await?;
        unpack_tarball(&archive, &scratch.join("extract"), dest).await?;

        Ok(Fetched {
            version: Some(version),
            integrity: Some(integrity),
            revision: None,
        })
    }

    async fn fetch_url(&self, url: &str, dest: &Path, scratch: &Path) -> Result<Fetched> {
        let parsed = url::Url::parse(url).map_err(|e| LoomError::Validation {
            field: "url".to_string(),
            message: format!("invalid plugin URL '{}': {}", url, e),
        })?;

        let integrity = if parsed.path().ends_with(".json") {
            tokio::fs::create_dir_all(dest)
                .await
                .map_err(|e| LoomError::io_with_path(e, dest))?;
            self.download(url, &dest.join(SINGLE_FILE_NAME)).await?
        } else {
            let archive = scratch.join("download.tgz");
            let integrity = self.download(url, &archive).await?;
            unpack_tarball(&archive, &scratch.join("extract"), dest).await?;
            integrity
        };

        Ok(Fetched {
            integrity: Some(integrity),
            ..Default::default()
        })
    }

    /// Download `url` to `file_path`, retrying transient failures. Returns
    /// the `sha256-<hex>` integrity of the body.
    async fn download(&self, url: &str, file_path: &Path) -> Result<String> {
        info!("Downloading {}", url);

        let mut response = None;
        for attempt in 1..=InstallerConfig::DOWNLOAD_RETRY_ATTEMPTS {
            match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    response = Some(resp);
                    break;
                }
                Ok(resp) if resp.status().is_client_error() => {
                    return Err(LoomError::Network {
                        message: format!("Download of {} failed with status {}", url, resp.status()),
                        cause: None,
                    });
                }
                Ok(resp) => {
                    warn!("Download attempt {} failed with status {}", attempt, resp.status());
                }
                Err(e) => {
                    let err = LoomError::from(e);
                    warn!("Download attempt {} failed: {}", attempt, err);
                    if !err.is_retryable() || attempt == InstallerConfig::DOWNLOAD_RETRY_ATTEMPTS {
                        return Err(err);
                    }
                }
            }
            if attempt < InstallerConfig::DOWNLOAD_RETRY_ATTEMPTS {
                tokio::time::sleep(std::time::Duration::from_secs(2u64.pow(attempt))).await;
            }
        }

        let response = response.ok_or_else(|| LoomError::Network {
            message: format!("Download of {} failed - no successful response", url),
            cause: None,
        })?;

        let mut file = tokio::fs::File::create(file_path)
            .await
            .map_err(|e| LoomError::io_with_path(e, file_path))?;
        let mut hasher = Sha256::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LoomError::Network {
                message: format!("Error reading download chunk: {}", e),
                cause: Some(e.to_string()),
            })?;
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| LoomError::io_with_path(e, file_path))?;
        }
        file.flush()
            .await
            .map_err(|e| LoomError::io_with_path(e, file_path))?;

        Ok(format!("sha256-{}", hex::encode(hasher.finalize())))
    }
}

/// Choose the registry version satisfying `requested`: the `latest` tag when
/// nothing is requested, an exact published version, or the highest version
/// matching the range.
pub fn pick_registry_version(document: &Value, requested: Option<&str>) -> Option<String> {
    let versions = document.get("versions").and_then(Value::as_object)?;

    let requested = requested.map(str::trim).filter(|r| !r.is_empty());
    let Some(requested) = requested else {
        if let Some(latest) = document.pointer("/dist-tags/latest").and_then(Value::as_str) {
            if versions.contains_key(latest) {
                return Some(latest.to_string());
            }
        }
        return highest(versions.keys().map(String::as_str), |_| true);
    };

    if let Some(exact) = parse_loose(requested).map(|v| v.to_string()) {
        if !requested.starts_with(['^', '~', '>', '<']) && versions.contains_key(&exact) {
            return Some(exact);
        }
    }

    let req = VersionReq::parse(requested).ok()?;
    highest(versions.keys().map(String::as_str), |v| req.matches(v))
}

fn highest<'a>(
    candidates: impl Iterator<Item = &'a str>,
    accept: impl Fn(&Version) -> bool,
) -> Option<String> {
    candidates
        .filter_map(|raw| Version::parse(raw).ok())
        .filter(|v| accept(v))
        .max()
        .map(|v| v.to_string())
}

async fn fetch_git(id: &str, url: &str, reference: Option<&str>, dest: &Path) -> Result<Fetched> {
    let pinned_commit = reference.filter(|r| r.len() >= 7 && r.chars().all(|c| c.is_ascii_hexdigit()));

    let mut clone = vec!["clone".to_string()];
    match (reference, pinned_commit) {
        (_, Some(_)) => {}
        (Some(branch_or_tag), None) => {
            clone.extend(["--depth".into(), "1".into(), "--branch".into(), branch_or_tag.into()]);
        }
        (None, None) => clone.extend(["--depth".into(), "1".into()]),
    }
    clone.push(url.to_string());
    clone.push(dest.to_string_lossy().into_owned());
    run_git(id, &clone).await?;

    if let Some(commit) = pinned_commit {
        let dir = dest.to_string_lossy().into_owned();
        run_git(id, &["-C".into(), dir, "checkout".into(), commit.into()]).await?;
    }

    let dir = dest.to_string_lossy().into_owned();
    let revision = run_git(id, &["-C".into(), dir, "rev-parse".into(), "HEAD".into()])
        .await
        .ok()
        .filter(|r| !r.is_empty());

    Ok(Fetched {
        revision,
        ..Default::default()
    })
}

/// Run git, returning trimmed stdout.
async fn run_git(id: &str, args: &[String]) -> Result<String> {
    debug!("git {}", args.join(" "));
    let mut command = Command::new("git");
    command
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .kill_on_drop(true);

    let output = tokio::time::timeout(InstallerConfig::GIT_TIMEOUT, command.output())
        .await
        .map_err(|_| LoomError::Timeout(InstallerConfig::GIT_TIMEOUT))?
        .map_err(|e| LoomError::InstallationFailed {
            id: id.to_string(),
            message: format!("failed to run git: {}", e),
        })?;

    if !output.status.success() {
        return Err(LoomError::InstallationFailed {
            id: id.to_string(),
            message: format!(
                "git {} failed: {}",
                args.first().map(String::as_str).unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

async fn fetch_local(id: &str, source: &Path, dest: &Path) -> Result<Fetched> {
    if !tokio::fs::try_exists(source).await.unwrap_or(false) {
        return Err(LoomError::InstallationFailed {
            id: id.to_string(),
            message: format!("source path {} does not exist", source.display()),
        });
    }

    let src = source.to_path_buf();
    let dst = dest.to_path_buf();
    let copy = tokio::task::spawn_blocking(move || {
        if src.is_dir() {
            copy_dir_recursive(&src, &dst)
        } else {
            std::fs::create_dir_all(&dst).map_err(|e| LoomError::io_with_path(e, &dst))?;
            let name = src
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(SINGLE_FILE_NAME));
            std::fs::copy(&src, dst.join(name)).map_err(|e| LoomError::io_with_path(e, &src))?;
            Ok(())
        }
    });

    tokio::time::timeout(InstallerConfig::LOCAL_COPY_TIMEOUT, copy)
        .await
        .map_err(|_| LoomError::Timeout(InstallerConfig::LOCAL_COPY_TIMEOUT))?
        .map_err(|e| LoomError::Other(format!("Copy task failed: {}", e)))??;

    Ok(Fetched::default())
}

/// Copy a directory tree, skipping VCS metadata and dependency folders.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    let walker = WalkDir::new(src).follow_links(true).into_iter().filter_entry(|entry| {
        entry.depth() == 0
            || !entry.file_type().is_dir()
            || !SKIPPED_DIRS.iter().any(|skip| entry.file_name() == *skip)
    });

    for entry in walker {
        let entry = entry.map_err(|e| LoomError::Io {
            message: format!("Failed to walk {}: {}", src.display(), e),
            path: e.path().map(Path::to_path_buf),
            source: None,
        })?;
        let relative = entry.path().strip_prefix(src).map_err(|e| LoomError::Other(e.to_string()))?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| LoomError::io_with_path(e, &target))?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| LoomError::io_with_path(e, entry.path()))?;
        }
    }
    Ok(())
}

/// Extract a gzipped tarball into `extract_dir`, then move its content to
/// `dest`. A single top-level directory (npm's `package/`) is unwrapped.
async fn unpack_tarball(archive: &Path, extract_dir: &Path, dest: &Path) -> Result<()> {
    let archive = archive.to_path_buf();
    let extract_dir = extract_dir.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || {
        extract_tarball(&archive, &extract_dir)?;
        move_extracted(&extract_dir, &dest)
    })
    .await
    .map_err(|e| LoomError::Other(format!("Extraction task failed: {}", e)))?
}

fn extract_tarball(archive_path: &Path, extract_dir: &Path) -> Result<()> {
    let file = File::open(archive_path).map_err(|e| LoomError::Io {
        message: format!("Failed to open tarball: {}", e),
        path: Some(archive_path.to_path_buf()),
        source: Some(e),
    })?;
    std::fs::create_dir_all(extract_dir).map_err(|e| LoomError::io_with_path(e, extract_dir))?;

    let decoder = flate2::read::GzDecoder::new(BufReader::new(file));
    let mut archive = tar::Archive::new(decoder);
    archive.unpack(extract_dir).map_err(|e| LoomError::Io {
        message: format!("Failed to extract tarball: {}", e),
        path: Some(archive_path.to_path_buf()),
        source: Some(e),
    })
}

fn move_extracted(extract_dir: &Path, dest: &Path) -> Result<()> {
    let entries: Vec<_> = std::fs::read_dir(extract_dir)
        .map_err(|e| LoomError::io_with_path(e, extract_dir))?
        .filter_map(|e| e.ok())
        .collect();

    let source_dir = if entries.len() == 1 && entries[0].path().is_dir() {
        entries[0].path()
    } else {
        extract_dir.to_path_buf()
    };

    if std::fs::rename(&source_dir, dest).is_err() {
        debug!("Rename failed, falling back to copy");
        copy_dir_recursive(&source_dir, dest)?;
    }
    Ok(())
}
