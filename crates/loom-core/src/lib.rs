//! Loom Core - plugin registry and command resolution for multi-repo workspaces.
//!
//! Capabilities (languages, package managers, hosting providers, editors)
//! are plugins. Built-ins register first; external plugins come from the
//! workspace plugin directory, the installed-plugin cache and the workspace's
//! declared dependencies, each gated on host version and required plugins.
//! Resolution then answers "what command runs `test` in this repository, and
//! through which runner".
//!
//! # Example
//!
//! ```rust,ignore
//! use loom_core::{CommandKind, LoomApi};
//!
//! #[tokio::main]
//! async fn main() -> loom_core::Result<()> {
//!     let api = LoomApi::new("/path/to/workspace")?;
//!
//!     let report = api.initialize().await;
//!     println!("{} external plugins registered", report.registered.len());
//!
//!     if let Some(line) = api.resolve("web", CommandKind::Test).await?.command_line() {
//!         println!("web: {}", line);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod installer;
pub mod metadata;
pub mod plugins;
pub mod resolve;
pub mod workspace;

mod api;

pub use api::{LiveInstall, LoomApi, LoomApiBuilder, RepoResolution, DEFAULT_CONCURRENCY};
pub use config::PluginPaths;
pub use error::{CompatibilityError, LoomError, Result};
pub use installer::{InstalledPlugin, PluginInstaller, SourceKind, SourceSpec};
pub use plugins::{
    CommandKind, CommandRunner, DiscoveryReport, Plugin, PluginKind, PluginLoader, PluginMetadata,
    PluginOrigin, PluginRegistry, PluginSummary, RegisterOutcome, RejectReason,
};
pub use resolve::{CommandResolver, CommandSource, Resolution};
pub use workspace::{RepoConfig, RepoOverrides, WorkspaceConfig};
