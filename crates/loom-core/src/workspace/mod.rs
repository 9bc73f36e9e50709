//! Workspace description consumed by resolution: the `.loom.json` config and
//! the per-repository `.loom.repo.json` override manifests.

mod config;
mod overrides;

pub use config::{RepoConfig, WorkspaceConfig};
pub use overrides::RepoOverrides;
