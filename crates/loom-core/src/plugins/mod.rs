//! Plugin system.
//!
//! Every language, package manager, hosting provider and editor integration
//! is a plugin held by a [`PluginRegistry`]. Built-ins are registered first
//! and cannot be replaced by anything discovered later. External plugins
//! are JSON modules found in the workspace plugin directory, the installed
//! plugin cache, or installed on demand from declared dependencies.

pub mod builtin;
mod loader;
mod manifest;
mod registry;
mod schema;
mod traits;
pub mod version;

pub use loader::{
    register_module, resolve_entry_point, DiscoveryReport, PluginLoader, SkippedCandidate,
};
pub use manifest::{load_module_file, parse_module, PackageMetadata, PluginModule, PluginPackage};
pub use registry::{
    validate_metadata, PluginOrigin, PluginRegistry, PluginSummary, RegisterOutcome, RejectReason,
};
pub use schema::{
    CommandKind, CommandRunner, CommandSet, PluginKind, PluginMetadata, PluginRequirement,
    Toolchain,
};
pub(crate) use traits::{is_dir, is_file};
pub use traits::{
    has_any_marker, has_marker, EditorPlugin, GenericPlugin, HostingProviderPlugin,
    LanguagePlugin, PackageManagerPlugin, Plugin,
};
