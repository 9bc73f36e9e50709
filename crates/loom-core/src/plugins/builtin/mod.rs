//! Plugins compiled into loom.
//!
//! Registered first, during the trusted phase, in a fixed order: languages,
//! package managers, hosting providers, editors. Auto-detection walks
//! languages in this order.

mod languages;
mod tooling;

pub use languages::{GoLanguage, NodeLanguage, PythonLanguage, RustLanguage};
pub use tooling::{providers, BuiltinEditor, BuiltinPackageManager, BuiltinProvider};

use super::registry::{PluginOrigin, PluginRegistry};
use super::traits::Plugin;
use std::sync::Arc;

/// Every built-in plugin, in registration order.
pub fn builtin_plugins() -> Vec<Plugin> {
    let mut plugins = vec![
        Plugin::Language(Arc::new(NodeLanguage::new())),
        Plugin::Language(Arc::new(PythonLanguage::new())),
        Plugin::Language(Arc::new(RustLanguage::new())),
        Plugin::Language(Arc::new(GoLanguage::new())),
    ];
    plugins.extend(
        tooling::package_managers()
            .into_iter()
            .map(|pm| Plugin::PackageManager(Arc::new(pm))),
    );
    plugins.extend(
        tooling::providers()
            .into_iter()
            .map(|p| Plugin::HostingProvider(Arc::new(p))),
    );
    plugins.extend(
        tooling::editors()
            .into_iter()
            .map(|e| Plugin::Editor(Arc::new(e))),
    );
    plugins
}

/// Register every built-in plugin. Does not end the trusted phase.
pub fn register_all(registry: &mut PluginRegistry) {
    for plugin in builtin_plugins() {
        registry.register(plugin, PluginOrigin::Builtin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::schema::PluginKind;

    #[test]
    fn test_builtins_register_cleanly() {
        let registry = PluginRegistry::with_builtins();
        assert_eq!(registry.len(), builtin_plugins().len());
        assert!(!registry.is_trusted_phase());

        let languages: Vec<_> = registry
            .get_by_kind(PluginKind::Language)
            .iter()
            .map(|p| p.id().to_string())
            .collect();
        assert_eq!(languages, vec!["node", "python", "rust", "go"]);
        assert_eq!(registry.get_by_kind(PluginKind::PackageManager).len(), 6);
        assert_eq!(registry.get_by_kind(PluginKind::HostingProvider).len(), 3);
        assert_eq!(registry.get_by_kind(PluginKind::Editor).len(), 3);
    }
}
