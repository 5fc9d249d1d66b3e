//! The module-declaration loader interface.
//!
//! Declaration files are parsed outside this crate; a `ModuleLoader` serves
//! the parsed records on request. `MemoryLoader` is the in-memory
//! implementation used throughout the tests.

use crate::module::{Module, ModuleKey};
use crate::overrides::ModuleOverride;
use keel_common::Version;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from loading module declarations.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("module {name}@{version} not found")]
    NotFound { name: String, version: Version },

    #[error("no declaration available for override of '{name}'")]
    NoOverrideDeclaration { name: String },

    #[error("malformed declaration for '{name}': {reason}")]
    Malformed { name: String, reason: String },
}

/// Supplies parsed module declarations.
pub trait ModuleLoader: Send + Sync {
    /// The workspace root module's own declaration.
    fn root_module(&self) -> Result<Module, LoadError>;

    /// Every version of a name known to the registries, in any order.
    fn versions(&self, name: &str) -> Result<Vec<Version>, LoadError>;

    /// The declaration of one concrete module version.
    fn load(&self, key: &ModuleKey) -> Result<Module, LoadError>;

    /// The declaration of a module materialized from a non-registry
    /// override (local checkout or archive).
    fn load_override(&self, name: &str, ov: &ModuleOverride) -> Result<Module, LoadError>;
}

/// In-memory module loader for tests.
#[derive(Debug, Clone)]
pub struct MemoryLoader {
    root: Module,
    modules: BTreeMap<String, BTreeMap<Version, Module>>,
    override_modules: BTreeMap<String, Module>,
}

impl MemoryLoader {
    pub fn new(root: Module) -> Self {
        Self {
            root,
            modules: BTreeMap::new(),
            override_modules: BTreeMap::new(),
        }
    }

    /// Register a module declaration under its own key.
    pub fn add(&mut self, module: Module) {
        self.modules
            .entry(module.key.name.clone())
            .or_default()
            .insert(module.key.version.clone(), module);
    }

    /// Register the declaration served for a non-registry override of `name`.
    pub fn add_override_module(&mut self, module: Module) {
        self.override_modules
            .insert(module.key.name.clone(), module);
    }

    /// Replace the root declaration.
    pub fn set_root(&mut self, root: Module) {
        self.root = root;
    }
}

impl ModuleLoader for MemoryLoader {
    fn root_module(&self) -> Result<Module, LoadError> {
        Ok(self.root.clone())
    }

    fn versions(&self, name: &str) -> Result<Vec<Version>, LoadError> {
        Ok(self
            .modules
            .get(name)
            .map(|by_version| by_version.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn load(&self, key: &ModuleKey) -> Result<Module, LoadError> {
        self.modules
            .get(&key.name)
            .and_then(|by_version| by_version.get(&key.version))
            .cloned()
            .ok_or_else(|| LoadError::NotFound {
                name: key.name.clone(),
                version: key.version.clone(),
            })
    }

    fn load_override(&self, name: &str, _ov: &ModuleOverride) -> Result<Module, LoadError> {
        self.override_modules
            .get(name)
            .cloned()
            .ok_or_else(|| LoadError::NoOverrideDeclaration {
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_loader() {
        let root = Module::local("workspace", Version::new(0, 1, 0), "/workspace");
        let mut loader = MemoryLoader::new(root);
        loader.add(Module::registry(
            "rules_cc",
            Version::new(1, 0, 0),
            "https://registry.test",
        ));
        loader.add(Module::registry(
            "rules_cc",
            Version::new(1, 1, 0),
            "https://registry.test",
        ));

        assert_eq!(loader.root_module().unwrap().key.name, "workspace");
        assert_eq!(loader.versions("rules_cc").unwrap().len(), 2);
        assert_eq!(loader.versions("unknown").unwrap().len(), 0);

        let key = ModuleKey::new("rules_cc", Version::new(1, 1, 0));
        assert_eq!(loader.load(&key).unwrap().key, key);

        let missing = ModuleKey::new("rules_cc", Version::new(9, 0, 0));
        assert!(matches!(
            loader.load(&missing),
            Err(LoadError::NotFound { .. })
        ));
    }
}
