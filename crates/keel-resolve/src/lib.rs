//! Module dependency resolution for keel.
//!
//! This crate builds the external dependency graph of a workspace in two
//! phases:
//! - discovery: breadth-first traversal of declared dependencies, honoring
//!   workspace-wide overrides, producing the raw candidate graph
//! - selection: one version per module name, edges rewritten, unreachable
//!   candidates pruned
//!
//! Declaration loading is behind the `ModuleLoader` trait so the engine can
//! memoize it per module.

pub mod discovery;
pub mod loader;
pub mod module;
pub mod overrides;
pub mod selection;

use keel_common::{Version, VersionConstraint};
use thiserror::Error;

pub use discovery::{discover, DiscoveredGraph, DiscoverySource, LoaderSource};
pub use loader::{LoadError, MemoryLoader, ModuleLoader};
pub use module::{DependencySpec, Module, ModuleKey, ModuleOrigin};
pub use overrides::{ModuleOverride, OverrideSet};
pub use selection::{select, DependencyGraph, ResolvePolicy, ResolvedModule};

/// Errors from module resolution.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("module '{name}' not found in any registry")]
    ModuleNotFound { name: String },

    #[error(
        "no version of '{name}' satisfies '{constraint}' (required by {requirer}); available: {available:?}"
    )]
    NoMatchingVersion {
        name: String,
        constraint: VersionConstraint,
        requirer: ModuleKey,
        available: Vec<Version>,
    },

    #[error(
        "pinned version {pinned} of '{name}' conflicts with requirement '{constraint}' from {requirer}"
    )]
    PinConflict {
        name: String,
        pinned: Version,
        constraint: VersionConstraint,
        requirer: ModuleKey,
    },

    #[error("override for '{name}' references version {version}, which no registry provides")]
    OverrideTargetMissing { name: String, version: Version },

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// One-call resolution over a [`ModuleLoader`]: discovery followed by
/// selection, without the incremental engine.
pub struct Resolver<'a, L: ModuleLoader> {
    loader: &'a L,
    overrides: OverrideSet,
    policy: ResolvePolicy,
}

impl<'a, L: ModuleLoader> Resolver<'a, L> {
    pub fn new(loader: &'a L) -> Self {
        Self {
            loader,
            overrides: OverrideSet::new(),
            policy: ResolvePolicy::default(),
        }
    }

    /// Register an override.
    pub fn with_override(mut self, name: impl Into<String>, ov: ModuleOverride) -> Self {
        self.overrides.insert(name, ov);
        self
    }

    /// Replace the whole override set.
    pub fn with_overrides(mut self, overrides: OverrideSet) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_policy(mut self, policy: ResolvePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolve the final dependency graph for the loader's root module.
    pub fn resolve(&self) -> Result<DependencyGraph, ResolveError> {
        let root = self.loader.root_module()?;
        let mut source = LoaderSource::new(self.loader);
        let raw = discover(root, &self.overrides, &mut source)?;
        select(&raw, &self.overrides, &self.policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = "https://registry.test";

    #[test]
    fn test_resolver_end_to_end() {
        let root = Module::local("workspace", Version::new(0, 1, 0), "/workspace")
            .with_dep("a", VersionConstraint::parse("^1.0").unwrap());
        let mut loader = MemoryLoader::new(root);
        loader.add(
            Module::registry("a", Version::new(1, 0, 0), REGISTRY)
                .with_dep("b", VersionConstraint::parse("^1.0").unwrap()),
        );
        loader.add(Module::registry("b", Version::new(1, 2, 0), REGISTRY));

        let graph = Resolver::new(&loader).resolve().unwrap();
        assert_eq!(graph.len(), 3);
        assert!(graph.contains(&ModuleKey::new("b", Version::new(1, 2, 0))));
    }

    #[test]
    fn test_resolver_with_pin() {
        let root = Module::local("workspace", Version::new(0, 1, 0), "/workspace")
            .with_dep("a", VersionConstraint::parse("^1.0").unwrap());
        let mut loader = MemoryLoader::new(root);
        loader.add(Module::registry("a", Version::new(1, 0, 0), REGISTRY));
        loader.add(Module::registry("a", Version::new(3, 0, 0), REGISTRY));

        let graph = Resolver::new(&loader)
            .with_override(
                "a",
                ModuleOverride::Pin {
                    version: Version::new(3, 0, 0),
                },
            )
            .resolve()
            .unwrap();

        assert!(graph.contains(&ModuleKey::new("a", Version::new(3, 0, 0))));
        assert!(!graph.contains(&ModuleKey::new("a", Version::new(1, 0, 0))));
    }
}
