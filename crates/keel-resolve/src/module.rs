//! The module data model.
//!
//! A `Module` is one parsed module declaration: its identity, compatibility
//! level, declared dependencies, and where its source comes from. Declaration
//! parsing itself happens outside this crate; a `ModuleLoader` hands us the
//! parsed records.

use keel_common::{Hash, Version, VersionConstraint};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The identity of a module once a concrete version is in play.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleKey {
    pub name: String,
    pub version: Version,
}

impl ModuleKey {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// A declared dependency edge: a module name and the acceptable versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub name: String,
    pub constraint: VersionConstraint,
}

impl DependencySpec {
    pub fn new(name: impl Into<String>, constraint: VersionConstraint) -> Self {
        Self {
            name: name.into(),
            constraint,
        }
    }
}

/// Where a module's source tree comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleOrigin {
    /// Served by a registry; repo specs can be resolved for it.
    Registry { url: String },
    /// A local checkout supplied by an override.
    LocalPath { path: PathBuf },
    /// An archive supplied by an override.
    Archive { url: String, integrity: Option<Hash> },
}

impl ModuleOrigin {
    /// The registry URL, if this is a registry origin.
    pub fn registry_url(&self) -> Option<&str> {
        match self {
            ModuleOrigin::Registry { url } => Some(url),
            _ => None,
        }
    }

    pub fn is_registry(&self) -> bool {
        matches!(self, ModuleOrigin::Registry { .. })
    }
}

/// A named, versioned module declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub key: ModuleKey,
    pub compatibility_level: u32,
    pub deps: Vec<DependencySpec>,
    pub origin: ModuleOrigin,
}

impl Module {
    /// A module served by a registry.
    pub fn registry(
        name: impl Into<String>,
        version: Version,
        registry_url: impl Into<String>,
    ) -> Self {
        Self {
            key: ModuleKey::new(name, version),
            compatibility_level: 0,
            deps: Vec::new(),
            origin: ModuleOrigin::Registry {
                url: registry_url.into(),
            },
        }
    }

    /// A module rooted in a local checkout.
    pub fn local(name: impl Into<String>, version: Version, path: impl Into<PathBuf>) -> Self {
        Self {
            key: ModuleKey::new(name, version),
            compatibility_level: 0,
            deps: Vec::new(),
            origin: ModuleOrigin::LocalPath { path: path.into() },
        }
    }

    /// Add a declared dependency.
    pub fn with_dep(mut self, name: impl Into<String>, constraint: VersionConstraint) -> Self {
        self.deps.push(DependencySpec::new(name, constraint));
        self
    }

    /// Set the compatibility level.
    pub fn with_compatibility_level(mut self, level: u32) -> Self {
        self.compatibility_level = level;
        self
    }
}
