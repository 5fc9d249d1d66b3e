//! Workspace-wide module overrides.
//!
//! An override replaces the normal resolution outcome for one module name,
//! regardless of which module depends on it. At most one override per name is
//! effective; when two are registered for the same name the kind with the
//! higher precedence wins (non-registry overrides beat pins, pins beat
//! version overrides, version overrides beat registry redirects).

use crate::module::ModuleOrigin;
use keel_common::{Hash, Version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A directive replacing a module name's normal version resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleOverride {
    /// Use a local checkout instead of any registry version.
    LocalPath { path: PathBuf },
    /// Use an archive instead of any registry version.
    Archive { url: String, integrity: Option<Hash> },
    /// Pin the name to exactly this version; selection fails rather than
    /// move off it.
    Pin { version: Version },
    /// Redirect every dependency edge to this version, but let selection
    /// proceed normally from there.
    Version { version: Version },
    /// Serve the module from a different registry.
    Registry { url: String },
}

impl ModuleOverride {
    /// Precedence among kinds; higher wins when two overrides collide on one
    /// name.
    fn precedence(&self) -> u8 {
        match self {
            ModuleOverride::LocalPath { .. } => 5,
            ModuleOverride::Archive { .. } => 4,
            ModuleOverride::Pin { .. } => 3,
            ModuleOverride::Version { .. } => 2,
            ModuleOverride::Registry { .. } => 1,
        }
    }

    /// The module origin implied by a non-registry override.
    pub(crate) fn origin(&self) -> Option<ModuleOrigin> {
        match self {
            ModuleOverride::LocalPath { path } => Some(ModuleOrigin::LocalPath {
                path: path.clone(),
            }),
            ModuleOverride::Archive { url, integrity } => Some(ModuleOrigin::Archive {
                url: url.clone(),
                integrity: *integrity,
            }),
            _ => None,
        }
    }

    /// Whether this override bypasses registries entirely.
    pub fn is_non_registry(&self) -> bool {
        matches!(
            self,
            ModuleOverride::LocalPath { .. } | ModuleOverride::Archive { .. }
        )
    }
}

/// The effective override per module name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideSet {
    map: BTreeMap<String, ModuleOverride>,
}

impl OverrideSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an override. If one already exists for the name, the kind
    /// with higher precedence stays effective; ties keep the earlier entry.
    pub fn insert(&mut self, name: impl Into<String>, ov: ModuleOverride) {
        let name = name.into();
        match self.map.get(&name) {
            Some(existing) if existing.precedence() >= ov.precedence() => {}
            _ => {
                self.map.insert(name, ov);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModuleOverride> {
        self.map.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ModuleOverride)> {
        self.map.iter().map(|(name, ov)| (name.as_str(), ov))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
