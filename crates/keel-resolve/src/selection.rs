//! Selection: choosing one version per module name.
//!
//! Selection takes the raw graph from discovery and keeps, for each name, the
//! maximum version among the candidates at the highest observed compatibility
//! level. A pin override wins over that rule. Every dependency edge of every
//! retained module is rewritten to the selected key, and candidates that end
//! up unreachable from the root are pruned.

use crate::discovery::DiscoveredGraph;
use crate::module::{Module, ModuleKey};
use crate::overrides::{ModuleOverride, OverrideSet};
use crate::ResolveError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use tracing::trace;

/// Tunable selection policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolvePolicy {
    /// When true, a pinned version must satisfy every requirement declared on
    /// its name, not just exact-version requirements.
    pub strict_pins: bool,
}

/// A retained module with its dependency edges rewritten to selected keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedModule {
    pub module: Module,
    /// Dependency name to the selected key it now points at.
    pub deps: BTreeMap<String, ModuleKey>,
}

/// The final dependency graph: exactly one version per module name, every
/// edge pointing at a key present in the map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGraph {
    root: ModuleKey,
    modules: BTreeMap<ModuleKey, ResolvedModule>,
}

impl DependencyGraph {
    pub fn root(&self) -> &ModuleKey {
        &self.root
    }

    pub fn get(&self, key: &ModuleKey) -> Option<&ResolvedModule> {
        self.modules.get(key)
    }

    pub fn contains(&self, key: &ModuleKey) -> bool {
        self.modules.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ModuleKey, &ResolvedModule)> {
        self.modules.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ModuleKey> {
        self.modules.keys()
    }
}

/// Select one version per name and rewrite every edge accordingly.
///
/// The outcome depends only on the candidate set (and the overrides), not on
/// the order discovery happened to produce it.
pub fn select(
    raw: &DiscoveredGraph,
    overrides: &OverrideSet,
    policy: &ResolvePolicy,
) -> Result<DependencyGraph, ResolveError> {
    // Group candidates by name.
    let mut by_name: BTreeMap<&str, Vec<&Module>> = BTreeMap::new();
    for module in raw.modules.values() {
        by_name
            .entry(module.key.name.as_str())
            .or_default()
            .push(module);
    }

    // One winning version per name.
    let mut selected: BTreeMap<String, ModuleKey> = BTreeMap::new();
    for (name, candidates) in &by_name {
        let version = match overrides.get(name) {
            Some(ModuleOverride::Pin { version }) => {
                if !candidates.iter().any(|m| &m.key.version == version) {
                    return Err(ResolveError::OverrideTargetMissing {
                        name: (*name).to_string(),
                        version: version.clone(),
                    });
                }
                version.clone()
            }
            _ => {
                let top_level = candidates
                    .iter()
                    .map(|m| m.compatibility_level)
                    .max()
                    .unwrap_or(0);
                let Some(version) = candidates
                    .iter()
                    .filter(|m| m.compatibility_level == top_level)
                    .map(|m| &m.key.version)
                    .max()
                    .cloned()
                else {
                    continue;
                };
                version
            }
        };
        trace!(name = *name, %version, "selected version");
        selected.insert((*name).to_string(), ModuleKey::new(*name, version));
    }

    // Walk from the root, rewriting edges and checking pins against hard
    // requirements; unreachable candidates fall away.
    let mut modules = BTreeMap::new();
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    visited.insert(raw.root.clone());
    queue.push_back(raw.root.clone());

    while let Some(key) = queue.pop_front() {
        let Some(module) = raw.modules.get(&key) else {
            return Err(ResolveError::ModuleNotFound {
                name: key.name.clone(),
            });
        };

        let mut deps = BTreeMap::new();
        for dep in &module.deps {
            let Some(target) = selected.get(&dep.name) else {
                return Err(ResolveError::ModuleNotFound {
                    name: dep.name.clone(),
                });
            };

            if !dep.constraint.matches(&target.version) {
                let pinned =
                    matches!(overrides.get(&dep.name), Some(ModuleOverride::Pin { .. }));
                if pinned && (policy.strict_pins || dep.constraint.exact_version().is_some()) {
                    return Err(ResolveError::PinConflict {
                        name: dep.name.clone(),
                        pinned: target.version.clone(),
                        constraint: dep.constraint.clone(),
                        requirer: module.key.clone(),
                    });
                }
                // Otherwise the selected version supersedes the declared
                // requirement and the edge is simply rewritten.
            }

            deps.insert(dep.name.clone(), target.clone());
            if visited.insert(target.clone()) {
                queue.push_back(target.clone());
            }
        }

        modules.insert(
            key.clone(),
            ResolvedModule {
                module: module.clone(),
                deps,
            },
        );
    }

    Ok(DependencyGraph {
        root: raw.root.clone(),
        modules,
    })
}
