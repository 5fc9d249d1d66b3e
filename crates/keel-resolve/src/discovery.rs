//! Discovery: building the raw module dependency graph.
//!
//! Starting from the root declaration, every declared dependency edge is
//! followed breadth-first after consulting the override set. The result is
//! the raw graph: possibly several candidate versions per module name, with
//! version selection still to come.

use crate::loader::ModuleLoader;
use crate::module::{DependencySpec, Module, ModuleKey, ModuleOrigin};
use crate::overrides::{ModuleOverride, OverrideSet};
use crate::ResolveError;
use keel_common::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use tracing::debug;

/// Where discovery reads declarations and version listings from.
///
/// The engine implements this over memoized graph computations; direct
/// (non-incremental) callers use [`LoaderSource`].
pub trait DiscoverySource {
    type Error: From<ResolveError>;

    /// Every known version of a name, in any order.
    fn versions(&mut self, name: &str) -> Result<Vec<Version>, Self::Error>;

    /// The declaration of one concrete module version.
    fn module(&mut self, key: &ModuleKey) -> Result<Module, Self::Error>;

    /// The declaration served by a non-registry override of `name`.
    fn override_module(
        &mut self,
        name: &str,
        ov: &ModuleOverride,
    ) -> Result<Module, Self::Error>;
}

/// A [`DiscoverySource`] reading straight from a [`ModuleLoader`].
pub struct LoaderSource<'a, L: ModuleLoader + ?Sized> {
    loader: &'a L,
}

impl<'a, L: ModuleLoader + ?Sized> LoaderSource<'a, L> {
    pub fn new(loader: &'a L) -> Self {
        Self { loader }
    }
}

impl<L: ModuleLoader + ?Sized> DiscoverySource for LoaderSource<'_, L> {
    type Error = ResolveError;

    fn versions(&mut self, name: &str) -> Result<Vec<Version>, ResolveError> {
        Ok(self.loader.versions(name)?)
    }

    fn module(&mut self, key: &ModuleKey) -> Result<Module, ResolveError> {
        Ok(self.loader.load(key)?)
    }

    fn override_module(
        &mut self,
        name: &str,
        ov: &ModuleOverride,
    ) -> Result<Module, ResolveError> {
        Ok(self.loader.load_override(name, ov)?)
    }
}

/// The raw dependency graph produced by discovery.
///
/// For every key K in the map, `modules[K].key == K`. A name may appear under
/// several versions until selection picks one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredGraph {
    pub root: ModuleKey,
    pub modules: BTreeMap<ModuleKey, Module>,
}

impl DiscoveredGraph {
    pub fn get(&self, key: &ModuleKey) -> Option<&Module> {
        self.modules.get(key)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// All candidate versions discovered for a name, ascending.
    pub fn candidates(&self, name: &str) -> impl Iterator<Item = &Module> {
        self.modules
            .iter()
            .filter(move |(key, _)| key.name == name)
            .map(|(_, module)| module)
    }
}

/// Build the raw dependency graph reachable from `root`.
pub fn discover<S: DiscoverySource>(
    root: Module,
    overrides: &OverrideSet,
    source: &mut S,
) -> Result<DiscoveredGraph, S::Error> {
    let root_key = root.key.clone();
    let mut modules = BTreeMap::new();
    let mut expanded: HashSet<ModuleKey> = HashSet::new();
    let mut queue: VecDeque<Module> = VecDeque::new();

    expanded.insert(root_key.clone());
    modules.insert(root_key.clone(), root.clone());
    queue.push_back(root);

    while let Some(module) = queue.pop_front() {
        for dep in &module.deps {
            let candidate = resolve_edge(&module.key, dep, overrides, source)?;
            let key = candidate.key.clone();
            if expanded.insert(key.clone()) {
                debug!(module = %key, requirer = %module.key, "discovered module");
                modules.insert(key, candidate.clone());
                queue.push_back(candidate);
            }
        }
    }

    Ok(DiscoveredGraph {
        root: root_key,
        modules,
    })
}

/// Resolve one dependency edge to a candidate declaration, honoring the
/// override for the target name if any.
fn resolve_edge<S: DiscoverySource>(
    requirer: &ModuleKey,
    dep: &DependencySpec,
    overrides: &OverrideSet,
    source: &mut S,
) -> Result<Module, S::Error> {
    match overrides.get(&dep.name) {
        Some(ov) if ov.is_non_registry() => {
            let mut module = source.override_module(&dep.name, ov)?;
            if let Some(origin) = ov.origin() {
                module.origin = origin;
            }
            Ok(module)
        }
        Some(ModuleOverride::Pin { version }) | Some(ModuleOverride::Version { version }) => {
            let available = source.versions(&dep.name)?;
            if !available.contains(version) {
                return Err(ResolveError::OverrideTargetMissing {
                    name: dep.name.clone(),
                    version: version.clone(),
                }
                .into());
            }
            source.module(&ModuleKey::new(dep.name.clone(), version.clone()))
        }
        Some(ModuleOverride::Registry { url }) => {
            let mut module = best_match(requirer, dep, source)?;
            module.origin = ModuleOrigin::Registry { url: url.clone() };
            Ok(module)
        }
        Some(_) | None => best_match(requirer, dep, source),
    }
}

/// The maximum available version matching the constraint.
fn best_match<S: DiscoverySource>(
    requirer: &ModuleKey,
    dep: &DependencySpec,
    source: &mut S,
) -> Result<Module, S::Error> {
    let mut available = source.versions(&dep.name)?;
    if available.is_empty() {
        return Err(ResolveError::ModuleNotFound {
            name: dep.name.clone(),
        }
        .into());
    }
    available.sort();

    let best = available
        .iter()
        .rev()
        .find(|v| dep.constraint.matches(v))
        .cloned();
    match best {
        Some(version) => source.module(&ModuleKey::new(dep.name.clone(), version)),
        None => Err(ResolveError::NoMatchingVersion {
            name: dep.name.clone(),
            constraint: dep.constraint.clone(),
            requirer: requirer.clone(),
            available,
        }
        .into()),
    }
}
