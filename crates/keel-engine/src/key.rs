//! The closed set of computation keys, their values, and the error union.

use keel_common::Version;
use keel_fetch::{FetchError, FetchedRepoSpec};
use keel_resolve::{DependencyGraph, DiscoveredGraph, Module, ModuleKey, ResolveError};
use keel_toolchain::{ResolvedToolchainContext, ToolchainError};
use std::fmt;
use thiserror::Error;

/// One memoizable unit of work.
///
/// Keys are interned before they reach the graph, so structurally-equal
/// requests share a node, a cache entry, and at most one in-flight
/// computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BuildKey {
    /// The workspace root module's declaration.
    RootModule,
    /// One concrete module version's declaration.
    ModuleFile(ModuleKey),
    /// The declaration served by a non-registry override of a name.
    OverrideModule(String),
    /// The versions of a name known to the registries.
    ModuleVersions(String),
    /// The raw dependency graph reachable from the root.
    Discovery,
    /// The final dependency graph after version selection.
    Selection,
    /// The repo spec for a module as served by one registry.
    RepoSpec {
        module: ModuleKey,
        registry_url: String,
    },
    /// The resolved toolchain context of one execution group.
    Toolchain { exec_group: String },
}

impl fmt::Display for BuildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildKey::RootModule => write!(f, "root-module"),
            BuildKey::ModuleFile(key) => write!(f, "module-file({key})"),
            BuildKey::OverrideModule(name) => write!(f, "override-module({name})"),
            BuildKey::ModuleVersions(name) => write!(f, "module-versions({name})"),
            BuildKey::Discovery => write!(f, "discovery"),
            BuildKey::Selection => write!(f, "selection"),
            BuildKey::RepoSpec {
                module,
                registry_url,
            } => write!(f, "repo-spec({module}, {registry_url})"),
            BuildKey::Toolchain { exec_group } => write!(f, "toolchain({exec_group})"),
        }
    }
}

/// The value produced for each key kind.
#[derive(Debug, Clone)]
pub enum BuildValue {
    Module(Module),
    Versions(Vec<Version>),
    Discovered(DiscoveredGraph),
    Selected(DependencyGraph),
    RepoSpec(FetchedRepoSpec),
    Toolchain(ResolvedToolchainContext),
}

/// The error union across every computation kind.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    /// A computation produced a value of the wrong kind for its key; this is
    /// a bug in the dispatch table, not in the caller.
    #[error("internal error: {0}")]
    Internal(String),
}
