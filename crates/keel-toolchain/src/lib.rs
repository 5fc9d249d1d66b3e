//! Per-exec-group toolchain aggregation.
//!
//! A build target's toolchain requirements are partitioned into named
//! execution groups, each resolved (elsewhere) to a toolchain context. This
//! crate aggregates those contexts into an immutable `ToolchainCollection`
//! keyed by group name, with the reserved `default` group required to be
//! present. Platform/constraint matching is not done here; the contexts
//! arrive already resolved through a `ToolchainResolver`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// The reserved name of the default execution group.
pub const DEFAULT_EXEC_GROUP: &str = "default";

/// Errors from building or resolving toolchain collections.
#[derive(Debug, Clone, Error)]
pub enum ToolchainError {
    #[error("duplicate exec group '{0}' added to toolchain collection")]
    DuplicateExecGroup(String),

    #[error("toolchain collection is missing the '{DEFAULT_EXEC_GROUP}' exec group")]
    MissingDefaultGroup,

    /// An external resolver failed for one exec group.
    #[error("toolchain resolution failed for exec group '{exec_group}': {reason}")]
    Resolution { exec_group: String, reason: String },
}

/// One execution group's resolved toolchains, viewed abstractly.
///
/// Two concrete shapes share this interface: the fully resolved context and
/// the unloaded one that only knows labels. Everything in a collection shares
/// one target platform by construction.
pub trait ToolchainContext {
    /// Label of the platform this group's toolchains target.
    fn target_platform(&self) -> &str;

    /// Labels of every resolved toolchain in this group.
    fn resolved_toolchain_labels(&self) -> BTreeSet<String>;
}

/// A resolved toolchain context: toolchain type to the implementation label
/// chosen for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedToolchainContext {
    pub target_platform: String,
    pub toolchains: BTreeMap<String, String>,
}

impl ResolvedToolchainContext {
    pub fn new(target_platform: impl Into<String>) -> Self {
        Self {
            target_platform: target_platform.into(),
            toolchains: BTreeMap::new(),
        }
    }

    /// Record the implementation chosen for a toolchain type.
    pub fn with_toolchain(
        mut self,
        toolchain_type: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        self.toolchains.insert(toolchain_type.into(), label.into());
        self
    }

    /// The implementation label for a toolchain type, if resolved.
    pub fn toolchain(&self, toolchain_type: &str) -> Option<&str> {
        self.toolchains.get(toolchain_type).map(String::as_str)
    }
}

impl ToolchainContext for ResolvedToolchainContext {
    fn target_platform(&self) -> &str {
        &self.target_platform
    }

    fn resolved_toolchain_labels(&self) -> BTreeSet<String> {
        self.toolchains.values().cloned().collect()
    }
}

/// A context known only by its labels, used before toolchain data is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnloadedToolchainContext {
    pub target_platform: String,
    pub resolved_labels: BTreeSet<String>,
}

impl UnloadedToolchainContext {
    pub fn new(target_platform: impl Into<String>) -> Self {
        Self {
            target_platform: target_platform.into(),
            resolved_labels: BTreeSet::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.resolved_labels.insert(label.into());
        self
    }
}

impl ToolchainContext for UnloadedToolchainContext {
    fn target_platform(&self) -> &str {
        &self.target_platform
    }

    fn resolved_toolchain_labels(&self) -> BTreeSet<String> {
        self.resolved_labels.clone()
    }
}

/// Resolves one execution group to its toolchain context.
///
/// Implemented outside this core by the platform/constraint matcher.
pub trait ToolchainResolver: Send + Sync {
    fn resolve(&self, exec_group: &str) -> Result<ResolvedToolchainContext, ToolchainError>;
}

/// An immutable map of exec group name to toolchain context.
///
/// Built through [`ToolchainCollection::builder`]; the default group is
/// always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainCollection<T> {
    contexts: BTreeMap<String, T>,
}

impl<T: ToolchainContext> ToolchainCollection<T> {
    pub fn builder() -> Builder<T> {
        Builder::new()
    }

    /// The default execution group's context.
    pub fn default_context(&self) -> &T {
        // The builder refuses to produce a collection without this entry.
        self.contexts
            .get(DEFAULT_EXEC_GROUP)
            .unwrap_or_else(|| unreachable!("collection built without default group"))
    }

    /// A group's context, or `None` for unknown groups.
    pub fn context(&self, exec_group: &str) -> Option<&T> {
        self.contexts.get(exec_group)
    }

    pub fn has_context(&self, exec_group: &str) -> bool {
        self.contexts.contains_key(exec_group)
    }

    pub fn exec_group_names(&self) -> impl Iterator<Item = &str> {
        self.contexts.keys().map(String::as_str)
    }

    /// The union of every resolved toolchain label across all groups.
    pub fn resolved_toolchains(&self) -> BTreeSet<String> {
        self.contexts
            .values()
            .flat_map(|c| c.resolved_toolchain_labels())
            .collect()
    }

    /// The target platform of the whole collection. Safe to read off the
    /// default group because every context in a collection shares one
    /// platform.
    pub fn target_platform(&self) -> &str {
        self.default_context().target_platform()
    }

    /// Hand the contexts over to action construction.
    pub fn into_contexts(self) -> BTreeMap<String, T> {
        self.contexts
    }
}

/// Accumulates contexts for a [`ToolchainCollection`]. Single-owner and
/// transient; discarded after `build`.
#[derive(Debug)]
pub struct Builder<T> {
    contexts: BTreeMap<String, T>,
}

impl<T: ToolchainContext> Builder<T> {
    pub fn new() -> Self {
        Self {
            contexts: BTreeMap::new(),
        }
    }

    /// Add one group's context. Each group may be added once.
    pub fn add_context(
        &mut self,
        exec_group: impl Into<String>,
        context: T,
    ) -> Result<(), ToolchainError> {
        let exec_group = exec_group.into();
        if self.contexts.contains_key(&exec_group) {
            return Err(ToolchainError::DuplicateExecGroup(exec_group));
        }
        self.contexts.insert(exec_group, context);
        Ok(())
    }

    /// Add the default group's context.
    pub fn add_default_context(&mut self, context: T) -> Result<(), ToolchainError> {
        self.add_context(DEFAULT_EXEC_GROUP, context)
    }

    pub fn build(self) -> Result<ToolchainCollection<T>, ToolchainError> {
        if !self.contexts.contains_key(DEFAULT_EXEC_GROUP) {
            return Err(ToolchainError::MissingDefaultGroup);
        }
        Ok(ToolchainCollection {
            contexts: self.contexts,
        })
    }
}

impl<T: ToolchainContext> Default for Builder<T> {
    fn default() -> Self {
        Self::new()
    }
}
