//! The engine: computations registered against the evaluation graph, and the
//! facade the surrounding build tool calls.

use crate::key::{BuildError, BuildKey, BuildValue};
use keel_common::{Interned, Interner, Version};
use keel_fetch::{require_registry_origin, resolve_repo_spec, FetchedRepoSpec, RegistryClient};
use keel_graph::{CancelToken, Computation, EvalContext, EvalError, EvalGraph};
use keel_resolve::{
    discover, select, DependencyGraph, DiscoveredGraph, DiscoverySource, Module, ModuleKey,
    ModuleLoader, ModuleOverride, OverrideSet, ResolveError, ResolvePolicy,
};
use keel_toolchain::{ResolvedToolchainContext, ToolchainCollection, ToolchainError,
    ToolchainResolver};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Errors surfacing from engine evaluations.
pub type EngineError = EvalError<Interned<BuildKey>, BuildError>;

fn resolve_err(e: impl Into<ResolveError>) -> EngineError {
    EvalError::Compute(BuildError::Resolve(e.into()))
}

fn fetch_err(e: keel_fetch::FetchError) -> EngineError {
    EvalError::Compute(BuildError::Fetch(e))
}

fn toolchain_err(e: ToolchainError) -> EngineError {
    EvalError::Compute(BuildError::Toolchain(e))
}

/// Error type threaded through discovery when it runs over graph
/// computations: either a graph-level failure from a nested evaluation or a
/// resolution failure raised by discovery itself.
#[derive(Debug, thiserror::Error)]
enum SourceError {
    #[error(transparent)]
    Eval(EngineError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

impl SourceError {
    fn into_eval(self) -> EngineError {
        match self {
            SourceError::Eval(e) => e,
            SourceError::Resolve(e) => resolve_err(e),
        }
    }
}

/// The dispatch table: one computation per key kind.
pub struct EngineComputer {
    loader: Arc<dyn ModuleLoader>,
    registry: Arc<dyn RegistryClient>,
    toolchains: Arc<dyn ToolchainResolver>,
    overrides: OverrideSet,
    policy: ResolvePolicy,
    keys: Arc<Interner<BuildKey>>,
}

impl EngineComputer {
    fn eval_module(
        &self,
        ctx: &EvalContext<'_, Self>,
        key: BuildKey,
    ) -> Result<Module, EngineError> {
        match ctx.evaluate(&self.keys.intern(key))? {
            BuildValue::Module(module) => Ok(module),
            other => Err(internal_value(&other)),
        }
    }
}

fn internal_value(value: &BuildValue) -> EngineError {
    EvalError::Compute(BuildError::Internal(format!(
        "unexpected value kind {value:?}"
    )))
}

impl Computation for EngineComputer {
    type Key = Interned<BuildKey>;
    type Value = BuildValue;
    type Error = BuildError;

    fn compute(
        &self,
        key: &Interned<BuildKey>,
        ctx: &EvalContext<'_, Self>,
    ) -> Result<BuildValue, EngineError> {
        match &**key {
            BuildKey::RootModule => {
                let module = self.loader.root_module().map_err(resolve_err)?;
                Ok(BuildValue::Module(module))
            }
            BuildKey::ModuleFile(module_key) => {
                let module = self.loader.load(module_key).map_err(resolve_err)?;
                Ok(BuildValue::Module(module))
            }
            BuildKey::OverrideModule(name) => {
                let Some(ov) = self.overrides.get(name) else {
                    return Err(EvalError::Compute(BuildError::Internal(format!(
                        "no override registered for '{name}'"
                    ))));
                };
                let module = self
                    .loader
                    .load_override(name, ov)
                    .map_err(resolve_err)?;
                Ok(BuildValue::Module(module))
            }
            BuildKey::ModuleVersions(name) => {
                let versions = self.loader.versions(name).map_err(resolve_err)?;
                Ok(BuildValue::Versions(versions))
            }
            BuildKey::Discovery => {
                let root = self.eval_module(ctx, BuildKey::RootModule)?;
                let mut source = GraphSource {
                    computer: self,
                    ctx,
                };
                let raw = discover(root, &self.overrides, &mut source)
                    .map_err(SourceError::into_eval)?;
                Ok(BuildValue::Discovered(raw))
            }
            BuildKey::Selection => {
                match ctx.evaluate(&self.keys.intern(BuildKey::Discovery))? {
                    BuildValue::Discovered(raw) => {
                        let graph = select(&raw, &self.overrides, &self.policy)
                            .map_err(resolve_err)?;
                        Ok(BuildValue::Selected(graph))
                    }
                    other => Err(internal_value(&other)),
                }
            }
            BuildKey::RepoSpec {
                module,
                registry_url,
            } => {
                let fetched = resolve_repo_spec(module, registry_url, self.registry.as_ref())
                    .map_err(fetch_err)?;
                Ok(BuildValue::RepoSpec(fetched))
            }
            BuildKey::Toolchain { exec_group } => {
                let context = self
                    .toolchains
                    .resolve(exec_group)
                    .map_err(toolchain_err)?;
                Ok(BuildValue::Toolchain(context))
            }
        }
    }
}

/// Routes discovery's declaration loads and version listings through the
/// graph, so each becomes its own memoized node.
struct GraphSource<'a, 'g> {
    computer: &'a EngineComputer,
    ctx: &'a EvalContext<'g, EngineComputer>,
}

impl DiscoverySource for GraphSource<'_, '_> {
    type Error = SourceError;

    fn versions(&mut self, name: &str) -> Result<Vec<Version>, SourceError> {
        let key = self
            .computer
            .keys
            .intern(BuildKey::ModuleVersions(name.to_string()));
        match self.ctx.evaluate(&key).map_err(SourceError::Eval)? {
            BuildValue::Versions(versions) => Ok(versions),
            other => Err(SourceError::Eval(internal_value(&other))),
        }
    }

    fn module(&mut self, key: &ModuleKey) -> Result<Module, SourceError> {
        self.computer
            .eval_module(self.ctx, BuildKey::ModuleFile(key.clone()))
            .map_err(SourceError::Eval)
    }

    fn override_module(
        &mut self,
        name: &str,
        _ov: &ModuleOverride,
    ) -> Result<Module, SourceError> {
        self.computer
            .eval_module(self.ctx, BuildKey::OverrideModule(name.to_string()))
            .map_err(SourceError::Eval)
    }
}

/// Configures and constructs an [`Engine`].
pub struct EngineBuilder {
    loader: Arc<dyn ModuleLoader>,
    registry: Arc<dyn RegistryClient>,
    toolchains: Arc<dyn ToolchainResolver>,
    overrides: OverrideSet,
    policy: ResolvePolicy,
}

impl EngineBuilder {
    pub fn with_override(mut self, name: impl Into<String>, ov: ModuleOverride) -> Self {
        self.overrides.insert(name, ov);
        self
    }

    pub fn with_overrides(mut self, overrides: OverrideSet) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_policy(mut self, policy: ResolvePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> Engine {
        let keys = Arc::new(Interner::new());
        let computer = EngineComputer {
            loader: self.loader,
            registry: self.registry,
            toolchains: self.toolchains,
            overrides: self.overrides,
            policy: self.policy,
            keys: Arc::clone(&keys),
        };
        Engine {
            graph: EvalGraph::new(computer),
            keys,
            cancel: Mutex::new(CancelToken::new()),
        }
    }
}

/// The dependency-resolution engine.
///
/// Owns the key interner and the evaluation graph for the lifetime of the
/// process; results are memoized across requests and recomputed only after an
/// input is invalidated.
pub struct Engine {
    graph: EvalGraph<EngineComputer>,
    keys: Arc<Interner<BuildKey>>,
    cancel: Mutex<CancelToken>,
}

impl Engine {
    pub fn builder(
        loader: Arc<dyn ModuleLoader>,
        registry: Arc<dyn RegistryClient>,
        toolchains: Arc<dyn ToolchainResolver>,
    ) -> EngineBuilder {
        EngineBuilder {
            loader,
            registry,
            toolchains,
            overrides: OverrideSet::new(),
            policy: ResolvePolicy::default(),
        }
    }

    pub fn new(
        loader: Arc<dyn ModuleLoader>,
        registry: Arc<dyn RegistryClient>,
        toolchains: Arc<dyn ToolchainResolver>,
    ) -> Self {
        Self::builder(loader, registry, toolchains).build()
    }

    fn token(&self) -> CancelToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn eval(&self, key: BuildKey) -> Result<BuildValue, EngineError> {
        let key = self.keys.intern(key);
        self.graph.evaluate_with(&key, &self.token())
    }

    /// The raw dependency graph reachable from the root module.
    pub fn discovered_graph(&self) -> Result<DiscoveredGraph, EngineError> {
        match self.eval(BuildKey::Discovery)? {
            BuildValue::Discovered(graph) => Ok(graph),
            other => Err(internal_value(&other)),
        }
    }

    /// The final dependency graph after version selection.
    pub fn dep_graph(&self) -> Result<DependencyGraph, EngineError> {
        match self.eval(BuildKey::Selection)? {
            BuildValue::Selected(graph) => Ok(graph),
            other => Err(internal_value(&other)),
        }
    }

    /// The repo spec for a module as served by one registry.
    ///
    /// The module must be present in the selected graph with a registry
    /// origin; repo specs do not exist for modules supplied by non-registry
    /// overrides.
    pub fn repo_spec(
        &self,
        module: &ModuleKey,
        registry_url: &str,
    ) -> Result<FetchedRepoSpec, EngineError> {
        let graph = self.dep_graph()?;
        let Some(entry) = graph.get(module) else {
            return Err(resolve_err(ResolveError::ModuleNotFound {
                name: module.name.clone(),
            }));
        };
        require_registry_origin(&entry.module).map_err(fetch_err)?;

        match self.eval(BuildKey::RepoSpec {
            module: module.clone(),
            registry_url: registry_url.to_string(),
        })? {
            BuildValue::RepoSpec(fetched) => Ok(fetched),
            other => Err(internal_value(&other)),
        }
    }

    /// Aggregate the toolchain contexts for a target's execution groups.
    ///
    /// Collections are built per call and never cached in the graph; the
    /// per-group contexts behind them are.
    pub fn toolchain_collection(
        &self,
        exec_groups: &[&str],
    ) -> Result<ToolchainCollection<ResolvedToolchainContext>, EngineError> {
        let mut builder = ToolchainCollection::builder();
        for group in exec_groups {
            match self.eval(BuildKey::Toolchain {
                exec_group: group.to_string(),
            })? {
                BuildValue::Toolchain(context) => builder
                    .add_context(*group, context)
                    .map_err(toolchain_err)?,
                other => return Err(internal_value(&other)),
            }
        }
        builder.build().map_err(toolchain_err)
    }

    /// Note that a module's declaration changed; dependents recompute on
    /// their next request.
    pub fn invalidate_module(&self, key: &ModuleKey) {
        debug!(module = %key, "invalidating module declaration");
        self.graph
            .invalidate(&self.keys.intern(BuildKey::ModuleFile(key.clone())));
    }

    /// Note that the registry version listing for a name changed.
    pub fn invalidate_versions(&self, name: &str) {
        self.graph
            .invalidate(&self.keys.intern(BuildKey::ModuleVersions(name.to_string())));
    }

    /// Note that the root module declaration changed.
    pub fn invalidate_root(&self) {
        self.graph.invalidate(&self.keys.intern(BuildKey::RootModule));
    }

    /// Note that one exec group's toolchain resolution changed.
    pub fn invalidate_toolchain(&self, exec_group: &str) {
        self.graph.invalidate(&self.keys.intern(BuildKey::Toolchain {
            exec_group: exec_group.to_string(),
        }));
    }

    /// Abort the current batch of requests. In-flight computations run to
    /// completion and stay cached; new requests fail until [`resume`].
    ///
    /// [`resume`]: Engine::resume
    pub fn cancel(&self) {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    /// Accept requests again after a [`cancel`](Engine::cancel).
    pub fn resume(&self) {
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = CancelToken::new();
    }

    /// Full invalidation: drop every node and every interned key.
    pub fn reset(&self) {
        self.graph.reset();
        self.keys.clear();
    }

    /// Number of nodes currently cached in the graph.
    pub fn cached_nodes(&self) -> usize {
        self.graph.node_count()
    }
}
