//! End-to-end flow through the engine: dependency graph, repo specs, and
//! toolchain collection for one workspace, then an incremental change.

use keel_common::{Version, VersionConstraint};
use keel_engine::{BuildError, Engine, EngineError};
use keel_fetch::{FetchError, MemoryRegistry, RegistryClient, RepoSpec};
use keel_graph::EvalError;
use keel_resolve::{
    MemoryLoader, Module, ModuleKey, ModuleLoader, ModuleOverride, OverrideSet,
};
use keel_toolchain::{
    ResolvedToolchainContext, ToolchainError, ToolchainResolver, DEFAULT_EXEC_GROUP,
};
use std::sync::{Arc, Mutex};

const REGISTRY: &str = "https://registry.test";

fn caret(s: &str) -> VersionConstraint {
    VersionConstraint::parse(s).unwrap()
}

fn v(s: &str) -> Version {
    Version::parse(s).unwrap()
}

/// A loader whose contents can change between builds.
struct SharedLoader(Mutex<MemoryLoader>);

impl ModuleLoader for SharedLoader {
    fn root_module(&self) -> Result<Module, keel_resolve::LoadError> {
        self.0.lock().unwrap().root_module()
    }

    fn versions(&self, name: &str) -> Result<Vec<Version>, keel_resolve::LoadError> {
        self.0.lock().unwrap().versions(name)
    }

    fn load(&self, key: &ModuleKey) -> Result<Module, keel_resolve::LoadError> {
        self.0.lock().unwrap().load(key)
    }

    fn load_override(
        &self,
        name: &str,
        ov: &ModuleOverride,
    ) -> Result<Module, keel_resolve::LoadError> {
        self.0.lock().unwrap().load_override(name, ov)
    }
}

struct Toolchains;

impl ToolchainResolver for Toolchains {
    fn resolve(&self, exec_group: &str) -> Result<ResolvedToolchainContext, ToolchainError> {
        Ok(ResolvedToolchainContext::new("//platforms:linux_x86_64")
            .with_toolchain("//tools:cc", format!("//tc:cc_{exec_group}")))
    }
}

fn workspace() -> (Arc<SharedLoader>, Engine) {
    let root = Module::local("workspace", v("0.1.0"), "/workspace")
        .with_dep("rules_cc", caret("1.0"))
        .with_dep("platforms", caret("0.10"));
    let mut loader = MemoryLoader::new(root);
    loader.add(
        Module::registry("rules_cc", v("1.0.2"), REGISTRY).with_dep("platforms", caret("0.10")),
    );
    loader.add(Module::registry("platforms", v("0.10.0"), REGISTRY));
    loader.add(Module::registry("platforms", v("0.10.4"), REGISTRY));
    let loader = Arc::new(SharedLoader(Mutex::new(loader)));

    let mut registry = MemoryRegistry::new();
    registry.add(
        ModuleKey::new("rules_cc", v("1.0.2")),
        REGISTRY,
        &RepoSpec::http("https://mirror.test/rules_cc-1.0.2.tar.gz")
            .with_strip_prefix("rules_cc-1.0.2"),
    );
    registry.add(
        ModuleKey::new("platforms", v("0.10.4")),
        REGISTRY,
        &RepoSpec::http("https://mirror.test/platforms-0.10.4.tar.gz"),
    );
    registry.add(
        ModuleKey::new("platforms", v("0.10.5")),
        REGISTRY,
        &RepoSpec::http("https://mirror.test/platforms-0.10.5.tar.gz"),
    );

    let engine = Engine::new(
        Arc::clone(&loader) as Arc<dyn ModuleLoader>,
        Arc::new(registry) as Arc<dyn RegistryClient>,
        Arc::new(Toolchains),
    );
    (loader, engine)
}

#[test]
fn full_build_request_flow() {
    let (_, engine) = workspace();

    // Dependency graph: one version per name, edges rewritten.
    let graph = engine.dep_graph().unwrap();
    assert_eq!(graph.len(), 3);
    let platforms = ModuleKey::new("platforms", v("0.10.4"));
    assert!(graph.contains(&platforms));

    // A repo spec for every registry-origin module in the graph.
    for (key, entry) in graph.iter() {
        if let Some(url) = entry.module.origin.registry_url() {
            let fetched = engine.repo_spec(key, url).unwrap();
            assert!(matches!(fetched.spec, RepoSpec::Http { .. }));
        }
    }

    // The root module has no registry origin, so no repo spec.
    assert!(matches!(
        engine.repo_spec(graph.root(), REGISTRY),
        Err(EvalError::Compute(BuildError::Fetch(
            FetchError::NonRegistryOrigin { .. }
        )))
    ));

    // Toolchains for the target's exec groups.
    let collection = engine
        .toolchain_collection(&[DEFAULT_EXEC_GROUP, "test"])
        .unwrap();
    assert_eq!(collection.target_platform(), "//platforms:linux_x86_64");
    assert_eq!(collection.resolved_toolchains().len(), 2);
}

#[test]
fn incremental_rebuild_after_version_bump() {
    let (loader, engine) = workspace();

    let before = engine.dep_graph().unwrap();
    assert!(before.contains(&ModuleKey::new("platforms", v("0.10.4"))));

    // A new platforms version is published.
    loader
        .0
        .lock()
        .unwrap()
        .add(Module::registry("platforms", v("0.10.5"), REGISTRY));
    engine.invalidate_versions("platforms");

    let after = engine.dep_graph().unwrap();
    let bumped = ModuleKey::new("platforms", v("0.10.5"));
    assert!(after.contains(&bumped));
    assert!(!after.contains(&ModuleKey::new("platforms", v("0.10.4"))));

    // The new module's repo spec resolves against its own cache entry.
    let fetched = engine.repo_spec(&bumped, REGISTRY).unwrap();
    assert!(matches!(fetched.spec, RepoSpec::Http { .. }));
}

#[test]
fn engine_honors_overrides() {
    let (loader, _) = workspace();
    loader
        .0
        .lock()
        .unwrap()
        .add(Module::registry("platforms", v("3.0.0"), REGISTRY));

    let mut overrides = OverrideSet::new();
    overrides.insert(
        "platforms",
        ModuleOverride::Pin {
            version: v("3.0.0"),
        },
    );

    let registry = MemoryRegistry::new();
    let engine = Engine::builder(
        Arc::clone(&loader) as Arc<dyn ModuleLoader>,
        Arc::new(registry) as Arc<dyn RegistryClient>,
        Arc::new(Toolchains),
    )
    .with_overrides(overrides)
    .build();

    let graph = engine.dep_graph().unwrap();
    assert!(graph.contains(&ModuleKey::new("platforms", v("3.0.0"))));
}

#[test]
fn repeated_requests_are_idempotent() {
    let (_, engine) = workspace();

    let first: Vec<_> = (0..3).map(|_| engine.dep_graph().unwrap()).collect();
    assert!(first.windows(2).all(|pair| pair[0] == pair[1]));

    let err: EngineError = engine
        .repo_spec(&ModuleKey::new("missing", v("1.0.0")), REGISTRY)
        .unwrap_err();
    assert!(matches!(err, EvalError::Compute(BuildError::Resolve(_))));
}
