//! Repository spec resolution for keel.
//!
//! A repo spec is the concrete recipe for materializing a module's source
//! tree: where to download from and how to check what arrived. Registries
//! serve specs as JSON documents; this crate interprets those documents and
//! fingerprints the raw bytes. The actual download layer lives elsewhere;
//! here a `RegistryClient` is an abstract collaborator.

use keel_common::Hash;
use keel_resolve::{Module, ModuleKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Errors from repo-spec resolution.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Repo specs only exist for registry-origin modules.
    #[error("module {module} does not have a registry origin")]
    NonRegistryOrigin { module: ModuleKey },

    /// The registry client failed; the reason is passed through opaquely.
    #[error("registry {registry} failed for {module}: {reason}")]
    Registry {
        module: ModuleKey,
        registry: String,
        reason: String,
    },

    /// The registry served bytes that do not parse as a repo spec.
    #[error("invalid repo spec from {registry} for {module}: {reason}")]
    InvalidSpec {
        module: ModuleKey,
        registry: String,
        reason: String,
    },
}

/// A concrete, fetchable description of a module's repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "fetch", rename_all = "snake_case")]
pub enum RepoSpec {
    /// Download an archive over HTTP.
    Http {
        url: String,
        integrity: Option<Hash>,
        strip_prefix: Option<String>,
    },
    /// Check out a commit from a git repository.
    Git { url: String, commit: String },
    /// Use a local directory as-is.
    LocalPath { path: PathBuf },
}

impl RepoSpec {
    /// An HTTP archive spec.
    pub fn http(url: impl Into<String>) -> Self {
        RepoSpec::Http {
            url: url.into(),
            integrity: None,
            strip_prefix: None,
        }
    }

    /// A git checkout spec.
    pub fn git(url: impl Into<String>, commit: impl Into<String>) -> Self {
        RepoSpec::Git {
            url: url.into(),
            commit: commit.into(),
        }
    }

    /// A local directory spec.
    pub fn local_path(path: impl Into<PathBuf>) -> Self {
        RepoSpec::LocalPath { path: path.into() }
    }

    /// Set the expected archive integrity (HTTP specs only).
    pub fn with_integrity(self, integrity: Hash) -> Self {
        match self {
            RepoSpec::Http {
                url, strip_prefix, ..
            } => RepoSpec::Http {
                url,
                integrity: Some(integrity),
                strip_prefix,
            },
            other => other,
        }
    }

    /// Set the directory prefix stripped after extraction (HTTP specs only).
    pub fn with_strip_prefix(self, prefix: impl Into<String>) -> Self {
        match self {
            RepoSpec::Http {
                url, integrity, ..
            } => RepoSpec::Http {
                url,
                integrity,
                strip_prefix: Some(prefix.into()),
            },
            other => other,
        }
    }
}

/// A repo spec together with the fingerprint of the registry bytes it was
/// interpreted from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedRepoSpec {
    pub spec: RepoSpec,
    pub fingerprint: Hash,
}

/// Serves raw repo-spec documents for (module, registry) pairs.
pub trait RegistryClient: Send + Sync {
    fn repo_spec_bytes(
        &self,
        module: &ModuleKey,
        registry_url: &str,
    ) -> Result<Vec<u8>, FetchError>;
}

/// In-memory registry client for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    specs: BTreeMap<(ModuleKey, String), Vec<u8>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve a spec for a (module, registry) pair.
    pub fn add(&mut self, module: ModuleKey, registry_url: impl Into<String>, spec: &RepoSpec) {
        // Serializing a RepoSpec cannot fail; the enum has no map keys or
        // non-string tags.
        let bytes = serde_json::to_vec(spec).unwrap_or_default();
        self.specs.insert((module, registry_url.into()), bytes);
    }

    /// Serve raw bytes, valid or not.
    pub fn add_raw(
        &mut self,
        module: ModuleKey,
        registry_url: impl Into<String>,
        bytes: Vec<u8>,
    ) {
        self.specs.insert((module, registry_url.into()), bytes);
    }
}

impl RegistryClient for MemoryRegistry {
    fn repo_spec_bytes(
        &self,
        module: &ModuleKey,
        registry_url: &str,
    ) -> Result<Vec<u8>, FetchError> {
        self.specs
            .get(&(module.clone(), registry_url.to_string()))
            .cloned()
            .ok_or_else(|| FetchError::Registry {
                module: module.clone(),
                registry: registry_url.to_string(),
                reason: "module not served by this registry".to_string(),
            })
    }
}

/// The registry URL a repo spec may be resolved against, or the precondition
/// error for non-registry modules.
pub fn require_registry_origin(module: &Module) -> Result<&str, FetchError> {
    module
        .origin
        .registry_url()
        .ok_or_else(|| FetchError::NonRegistryOrigin {
            module: module.key.clone(),
        })
}

/// Interpret raw registry bytes as a repo spec, fingerprinting what was
/// served.
pub fn interpret_spec(
    module: &ModuleKey,
    registry_url: &str,
    bytes: &[u8],
) -> Result<FetchedRepoSpec, FetchError> {
    let spec = serde_json::from_slice(bytes).map_err(|e| FetchError::InvalidSpec {
        module: module.clone(),
        registry: registry_url.to_string(),
        reason: e.to_string(),
    })?;
    Ok(FetchedRepoSpec {
        spec,
        fingerprint: Hash::of(bytes),
    })
}

/// Fetch and interpret the repo spec for a (module, registry) pair.
pub fn resolve_repo_spec(
    module: &ModuleKey,
    registry_url: &str,
    client: &dyn RegistryClient,
) -> Result<FetchedRepoSpec, FetchError> {
    debug!(module = %module, registry = registry_url, "resolving repo spec");
    let bytes = client.repo_spec_bytes(module, registry_url)?;
    interpret_spec(module, registry_url, &bytes)
}
