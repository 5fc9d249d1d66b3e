//! Incremental memoized evaluation for keel.
//!
//! This crate provides the evaluation graph that the resolution algorithms
//! run on top of:
//! - `EvalGraph`: a shared table of nodes, one per computation key, holding
//!   cached values and the dependency edges discovered while computing them
//! - `Computation`: the dispatch trait a client implements for its closed
//!   set of key kinds
//! - `EvalContext`: handed to computations so nested reads go through the
//!   graph and are recorded as dependencies
//!
//! Evaluation is demand-driven and parallel: many threads may request keys
//! concurrently, at most one computation is ever in flight per key, and a
//! node whose dependency changed is re-run on next request.

mod graph;

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

pub use graph::{EvalContext, EvalGraph};

/// A client of the evaluation graph: the closed set of computations that can
/// run on it.
///
/// `compute` is invoked at most once per in-flight key; every value it reads
/// through [`EvalContext::evaluate`] is recorded as a dependency of `key`.
pub trait Computation: Send + Sync + Sized + 'static {
    type Key: Clone + Eq + std::hash::Hash + Debug + Send + Sync + 'static;
    type Value: Clone + Send + Sync + 'static;
    type Error: std::error::Error + Clone + Send + Sync + 'static;

    fn compute(
        &self,
        key: &Self::Key,
        ctx: &EvalContext<'_, Self>,
    ) -> Result<Self::Value, EvalError<Self::Key, Self::Error>>;
}

/// Result alias for graph evaluations of a given computation.
pub type GraphResult<C> = Result<
    <C as Computation>::Value,
    EvalError<<C as Computation>::Key, <C as Computation>::Error>,
>;

/// Errors produced by the evaluation graph itself, or propagated from a
/// computation.
#[derive(Debug, Clone, Error)]
pub enum EvalError<K: Debug, E: std::error::Error> {
    /// A computation transitively requested its own key. Carries the full
    /// cycle in evaluation order, first and last entries being the repeated
    /// key.
    #[error("dependency cycle detected: {0:?}")]
    Cycle(Vec<K>),

    /// The request was issued after its cancel token fired.
    #[error("evaluation cancelled")]
    Cancelled,

    /// The computation function failed.
    #[error(transparent)]
    Compute(#[from] E),
}

/// Cooperative cancellation for a batch of evaluations.
///
/// Once fired, new requests against the graph fail with
/// [`EvalError::Cancelled`]; computations already in flight run to completion
/// and their published values remain valid.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
