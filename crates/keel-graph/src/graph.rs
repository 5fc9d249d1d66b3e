//! The node table and evaluation driver.

use crate::{CancelToken, Computation, EvalError, GraphResult};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Recover the guard from a poisoned lock; node state stays consistent
/// because every transition is a single assignment.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lifecycle of one node. `prev_deps`/`deps` always hold the dependency set
/// recorded by the most recent completed run, so stale reverse edges can be
/// unlinked when the next run publishes.
enum NodeState<C: Computation> {
    /// Never computed, or invalidated since the last run.
    Dirty { prev_deps: Vec<C::Key> },
    /// A computation is in flight; waiters block on the node's condvar.
    InFlight { prev_deps: Vec<C::Key> },
    Done {
        value: C::Value,
        deps: Vec<C::Key>,
    },
    Failed {
        error: EvalError<C::Key, C::Error>,
        deps: Vec<C::Key>,
    },
}

struct NodeCell<C: Computation> {
    state: Mutex<NodeState<C>>,
    ready: Condvar,
    /// Keys whose most recent run read this node.
    rdeps: Mutex<HashSet<C::Key>>,
}

impl<C: Computation> NodeCell<C> {
    fn new() -> Self {
        Self {
            state: Mutex::new(NodeState::Dirty {
                prev_deps: Vec::new(),
            }),
            ready: Condvar::new(),
            rdeps: Mutex::new(HashSet::new()),
        }
    }
}

/// The shared evaluation graph.
///
/// The node table is the only structure shared across evaluations; all
/// per-node mutation happens under that node's own lock, so evaluations of
/// different keys only contend on table insertion.
pub struct EvalGraph<C: Computation> {
    computer: C,
    nodes: DashMap<C::Key, Arc<NodeCell<C>>>,
}

impl<C: Computation> EvalGraph<C> {
    pub fn new(computer: C) -> Self {
        Self {
            computer,
            nodes: DashMap::new(),
        }
    }

    /// The registered computation dispatcher.
    pub fn computer(&self) -> &C {
        &self.computer
    }

    /// Evaluate a key, reusing the cached value when the node is clean.
    pub fn evaluate(&self, key: &C::Key) -> GraphResult<C> {
        self.evaluate_with(key, &CancelToken::new())
    }

    /// Evaluate a key under a cancel token.
    pub fn evaluate_with(&self, key: &C::Key, cancel: &CancelToken) -> GraphResult<C> {
        self.eval_node(key, cancel, &[])
    }

    /// Mark a node and its transitive dependents dirty. The next request for
    /// any of them re-runs its computation.
    ///
    /// Invalidation is meant to be sequenced between evaluation batches;
    /// nodes currently in flight are left untouched.
    pub fn invalidate(&self, key: &C::Key) {
        let mut stack = vec![key.clone()];
        let mut seen = HashSet::new();
        while let Some(k) = stack.pop() {
            if !seen.insert(k.clone()) {
                continue;
            }
            let Some(cell) = self.nodes.get(&k).map(|c| Arc::clone(&c)) else {
                continue;
            };
            let mut state = lock(&cell.state);
            let taken = std::mem::replace(
                &mut *state,
                NodeState::Dirty {
                    prev_deps: Vec::new(),
                },
            );
            match taken {
                NodeState::Done { deps, .. } | NodeState::Failed { deps, .. } => {
                    *state = NodeState::Dirty { prev_deps: deps };
                    drop(state);
                    debug!(key = ?k, "node invalidated");
                    stack.extend(lock(&cell.rdeps).iter().cloned());
                }
                other => {
                    // Already dirty (dependents were dirtied when it was) or
                    // in flight (left for the driver to re-request).
                    *state = other;
                }
            }
        }
    }

    /// Drop every node: a full invalidation.
    pub fn reset(&self) {
        self.nodes.clear();
    }

    /// Number of nodes currently in the table.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Peek at a node's cached value without computing.
    pub fn value_of(&self, key: &C::Key) -> Option<C::Value> {
        let cell = self.nodes.get(key).map(|c| Arc::clone(&c))?;
        let state = lock(&cell.state);
        match &*state {
            NodeState::Done { value, .. } => Some(value.clone()),
            _ => None,
        }
    }

    /// The dependency set recorded by a node's most recent completed run.
    pub fn deps_of(&self, key: &C::Key) -> Option<Vec<C::Key>> {
        let cell = self.nodes.get(key).map(|c| Arc::clone(&c))?;
        let state = lock(&cell.state);
        match &*state {
            NodeState::Done { deps, .. } | NodeState::Failed { deps, .. } => Some(deps.clone()),
            _ => None,
        }
    }

    fn eval_node(&self, key: &C::Key, cancel: &CancelToken, path: &[C::Key]) -> GraphResult<C> {
        if cancel.is_cancelled() {
            return Err(EvalError::Cancelled);
        }
        if let Some(pos) = path.iter().position(|k| k == key) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(key.clone());
            return Err(EvalError::Cycle(cycle));
        }

        let cell = Arc::clone(
            &self
                .nodes
                .entry(key.clone())
                .or_insert_with(|| Arc::new(NodeCell::new())),
        );

        let prev_deps = {
            let mut state = lock(&cell.state);
            loop {
                match &mut *state {
                    NodeState::Done { value, .. } => {
                        trace!(?key, "cache hit");
                        return Ok(value.clone());
                    }
                    NodeState::Failed { error, .. } => {
                        trace!(?key, "cached failure");
                        return Err(error.clone());
                    }
                    NodeState::Dirty { prev_deps } => {
                        let prev = std::mem::take(prev_deps);
                        *state = NodeState::InFlight {
                            prev_deps: prev.clone(),
                        };
                        break prev;
                    }
                    NodeState::InFlight { .. } => {
                        state = cell
                            .ready
                            .wait(state)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                }
            }
        };

        self.run_compute(key, &cell, prev_deps, cancel, path)
    }

    fn run_compute(
        &self,
        key: &C::Key,
        cell: &NodeCell<C>,
        prev_deps: Vec<C::Key>,
        cancel: &CancelToken,
        path: &[C::Key],
    ) -> GraphResult<C> {
        debug!(?key, "computing");
        let mut child_path = path.to_vec();
        child_path.push(key.clone());
        let ctx = EvalContext {
            graph: self,
            cancel,
            path: child_path,
            deps: Mutex::new(Vec::new()),
        };

        let result = self.computer.compute(key, &ctx);

        let mut new_deps = ctx.deps.into_inner().unwrap_or_else(PoisonError::into_inner);
        let mut seen = HashSet::new();
        new_deps.retain(|k| seen.insert(k.clone()));

        let publish_edges = {
            let mut state = lock(&cell.state);
            match &result {
                Ok(value) => {
                    *state = NodeState::Done {
                        value: value.clone(),
                        deps: new_deps.clone(),
                    };
                    true
                }
                Err(EvalError::Cancelled) => {
                    // Abandoned mid-flight: dirty-but-uncached, old edges
                    // stay in place until the next completed run.
                    *state = NodeState::Dirty {
                        prev_deps: prev_deps.clone(),
                    };
                    false
                }
                Err(error) => {
                    *state = NodeState::Failed {
                        error: error.clone(),
                        deps: new_deps.clone(),
                    };
                    true
                }
            }
        };
        cell.ready.notify_all();

        if publish_edges {
            self.relink(key, &prev_deps, &new_deps);
        }
        result
    }

    /// Replace the reverse edges of `key`'s previous run with the newly
    /// recorded dependency set.
    fn relink(&self, key: &C::Key, prev_deps: &[C::Key], new_deps: &[C::Key]) {
        for dep in prev_deps {
            if !new_deps.contains(dep)
                && let Some(cell) = self.nodes.get(dep)
            {
                lock(&cell.rdeps).remove(key);
            }
        }
        for dep in new_deps {
            if let Some(cell) = self.nodes.get(dep) {
                lock(&cell.rdeps).insert(key.clone());
            }
        }
    }
}

/// The evaluation context handed to a computation.
///
/// Reading another key through [`evaluate`](EvalContext::evaluate) records it
/// as a dependency of the key being computed and extends the active path used
/// for cycle detection.
pub struct EvalContext<'a, C: Computation> {
    graph: &'a EvalGraph<C>,
    cancel: &'a CancelToken,
    path: Vec<C::Key>,
    deps: Mutex<Vec<C::Key>>,
}

impl<C: Computation> EvalContext<'_, C> {
    /// Evaluate a dependency, recording the edge.
    pub fn evaluate(&self, key: &C::Key) -> GraphResult<C> {
        lock(&self.deps).push(key.clone());
        self.graph.eval_node(key, self.cancel, &self.path)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    #[derive(Debug, Clone, thiserror::Error)]
    #[error("compute failed: {0}")]
    struct TestError(String);

    #[derive(Clone, Default)]
    struct Spec {
        deps: Vec<&'static str>,
        base: i64,
        fail: bool,
        delay: Option<Duration>,
    }

    /// Sums a node's base value with its dependencies' values.
    struct TestComputer {
        defs: Mutex<HashMap<&'static str, Spec>>,
        counts: Mutex<HashMap<&'static str, usize>>,
    }

    impl TestComputer {
        fn new(defs: &[(&'static str, Spec)]) -> Self {
            Self {
                defs: Mutex::new(defs.iter().cloned().collect()),
                counts: Mutex::new(HashMap::new()),
            }
        }

        fn count(&self, key: &str) -> usize {
            *lock(&self.counts).get(key).unwrap_or(&0)
        }

        fn set(&self, key: &'static str, spec: Spec) {
            lock(&self.defs).insert(key, spec);
        }
    }

    impl Computation for TestComputer {
        type Key = &'static str;
        type Value = i64;
        type Error = TestError;

        fn compute(
            &self,
            key: &&'static str,
            ctx: &EvalContext<'_, Self>,
        ) -> Result<i64, EvalError<&'static str, TestError>> {
            *lock(&self.counts).entry(*key).or_insert(0) += 1;
            let spec = lock(&self.defs)
                .get(key)
                .cloned()
                .ok_or_else(|| TestError(format!("no definition for {key}")))?;
            if let Some(delay) = spec.delay {
                std::thread::sleep(delay);
            }
            if spec.fail {
                return Err(TestError(format!("{key} is broken")).into());
            }
            let mut total = spec.base;
            for dep in &spec.deps {
                total += ctx.evaluate(dep)?;
            }
            Ok(total)
        }
    }

    fn spec(deps: &[&'static str], base: i64) -> Spec {
        Spec {
            deps: deps.to_vec(),
            base,
            ..Spec::default()
        }
    }

    #[test]
    fn test_memoization() {
        let graph = EvalGraph::new(TestComputer::new(&[
            ("a", spec(&["b"], 1)),
            ("b", spec(&[], 10)),
        ]));

        assert_eq!(graph.evaluate(&"a").unwrap(), 11);
        assert_eq!(graph.evaluate(&"a").unwrap(), 11);
        assert_eq!(graph.computer().count("a"), 1);
        assert_eq!(graph.computer().count("b"), 1);
    }

    #[test]
    fn test_dependency_recording() {
        let graph = EvalGraph::new(TestComputer::new(&[
            ("a", spec(&["b", "c"], 0)),
            ("b", spec(&[], 1)),
            ("c", spec(&[], 2)),
        ]));

        graph.evaluate(&"a").unwrap();
        assert_eq!(graph.deps_of(&"a").unwrap(), vec!["b", "c"]);
        assert_eq!(graph.deps_of(&"b").unwrap(), Vec::<&str>::new());
    }

    #[test]
    fn test_invalidation_recomputes_dependents() {
        let graph = EvalGraph::new(TestComputer::new(&[
            ("a", spec(&["b"], 1)),
            ("b", spec(&[], 10)),
        ]));

        assert_eq!(graph.evaluate(&"a").unwrap(), 11);

        graph.computer().set("b", spec(&[], 20));
        graph.invalidate(&"b");

        assert_eq!(graph.evaluate(&"a").unwrap(), 21);
        assert_eq!(graph.computer().count("a"), 2);
        assert_eq!(graph.computer().count("b"), 2);
    }

    #[test]
    fn test_restart_may_change_dependency_set() {
        let graph = EvalGraph::new(TestComputer::new(&[
            ("a", spec(&["b"], 0)),
            ("b", spec(&[], 1)),
            ("c", spec(&[], 2)),
        ]));

        graph.evaluate(&"a").unwrap();
        assert_eq!(graph.deps_of(&"a").unwrap(), vec!["b"]);

        graph.computer().set("a", spec(&["c"], 0));
        graph.invalidate(&"a");
        assert_eq!(graph.evaluate(&"a").unwrap(), 2);
        assert_eq!(graph.deps_of(&"a").unwrap(), vec!["c"]);

        // The stale reverse edge is gone: changing b no longer disturbs a.
        graph.invalidate(&"b");
        assert_eq!(graph.evaluate(&"a").unwrap(), 2);
        assert_eq!(graph.computer().count("a"), 2);
    }

    #[test]
    fn test_cycle_detection() {
        let graph = EvalGraph::new(TestComputer::new(&[
            ("a", spec(&["b"], 0)),
            ("b", spec(&["a"], 0)),
        ]));

        match graph.evaluate(&"a") {
            Err(EvalError::Cycle(cycle)) => {
                assert_eq!(cycle.first(), Some(&"a"));
                assert_eq!(cycle.last(), Some(&"a"));
                assert!(cycle.contains(&"b"));
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_self_cycle() {
        let graph = EvalGraph::new(TestComputer::new(&[("a", spec(&["a"], 0))]));
        match graph.evaluate(&"a") {
            Err(EvalError::Cycle(cycle)) => assert_eq!(cycle, vec!["a", "a"]),
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_parallel_requests_compute_once() {
        let graph = Arc::new(EvalGraph::new(TestComputer::new(&[(
            "slow",
            Spec {
                base: 42,
                delay: Some(Duration::from_millis(50)),
                ..Spec::default()
            },
        )])));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let graph = Arc::clone(&graph);
                std::thread::spawn(move || graph.evaluate(&"slow").unwrap())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 42);
        }
        assert_eq!(graph.computer().count("slow"), 1);
    }

    #[test]
    fn test_failure_not_treated_as_value() {
        let graph = EvalGraph::new(TestComputer::new(&[(
            "f",
            Spec {
                fail: true,
                ..Spec::default()
            },
        )]));

        assert!(matches!(
            graph.evaluate(&"f"),
            Err(EvalError::Compute(TestError(_)))
        ));
        assert_eq!(graph.value_of(&"f"), None);

        // The cached failure is served without a re-run.
        assert!(graph.evaluate(&"f").is_err());
        assert_eq!(graph.computer().count("f"), 1);

        // After invalidation, a fixed definition recomputes cleanly.
        graph.computer().set("f", spec(&[], 7));
        graph.invalidate(&"f");
        assert_eq!(graph.evaluate(&"f").unwrap(), 7);
    }

    #[test]
    fn test_failure_propagates_to_dependents() {
        let graph = EvalGraph::new(TestComputer::new(&[
            ("a", spec(&["f"], 1)),
            (
                "f",
                Spec {
                    fail: true,
                    ..Spec::default()
                },
            ),
        ]));

        assert!(graph.evaluate(&"a").is_err());

        // Fixing the leaf and invalidating it clears the dependent's cached
        // failure too.
        graph.computer().set("f", spec(&[], 2));
        graph.invalidate(&"f");
        assert_eq!(graph.evaluate(&"a").unwrap(), 3);
    }

    #[test]
    fn test_cancellation() {
        let graph = EvalGraph::new(TestComputer::new(&[("a", spec(&[], 5))]));
        let token = CancelToken::new();

        assert_eq!(graph.evaluate_with(&"a", &token).unwrap(), 5);

        token.cancel();
        assert!(matches!(
            graph.evaluate_with(&"a", &token),
            Err(EvalError::Cancelled)
        ));

        // Values published before cancellation stay cached.
        assert_eq!(graph.evaluate(&"a").unwrap(), 5);
        assert_eq!(graph.computer().count("a"), 1);
    }

    #[test]
    fn test_reset_drops_all_nodes() {
        let graph = EvalGraph::new(TestComputer::new(&[("a", spec(&[], 5))]));
        graph.evaluate(&"a").unwrap();
        assert_eq!(graph.node_count(), 1);

        graph.reset();
        assert_eq!(graph.node_count(), 0);
        graph.evaluate(&"a").unwrap();
        assert_eq!(graph.computer().count("a"), 2);
    }
}
