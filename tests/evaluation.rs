//! Integration tests for the keel-graph crate.

use keel_common::Interner;
use keel_graph::{CancelToken, Computation, EvalContext, EvalError, EvalGraph};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, thiserror::Error)]
#[error("undefined cell: {0}")]
struct CellError(String);

/// A tiny spreadsheet: each cell is a literal or a sum of other cells.
#[derive(Clone)]
enum Cell {
    Literal(i64),
    Sum(Vec<&'static str>),
}

struct Sheet {
    cells: Mutex<HashMap<&'static str, Cell>>,
    computes: Mutex<HashMap<&'static str, usize>>,
}

impl Sheet {
    fn new(cells: &[(&'static str, Cell)]) -> Self {
        Self {
            cells: Mutex::new(cells.iter().cloned().collect()),
            computes: Mutex::new(HashMap::new()),
        }
    }

    fn set(&self, name: &'static str, cell: Cell) {
        self.cells.lock().unwrap().insert(name, cell);
    }

    fn computes(&self, name: &str) -> usize {
        *self.computes.lock().unwrap().get(name).unwrap_or(&0)
    }
}

impl Computation for Sheet {
    type Key = &'static str;
    type Value = i64;
    type Error = CellError;

    fn compute(
        &self,
        key: &&'static str,
        ctx: &EvalContext<'_, Self>,
    ) -> Result<i64, EvalError<&'static str, CellError>> {
        *self.computes.lock().unwrap().entry(*key).or_insert(0) += 1;
        let cell = self
            .cells
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| CellError(key.to_string()))?;
        match cell {
            Cell::Literal(n) => Ok(n),
            Cell::Sum(parts) => {
                let mut total = 0;
                for part in parts {
                    total += ctx.evaluate(&part)?;
                }
                Ok(total)
            }
        }
    }
}

#[test]
fn evaluation_is_memoized_and_incremental() {
    let graph = EvalGraph::new(Sheet::new(&[
        ("total", Cell::Sum(vec!["x", "y"])),
        ("x", Cell::Literal(2)),
        ("y", Cell::Literal(3)),
    ]));

    assert_eq!(graph.evaluate(&"total").unwrap(), 5);
    assert_eq!(graph.evaluate(&"total").unwrap(), 5);
    assert_eq!(graph.computer().computes("total"), 1);

    graph.computer().set("x", Cell::Literal(10));
    graph.invalidate(&"x");

    assert_eq!(graph.evaluate(&"total").unwrap(), 13);
    assert_eq!(graph.computer().computes("total"), 2);
    // y was untouched and not re-run.
    assert_eq!(graph.computer().computes("y"), 1);
}

#[test]
fn cycles_are_reported_not_deadlocked() {
    let graph = EvalGraph::new(Sheet::new(&[
        ("a", Cell::Sum(vec!["b"])),
        ("b", Cell::Sum(vec!["c"])),
        ("c", Cell::Sum(vec!["a"])),
    ]));

    match graph.evaluate(&"a") {
        Err(EvalError::Cycle(cycle)) => {
            assert_eq!(cycle.first(), cycle.last());
            assert!(cycle.len() >= 4);
        }
        other => panic!("expected cycle, got {other:?}"),
    }
}

#[test]
fn concurrent_evaluation_shares_one_computation() {
    let graph = Arc::new(EvalGraph::new(Sheet::new(&[
        ("total", Cell::Sum(vec!["x"])),
        ("x", Cell::Literal(7)),
    ])));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let graph = Arc::clone(&graph);
            std::thread::spawn(move || graph.evaluate(&"total").unwrap())
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 7);
    }
    assert_eq!(graph.computer().computes("total"), 1);
    assert_eq!(graph.computer().computes("x"), 1);
}

#[test]
fn cancellation_stops_new_requests_only() {
    let graph = EvalGraph::new(Sheet::new(&[("x", Cell::Literal(1))]));
    let token = CancelToken::new();

    assert_eq!(graph.evaluate_with(&"x", &token).unwrap(), 1);
    token.cancel();
    assert!(matches!(
        graph.evaluate_with(&"x", &token),
        Err(EvalError::Cancelled)
    ));

    // A fresh token sees the cached value; nothing was recomputed.
    assert_eq!(graph.evaluate(&"x").unwrap(), 1);
    assert_eq!(graph.computer().computes("x"), 1);
}

#[test]
fn interned_keys_share_identity_across_threads() {
    let interner = Arc::new(Interner::new());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let interner = Arc::clone(&interner);
            std::thread::spawn(move || interner.intern(("discovery".to_string(), 0u8)))
        })
        .collect();

    let keys: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for pair in keys.windows(2) {
        assert!(pair[0].same(&pair[1]));
    }
    assert_eq!(interner.len(), 1);
}
