//! The keel dependency-resolution engine.
//!
//! Ties the resolution algorithms to the incremental evaluation graph:
//! - `BuildKey`/`BuildValue`: the closed set of computation kinds
//! - `EngineComputer`: the dispatch table registered with the graph
//! - `Engine`: the facade the surrounding build tool calls for dependency
//!   graphs, repo specs, and toolchain collections
//!
//! Every request is interned, memoized, and recomputed only when one of its
//! recorded inputs is invalidated.

mod engine;
mod key;

pub use engine::{Engine, EngineBuilder, EngineComputer, EngineError};
pub use key::{BuildError, BuildKey, BuildValue};
