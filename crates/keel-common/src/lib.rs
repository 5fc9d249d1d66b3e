//! Common types for the keel dependency-resolution core.
//!
//! This crate provides foundational types used across the keel crates:
//! - `Hash`: BLAKE3 content hashing for integrity fingerprints
//! - `Version` / `VersionConstraint`: version parsing and matching
//! - `Interner`: structural interning for identity-comparable keys

mod hash;
mod interner;
mod version;

pub use hash::{Hash, HashError};
pub use interner::{Interned, Interner};
pub use version::{Version, VersionConstraint, VersionParseError};
