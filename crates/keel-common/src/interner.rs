//! Structural interning for computation keys.
//!
//! Interning maps every structurally-equal value to a single canonical
//! allocation, so equality and hashing of the returned handles degrade to
//! pointer comparisons. The evaluation graph relies on this: equal requests
//! constructed independently must land on the same node.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

/// A handle to an interned value.
///
/// Handles compare and hash by the identity of the canonical allocation.
/// Two handles from the same [`Interner`] are equal iff the values they were
/// interned from are structurally equal.
pub struct Interned<T>(Arc<T>);

impl<T> Interned<T> {
    /// Whether two handles point at the same canonical instance.
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Clone for Interned<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Deref for Interned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> PartialEq for Interned<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Eq for Interned<T> {}

impl<T> Hash for Interned<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl<T: fmt::Debug> fmt::Debug for Interned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<T: fmt::Display> fmt::Display for Interned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A thread-safe structural interner.
///
/// The table grows for the lifetime of the process and is only emptied by an
/// explicit [`clear`](Interner::clear) during a full invalidation.
pub struct Interner<T: Eq + Hash + Send + Sync> {
    table: DashMap<Arc<T>, ()>,
}

impl<T: Eq + Hash + Send + Sync> Interner<T> {
    pub fn new() -> Self {
        Self {
            table: DashMap::new(),
        }
    }

    /// Intern a value, returning the canonical handle.
    ///
    /// Concurrent calls with structurally-equal values agree on one winning
    /// instance: the entry lock makes the first insertion canonical and every
    /// later caller observes it.
    pub fn intern(&self, value: T) -> Interned<T> {
        if let Some(existing) = self.table.get(&value) {
            return Interned(Arc::clone(existing.key()));
        }
        match self.table.entry(Arc::new(value)) {
            Entry::Occupied(entry) => Interned(Arc::clone(entry.key())),
            Entry::Vacant(entry) => {
                let guard = entry.insert(());
                Interned(Arc::clone(guard.key()))
            }
        }
    }

    /// Number of distinct interned values.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Drop every interned value. Part of a full invalidation; handles that
    /// are still alive keep their allocation but will not match handles
    /// interned afterwards.
    pub fn clear(&self) {
        self.table.clear();
    }
}

impl<T: Eq + Hash + Send + Sync> Default for Interner<T> {
    fn default() -> Self {
        Self::new()
    }
}
