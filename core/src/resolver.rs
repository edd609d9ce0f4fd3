//! Lazy resolver: a single late-bound setter/getter so the Output
//! Monitor can call back into the Session Supervisor (and, in the full
//! system, an external gateway) without a compile-time cycle or a
//! shared global singleton registry. Owned by whichever component
//! creates the resolved collaborator — here, the Supervisor constructs
//! one and hands the `Arc<LateBound<_>>` to the Monitor at construction
//! time, then calls `set` once it exists.

use std::sync::{Arc, OnceLock};

pub struct LateBound<T: ?Sized> {
    cell: OnceLock<Arc<T>>,
}

impl<T: ?Sized> LateBound<T> {
    pub fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// Bind the collaborator. Intended to be called exactly once, after
    /// full system initialization; a second call is a no-op (the first
    /// binding wins) rather than a panic, so tests can construct and
    /// rebind freely.
    pub fn set(&self, value: Arc<T>) {
        let _ = self.cell.set(value);
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.cell.get().cloned()
    }
}

impl<T: ?Sized> Default for LateBound<T> {
    fn default() -> Self {
        Self::new()
    }
}
