//! Flat named counters, injected at construction into every component that
//! records statistics. The `/debug/vars` handler walks a snapshot of the
//! registry; callers record via `(name, delta)`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// A set of monotonic counters keyed by flat dotted names such as
/// `mux.num_connections_handled`.
#[derive(Default)]
pub struct Registry {
    counters: DashMap<&'static str, AtomicU64>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            counters: DashMap::new(),
        }
    }

    /// Ensure `name` exists, starting at zero. Components register their
    /// counters at construction so snapshots always list them.
    pub fn register(&self, name: &'static str) {
        self.counters.entry(name).or_insert_with(|| AtomicU64::new(0));
    }

    /// Add `delta` to the counter `name`, creating it if needed.
    pub fn add(&self, name: &'static str, delta: u64) {
        self.counters
            .entry(name)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    /// Current value of `name`, or zero if it was never registered.
    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Point-in-time view of every counter, sorted by name.
    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        self.counters
            .iter()
            .map(|e| (*e.key(), e.value().load(Ordering::Relaxed)))
            .collect()
    }
}
