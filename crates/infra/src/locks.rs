//! Per-key mutual exclusion within one process.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

/// Registry of one mutex per key. Callers holding the same key run one at a
/// time; different keys never contend beyond the registry lookup. An entry
/// lives only while some caller holds or waits on it.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, key: &K) -> Arc<Mutex<()>> {
        // The guarded map holds no invariants a panic could break.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(key.clone()).or_default().clone()
    }

    /// Run `f` while holding the lock for `key`.
    pub fn with_lock<T>(&self, key: &K, f: impl FnOnce() -> T) -> T {
        let handle = self.handle(key);
        let result = {
            let _guard = handle.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        self.release(key, &handle);
        result
    }

    /// Drop the entry when the map and `handle` are its only owners. Handles
    /// are only cloned under the map lock, so the count cannot grow here.
    fn release(&self, key: &K, handle: &Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(handle) == 2 {
            locks.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
