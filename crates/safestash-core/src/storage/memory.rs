//! In-memory store
//!
//! Behaves like a browser store held entirely in process memory, with an
//! optional byte capacity. Also carries fault injection hooks so tests can
//! drive every failure path deterministically.

use std::collections::{BTreeMap, HashMap, VecDeque};

use parking_lot::Mutex;

use super::{check_capacity, total_size, RawStore, StoreFailure};

#[derive(Debug, Default)]
struct MemoryState {
    entries: BTreeMap<String, String>,
    /// Failures returned by the next `set_item` calls, in order
    pending_write_failures: VecDeque<StoreFailure>,
    /// When set, `keys()` fails with this failure
    enumeration_failure: Option<StoreFailure>,
    write_attempts: HashMap<String, usize>,
}

/// In-memory [`RawStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    capacity: Option<u64>,
}

impl MemoryStore {
    /// Unbounded store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that rejects writes beyond `capacity` bytes
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            capacity: Some(capacity),
        }
    }

    pub fn capacity(&self) -> Option<u64> {
        self.capacity
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently used
    pub fn usage(&self) -> u64 {
        total_size(&self.state.lock().entries)
    }

    /// Make the next `count` writes fail with `failure`
    pub fn fail_next_writes(&self, count: usize, failure: StoreFailure) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.pending_write_failures.push_back(failure.clone());
        }
    }

    /// Make key enumeration fail until cleared with `None`
    pub fn fail_enumeration(&self, failure: Option<StoreFailure>) {
        self.state.lock().enumeration_failure = failure;
    }

    /// Number of `set_item` calls made for `key`, failed ones included
    pub fn write_attempts(&self, key: &str) -> usize {
        self.state
            .lock()
            .write_attempts
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Number of `set_item` calls made for any key
    pub fn total_write_attempts(&self) -> usize {
        self.state.lock().write_attempts.values().sum()
    }
}

impl RawStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreFailure> {
        Ok(self.state.lock().entries.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreFailure> {
        let mut state = self.state.lock();
        *state.write_attempts.entry(key.to_string()).or_insert(0) += 1;

        if let Some(failure) = state.pending_write_failures.pop_front() {
            return Err(failure);
        }

        check_capacity(&state.entries, self.capacity, key, value)?;
        state.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreFailure> {
        self.state.lock().entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreFailure> {
        let state = self.state.lock();
        if let Some(ref failure) = state.enumeration_failure {
            return Err(failure.clone());
        }
        Ok(state.entries.keys().cloned().collect())
    }
}
