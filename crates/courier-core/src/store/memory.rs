use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{KeyValueStore, StoreError};

/// Store operations that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Set,
    Remove,
}

/// In-process store. Clones share the same map, so a clone handed to a new
/// `SessionController` behaves like the same device after a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
    failures: Arc<Mutex<HashSet<(StoreOp, String)>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `op` on `key` fail until `clear_failures` is called
    pub fn fail_on(&self, op: StoreOp, key: &str) {
        lock(&self.failures).insert((op, key.to_string()));
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Read a value without going through the async contract
    pub fn peek(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    /// Write a value directly, bypassing failure injection
    pub fn insert(&self, key: &str, value: &str) {
        lock(&self.entries).insert(key.to_string(), value.to_string());
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    fn check(&self, op: StoreOp, key: &str) -> Result<(), StoreError> {
        if lock(&self.failures).contains(&(op, key.to_string())) {
            return Err(StoreError::Unavailable(format!(
                "injected {:?} failure for '{}'",
                op, key
            )));
        }
        Ok(())
    }
}

// A poisoned map is still a usable map.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check(StoreOp::Get, key)?;
        Ok(self.peek(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check(StoreOp::Set, key)?;
        self.insert(key, value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check(StoreOp::Remove, key)?;
        lock(&self.entries).remove(key);
        Ok(())
    }
}
