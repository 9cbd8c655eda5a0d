//! Durable key-value storage backing the session.
//!
//! This module provides:
//! - `KeyValueStore`: the async get/set/remove contract every backend meets
//! - `KeyringStore`: entries in the OS keychain via keyring
//! - `FileStore`: a single JSON file on disk
//! - `MemoryStore`: an in-process map, used in tests and as a fallback
//!
//! Backends hold plain strings and know nothing about sessions; the typed
//! view lives in `auth::CredentialStore`.

pub mod file;
pub mod keychain;
pub mod memory;

use std::future::Future;

use thiserror::Error;

pub use self::file::FileStore;
pub use self::keychain::KeyringStore;
pub use self::memory::{MemoryStore, StoreOp};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// A durable string-to-string map that survives process restarts.
///
/// Removing a key that does not exist succeeds. There is no transaction
/// across keys; callers that write several keys order the writes themselves.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    fn set(&self, key: &str, value: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn remove(&self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// The backend chosen by configuration.
#[derive(Debug)]
pub enum ConfiguredStore {
    Keyring(KeyringStore),
    File(FileStore),
    Memory(MemoryStore),
}

impl KeyValueStore for ConfiguredStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self {
            ConfiguredStore::Keyring(store) => store.get(key).await,
            ConfiguredStore::File(store) => store.get(key).await,
            ConfiguredStore::Memory(store) => store.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        match self {
            ConfiguredStore::Keyring(store) => store.set(key, value).await,
            ConfiguredStore::File(store) => store.set(key, value).await,
            ConfiguredStore::Memory(store) => store.set(key, value).await,
        }
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        match self {
            ConfiguredStore::Keyring(store) => store.remove(key).await,
            ConfiguredStore::File(store) => store.remove(key).await,
            ConfiguredStore::Memory(store) => store.remove(key).await,
        }
    }
}
