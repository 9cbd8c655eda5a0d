use tracing::{debug, warn};

use crate::models::User;
use crate::store::{KeyValueStore, StoreError};

/// Store key holding the raw bearer token
pub const TOKEN_KEY: &str = "token";

/// Store key holding the JSON-serialized user profile
pub const USER_KEY: &str = "user";

/// Typed view over a `KeyValueStore` for the two session entries.
///
/// Reads never fail: a backend error or an unparseable profile is logged and
/// reported as absent. Writes return their errors so the caller can decide.
pub struct CredentialStore<S> {
    backend: S,
}

impl<S: KeyValueStore> CredentialStore<S> {
    pub fn new(backend: S) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub async fn load_token(&self) -> Option<String> {
        match self.backend.get(TOKEN_KEY).await {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "Failed to read stored token, treating as absent");
                None
            }
        }
    }

    pub async fn load_user(&self) -> Option<User> {
        let raw = match self.backend.get(USER_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read stored user, treating as absent");
                return None;
            }
        };

        match serde_json::from_str::<User>(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Stored user is not valid JSON, treating as absent");
                None
            }
        }
    }

    pub async fn save_token(&self, token: &str) -> Result<(), StoreError> {
        self.backend.set(TOKEN_KEY, token).await?;
        debug!("Token persisted");
        Ok(())
    }

    pub async fn save_user(&self, user: &User) -> Result<(), StoreError> {
        let json = serde_json::to_string(user)?;
        self.backend.set(USER_KEY, &json).await?;
        debug!(user_id = user.id, "User persisted");
        Ok(())
    }

    pub async fn remove_token(&self) -> Result<(), StoreError> {
        self.backend.remove(TOKEN_KEY).await
    }

    pub async fn remove_user(&self) -> Result<(), StoreError> {
        self.backend.remove(USER_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreOp};

    #[tokio::test]
    async fn test_user_round_trip() {
        let store = CredentialStore::new(MemoryStore::new());
        let user = User::new(7, "A", "a@b.com");

        store.save_user(&user).await.unwrap();
        assert_eq!(store.load_user().await, Some(user));
    }

    #[tokio::test]
    async fn test_corrupt_user_reads_as_absent() {
        let backend = MemoryStore::new();
        backend.insert(USER_KEY, "{not json");
        let store = CredentialStore::new(backend);

        assert_eq!(store.load_user().await, None);
    }

    #[tokio::test]
    async fn test_read_failure_reads_as_absent() {
        let backend = MemoryStore::new();
        backend.insert(TOKEN_KEY, "T1");
        backend.fail_on(StoreOp::Get, TOKEN_KEY);
        let store = CredentialStore::new(backend);

        assert_eq!(store.load_token().await, None);
    }

    #[tokio::test]
    async fn test_empty_token_reads_as_absent() {
        let backend = MemoryStore::new();
        backend.insert(TOKEN_KEY, "");
        let store = CredentialStore::new(backend);

        assert_eq!(store.load_token().await, None);
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let backend = MemoryStore::new();
        backend.fail_on(StoreOp::Set, TOKEN_KEY);
        let store = CredentialStore::new(backend);

        assert!(store.save_token("T1").await.is_err());
        assert_eq!(store.backend().peek(TOKEN_KEY), None);
    }
}
