use std::fmt;

use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::credentials::CredentialStore;
use crate::models::User;
use crate::store::{KeyValueStore, StoreError};

/// Capacity of the session event channel.
/// Slow subscribers miss old events rather than block the controller.
const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to persist session: {0}")]
    Store(#[from] StoreError),

    #[error("No active session")]
    NotAuthenticated,

    #[error("Session changed while the request was in flight")]
    Superseded,

    #[error("Profile for user {received} does not belong to user {current}")]
    UserMismatch { current: i64, received: i64 },
}

/// A bearer token together with the profile it belongs to.
#[derive(Clone, PartialEq)]
pub struct Session {
    pub token: String,
    pub user: User,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("user", &self.user)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    /// Startup, before `restore` has finished. Consumers should not decide yet.
    #[default]
    Unknown,
    Anonymous,
    Authenticated(Session),
}

impl SessionState {
    pub fn is_unknown(&self) -> bool {
        matches!(self, SessionState::Unknown)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.session().map(|s| s.token.as_str())
    }

    pub fn user(&self) -> Option<&User> {
        self.session().map(|s| &s.user)
    }
}

/// Notifications for session consumers. `Expired` is the user-visible
/// "session expired" notice raised when the server rejects the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Restored { authenticated: bool },
    LoggedIn { user_id: i64 },
    UserUpdated { user_id: i64 },
    LoggedOut,
    Expired,
}

/// Owns the session for the lifetime of the process.
///
/// State changes happen in memory first and are then written to the
/// credential store in a fixed order: `token` before `user` on login, `user`
/// before `token` on logout. A failed write is returned to the caller but the
/// in-memory state is kept.
///
/// Share it as `Arc<SessionController<_>>` between the API client and
/// whatever renders the session.
pub struct SessionController<S> {
    store: CredentialStore<S>,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl<S: KeyValueStore> SessionController<S> {
    pub fn new(backend: S) -> Self {
        let (state, _) = watch::channel(SessionState::Unknown);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store: CredentialStore::new(backend),
            state,
            events,
        }
    }

    pub fn store(&self) -> &CredentialStore<S> {
        &self.store
    }

    /// Load the session from the store. Never fails: anything missing or
    /// unreadable yields `Anonymous`. Only the first call reads the store.
    pub async fn restore(&self) -> SessionState {
        let already_restored = !self.state.borrow().is_unknown();
        if already_restored {
            debug!("Session already restored, ignoring");
            return self.state();
        }

        let token = self.store.load_token().await;
        let user = self.store.load_user().await;

        let next = match (token, user) {
            (Some(token), Some(user)) => SessionState::Authenticated(Session { token, user }),
            (token, user) => {
                debug!(
                    has_token = token.is_some(),
                    has_user = user.is_some(),
                    "No complete session in store"
                );
                SessionState::Anonymous
            }
        };

        // A login that completed while we were reading wins over the store.
        let applied = self.state.send_if_modified(|current| {
            if current.is_unknown() {
                *current = next;
                true
            } else {
                false
            }
        });

        let state = self.state();
        if applied {
            info!(authenticated = state.is_authenticated(), "Session restored");
            self.emit(SessionEvent::Restored {
                authenticated: state.is_authenticated(),
            });
        }
        state
    }

    /// Start a session. Calling again simply replaces the previous one.
    pub async fn login(&self, token: String, user: User) -> Result<(), SessionError> {
        let user_id = user.id;
        self.state.send_replace(SessionState::Authenticated(Session {
            token: token.clone(),
            user: user.clone(),
        }));
        info!(user_id, "Logged in");
        self.emit(SessionEvent::LoggedIn { user_id });

        // Token first: a profile must never be stored without its credential.
        self.store
            .save_token(&token)
            .await
            .map_err(|e| persist_failed(e, "token"))?;
        self.store
            .save_user(&user)
            .await
            .map_err(|e| persist_failed(e, "user"))?;
        Ok(())
    }

    /// End the session. Safe to call when already anonymous.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let previous = self.state.send_replace(SessionState::Anonymous);
        if previous.is_authenticated() {
            info!("Logged out");
            self.emit(SessionEvent::LoggedOut);
        }
        self.clear_store().await
    }

    /// Handle an authorization failure for a request that carried `token`.
    ///
    /// Logs out only if `token` is still the current one, so a batch of
    /// requests failing with the same stale token produces a single logout and
    /// a newer session is never torn down. Returns whether a logout happened.
    pub async fn expire(&self, token: &str) -> Result<bool, SessionError> {
        let cleared = self.state.send_if_modified(|current| {
            if current.token() == Some(token) {
                *current = SessionState::Anonymous;
                true
            } else {
                false
            }
        });

        if !cleared {
            debug!("Authorization failure for a token that is no longer current");
            return Ok(false);
        }

        warn!("Session expired, logging out");
        self.emit(SessionEvent::Expired);
        self.clear_store().await?;
        Ok(true)
    }

    /// Replace the cached profile. The token is left untouched and the user
    /// id must match the cached one.
    pub async fn update_user(&self, user: User) -> Result<(), SessionError> {
        self.apply_user(None, user).await
    }

    /// Like `update_user`, but only while the session still uses `token`.
    /// A profile fetched under an older token never lands in a newer session.
    pub async fn update_user_for(&self, token: &str, user: User) -> Result<(), SessionError> {
        self.apply_user(Some(token), user).await
    }

    async fn apply_user(&self, expected_token: Option<&str>, user: User) -> Result<(), SessionError> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|current| {
            let SessionState::Authenticated(session) = current else {
                outcome = Err(SessionError::NotAuthenticated);
                return false;
            };
            if expected_token.is_some_and(|token| token != session.token) {
                outcome = Err(SessionError::Superseded);
                return false;
            }
            if session.user.id != user.id {
                outcome = Err(SessionError::UserMismatch {
                    current: session.user.id,
                    received: user.id,
                });
                return false;
            }
            session.user = user.clone();
            true
        });

        if let Err(e) = outcome {
            warn!(user_id = user.id, error = %e, "Profile update rejected");
            return Err(e);
        }

        debug!(user_id = user.id, "Cached profile updated");
        self.emit(SessionEvent::UserUpdated { user_id: user.id });
        self.store
            .save_user(&user)
            .await
            .map_err(|e| persist_failed(e, "user"))?;
        Ok(())
    }

    /// Latest committed state
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn token(&self) -> Option<String> {
        self.state.borrow().token().map(str::to_string)
    }

    pub fn user(&self) -> Option<User> {
        self.state.borrow().user().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    /// Watch the session state; the receiver always holds the latest value
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn clear_store(&self) -> Result<(), SessionError> {
        // User first, then token. Both are attempted; the first error wins.
        let user_result = self.store.remove_user().await;
        let token_result = self.store.remove_token().await;
        user_result
            .and(token_result)
            .map_err(|e| persist_failed(e, "logout"))
    }
}

fn persist_failed(error: StoreError, what: &str) -> SessionError {
    warn!(error = %error, what, "Session store write failed, keeping in-memory state");
    SessionError::Store(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{TOKEN_KEY, USER_KEY};
    use crate::store::{MemoryStore, StoreOp};

    fn user(id: i64) -> User {
        User::new(id, "A", "a@b.com")
    }

    async fn logged_in(store: &MemoryStore) -> SessionController<MemoryStore> {
        let controller = SessionController::new(store.clone());
        controller.restore().await;
        controller.login("T1".to_string(), user(7)).await.unwrap();
        controller
    }

    // -------------------------------------------------------------------------
    // Restore
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_starts_unknown() {
        let controller = SessionController::new(MemoryStore::new());
        assert!(controller.state().is_unknown());
        assert_eq!(controller.token(), None);
    }

    #[tokio::test]
    async fn test_restore_empty_store_is_anonymous() {
        let controller = SessionController::new(MemoryStore::new());
        assert_eq!(controller.restore().await, SessionState::Anonymous);
    }

    #[tokio::test]
    async fn test_restore_round_trip() {
        let store = MemoryStore::new();
        logged_in(&store).await;

        let relaunched = SessionController::new(store.clone());
        let state = relaunched.restore().await;

        assert_eq!(state.token(), Some("T1"));
        assert_eq!(state.user(), Some(&user(7)));
    }

    #[tokio::test]
    async fn test_restore_needs_both_entries() {
        let store = MemoryStore::new();
        store.insert(TOKEN_KEY, "T1");
        assert_eq!(
            SessionController::new(store.clone()).restore().await,
            SessionState::Anonymous
        );

        let store = MemoryStore::new();
        store.insert(USER_KEY, r#"{"id":7,"name":"A","email":"a@b.com"}"#);
        assert_eq!(
            SessionController::new(store).restore().await,
            SessionState::Anonymous
        );
    }

    #[tokio::test]
    async fn test_restore_corrupt_user_is_anonymous() {
        let store = MemoryStore::new();
        store.insert(TOKEN_KEY, "T1");
        store.insert(USER_KEY, "definitely not json");

        let controller = SessionController::new(store);
        assert_eq!(controller.restore().await, SessionState::Anonymous);
    }

    #[tokio::test]
    async fn test_restore_read_failure_is_anonymous() {
        let store = MemoryStore::new();
        store.insert(TOKEN_KEY, "T1");
        store.insert(USER_KEY, r#"{"id":7,"name":"A","email":"a@b.com"}"#);
        store.fail_on(StoreOp::Get, USER_KEY);

        let controller = SessionController::new(store);
        assert_eq!(controller.restore().await, SessionState::Anonymous);
    }

    #[tokio::test]
    async fn test_restore_runs_once() {
        let store = MemoryStore::new();
        let controller = SessionController::new(store.clone());
        controller.restore().await;

        // Written behind the controller's back after startup
        store.insert(TOKEN_KEY, "T9");
        store.insert(USER_KEY, r#"{"id":9,"name":"B","email":"b@c.com"}"#);

        assert_eq!(controller.restore().await, SessionState::Anonymous);
    }

    #[tokio::test]
    async fn test_restore_after_login_keeps_login() {
        let controller = SessionController::new(MemoryStore::new());
        controller.login("T1".to_string(), user(7)).await.unwrap();

        let state = controller.restore().await;
        assert_eq!(state.token(), Some("T1"));
    }

    // -------------------------------------------------------------------------
    // Login / Logout
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_login_persists_both_entries() {
        let store = MemoryStore::new();
        let controller = logged_in(&store).await;

        assert!(controller.is_authenticated());
        assert_eq!(store.peek(TOKEN_KEY).as_deref(), Some("T1"));
        let stored: User = serde_json::from_str(&store.peek(USER_KEY).unwrap()).unwrap();
        assert_eq!(stored, user(7));
    }

    #[tokio::test]
    async fn test_login_twice_overwrites() {
        let store = MemoryStore::new();
        let controller = logged_in(&store).await;
        controller.login("T2".to_string(), user(8)).await.unwrap();

        assert_eq!(controller.token().as_deref(), Some("T2"));
        assert_eq!(controller.user().map(|u| u.id), Some(8));
        assert_eq!(store.peek(TOKEN_KEY).as_deref(), Some("T2"));
    }

    #[tokio::test]
    async fn test_login_token_write_failure_skips_user() {
        let store = MemoryStore::new();
        store.fail_on(StoreOp::Set, TOKEN_KEY);
        let controller = SessionController::new(store.clone());

        let result = controller.login("T1".to_string(), user(7)).await;

        assert!(matches!(result, Err(SessionError::Store(_))));
        // Memory still authoritative for this process
        assert!(controller.is_authenticated());
        assert_eq!(store.peek(USER_KEY), None);
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let store = MemoryStore::new();
        let controller = logged_in(&store).await;

        controller.logout().await.unwrap();

        assert_eq!(controller.state(), SessionState::Anonymous);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let store = MemoryStore::new();
        let controller = SessionController::new(store.clone());
        controller.restore().await;

        controller.logout().await.unwrap();
        controller.logout().await.unwrap();

        assert_eq!(controller.state(), SessionState::Anonymous);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_logout_removal_failure_still_removes_token() {
        let store = MemoryStore::new();
        let controller = logged_in(&store).await;
        store.fail_on(StoreOp::Remove, USER_KEY);

        let result = controller.logout().await;

        assert!(result.is_err());
        assert_eq!(controller.state(), SessionState::Anonymous);
        assert_eq!(store.peek(TOKEN_KEY), None);

        // Relaunch without a token ends up anonymous even with the stale user
        store.clear_failures();
        let relaunched = SessionController::new(store);
        assert_eq!(relaunched.restore().await, SessionState::Anonymous);
    }

    // -------------------------------------------------------------------------
    // Update user
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_update_user_keeps_token() {
        let store = MemoryStore::new();
        let controller = logged_in(&store).await;

        let mut renamed = user(7);
        renamed.name = "Renamed".to_string();
        controller.update_user(renamed.clone()).await.unwrap();

        assert_eq!(controller.token().as_deref(), Some("T1"));
        assert_eq!(controller.user(), Some(renamed.clone()));
        assert_eq!(store.peek(TOKEN_KEY).as_deref(), Some("T1"));
        let stored: User = serde_json::from_str(&store.peek(USER_KEY).unwrap()).unwrap();
        assert_eq!(stored, renamed);
    }

    #[tokio::test]
    async fn test_update_user_without_session_is_rejected() {
        let store = MemoryStore::new();
        let controller = SessionController::new(store.clone());
        controller.restore().await;

        let result = controller.update_user(user(7)).await;

        assert!(matches!(result, Err(SessionError::NotAuthenticated)));
        assert_eq!(controller.state(), SessionState::Anonymous);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_update_user_store_failure_keeps_memory() {
        let store = MemoryStore::new();
        let controller = logged_in(&store).await;
        store.fail_on(StoreOp::Set, USER_KEY);

        let mut renamed = user(7);
        renamed.name = "Renamed".to_string();
        let result = controller.update_user(renamed.clone()).await;

        assert!(matches!(result, Err(SessionError::Store(_))));
        assert_eq!(controller.user(), Some(renamed));
        assert_eq!(controller.token().as_deref(), Some("T1"));
        // Store still has the last good pairing
        let stored: User = serde_json::from_str(&store.peek(USER_KEY).unwrap()).unwrap();
        assert_eq!(stored, user(7));
    }

    #[tokio::test]
    async fn test_update_user_rejects_other_user_id() {
        let store = MemoryStore::new();
        let controller = logged_in(&store).await;

        let result = controller.update_user(user(8)).await;

        assert!(matches!(
            result,
            Err(SessionError::UserMismatch { current: 7, received: 8 })
        ));
        assert_eq!(controller.user(), Some(user(7)));
        let stored: User = serde_json::from_str(&store.peek(USER_KEY).unwrap()).unwrap();
        assert_eq!(stored.id, 7);
    }

    #[tokio::test]
    async fn test_update_user_for_current_token() {
        let store = MemoryStore::new();
        let controller = logged_in(&store).await;

        let mut renamed = user(7);
        renamed.name = "Renamed".to_string();
        controller.update_user_for("T1", renamed.clone()).await.unwrap();

        assert_eq!(controller.user(), Some(renamed));
    }

    #[tokio::test]
    async fn test_update_user_for_stale_token_keeps_newer_session() {
        let store = MemoryStore::new();
        let controller = logged_in(&store).await;
        controller.login("T2".to_string(), user(8)).await.unwrap();
        let mut events = controller.events();

        let result = controller.update_user_for("T1", user(7)).await;

        assert!(matches!(result, Err(SessionError::Superseded)));
        assert_eq!(controller.token().as_deref(), Some("T2"));
        assert_eq!(controller.user().map(|u| u.id), Some(8));
        let stored: User = serde_json::from_str(&store.peek(USER_KEY).unwrap()).unwrap();
        assert_eq!(stored.id, 8);
        assert!(events.try_recv().is_err());
    }

    // -------------------------------------------------------------------------
    // Expiry
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_expire_current_token() {
        let store = MemoryStore::new();
        let controller = logged_in(&store).await;
        let mut events = controller.events();

        assert!(controller.expire("T1").await.unwrap());

        assert_eq!(controller.state(), SessionState::Anonymous);
        assert!(store.is_empty());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Expired);
    }

    #[tokio::test]
    async fn test_expire_only_once_per_token() {
        let store = MemoryStore::new();
        let controller = logged_in(&store).await;

        assert!(controller.expire("T1").await.unwrap());
        assert!(!controller.expire("T1").await.unwrap());
    }

    #[tokio::test]
    async fn test_expire_stale_token_keeps_newer_session() {
        let store = MemoryStore::new();
        let controller = logged_in(&store).await;
        controller.login("T2".to_string(), user(7)).await.unwrap();

        assert!(!controller.expire("T1").await.unwrap());
        assert_eq!(controller.token().as_deref(), Some("T2"));
        assert_eq!(store.peek(TOKEN_KEY).as_deref(), Some("T2"));
    }

    // -------------------------------------------------------------------------
    // Notifications
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_watchers_see_latest_state() {
        let store = MemoryStore::new();
        let controller = SessionController::new(store);
        let mut watcher = controller.subscribe();
        assert!(watcher.borrow().is_unknown());

        controller.restore().await;
        controller.login("T1".to_string(), user(7)).await.unwrap();
        assert!(watcher.has_changed().unwrap());
        assert!(watcher.borrow_and_update().is_authenticated());

        controller.logout().await.unwrap();
        assert_eq!(*watcher.borrow_and_update(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn test_event_sequence() {
        let controller = SessionController::new(MemoryStore::new());
        let mut events = controller.events();

        controller.restore().await;
        controller.login("T1".to_string(), user(7)).await.unwrap();
        controller.update_user(user(7)).await.unwrap();
        controller.logout().await.unwrap();
        // Already anonymous: no second LoggedOut
        controller.logout().await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Restored { authenticated: false }
        );
        assert_eq!(events.recv().await.unwrap(), SessionEvent::LoggedIn { user_id: 7 });
        assert_eq!(events.recv().await.unwrap(), SessionEvent::UserUpdated { user_id: 7 });
        assert_eq!(events.recv().await.unwrap(), SessionEvent::LoggedOut);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_session_debug_hides_token() {
        let session = Session {
            token: "secret-token".to_string(),
            user: user(7),
        };
        assert!(!format!("{:?}", session).contains("secret-token"));
    }
}
