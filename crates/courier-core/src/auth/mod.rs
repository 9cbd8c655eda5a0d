//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `SessionController`: owns the in-memory session and keeps the store in sync
//! - `CredentialStore`: typed access to the `token` and `user` store entries
//!
//! The session is restored from the store once at startup and is the source
//! of truth for the rest of the process lifetime.

pub mod credentials;
pub mod session;

pub use credentials::{CredentialStore, TOKEN_KEY, USER_KEY};
pub use session::{Session, SessionController, SessionError, SessionEvent, SessionState};
