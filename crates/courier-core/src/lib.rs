//! Client-side session core for the courier delivery-booking service.
//!
//! - `store`: durable key-value backends (keychain, file, memory)
//! - `auth`: the `SessionController` and its typed `CredentialStore`
//! - `api`: the authorizing `ApiClient` and its HTTP transport
//! - `models`: users, orders and request/response payloads
//! - `config`: client configuration
//!
//! Typical startup:
//!
//! ```no_run
//! use std::sync::Arc;
//! use courier_core::{ApiClient, Config, SessionController};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let session = Arc::new(SessionController::new(config.open_store()?));
//! session.restore().await;
//!
//! let api = ApiClient::new(&config, session.clone())?;
//! if session.is_authenticated() {
//!     api.refresh_profile().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod store;

pub use api::{ApiClient, ApiError};
pub use auth::{Session, SessionController, SessionError, SessionEvent, SessionState};
pub use config::{Config, StoreBackend};
pub use models::{Order, OrderFilter, User};
pub use store::{KeyValueStore, StoreError};
