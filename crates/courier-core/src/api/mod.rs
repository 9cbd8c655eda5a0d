//! Authorizing REST client for the delivery-booking backend.
//!
//! This module provides the `ApiClient`, which attaches the current bearer
//! token to every outbound request and turns a 401 response into a forced
//! logout. HTTP itself sits behind the `Transport` trait; `HttpTransport` is
//! the reqwest implementation.

pub mod client;
pub mod error;
pub mod transport;

pub use client::ApiClient;
pub use error::ApiError;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
