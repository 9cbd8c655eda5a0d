//! API client for the delivery-booking backend.
//!
//! `ApiClient::send` wraps every call in two explicit steps around the
//! transport: `authorize` attaches the current bearer token, `inspect` turns
//! the response into a result and forces a logout on 401.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{self, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
use super::ApiError;
use crate::auth::{SessionController, SessionError};
use crate::config::Config;
use crate::models::{
    LoginRequest, LoginResponse, NewOrder, Order, OrderResponse, OrdersResponse, ProfileResponse,
    ProfileUpdate, ProfileUpdateResponse, RegisterRequest, RegisterResponse, User,
};
use crate::store::KeyValueStore;

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Upper bound for a single backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

const JSON_CONTENT_TYPE: &str = "application/json";

pub struct ApiClient<S, T = HttpTransport> {
    transport: T,
    session: Arc<SessionController<S>>,
    max_rate_limit_retries: u32,
    initial_backoff: Duration,
}

impl<S: KeyValueStore> ApiClient<S, HttpTransport> {
    /// Create a client talking to `config.api_base_url` over HTTP
    pub fn new(config: &Config, session: Arc<SessionController<S>>) -> Result<Self, ApiError> {
        let transport = HttpTransport::new(
            &config.api_base_url,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(Self::with_transport(transport, session).with_retry(
            config.max_rate_limit_retries,
            Duration::from_millis(config.initial_backoff_ms),
        ))
    }
}

impl<S: KeyValueStore, T: Transport> ApiClient<S, T> {
    pub fn with_transport(transport: T, session: Arc<SessionController<S>>) -> Self {
        Self {
            transport,
            session,
            max_rate_limit_retries: MAX_RATE_LIMIT_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }

    pub fn with_retry(mut self, max_retries: u32, initial_backoff: Duration) -> Self {
        self.max_rate_limit_retries = max_retries;
        self.initial_backoff = initial_backoff;
        self
    }

    pub fn session(&self) -> &Arc<SessionController<S>> {
        &self.session
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Attach JSON headers and, unless the request is public, the current
    /// token. Returns the token that was attached.
    fn authorize(&self, request: &mut ApiRequest) -> Result<Option<String>, ApiError> {
        let headers = &mut request.headers;
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers.insert(header::ACCEPT, HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers.remove(header::AUTHORIZATION);

        if request.public {
            return Ok(None);
        }

        // Read at send time so a login or logout made since is honored.
        let token = self.session.token();
        if let Some(ref token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ApiError::InvalidRequest("Token is not a valid header value".to_string()))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(token)
    }

    /// Map a response to a result. A 401 on a request that carried a token
    /// ends that session before the error is handed back to the caller.
    async fn inspect(
        &self,
        request: &ApiRequest,
        response: ApiResponse,
        sent_token: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        if response.status.is_success() {
            return Ok(response);
        }

        let error = ApiError::from_status(response.status, &response.body);
        if error.is_unauthorized() {
            match sent_token {
                Some(token) => {
                    warn!(path = %request.path, "Server rejected the session token");
                    if let Err(e) = self.session.expire(token).await {
                        warn!(error = %e, "Failed to clear stored session after expiry");
                    }
                }
                None => debug!(path = %request.path, "Unauthorized response to a request without a token"),
            }
        } else {
            debug!(path = %request.path, status = %response.status, error = %error, "Request failed");
        }
        Err(error)
    }

    /// Send a request through the authorize → transport → inspect pipeline.
    /// Rate-limited requests are retried with exponential backoff; transport
    /// errors are returned untouched and never affect the session.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.send_with_token(request).await.map(|(response, _)| response)
    }

    /// `send`, also returning the token the successful attempt carried.
    async fn send_with_token(
        &self,
        request: ApiRequest,
    ) -> Result<(ApiResponse, Option<String>), ApiError> {
        let mut retries = 0;
        let mut backoff = self.initial_backoff.min(MAX_BACKOFF);

        loop {
            let mut attempt = request.clone();
            let token = self.authorize(&mut attempt)?;
            debug!(
                method = %attempt.method,
                path = %attempt.path,
                authenticated = token.is_some(),
                "Sending request"
            );

            let response = match self.transport.execute(&attempt).await {
                Ok(response) => response,
                Err(e) => {
                    debug!(path = %attempt.path, error = %e, "Transport failed");
                    return Err(e);
                }
            };

            if response.status == StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > self.max_rate_limit_retries {
                    return Err(ApiError::RateLimited);
                }
                warn!(
                    path = %attempt.path,
                    retry = retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
                continue;
            }

            let response = self.inspect(&attempt, response, token.as_deref()).await?;
            return Ok((response, token));
        }
    }

    async fn send_json<R: DeserializeOwned>(&self, request: ApiRequest) -> Result<R, ApiError> {
        self.send_json_with_token(request).await.map(|(body, _)| body)
    }

    async fn send_json_with_token<R: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<(R, Option<String>), ApiError> {
        let path = request.path.clone();
        let (response, token) = self.send_with_token(request).await?;
        let body = serde_json::from_str(&response.body).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", path, e))
        })?;
        Ok((body, token))
    }

    // ===== Session =====

    /// Authenticate and start a session. The returned user is already
    /// committed to the session controller.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let request = ApiRequest::post("/login", &LoginRequest::new(email, password))?.public();
        let response: LoginResponse = self.send_json(request).await?;
        if response.token.trim().is_empty() {
            return Err(ApiError::InvalidResponse(
                "Login response did not include a token".to_string(),
            ));
        }

        let user = response.user.clone();
        self.session.login(response.token, response.user).await?;
        info!(user_id = user.id, "Login successful");
        Ok(user)
    }

    /// Create an account. Does not start a session.
    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ApiError> {
        let request = ApiRequest::post("/register", request)?.public();
        let response: RegisterResponse = self.send_json(request).await?;
        info!(
            user_id = response.user.as_ref().map(|u| u.id),
            "Registration successful"
        );
        Ok(response)
    }

    /// End the local session. The backend keeps no session state to revoke.
    pub async fn logout(&self) -> Result<(), ApiError> {
        self.session.logout().await?;
        Ok(())
    }

    // ===== Profile =====

    /// Fetch the profile and replace the cached user with it. Call on
    /// startup and after an update, not on every render.
    ///
    /// Fails with `SessionError::Superseded` if the session changed while the
    /// request was in flight; the newer session is left as it is.
    pub async fn refresh_profile(&self) -> Result<User, ApiError> {
        let (response, token): (ProfileResponse, _) =
            self.send_json_with_token(ApiRequest::get("/profile")).await?;
        let token = token.ok_or(SessionError::NotAuthenticated)?;
        self.session
            .update_user_for(&token, response.user.clone())
            .await?;
        Ok(response.user)
    }

    /// Update the profile. Uses the user in the response when the server
    /// sends one, otherwise fetches the profile again.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, ApiError> {
        let (response, token): (ProfileUpdateResponse, _) = self
            .send_json_with_token(ApiRequest::put("/profile", update)?)
            .await?;

        match response.user {
            Some(user) => {
                let token = token.ok_or(SessionError::NotAuthenticated)?;
                self.session.update_user_for(&token, user.clone()).await?;
                Ok(user)
            }
            None => self.refresh_profile().await,
        }
    }

    // ===== Orders =====

    pub async fn create_order(&self, order: &NewOrder) -> Result<Order, ApiError> {
        let response: OrderResponse = self.send_json(ApiRequest::post("/orders", order)?).await?;
        info!(order_id = response.order.id, "Order created");
        Ok(response.order)
    }

    pub async fn fetch_order(&self, id: i64) -> Result<Order, ApiError> {
        let response: OrderResponse = self
            .send_json(ApiRequest::get(format!("/orders/{}", id)))
            .await?;
        Ok(response.order)
    }

    pub async fn fetch_orders(&self) -> Result<Vec<Order>, ApiError> {
        let response: OrdersResponse = self.send_json(ApiRequest::get("/orders")).await?;
        debug!(count = response.orders.len(), "Orders fetched");
        Ok(response.orders)
    }
}

/// Double the delay, capped at `MAX_BACKOFF`.
fn next_backoff(backoff: Duration) -> Duration {
    backoff.saturating_mul(2).min(MAX_BACKOFF)
}
