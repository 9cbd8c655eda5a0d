#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use courier_core::api::{ApiError, ApiRequest, ApiResponse, Transport};
use courier_core::store::MemoryStore;
use courier_core::{ApiClient, SessionController};
use reqwest::{Method, StatusCode};
use serde_json::Value;

enum Scripted {
    Respond(StatusCode, String),
    Fail(String),
}

/// Transport that answers from a per-route queue and records every request.
/// Unscripted routes answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Scripted>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn respond(&self, method: Method, path: &str, status: StatusCode, body: Value) {
        self.push(method, path, Scripted::Respond(status, body.to_string()));
    }

    pub fn respond_raw(&self, method: Method, path: &str, status: StatusCode, body: &str) {
        self.push(method, path, Scripted::Respond(status, body.to_string()));
    }

    pub fn fail(&self, method: Method, path: &str, message: &str) {
        self.push(method, path, Scripted::Fail(message.to_string()));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> ApiRequest {
        self.requests().pop().expect("no request was sent")
    }

    pub fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    fn push(&self, method: Method, path: &str, scripted: Scripted) {
        self.routes
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(scripted);
    }
}

impl Transport for ScriptedTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self
            .routes
            .lock()
            .unwrap()
            .get_mut(&(request.method.clone(), request.path.clone()))
            .and_then(|queue| queue.pop_front());

        match next {
            Some(Scripted::Respond(status, body)) => Ok(ApiResponse::new(status, body)),
            Some(Scripted::Fail(message)) => Err(ApiError::Network(message)),
            None => Ok(ApiResponse::new(
                StatusCode::NOT_FOUND,
                r#"{"message":"no scripted response"}"#,
            )),
        }
    }
}

pub type TestClient = ApiClient<MemoryStore, ScriptedTransport>;

/// Client over `store` with a restored session and near-instant backoff
pub async fn client(store: &MemoryStore) -> (TestClient, Arc<SessionController<MemoryStore>>) {
    let session = Arc::new(SessionController::new(store.clone()));
    session.restore().await;
    let client = ApiClient::with_transport(ScriptedTransport::default(), session.clone())
        .with_retry(3, Duration::from_millis(1));
    (client, session)
}

pub fn user_json(id: i64) -> Value {
    serde_json::json!({ "id": id, "name": "A", "email": "a@b.com" })
}

/// Script a successful login for token `token` and user `id`, then log in
pub async fn log_in(client: &TestClient, token: &str, id: i64) {
    client.transport().respond(
        Method::POST,
        "/login",
        StatusCode::OK,
        serde_json::json!({ "message": "Login successful", "token": token, "user": user_json(id) }),
    );
    client.login("a@b.com", "x").await.unwrap();
}
