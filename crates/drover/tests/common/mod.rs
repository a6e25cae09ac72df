//! Test utilities and common setup.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use drover::api::{self, AppState, DispatchSettings};
use drover::auth::{AuthConfig, AuthState};
use drover::blueprint::{AgentBlueprint, McpRegistry, MemoryBlueprints};
use drover::db::Database;
use drover::queue::{RunQueue, RunRepository};
use drover::runner::{CommandQueues, RunnerRegistry, WakeHub};
use drover::session::{SessionRepository, SessionStore};
use drover::sse::SseManager;

/// A test application: the real router plus direct state access.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub blueprints: Arc<MemoryBlueprints>,
}

/// Build a test app with auth disabled and an in-memory database.
pub async fn test_app() -> TestApp {
    test_app_with_auth(AuthConfig {
        disabled: true,
        ..Default::default()
    })
    .await
}

/// Build a test app with the given auth configuration.
pub async fn test_app_with_auth(auth_config: AuthConfig) -> TestApp {
    let db = Database::in_memory().await.unwrap();
    let wake = Arc::new(WakeHub::new());
    let blueprints = Arc::new(MemoryBlueprints::new());

    let state = AppState::new(
        SessionStore::new(SessionRepository::new(db.pool().clone())),
        RunQueue::new(RunRepository::new(db.pool().clone())),
        RunnerRegistry::new(wake.clone(), 120),
        CommandQueues::new(wake.clone()),
        wake,
        SseManager::new(),
        blueprints.clone(),
        McpRegistry::new(),
        AuthState::new(auth_config),
        DispatchSettings::default(),
    );

    TestApp {
        router: api::create_router(state.clone()),
        state,
        blueprints,
    }
}

impl TestApp {
    /// Install a blueprint fixture.
    pub async fn add_blueprint(&self, blueprint: AgentBlueprint) {
        self.blueprints.insert(blueprint).await;
    }

    /// Send a request and return (status, parsed JSON body).
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                builder
                    .body(Body::from(serde_json::to_vec(&json).unwrap()))
                    .unwrap()
            }
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body)).await
    }

    /// Register a runner and return its ID.
    pub async fn register_runner(&self, tags: &[&str]) -> String {
        let (status, body) = self
            .post(
                "/api/v1/runner/register",
                serde_json::json!({
                    "hostname": "test-worker",
                    "executor_type": "claude-code",
                    "tags": tags,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
        body["runner_id"].as_str().unwrap().to_string()
    }

    /// One short poll for a runner; returns the envelope (Null on 204).
    pub async fn poll(&self, runner_id: &str) -> (StatusCode, Value) {
        self.get(&format!(
            "/api/v1/runner/runs?runner_id={runner_id}&timeout_secs=1"
        ))
        .await
    }
}
