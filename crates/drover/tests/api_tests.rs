//! API integration tests covering the coordinator's end-to-end scenarios.

use axum::http::{Method, StatusCode};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use drover::blueprint::{AgentBlueprint, ConfigSchema, PropertyType};

mod common;
use common::{test_app, test_app_with_auth};

/// Health endpoint works without authentication.
#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app().await;
    let (status, body) = app.get("/api/v1/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

/// Happy path: create, claim, bind, events, result — with SSE ordering.
#[tokio::test]
async fn test_happy_path_start_session() {
    let app = test_app().await;
    let mut subscriber = app.state.sse.register(None);

    // Create the run.
    let (status, created) = app
        .post(
            "/api/v1/runs",
            json!({"type": "start_session", "prompt": "hello", "session_name": "s1"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let run_id = created["run_id"].as_str().unwrap().to_string();
    let session_id = created["session_id"].as_str().unwrap().to_string();
    assert_eq!(created["status"], "pending");

    // Runner claims it.
    let runner_id = app.register_runner(&[]).await;
    let (status, envelope) = app.poll(&runner_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["run"]["run_id"], run_id.as_str());
    assert_eq!(envelope["run"]["run_type"], "start_session");

    // Runner reports the spawn; executor binds and finishes.
    let (status, _) = app
        .post(
            &format!("/api/v1/runner/runs/{run_id}/started"),
            json!({"runner_id": runner_id}),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/bind"),
            json!({
                "executor_session_id": "e1",
                "hostname": "test-worker",
                "executor_type": "claude-code",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/events"),
            json!({"event_type": "run_completed", "result": "hi", "exit_code": 0}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // Session state reflects the terminal event.
    let (status, body) = app
        .get(&format!("/api/v1/sessions/{session_id}/status"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "finished");

    let (status, body) = app
        .get(&format!("/api/v1/sessions/{session_id}/result"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "hi");

    let (_, run) = app.get(&format!("/api/v1/runs/{run_id}")).await;
    assert_eq!(run["status"], "completed");

    // SSE frames arrived in lifecycle order.
    let mut events = Vec::new();
    while let Ok(frame) = subscriber.frames.try_recv() {
        let event = frame
            .lines()
            .find_map(|l| l.strip_prefix("event: "))
            .unwrap()
            .to_string();
        events.push(event);
    }
    assert_eq!(
        events,
        vec![
            "run_created",
            "session_running",
            "session_event",
            "run_completed"
        ]
    );
}

/// Demand matching: runners only receive runs whose demands they satisfy.
#[tokio::test]
async fn test_demand_matched_dispatch() {
    let app = test_app().await;

    let (_, q1) = app
        .post(
            "/api/v1/runs",
            json!({"type": "start_session", "prompt": "needs gpu", "demands": ["gpu"]}),
        )
        .await;
    let (_, q2) = app
        .post(
            "/api/v1/runs",
            json!({"type": "start_session", "prompt": "needs cpu", "demands": ["cpu"]}),
        )
        .await;

    let cpu_runner = app.register_runner(&["cpu"]).await;
    let gpu_runner = app.register_runner(&["gpu"]).await;

    // The cpu runner polls first but must skip the older gpu run.
    let (status, envelope) = app.poll(&cpu_runner).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["run"]["run_id"], q2["run_id"]);

    let (status, envelope) = app.poll(&gpu_runner).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["run"]["run_id"], q1["run_id"]);
}

/// A run with unmet demands is never dispatched; the poll times out clean.
#[tokio::test]
async fn test_unmatched_demand_stays_queued() {
    let app = test_app().await;

    app.post(
        "/api/v1/runs",
        json!({"type": "start_session", "prompt": "x", "demands": ["tpu"]}),
    )
    .await;

    let runner_id = app.register_runner(&["cpu"]).await;
    let (status, _) = app.poll(&runner_id).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

/// Stop in flight: stop command reaches the claimant on its next poll.
#[tokio::test]
async fn test_stop_in_flight() {
    let app = test_app().await;

    let (_, created) = app
        .post(
            "/api/v1/runs",
            json!({"type": "start_session", "prompt": "long job"}),
        )
        .await;
    let run_id = created["run_id"].as_str().unwrap().to_string();

    let runner_id = app.register_runner(&[]).await;
    let (_, envelope) = app.poll(&runner_id).await;
    assert_eq!(envelope["run"]["run_id"], run_id.as_str());

    app.post(
        &format!("/api/v1/runner/runs/{run_id}/started"),
        json!({"runner_id": runner_id}),
    )
    .await;

    // Client requests the stop.
    let (status, body) = app
        .post(&format!("/api/v1/runs/{run_id}/stop"), json!({}))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["stop_requested"], true);

    // The runner's next poll carries the stop command.
    let (status, envelope) = app.poll(&runner_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["stop_runs"][0], run_id.as_str());

    // Runner reports the kill.
    let (status, _) = app
        .post(
            &format!("/api/v1/runner/runs/{run_id}/stopped"),
            json!({"runner_id": runner_id, "signal": "SIGKILL"}),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, run) = app.get(&format!("/api/v1/runs/{run_id}")).await;
    assert_eq!(run["status"], "stopped");
    assert!(run["error"].as_str().unwrap().contains("SIGKILL"));

    // A second stop is idempotent.
    let (status, body) = app
        .post(&format!("/api/v1/runs/{run_id}/stop"), json!({}))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "stopped");
}

/// Stopping a pending run transitions it directly, with no runner involved.
#[tokio::test]
async fn test_stop_pending_run() {
    let app = test_app().await;

    let (_, created) = app
        .post(
            "/api/v1/runs",
            json!({"type": "start_session", "prompt": "never claimed"}),
        )
        .await;
    let run_id = created["run_id"].as_str().unwrap();

    let (status, body) = app
        .post(&format!("/api/v1/runs/{run_id}/stop"), json!({}))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "stopped");
    assert_eq!(body["stop_requested"], false);
}

/// Bind conflict: the first executor wins, the second gets a 409.
#[tokio::test]
async fn test_bind_conflict() {
    let app = test_app().await;

    let (_, created) = app
        .post(
            "/api/v1/runs",
            json!({"type": "start_session", "prompt": "hello"}),
        )
        .await;
    let session_id = created["session_id"].as_str().unwrap().to_string();

    let bind = |exec: &str| {
        json!({
            "executor_session_id": exec,
            "hostname": "w1",
            "executor_type": "claude-code",
        })
    };

    let (status, _) = app
        .post(&format!("/api/v1/sessions/{session_id}/bind"), bind("e1"))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post(&format!("/api/v1/sessions/{session_id}/bind"), bind("e2"))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");

    let (status, affinity) = app
        .get(&format!("/api/v1/sessions/{session_id}/affinity"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(affinity["bound"], true);
    assert_eq!(affinity["executor_session_id"], "e1");
}

/// Result before any terminal event is a 409 NOT_FINISHED.
#[tokio::test]
async fn test_result_not_finished() {
    let app = test_app().await;

    let (_, created) = app
        .post(
            "/api/v1/runs",
            json!({"type": "start_session", "prompt": "hello"}),
        )
        .await;
    let session_id = created["session_id"].as_str().unwrap();

    let (status, body) = app
        .get(&format!("/api/v1/sessions/{session_id}/result"))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "NOT_FINISHED");
}

/// Events after a terminal event are rejected with SESSION_TERMINAL.
#[tokio::test]
async fn test_event_after_terminal_rejected() {
    let app = test_app().await;

    let (_, created) = app
        .post(
            "/api/v1/runs",
            json!({"type": "start_session", "prompt": "hello"}),
        )
        .await;
    let session_id = created["session_id"].as_str().unwrap();

    app.post(
        &format!("/api/v1/sessions/{session_id}/events"),
        json!({"event_type": "run_failed", "error": "crashed"}),
    )
    .await;

    let (status, body) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/events"),
            json!({"event_type": "message", "role": "assistant", "content": "late"}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SESSION_TERMINAL");
}

/// Unknown event types never reach the store.
#[tokio::test]
async fn test_unknown_event_type_rejected() {
    let app = test_app().await;

    let (_, created) = app
        .post(
            "/api/v1/runs",
            json!({"type": "start_session", "prompt": "hello"}),
        )
        .await;
    let session_id = created["session_id"].as_str().unwrap();

    let (status, _) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/events"),
            json!({"event_type": "telemetry", "data": 1}),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

/// Unknown agents 404; parameter schema violations are INVALID_CONFIG.
#[tokio::test]
async fn test_blueprint_validation() {
    let app = test_app().await;

    let (status, _) = app
        .post(
            "/api/v1/runs",
            json!({"type": "start_session", "prompt": "x", "agent_name": "ghost"}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.add_blueprint(AgentBlueprint {
        name: "reviewer".to_string(),
        description: None,
        system_prompt: Some("Review ${params.repo_url} for session ${runtime.session_id}".to_string()),
        mcp_servers: BTreeMap::new(),
        config_schema: Some(ConfigSchema {
            required: vec!["repo_url".to_string()],
            properties: [("repo_url".to_string(), PropertyType::String)].into(),
        }),
        demands: Default::default(),
    })
    .await;

    let (status, body) = app
        .post(
            "/api/v1/runs",
            json!({"type": "start_session", "prompt": "x", "agent_name": "reviewer"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_CONFIG");
    assert!(body["details"]["missing"][0]
        .as_str()
        .unwrap()
        .contains("repo_url"));

    // Valid parameters succeed, and the claimed blueprint is resolved.
    let (status, created) = app
        .post(
            "/api/v1/runs",
            json!({
                "type": "start_session",
                "prompt": "x",
                "agent_name": "reviewer",
                "params": {"repo_url": "https://example.com/r.git"},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let session_id = created["session_id"].as_str().unwrap();

    let runner_id = app.register_runner(&[]).await;
    let (_, envelope) = app.poll(&runner_id).await;
    let system_prompt = envelope["run"]["agent_blueprint"]["system_prompt"]
        .as_str()
        .unwrap();
    assert!(system_prompt.contains("https://example.com/r.git"));
    assert!(system_prompt.contains(session_id));
}

/// Callback chain: a child's completion resumes its parent.
#[tokio::test]
async fn test_callback_chain() {
    let app = test_app().await;
    let runner_id = app.register_runner(&[]).await;

    // Parent session runs to completion first.
    let (_, parent) = app
        .post(
            "/api/v1/runs",
            json!({"type": "start_session", "prompt": "spawn a child", "session_name": "parent"}),
        )
        .await;
    let parent_session = parent["session_id"].as_str().unwrap().to_string();
    app.poll(&runner_id).await;
    app.post(
        &format!("/api/v1/sessions/{parent_session}/bind"),
        json!({"executor_session_id": "pe", "hostname": "w1", "executor_type": "claude-code"}),
    )
    .await;
    app.post(
        &format!("/api/v1/sessions/{parent_session}/events"),
        json!({"event_type": "run_completed", "result": "spawned"}),
    )
    .await;

    // Child names the parent and completes.
    let (_, child) = app
        .post(
            "/api/v1/runs",
            json!({
                "type": "start_session",
                "prompt": "do the subtask",
                "session_name": "child",
                "parent_session_name": "parent",
            }),
        )
        .await;
    let child_session = child["session_id"].as_str().unwrap().to_string();
    app.poll(&runner_id).await;
    app.post(
        &format!("/api/v1/sessions/{child_session}/bind"),
        json!({"executor_session_id": "ce", "hostname": "w1", "executor_type": "claude-code"}),
    )
    .await;
    app.post(
        &format!("/api/v1/sessions/{child_session}/events"),
        json!({"event_type": "run_completed", "result": "child result"}),
    )
    .await;

    // The callback enqueued a resume run against the parent.
    let (_, runs) = app.get("/api/v1/runs").await;
    let resume = runs
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["run_type"] == "resume_session" && r["session_id"] == parent_session.as_str())
        .expect("callback resume run missing");
    assert_eq!(resume["status"], "pending");
    assert!(resume["prompt"].as_str().unwrap().contains("child result"));

    // The runner claims it (its executor type satisfies the demand), and
    // the assignment carries the parent's executor session.
    let (status, envelope) = app.poll(&runner_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["run"]["run_type"], "resume_session");
    assert_eq!(envelope["run"]["executor_session_id"], "pe");
    let resume_id = envelope["run"]["run_id"].as_str().unwrap().to_string();

    app.post(
        &format!("/api/v1/runner/runs/{resume_id}/started"),
        json!({"runner_id": runner_id}),
    )
    .await;
    app.post(
        &format!("/api/v1/sessions/{parent_session}/events"),
        json!({"event_type": "run_completed", "result": "handled child"}),
    )
    .await;

    let (_, body) = app
        .get(&format!("/api/v1/sessions/{parent_session}/status"))
        .await;
    assert_eq!(body["status"], "finished");
}

/// Long-poll with nothing pending is a clean 204.
#[tokio::test]
async fn test_poll_timeout_204() {
    let app = test_app().await;
    let runner_id = app.register_runner(&[]).await;

    let started = std::time::Instant::now();
    let (status, _) = app.poll(&runner_id).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(started.elapsed() >= std::time::Duration::from_millis(900));
}

/// Polling as an unknown runner is a 404.
#[tokio::test]
async fn test_poll_unknown_runner() {
    let app = test_app().await;
    let (status, body) = app.poll("runner_ghost").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "UNKNOWN_RUNNER");
}

/// Deregistration is delivered through the poll exactly once.
#[tokio::test]
async fn test_deregistration_signal() {
    let app = test_app().await;
    let runner_id = app.register_runner(&[]).await;

    let (status, _) = app
        .post(
            "/api/v1/runner/deregister",
            json!({"runner_id": runner_id}),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, envelope) = app.poll(&runner_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["deregistered"], true);

    // The entry is gone now.
    let (status, _) = app.poll(&runner_id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .post("/api/v1/runner/heartbeat", json!({"runner_id": runner_id}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Session deletion removes the session and its events.
#[tokio::test]
async fn test_delete_session() {
    let app = test_app().await;

    let (_, created) = app
        .post(
            "/api/v1/runs",
            json!({"type": "start_session", "prompt": "hello"}),
        )
        .await;
    let session_id = created["session_id"].as_str().unwrap();

    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/api/v1/sessions/{session_id}"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.get(&format!("/api/v1/sessions/{session_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// With auth enabled, requests need the admin key (header or query).
#[tokio::test]
async fn test_auth_required() {
    let app = test_app_with_auth(drover::auth::AuthConfig {
        disabled: false,
        admin_api_key: Some("s3cret".to_string()),
        oidc: None,
    })
    .await;

    // Health stays public.
    let (status, _) = app.get("/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get("/api/v1/sessions").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    // Query-parameter credential (the SSE path) is accepted.
    let (status, _) = app.get("/api/v1/sessions?api_key=s3cret").await;
    assert_eq!(status, StatusCode::OK);

    // Wrong key is forbidden, not just unauthorized.
    let (status, _) = app.get("/api/v1/sessions?api_key=wrong").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

/// Resume by name targets the newest session with that name.
#[tokio::test]
async fn test_resume_by_name() {
    let app = test_app().await;
    let runner_id = app.register_runner(&[]).await;

    let (_, created) = app
        .post(
            "/api/v1/runs",
            json!({"type": "start_session", "prompt": "hi", "session_name": "review"}),
        )
        .await;
    let session_id = created["session_id"].as_str().unwrap().to_string();
    app.poll(&runner_id).await;
    app.post(
        &format!("/api/v1/sessions/{session_id}/bind"),
        json!({"executor_session_id": "e1", "hostname": "w1", "executor_type": "claude-code"}),
    )
    .await;

    let (status, resumed) = app
        .post(
            "/api/v1/runs",
            json!({"type": "resume_session", "prompt": "continue", "target_session_name": "review"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(resumed["session_id"], session_id.as_str());

    // Resuming an unbound session is rejected.
    let (_, other) = app
        .post(
            "/api/v1/runs",
            json!({"type": "start_session", "prompt": "hi", "session_name": "unbound"}),
        )
        .await;
    let (status, _) = app
        .post(
            "/api/v1/runs",
            json!({
                "type": "resume_session",
                "prompt": "continue",
                "session_id": other["session_id"],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

/// Runner status reports from the wrong runner are rejected.
#[tokio::test]
async fn test_report_runner_mismatch() {
    let app = test_app().await;

    let (_, created) = app
        .post(
            "/api/v1/runs",
            json!({"type": "start_session", "prompt": "hello"}),
        )
        .await;
    let run_id = created["run_id"].as_str().unwrap();

    let claimant = app.register_runner(&[]).await;
    let imposter = app.register_runner(&[]).await;
    let (_, envelope) = app.poll(&claimant).await;
    assert!(envelope["run"].is_object());

    let (status, _) = app
        .post(
            &format!("/api/v1/runner/runs/{run_id}/started"),
            json!({"runner_id": imposter}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}
