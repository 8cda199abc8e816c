//! Integration tests for the HTTP control plane and SSE streaming.
//!
//! Exercises job lifecycle (submit, claim, heartbeat, cancel, terminal),
//! the event log, artifact download, worker-pause, and the manifest
//! registry end to end through the router.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use forgequeue_core::events::{EventPayload, SubmittedPayload};
use forgequeue_core::{
    Artifact, Id, JobPayload, JobSubmission, TaskGit, TaskPayload, TaskPublish, TaskRuntime,
};
use forgequeued::pause::PauseGate;
use forgequeued::queue::QueueService;
use forgequeued::server::{create_router, AppState};
use forgequeued::storage::Storage;
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

async fn create_test_app() -> (axum::Router, Arc<AppState>, TempDir) {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("test.db");
    let storage = Storage::new(&db_path).await.unwrap();
    storage.migrate_embedded().await.unwrap();
    let storage = Arc::new(storage);
    let pause_gate = Arc::new(PauseGate::new(Arc::clone(&storage)));
    let queue = Arc::new(QueueService::new(Arc::clone(&storage), Arc::clone(&pause_gate), 300));

    let state = Arc::new(AppState { storage, queue, pause_gate, auth_token: None });
    let router = create_router(Arc::clone(&state));
    (router, state, dir)
}

async fn body_to_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn sample_submission() -> JobSubmission {
    JobSubmission {
        payload: JobPayload::Task(TaskPayload {
            repository: "acme/widgets".to_string(),
            instructions: "fix the flaky test".to_string(),
            skill: None,
            runtime: TaskRuntime { mode: "codex".to_string(), model: None, effort: None },
            git: TaskGit::default(),
            publish: TaskPublish::default(),
            steps: vec![],
            applied_step_templates: vec![],
        }),
        priority: 0,
        max_attempts: 3,
        affinity_key: None,
        required_capabilities: None,
        queue_name: None,
    }
}

async fn post(app: &axum::Router, uri: &str, body: Value) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn get(app: &axum::Router, uri: &str) -> Response {
    app.clone().oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await.unwrap()
}

// --- Job lifecycle ---

#[tokio::test]
async fn job_lifecycle_submit_claim_heartbeat_terminal() {
    let (app, _, _dir) = create_test_app().await;

    let response = post(&app, "/queue/jobs", serde_json::to_value(sample_submission()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_to_json(response).await;
    let job_id = json["job"]["id"].as_str().unwrap().to_string();
    assert_eq!(json["job"]["status"], "queued");

    // Claim as an external worker.
    let response = post(
        &app,
        "/queue/jobs/claim",
        serde_json::json!({ "worker_id": "worker-1" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response).await;
    assert_eq!(json["job"]["id"], job_id);
    assert_eq!(json["job"]["status"], "running");
    assert_eq!(json["job"]["worker_id"].is_null(), false);

    // A second claim finds nothing left to claim.
    let response =
        post(&app, "/queue/jobs/claim", serde_json::json!({ "worker_id": "worker-2" })).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response).await;
    assert!(json["job"].is_null());

    // Heartbeat renews the lease.
    let response =
        post(&app, &format!("/queue/jobs/{job_id}/heartbeat"), serde_json::json!({ "worker_id": "worker-1" }))
            .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Heartbeat from the wrong worker is rejected.
    let response = post(
        &app,
        &format!("/queue/jobs/{job_id}/heartbeat"),
        serde_json::json!({ "worker_id": "worker-2" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Report a successful terminal outcome.
    let response = post(
        &app,
        &format!("/queue/jobs/{job_id}/terminal"),
        serde_json::json!({ "worker_id": "worker-1", "outcome": "success" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response).await;
    assert_eq!(json["job"]["status"], "succeeded");

    let response = get(&app, &format!("/queue/jobs/{job_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response).await;
    assert_eq!(json["job"]["status"], "succeeded");
}

#[tokio::test]
async fn job_cancel_requires_running_or_queued() {
    let (app, _, _dir) = create_test_app().await;

    let response = post(&app, "/queue/jobs", serde_json::to_value(sample_submission()).unwrap()).await;
    let json = body_to_json(response).await;
    let job_id = json["job"]["id"].as_str().unwrap().to_string();

    let response =
        post(&app, &format!("/queue/jobs/{job_id}/cancel"), serde_json::json!({ "reason": "no longer needed" }))
            .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = get(&app, &format!("/queue/jobs/{job_id}")).await;
    let json = body_to_json(response).await;
    assert_eq!(json["job"]["cancel_reason"], "no longer needed");
}

#[tokio::test]
async fn get_nonexistent_job_returns_404() {
    let (app, _, _dir) = create_test_app().await;
    let response = get(&app, "/queue/jobs/nonexistent-id").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_to_json(response).await;
    assert_eq!(json["detail"]["code"], "not_found");
}

#[tokio::test]
async fn list_jobs_filters_by_status_and_type() {
    let (app, _, _dir) = create_test_app().await;

    for _ in 0..3 {
        post(&app, "/queue/jobs", serde_json::to_value(sample_submission()).unwrap()).await;
    }

    let response = get(&app, "/queue/jobs?status=queued&job_type=task&limit=10").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response).await;
    assert_eq!(json["jobs"].as_array().unwrap().len(), 3);

    let response = get(&app, "/queue/jobs?status=running").await;
    let json = body_to_json(response).await;
    assert_eq!(json["jobs"].as_array().unwrap().len(), 0);
}

// --- Events ---

#[tokio::test]
async fn events_round_trip_and_paginate() {
    let (app, state, _dir) = create_test_app().await;

    let response = post(&app, "/queue/jobs", serde_json::to_value(sample_submission()).unwrap()).await;
    let json = body_to_json(response).await;
    let job_id = Id::from_string(json["job"]["id"].as_str().unwrap().to_string());

    for i in 0..3 {
        let payload = EventPayload::Submitted(SubmittedPayload {
            job_id: job_id.clone(),
            job_type: "task".to_string(),
            priority: i,
        });
        state.queue.append_event(&job_id, &payload, &format!("event {i}")).await.unwrap();
    }

    let response = get(&app, &format!("/queue/jobs/{job_id}/events")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response).await;
    let events = json["events"].as_array().unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0]["message"], "event 0");

    let after_id = events[0]["id"].as_i64().unwrap();
    let response = get(&app, &format!("/queue/jobs/{job_id}/events?after_event_id={after_id}")).await;
    let json = body_to_json(response).await;
    assert_eq!(json["events"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn stream_events_returns_sse_content_type_and_backfill() {
    let (app, state, _dir) = create_test_app().await;

    let response = post(&app, "/queue/jobs", serde_json::to_value(sample_submission()).unwrap()).await;
    let json = body_to_json(response).await;
    let job_id_str = json["job"]["id"].as_str().unwrap().to_string();
    let job_id = Id::from_string(job_id_str.clone());

    let payload = EventPayload::Submitted(SubmittedPayload {
        job_id: job_id.clone(),
        job_type: "task".to_string(),
        priority: 0,
    });
    state.queue.append_event(&job_id, &payload, "submitted").await.unwrap();

    // Cancel so the job is terminal and the SSE stream ends after backfill.
    state.queue.request_cancel(&job_id, Some("test")).await.unwrap();
    state.queue.report_terminal(&job_id, "worker-x", forgequeue_core::JobOutcome::Cancelled, None).await.ok();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/queue/jobs/{job_id_str}/events/stream"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body_str = String::from_utf8_lossy(&bytes);
    assert!(body_str.contains("submitted"));
}

// --- Artifacts ---

#[tokio::test]
async fn artifacts_list_and_download() {
    let (app, state, dir) = create_test_app().await;

    let response = post(&app, "/queue/jobs", serde_json::to_value(sample_submission()).unwrap()).await;
    let json = body_to_json(response).await;
    let job_id = Id::from_string(json["job"]["id"].as_str().unwrap().to_string());

    let (path, _hash, size) =
        forgequeue_core::write_artifact(dir.path(), &job_id, "patch.diff", b"diff --git a b\n").unwrap();
    let artifact = Artifact {
        id: Id::new(),
        job_id: job_id.clone(),
        name: "patch.diff".to_string(),
        size_bytes: size,
        content_type: "text/x-diff".to_string(),
        created_at: chrono::Utc::now(),
        storage_ref: path.to_string_lossy().to_string(),
    };
    state.queue.insert_artifact(&artifact).await.unwrap();

    let response = get(&app, &format!("/queue/jobs/{job_id}/artifacts")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response).await;
    let artifacts = json["artifacts"].as_array().unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0]["name"], "patch.diff");

    let response = get(&app, &format!("/queue/jobs/{job_id}/artifacts/{}", artifact.id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"diff --git a b\n");
}

// --- Worker pause ---

#[tokio::test]
async fn pause_blocks_claims_until_resumed() {
    let (app, _, _dir) = create_test_app().await;

    let response = post(&app, "/queue/jobs", serde_json::to_value(sample_submission()).unwrap()).await;
    let json = body_to_json(response).await;
    let job_id = json["job"]["id"].as_str().unwrap().to_string();

    let response =
        post(&app, "/system/worker-pause", serde_json::json!({ "mode": "drain", "reason": "maintenance" })).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response).await;
    assert_eq!(json["system"]["workersPaused"], true);
    assert_eq!(json["system"]["mode"], "drain");
    assert_eq!(json["metrics"]["queued"], 1);
    assert_eq!(json["metrics"]["running"], 0);
    assert_eq!(json["audit"]["latest"][0]["action"], "pause");

    let response = post(&app, "/queue/jobs/claim", serde_json::json!({ "worker_id": "worker-1" })).await;
    let json = body_to_json(response).await;
    assert!(json["job"].is_null());

    // Resume without force succeeds because nothing is running.
    let response = post(
        &app,
        "/system/worker-pause/resume",
        serde_json::json!({ "reason": "maintenance done", "force_resume": false }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response).await;
    assert_eq!(json["system"]["workersPaused"], false);

    let response = post(&app, "/queue/jobs/claim", serde_json::json!({ "worker_id": "worker-1" })).await;
    let json = body_to_json(response).await;
    assert_eq!(json["job"]["id"], job_id);
}

#[tokio::test]
async fn resume_without_force_conflicts_while_running() {
    let (app, _, _dir) = create_test_app().await;

    post(&app, "/queue/jobs", serde_json::to_value(sample_submission()).unwrap()).await;
    post(&app, "/queue/jobs/claim", serde_json::json!({ "worker_id": "worker-1" })).await;
    post(&app, "/system/worker-pause", serde_json::json!({ "reason": "maintenance" })).await;

    let response = post(
        &app,
        "/system/worker-pause/resume",
        serde_json::json!({ "reason": "too soon", "force_resume": false }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = post(
        &app,
        "/system/worker-pause/resume",
        serde_json::json!({ "reason": "overridden", "force_resume": true }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

// --- Proposals ---

#[tokio::test]
async fn proposal_lifecycle_create_promote_dismiss() {
    let (app, _, _dir) = create_test_app().await;

    let create_body = serde_json::json!({
        "repository": "acme/widgets",
        "category": "reliability",
        "tags": ["flaky"],
        "dedup_hash": "hash-1",
        "origin": {"source": "flaky-scan", "id": "scan-1", "metadata": null},
        "task_preview": "fix flaky test",
        "task_create_request": sample_submission(),
    });
    let response = post(&app, "/proposals", create_body).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_to_json(response).await;
    let proposal_id = json["proposal"]["id"].as_str().unwrap().to_string();
    assert_eq!(json["proposal"]["status"], "open");

    let response = get(&app, &format!("/proposals/{proposal_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response =
        post(&app, &format!("/proposals/{proposal_id}/priority"), serde_json::json!({ "priority": "high" })).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = post(&app, &format!("/proposals/{proposal_id}/promote"), serde_json::json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response).await;
    assert_eq!(json["job"]["status"], "queued");

    // A second promote attempt fails: the proposal is already terminal.
    let response = post(&app, &format!("/proposals/{proposal_id}/promote"), serde_json::json!({})).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn proposal_list_excludes_snoozed_by_default() {
    let (app, _, _dir) = create_test_app().await;

    let create_body = serde_json::json!({
        "repository": "acme/widgets",
        "category": "reliability",
        "dedup_hash": "hash-2",
        "origin": {"source": "flaky-scan", "id": "scan-2", "metadata": null},
        "task_create_request": sample_submission(),
    });
    let response = post(&app, "/proposals", create_body).await;
    let json = body_to_json(response).await;
    let proposal_id = json["proposal"]["id"].as_str().unwrap().to_string();

    let until = (chrono::Utc::now() + chrono::Duration::days(1)).to_rfc3339();
    let response = post(&app, &format!("/proposals/{proposal_id}/snooze"), serde_json::json!({ "until": until })).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = get(&app, "/proposals").await;
    let json = body_to_json(response).await;
    assert_eq!(json["proposals"].as_array().unwrap().len(), 0);

    let response = get(&app, "/proposals?include_snoozed=true").await;
    let json = body_to_json(response).await;
    assert_eq!(json["proposals"].as_array().unwrap().len(), 1);

    let response = post(&app, &format!("/proposals/{proposal_id}/unsnooze"), serde_json::json!({})).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = get(&app, "/proposals").await;
    let json = body_to_json(response).await;
    assert_eq!(json["proposals"].as_array().unwrap().len(), 1);
}

// --- Manifests ---

#[tokio::test]
async fn manifest_put_get_and_run() {
    let (app, _, _dir) = create_test_app().await;

    let yaml = "data_sources:\n  - id: local\n    type: filesystem\n    path: /tmp\nembedding:\n  provider: local\n  model: sha256\n  dimensions: 8\n  distance: cosine\ntarget:\n  collection: docs\n";
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/manifests/docs")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&serde_json::json!({ "yaml": yaml })).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response).await;
    let content_hash = json["manifest"]["content_hash"].as_str().unwrap().to_string();

    let response = get(&app, "/manifests/docs").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response).await;
    assert_eq!(json["manifest"]["content_hash"], content_hash);

    let response = post(&app, "/manifests/docs/runs", serde_json::json!({ "dry_run": true })).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_to_json(response).await;
    assert_eq!(json["job"]["type"], "manifest");

    let response = post(&app, "/manifests/unknown/runs", serde_json::json!({})).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// --- Auth ---

#[tokio::test]
async fn auth_token_blocks_unauthorized_requests() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("test.db");
    let storage = Storage::new(&db_path).await.unwrap();
    storage.migrate_embedded().await.unwrap();
    let storage = Arc::new(storage);
    let pause_gate = Arc::new(PauseGate::new(Arc::clone(&storage)));
    let queue = Arc::new(QueueService::new(Arc::clone(&storage), Arc::clone(&pause_gate), 300));

    let state = Arc::new(AppState { storage, queue, pause_gate, auth_token: Some("test-secret-token".to_string()) });
    let app = create_router(state);

    for uri in ["/queue/jobs", "/system/worker-pause", "/proposals"] {
        let response: Response =
            app.clone().oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "expected UNAUTHORIZED for {uri}");
    }

    let response: Response = app
        .oneshot(
            Request::builder()
                .uri("/queue/jobs")
                .header("authorization", "Bearer test-secret-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_token_rejects_invalid_token() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("test.db");
    let storage = Storage::new(&db_path).await.unwrap();
    storage.migrate_embedded().await.unwrap();
    let storage = Arc::new(storage);
    let pause_gate = Arc::new(PauseGate::new(Arc::clone(&storage)));
    let queue = Arc::new(QueueService::new(Arc::clone(&storage), Arc::clone(&pause_gate), 300));

    let state = Arc::new(AppState { storage, queue, pause_gate, auth_token: Some("correct-token".to_string()) });
    let app = create_router(state);

    let response: Response = app
        .oneshot(
            Request::builder()
                .uri("/queue/jobs")
                .header("authorization", "Bearer wrong-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
