//! HTTP API tests against a server bound to an ephemeral port.

use std::sync::Arc;

use calsync_engine::EventFields;
use calsync_server::config::Config;
use calsync_server::db::MemoryRepository;
use calsync_server::remote::MemoryCalendar;
use calsync_server::sync::{RealtimeWorker, SyncOrchestrator};
use calsync_server::websocket::ConnectionManager;
use calsync_server::{app, AppState};
use reqwest::StatusCode;
use serde_json::{json, Value};

struct TestServer {
    base: String,
    calendar: Arc<MemoryCalendar>,
    client: reqwest::Client,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

async fn spawn_server(config: Config) -> TestServer {
    let calendar = Arc::new(MemoryCalendar::new());
    let orchestrator = Arc::new(SyncOrchestrator::new(
        calendar.clone(),
        Arc::new(MemoryRepository::new()),
    ));
    let (notifications, worker) = RealtimeWorker::new(orchestrator.clone(), 8);
    tokio::spawn(worker.run());

    let state = AppState {
        orchestrator,
        config: Arc::new(config),
        conn_manager: ConnectionManager::new_shared(),
        notifications,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });

    TestServer {
        base: format!("http://{}", addr),
        calendar,
        client: reqwest::Client::new(),
    }
}

#[tokio::test]
async fn test_health() {
    let server = spawn_server(Config::default()).await;

    let response = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let root = server.client.get(server.url("/")).send().await.unwrap();
    assert_eq!(root.text().await.unwrap(), "Calsync Server");
}

#[tokio::test]
async fn test_event_crud_and_sync() {
    let server = spawn_server(Config::default()).await;

    let response = server
        .client
        .put(server.url("/events/evt-1"))
        .json(&json!({"title": "Lunch", "start": 1000, "end": 2000}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let event: Value = response.json().await.unwrap();
    assert_eq!(event["id"], "evt-1");
    assert_eq!(event["revision"], 1);

    let created = server
        .client
        .post(server.url("/events"))
        .json(&json!({"title": "Standup", "start": 3000, "end": 4000, "location": "Room 2"}))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);

    let events: Vec<Value> = server
        .client
        .get(server.url("/events"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(events.len(), 2);

    let report: Value = server
        .client
        .post(server.url("/sync/full"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["mode"], "full");
    assert_eq!(report["summary"]["createRemote"], 2);
    assert_eq!(report["status"]["state"], "completed");
    assert_eq!(server.calendar.len().await, 2);

    let status: Value = server
        .client
        .get(server.url("/sync/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"]["state"], "completed");
    assert_eq!(status["progress"], 1.0);

    let deleted = server
        .client
        .delete(server.url("/events/evt-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let missing = server
        .client
        .get(server.url("/events/evt-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_conflict_resolution_over_http() {
    let server = spawn_server(Config::default()).await;

    server
        .client
        .put(server.url("/events/evt-1"))
        .json(&json!({"title": "Meeting", "start": 1000, "end": 2000}))
        .send()
        .await
        .unwrap();
    server
        .client
        .post(server.url("/sync/full"))
        .send()
        .await
        .unwrap();

    server
        .client
        .put(server.url("/events/evt-1"))
        .json(&json!({"title": "Lunch", "start": 1000, "end": 2000}))
        .send()
        .await
        .unwrap();
    let remote = server.calendar.events().await.remove(0);
    server
        .calendar
        .update_external(&remote.remote_id, EventFields::new("Dinner", 1_000, 2_000))
        .await
        .unwrap();

    let report: Value = server
        .client
        .post(server.url("/sync/incremental"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["conflicts"], 1);
    assert_eq!(report["status"]["state"], "conflictsPending");

    let conflicts: Vec<Value> = server
        .client
        .get(server.url("/conflicts"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0]["kind"], "titleMismatch");

    let resolved = server
        .client
        .post(server.url("/conflicts/evt-1/resolve"))
        .json(&json!({"resolution": "useRemote"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resolved.status(), StatusCode::OK);
    let resolved: Value = resolved.json().await.unwrap();
    assert_eq!(resolved["outcome"], "applied");
    assert_eq!(resolved["event"]["title"], "Dinner");
    assert_eq!(resolved["remaining"], 0);
    assert_eq!(resolved["status"]["state"], "completed");
}

#[tokio::test]
async fn test_error_mapping() {
    let server = spawn_server(Config::default()).await;

    let no_conflicts = server
        .client
        .post(server.url("/conflicts/evt-1/resolve"))
        .json(&json!({"resolution": "useLocal"}))
        .send()
        .await
        .unwrap();
    assert_eq!(no_conflicts.status(), StatusCode::NOT_FOUND);
    let body: Value = no_conflicts.json().await.unwrap();
    assert_eq!(body["error"], "no conflicts pending");

    let inverted = server
        .client
        .put(server.url("/events/evt-1"))
        .json(&json!({"title": "Backwards", "start": 2000, "end": 1000}))
        .send()
        .await
        .unwrap();
    assert_eq!(inverted.status(), StatusCode::BAD_REQUEST);

    let unknown = server
        .client
        .delete(server.url("/events/evt-404"))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let cancel: Value = server
        .client
        .post(server.url("/sync/cancel"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cancel["cancelled"], false);
}

#[tokio::test]
async fn test_auth_secret() {
    let config = Config {
        auth_secret: Some("s3cret".to_string()),
        ..Config::default()
    };
    let server = spawn_server(config).await;

    let anonymous = server.client.get(server.url("/events")).send().await.unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    let body: Value = anonymous.json().await.unwrap();
    assert_eq!(body["error"], "Unauthorized");
    assert_eq!(body["details"], "Missing authorization header");

    let wrong = server
        .client
        .get(server.url("/events"))
        .bearer_auth("guess")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let ok = server
        .client
        .get(server.url("/events"))
        .bearer_auth("s3cret")
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    // Health stays open
    let health = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_realtime_toggle_and_notifications() {
    let server = spawn_server(Config::default()).await;

    let toggled: Value = server
        .client
        .put(server.url("/realtime"))
        .json(&json!({"enabled": true}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(toggled["enabled"], true);

    let accepted = server
        .client
        .post(server.url("/notifications"))
        .json(&json!({"remoteId": "r-1", "resourceState": "exists"}))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::ACCEPTED);
}
