//! Integration tests for the Observer API endpoints.
//!
//! Tests use Axum's `Router` directly via `tower::ServiceExt` without
//! starting a TCP server. A real queue engine runs over the in-memory
//! repository, so every write goes through the same path as production.

#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use encore_core::{AllowAll, BroadcastHub, EngineSettings, QueueEngine};
use encore_db::{InMemoryRepository, VideoMetadata};
use encore_ingest::{IngestError, IngestionAdapter, MetadataSource, VideoLink};
use encore_observer::connection::answer;
use encore_observer::router::build_router;
use encore_observer::state::{AppState, ObserverOptions};
use encore_types::{ClientMessage, ServerMessage, UserHistoryQuery};
use futures::StreamExt;
use serde_json::{Value, json};
use tower::ServiceExt;

struct StubMetadata;

#[async_trait]
impl MetadataSource for StubMetadata {
    async fn lookup(&self, video: &VideoLink) -> Result<VideoMetadata, IngestError> {
        Ok(VideoMetadata {
            title: format!("Video {}", video.video_id),
            duration_seconds: Some(200),
            thumbnail_url: None,
            channel_name: Some(String::from("Some Channel")),
            fetched_at: Utc::now(),
        })
    }
}

async fn make_test_state() -> Arc<AppState> {
    let hub = Arc::new(BroadcastHub::new(64, 50));
    let engine = QueueEngine::load(
        Arc::new(InMemoryRepository::new()),
        Arc::clone(&hub),
        Box::new(AllowAll),
        EngineSettings::default(),
    )
    .await
    .unwrap();
    let (handle, _task) = engine.spawn();
    let ingest = IngestionAdapter::new(handle.clone(), Arc::new(StubMetadata));
    Arc::new(AppState::new(
        hub,
        handle,
        ingest,
        ObserverOptions::default(),
    ))
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(router: &Router, path: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(Request::get(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    (status, body_to_json(response.into_body()).await)
}

async fn post(router: &Router, path: &str, body: &Value) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::post(path)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    (status, body_to_json(response.into_body()).await)
}

fn submission(login: &str, video_id: &str, request_type: &str) -> Value {
    json!({
        "requesterLogin": login,
        "songLink": format!("https://youtu.be/{video_id}"),
        "type": request_type,
    })
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_index_returns_html() {
    let router = build_router(make_test_state().await);

    let response = router
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.contains("text/html"));
}

#[tokio::test]
async fn test_empty_state() {
    let router = build_router(make_test_state().await);

    let (status, json) = get(&router, "/api/state").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["queue"], json!([]));
    assert!(json["activeSong"].is_null());
    assert_eq!(json["degraded"], false);
}

#[tokio::test]
async fn test_submit_orders_by_priority() {
    let router = build_router(make_test_state().await);

    let (status, first) = post(
        &router,
        "/api/requests",
        &submission("viewer_a", "aaaaaaaaaaa", "channel_points"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["songTitle"], "Video aaaaaaaaaaa");
    assert_eq!(first["priority"], "low");

    let (status, _) = post(
        &router,
        "/api/requests",
        &submission("viewer_b", "bbbbbbbbbbb", "donation"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, state) = get(&router, "/api/state").await;
    assert_eq!(state["queue"][0]["requester"]["login"], "viewer_b");
    assert_eq!(state["queue"][1]["requester"]["login"], "viewer_a");
}

#[tokio::test]
async fn test_submit_invalid_link_is_bad_request() {
    let router = build_router(make_test_state().await);

    let body = json!({
        "requesterLogin": "viewer",
        "songLink": "not a url",
        "type": "donation",
    });
    let (status, json) = post(&router, "/api/requests", &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], 400);
}

#[tokio::test]
async fn test_submit_while_paused_is_conflict() {
    let router = build_router(make_test_state().await);

    let (status, _) = post(
        &router,
        "/api/operator/settings",
        &json!({"key": "queue_enabled", "value": false}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = post(
        &router,
        "/api/requests",
        &submission("viewer", "ccccccccccc", "donation"),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("closed"));

    let (_, state) = get(&router, "/api/state").await;
    assert_eq!(state["settings"]["queue_enabled"], false);
    assert_eq!(state["queue"], json!([]));
}

#[tokio::test]
async fn test_invalid_setting_value_is_bad_request() {
    let router = build_router(make_test_state().await);

    let (status, _) = post(
        &router,
        "/api/operator/settings",
        &json!({"key": "queue_enabled", "value": "nope"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_blocked_user_is_rejected() {
    let router = build_router(make_test_state().await);

    let (status, _) = post(
        &router,
        "/api/operator/block",
        &json!({"login": "Troll", "blocked": true}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post(
        &router,
        "/api/requests",
        &submission("troll", "ddddddddddd", "donation"),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_advance_then_finish_moves_song_to_history() {
    let router = build_router(make_test_state().await);
    let (_, accepted) = post(
        &router,
        "/api/requests",
        &submission("viewer", "eeeeeeeeeee", "donation"),
    )
    .await;

    let (status, advanced) = post(&router, "/api/operator/advance", &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(advanced["active"]["id"], accepted["id"]);

    let (_, state) = get(&router, "/api/state").await;
    assert_eq!(state["activeSong"]["id"], accepted["id"]);
    assert_eq!(state["queue"], json!([]));

    let (status, finished) =
        post(&router, "/api/operator/finish", &json!({"id": accepted["id"]})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(finished["finished"], true);

    // Finishing again is a stale no-op.
    let (status, again) =
        post(&router, "/api/operator/finish", &json!({"id": accepted["id"]})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["finished"], false);

    let (_, state) = get(&router, "/api/state").await;
    assert!(state["activeSong"].is_null());
    assert_eq!(state["history"][0]["id"], accepted["id"]);
    assert!(state["history"][0]["completedAt"].is_string());
}

#[tokio::test]
async fn test_advance_empty_queue() {
    let router = build_router(make_test_state().await);

    let (status, json) = post(&router, "/api/operator/advance", &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["active"].is_null());
}

#[tokio::test]
async fn test_remove_unknown_is_not_found() {
    let router = build_router(make_test_state().await);

    let (status, json) = post(
        &router,
        "/api/operator/remove",
        &json!({"id": "0190a5a4-0000-7000-8000-000000000000"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], 404);
}

#[tokio::test]
async fn test_reprioritize_reorders_queue() {
    let router = build_router(make_test_state().await);
    let (_, low) = post(
        &router,
        "/api/requests",
        &submission("viewer_a", "fffffffffff", "channel_points"),
    )
    .await;
    post(
        &router,
        "/api/requests",
        &submission("viewer_b", "ggggggggggg", "donation"),
    )
    .await;

    let (status, _) = post(
        &router,
        "/api/operator/reprioritize",
        &json!({"id": low["id"], "priority": "high"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Equal priority now; the earlier submission wins.
    let (_, state) = get(&router, "/api/state").await;
    assert_eq!(state["queue"][0]["id"], low["id"]);
}

#[tokio::test]
async fn test_user_history_and_stats() {
    let router = build_router(make_test_state().await);
    for video in ["hhhhhhhhhhh", "iiiiiiiiiii"] {
        post(
            &router,
            "/api/requests",
            &submission("Fan", video, "donation"),
        )
        .await;
    }
    // Two advances play both; a third finishes the last one.
    for _ in 0..3 {
        post(&router, "/api/operator/advance", &json!({})).await;
    }

    let (status, page) = get(&router, "/api/users/FAN/history?limit=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 2);
    assert_eq!(page["offset"], 0);
    assert_eq!(page["history"].as_array().unwrap().len(), 1);
    assert_eq!(page["history"][0]["songTitle"], "Video iiiiiiiiiii");

    let (status, page) = get(&router, "/api/users/fan/history?limit=5&offset=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["history"], json!([]));

    let (status, today) = get(&router, "/api/stats/today").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(today["count"], 2);

    let (status, totals) = get(&router, "/api/stats/totals").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(totals["history"], 2);
    assert_eq!(totals["queue"], 0);

    let (status, all_time) = get(&router, "/api/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all_time["uniqueRequesters"], 1);
}

#[tokio::test]
async fn test_user_history_rejects_zero_limit() {
    let router = build_router(make_test_state().await);

    let (status, _) = get(&router, "/api/users/fan/history?limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sse_starts_with_initial_state() {
    let state = make_test_state().await;
    let router = build_router(Arc::clone(&state));

    let response = router
        .oneshot(Request::get("/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.hub.observer_count().await, 1);

    let mut frames = response.into_body().into_data_stream();
    let first = frames.next().await.unwrap().unwrap();
    let text = String::from_utf8(first.to_vec()).unwrap();
    assert!(text.contains("event: initialState"));
    assert!(text.contains("\"event\":\"initialState\""));
}

#[tokio::test]
async fn test_observer_requests_are_answered_in_order() {
    let state = make_test_state().await;
    let mut subscription = state.hub.register().await;
    let initial = subscription.receiver.recv().await.unwrap();
    assert!(matches!(initial, ServerMessage::InitialState(_)));

    answer(&state, subscription.id, ClientMessage::GetAllTimeStats).await;
    answer(
        &state,
        subscription.id,
        ClientMessage::GetUserHistory(UserHistoryQuery {
            user_login: String::from("nobody"),
            limit: 10,
            offset: 0,
        }),
    )
    .await;
    answer(&state, subscription.id, ClientMessage::GetState).await;

    let stats = subscription.receiver.recv().await.unwrap();
    assert!(matches!(stats, ServerMessage::AllTimeStatsUpdate(_)));
    let history = subscription.receiver.recv().await.unwrap();
    match history {
        ServerMessage::UserHistoryData(page) => assert_eq!(page.total, 0),
        other => panic!("unexpected {}", other.event_name()),
    }
    let resync = subscription.receiver.recv().await.unwrap();
    assert!(matches!(resync, ServerMessage::InitialState(_)));
}

#[tokio::test]
async fn test_nonexistent_route_returns_404() {
    let router = build_router(make_test_state().await);

    let response = router
        .oneshot(
            Request::get("/api/nonexistent")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
