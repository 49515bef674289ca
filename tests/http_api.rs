// HTTP surface tests: drive the axum router in-process with `oneshot`.

mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use itt_backend::api::{self, AppState};
use itt_backend::db::Database;
use itt_backend::matches::code;
use itt_backend::rate_limit::RateLimiter;

use common::{graded, memory_db};

const ADMIN_TOKEN: &str = "admin-secret";

fn app(db: Arc<Database>) -> Router {
    api::router(AppState::new(db, RateLimiter::new(), Some(ADMIN_TOKEN)))
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

/// Sign up a guest and give them one graded minimum-wage/support session.
/// Returns (token, user id, session id).
async fn guest_with_session(app: &Router, db: &Database, name: &str, score: i64) -> (String, String, String) {
    let (status, body) = send(
        app,
        "POST",
        "/api/auth/guest",
        None,
        Some(json!({ "display_name": name })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let token = body["token"].as_str().unwrap().to_string();
    let user_id = body["user"]["id"].as_str().unwrap().to_string();
    let session = db
        .record_session(&graded(&user_id, "minimum-wage", "support", score))
        .await
        .unwrap();
    (token, user_id, session.id)
}

#[tokio::test]
async fn test_health_and_prompts() {
    let app = app(memory_db().await);

    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok", "service": "itt-backend" }));

    let (status, body) = send(&app, "GET", "/api/prompts", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().len() >= 5);

    let (status, body) = send(&app, "GET", "/api/prompts/minimum-wage", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["positions"], json!(["support", "oppose"]));

    let (status, _) = send(&app, "GET", "/api/prompts/nope", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_guest_and_me() {
    let app = app(memory_db().await);

    let (status, body) = send(&app, "POST", "/api/auth/guest", None, None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["display_name"], "Guest");
    let token = body["token"].as_str().unwrap().to_string();

    let (status, me) = send(&app, "GET", "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], body["user"]["id"]);

    let (status, _) = send(&app, "GET", "/api/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app, "GET", "/api/auth/me", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let long_name = "x".repeat(41);
    let (status, _) = send(
        &app,
        "POST",
        "/api/auth/guest",
        None,
        Some(json!({ "display_name": long_name })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// The whole challenge flow over HTTP, including every rejection a third
/// player can run into.
#[tokio::test]
async fn test_match_flow_over_http() {
    let db = memory_db().await;
    let app = app(db.clone());
    let (alice, _, alice_session) = guest_with_session(&app, &db, "Alice", 81).await;
    let (bob, _, bob_session) = guest_with_session(&app, &db, "Bob", 64).await;
    let (carol, _, _) = guest_with_session(&app, &db, "Carol", 50).await;

    // 1. Create
    let (status, created) = send(
        &app,
        "POST",
        "/api/matches",
        Some(&alice),
        Some(json!({ "source_session_id": alice_session })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["existing_match"], false);
    let match_id = created["match_id"].as_str().unwrap().to_string();
    let match_code = created["match_code"].as_str().unwrap().to_string();

    // Creating again hands back the open match (camelCase accepted too)
    let (status, again) = send(
        &app,
        "POST",
        "/api/matches",
        Some(&alice),
        Some(json!({ "sourceSessionId": alice_session })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["existing_match"], true);
    assert_eq!(again["match_id"], match_id.as_str());

    // 2. Fetch by code while pending
    let (status, view) = send(&app, "GET", &format!("/api/matches/{match_code}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["is_completed"], false);
    assert_eq!(view["match"]["status"], "pending");
    assert_eq!(view["position"], "support");

    // 3. Join: self-join forbidden, Bob admitted, Carol too late
    let join_uri = format!("/api/matches/{}/join", match_code.to_lowercase());
    let (status, body) = send(&app, "POST", &join_uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "cannot_join_own_match");

    let (status, joined) = send(&app, "POST", &join_uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(joined["match_id"], match_id.as_str());
    assert_eq!(joined["prompt_id"], "minimum-wage");
    assert_eq!(joined["already_joined"], false);

    let (status, joined) = send(&app, "POST", &join_uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(joined["already_joined"], true);

    let (status, body) = send(&app, "POST", &join_uri, Some(&carol), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "challenge_already_accepted");

    // Results are not available yet
    let results_uri = format!("/api/matches/{match_id}/results");
    let (status, body) = send(&app, "GET", &results_uri, None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "match_not_completed");

    // 4. Link: Carol is not a participant, Bob completes the match
    let link_uri = format!("/api/matches/{match_id}/link");
    let (status, body) = send(
        &app,
        "POST",
        &link_uri,
        Some(&carol),
        Some(json!({ "session_id": bob_session })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "not_a_participant");

    let (status, linked) = send(
        &app,
        "POST",
        &link_uri,
        Some(&bob),
        Some(json!({ "session_id": bob_session })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(linked["match_completed"], true);
    assert_eq!(linked["match_code"], match_code.as_str());

    // 5. Results and the completed view
    let (status, results) = send(&app, "GET", &results_uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(results["winner"], "creator");
    assert_eq!(results["creator"]["session"]["score"], 81);
    assert_eq!(results["opponent"]["session"]["score"], 64);
    assert_eq!(results["opponent"]["display_name"], "Bob");

    let (status, view) = send(&app, "GET", &format!("/api/matches/{match_code}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["is_completed"], true);
    assert_eq!(view["results"]["winner"], "creator");

    let (status, body) = send(&app, "POST", &join_uri, Some(&carol), None).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["code"], "match_completed");

    // 6. History
    let (status, history) = send(&app, "GET", "/api/matches/history?limit=5", Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["total"], 1);
    assert_eq!(history["has_more"], false);
    assert_eq!(history["matches"][0]["role"], "creator");
    assert_eq!(history["matches"][0]["winner"], "creator");
}

#[tokio::test]
async fn test_create_errors() {
    let db = memory_db().await;
    let app = app(db.clone());
    let (alice, _, _) = guest_with_session(&app, &db, "Alice", 70).await;
    let (_, _, bob_session) = guest_with_session(&app, &db, "Bob", 70).await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/matches",
        None,
        Some(json!({ "source_session_id": bob_session })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &app,
        "POST",
        "/api/matches",
        Some(&alice),
        Some(json!({ "source_session_id": bob_session })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "session_not_owned");

    let (status, body) = send(
        &app,
        "POST",
        "/api/matches",
        Some(&alice),
        Some(json!({ "source_session_id": "missing" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "session_not_found");

    let (status, body) = send(&app, "GET", "/api/matches/ZZZZ9999", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "match_not_found");
}

#[tokio::test]
async fn test_join_expired_match_is_gone() {
    let db = memory_db().await;
    let app = app(db.clone());
    let (_, alice_id, alice_session) = guest_with_session(&app, &db, "Alice", 70).await;
    let (bob, _, _) = guest_with_session(&app, &db, "Bob", 70).await;

    let m = db
        .create_match(
            &alice_id,
            &alice_session,
            "minimum-wage",
            Utc::now() - Duration::hours(25),
            code::generate,
        )
        .await
        .unwrap();

    let (status, body) = send(&app, "POST", &format!("/api/matches/{}/join", m.code), Some(&bob), None).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["code"], "match_expired");

    let (status, view) = send(&app, "GET", &format!("/api/matches/{}", m.code), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["match"]["status"], "expired");
}

#[tokio::test]
async fn test_create_rate_limit() {
    let db = memory_db().await;
    let app = app(db.clone());
    let (alice, _, alice_session) = guest_with_session(&app, &db, "Alice", 70).await;
    let body = json!({ "source_session_id": alice_session, "force_new": true });

    for _ in 0..20 {
        let (status, _) = send(&app, "POST", "/api/matches", Some(&alice), Some(body.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, body) = send(&app, "POST", "/api/matches", Some(&alice), Some(body)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["error"].as_str().unwrap().contains("Rate limit exceeded"));
}

#[tokio::test]
async fn test_admin_routes() {
    let db = memory_db().await;
    let app = app(db.clone());
    let (_, alice_id, alice_session) = guest_with_session(&app, &db, "Alice", 70).await;
    db.create_match(
        &alice_id,
        &alice_session,
        "minimum-wage",
        Utc::now() - Duration::hours(26),
        code::generate,
    )
    .await
    .unwrap();
    db.create_match(&alice_id, &alice_session, "minimum-wage", Utc::now(), code::generate)
        .await
        .unwrap();

    let (status, _) = send(&app, "GET", "/api/admin/matches/stats", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = |token: &str| {
        Request::builder()
            .uri("/api/admin/matches/stats")
            .header("X-Admin-Token", token)
            .body(Body::empty())
            .unwrap()
    };
    let response = app.clone().oneshot(request("wrong")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.clone().oneshot(request(ADMIN_TOKEN)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let stats: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(stats["pending"], 1);
    assert_eq!(stats["expired"], 1);
    assert_eq!(stats["completed"], 0);
    assert_eq!(stats["total"], 2);

    let expire = Request::builder()
        .method("POST")
        .uri("/api/admin/matches/expire")
        .header("X-Admin-Token", ADMIN_TOKEN)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(expire).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["expired"], 0);
}

#[tokio::test]
async fn test_admin_routes_disabled_without_token() {
    let app = api::router(AppState::new(memory_db().await, RateLimiter::new(), None));
    let request = Request::builder()
        .uri("/api/admin/matches/stats")
        .header("X-Admin-Token", "anything")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    itt_backend::metrics::register_metrics();
    let app = app(memory_db().await);
    send(&app, "GET", "/health", None, None).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("itt_api_requests_total"));
}

#[tokio::test]
async fn test_invalid_links_are_bad_requests() {
    let db = memory_db().await;
    let app = app(db.clone());
    let (alice, _, alice_session) = guest_with_session(&app, &db, "Alice", 70).await;
    let (bob, bob_id, bob_session) = guest_with_session(&app, &db, "Bob", 60).await;
    let opposed = db
        .record_session(&graded(&bob_id, "minimum-wage", "oppose", 90))
        .await
        .unwrap();

    let (_, created) = send(
        &app,
        "POST",
        "/api/matches",
        Some(&alice),
        Some(json!({ "source_session_id": alice_session })),
    )
    .await;
    let match_id = created["match_id"].as_str().unwrap().to_string();
    let match_code = created["match_code"].as_str().unwrap().to_string();

    // Bob's own challenge pins his support session to another match
    let (status, _) = send(
        &app,
        "POST",
        "/api/matches",
        Some(&bob),
        Some(json!({ "source_session_id": bob_session })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(&app, "POST", &format!("/api/matches/{match_code}/join"), Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);

    let link_uri = format!("/api/matches/{match_id}/link");
    let (status, body) = send(
        &app,
        "POST",
        &link_uri,
        Some(&bob),
        Some(json!({ "session_id": opposed.id })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");

    let (status, body) = send(
        &app,
        "POST",
        &link_uri,
        Some(&bob),
        Some(json!({ "session_id": bob_session })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "session_already_linked");

    let (status, body) = send(
        &app,
        "POST",
        &link_uri,
        Some(&alice),
        Some(json!({ "session_id": bob_session })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "participant_already_linked");

    let (status, view) = send(&app, "GET", &format!("/api/matches/{match_code}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["is_completed"], false);
}
