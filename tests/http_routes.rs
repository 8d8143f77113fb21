mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use common::Harness;
use groups_backend::{AppState, router::build_router};
use serde_json::{Value, json};
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    let state = AppState {
        config: h.config.clone(),
        groups: h.groups.clone(),
        accounts: h.accounts.clone(),
    };
    build_router(state, None)
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn register(app: &Router, username: &str) -> String {
    let (status, body) = call(
        app,
        "POST",
        "/api/users/register",
        None,
        Some(json!({ "username": username, "password": "secret-pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["code"], 0);
    body["resp_data"]["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn group_lifecycle_over_http() {
    let h = Harness::new();
    let app = app(&h);
    let alice = register(&app, "alice").await;
    let bob = register(&app, "bob").await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/groups/create",
        Some(&alice),
        Some(json!({ "username": "hikers", "name": "Hikers" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let group_id = body["resp_data"]["id"].as_i64().unwrap();

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/groups/{group_id}/join"),
        Some(&bob),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resp_data"]["membership_state"], "MEMBER");

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/groups/{group_id}/join"),
        Some(&bob),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], 2001);

    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/groups/{group_id}/edit"),
        Some(&bob),
        Some(json!({ "name": "Bob's Hikers" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &app,
        "GET",
        &format!("/api/groups/{group_id}"),
        Some(&bob),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resp_data"]["group"]["member_count"], 2);
    assert_eq!(body["resp_data"]["admin_level"], "NONE");
    assert_eq!(body["resp_data"]["admins"][0]["level"], "OWNER");

    let (status, body) = call(
        &app,
        "GET",
        &format!("/api/groups/{group_id}/members?offset=0"),
        Some(&alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resp_data"]["members"].as_array().unwrap().len(), 2);

    let (status, body) = call(&app, "GET", "/api/groups/my", Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resp_data"][0]["id"], group_id);

    h.dispatcher.shutdown().await;
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let h = Harness::new();
    let app = app(&h);

    let (status, _) = call(&app, "GET", "/api/groups/my", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = call(&app, "GET", "/api/groups/my", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    h.dispatcher.shutdown().await;
}

#[tokio::test]
async fn login_checks_password() {
    let h = Harness::new();
    let app = app(&h);
    register(&app, "carol").await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/users/login",
        None,
        Some(json!({ "username": "Carol", "password": "secret-pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resp_data"]["username"], "carol");

    let (status, body) = call(
        &app,
        "POST",
        "/api/users/login",
        None,
        Some(json!({ "username": "carol", "password": "wrong-pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 1002);

    h.dispatcher.shutdown().await;
}
