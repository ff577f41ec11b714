//! HTTP-level tests for the admin surface, redaction and health monitoring.

mod test_utils;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use connections::server::create_app;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use test_utils::{expire_connection, google_registry, insert_connection, setup_state};

const OPERATOR_TOKEN: &str = "test-operator-token";

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).expect("response is JSON")
}

fn authed_request(method: &str, uri: &str, tenant_id: &Uuid) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {}", OPERATOR_TOKEN))
        .header("X-Tenant-Id", tenant_id.to_string())
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn admin_listing_redacts_all_token_material() {
    let ctx = setup_state(google_registry("https://oauth2.googleapis.com")).await;
    let tenant_id = Uuid::new_v4();

    insert_connection(
        &ctx.state,
        Uuid::new_v4(),
        tenant_id,
        "google",
        "google-user-1",
        "super-secret-access-token",
        Some("super-secret-refresh-token"),
        Some(Utc::now() + Duration::hours(1)),
    )
    .await;

    let app = create_app(ctx.state.clone());
    let response = app
        .oneshot(authed_request("GET", "/admin/connections", &tenant_id))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let raw = String::from_utf8(bytes.to_vec()).unwrap();

    assert!(!raw.contains("super-secret-access-token"));
    assert!(!raw.contains("super-secret-refresh-token"));
    assert!(raw.contains("[REDACTED]"));

    let body: Value = serde_json::from_str(&raw).unwrap();
    let connection = &body["connections"][0];
    assert_eq!(connection["has_access_token"], json!(true));
    assert_eq!(connection["has_refresh_token"], json!(true));
    assert_eq!(connection["provider"], json!("google"));
}

#[tokio::test]
async fn admin_listing_is_tenant_scoped() {
    let ctx = setup_state(google_registry("https://oauth2.googleapis.com")).await;
    let tenant_a = Uuid::new_v4();
    let tenant_b = Uuid::new_v4();

    insert_connection(
        &ctx.state,
        Uuid::new_v4(),
        tenant_a,
        "google",
        "google-user-1",
        "tok-1",
        None,
        None,
    )
    .await;

    let app = create_app(ctx.state.clone());
    let response = app
        .oneshot(authed_request("GET", "/admin/connections", &tenant_b))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["connections"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn admin_stats_counts_by_status_and_provider() {
    let ctx = setup_state(google_registry("https://oauth2.googleapis.com")).await;
    let tenant_id = Uuid::new_v4();

    let first = insert_connection(
        &ctx.state,
        Uuid::new_v4(),
        tenant_id,
        "google",
        "google-user-1",
        "tok-1",
        None,
        None,
    )
    .await;
    insert_connection(
        &ctx.state,
        Uuid::new_v4(),
        tenant_id,
        "google",
        "google-user-2",
        "tok-2",
        None,
        None,
    )
    .await;

    ctx.state
        .oauth
        .revoke_connection(&first.id, "admin@relay.dev", None)
        .await
        .expect("revocation succeeds");

    let app = create_app(ctx.state.clone());
    let response = app
        .oneshot(authed_request("GET", "/admin/stats", &tenant_id))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["total"], json!(2));
    assert_eq!(body["by_status"]["active"], json!(1));
    assert_eq!(body["by_status"]["revoked"], json!(1));
    assert_eq!(body["by_provider"]["google"], json!(2));
}

#[tokio::test]
async fn health_check_reports_expired_without_touching_the_provider() {
    // No wiremock at all: a provider call would error, not short-circuit
    let ctx = setup_state(google_registry("http://127.0.0.1:1")).await;
    let tenant_id = Uuid::new_v4();

    let connection = insert_connection(
        &ctx.state,
        Uuid::new_v4(),
        tenant_id,
        "google",
        "google-user-1",
        "tok-1",
        None,
        Some(Utc::now() + Duration::hours(1)),
    )
    .await;
    expire_connection(&ctx.state, &connection.id).await;

    let app = create_app(ctx.state.clone());
    let response = app
        .oneshot(authed_request(
            "POST",
            &format!("/admin/health/check/{}", connection.id),
            &tenant_id,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["healthy"], json!(false));
    assert_eq!(body["error"], json!("Token expired"));

    // The result was persisted onto the connection's health fields
    let checked = ctx
        .state
        .connection_repo
        .get_by_id(&connection.id)
        .await
        .expect("query succeeds")
        .expect("connection exists");
    assert_eq!(checked.health_check_status.as_deref(), Some("unhealthy"));
    assert!(checked.last_health_check_at.is_some());
}

#[tokio::test]
async fn health_sweep_aggregates_counts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "google-user-1",
            "email": "person@example.com"
        })))
        .mount(&server)
        .await;

    let ctx = setup_state(google_registry(&server.uri())).await;
    let tenant_id = Uuid::new_v4();

    let _live = insert_connection(
        &ctx.state,
        Uuid::new_v4(),
        tenant_id,
        "google",
        "google-user-1",
        "tok-live",
        None,
        Some(Utc::now() + Duration::hours(1)),
    )
    .await;
    let stale = insert_connection(
        &ctx.state,
        Uuid::new_v4(),
        tenant_id,
        "google",
        "google-user-2",
        "tok-stale",
        None,
        Some(Utc::now() + Duration::hours(1)),
    )
    .await;
    expire_connection(&ctx.state, &stale.id).await;

    let summary = ctx
        .state
        .health
        .check_all()
        .await
        .expect("sweep completes");
    assert_eq!(summary.checked, 2);
    assert_eq!(summary.healthy, 1);
    assert_eq!(summary.unhealthy, 1);

    // Health stats reflect the persisted results
    let app = create_app(ctx.state.clone());
    let response = app
        .oneshot(authed_request("GET", "/admin/health/stats", &tenant_id))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["total"], json!(2));
    assert_eq!(body["healthy"], json!(1));
    assert_eq!(body["unhealthy"], json!(1));
}

#[tokio::test]
async fn protected_routes_require_bearer_and_tenant() {
    let ctx = setup_state(google_registry("https://oauth2.googleapis.com")).await;
    let app = create_app(ctx.state.clone());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/token?user_id=6c4f5e2e-2f50-41f1-9a7e-9a45c1a4f2aa&provider=google")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/token?user_id=6c4f5e2e-2f50-41f1-9a7e-9a45c1a4f2aa&provider=google")
                .header("Authorization", format!("Bearer {}", OPERATOR_TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn callback_route_is_public_and_reports_provider_denial() {
    let ctx = setup_state(google_registry("https://oauth2.googleapis.com")).await;
    let app = create_app(ctx.state.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/callback?error=access_denied")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Not a 401: the route sits outside operator auth
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], json!("AUTHORIZATION_DENIED"));
}

#[tokio::test]
async fn unknown_connection_returns_not_found_for_tenant() {
    let ctx = setup_state(google_registry("https://oauth2.googleapis.com")).await;
    let tenant_id = Uuid::new_v4();
    let app = create_app(ctx.state.clone());

    let response = app
        .oneshot(authed_request(
            "GET",
            &format!("/admin/connections/{}", Uuid::new_v4()),
            &tenant_id,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = body_json(response).await;
    assert_eq!(body["code"], json!("CONNECTION_NOT_FOUND"));
}
