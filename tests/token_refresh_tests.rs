//! Integration tests for the token read path and the refresh manager.

mod test_utils;

use chrono::{Duration, Utc};
use connections::error::ConnectionError;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use test_utils::{expire_connection, google_registry, insert_connection, setup_state};

fn refresh_response(access_token: &str, expires_in: i64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": access_token,
        "expires_in": expires_in,
        "token_type": "Bearer",
        "scope": "email profile"
    }))
}

#[tokio::test]
async fn get_token_serves_stored_token_without_provider_calls() {
    let server = MockServer::start().await;
    // No mocks mounted: any outbound call would fail the test via 404
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(refresh_response("unexpected", 3600))
        .expect(0)
        .mount(&server)
        .await;

    let ctx = setup_state(google_registry(&server.uri())).await;
    let user_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();

    insert_connection(
        &ctx.state,
        user_id,
        tenant_id,
        "google",
        "google-user-1",
        "tok-1",
        Some("refresh-1"),
        Some(Utc::now() + Duration::hours(1)),
    )
    .await;

    let first = ctx
        .state
        .refresh
        .get_token(user_id, tenant_id, "google", None)
        .await
        .expect("token served");
    assert_eq!(first.access_token, "tok-1");
    assert_eq!(first.token_type, "Bearer");
    assert!(first.expires_at.expect("expiry present") > Utc::now());

    // Second read hits the cache; still no provider traffic
    let second = ctx
        .state
        .refresh
        .get_token(user_id, tenant_id, "google", None)
        .await
        .expect("token served again");
    assert_eq!(second.access_token, "tok-1");
}

#[tokio::test]
async fn expired_token_triggers_exactly_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(refresh_response("tok-2", 3600))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = setup_state(google_registry(&server.uri())).await;
    let user_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();

    let connection = insert_connection(
        &ctx.state,
        user_id,
        tenant_id,
        "google",
        "google-user-1",
        "tok-1",
        Some("refresh-1"),
        Some(Utc::now() + Duration::hours(1)),
    )
    .await;
    let old_expires_at = connection.expires_at.expect("expiry present");

    expire_connection(&ctx.state, &connection.id).await;

    // Two concurrent reads on the same expired connection must collapse
    // into a single provider refresh call (enforced by expect(1) above).
    let (first, second) = tokio::join!(
        ctx.state.refresh.get_token(user_id, tenant_id, "google", None),
        ctx.state.refresh.get_token(user_id, tenant_id, "google", None),
    );

    let first = first.expect("first caller gets a token");
    let second = second.expect("second caller gets a token");
    assert_eq!(first.access_token, "tok-2");
    assert_eq!(second.access_token, "tok-2");

    let refreshed = ctx
        .state
        .connection_repo
        .get_by_id(&connection.id)
        .await
        .expect("query succeeds")
        .expect("connection exists");

    // expires_at strictly increased and the refresh was stamped
    assert!(refreshed.expires_at.expect("expiry present") > old_expires_at);
    assert_eq!(refreshed.status, "active");
    assert!(refreshed.last_refreshed_at.is_some());
}

#[tokio::test]
async fn non_rotating_provider_preserves_stored_refresh_token() {
    let server = MockServer::start().await;
    // Google-style: no refresh_token in the refresh response
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(refresh_response("tok-2", 3600))
        .mount(&server)
        .await;

    let ctx = setup_state(google_registry(&server.uri())).await;
    let user_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();

    let connection = insert_connection(
        &ctx.state,
        user_id,
        tenant_id,
        "google",
        "google-user-1",
        "tok-1",
        Some("refresh-1"),
        Some(Utc::now() + Duration::hours(1)),
    )
    .await;

    let outcome = ctx
        .state
        .refresh
        .refresh_connection(&connection.id)
        .await
        .expect("refresh runs");
    assert!(outcome.success);

    let refreshed = ctx
        .state
        .connection_repo
        .get_by_id(&connection.id)
        .await
        .expect("query succeeds")
        .expect("connection exists");

    // The stored refresh token still decrypts to the original value
    let stored_refresh = ctx
        .state
        .connection_repo
        .decrypt_refresh_token(&refreshed)
        .expect("refresh token decrypts");
    assert_eq!(stored_refresh.as_deref(), Some("refresh-1"));

    // A second refresh with the preserved token succeeds as well
    let again = ctx
        .state
        .refresh
        .refresh_connection(&connection.id)
        .await
        .expect("refresh runs again");
    assert!(again.success);
}

#[tokio::test]
async fn refresh_without_refresh_token_errors_and_leaves_status_alone() {
    let server = MockServer::start().await;
    let ctx = setup_state(google_registry(&server.uri())).await;
    let user_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();

    let connection = insert_connection(
        &ctx.state,
        user_id,
        tenant_id,
        "google",
        "google-user-1",
        "tok-1",
        None,
        Some(Utc::now() + Duration::hours(1)),
    )
    .await;

    let result = ctx.state.refresh.refresh_connection(&connection.id).await;
    assert!(matches!(result, Err(ConnectionError::NoRefreshToken)));

    let unchanged = ctx
        .state
        .connection_repo
        .get_by_id(&connection.id)
        .await
        .expect("query succeeds")
        .expect("connection exists");
    assert_eq!(unchanged.status, "active");
}

#[tokio::test]
async fn failed_refresh_moves_connection_to_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Token has been revoked."
        })))
        .mount(&server)
        .await;

    let ctx = setup_state(google_registry(&server.uri())).await;
    let user_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();

    let connection = insert_connection(
        &ctx.state,
        user_id,
        tenant_id,
        "google",
        "google-user-1",
        "tok-1",
        Some("refresh-1"),
        Some(Utc::now() + Duration::hours(1)),
    )
    .await;

    let outcome = ctx
        .state
        .refresh
        .refresh_connection(&connection.id)
        .await
        .expect("refresh returns an outcome, not an error");
    assert!(!outcome.success);
    assert!(outcome.error.expect("error recorded").contains("invalid_grant"));

    let errored = ctx
        .state
        .connection_repo
        .get_by_id(&connection.id)
        .await
        .expect("query succeeds")
        .expect("connection exists");
    assert_eq!(errored.status, "error");
}

#[tokio::test]
async fn revoked_connection_no_longer_serves_tokens() {
    let server = MockServer::start().await;
    let ctx = setup_state(google_registry(&server.uri())).await;
    let user_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();

    let connection = insert_connection(
        &ctx.state,
        user_id,
        tenant_id,
        "google",
        "google-user-1",
        "tok-1",
        Some("refresh-1"),
        Some(Utc::now() + Duration::hours(1)),
    )
    .await;

    // Warm the cache, then revoke
    ctx.state
        .refresh
        .get_token(user_id, tenant_id, "google", None)
        .await
        .expect("token served before revocation");

    let revoked = ctx
        .state
        .oauth
        .revoke_connection(&connection.id, "admin@relay.dev", Some("offboarding".to_string()))
        .await
        .expect("revocation succeeds");
    assert_eq!(revoked.status, "revoked");
    assert!(revoked.revoked_at.is_some());

    let result = ctx
        .state
        .refresh
        .get_token(user_id, tenant_id, "google", None)
        .await;
    assert!(matches!(result, Err(ConnectionError::ConnectionNotFound)));
}

#[tokio::test]
async fn refresh_sweep_isolates_per_connection_failures() {
    let server = MockServer::start().await;

    // The connection refreshing with "refresh-bad" fails; the others succeed.
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("refresh_token=refresh-bad"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(refresh_response("tok-fresh", 7200))
        .expect(2)
        .mount(&server)
        .await;

    let ctx = setup_state(google_registry(&server.uri())).await;
    let tenant_id = Uuid::new_v4();

    let soon = Utc::now() + Duration::minutes(5);
    let mut failing_id = None;
    for (index, refresh_token) in ["refresh-ok-1", "refresh-bad", "refresh-ok-2"]
        .iter()
        .enumerate()
    {
        let connection = insert_connection(
            &ctx.state,
            Uuid::new_v4(),
            tenant_id,
            "google",
            &format!("google-user-{}", index),
            "tok-old",
            Some(refresh_token),
            Some(soon),
        )
        .await;
        if *refresh_token == "refresh-bad" {
            failing_id = Some(connection.id);
        }
    }

    let results = ctx
        .state
        .refresh
        .refresh_expiring()
        .await
        .expect("sweep completes");

    assert_eq!(results.len(), 3);
    let failures: Vec<_> = results.iter().filter(|outcome| !outcome.success).collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].connection_id, failing_id.expect("failing connection recorded"));

    for outcome in results.iter().filter(|outcome| outcome.success) {
        assert!(outcome.new_expires_at.expect("expiry advanced") > soon);
    }

    // The failing connection is error'd; the others stay active
    let listed = ctx
        .state
        .connection_repo
        .list_by_tenant(&tenant_id, &Default::default())
        .await
        .expect("listing succeeds");
    let error_count = listed.iter().filter(|c| c.status == "error").count();
    let active_count = listed.iter().filter(|c| c.status == "active").count();
    assert_eq!(error_count, 1);
    assert_eq!(active_count, 2);
}

#[tokio::test]
async fn sweep_ignores_connections_outside_the_lookahead_window() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(refresh_response("tok-fresh", 7200))
        .expect(0)
        .mount(&server)
        .await;

    let ctx = setup_state(google_registry(&server.uri())).await;

    // Expires far beyond the one-hour lookahead window
    insert_connection(
        &ctx.state,
        Uuid::new_v4(),
        Uuid::new_v4(),
        "google",
        "google-user-1",
        "tok-1",
        Some("refresh-1"),
        Some(Utc::now() + Duration::hours(12)),
    )
    .await;

    let results = ctx
        .state
        .refresh
        .refresh_expiring()
        .await
        .expect("sweep completes");
    assert!(results.is_empty());
}
