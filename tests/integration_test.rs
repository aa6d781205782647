// Integration tests for Session Gateway
//
// These tests run the client over the real reqwest transport against a
// mockito server, checking headers on the wire and refresh call counts.

use futures::future::join_all;
use mockito::{Matcher, Server, ServerGuard};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;

use session_gateway::auth::{CredentialPair, CredentialStore, SessionEvent, SessionEvents};
use session_gateway::error::{RefreshError, TransportErrorKind};
use session_gateway::http_client::ReqwestTransport;
use session_gateway::{ApiClient, ClientError};

// ==================================================================================================
// Test Helpers
// ==================================================================================================

/// Client pointed at `base_url`, signed in as A1/R1
fn create_test_client(base_url: &str) -> ApiClient {
    let transport = ReqwestTransport::new(base_url, 20, 5, 30).expect("Failed to create transport");
    let store = Arc::new(CredentialStore::in_memory());
    store
        .set(&CredentialPair::new("A1", "R1"))
        .expect("Failed to seed credentials");

    ApiClient::new(Arc::new(transport), store, SessionEvents::new("/login"))
}

async fn mock_expired_token(server: &mut ServerGuard, path: &str, hits: usize) -> mockito::Mock {
    server
        .mock("GET", path)
        .match_header("authorization", "Bearer A1")
        .with_status(401)
        .with_body("token expired")
        .expect(hits)
        .create_async()
        .await
}

// ==================================================================================================
// Refresh Flow Tests
// ==================================================================================================

#[tokio::test]
async fn test_concurrent_requests_refresh_once() {
    let mut server = Server::new_async().await;

    let expired = mock_expired_token(&mut server, "/members", 3).await;
    let refresh = server
        .mock("POST", "/token/refresh")
        .match_header("authorization", "Bearer R1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"accessToken":"A2","refreshToken":"R2"}"#)
        .expect(1)
        .create_async()
        .await;
    let replayed = server
        .mock("GET", "/members")
        .match_header("authorization", "Bearer A2")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"members":[{"id":1}]}"#)
        .expect(3)
        .create_async()
        .await;

    let client = create_test_client(&server.url());

    let results = join_all((0..3).map(|_| client.get::<Value>("/members"))).await;
    for result in results {
        assert_eq!(result.unwrap(), json!({"members": [{"id": 1}]}));
    }

    expired.assert_async().await;
    refresh.assert_async().await;
    replayed.assert_async().await;
    assert_eq!(
        client.store().get(),
        Some(CredentialPair::new("A2", "R2"))
    );
}

#[tokio::test]
async fn test_failed_refresh_clears_session() {
    let mut server = Server::new_async().await;

    let expired = mock_expired_token(&mut server, "/payments", 2).await;
    let refresh = server
        .mock("POST", "/token/refresh")
        .with_status(400)
        .with_body(r#"{"error":"invalid_grant"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = create_test_client(&server.url());
    let mut events = client.subscribe();

    let results = join_all((0..2).map(|_| client.get::<Value>("/payments"))).await;
    for result in results {
        let err = result.unwrap_err();
        assert!(err.requires_login(), "unexpected error: {:?}", err);
    }

    expired.assert_async().await;
    refresh.assert_async().await;
    assert_eq!(client.store().access_token(), None);
    assert_eq!(client.store().refresh_token(), None);

    assert_eq!(
        events.try_recv().unwrap(),
        SessionEvent::Expired {
            login_route: "/login".to_string()
        }
    );
    assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn test_replay_failing_again_does_not_refresh_twice() {
    let mut server = Server::new_async().await;

    let _expired = mock_expired_token(&mut server, "/bookings", 1).await;
    let refresh = server
        .mock("POST", "/token/refresh")
        .with_status(200)
        .with_body(r#"{"accessToken":"A2","refreshToken":"R2"}"#)
        .expect(1)
        .create_async()
        .await;
    let still_rejected = server
        .mock("GET", "/bookings")
        .match_header("authorization", "Bearer A2")
        .with_status(401)
        .with_body("still expired")
        .expect(1)
        .create_async()
        .await;

    let client = create_test_client(&server.url());

    let err = client.get::<Value>("/bookings").await.unwrap_err();
    match err {
        ClientError::Unauthorized { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "still expired");
        }
        other => panic!("unexpected error: {:?}", other),
    }

    refresh.assert_async().await;
    still_rejected.assert_async().await;
}

#[tokio::test]
async fn test_forbidden_triggers_refresh() {
    let mut server = Server::new_async().await;

    let forbidden = server
        .mock("DELETE", "/members/7")
        .match_header("authorization", "Bearer A1")
        .with_status(403)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/token/refresh")
        .with_status(200)
        .with_body(r#"{"accessToken":"A2","refreshToken":"R2"}"#)
        .expect(1)
        .create_async()
        .await;
    let deleted = server
        .mock("DELETE", "/members/7")
        .match_header("authorization", "Bearer A2")
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    let client = create_test_client(&server.url());
    client.delete::<()>("/members/7").await.unwrap();

    forbidden.assert_async().await;
    refresh.assert_async().await;
    deleted.assert_async().await;
}

// ==================================================================================================
// Pass-through Tests
// ==================================================================================================

#[tokio::test]
async fn test_server_error_passes_through_without_refresh() {
    let mut server = Server::new_async().await;

    let failing = server
        .mock("GET", "/members")
        .with_status(500)
        .with_body("boom")
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/token/refresh")
        .expect(0)
        .create_async()
        .await;

    let client = create_test_client(&server.url());

    let err = client.get::<Value>("/members").await.unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert!(matches!(err, ClientError::Api { .. }));

    failing.assert_async().await;
    refresh.assert_async().await;
    assert!(client.is_authenticated());
}

#[tokio::test]
async fn test_post_sends_bearer_and_json_body() {
    let mut server = Server::new_async().await;

    let created = server
        .mock("POST", "/bookings")
        .match_header("authorization", "Bearer A1")
        .match_header("content-type", "application/json")
        .match_body(Matcher::Json(json!({"memberId": 3, "slot": "09:00"})))
        .with_status(201)
        .with_body(r#"{"id":42}"#)
        .create_async()
        .await;

    let client = create_test_client(&server.url());

    let payload: Value = client
        .post("/bookings", &json!({"memberId": 3, "slot": "09:00"}))
        .await
        .unwrap();
    assert_eq!(payload["id"], 42);

    created.assert_async().await;
}

#[tokio::test]
async fn test_unreachable_server_is_transport_error() {
    // Nothing listens on port 1
    let client = create_test_client("http://127.0.0.1:1");

    let err = client.get::<Value>("/members").await.unwrap_err();
    match err {
        ClientError::Transport(e) => assert_eq!(e.kind, TransportErrorKind::Connect),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(client.is_authenticated());
}

#[tokio::test]
async fn test_malformed_refresh_body_clears_session() {
    let mut server = Server::new_async().await;
    let _expired = mock_expired_token(&mut server, "/members", 1).await;
    let refresh = server
        .mock("POST", "/token/refresh")
        .with_status(200)
        .with_body("<html>gateway</html>")
        .expect(1)
        .create_async()
        .await;

    let client = create_test_client(&server.url());

    let err = client.get::<Value>("/members").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::RefreshFailed(RefreshError::Malformed(_))
    ));
    refresh.assert_async().await;
    assert_eq!(client.store().get(), None);
}

// ==================================================================================================
// Session Lifecycle Tests
// ==================================================================================================

#[tokio::test]
async fn test_logout_clears_even_when_server_fails() {
    let mut server = Server::new_async().await;

    let logout = server
        .mock("DELETE", "/token/logout")
        .match_header("authorization", "Bearer A1")
        .with_status(503)
        .expect(1)
        .create_async()
        .await;

    let client = create_test_client(&server.url());
    let mut events = client.subscribe();

    client.logout().await.unwrap();

    logout.assert_async().await;
    assert!(!client.is_authenticated());
    assert_eq!(events.try_recv().unwrap(), SessionEvent::LoggedOut);
}

#[tokio::test]
async fn test_logout_with_unreachable_server() {
    let client = create_test_client("http://127.0.0.1:1");
    client.logout().await.unwrap();
    assert_eq!(client.store().get(), None);
}
