//! Integration tests for the request execution pipeline.
//!
//! These tests verify that the RequestExecutor correctly:
//! - Stamps identity headers and the bearer token onto requests
//! - Signs request bodies with the exact bytes it transmits
//! - Retries transient server errors with growing backoff
//! - Rotates the access token after a 401 and retries transparently
//! - Shares one retry budget between auth and server-error retries
//! - Flags the backend as unreachable on connection failure

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use curalink_core::{
    config::{ApiConfig, DeviceIdentity, RetryConfig},
    connectivity::ConnectivityMonitor,
    error::NetworkError,
    executor::{RequestContext, RequestExecutor},
    model::Role,
    session::SessionManager,
    sign::{RequestSigner, SIGNATURE_HEADER, TIMESTAMP_HEADER},
    store::{MemoryTokenStore, Secret, TokenStore},
    token::TokenRecord,
};
use serde::{Deserialize, Serialize};
use url::Url;
use wiremock::{
    matchers::{body_string_contains, header, method, path},
    Match, Mock, MockServer, Request, ResponseTemplate,
};

fn test_device() -> DeviceIdentity {
    DeviceIdentity {
        device_id: "test-device".to_string(),
        model: "test-model".to_string(),
        os_version: "test-os".to_string(),
        app_version: "0.0.0-test".to_string(),
    }
}

/// Retry tuning fast enough for tests.
fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        backoff_base_ms: 25,
        auth_retry_delay_ms: 10,
    }
}

fn base_config(mock_uri: &str) -> ApiConfig {
    ApiConfig::new(Url::parse(mock_uri).unwrap(), "test-api-key", test_device())
        .with_retry(fast_retry(3))
}

/// Helper wiring an executor over an in-memory store.
fn pipeline(config: ApiConfig) -> (RequestExecutor, Arc<MemoryTokenStore>) {
    let config = Arc::new(config);
    let store = Arc::new(MemoryTokenStore::new());
    let session = SessionManager::new(config.clone(), store.clone()).unwrap();
    let monitor = Arc::new(ConnectivityMonitor::new(config.clone()).unwrap());
    let executor = RequestExecutor::new(config, session, monitor).unwrap();
    (executor, store)
}

fn valid_patient_record() -> TokenRecord {
    TokenRecord::new(Role::Patient, "stored-access")
        .with_refresh_token("stored-refresh")
        .with_expiry(Utc::now() + chrono::Duration::hours(1))
        .with_environment("production")
}

/// Matches requests that carry no Authorization header at all.
struct NoAuthorizationHeader;

impl Match for NoAuthorizationHeader {
    fn matches(&self, request: &Request) -> bool {
        !request.headers.contains_key("authorization")
    }
}

/// Matches requests whose signature verifies against the received body
/// and timestamp.
struct SignatureVerifies {
    secret: String,
}

impl Match for SignatureVerifies {
    fn matches(&self, request: &Request) -> bool {
        let Some(timestamp) = request
            .headers
            .get(TIMESTAMP_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
        else {
            return false;
        };
        let Some(signature) = request
            .headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
        else {
            return false;
        };
        let secret = Secret::new(self.secret.as_str());
        signature == RequestSigner::compute_signature(&secret, &request.body, timestamp)
    }
}

#[tokio::test]
async fn test_authenticated_request_carries_identity_and_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/appointments"))
        .and(header("x-api-key", "test-api-key"))
        .and(header("x-device-id", "test-device"))
        .and(header("x-device-model", "test-model"))
        .and(header("x-os-version", "test-os"))
        .and(header("x-app-version", "0.0.0-test"))
        .and(header("authorization", "Bearer stored-access"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([{"id": "apt-1"}])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (executor, store) = pipeline(base_config(&server.uri()));
    store.put(&valid_patient_record()).await.unwrap();

    let body = executor
        .execute(RequestContext::get("/appointments"))
        .await
        .unwrap();

    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed[0]["id"], "apt-1");
}

#[tokio::test]
async fn test_public_request_omits_authorization() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .and(header("x-api-key", "test-api-key"))
        .and(NoAuthorizationHeader)
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    // No credentials are stored; a public request must not need any.
    let (executor, _store) = pipeline(base_config(&server.uri()));

    let body = executor
        .execute(RequestContext::get("/health").public())
        .await
        .unwrap();

    assert_eq!(body, b"ok");
}

#[tokio::test]
async fn test_signature_covers_the_transmitted_body() {
    #[derive(Serialize)]
    struct Note {
        text: &'static str,
    }

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/notes"))
        .and(SignatureVerifies {
            secret: "test-secret".to_string(),
        })
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "n-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let config = base_config(&server.uri()).with_signing_secret("test-secret");
    let (executor, store) = pipeline(config);
    store.put(&valid_patient_record()).await.unwrap();

    let ctx = RequestContext::post("/notes")
        .json(&Note { text: "hello" })
        .unwrap();
    executor.execute(ctx).await.unwrap();
}

#[tokio::test]
async fn test_transient_server_errors_are_retried_with_backoff() {
    let server = MockServer::start().await;
    // The first two attempts hit the failing mock, then it stops
    // matching and the catch-all succeeds.
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .expect(1)
        .mount(&server)
        .await;

    let (executor, _store) = pipeline(base_config(&server.uri()));

    let started = Instant::now();
    let body = executor
        .execute(RequestContext::get("/flaky").public())
        .await
        .unwrap();

    assert_eq!(body, b"recovered");
    // Two linear backoffs: 25ms then 50ms.
    assert!(started.elapsed() >= Duration::from_millis(75));
}

#[tokio::test]
async fn test_exhausted_budget_surfaces_the_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
            "detail": "maintenance"
        })))
        .expect(3)
        .mount(&server)
        .await;

    let config = base_config(&server.uri()).with_retry(fast_retry(2));
    let (executor, _store) = pipeline(config);

    let err = executor
        .execute(RequestContext::get("/down").public())
        .await
        .unwrap_err();

    match err {
        NetworkError::ServerError { status, detail } => {
            assert_eq!(status, 503);
            assert_eq!(detail, "maintenance");
        }
        other => panic!("expected ServerError, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unauthorized_response_triggers_transparent_refresh() {
    let server = MockServer::start().await;
    // The stale token is rejected exactly once.
    Mock::given(method("GET"))
        .and(path("/profile"))
        .and(header("authorization", "Bearer stored-access"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    // The retry must present the freshly minted token.
    Mock::given(method("GET"))
        .and(path("/profile"))
        .and(header("authorization", "Bearer fresh-access"))
        .respond_with(ResponseTemplate::new(200).set_body_string("profile"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_string_contains("stored-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "fresh-access",
            "refresh_token": "stored-refresh",
            "token_type": "bearer",
            "user_type": "patient",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (executor, store) = pipeline(base_config(&server.uri()));
    store.put(&valid_patient_record()).await.unwrap();

    let body = executor
        .execute(RequestContext::get("/profile"))
        .await
        .unwrap();

    assert_eq!(body, b"profile");
    // The rotation went through the store, not just the request.
    let stored = store.get(Role::Patient).await.unwrap().unwrap();
    assert_eq!(stored.access_token.expose(), "fresh-access");
}

#[tokio::test]
async fn test_repeated_unauthorized_drains_the_shared_budget() {
    let server = MockServer::start().await;
    // The backend rejects every access token no matter how fresh.
    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "detail": "token revoked"
        })))
        .expect(4)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "fresh-access",
            "refresh_token": "stored-refresh",
            "token_type": "bearer",
            "user_type": "patient",
            "expires_in": 3600
        })))
        .expect(3)
        .mount(&server)
        .await;

    let (executor, store) = pipeline(base_config(&server.uri()));
    store.put(&valid_patient_record()).await.unwrap();

    let err = executor
        .execute(RequestContext::get("/profile"))
        .await
        .unwrap_err();

    match err {
        NetworkError::ServerError { status, detail } => {
            assert_eq!(status, 401);
            assert_eq!(detail, "token revoked");
        }
        other => panic!("expected ServerError, got {other:?}"),
    }
}

#[tokio::test]
async fn test_client_errors_surface_the_backend_detail_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/email/register"))
        .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
            "detail": "email already registered"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (executor, _store) = pipeline(base_config(&server.uri()));

    let ctx = RequestContext::post("/auth/email/register")
        .json(&serde_json::json!({"email": "taken@example.com"}))
        .unwrap()
        .public();
    let err = executor.execute(ctx).await.unwrap_err();

    match err {
        NetworkError::ServerError { status, detail } => {
            assert_eq!(status, 422);
            assert_eq!(detail, "email already registered");
        }
        other => panic!("expected ServerError, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_error_detail_defaults_to_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let (executor, _store) = pipeline(base_config(&server.uri()));

    let err = executor
        .execute(RequestContext::get("/broken").public())
        .await
        .unwrap_err();

    match err {
        NetworkError::ServerError { status, detail } => {
            assert_eq!(status, 400);
            assert_eq!(detail, "unknown");
        }
        other => panic!("expected ServerError, got {other:?}"),
    }
}

#[tokio::test]
async fn test_execute_json_decodes_typed_payloads() {
    #[derive(Debug, Deserialize)]
    struct Appointment {
        id: String,
        doctor_name: String,
    }

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/appointments/apt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "apt-1",
            "doctor_name": "Dr. Nadia Rahal"
        })))
        .mount(&server)
        .await;

    let (executor, store) = pipeline(base_config(&server.uri()));
    store.put(&valid_patient_record()).await.unwrap();

    let appointment: Appointment = executor
        .execute_json(RequestContext::get("/appointments/apt-1"))
        .await
        .unwrap();

    assert_eq!(appointment.id, "apt-1");
    assert_eq!(appointment.doctor_name, "Dr. Nadia Rahal");
}

#[tokio::test]
async fn test_malformed_json_is_a_decoding_error() {
    #[derive(Debug, Deserialize)]
    struct Empty {}

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/garbled"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let (executor, _store) = pipeline(base_config(&server.uri()));

    let err = executor
        .execute_json::<Empty>(RequestContext::get("/garbled").public())
        .await
        .unwrap_err();

    assert!(matches!(err, NetworkError::Decoding(_)));
}

#[tokio::test]
async fn test_connection_failure_marks_the_backend_unreachable() {
    // Nothing listens on the discard port.
    let config = ApiConfig::new(
        Url::parse("http://127.0.0.1:9").unwrap(),
        "test-api-key",
        test_device(),
    )
    .with_retry(fast_retry(0));
    let (executor, _store) = pipeline(config);
    assert!(executor.monitor().is_available());

    let err = executor
        .execute(RequestContext::get("/health").public())
        .await
        .unwrap_err();

    assert!(matches!(err, NetworkError::NoConnection));
    assert!(!executor.monitor().is_available());
    executor.monitor().stop();
}

#[tokio::test]
async fn test_slow_responses_time_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200).set_delay(Duration::from_millis(1_500)),
        )
        .mount(&server)
        .await;

    let mut config = base_config(&server.uri()).with_retry(fast_retry(0));
    config.request_timeout_secs = 1;
    let (executor, _store) = pipeline(config);

    let err = executor
        .execute(RequestContext::get("/slow").public())
        .await
        .unwrap_err();

    assert!(matches!(err, NetworkError::Timeout));
}

#[tokio::test]
async fn test_explicit_role_overrides_the_active_role() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/patients"))
        .and(header("authorization", "Bearer doctor-access"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&server)
        .await;

    let (executor, store) = pipeline(base_config(&server.uri()));
    // Active role stays Patient; the request explicitly runs as Doctor.
    let doctor = TokenRecord::new(Role::Doctor, "doctor-access")
        .with_refresh_token("doctor-refresh")
        .with_expiry(Utc::now() + chrono::Duration::hours(1))
        .with_environment("production");
    store.put(&doctor).await.unwrap();

    let body = executor
        .execute(RequestContext::get("/patients").for_role(Role::Doctor))
        .await
        .unwrap();

    assert_eq!(body, b"[]");
}

#[tokio::test]
async fn test_authenticated_request_without_credentials_fails_fast() {
    let server = MockServer::start().await;

    let (executor, _store) = pipeline(base_config(&server.uri()));

    let err = executor
        .execute(RequestContext::get("/appointments"))
        .await
        .unwrap_err();

    assert!(matches!(err, NetworkError::AuthenticationFailed(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_timeout_retries_share_the_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200).set_delay(Duration::from_millis(1_500)),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_body_string("eventually"))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = base_config(&server.uri());
    config.request_timeout_secs = 1;
    let (executor, _store) = pipeline(config);

    let body = executor
        .execute(RequestContext::get("/slow").public())
        .await
        .unwrap();

    assert_eq!(body, b"eventually");
}
