//! Privacy tests for credentials in logs.
//!
//! Bearer tokens and the signing secret must never appear in log output,
//! even at TRACE level.
//!
//! # Test Approach
//!
//! 1. Install a tracing Layer that captures every event as text
//! 2. Drive the router through authenticated and rejected requests
//! 3. Assert the captured logs contain no token, no JWT prefix, and no secret

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use tower::ServiceExt;
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use posthub_server::auth::{default_token_ttl, JwtAuthenticator};
use posthub_server::config::Config;
use posthub_server::hub::{Connection, Hub, HubConfig};
use posthub_server::routes::{create_router, AppState};

const SECRET: &str = "log-privacy-secret-value";

// ============================================================================
// Log Capture Infrastructure
// ============================================================================

/// Captured log lines, shared with the layer.
#[derive(Clone, Default)]
struct LogCapture {
    logs: Arc<Mutex<Vec<String>>>,
}

impl LogCapture {
    fn get_logs(&self) -> String {
        self.logs.lock().unwrap().join("\n")
    }
}

/// A tracing Layer that records events and span fields as text.
struct CaptureLayer {
    capture: LogCapture,
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        _id: &tracing::span::Id,
        _ctx: Context<'_, S>,
    ) {
        let mut visitor = StringVisitor::default();
        attrs.record(&mut visitor);
        self.capture
            .logs
            .lock()
            .unwrap()
            .push(format!("span {}: {}", attrs.metadata().name(), visitor.into_string()));
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = StringVisitor::default();
        event.record(&mut visitor);

        let message = format!(
            "[{}] {}: {}",
            event.metadata().level(),
            event.metadata().target(),
            visitor.into_string()
        );
        self.capture.logs.lock().unwrap().push(message);
    }
}

#[derive(Default)]
struct StringVisitor {
    parts: Vec<String>,
}

impl StringVisitor {
    fn into_string(self) -> String {
        self.parts.join(" ")
    }
}

impl tracing::field::Visit for StringVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.parts.push(format!("{}={:?}", field.name(), value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.parts.push(format!("{}={}", field.name(), value));
    }
}

/// Runs `test_fn` with a TRACE-level capturing subscriber as the default.
///
/// `#[tokio::test]` uses a current-thread runtime, so tasks spawned by the
/// code under test log through the same subscriber.
async fn with_log_capture_async<F, Fut>(test_fn: F) -> String
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let capture = LogCapture::default();
    let layer = CaptureLayer {
        capture: capture.clone(),
    };

    let subscriber = tracing_subscriber::registry()
        .with(layer.with_filter(tracing_subscriber::filter::LevelFilter::TRACE));

    let _guard = tracing::subscriber::set_default(subscriber);
    test_fn().await;

    capture.get_logs()
}

// ============================================================================
// Privacy Assertion Helpers
// ============================================================================

fn assert_token_not_in_logs(logs: &str, token: &str, context: &str) {
    assert!(
        !logs.contains(token),
        "Token found in logs during {context}!\nLogs:\n{logs}"
    );
}

/// JWTs always start with "eyJ", the base64 of `{"`.
fn assert_no_jwt_in_logs(logs: &str, context: &str) {
    assert!(
        !logs.contains("eyJ"),
        "JWT prefix 'eyJ' found in logs during {context}!\nLogs:\n{logs}"
    );
}

fn assert_secret_not_in_logs(logs: &str, context: &str) {
    assert!(
        !logs.contains(SECRET),
        "Signing secret found in logs during {context}!\nLogs:\n{logs}"
    );
}

// ============================================================================
// Helpers
// ============================================================================

fn state() -> AppState {
    let (hub, _actor) = Hub::spawn(HubConfig::default());
    AppState::new(Config::with_secret(SECRET), hub)
}

fn issue(secret: &str, user: &str, ttl: chrono::Duration) -> String {
    JwtAuthenticator::new(secret.as_bytes())
        .issue(user, ttl)
        .unwrap()
}

async fn send(state: &AppState, method: &str, uri: &str, token: &str, body: &str) -> StatusCode {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    create_router(state.clone())
        .oneshot(request)
        .await
        .unwrap()
        .status()
}

// ============================================================================
// Test Cases
// ============================================================================

#[tokio::test]
async fn token_not_logged_on_successful_create_and_broadcast() {
    let state = state();
    let token = issue(SECRET, "author", default_token_ttl());

    let logs = with_log_capture_async(|| async {
        let (connection, _outbound) = Connection::new("127.0.0.1:6000".parse().unwrap(), 4);
        state.hub.register(connection).await.unwrap();

        let status = send(&state, "POST", "/posts", &token, r#"{"post_content":"hi"}"#).await;
        assert_eq!(status, StatusCode::CREATED);
    })
    .await;

    assert!(logs.contains("Post created"), "expected handler logs:\n{logs}");
    assert_token_not_in_logs(&logs, &token, "create");
    assert_no_jwt_in_logs(&logs, "create");
    assert_secret_not_in_logs(&logs, "create");
}

#[tokio::test]
async fn token_not_logged_on_invalid_signature() {
    let state = state();
    let forged = issue("not-the-secret", "intruder", default_token_ttl());

    let logs = with_log_capture_async(|| async {
        let status = send(&state, "GET", "/posts", &forged, "").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    })
    .await;

    assert!(logs.contains("Request authentication failed"));
    assert_token_not_in_logs(&logs, &forged, "invalid signature");
    assert_no_jwt_in_logs(&logs, "invalid signature");
}

#[tokio::test]
async fn token_not_logged_on_expired_token() {
    let state = state();
    let expired = issue(SECRET, "author", chrono::Duration::hours(-3));

    let logs = with_log_capture_async(|| async {
        let status = send(&state, "DELETE", "/posts/abc", &expired, "").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    })
    .await;

    assert_token_not_in_logs(&logs, &expired, "expired token");
    assert_no_jwt_in_logs(&logs, "expired token");
}

#[tokio::test]
async fn token_not_logged_on_forbidden_update() {
    let state = state();
    let owner = issue(SECRET, "owner", default_token_ttl());
    let stranger = issue(SECRET, "stranger", default_token_ttl());

    let logs = with_log_capture_async(|| async {
        let status = send(&state, "POST", "/posts", &owner, r#"{"post_content":"mine"}"#).await;
        assert_eq!(status, StatusCode::CREATED);

        let id = state.store.list(0).await[0].id.clone();
        let status = send(
            &state,
            "PUT",
            &format!("/posts/{id}"),
            &stranger,
            r#"{"post_content":"yours"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    })
    .await;

    assert_token_not_in_logs(&logs, &owner, "forbidden update");
    assert_token_not_in_logs(&logs, &stranger, "forbidden update");
    assert_no_jwt_in_logs(&logs, "forbidden update");
}

#[test]
fn config_debug_does_not_leak_secret() {
    let debug = format!("{:?}", Config::with_secret(SECRET));
    assert!(!debug.contains(SECRET));
}
