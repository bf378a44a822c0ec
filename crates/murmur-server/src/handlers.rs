//! HTTP handlers for Murmur server.
//!
//! This module wires the event stream and message ingest endpoints to the
//! fan-out core, and owns the server lifecycle.

use crate::config::Config;
use crate::metrics::{self, SubscriberMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use murmur_core::{
    build_payload, Broadcaster, Ingest, IngestError, MemoryStore, SessionConfig, Store,
    StoreError, StreamingSession, SubscriberRegistry, User,
};
use murmur_protocol::{NotificationPayload, SendMessageRequest, SendMessageResponse};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Live subscriber channels.
    pub registry: Arc<SubscriberRegistry>,
    /// Message ingest pipeline.
    pub ingest: Ingest,
    /// Settings for new event streams.
    pub session_config: SessionConfig,
    /// Cancelled when the server begins shutting down.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create new app state with a seeded in-memory store.
    #[must_use]
    pub fn new(config: &Config, shutdown: CancellationToken) -> Self {
        let store = Arc::new(MemoryStore::with_users(config.store.seed_users.iter().cloned()));
        info!(users = store.user_count(), "Store seeded");

        let registry = Arc::new(SubscriberRegistry::new());
        let ingest = Ingest::new(
            store,
            Broadcaster::new(Arc::clone(&registry)),
            config.ingest_config(),
        );

        Self {
            registry,
            ingest,
            session_config: config.session_config(),
            shutdown,
        }
    }

    fn store(&self) -> &Arc<dyn Store> {
        self.ingest.store()
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/stream", get(stream_handler))
        .route("/send_message", post(send_message_handler))
        .route("/messages", get(messages_handler))
        .route("/users", get(users_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState::new(&config, shutdown));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = app(Arc::clone(&state));

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Murmur server listening on {}", addr);
    info!("Event stream endpoint: http://{}/stream", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    info!("Murmur server stopped");
    Ok(())
}

/// Wait for Ctrl-C, then end every open event stream.
async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }

    info!(
        subscribers = state.registry.len(),
        "Shutdown signal received, closing event streams"
    );
    state.shutdown.cancel();
    state.registry.close_all();
}

/// Open an event stream.
///
/// The subscriber is registered before the response head is returned.
async fn stream_handler(State(state): State<Arc<AppState>>) -> Response {
    let session = StreamingSession::open(
        Arc::clone(&state.registry),
        &state.session_config,
        state.shutdown.clone(),
    );
    debug!(subscriber = %session.id(), "Event stream requested");

    let guard = SubscriberMetricsGuard::new();
    let frames = session.into_stream().map(move |frame| {
        let _guard = &guard;
        metrics::record_frame(frame.len());
        Ok::<_, Infallible>(frame)
    });

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}

/// Store a message and notify every open event stream.
async fn send_message_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let Json(request) = body.map_err(|rejection| IngestError::Validation(rejection.body_text()))?;

    let start = Instant::now();
    let ingested = state.ingest.send(request).await?;
    metrics::record_ingest(&ingested.report, start.elapsed().as_secs_f64());

    Ok(Json(SendMessageResponse::success()))
}

/// Message history, oldest first, in notification form.
async fn messages_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<NotificationPayload>>, ApiError> {
    let store = state.store();
    let messages = store.messages().await?;

    let mut history = Vec::with_capacity(messages.len());
    for message in &messages {
        let author = store.author(message).await?;
        history.push(build_payload(message, &author));
    }

    Ok(Json(history))
}

/// Registered users.
async fn users_handler(State(state): State<Arc<AppState>>) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(state.store().users().await?))
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "subscribers": state.registry.len()
    }))
}

/// Maps ingest and store failures to HTTP responses.
#[derive(Debug)]
pub struct ApiError(IngestError);

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        Self(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(IngestError::Persistence(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            IngestError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            IngestError::Persistence(StoreError::UnknownUser(_)) => {
                (StatusCode::NOT_FOUND, "unknown_user")
            }
            IngestError::Persistence(StoreError::DuplicateUsername(_)) => {
                (StatusCode::CONFLICT, "duplicate_username")
            }
            IngestError::Persistence(StoreError::Unavailable(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "persistence")
            }
        };

        warn!(status = %status, error = %self.0, "Request failed");
        metrics::record_error(kind);

        (status, Json(SendMessageResponse::error(self.0.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;
    use bytes::BytesMut;
    use murmur_protocol::{codec, SseFrame};
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let mut config = Config::default();
        config.stream.keepalive_ms = 0;
        config.metrics.enabled = false;
        Arc::new(AppState::new(&config, CancellationToken::new()))
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_stream_receives_sent_message() {
        let state = test_state();

        let stream = app(Arc::clone(&state))
            .oneshot(get_request("/stream"))
            .await
            .unwrap();
        assert_eq!(stream.status(), StatusCode::OK);
        assert_eq!(
            stream.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        assert_eq!(state.registry.len(), 1);

        let sent = app(Arc::clone(&state))
            .oneshot(post_json("/send_message", r#"{"user_id": 1, "content": "hi"}"#))
            .await
            .unwrap();
        assert_eq!(sent.status(), StatusCode::OK);
        assert_eq!(body_json(sent).await, serde_json::json!({"status": "success"}));

        let mut frames = stream.into_body().into_data_stream();
        let frame = tokio::time::timeout(Duration::from_secs(1), frames.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let mut buf = BytesMut::from(&frame[..]);
        let Some(SseFrame::Data(json)) = codec::decode_from(&mut buf).unwrap() else {
            panic!("Expected data frame");
        };
        let payload: NotificationPayload = serde_json::from_slice(&json).unwrap();
        assert_eq!(payload.username, "User1");
        assert_eq!(payload.content, "hi");
        assert_eq!(payload.timestamp.len(), "YYYY-MM-DD HH:MM:SS".len());

        drop(frames);
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn test_missing_content_rejected_without_broadcast() {
        let state = test_state();
        let stream = app(Arc::clone(&state))
            .oneshot(get_request("/stream"))
            .await
            .unwrap();

        let sent = app(Arc::clone(&state))
            .oneshot(post_json("/send_message", r#"{"user_id": 1}"#))
            .await
            .unwrap();
        assert_eq!(sent.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(sent).await["status"], "error");

        let mut frames = stream.into_body().into_data_stream();
        let next = tokio::time::timeout(Duration::from_millis(50), frames.next()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let state = test_state();
        let sent = app(state)
            .oneshot(post_json("/send_message", "{not json"))
            .await
            .unwrap();
        assert_eq!(sent.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let state = test_state();
        let sent = app(state)
            .oneshot(post_json("/send_message", r#"{"user_id": 99, "content": "hi"}"#))
            .await
            .unwrap();
        assert_eq!(sent.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_history_and_users() {
        let state = test_state();
        for content in ["first", "second"] {
            let body = format!(r#"{{"user_id": 2, "content": "{content}"}}"#);
            let sent = app(Arc::clone(&state))
                .oneshot(post_json("/send_message", &body))
                .await
                .unwrap();
            assert_eq!(sent.status(), StatusCode::OK);
        }

        let history = body_json(
            app(Arc::clone(&state))
                .oneshot(get_request("/messages"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(history[0]["content"], "first");
        assert_eq!(history[1]["content"], "second");
        assert_eq!(history[1]["username"], "User2");

        let users = body_json(app(state).oneshot(get_request("/users")).await.unwrap()).await;
        assert_eq!(users.as_array().unwrap().len(), 2);
        assert_eq!(users[0]["username"], "User1");
    }

    #[tokio::test]
    async fn test_health() {
        let state = test_state();
        let response = app(state).oneshot(get_request("/health")).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["subscribers"], 0);
    }

    #[tokio::test]
    async fn test_shutdown_ends_streams() {
        let state = test_state();
        let stream = app(Arc::clone(&state))
            .oneshot(get_request("/stream"))
            .await
            .unwrap();

        state.shutdown.cancel();
        let mut frames = stream.into_body().into_data_stream();
        let next = tokio::time::timeout(Duration::from_secs(1), frames.next())
            .await
            .unwrap();
        assert!(next.is_none());
        assert!(state.registry.is_empty());
    }
}
