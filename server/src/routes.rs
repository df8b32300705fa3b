//! HTTP route handlers for the posthub server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `GET /` - Welcome message
//! - `GET /health` - Health check endpoint
//! - `POST /posts`, `GET /posts` - Create and list posts
//! - `GET|PUT|DELETE /posts/{id}` - Read, update, and delete one post
//! - `GET /ws` - WebSocket endpoint; clients receive every new post
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - Configuration
//! - The connection [`Hub`] and its [`Broadcaster`]
//! - The post store and the token verifier
//! - Server start time for uptime reporting
//!
//! # Example
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//! use posthub_server::config::Config;
//! use posthub_server::hub::{Hub, HubConfig};
//! use posthub_server::routes::{create_router, AppState};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let (hub, _actor) = Hub::spawn(HubConfig::default());
//!     let app = create_router(AppState::new(config, hub));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
//!         .await
//!         .unwrap();
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket},
        ConnectInfo, DefaultBodyLimit, FromRef, Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::auth::{AuthenticatedUser, Authenticator, JwtAuthenticator};
use crate::config::Config;
use crate::error::{Result, ServerError};
use crate::hub::{Broadcaster, Connection, Hub};
use crate::store::PostStore;
use crate::types::{HomeResponse, MessageResponse, Post, PostResponse, UpsertPostRequest};

// ============================================================================
// Constants
// ============================================================================

/// Maximum body size for post requests (1 MB).
const MAX_BODY_SIZE: usize = 1024 * 1024;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Handle to the connection hub.
    pub hub: Hub,

    /// Publishes new posts to WebSocket clients.
    pub broadcaster: Broadcaster,

    /// Post persistence.
    pub store: PostStore,

    /// Verifies bearer tokens on the post API.
    pub auth: Arc<dyn Authenticator>,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Creates application state backed by an in-memory store and an HS256
    /// verifier for `config.jwt_secret`.
    #[must_use]
    pub fn new(config: Config, hub: Hub) -> Self {
        let auth = Arc::new(JwtAuthenticator::new(config.jwt_secret.as_bytes()));
        let store = PostStore::new(config.page_size);
        Self::with_components(config, hub, store, auth)
    }

    /// Creates application state with a custom store and verifier.
    #[must_use]
    pub fn with_components(
        config: Config,
        hub: Hub,
        store: PostStore,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            broadcaster: hub.broadcaster(),
            hub,
            store,
            auth,
            start_time: Instant::now(),
        }
    }
}

impl FromRef<AppState> for Arc<dyn Authenticator> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.auth)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("hub", &self.hub)
            .field("store", &self.store)
            .field("start_time", &self.start_time)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
///
/// `GET /ws` needs the peer address, so the router must be served with
/// [`Router::into_make_service_with_connect_info`].
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(get_home))
        .route("/health", get(get_health))
        .route("/posts", get(list_posts).post(create_post))
        .route(
            "/posts/{id}",
            get(get_post).put(update_post).delete(delete_post),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .route("/ws", get(get_ws))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// GET / - Welcome
// ============================================================================

async fn get_home() -> Json<HomeResponse> {
    Json(HomeResponse {
        message: "Welcome to posthub".to_string(),
        status: true,
    })
}

// ============================================================================
// /posts - Post API
// ============================================================================

/// Query parameters for `GET /posts`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Page index, starting at zero.
    pub page: Option<u64>,
}

fn validate_content(request: UpsertPostRequest) -> Result<String> {
    if request.post_content.trim().is_empty() {
        return Err(ServerError::validation("post_content cannot be empty"));
    }
    Ok(request.post_content)
}

/// POST /posts - Create a post and announce it to WebSocket clients.
///
/// # Responses
///
/// - `201 Created` - `{"id": .., "post_content": ..}`
/// - `400 Bad Request` - Malformed body or empty content
/// - `401 Unauthorized` - Missing, invalid, or expired token
async fn create_post(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    body: std::result::Result<Json<UpsertPostRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PostResponse>)> {
    let Json(request) = body?;
    let post_content = validate_content(request)?;

    let post = Post {
        id: Uuid::new_v4().to_string(),
        post_content,
        user_id: user.user_id,
        created_at: Utc::now(),
    };
    let response = PostResponse::from(&post);
    state.store.insert(post).await?;

    info!(post_id = %response.id, "Post created");

    // Delivery to clients is best effort; the post is already stored.
    match state.broadcaster.broadcast(&response, None).await {
        Ok(report) => debug!(
            post_id = %response.id,
            delivered = report.delivered,
            overflowed = report.overflowed,
            "New post broadcast"
        ),
        Err(err) => warn!(post_id = %response.id, error = %err, "Failed to broadcast new post"),
    }

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /posts?page=N - List one page of posts.
async fn list_posts(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    query: std::result::Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<PostResponse>>> {
    let Query(query) = query?;
    let page = query.page.unwrap_or(0);

    let posts = state.store.list(page).await;
    trace!(
        page,
        page_size = state.store.page_size(),
        count = posts.len(),
        "Listed posts"
    );

    Ok(Json(posts.iter().map(PostResponse::from).collect()))
}

/// GET /posts/{id}
async fn get_post(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Json<PostResponse>> {
    let post = state.store.get(&id).await?;
    Ok(Json(PostResponse::from(&post)))
}

/// PUT /posts/{id} - Replace a post's content. Only its author may.
async fn update_post(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
    body: std::result::Result<Json<UpsertPostRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>> {
    let Json(request) = body?;
    let post_content = validate_content(request)?;

    state.store.update(&id, &user.user_id, post_content).await?;
    info!(post_id = %id, "Post updated");

    Ok(Json(MessageResponse::new("Post updated")))
}

/// DELETE /posts/{id} - Remove a post. Only its author may.
async fn delete_post(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    state.store.delete(&id, &user.user_id).await?;
    info!(post_id = %id, "Post deleted");

    Ok(Json(MessageResponse::new("Post deleted")))
}

// ============================================================================
// GET /ws - WebSocket Endpoint
// ============================================================================

/// GET /ws - Upgrade to a WebSocket and join the hub.
///
/// No authentication is required. Once connected the client receives each
/// newly created post as a JSON text frame. Frames sent by the client are
/// ignored.
///
/// # Responses
///
/// - `101 Switching Protocols` - Upgrade successful
/// - `500 Internal Server Error` - The request could not be upgraded
async fn get_ws(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(peer = %peer, "WebSocket upgrade rejected");
            return ServerError::websocket(rejection.body_text()).into_response();
        }
    };

    debug!(peer = %peer, "WebSocket client connecting");
    let capacity = state.config.send_queue_capacity;

    ws.on_failed_upgrade(move |err| {
        error!(peer = %peer, error = %err, "WebSocket handshake failed");
    })
    .on_upgrade(move |socket| handle_websocket(socket, peer, state.hub, capacity))
}

/// Runs an established WebSocket connection until either side ends it.
///
/// The send loop runs in its own task. This task only reads, to notice the
/// peer closing or the transport failing, and then removes the connection
/// from the hub.
async fn handle_websocket(socket: WebSocket, peer: SocketAddr, hub: Hub, capacity: usize) {
    let (sink, mut stream) = socket.split();
    let (connection, outbound) = Connection::new(peer, capacity);

    let id = match hub.register(Arc::clone(&connection)).await {
        Ok(id) => id,
        Err(err) => {
            warn!(peer = %peer, error = %err, "Could not admit WebSocket client");
            return;
        }
    };

    let send_task = tokio::spawn(Arc::clone(&connection).run_send_loop(outbound, sink));

    loop {
        tokio::select! {
            () = connection.closed() => {
                debug!(connection_id = %id, "Connection closed locally");
                break;
            }
            frame = stream.next() => match frame {
                None | Some(Ok(Message::Close(_))) => {
                    debug!(connection_id = %id, "WebSocket client closed the connection");
                    break;
                }
                Some(Ok(_)) => {
                    trace!(connection_id = %id, "Ignoring inbound frame");
                }
                Some(Err(err)) => {
                    debug!(connection_id = %id, error = %err, "WebSocket read failed");
                    break;
                }
            },
        }
    }

    if let Err(err) = hub.unregister(id).await {
        debug!(connection_id = %id, error = %err, "Hub stopped before removal");
    }
    connection.close();

    if let Err(err) = send_task.await {
        error!(connection_id = %id, error = %err, "Send loop task failed");
    }
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// Response body for health check endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Server status (always "ok" if responding).
    pub status: String,

    /// Number of admitted WebSocket connections.
    pub connections: usize,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// GET /health - Health check endpoint. No authentication required.
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        connections: state.hub.len().await,
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Tests
// ============================================================================
