//! Connection handlers for the sockit server.
//!
//! This module handles the connection lifecycle, the HTTP inspection
//! endpoints and the mapping of inbound envelopes onto mesh operations.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use sockit_core::{BroadcastBehavior, Client, Delivery, Mesh, MeshStats, Message, RoomInfo};
use sockit_protocol::codec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Action asking the mesh to add the sender to the target room.
pub const JOIN_ROOM_ACTION: &str = "join-room";

/// Action asking the mesh to remove the sender from the target room.
pub const LEAVE_ROOM_ACTION: &str = "leave-room";

/// Shared server state.
pub struct AppState {
    /// The room mesh.
    pub mesh: Mesh,
    /// Server configuration.
    pub config: Config,
    next_client: AtomicU64,
}

impl AppState {
    /// Create new app state, starting the mesh.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let mesh = Mesh::with_config(
            config.mesh.name.clone(),
            config.mesh.mesh_config(),
            Arc::new(BroadcastBehavior),
        );

        Self {
            mesh,
            config,
            next_client: AtomicU64::new(1),
        }
    }

    fn generate_slug(&self) -> String {
        format!("client-{}", self.next_client.fetch_add(1, Ordering::Relaxed))
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();

    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/rooms", get(rooms_handler))
        .route("/clients/:slug", get(client_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(mesh = %state.mesh.name(), "sockit server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.mesh.shutdown();
    info!("sockit server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = if state.mesh.is_shut_down() {
        "stopping"
    } else {
        "ok"
    };

    Json(serde_json::json!({
        "status": status,
        "mesh": state.mesh.name(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Snapshot returned by `/rooms`.
#[derive(Debug, Serialize)]
pub struct RoomsResponse {
    pub mesh: String,
    pub rooms: Vec<RoomInfo>,
    pub memberships: HashMap<String, Vec<String>>,
    pub stats: MeshStats,
}

async fn rooms_handler(State(state): State<Arc<AppState>>) -> Json<RoomsResponse> {
    let mesh = &state.mesh;

    let mut rooms: Vec<RoomInfo> = mesh
        .rooms()
        .iter()
        .filter_map(|slug| mesh.room_info(slug))
        .collect();
    rooms.sort_by_key(|room| room.id);

    let memberships = mesh
        .memberships()
        .into_iter()
        .map(|(room, members)| {
            let mut slugs: Vec<String> = members.into_keys().collect();
            slugs.sort();
            (room, slugs)
        })
        .collect();

    Json(RoomsResponse {
        mesh: mesh.name().to_string(),
        rooms,
        memberships,
        stats: mesh.stats(),
    })
}

/// Snapshot returned by `/clients/:slug`.
#[derive(Debug, Serialize)]
pub struct ClientResponse {
    pub slug: String,
    pub auth_metadata: Vec<String>,
    pub rooms: Vec<String>,
    pub connected: bool,
}

async fn client_handler(
    Path(slug): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ClientResponse>, StatusCode> {
    let client = state.mesh.client(&slug).ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(ClientResponse {
        rooms: state.mesh.client_rooms(&slug),
        auth_metadata: client.auth_metadata().to_vec(),
        connected: client.is_connected(),
        slug,
    }))
}

/// Query parameters accepted on the websocket endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Requested client slug; generated when absent.
    pub slug: Option<String>,
    /// Comma separated auth metadata.
    pub meta: Option<String>,
}

impl ConnectParams {
    fn auth_metadata(&self) -> Vec<String> {
        self.meta
            .as_deref()
            .map(|meta| {
                meta.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if state.mesh.stats().client_count >= state.config.limits.max_connections {
        metrics::record_error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "Connection limit reached").into_response();
    }

    let auth_metadata = params.auth_metadata();
    let slug = params
        .slug
        .filter(|slug| !slug.is_empty())
        .unwrap_or_else(|| state.generate_slug());

    ws.max_message_size(state.config.transport.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, slug, auth_metadata))
        .into_response()
}

/// Handle a WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    slug: String,
    auth_metadata: Vec<String>,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (sink, mut outbound) = mpsc::channel(state.config.transport.outbound_capacity());
    if let Err(e) = state
        .mesh
        .register_client(Client::new(slug.clone(), auth_metadata, &sink))
        .await
    {
        error!(client = %slug, error = %e, "Failed to register client");
        metrics::record_error("register");
        return;
    }
    metrics::set_mesh_stats(&state.mesh.stats());
    debug!(client = %slug, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            biased;

            Some(message) = outbound.recv() => {
                match encode_text(&message) {
                    Ok(text) => {
                        metrics::record_message(text.len(), "outbound");
                        if sender.send(WsMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(client = %slug, error = %e, "Failed to encode outbound message");
                        metrics::record_error("encode");
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_inbound(text.as_bytes(), &slug, &state).await;
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        handle_inbound(&data, &slug, &state).await;
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if sender.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close(_))) => {
                        debug!(client = %slug, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(client = %slug, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(client = %slug, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    if let Err(e) = state.mesh.unregister_connection(&slug, &sink).await {
        debug!(client = %slug, error = %e, "Unregister after disconnect failed");
    }
    metrics::set_mesh_stats(&state.mesh.stats());

    debug!(client = %slug, "WebSocket disconnected");
}

fn encode_text(message: &Message) -> Result<String> {
    let data = codec::encode(message)?;
    Ok(String::from_utf8(data.to_vec())?)
}

async fn handle_inbound(data: &[u8], slug: &str, state: &AppState) {
    let start = Instant::now();
    metrics::record_message(data.len(), "inbound");

    if let Err(e) = handle_frame(data, slug, state).await {
        warn!(client = %slug, error = %e, "Inbound message rejected");
        metrics::record_error("frame");
    }

    metrics::record_latency(start.elapsed().as_secs_f64());
}

/// Apply one inbound envelope on behalf of `slug`.
async fn handle_frame(data: &[u8], slug: &str, state: &AppState) -> Result<()> {
    let message = codec::decode(data)?.with_sender(slug);

    match message.action.as_str() {
        JOIN_ROOM_ACTION if message.is_target_room() => {
            let joined = state.mesh.join_room(&message.target, slug).await?;
            debug!(client = %slug, room = %message.target, joined, "Join request");
            metrics::set_mesh_stats(&state.mesh.stats());
        }
        LEAVE_ROOM_ACTION if message.is_target_room() => {
            let left = state.mesh.leave_room(&message.target, slug).await?;
            debug!(client = %slug, room = %message.target, left, "Leave request");
            metrics::set_mesh_stats(&state.mesh.stats());
        }
        _ if message.is_target_client => deliver_direct(state, message),
        _ => state.mesh.submit(message).await?,
    }

    Ok(())
}

fn deliver_direct(state: &AppState, message: Message) {
    let Some(target) = state.mesh.client(&message.target) else {
        debug!(target = %message.target, "Direct message to unknown client");
        metrics::record_dropped("unknown_client");
        return;
    };

    match target.try_deliver(Arc::new(message)) {
        Delivery::Accepted => {}
        Delivery::Full => {
            warn!(target = %target.slug(), "Client queue full, dropping direct message");
            metrics::record_dropped("client_queue_full");
        }
        Delivery::Closed => {
            debug!(target = %target.slug(), "Client gone, dropping direct message");
            metrics::record_dropped("client_closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sockit_core::GLOBAL_ROOM;
    use std::time::Duration;
    use tokio::time::timeout;

    fn state() -> AppState {
        let mut config = Config::default();
        config.mesh.room_queue_capacity = 16;
        config.metrics.enabled = false;
        AppState::new(config)
    }

    async fn connect(
        state: &AppState,
        slug: &str,
    ) -> (mpsc::Sender<Arc<Message>>, mpsc::Receiver<Arc<Message>>) {
        let (tx, rx) = mpsc::channel(8);
        state
            .mesh
            .register_client(Client::new(slug, vec!["token".to_string()], &tx))
            .await
            .unwrap();
        (tx, rx)
    }

    #[test]
    fn test_connect_params_metadata() {
        let params = ConnectParams {
            slug: None,
            meta: Some("role:admin, team:red,,".to_string()),
        };
        assert_eq!(params.auth_metadata(), ["role:admin", "team:red"]);
        assert!(ConnectParams::default().auth_metadata().is_empty());
    }

    #[tokio::test]
    async fn test_generated_slugs_are_unique() {
        let state = state();
        assert_ne!(state.generate_slug(), state.generate_slug());
    }

    #[tokio::test]
    async fn test_join_and_leave_actions() {
        let state = state();
        let (_tx, _rx) = connect(&state, "alice").await;

        let join = br#"{"action":"join-room","message_body":null,"IsTargetClient":false,"target":"lobby"}"#;
        handle_frame(join, "alice", &state).await.unwrap();
        assert!(state.mesh.room_members("lobby").unwrap().contains_key("alice"));
        assert_eq!(state.mesh.room_info("lobby").unwrap().created_by, "alice");

        let leave = br#"{"action":"leave-room","target":"lobby"}"#;
        handle_frame(leave, "alice", &state).await.unwrap();
        assert!(!state.mesh.room_exists("lobby"));
    }

    #[tokio::test]
    async fn test_leave_global_room_rejected() {
        let state = state();
        let (_tx, _rx) = connect(&state, "alice").await;

        let leave = format!(r#"{{"action":"leave-room","target":"{GLOBAL_ROOM}"}}"#);
        assert!(handle_frame(leave.as_bytes(), "alice", &state).await.is_err());

        assert!(state.mesh.client("alice").is_some());
        assert!(state
            .mesh
            .room_members(GLOBAL_ROOM)
            .unwrap()
            .contains_key("alice"));
    }

    #[tokio::test]
    async fn test_direct_message_overwrites_sender() {
        let state = state();
        let (_a_tx, _a_rx) = connect(&state, "alice").await;
        let (_b_tx, mut b_rx) = connect(&state, "bob").await;

        let data = br#"{"action":"poke","message_body":{"n":1},"IsTargetClient":true,"target":"bob","sender":"mallory"}"#;
        handle_frame(data, "alice", &state).await.unwrap();

        let received = b_rx.try_recv().unwrap();
        assert_eq!(received.action, "poke");
        assert_eq!(received.sender, "alice");
        assert_eq!(received.body["n"], 1);
    }

    #[tokio::test]
    async fn test_room_message_fans_out() {
        let state = state();
        let (_a_tx, mut a_rx) = connect(&state, "alice").await;
        let (_b_tx, mut b_rx) = connect(&state, "bob").await;

        let data = format!(r#"{{"action":"say","message_body":"hi","target":"{GLOBAL_ROOM}"}}"#);
        handle_frame(data.as_bytes(), "alice", &state).await.unwrap();

        let received = timeout(Duration::from_secs(2), b_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.sender, "alice");
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_join_requires_registration() {
        let state = state();
        let join = br#"{"action":"join-room","target":"lobby"}"#;
        assert!(handle_frame(join, "ghost", &state).await.is_err());
        assert!(!state.mesh.room_exists("lobby"));
    }

    #[tokio::test]
    async fn test_malformed_frame_rejected() {
        let state = state();
        assert!(handle_frame(b"not json", "alice", &state).await.is_err());
        assert!(handle_frame(br#"{"action":""}"#, "alice", &state).await.is_err());
    }

    #[tokio::test]
    async fn test_inspection_handlers() {
        let state = Arc::new(state());
        let (_tx, _rx) = connect(&state, "alice").await;
        state.mesh.join_room("lobby", "alice").await.unwrap();

        let Json(rooms) = rooms_handler(State(Arc::clone(&state))).await;
        assert_eq!(rooms.rooms[0].slug, GLOBAL_ROOM);
        assert_eq!(rooms.memberships["lobby"], ["alice"]);
        assert_eq!(rooms.stats.client_count, 1);

        let Json(client) = client_handler(Path("alice".to_string()), State(Arc::clone(&state)))
            .await
            .unwrap();
        assert_eq!(client.auth_metadata, ["token"]);
        assert!(client.connected);
        assert!(client.rooms.contains(&"lobby".to_string()));

        let missing = client_handler(Path("ghost".to_string()), State(state)).await;
        assert_eq!(missing.unwrap_err(), StatusCode::NOT_FOUND);
    }
}
