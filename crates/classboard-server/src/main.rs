//! Classboard WebSocket Relay Server
//!
//! Stands in for the hosted operations table: clients insert operation rows,
//! the relay appends them to the board's log and broadcasts an INSERT event
//! to every subscriber of that board, the sender included.
//!
//! ## Protocol
//!
//! Messages are JSON with the following format:
//! ```json
//! { "type": "subscribe", "channel": "board:b1:alice", "board_id": "b1" }
//! { "type": "insert", "ref": 0, "row": { "id": "...", "action_type": "draw", ... } }
//! { "type": "select", "board_id": "b1" }
//! ```

mod state;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use classboard_core::{ClientMessage, FileStore, MemoryStore, OperationStore, ServerMessage, env_parse};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use state::{AppState, DEFAULT_CHANNEL_CAPACITY, Inserted, RelayError};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_PORT: u16 = 3030;

/// Server configuration, read from `CLASSBOARD_*` environment variables.
#[derive(Debug, Clone)]
struct ServerConfig {
    port: u16,
    /// Directory for board logs; in-memory when unset.
    data_dir: Option<PathBuf>,
    channel_capacity: usize,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            port: env_parse("CLASSBOARD_PORT", DEFAULT_PORT),
            data_dir: std::env::var("CLASSBOARD_DATA_DIR")
                .ok()
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from),
            channel_capacity: env_parse("CLASSBOARD_CHANNEL_CAPACITY", DEFAULT_CHANNEL_CAPACITY),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "classboard_server=info,classboard_core=info,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::from_env();
    let store: Arc<dyn OperationStore> = match &config.data_dir {
        Some(dir) => {
            info!("Persisting board logs under {}", dir.display());
            Arc::new(FileStore::new(dir.clone())?)
        }
        None => {
            info!("No CLASSBOARD_DATA_DIR set, board logs are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };
    let state = Arc::new(AppState::new(store, config.channel_capacity));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Classboard relay server listening on {}", addr);
    info!("WebSocket endpoint: ws://localhost:{}/ws", config.port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Index page
async fn index() -> &'static str {
    "Classboard Relay Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Board subscription held by one connection.
struct Subscription {
    channel: String,
    board_id: String,
    rx: broadcast::Receiver<ServerMessage>,
}

/// Serialize and send; false when the socket is gone.
async fn send_message(sender: &mut SplitSink<WebSocket, Message>, message: &ServerMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode server message: {}", e);
            true
        }
    }
}

/// Handle one client message; returns the direct reply, if any.
async fn handle_client_message(
    state: &AppState,
    conn_id: &str,
    message: ClientMessage,
    subscription: &mut Option<Subscription>,
) -> Option<ServerMessage> {
    match message {
        ClientMessage::Subscribe { channel, board_id } => {
            if let Some(old) = subscription.take() {
                state.unsubscribe(&old.board_id, conn_id);
            }
            let rx = state.subscribe(&board_id, conn_id);
            info!(
                "Connection {} subscribed to {} ({}), {} subscribers",
                conn_id,
                board_id,
                channel,
                state.subscriber_count(&board_id)
            );
            *subscription = Some(Subscription {
                channel: channel.clone(),
                board_id,
                rx,
            });
            Some(ServerMessage::Subscribed { channel })
        }
        ClientMessage::Unsubscribe { channel } => {
            if subscription.as_ref().is_some_and(|s| s.channel == channel) {
                if let Some(old) = subscription.take() {
                    state.unsubscribe(&old.board_id, conn_id);
                    info!("Connection {} left {}", conn_id, old.board_id);
                }
            }
            None
        }
        ClientMessage::Insert { reference, row } => match state.insert(row).await {
            Ok(Inserted::Appended { .. } | Inserted::Duplicate) => Some(ServerMessage::Inserted { reference }),
            Err(RelayError::InvalidRow(reason)) => {
                warn!("Rejected insert {} from {}: {}", reference, conn_id, reason);
                Some(ServerMessage::Rejected {
                    reference,
                    message: reason,
                })
            }
            Err(e) => {
                warn!("Rejected insert {} from {}: {}", reference, conn_id, e);
                Some(ServerMessage::Error {
                    message: format!("insert {} failed: {}", reference, e),
                })
            }
        },
        ClientMessage::Select { board_id } => match state.select(&board_id).await {
            Ok(rows) => Some(ServerMessage::Rows { board_id, rows }),
            Err(e) => {
                warn!("Select of {} failed: {}", board_id, e);
                Some(ServerMessage::Error {
                    message: format!("select {} failed: {}", board_id, e),
                })
            }
        },
    }
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = Uuid::new_v4().to_string();
    info!("New connection: {}", conn_id);

    let (mut sender, mut receiver) = socket.split();
    let mut subscription: Option<Subscription> = None;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => handle_client_message(&state, &conn_id, message, &mut subscription).await,
                            Err(e) => {
                                warn!("Invalid message from {}: {}", conn_id, e);
                                Some(ServerMessage::Error {
                                    message: format!("Invalid message: {}", e),
                                })
                            }
                        };
                        if let Some(reply) = reply {
                            if !send_message(&mut sender, &reply).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", conn_id, e);
                        break;
                    }
                }
            }

            event = async {
                match subscription.as_mut() {
                    Some(sub) => sub.rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                match event {
                    Ok(message) => {
                        if !send_message(&mut sender, &message).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        // Resync the client with the full log instead of leaving a gap.
                        let Some(board_id) = subscription.as_ref().map(|s| s.board_id.clone()) else {
                            continue;
                        };
                        warn!("Connection {} lagged by {} rows on {}, resending log", conn_id, missed, board_id);
                        if let Ok(rows) = state.select(&board_id).await {
                            if !send_message(&mut sender, &ServerMessage::Rows { board_id, rows }).await {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Closed) => subscription = None,
                }
            }
        }
    }

    if let Some(sub) = subscription {
        state.unsubscribe(&sub.board_id, &conn_id);
    }
    info!("Connection closed: {}", conn_id);
}
