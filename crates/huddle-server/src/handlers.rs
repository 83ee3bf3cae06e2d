//! Connection handlers for the Huddle server.
//!
//! This module serves the room page and runs the signaling loop of each
//! WebSocket connection.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use huddle_core::SessionManager;
use huddle_protocol::{codec, codes, Frame};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Rooms, participants and their media resources.
    pub sessions: SessionManager,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config, sessions: SessionManager) -> Self {
        Self { sessions, config }
    }
}

/// Encoding a connection speaks. Replies use the encoding of the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    /// Length-prefixed MessagePack in binary messages.
    Binary,
    /// JSON in text messages.
    Text,
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.signaling.websocket_path, get(ws_handler))
        .route("/sfu/:room", get(room_handler))
        .route("/health", get(health_handler))
        .fallback(fallback_handler)
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(state: Arc<AppState>) -> Result<()> {
    let config = state.config.clone();

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Huddle server listening on {}", addr);
    info!(
        "Signaling endpoint: ws://{}{}",
        addr, config.signaling.websocket_path
    );

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Serve the room client page. The room name is read by the page itself.
async fn room_handler(Path(room): Path<String>, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let page = state.config.http.public_dir.join("index.html");
    match tokio::fs::read_to_string(&page).await {
        Ok(html) => {
            debug!(room = %room, "Serving room page");
            Html(html).into_response()
        }
        Err(e) => {
            warn!(page = %page.display(), error = %e, "Room page unavailable");
            (StatusCode::NOT_FOUND, "Room page not found").into_response()
        }
    }
}

async fn fallback_handler() -> impl IntoResponse {
    "Specify a room"
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.max_message_size(state.config.signaling.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let participant_id = state.sessions.on_connect(event_tx);

    let (mut sender, mut receiver) = socket.split();

    // Read buffer for partial binary frames
    let mut read_buffer = BytesMut::with_capacity(4096);
    let mut encoding = Encoding::Text;

    loop {
        tokio::select! {
            biased;

            // Server events for this participant
            Some(event) = event_rx.recv() => {
                if send_frame(&mut sender, &Frame::event(event), encoding).await.is_err() {
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        encoding = Encoding::Binary;
                        metrics::record_message(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);

                        let mut failed = false;
                        loop {
                            match codec::decode_from(&mut read_buffer) {
                                Ok(Some(frame)) => {
                                    if let Err(e) = handle_frame(frame, &participant_id, &state, &mut sender, encoding).await {
                                        error!(participant = %participant_id, error = %e, "Frame handling error");
                                        failed = true;
                                        break;
                                    }
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    read_buffer.clear();
                                    failed = reject_malformed(&mut sender, &participant_id, &e.to_string(), encoding).await.is_err();
                                    break;
                                }
                            }
                        }
                        if failed {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        encoding = Encoding::Text;
                        metrics::record_message(text.len(), "inbound");

                        let handled = match codec::decode_text(&text) {
                            Ok(frame) => handle_frame(frame, &participant_id, &state, &mut sender, encoding).await,
                            Err(e) => reject_malformed(&mut sender, &participant_id, &e.to_string(), encoding).await,
                        };
                        if let Err(e) = handled {
                            error!(participant = %participant_id, error = %e, "Frame handling error");
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(participant = %participant_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(participant = %participant_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        debug!(participant = %participant_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    state.sessions.on_disconnect(&participant_id);
    metrics::set_session_stats(&state.sessions.stats());

    debug!(participant = %participant_id, "WebSocket disconnected");
}

/// Handle a decoded frame.
async fn handle_frame(
    frame: Frame,
    participant_id: &str,
    state: &Arc<AppState>,
    sender: &mut SplitSink<WebSocket, Message>,
    encoding: Encoding,
) -> Result<()> {
    match frame {
        Frame::Request { id, request } => {
            let event = request.event_name();
            let start = Instant::now();

            let reply = match state.sessions.dispatch(participant_id, request).await {
                Ok(response) => Frame::response(id, response),
                Err(e) => {
                    warn!(participant = %participant_id, event, code = e.code(), error = %e, "Request failed");
                    metrics::record_error(e.code());
                    Frame::error(id, e.code(), e.to_string())
                }
            };

            metrics::record_request(event, start.elapsed().as_secs_f64());
            metrics::set_session_stats(&state.sessions.stats());
            send_frame(sender, &reply, encoding).await?;
        }

        Frame::Ping { timestamp } => {
            send_frame(sender, &Frame::pong(timestamp), encoding).await?;
        }

        Frame::Pong { .. } => {}

        other => {
            warn!(participant = %participant_id, frame_type = ?other.frame_type(), "Unexpected frame type");
            metrics::record_error(codes::UNEXPECTED_FRAME);
            let reply = Frame::error(0, codes::UNEXPECTED_FRAME, "Unexpected frame type");
            send_frame(sender, &reply, encoding).await?;
        }
    }

    Ok(())
}

/// Answer an undecodable message with an error frame.
async fn reject_malformed(
    sender: &mut SplitSink<WebSocket, Message>,
    participant_id: &str,
    reason: &str,
    encoding: Encoding,
) -> Result<()> {
    warn!(participant = %participant_id, reason, "Malformed frame");
    metrics::record_error(codes::MALFORMED_FRAME);
    let reply = Frame::error(0, codes::MALFORMED_FRAME, format!("Malformed frame: {}", reason));
    send_frame(sender, &reply, encoding).await
}

/// Send a frame to the WebSocket.
async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &Frame,
    encoding: Encoding,
) -> Result<()> {
    let message = match encoding {
        Encoding::Binary => {
            let data = codec::encode(frame)?;
            metrics::record_message(data.len(), "outbound");
            Message::Binary(data.to_vec())
        }
        Encoding::Text => {
            let text = codec::encode_text(frame)?;
            metrics::record_message(text.len(), "outbound");
            Message::Text(text)
        }
    };
    sender.send(message).await?;
    Ok(())
}
