// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! HTTP/WebSocket surface — a thin stand-in for the routing layer spec.md
//! §1 treats as an external collaborator. It exists only so the broker is
//! runnable and exercisable end to end; it makes no framing decisions
//! beyond "one broadcast payload = one binary WebSocket message".
//!
//! Endpoints:
//!   GET  /api/channels                  → list all channel snapshots
//!   GET  /api/channels/{channel_key}     → one channel snapshot
//!   POST /api/streams/start             → Start(SourceDescriptor)
//!   POST /api/streams/stop               → Stop(caller_source_id)
//!   GET  /ws/{channel_key}               → attach as a subscriber

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::broker::TranscoderBroker;
use crate::model::SourceDescriptor;
use crate::sink::ChannelSink;

pub struct AppState {
    pub broker: Arc<TranscoderBroker>,
}

#[derive(Deserialize)]
struct StopParams {
    caller_source_id: String,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/channels", get(handle_list_channels))
        .route("/api/channels/{channel_key}", get(handle_inspect_channel))
        .route("/api/streams/start", post(handle_start))
        .route("/api/streams/stop", post(handle_stop))
        .route("/ws/{channel_key}", get(handle_attach))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(state: Arc<AppState>, port: u16) {
    let app = build_router(state);
    let addr = format!("0.0.0.0:{port}");
    info!(port, "Broker HTTP API listening on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "Failed to bind HTTP server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "HTTP server error");
    }
}

async fn handle_list_channels(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(state.broker.inspect_all())
}

async fn handle_inspect_channel(
    State(state): State<Arc<AppState>>,
    Path(channel_key): Path<String>,
) -> axum::response::Response {
    match state.broker.inspect(&channel_key) {
        Some(snapshot) => axum::Json(snapshot).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            axum::Json(serde_json::json!({"error": format!("channel '{channel_key}' not found")})),
        )
            .into_response(),
    }
}

async fn handle_start(
    State(state): State<Arc<AppState>>,
    axum::Json(descriptor): axum::Json<SourceDescriptor>,
) -> axum::response::Response {
    match state.broker.start(descriptor).await {
        Ok(outcome) => axum::Json(outcome).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            axum::Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

async fn handle_stop(
    State(state): State<Arc<AppState>>,
    axum::Json(params): axum::Json<StopParams>,
) -> impl IntoResponse {
    state.broker.stop(&params.caller_source_id);
    StatusCode::NO_CONTENT
}

async fn handle_attach(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(channel_key): Path<String>,
) -> axum::response::Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, channel_key))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, channel_key: String) {
    let (sink, mut payload_rx) = ChannelSink::new(32);

    let subscriber_id = match state.broker.attach(&channel_key, sink) {
        Ok(id) => id,
        Err(e) => {
            warn!(channel = channel_key, error = %e, "Attach rejected");
            return;
        }
    };

    info!(channel = channel_key, subscriber = subscriber_id, "Subscriber attached");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let forward = tokio::spawn(async move {
        while let Some(payload) = payload_rx.recv().await {
            if ws_tx.send(Message::Binary((*payload).clone().into())).await.is_err() {
                break;
            }
        }
    });

    // Drain incoming frames only to detect disconnect; subscribers don't
    // send anything meaningful upstream.
    while ws_rx.next().await.is_some() {}

    forward.abort();
    state.broker.detach(&channel_key, &subscriber_id);
    info!(channel = channel_key, subscriber = subscriber_id, "Subscriber detached");
}
