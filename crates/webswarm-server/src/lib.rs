//! # webswarm-server
//!
//! The signaling service. Provides:
//!
//! - `GET /ws`: WebSocket endpoint speaking the JSON signaling protocol
//! - `GET /health`: liveness and hub statistics
//! - `GET /metrics`: Prometheus counters
//! - `GET /`: plain-text banner
//!
//! The protocol itself lives in [`hub::SignalHub`]; this module only moves
//! frames between sockets and the hub.

pub mod hub;
pub mod memory;
pub mod metrics;

pub use hub::{HubStats, SignalHub, SocketId};
pub use memory::MemoryConnector;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{Json, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use webswarm_config::ServerConfig;
use webswarm_core::protocol::SignalMessage;
use webswarm_signal::Link;

/// Shared server state.
pub struct AppState {
    pub hub: Arc<SignalHub>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_secs: u64,
    hub: HubStats,
}

/// Build the Axum router around `hub`.
pub fn build_router(config: &ServerConfig, hub: Arc<SignalHub>) -> Router {
    let state = Arc::new(AppState { hub });

    let router = Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    if config.cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

async fn index_handler() -> &'static str {
    "Signal running OK"
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: state.hub.metrics().uptime_secs(),
        hub: state.hub.stats(),
    })
}

/// Prometheus-compatible metrics endpoint.
async fn metrics_handler(
    State(state): State<Arc<AppState>>,
) -> (
    StatusCode,
    [(axum::http::header::HeaderName, &'static str); 1],
    String,
) {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.hub.metrics().render_prometheus(),
    )
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Bridge one WebSocket to the hub until either side goes away.
async fn handle_socket(socket: WebSocket, hub: Arc<SignalHub>) {
    let (mut write, mut read) = socket.split();
    let (client, service) = Link::pair();
    let Link {
        tx: to_hub,
        rx: mut from_hub,
    } = client;
    let id = hub.attach(service);
    debug!(socket = %id, "websocket upgraded");

    let writer = tokio::spawn(async move {
        while let Some(msg) = from_hub.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "failed to encode signal frame");
                    continue;
                }
            };
            if write.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<SignalMessage>(text.as_str()) {
                Ok(msg) => {
                    if to_hub.send(msg).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    hub.metrics().inc_malformed_frames();
                    debug!(socket = %id, error = %e, "undecodable frame dropped");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(socket = %id, error = %e, "websocket read failed");
                break;
            }
        }
    }

    drop(to_hub);
    hub.disconnect(id);
    writer.abort();
}

/// Serve on an already bound listener.
pub async fn serve(
    listener: tokio::net::TcpListener,
    config: &ServerConfig,
    hub: Arc<SignalHub>,
) -> webswarm_core::Result<()> {
    let router = build_router(config, hub);
    axum::serve(listener, router).await?;
    Ok(())
}

/// Start the signaling service.
pub async fn start_server(config: ServerConfig) -> webswarm_core::Result<()> {
    let listen = config.listen.clone();
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .map_err(|e| webswarm_core::WebswarmError::Config(format!("failed to bind {}: {}", listen, e)))?;

    info!(listen = %listen, "signaling service listening");
    serve(listener, &config, SignalHub::new()).await
}
