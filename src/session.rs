//! Station session adapter and status API
//!
//! Each station keeps a long-lived WebSocket session at `/ws/{station_id}`.
//! Inbound frames are acknowledged with a `[3, token, {}]` envelope carrying
//! a process-wide monotonically increasing correlation token; limit changes
//! decided by the manager are pushed on the same channel as
//! `[2, token, "SetChargingProfile", {...}]`. Limit updates arrive over an
//! unbounded channel so the manager's decision path never waits on a slow
//! session. The adapter owns the connected and charging flags.

use crate::error::{HelionError, Result};
use crate::logging::{LogContext, get_logger, get_logger_with_context};
use crate::manager::{ChargingManager, LimitUpdate};
use crate::station::StationRegistry;
use axum::{
    Json, Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, watch};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Shared state for the session and status handlers
#[derive(Clone)]
pub struct AppState {
    registry: Arc<StationRegistry>,
    manager: Arc<ChargingManager>,
    outbound: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Message>>>>,
    correlation: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(registry: Arc<StationRegistry>, manager: Arc<ChargingManager>) -> Self {
        Self {
            registry,
            manager,
            outbound: Arc::new(RwLock::new(HashMap::new())),
            correlation: Arc::new(AtomicU64::new(1)),
        }
    }

    fn next_token(&self) -> u64 {
        self.correlation.fetch_add(1, Ordering::Relaxed)
    }
}

/// Acknowledgement envelope for any inbound frame
fn ack_envelope(token: u64) -> String {
    serde_json::json!([3, token.to_string(), {}]).to_string()
}

/// Outbound envelope instructing a station to adopt a new current limit
fn limit_envelope(token: u64, limit: f64) -> String {
    serde_json::json!([2, token.to_string(), "SetChargingProfile", { "limit": limit }]).to_string()
}

#[utoipa::path(get, path = "/api/health", responses(
    (status = 200, description = "Service is healthy")
))]
async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[utoipa::path(get, path = "/api/status", responses(
    (status = 200, description = "Regulation and station status")
))]
async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.manager.status())
}

async fn ws_handler(
    Path(station_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(state, station_id, socket))
}

async fn handle_session(state: AppState, station_id: String, socket: WebSocket) {
    let logger = get_logger_with_context(
        LogContext::new("session").with_station_id(station_id.clone()),
    );

    let station = state.registry.get(&station_id);
    match &station {
        Some(station) => {
            station.set_connected(true, Utc::now());
            logger.info("Station connected");
        }
        None => logger.warn("Unknown station connected"),
    }

    let (mut sender, mut receiver) = socket.split();

    // The local sender half keeps the channel open for the whole session,
    // including sessions from unknown stations that get no pushes
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

    if station.is_some() {
        state
            .outbound
            .write()
            .expect("outbound map poisoned")
            .insert(station_id.clone(), out_tx.clone());
    }

    loop {
        tokio::select! {
            outgoing = out_rx.recv() => match outgoing {
                Some(message) => {
                    if let Err(e) = sender.send(message).await {
                        logger.error(&format!("Write error: {}", e));
                        break;
                    }
                }
                None => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    logger.debug(&format!("Received frame: {}", text));
                    let ack = ack_envelope(state.next_token());
                    if let Err(e) = sender.send(Message::Text(ack.into())).await {
                        logger.error(&format!("Write error: {}", e));
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    logger.error(&format!("Read error: {}", e));
                    break;
                }
            }
        }
    }

    if let Some(station) = station {
        state
            .outbound
            .write()
            .expect("outbound map poisoned")
            .remove(&station_id);
        station.set_connected(false, Utc::now());
        station.set_charging(false);
        logger.info("Station disconnected");
    }
}

/// Forward limit updates from the manager to the owning session
async fn forward_limit_updates(
    state: AppState,
    mut updates_rx: mpsc::UnboundedReceiver<LimitUpdate>,
) {
    let logger = get_logger("session");

    while let Some(update) = updates_rx.recv().await {
        let Some(station) = state.registry.get(&update.station_id) else {
            continue;
        };

        let sink = state
            .outbound
            .read()
            .expect("outbound map poisoned")
            .get(&update.station_id)
            .cloned();

        match sink {
            Some(tx) => {
                let envelope = limit_envelope(state.next_token(), update.limit);
                if tx.send(Message::Text(envelope.into())).is_ok() {
                    station.set_charging(update.limit > 0.0);
                    logger.info(&format!(
                        "Pushed limit {:.1}A to station {}",
                        update.limit, update.station_id
                    ));
                } else {
                    logger.warn(&format!(
                        "Session for {} is gone, dropping limit update",
                        update.station_id
                    ));
                }
            }
            None => {
                logger.debug(&format!(
                    "Station {} not connected, dropping limit update",
                    update.station_id
                ));
            }
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(health, status),
    tags((name = "helion", description = "Helion charging regulation API"))
)]
pub struct ApiDoc;

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/ws/{station_id}", get(ws_handler))
        .merge(SwaggerUi::new("/ui/openapi").url("/openapi.json", ApiDoc::openapi()))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve station sessions and the status API until shutdown
pub async fn serve(
    state: AppState,
    host: &str,
    port: u16,
    updates_rx: mpsc::UnboundedReceiver<LimitUpdate>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let logger = get_logger("session");

    tokio::spawn(forward_limit_updates(state.clone(), updates_rx));

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| HelionError::config(format!("Invalid bind address: {}", e)))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| HelionError::web(format!("Failed to bind {}: {}", addr, e)))?;

    logger.info(&format!("Listening on {}", addr));

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await
        .map_err(|e| HelionError::web(format!("Server failed: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_envelope_shape() {
        let ack = ack_envelope(42);
        let value: serde_json::Value = serde_json::from_str(&ack).unwrap();
        assert_eq!(value[0], 3);
        assert_eq!(value[1], "42");
        assert!(value[2].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_limit_envelope_shape() {
        let envelope = limit_envelope(7, 12.5);
        let value: serde_json::Value = serde_json::from_str(&envelope).unwrap();
        assert_eq!(value[0], 2);
        assert_eq!(value[1], "7");
        assert_eq!(value[2], "SetChargingProfile");
        assert_eq!(value[3]["limit"], 12.5);
    }

    #[test]
    fn test_tokens_are_monotonic() {
        let state = AppState::new(
            Arc::new(StationRegistry::new(vec![])),
            test_manager(),
        );
        let first = state.next_token();
        let second = state.next_token();
        assert!(second > first);
    }

    fn test_manager() -> Arc<ChargingManager> {
        use crate::config::ChargingConfig;
        use crate::measurement::{GridData, TariffState};
        use crate::regulation::{RegulatorKind, create_regulator};

        let cfg = ChargingConfig::default();
        let regulator = create_regulator(RegulatorKind::Simple, &cfg);
        let now = Utc::now();
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(ChargingManager::new(
            cfg,
            regulator,
            Arc::new(GridData::new(now)),
            Arc::new(TariffState::new(now)),
            Arc::new(StationRegistry::new(vec![])),
            tx,
        ))
    }
}
