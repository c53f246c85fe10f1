use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use helion::config::ChargingConfig;
use helion::manager::ChargingManager;
use helion::measurement::{GridData, TariffState};
use helion::regulation::{RegulatorKind, create_regulator};
use helion::session::{AppState, router};
use helion::station::{ChargingStation, StationRegistry};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;

fn test_state() -> AppState {
    let cfg = ChargingConfig::default();
    let regulator = create_regulator(RegulatorKind::DeltaPid, &cfg);
    let now = Utc::now();
    let grid = Arc::new(GridData::new(now));
    let tariff = Arc::new(TariffState::new(now));
    let registry = Arc::new(StationRegistry::new(vec![
        ChargingStation::new("station1", 1, 32.0),
        ChargingStation::new("station2", 2, 32.0),
    ]));
    let (updates_tx, _updates_rx) = mpsc::unbounded_channel();

    let manager = Arc::new(ChargingManager::new(
        cfg,
        regulator,
        grid,
        tariff,
        registry.clone(),
        updates_tx,
    ));

    AppState::new(registry, manager)
}

#[tokio::test]
async fn health_ok() {
    let response = router(test_state())
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn status_reports_regulation_and_stations() {
    let response = router(test_state())
        .oneshot(
            Request::builder()
                .uri("/api/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(json["regulator"]["name"], "Delta PID Regulator");
    assert_eq!(json["max_total_current"], 40.0);
    assert!(json["stations"]["station1"]["connected"].is_boolean());
    assert_eq!(json["stations"]["station2"]["priority"], 2);
}

#[tokio::test]
async fn websocket_route_rejects_plain_get() {
    // Without an upgrade handshake the session route must not succeed
    let response = router(test_state())
        .oneshot(
            Request::builder()
                .uri("/ws/station1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_ne!(response.status(), StatusCode::OK);
}
