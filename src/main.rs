use anyhow::Result;
use chrono::Utc;
use helion::config::Config;
use helion::manager::ChargingManager;
use helion::measurement::{GridData, TariffState};
use helion::mqtt::MqttIngress;
use helion::regulation::{RegulatorKind, create_regulator};
use helion::session::{self, AppState};
use helion::station::{ChargingStation, StationRegistry};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

/// Per-station current bound of the reference installation (A)
const STATION_MAX_CURRENT: f64 = 32.0;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1);
    let config = Config::load_with_override(config_path)
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    helion::logging::init_logging(&config.logging)?;

    info!("Helion charging regulation service starting up");

    let now = Utc::now();
    let grid = Arc::new(GridData::new(now));
    let tariff = Arc::new(TariffState::new(now));

    let registry = Arc::new(StationRegistry::new(vec![
        ChargingStation::new(
            "station1",
            config.charging.station1_priority,
            STATION_MAX_CURRENT,
        ),
        ChargingStation::new(
            "station2",
            config.charging.station2_priority,
            STATION_MAX_CURRENT,
        ),
    ]));

    let kind: RegulatorKind = config.charging.regulator.parse()?;
    let regulator = create_regulator(kind, &config.charging);
    info!("Using regulator: {}", regulator.name());

    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let manager = Arc::new(ChargingManager::new(
        config.charging.clone(),
        regulator,
        grid.clone(),
        tariff.clone(),
        registry.clone(),
        updates_tx,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let watchdog_task = tokio::spawn(manager.clone().run_watchdog(shutdown_rx.clone()));

    let ingress = MqttIngress::new(
        config.mqtt.clone(),
        grid.clone(),
        tariff.clone(),
        manager.clone(),
    );
    let mut ingress_task = tokio::spawn(ingress.run(shutdown_rx.clone()));

    let state = AppState::new(registry.clone(), manager.clone());
    let (server_host, server_port) = (config.server.host.clone(), config.server.port);
    let server_shutdown = shutdown_rx.clone();
    let mut server_task = tokio::spawn(async move {
        session::serve(state, &server_host, server_port, updates_rx, server_shutdown).await
    });

    info!("All services started");

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt signal");
        }
        _ = sigterm.recv() => {
            info!("Received termination signal");
        }
        result = &mut server_task => {
            let result = result?;
            if let Err(e) = result {
                error!("Session server failed: {}", e);
                return Err(anyhow::anyhow!("Session server failed: {}", e));
            }
        }
        result = &mut ingress_task => {
            let result = result?;
            if let Err(e) = result {
                error!("MQTT ingress failed: {}", e);
                return Err(anyhow::anyhow!("MQTT ingress failed: {}", e));
            }
        }
    }

    info!("Shutting down");
    let _ = shutdown_tx.send(true);

    let _ = watchdog_task.await;
    if !ingress_task.is_finished() {
        let _ = ingress_task.await;
    }
    if !server_task.is_finished() {
        let _ = server_task.await;
    }

    info!("Shutdown complete");
    Ok(())
}
