//! Shared helpers for manager-level tests
#![allow(dead_code)]

use chrono::Utc;
use helion::config::ChargingConfig;
use helion::manager::{ChargingManager, LimitUpdate};
use helion::measurement::{GridData, TariffState};
use helion::regulation::{RegulationInput, RegulationOutput, Regulator};
use helion::station::{ChargingStation, StationRegistry};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Regulator stub returning a canned output and counting interactions
pub struct FixedRegulator {
    output: RegulationOutput,
    pub calculate_calls: Arc<AtomicU64>,
    pub reset_calls: Arc<AtomicU64>,
}

impl FixedRegulator {
    pub fn new(output: RegulationOutput) -> Self {
        Self {
            output,
            calculate_calls: Arc::new(AtomicU64::new(0)),
            reset_calls: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Regulator for FixedRegulator {
    fn calculate(&self, _input: &RegulationInput) -> RegulationOutput {
        self.calculate_calls.fetch_add(1, Ordering::Relaxed);
        self.output.clone()
    }

    fn reset(&self) {
        self.reset_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn name(&self) -> &'static str {
        "Fixed Regulator"
    }

    fn status(&self) -> serde_json::Value {
        serde_json::json!({ "name": self.name() })
    }
}

/// Absolute-mode canned output
pub fn absolute(target_current: f64) -> RegulationOutput {
    RegulationOutput {
        target_current,
        delta_current: 0.0,
        should_charge: target_current > 6.0,
        reason: "fixed".to_string(),
        debug: serde_json::json!({}),
    }
}

/// Delta-mode canned output
pub fn delta(delta_current: f64, should_charge: bool) -> RegulationOutput {
    RegulationOutput {
        target_current: 0.0,
        delta_current,
        should_charge,
        reason: "fixed".to_string(),
        debug: serde_json::json!({}),
    }
}

pub struct Harness {
    pub manager: Arc<ChargingManager>,
    pub registry: Arc<StationRegistry>,
    pub grid: Arc<GridData>,
    pub tariff: Arc<TariffState>,
    pub updates_rx: mpsc::UnboundedReceiver<LimitUpdate>,
    pub calculate_calls: Arc<AtomicU64>,
    pub reset_calls: Arc<AtomicU64>,
}

/// Build a manager around canned regulator output and the given stations
pub fn harness(output: RegulationOutput, stations: Vec<ChargingStation>) -> Harness {
    harness_at(output, stations, Utc::now())
}

/// Like `harness`, but the measurement cells start at the given timestamp
pub fn harness_at(
    output: RegulationOutput,
    stations: Vec<ChargingStation>,
    now: chrono::DateTime<Utc>,
) -> Harness {
    let regulator = FixedRegulator::new(output);
    let calculate_calls = regulator.calculate_calls.clone();
    let reset_calls = regulator.reset_calls.clone();
    let grid = Arc::new(GridData::new(now));
    let tariff = Arc::new(TariffState::new(now));
    let registry = Arc::new(StationRegistry::new(stations));
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();

    let manager = Arc::new(ChargingManager::new(
        ChargingConfig::default(),
        Box::new(regulator),
        grid.clone(),
        tariff.clone(),
        registry.clone(),
        updates_tx,
    ));

    Harness {
        manager,
        registry,
        grid,
        tariff,
        updates_rx,
        calculate_calls,
        reset_calls,
    }
}

/// Two 32 A stations with priorities 1 and 2
pub fn two_stations() -> Vec<ChargingStation> {
    vec![
        ChargingStation::new("station1", 1, 32.0),
        ChargingStation::new("station2", 2, 32.0),
    ]
}

/// Collect every pending limit update without blocking
pub fn drain_updates(rx: &mut mpsc::UnboundedReceiver<LimitUpdate>) -> Vec<LimitUpdate> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    updates
}
