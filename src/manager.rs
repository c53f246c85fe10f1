//! Charging manager
//!
//! Owns the regulator, the measurement cells and the station registry, and
//! serializes every decision behind one orchestration mutex: read caches,
//! run the regulator, distribute the budget, emit limit updates. A watchdog
//! ticker runs alongside and forces a safe stop when input data goes stale;
//! it never computes a regulator output itself.

use crate::config::ChargingConfig;
use crate::logging::{StructuredLogger, get_logger};
use crate::measurement::{GridData, TariffState};
use crate::regulation::{RegulationInput, Regulator};
use crate::station::{ChargingStation, MIN_CHARGING_CURRENT, StationRegistry};
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::time::interval;

/// Input silence after which charging is stopped for safety
const STALE_AFTER_SECS: i64 = 300;

/// Watchdog tick period
const WATCHDOG_PERIOD_SECS: u64 = 60;

/// Writes closer than this to the previous limit are suppressed (A)
const WRITE_DEADBAND: f64 = 0.5;

/// Deltas below this are ignored entirely (A)
const MIN_DELTA: f64 = 0.1;

/// Limit change notification for the session adapter
#[derive(Debug, Clone)]
pub struct LimitUpdate {
    pub station_id: String,
    pub limit: f64,
}

/// Orchestrates regulation and current distribution across stations
pub struct ChargingManager {
    charging: ChargingConfig,
    regulator: Box<dyn Regulator>,
    grid: Arc<GridData>,
    tariff: Arc<TariffState>,
    registry: Arc<StationRegistry>,
    updates_tx: mpsc::UnboundedSender<LimitUpdate>,
    decision: Mutex<()>,
    logger: StructuredLogger,
}

impl ChargingManager {
    pub fn new(
        charging: ChargingConfig,
        regulator: Box<dyn Regulator>,
        grid: Arc<GridData>,
        tariff: Arc<TariffState>,
        registry: Arc<StationRegistry>,
        updates_tx: mpsc::UnboundedSender<LimitUpdate>,
    ) -> Self {
        Self {
            charging,
            regulator,
            grid,
            tariff,
            registry,
            updates_tx,
            decision: Mutex::new(()),
            logger: get_logger("manager"),
        }
    }

    /// Wake the decision path after the ingress accepted a grid sample
    pub fn on_grid_power_update(&self) {
        let _guard = self.decision.lock().expect("decision lock poisoned");
        self.logger
            .debug("Grid power updated, triggering regulation");
        self.update_charging_limits_locked(Utc::now());
    }

    /// Watchdog loop; ticks independently of input arrival
    pub async fn run_watchdog(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(std::time::Duration::from_secs(WATCHDOG_PERIOD_SECS));
        self.logger.info("Starting charging manager watchdog");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_data_freshness(Utc::now());
                }
                _ = shutdown_rx.changed() => {
                    self.logger.info("Stopping charging manager watchdog");
                    break;
                }
            }
        }
    }

    /// Stop everything if either cache has gone silent. `now` is injected
    /// so the freshness window is testable.
    pub fn check_data_freshness(&self, now: DateTime<Utc>) {
        let _guard = self.decision.lock().expect("decision lock poisoned");

        let (_, grid_ts) = self.grid.get();
        let (_, tariff_ts) = self.tariff.get();
        let stale = Duration::seconds(STALE_AFTER_SECS);

        if now - grid_ts > stale {
            self.logger
                .warn("No grid data received for 5 minutes, stopping charging for safety");
            self.stop_all_charging();
            self.regulator.reset();
            return;
        }

        if now - tariff_ts > stale {
            self.logger
                .warn("No tariff data received for 5 minutes, stopping charging for safety");
            self.stop_all_charging();
            self.regulator.reset();
        }
    }

    /// Decision path; caller holds the orchestration mutex
    fn update_charging_limits_locked(&self, now: DateTime<Utc>) {
        let (grid_power, grid_ts) = self.grid.get();
        let (is_off_peak, tariff_ts) = self.tariff.get();

        // Quick staleness gate; the watchdog handles the detailed logging
        let stale = Duration::seconds(STALE_AFTER_SECS);
        if now - grid_ts > stale || now - tariff_ts > stale {
            self.logger
                .warn("Grid or tariff data is too old, stopping charging");
            self.stop_all_charging();
            self.regulator.reset();
            return;
        }

        let current_charging = self.registry.total_charging_current();

        let input = RegulationInput {
            grid_power,
            current_charging,
            is_off_peak,
            max_current: self.charging.max_total_current,
            max_house_power: self.charging.max_house_power,
            target_power: self.charging.grid_target_power,
            timestamp: grid_ts,
        };

        let output = self.regulator.calculate(&input);

        self.logger.debug(&format!(
            "Regulation: {} - Current: {:.1}A, Delta: {:+.2}A, Reason: {}",
            self.regulator.name(),
            current_charging,
            output.delta_current,
            output.reason
        ));

        let connected = self.registry.connected_by_priority();
        if connected.is_empty() {
            self.logger.debug("No connected stations");
            return;
        }

        if output.delta_current != 0.0 {
            if !output.should_charge && current_charging > 0.0 {
                self.logger.debug("Regulation indicates charging should stop");
                self.stop_all_charging();
                return;
            }
            self.apply_current_delta(&connected, output.delta_current);
        } else {
            if output.target_current <= 0.0 {
                self.logger
                    .debug("No available current from regulator, stopping all charging");
                self.stop_all_charging();
                return;
            }
            self.distribute_current_by_priority(&connected, output.target_current);
        }
    }

    fn apply_current_delta(&self, stations: &[Arc<ChargingStation>], delta_current: f64) {
        if delta_current.abs() < MIN_DELTA {
            self.logger.debug("Delta too small, no adjustment needed");
            return;
        }

        self.logger.debug(&format!(
            "Applying delta {:.2}A to {} stations",
            delta_current,
            stations.len()
        ));

        if delta_current > 0.0 {
            self.distribute_positive_delta(stations, delta_current);
        } else {
            self.distribute_negative_delta(stations, -delta_current);
        }
    }

    /// Hand out extra current by priority; idle stations only start when
    /// both the remainder and their own bound allow the 6 A minimum
    fn distribute_positive_delta(&self, stations: &[Arc<ChargingStation>], delta_current: f64) {
        let mut remaining = delta_current;

        for station in stations {
            if remaining <= 0.0 {
                break;
            }

            let current_limit = station.current_limit();
            let max_increase = station.max_current - current_limit;

            if current_limit == 0.0 {
                if remaining >= MIN_CHARGING_CURRENT && max_increase >= MIN_CHARGING_CURRENT {
                    let allocation = remaining.min(max_increase);
                    self.set_station_current(station, allocation);
                    remaining -= allocation;
                    self.logger.info(&format!(
                        "Started charging station {} with {:.1}A",
                        station.id, allocation
                    ));
                }
            } else if max_increase > 0.0 {
                let allocation = remaining.min(max_increase);
                self.set_station_current(station, current_limit + allocation);
                remaining -= allocation;
                self.logger.info(&format!(
                    "Increased station {} to {:.1}A (+{:.1}A)",
                    station.id,
                    current_limit + allocation,
                    allocation
                ));
            }
        }

        if remaining > 0.0 {
            self.logger.debug(&format!(
                "Could not allocate {:.1}A (stations at max)",
                remaining
            ));
        }
    }

    /// Shed current proportionally to each station's share of the total;
    /// limits that would land below the minimum snap to zero
    fn distribute_negative_delta(&self, stations: &[Arc<ChargingStation>], reduction_current: f64) {
        let total_charging: f64 = stations
            .iter()
            .filter(|s| s.current_limit() > 0.0)
            .map(|s| s.current_limit())
            .sum();

        if total_charging == 0.0 {
            return;
        }

        for station in stations {
            let current_limit = station.current_limit();
            if current_limit > 0.0 {
                let reduction = reduction_current * (current_limit / total_charging);
                let mut new_limit = (current_limit - reduction).max(0.0);

                if new_limit < MIN_CHARGING_CURRENT && new_limit > 0.0 {
                    new_limit = 0.0;
                }

                self.set_station_current(station, new_limit);

                if new_limit == 0.0 {
                    self.logger
                        .info(&format!("Stopped charging station {}", station.id));
                } else {
                    self.logger.info(&format!(
                        "Reduced station {} to {:.1}A (-{:.1}A)",
                        station.id, new_limit, reduction
                    ));
                }
            }
        }
    }

    /// Greedy absolute-mode pass over stations in priority order
    fn distribute_current_by_priority(
        &self,
        stations: &[Arc<ChargingStation>],
        total_current: f64,
    ) {
        self.logger.debug(&format!(
            "Distributing {:.1}A among {} stations",
            total_current,
            stations.len()
        ));

        let mut remaining_current = total_current;

        for station in stations {
            if remaining_current <= 0.0 {
                self.set_station_current(station, 0.0);
                continue;
            }

            if remaining_current < MIN_CHARGING_CURRENT {
                self.set_station_current(station, 0.0);
                continue;
            }

            let allocated_current = remaining_current.min(station.max_current);

            if allocated_current >= MIN_CHARGING_CURRENT {
                self.set_station_current(station, allocated_current);
                remaining_current -= allocated_current;
                self.logger.info(&format!(
                    "Allocated {:.1}A to station {} (priority {})",
                    allocated_current, station.id, station.priority
                ));
            } else {
                self.set_station_current(station, 0.0);
            }
        }

        if remaining_current > 0.0 {
            self.logger.debug(&format!(
                "{:.1}A remaining after distribution",
                remaining_current
            ));
        }
    }

    /// Write a station limit and notify the session adapter. Writes inside
    /// the deadband are suppressed; a zero write always goes out.
    fn set_station_current(&self, station: &Arc<ChargingStation>, current: f64) {
        let current_limit = station.current_limit();

        let is_stop = current == 0.0;
        if (current - current_limit).abs() < WRITE_DEADBAND && !is_stop {
            return;
        }

        station.set_current_limit(current);

        let _ = self.updates_tx.send(LimitUpdate {
            station_id: station.id.clone(),
            limit: station.current_limit(),
        });
    }

    fn stop_all_charging(&self) {
        for station in self.registry.iter() {
            if station.current_limit() > 0.0 {
                self.set_station_current(station, 0.0);
            }
        }
    }

    /// Aggregate status for the reporting surface
    pub fn status(&self) -> serde_json::Value {
        let (grid_power, grid_ts) = self.grid.get();
        let (is_off_peak, tariff_ts) = self.tariff.get();

        let mut stations = serde_json::Map::new();
        let mut total_current = 0.0;

        for station in self.registry.iter() {
            if station.is_connected() {
                total_current += station.current_limit();
            }
            stations.insert(station.id.clone(), station.status());
        }

        serde_json::json!({
            "grid_power": grid_power,
            "grid_timestamp": grid_ts,
            "is_off_peak": is_off_peak,
            "hphc_timestamp": tariff_ts,
            "regulator": self.regulator.status(),
            "stations": stations,
            "total_current": total_current,
            "max_total_current": self.charging.max_total_current,
        })
    }
}
