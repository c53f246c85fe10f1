//! Charging station model and registry
//!
//! Stations are created once at startup from static configuration. The
//! manager writes current limits, the session adapter toggles connection
//! and charging flags; every mutation goes through the per-station
//! reader-writer lock.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Minimum viable charging current for an EVSE (A)
pub const MIN_CHARGING_CURRENT: f64 = 6.0;

#[derive(Debug, Clone, Default)]
struct StationState {
    connected: bool,
    charging: bool,
    current_limit: f64,
    last_seen: Option<DateTime<Utc>>,
}

/// A single charging station
pub struct ChargingStation {
    /// Station identifier as used in the session path
    pub id: String,

    /// Hard per-station current bound (A), immutable
    pub max_current: f64,

    /// Allocation priority, lower = served first
    pub priority: i32,

    state: RwLock<StationState>,
}

impl ChargingStation {
    pub fn new(id: &str, priority: i32, max_current: f64) -> Self {
        Self {
            id: id.to_string(),
            max_current,
            priority,
            state: RwLock::new(StationState::default()),
        }
    }

    pub fn set_connected(&self, connected: bool, now: DateTime<Utc>) {
        let mut state = self.state.write().expect("station lock poisoned");
        state.connected = connected;
        if connected {
            state.last_seen = Some(now);
        }
    }

    pub fn set_charging(&self, charging: bool) {
        let mut state = self.state.write().expect("station lock poisoned");
        state.charging = charging;
    }

    /// Set the current limit, clamping to `[0, max_current]`.
    pub fn set_current_limit(&self, limit: f64) {
        let mut state = self.state.write().expect("station lock poisoned");
        state.current_limit = limit.clamp(0.0, self.max_current);
    }

    pub fn current_limit(&self) -> f64 {
        self.state.read().expect("station lock poisoned").current_limit
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().expect("station lock poisoned").connected
    }

    pub fn is_charging(&self) -> bool {
        self.state.read().expect("station lock poisoned").charging
    }

    /// Connected and charging at the same time
    pub fn is_active(&self) -> bool {
        let state = self.state.read().expect("station lock poisoned");
        state.connected && state.charging
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.state.read().expect("station lock poisoned").last_seen
    }

    /// Status snapshot for the reporting surface
    pub fn status(&self) -> serde_json::Value {
        let state = self.state.read().expect("station lock poisoned");
        serde_json::json!({
            "connected": state.connected,
            "charging": state.charging,
            "current_limit": state.current_limit,
            "max_current": self.max_current,
            "priority": self.priority,
        })
    }
}

/// Registry of all configured stations
pub struct StationRegistry {
    stations: HashMap<String, Arc<ChargingStation>>,
}

impl StationRegistry {
    pub fn new(stations: Vec<ChargingStation>) -> Self {
        let stations = stations
            .into_iter()
            .map(|s| (s.id.clone(), Arc::new(s)))
            .collect();
        Self { stations }
    }

    pub fn get(&self, id: &str) -> Option<Arc<ChargingStation>> {
        self.stations.get(id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ChargingStation>> {
        self.stations.values()
    }

    /// Connected stations sorted by ascending priority
    pub fn connected_by_priority(&self) -> Vec<Arc<ChargingStation>> {
        let mut connected: Vec<_> = self
            .stations
            .values()
            .filter(|s| s.is_connected())
            .cloned()
            .collect();
        connected.sort_by_key(|s| s.priority);
        connected
    }

    /// Total current limit across stations that are connected and charging
    pub fn total_charging_current(&self) -> f64 {
        self.stations
            .values()
            .filter(|s| s.is_active())
            .map(|s| s.current_limit())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_limit_clamps_to_max() {
        let station = ChargingStation::new("station1", 1, 32.0);
        station.set_current_limit(50.0);
        assert_eq!(station.current_limit(), 32.0);

        station.set_current_limit(-3.0);
        assert_eq!(station.current_limit(), 0.0);
    }

    #[test]
    fn test_connected_by_priority_sorts_ascending() {
        let registry = StationRegistry::new(vec![
            ChargingStation::new("station2", 2, 32.0),
            ChargingStation::new("station1", 1, 32.0),
        ]);
        let now = Utc::now();
        registry.get("station1").unwrap().set_connected(true, now);
        registry.get("station2").unwrap().set_connected(true, now);

        let connected = registry.connected_by_priority();
        assert_eq!(connected.len(), 2);
        assert_eq!(connected[0].id, "station1");
        assert_eq!(connected[1].id, "station2");
    }

    #[test]
    fn test_total_charging_counts_active_only() {
        let registry = StationRegistry::new(vec![
            ChargingStation::new("station1", 1, 32.0),
            ChargingStation::new("station2", 2, 32.0),
        ]);
        let now = Utc::now();
        let s1 = registry.get("station1").unwrap();
        s1.set_connected(true, now);
        s1.set_charging(true);
        s1.set_current_limit(10.0);

        // station2 has a limit but is not connected
        let s2 = registry.get("station2").unwrap();
        s2.set_current_limit(8.0);

        assert_eq!(registry.total_charging_current(), 10.0);
    }
}
