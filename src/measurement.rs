//! Measurement cache for grid power and tariff state
//!
//! Two independent cells hold the last accepted sample per topic together
//! with its arrival timestamp. Reads and writes are atomic at the pair
//! level; there is no retention and no history.

use chrono::{DateTime, Utc};
use std::sync::RwLock;

/// Last known grid power sample (watts, signed; positive = import)
pub struct GridData {
    inner: RwLock<(f64, DateTime<Utc>)>,
}

impl GridData {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            inner: RwLock::new((0.0, now)),
        }
    }

    /// Store a new sample. The stored timestamp never moves backwards.
    pub fn update(&self, power: f64, now: DateTime<Utc>) {
        let mut guard = self.inner.write().expect("grid cell poisoned");
        guard.0 = power;
        guard.1 = guard.1.max(now);
    }

    pub fn get(&self) -> (f64, DateTime<Utc>) {
        *self.inner.read().expect("grid cell poisoned")
    }
}

/// Last known tariff state (true = off-peak / HC)
pub struct TariffState {
    inner: RwLock<(bool, DateTime<Utc>)>,
}

impl TariffState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            inner: RwLock::new((false, now)),
        }
    }

    /// Store a new state. The stored timestamp never moves backwards.
    pub fn update(&self, is_off_peak: bool, now: DateTime<Utc>) {
        let mut guard = self.inner.write().expect("tariff cell poisoned");
        guard.0 = is_off_peak;
        guard.1 = guard.1.max(now);
    }

    pub fn get(&self) -> (bool, DateTime<Utc>) {
        *self.inner.read().expect("tariff cell poisoned")
    }
}
