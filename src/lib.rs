//! # Helion - Solar-aware EV Charging Regulation
//!
//! Helion regulates the charging current of one or more EV charging
//! stations so that a household's net grid exchange tracks a configurable
//! set-point, typically zero watts for pure self-consumption of on-site
//! solar production.
//!
//! ## Features
//!
//! - **Event-driven regulation**: every accepted grid-power sample wakes
//!   the decision path; a watchdog ticker only enforces data freshness
//! - **Pluggable regulators**: PID, delta-PID, OpenEVSE-style hysteresis
//!   and simple on/off variants behind one trait
//! - **Priority distribution**: the current budget is split across
//!   stations by configured priority with a 6 A minimum per session
//! - **Station sessions**: long-lived WebSocket channels with correlation
//!   tokens for acknowledgements and limit pushes
//! - **Fail-safe**: five minutes of input silence stops all charging
//! - **Configuration**: YAML-based with environment overrides for bus
//!   credentials
//!
//! ## Architecture
//!
//! The application follows a modular architecture with clear separation of
//! concerns:
//!
//! - `config`: configuration management and validation
//! - `logging`: structured logging and tracing
//! - `measurement`: last-known grid power and tariff state
//! - `station`: per-station state and the registry
//! - `regulation`: the regulator variants and their factory
//! - `manager`: orchestration, distribution and the freshness watchdog
//! - `mqtt`: message-bus ingress and payload parsing
//! - `session`: station WebSocket sessions and the status API

pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod measurement;
pub mod mqtt;
pub mod regulation;
pub mod session;
pub mod station;

// Re-export commonly used types
pub use config::Config;
pub use error::{HelionError, Result};
pub use manager::ChargingManager;
