//! # carstats-core
//!
//! **One merged telemetry stream out of many vehicle data providers.**
//!
//! `carstats-core` discovers every process that publishes vehicle
//! measurements (speed, temperatures, boost pressure, ...), connects to each
//! of them, decides which provider is authoritative for every field, and
//! hands local consumers a single de-duplicated stream.
//!
//! ## Quick Start
//!
//! ```no_run
//! use carstats_core::{ClientConfig, SimulatedFleet};
//!
//! // Two simulated providers with overlapping fields
//! let fleet = SimulatedFleet::demo();
//! let client = fleet.client(ClientConfig::default());
//! client.start();
//!
//! // Pull the merged view
//! let values = client.get_merged_measurements();
//! for (key, value) in &values {
//!     println!("{key} = {value}");
//! }
//! client.stop();
//! ```
//!
//! ## Architecture
//!
//! Discovery → Connections → Schema merge → Filter → Listeners
//!
//! - Providers are ranked by discovery order. The first provider in that
//!   order to declare a field owns it; values for that field from anyone
//!   else are dropped.
//! - Pushed batches are filtered by ownership and fanned out to every
//!   [`CarStatsListener`].
//! - Pull requests query every connected provider in parallel, each call
//!   bounded by a timeout, and return the union of owned values.
//!
//! Every provider is reached through the [`CarStatsProvider`] trait. The
//! [`CarStatsClient`] owns the session and is the only type most callers
//! need.

pub mod client;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod listener;
pub mod monitor;
pub mod permissions;
pub mod poller;
pub mod provider;
pub mod rpc;
pub mod schema;
pub mod simulated;

pub use client::CarStatsClient;
pub use config::{BoostConfig, ClientConfig, Config, MonitorConfig, OilTempConfig};
pub use connection::{ConnectionState, ProviderStatus};
pub use discovery::{ConnectionSink, ProviderBinder, ProviderDiscovery, StaticDiscovery};
pub use error::{ConfigError, ErrorKind, ListenerError, ListenerResult, ProviderError};
pub use filter::filter_values;
pub use listener::{CarStatsListener, ListenerRegistry};
pub use monitor::{
    Alert, AlertKind, AlertSink, BoostPressureMonitor, LogAlertSink, OilTempMonitor,
};
pub use permissions::{PermissionProbe, ProbeOutcome, request_permissions};
pub use poller::{MeasurementPoller, PollMode};
pub use provider::{
    CarStatsProvider, FieldSchema, FieldSchemas, FieldType, Measurements, ProviderCallback,
    ProviderIdentity, Value,
};
pub use schema::SchemaSnapshot;
pub use simulated::{
    SimulatedBinder, SimulatedField, SimulatedFleet, SimulatedProvider, SimulatedProviderConfig,
    demo_providers,
};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
