//! Boost pressure monitor.
//!
//! The latest pressure comes either from a `boostPressure` value in a batch
//! or from [`BoostPressureMonitor::update_boost_pressure`]; every batch
//! re-evaluates it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use log::debug;
use serde::Serialize;

use super::{Alert, AlertKind, AlertSink};
use crate::config::BoostConfig;
use crate::error::ListenerResult;
use crate::listener::CarStatsListener;
use crate::provider::{Measurements, ProviderIdentity};

pub const BOOST_PRESSURE_KEY: &str = "boostPressure";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoostState {
    Unknown,
    Nominal,
    Exceeded,
}

struct Inner {
    config: BoostConfig,
    state: BoostState,
    pressure: Option<f64>,
}

pub struct BoostPressureMonitor {
    inner: Mutex<Inner>,
    sink: Arc<dyn AlertSink>,
}

impl BoostPressureMonitor {
    pub fn new(config: BoostConfig, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                config,
                state: BoostState::Unknown,
                pressure: None,
            }),
            sink,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> BoostState {
        self.lock().state
    }

    /// Record a pressure reading from outside the measurement stream. It is
    /// evaluated with the next batch.
    pub fn update_boost_pressure(&self, pressure: f64) {
        self.lock().pressure = Some(pressure);
    }

    pub fn set_config(&self, config: BoostConfig) {
        let disabled = {
            let mut inner = self.lock();
            let disabled = !config.enabled;
            inner.config = config;
            if disabled {
                inner.state = BoostState::Unknown;
            }
            disabled
        };
        if disabled {
            self.sink.dismiss(AlertKind::BoostPressureExceeded);
        }
    }

    pub fn close(&self) {
        self.sink.dismiss(AlertKind::BoostPressureExceeded);
    }

    fn evaluate(&self, sample: Option<f64>) -> Option<Alert> {
        let mut inner = self.lock();
        if !inner.config.enabled {
            return None;
        }
        if sample.is_some() {
            inner.pressure = sample;
        }
        let pressure = inner.pressure?;
        let max = inner.config.max_pressure;

        let (next, alert) = match inner.state {
            BoostState::Unknown => (BoostState::Nominal, None),
            BoostState::Nominal if pressure > max => (
                BoostState::Exceeded,
                Some(Alert::new(
                    AlertKind::BoostPressureExceeded,
                    "Boost pressure",
                    format!("Boost pressure exceeded: {pressure:.1} psi"),
                )),
            ),
            BoostState::Exceeded if pressure < max - inner.config.hysteresis => {
                (BoostState::Nominal, None)
            }
            state => (state, None),
        };

        if next != inner.state {
            debug!("boost pressure monitor: {:?} -> {next:?}", inner.state);
            inner.state = next;
        }
        alert
    }
}

impl CarStatsListener for BoostPressureMonitor {
    fn name(&self) -> &str {
        "boost-pressure-monitor"
    }

    fn on_new_measurements(
        &self,
        _provider: &ProviderIdentity,
        _timestamp: SystemTime,
        values: &Measurements,
    ) -> ListenerResult {
        let sample = values.get(BOOST_PRESSURE_KEY).and_then(|v| v.as_f64());
        if let Some(alert) = self.evaluate(sample) {
            self.sink.raise(alert);
        }
        Ok(())
    }

    fn on_schema_changed(&self) -> ListenerResult {
        Ok(())
    }
}
