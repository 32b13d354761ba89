//! Oil temperature monitor.
//!
//! Tells the driver once the engine has reached operating temperature, and
//! warns when oil or coolant runs too hot. The coolant reading is optional;
//! when absent it never blocks a transition.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use log::debug;
use serde::Serialize;

use super::{Alert, AlertKind, AlertSink};
use crate::config::OilTempConfig;
use crate::error::ListenerResult;
use crate::listener::CarStatsListener;
use crate::provider::{Measurements, ProviderIdentity};

pub const OIL_TEMP_KEY: &str = "oilTemperature";
pub const COOLANT_TEMP_KEY: &str = "torqueCoolantTemp";

const TITLE: &str = "Oil temperature";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OilTempState {
    Unknown,
    TempNotReached,
    TempReached,
    HighTemp,
}

struct Inner {
    config: OilTempConfig,
    state: OilTempState,
}

#[derive(Clone, Copy)]
struct Reading {
    oil: Option<f64>,
    coolant: Option<f64>,
}

impl Reading {
    fn present(&self) -> impl Iterator<Item = f64> {
        self.oil.into_iter().chain(self.coolant)
    }

    fn reached(&self, low: f64) -> bool {
        self.present().all(|t| t > low)
    }

    fn below(&self, limit: f64) -> bool {
        self.present().any(|t| t < limit)
    }

    fn above(&self, limit: f64) -> bool {
        self.present().any(|t| t > limit)
    }

    fn all_below(&self, limit: f64) -> bool {
        self.present().all(|t| t < limit)
    }
}

pub struct OilTempMonitor {
    inner: Mutex<Inner>,
    sink: Arc<dyn AlertSink>,
}

impl OilTempMonitor {
    pub fn new(config: OilTempConfig, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                config,
                state: OilTempState::Unknown,
            }),
            sink,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> OilTempState {
        self.lock().state
    }

    /// Apply new settings. Disabling resets the state and dismisses any
    /// alert still showing.
    pub fn set_config(&self, config: OilTempConfig) {
        let disabled = {
            let mut inner = self.lock();
            let disabled = !config.enabled;
            inner.config = config;
            if disabled {
                inner.state = OilTempState::Unknown;
            }
            disabled
        };
        if disabled {
            self.dismiss_all();
        }
    }

    pub fn close(&self) {
        self.dismiss_all();
    }

    fn dismiss_all(&self) {
        self.sink.dismiss(AlertKind::OilTemperatureReached);
        self.sink.dismiss(AlertKind::OilTemperatureHigh);
    }

    /// Feed one reading. Returns the alert raised, if any.
    fn update(&self, reading: Reading) -> Option<Alert> {
        let mut inner = self.lock();
        if !inner.config.enabled {
            return None;
        }
        let low = inner.config.low_threshold;
        let high = inner.config.high_threshold;
        let hysteresis = inner.config.hysteresis;

        let (next, alert) = match inner.state {
            OilTempState::Unknown if reading.reached(low) => (OilTempState::TempReached, None),
            OilTempState::Unknown => (OilTempState::TempNotReached, None),
            state if state != OilTempState::HighTemp && reading.above(high) => (
                OilTempState::HighTemp,
                Some(Alert::new(
                    AlertKind::OilTemperatureHigh,
                    TITLE,
                    "Engine temperature is too high",
                )),
            ),
            OilTempState::TempNotReached if reading.reached(low) => (
                OilTempState::TempReached,
                Some(Alert::new(
                    AlertKind::OilTemperatureReached,
                    TITLE,
                    "Engine reached operating temperature",
                )),
            ),
            OilTempState::TempReached if reading.below(low - hysteresis) => {
                (OilTempState::TempNotReached, None)
            }
            OilTempState::HighTemp if reading.all_below(high - hysteresis) => {
                (OilTempState::TempReached, None)
            }
            state => (state, None),
        };

        if next != inner.state {
            debug!("oil temperature monitor: {:?} -> {next:?}", inner.state);
            inner.state = next;
        }
        alert
    }
}

impl CarStatsListener for OilTempMonitor {
    fn name(&self) -> &str {
        "oil-temp-monitor"
    }

    fn on_new_measurements(
        &self,
        _provider: &ProviderIdentity,
        _timestamp: SystemTime,
        values: &Measurements,
    ) -> ListenerResult {
        let Some(oil) = values.get(OIL_TEMP_KEY).and_then(|v| v.as_f64()) else {
            return Ok(());
        };
        let reading = Reading {
            oil: Some(oil),
            coolant: values.get(COOLANT_TEMP_KEY).and_then(|v| v.as_f64()),
        };
        if let Some(alert) = self.update(reading) {
            self.sink.raise(alert);
        }
        Ok(())
    }

    fn on_schema_changed(&self) -> ListenerResult {
        Ok(())
    }
}
