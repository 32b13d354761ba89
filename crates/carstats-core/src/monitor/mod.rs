//! Threshold monitors built on the listener interface.
//!
//! Monitors only decide *when* to alert. Showing, sounding and timing out an
//! alert is up to the [`AlertSink`] they were built with.

pub mod boost;
pub mod oil_temp;

pub use boost::{BOOST_PRESSURE_KEY, BoostPressureMonitor, BoostState};
pub use oil_temp::{COOLANT_TEMP_KEY, OIL_TEMP_KEY, OilTempMonitor, OilTempState};

use std::time::Duration;

use log::{debug, info};
use serde::Serialize;

/// How long a presenter should keep an alert up before dismissing it.
pub const ALERT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    OilTemperatureReached,
    OilTemperatureHigh,
    BoostPressureExceeded,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OilTemperatureReached => write!(f, "oil temperature reached"),
            Self::OilTemperatureHigh => write!(f, "oil temperature high"),
            Self::BoostPressureExceeded => write!(f, "boost pressure exceeded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub title: String,
    pub text: String,
    /// Auto-dismiss hint for the presenter.
    pub timeout: Duration,
}

impl Alert {
    pub fn new(kind: AlertKind, title: &str, text: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.to_string(),
            text: text.into(),
            timeout: ALERT_TIMEOUT,
        }
    }
}

/// Presentation side of the monitors.
pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: Alert);
    fn dismiss(&self, kind: AlertKind);
}

/// Sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn raise(&self, alert: Alert) {
        info!("{}: {}", alert.title, alert.text);
    }

    fn dismiss(&self, kind: AlertKind) {
        debug!("dismissing {kind} alert");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Raise(AlertKind, String),
        Dismiss(AlertKind),
    }

    /// Records every sink call.
    #[derive(Default)]
    pub struct RecordingSink {
        pub calls: Mutex<Vec<Call>>,
    }

    impl RecordingSink {
        pub fn take(&self) -> Vec<Call> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }

        pub fn raised(&self) -> Vec<AlertKind> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter_map(|c| match c {
                    Call::Raise(kind, _) => Some(*kind),
                    Call::Dismiss(_) => None,
                })
                .collect()
        }
    }

    impl AlertSink for RecordingSink {
        fn raise(&self, alert: Alert) {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Raise(alert.kind, alert.text));
        }

        fn dismiss(&self, kind: AlertKind) {
            self.calls.lock().unwrap().push(Call::Dismiss(kind));
        }
    }
}
