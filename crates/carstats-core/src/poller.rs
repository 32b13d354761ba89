//! Periodic pull of the merged measurements.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, warn};

use crate::client::CarStatsClient;
use crate::provider::Measurements;

/// What the poller does with each pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollMode {
    /// Only refresh the cached map.
    #[default]
    Cache,
    /// Also deliver the merged event to every listener.
    Dispatch,
}

#[derive(Default)]
struct Shared {
    stop: AtomicBool,
    polls: AtomicU64,
    last: Mutex<Measurements>,
}

/// Sleep for `total`, waking early once `stop` is set.
pub(crate) fn sleep_unless_stopped(stop: &AtomicBool, total: Duration) {
    const SLICE: Duration = Duration::from_millis(10);
    let mut remaining = total;
    while !remaining.is_zero() && !stop.load(Ordering::Relaxed) {
        let nap = remaining.min(SLICE);
        std::thread::sleep(nap);
        remaining = remaining.saturating_sub(nap);
    }
}

/// Background thread running the pull path every interval.
pub struct MeasurementPoller {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl MeasurementPoller {
    pub fn start(client: Arc<CarStatsClient>, interval: Duration, mode: PollMode) -> Self {
        let shared = Arc::new(Shared::default());
        let worker = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("carstats-poller".into())
            .spawn(move || {
                debug!("poller started, every {interval:?} ({mode:?})");
                while !worker.stop.load(Ordering::Relaxed) {
                    let values = match mode {
                        PollMode::Cache => client.get_merged_measurements(),
                        PollMode::Dispatch => client.force_update_measurements(),
                    };
                    *worker.last.lock().unwrap_or_else(PoisonError::into_inner) = values;
                    worker.polls.fetch_add(1, Ordering::Relaxed);
                    sleep_unless_stopped(&worker.stop, interval);
                }
                debug!("poller stopped");
            });
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("cannot spawn measurement poller: {e}");
                None
            }
        };
        Self { shared, handle }
    }

    /// Copy of the most recent merged map.
    pub fn last_measurements(&self) -> Measurements {
        self.shared
            .last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Completed polls so far.
    pub fn poll_count(&self) -> u64 {
        self.shared.polls.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MeasurementPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
