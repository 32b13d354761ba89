//! Local consumers and fan-out.
//!
//! Dispatch copies the listener list first and invokes listeners with no
//! lock held, so a listener may register or unregister listeners (itself
//! included) from inside a callback. Each invocation is isolated: an error
//! or panic is logged and delivery continues with the next listener.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use log::error;

use crate::error::{ErrorKind, ListenerResult};
use crate::provider::{Measurements, ProviderIdentity};

/// A local consumer of the merged measurement stream.
pub trait CarStatsListener: Send + Sync {
    /// Name used in log lines about this listener.
    fn name(&self) -> &str {
        "listener"
    }

    /// Filtered values from `provider` (or [`ProviderIdentity::merged`] for
    /// pull-derived events) measured at `timestamp`.
    fn on_new_measurements(
        &self,
        provider: &ProviderIdentity,
        timestamp: SystemTime,
        values: &Measurements,
    ) -> ListenerResult;

    fn on_schema_changed(&self) -> ListenerResult;
}

/// Ordered listener list. Duplicates are kept: registering the same
/// listener twice delivers every event to it twice.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<Vec<Arc<dyn CarStatsListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn CarStatsListener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, listener: Arc<dyn CarStatsListener>) {
        self.lock().push(listener);
    }

    /// Remove the first registration of `listener`. Returns whether one was
    /// found.
    pub fn unregister(&self, listener: &Arc<dyn CarStatsListener>) -> bool {
        let mut listeners = self.lock();
        match listeners.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current list, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<dyn CarStatsListener>> {
        self.lock().clone()
    }

    /// Deliver a measurement event to every listener. Returns how many
    /// listeners handled it without error.
    pub fn dispatch_measurements(
        &self,
        provider: &ProviderIdentity,
        timestamp: SystemTime,
        values: &Measurements,
    ) -> usize {
        let mut delivered = 0;
        for listener in self.snapshot() {
            if invoke(listener.as_ref(), "measurements", || {
                listener.on_new_measurements(provider, timestamp, values)
            })
            .is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver a schema-changed notification to every listener.
    pub fn dispatch_schema_changed(&self) -> usize {
        let mut delivered = 0;
        for listener in self.snapshot() {
            if invoke(listener.as_ref(), "schema change", || listener.on_schema_changed()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

fn invoke<F>(listener: &dyn CarStatsListener, event: &str, call: F) -> Result<(), ErrorKind>
where
    F: FnOnce() -> ListenerResult,
{
    let kind = ErrorKind::Listener;
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("listener {}: error handling {event} ({kind}): {e}", listener.name());
            Err(kind)
        }
        Err(_) => {
            error!("listener {} panicked handling {event} ({kind})", listener.name());
            Err(kind)
        }
    }
}
