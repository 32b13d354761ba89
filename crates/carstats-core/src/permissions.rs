//! One-shot permission probe.
//!
//! Binds to every discovered provider independently of any client session,
//! asks whether it needs runtime permissions, requests them if so, and
//! unbinds again. Schema and ownership are never touched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::discovery::{ConnectionSink, ProviderBinder, ProviderDiscovery};
use crate::error::ProviderError;
use crate::provider::{CarStatsProvider, ProviderIdentity};
use crate::rpc;

/// Result of probing one provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    NotNeeded,
    Requested,
    Failed(ProviderError),
}

#[derive(Default)]
struct ProbeState {
    outcomes: Mutex<Vec<(ProviderIdentity, ProbeOutcome)>>,
    done: Condvar,
}

impl ProbeState {
    fn record(&self, identity: ProviderIdentity, outcome: ProbeOutcome) {
        let mut outcomes = self.outcomes.lock().unwrap_or_else(PoisonError::into_inner);
        outcomes.push((identity, outcome));
        self.done.notify_all();
    }
}

/// Handle to a running probe.
pub struct PermissionProbe {
    expected: usize,
    state: Arc<ProbeState>,
}

impl PermissionProbe {
    /// Number of providers the probe was started for.
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Block until every provider was probed or `timeout` elapsed. Returns
    /// how many providers were probed.
    pub fn wait(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut outcomes = self
            .state
            .outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while outcomes.len() < self.expected {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            outcomes = self
                .state
                .done
                .wait_timeout(outcomes, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        outcomes.len()
    }

    /// Outcomes recorded so far, in completion order.
    pub fn outcomes(&self) -> Vec<(ProviderIdentity, ProbeOutcome)> {
        self.state
            .outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

struct PermissionSink {
    me: Weak<PermissionSink>,
    identity: ProviderIdentity,
    /// Binder and sink keep each other alive until `release` unbinds.
    binder: Arc<dyn ProviderBinder>,
    timeout: Duration,
    probed: AtomicBool,
    state: Arc<ProbeState>,
}

impl PermissionSink {
    fn probe(&self, handle: Arc<dyn CarStatsProvider>) -> Result<bool, ProviderError> {
        let remote = Arc::clone(&handle);
        let needed = rpc::call_with_timeout(&self.identity, self.timeout, move || {
            remote.needs_permissions()
        })?;
        if needed {
            rpc::call_with_timeout(&self.identity, self.timeout, move || {
                handle.request_permissions()
            })?;
        }
        Ok(needed)
    }

    fn release(&self) {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        let sink: Arc<dyn ConnectionSink> = me;
        self.binder.unbind(&self.identity, &sink);
    }
}

impl ConnectionSink for PermissionSink {
    fn on_connected(&self, handle: Arc<dyn CarStatsProvider>) {
        if self.probed.swap(true, Ordering::SeqCst) {
            return;
        }
        let outcome = match self.probe(handle) {
            Ok(true) => {
                info!("{}: permissions requested", self.identity);
                ProbeOutcome::Requested
            }
            Ok(false) => {
                debug!("{}: no permissions needed", self.identity);
                ProbeOutcome::NotNeeded
            }
            Err(e) => {
                warn!("{}: error probing permissions ({}): {e}", self.identity, e.kind());
                ProbeOutcome::Failed(e)
            }
        };
        self.release();
        self.state.record(self.identity.clone(), outcome);
    }

    fn on_disconnected(&self) {
        debug!("{}: disconnected during permission probe", self.identity);
    }
}

/// Probe every discovered provider for permissions. Returns immediately;
/// use [`PermissionProbe::wait`] to block for the results.
pub fn request_permissions(
    discovery: &dyn ProviderDiscovery,
    binder: Arc<dyn ProviderBinder>,
    timeout: Duration,
) -> PermissionProbe {
    let identities = discovery.discover();
    let state = Arc::new(ProbeState::default());

    for identity in &identities {
        let sink = Arc::new_cyclic(|me| PermissionSink {
            me: me.clone(),
            identity: identity.clone(),
            binder: Arc::clone(&binder),
            timeout,
            probed: AtomicBool::new(false),
            state: Arc::clone(&state),
        });
        if let Err(e) = binder.bind(identity, sink) {
            warn!("{identity}: error binding for permission probe ({}): {e}", e.kind());
            state.record(identity.clone(), ProbeOutcome::Failed(e));
        }
    }

    PermissionProbe {
        expected: identities.len(),
        state,
    }
}
