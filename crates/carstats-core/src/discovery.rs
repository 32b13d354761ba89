//! Provider discovery and binding seams.
//!
//! Both are owned by the platform: discovery answers "which processes
//! advertise the telemetry capability", binding establishes the RPC channel
//! and reports connect/disconnect events through a [`ConnectionSink`]. The
//! aggregation core only calls into these traits.

use std::sync::Arc;

use crate::error::ProviderError;
use crate::provider::{CarStatsProvider, ProviderIdentity};

/// Capability query returning providers in priority order.
pub trait ProviderDiscovery: Send + Sync {
    fn discover(&self) -> Vec<ProviderIdentity>;
}

/// Receiver of binding events for one provider.
pub trait ConnectionSink: Send + Sync {
    fn on_connected(&self, handle: Arc<dyn CarStatsProvider>);
    fn on_disconnected(&self);
}

/// Platform binding layer.
///
/// `bind` starts a non-blocking connection attempt; the outcome arrives
/// later on `sink`, possibly from another thread. Reconnection after a
/// disconnect is the binder's business, reported through the same sink.
pub trait ProviderBinder: Send + Sync {
    fn bind(
        &self,
        identity: &ProviderIdentity,
        sink: Arc<dyn ConnectionSink>,
    ) -> Result<(), ProviderError>;

    /// Release the binding created for `sink`. No further events are
    /// expected on it afterwards.
    fn unbind(&self, identity: &ProviderIdentity, sink: &Arc<dyn ConnectionSink>);
}

/// Discovery over a fixed, pre-ordered list.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    providers: Vec<ProviderIdentity>,
}

impl StaticDiscovery {
    pub fn new(providers: Vec<ProviderIdentity>) -> Self {
        Self { providers }
    }
}

impl ProviderDiscovery for StaticDiscovery {
    fn discover(&self) -> Vec<ProviderIdentity> {
        self.providers.clone()
    }
}
