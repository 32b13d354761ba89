//! Aggregation client: the only entry point external callers use.
//!
//! Architecture:
//! 1. Discover providers; their order is the session's fixed priority
//! 2. Bind each one through the platform binder (non-blocking)
//! 3. On connect, register a remote listener and recompute the schema
//! 4. Filter pushed batches by ownership and fan them out to listeners
//! 5. Serve pull requests by querying every connected provider in parallel
//!    under a per-provider timeout
//! 6. Tear everything down in one step on stop
//!
//! Every state change (connect, disconnect, recompute, start, stop) happens
//! under one session lock. The schema snapshot is swapped atomically and
//! read without that lock, and listeners are always invoked after the lock
//! has been released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::connection::{ConnectionState, ConnectionTable, ProviderStatus, RegisteredCallback};
use crate::discovery::{ConnectionSink, ProviderBinder, ProviderDiscovery};
use crate::filter::filter_values;
use crate::listener::{CarStatsListener, ListenerRegistry};
use crate::provider::{CarStatsProvider, Measurements, ProviderCallback, ProviderIdentity};
use crate::rpc;
use crate::schema::SchemaSnapshot;

#[derive(Default)]
struct Session {
    started: bool,
    table: ConnectionTable,
}

/// Thread-safe aggregation client over a dynamic set of providers.
pub struct CarStatsClient {
    me: Weak<CarStatsClient>,
    discovery: Arc<dyn ProviderDiscovery>,
    binder: Arc<dyn ProviderBinder>,
    config: ClientConfig,
    session: Mutex<Session>,
    snapshot: RwLock<Arc<SchemaSnapshot>>,
    listeners: ListenerRegistry,
    /// Bumped on every stop; callbacks created for an older session are
    /// ignored.
    generation: AtomicU64,
}

impl CarStatsClient {
    pub fn new(
        discovery: Arc<dyn ProviderDiscovery>,
        binder: Arc<dyn ProviderBinder>,
        config: ClientConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            discovery,
            binder,
            config,
            session: Mutex::new(Session::default()),
            snapshot: RwLock::new(Arc::new(SchemaSnapshot::empty())),
            listeners: ListenerRegistry::new(),
            generation: AtomicU64::new(0),
        })
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn replace_snapshot(&self, snapshot: SchemaSnapshot) {
        let mut current = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        *current = Arc::new(snapshot);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn rpc_timeout(&self) -> Duration {
        self.config.rpc_timeout()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Discover providers and start binding to each of them, in priority
    /// order. Connections complete asynchronously.
    pub fn start(&self) {
        let identities = self.discovery.discover();

        let (generation, to_bind) = {
            let mut session = self.lock_session();
            if session.started {
                warn!("start called on a running session, ignoring");
                return;
            }
            session.started = true;
            let generation = self.generation.load(Ordering::SeqCst);

            let mut to_bind = Vec::with_capacity(identities.len());
            for identity in identities {
                let sink: Arc<dyn ConnectionSink> = Arc::new(ServiceConnection {
                    client: self.me.clone(),
                    identity: identity.clone(),
                    generation,
                });
                if session.table.insert(identity.clone(), Arc::clone(&sink)) {
                    to_bind.push((identity, sink));
                } else {
                    warn!("{identity}: discovered twice, keeping first priority slot");
                }
            }
            (generation, to_bind)
        };

        info!("starting session with {} provider(s)", to_bind.len());

        // The binder may report a connection synchronously from bind(), so
        // no lock may be held here.
        for (identity, sink) in to_bind {
            debug!("binding to {identity}");
            if let Err(e) = self.binder.bind(&identity, Arc::clone(&sink)) {
                warn!("{identity}: error binding ({}): {e}", e.kind());
                continue;
            }
            if !self.is_current(generation) {
                self.binder.unbind(&identity, &sink);
            }
        }
    }

    /// Unregister from every connected provider, release every binding and
    /// clear all session state.
    pub fn stop(&self) {
        let mut drained = {
            let mut session = self.lock_session();
            if !session.started {
                debug!("stop called on an idle session");
                return;
            }
            session.started = false;
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.replace_snapshot(SchemaSnapshot::empty());
            session.table.drain()
        };

        let unregister: Vec<_> = drained
            .iter_mut()
            .filter_map(|conn| {
                let (handle, registered) = conn.close()?;
                let RegisteredCallback { token, callback } = registered;
                Some((conn.identity.clone(), move || {
                    handle.unregister_listener(&callback).map(|()| token)
                }))
            })
            .collect();
        for (identity, result) in rpc::fan_out(unregister, self.rpc_timeout()) {
            match result {
                Ok(token) => debug!("{identity}: remote listener {token} unregistered"),
                Err(e) => warn!("{identity}: error unregistering listener ({}): {e}", e.kind()),
            }
        }

        for conn in &drained {
            self.binder.unbind(&conn.identity, conn.sink());
        }
        info!("session stopped, released {} provider(s)", drained.len());
    }

    pub fn is_started(&self) -> bool {
        self.lock_session().started
    }

    // -----------------------------------------------------------------------
    // Local listeners
    // -----------------------------------------------------------------------

    pub fn register_listener(&self, listener: Arc<dyn CarStatsListener>) {
        debug!("registering listener {}", listener.name());
        self.listeners.register(listener);
    }

    pub fn unregister_listener(&self, listener: &Arc<dyn CarStatsListener>) {
        if !self.listeners.unregister(listener) {
            debug!("listener {} was not registered", listener.name());
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Current merged schema and ownership.
    pub fn get_schema(&self) -> Arc<SchemaSnapshot> {
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&snapshot)
    }

    /// Ask every connected provider for its values, keep only what each one
    /// owns, and return the union. Providers that fail or time out
    /// contribute nothing.
    pub fn get_merged_measurements(&self) -> Measurements {
        let connected = self.lock_session().table.connected();
        let calls: Vec<_> = connected
            .into_iter()
            .map(|(identity, handle)| (identity, move || handle.get_merged_measurements()))
            .collect();
        let results = rpc::fan_out(calls, self.rpc_timeout());

        let snapshot = self.get_schema();
        let mut merged = Measurements::new();
        for (identity, result) in results {
            match result {
                Ok(values) => merged.extend(filter_values(&identity, values, &snapshot)),
                Err(e) => warn!("{identity}: error getting measurements ({}): {e}", e.kind()),
            }
        }
        merged
    }

    /// Run the pull path and deliver its result to every listener under
    /// [`ProviderIdentity::merged`].
    pub fn force_update_measurements(&self) -> Measurements {
        let timestamp = SystemTime::now();
        let merged = self.get_merged_measurements();
        self.listeners
            .dispatch_measurements(&ProviderIdentity::merged(), timestamp, &merged);
        merged
    }

    /// Per-provider health, in priority order.
    pub fn provider_statuses(&self) -> Vec<ProviderStatus> {
        let snapshot = self.get_schema();
        let session = self.lock_session();
        session
            .table
            .iter()
            .map(|conn| ProviderStatus {
                identity: conn.identity.clone(),
                state: conn.state,
                owned_fields: snapshot.owned_by(&conn.identity).len(),
                connects: conn.connects,
                disconnects: conn.disconnects,
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    /// Refetch every connected provider's schema and replace the snapshot.
    /// Always notifies listeners, even when nothing changed.
    pub fn recompute(&self) {
        let session = self.lock_session();
        let calls: Vec<_> = session
            .table
            .connected()
            .into_iter()
            .map(|(identity, handle)| (identity, move || handle.get_schema()))
            .collect();

        let mut reports = Vec::with_capacity(calls.len());
        for (identity, result) in rpc::fan_out(calls, self.rpc_timeout()) {
            match result {
                Ok(schema) => reports.push((identity, schema)),
                Err(e) => warn!("{identity}: error getting schema ({}): {e}", e.kind()),
            }
        }

        let snapshot = SchemaSnapshot::merge(reports.iter().map(|(id, schema)| (id, schema)));
        debug!(
            "schema recomputed: {} field(s) from {} provider(s)",
            snapshot.len(),
            reports.len()
        );
        self.replace_snapshot(snapshot);
        drop(session);

        self.listeners.dispatch_schema_changed();
    }

    // -----------------------------------------------------------------------
    // Binding and push events
    // -----------------------------------------------------------------------

    fn handle_connected(
        &self,
        identity: &ProviderIdentity,
        generation: u64,
        handle: Arc<dyn CarStatsProvider>,
    ) {
        let callback: Arc<dyn ProviderCallback> = Arc::new(RemoteListener {
            client: self.me.clone(),
            identity: identity.clone(),
            generation,
        });

        let registered = RegisteredCallback::new(Arc::clone(&callback));
        let token = registered.token;
        {
            let mut session = self.lock_session();
            if !self.is_current(generation) || !session.table.contains(identity) {
                debug!("{identity}: connected after session ended, ignoring");
                return;
            }
            if let Some(previous) = session.table.mark_connected(identity, Arc::clone(&handle)) {
                info!("connected to {identity} (was {previous})");
            }
            session.table.set_callback(identity, registered);
        }

        let registering = Arc::clone(&callback);
        let remote = Arc::clone(&handle);
        match rpc::call_with_timeout(identity, self.rpc_timeout(), move || {
            remote.register_listener(registering)
        }) {
            Ok(()) => debug!("{identity}: remote listener {token} registered"),
            Err(e) => warn!("{identity}: error registering listener ({}): {e}", e.kind()),
        }

        if !self.is_current(generation) {
            // Stopped while registering; undo best-effort.
            let _ = rpc::call_with_timeout(identity, self.rpc_timeout(), move || {
                handle.unregister_listener(&callback)
            });
            return;
        }

        self.recompute();
    }

    fn handle_disconnected(&self, identity: &ProviderIdentity, generation: u64) {
        let mut session = self.lock_session();
        if !self.is_current(generation) {
            return;
        }
        match session.table.mark_disconnected(identity) {
            Some(ConnectionState::Connected) => {
                info!("disconnected from {identity}");
            }
            Some(previous) => debug!("{identity}: disconnect while {previous}, ignoring"),
            None => debug!("{identity}: disconnect for unknown provider"),
        }
    }

    fn handle_push(
        &self,
        identity: &ProviderIdentity,
        generation: u64,
        timestamp_millis: u64,
        values: Measurements,
    ) {
        if !self.is_current(generation) {
            trace!("{identity}: dropping batch from ended session");
            return;
        }
        let timestamp = UNIX_EPOCH
            .checked_add(Duration::from_millis(timestamp_millis))
            .unwrap_or_else(|| {
                warn!("{identity}: timestamp {timestamp_millis} out of range, using now");
                SystemTime::now()
            });

        let snapshot = self.get_schema();
        let received = values.len();
        let filtered = filter_values(identity, values, &snapshot);
        trace!(
            "{identity}: batch of {received} value(s), {} owned",
            filtered.len()
        );
        self.listeners
            .dispatch_measurements(identity, timestamp, &filtered);
    }

    fn handle_schema_changed(&self, identity: &ProviderIdentity, generation: u64) {
        if !self.is_current(generation) {
            return;
        }
        debug!("{identity}: schema changed");
        self.recompute();
    }
}

/// Binding sink for one provider of one session.
struct ServiceConnection {
    client: Weak<CarStatsClient>,
    identity: ProviderIdentity,
    generation: u64,
}

impl ConnectionSink for ServiceConnection {
    fn on_connected(&self, handle: Arc<dyn CarStatsProvider>) {
        if let Some(client) = self.client.upgrade() {
            client.handle_connected(&self.identity, self.generation, handle);
        }
    }

    fn on_disconnected(&self) {
        if let Some(client) = self.client.upgrade() {
            client.handle_disconnected(&self.identity, self.generation);
        }
    }
}

/// Inbound callback registered with one provider. Converts its pushes into
/// filtered listener events.
struct RemoteListener {
    client: Weak<CarStatsClient>,
    identity: ProviderIdentity,
    generation: u64,
}

impl ProviderCallback for RemoteListener {
    fn on_new_measurements(&self, timestamp_millis: u64, values: Measurements) {
        if let Some(client) = self.client.upgrade() {
            client.handle_push(&self.identity, self.generation, timestamp_millis, values);
        }
    }

    fn on_schema_changed(&self) {
        if let Some(client) = self.client.upgrade() {
            client.handle_schema_changed(&self.identity, self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;
    use std::time::Instant;

    use crate::discovery::StaticDiscovery;
    use crate::error::{ListenerResult, ProviderError};
    use crate::provider::{FieldSchema, FieldSchemas, FieldType, Value};

    // -----------------------------------------------------------------------
    // Mock provider and binder
    // -----------------------------------------------------------------------

    /// Deterministic in-memory provider.
    #[derive(Default)]
    struct MockProvider {
        schema: Mutex<FieldSchemas>,
        values: Mutex<Measurements>,
        callbacks: Mutex<Vec<Arc<dyn ProviderCallback>>>,
        unregistered: AtomicU64,
        fail_schema: AtomicBool,
        fail_measurements: AtomicBool,
        fail_register: AtomicBool,
        stall: Mutex<Option<Duration>>,
    }

    impl MockProvider {
        fn new(fields: &[(&str, f64)]) -> Arc<Self> {
            let provider = Self::default();
            *provider.schema.lock().unwrap() = fields
                .iter()
                .map(|(k, _)| (k.to_string(), FieldSchema::new(FieldType::Float)))
                .collect();
            *provider.values.lock().unwrap() = values(fields);
            Arc::new(provider)
        }

        fn push(&self, timestamp_millis: u64, batch: Measurements) {
            let callbacks = self.callbacks.lock().unwrap().clone();
            for cb in callbacks {
                cb.on_new_measurements(timestamp_millis, batch.clone());
            }
        }

        fn signal_schema_changed(&self) {
            let callbacks = self.callbacks.lock().unwrap().clone();
            for cb in callbacks {
                cb.on_schema_changed();
            }
        }

        fn callback_count(&self) -> usize {
            self.callbacks.lock().unwrap().len()
        }
    }

    impl CarStatsProvider for MockProvider {
        fn get_schema(&self) -> Result<FieldSchemas, ProviderError> {
            if self.fail_schema.load(Ordering::SeqCst) {
                return Err(ProviderError::Unreachable("schema".into()));
            }
            Ok(self.schema.lock().unwrap().clone())
        }

        fn get_merged_measurements(&self) -> Result<Measurements, ProviderError> {
            if let Some(stall) = *self.stall.lock().unwrap() {
                std::thread::sleep(stall);
            }
            if self.fail_measurements.load(Ordering::SeqCst) {
                return Err(ProviderError::Unreachable("measurements".into()));
            }
            Ok(self.values.lock().unwrap().clone())
        }

        fn register_listener(
            &self,
            callback: Arc<dyn ProviderCallback>,
        ) -> Result<(), ProviderError> {
            // The callback is stored even when registration "fails" so tests
            // can still push through it.
            self.callbacks.lock().unwrap().push(callback);
            if self.fail_register.load(Ordering::SeqCst) {
                return Err(ProviderError::Malformed("register".into()));
            }
            Ok(())
        }

        fn unregister_listener(
            &self,
            callback: &Arc<dyn ProviderCallback>,
        ) -> Result<(), ProviderError> {
            self.callbacks
                .lock()
                .unwrap()
                .retain(|cb| !Arc::ptr_eq(cb, callback));
            self.unregistered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Binder whose connections are driven by the test.
    #[derive(Default)]
    struct ManualBinder {
        sinks: Mutex<HashMap<ProviderIdentity, Arc<dyn ConnectionSink>>>,
        unbound: Mutex<Vec<ProviderIdentity>>,
        refuse: Mutex<Vec<ProviderIdentity>>,
    }

    impl ManualBinder {
        fn sink(&self, identity: &ProviderIdentity) -> Arc<dyn ConnectionSink> {
            Arc::clone(&self.sinks.lock().unwrap()[identity])
        }

        fn connect(&self, identity: &ProviderIdentity, provider: &Arc<MockProvider>) {
            let handle: Arc<dyn CarStatsProvider> = provider.clone();
            self.sink(identity).on_connected(handle);
        }

        fn disconnect(&self, identity: &ProviderIdentity) {
            self.sink(identity).on_disconnected();
        }
    }

    impl ProviderBinder for ManualBinder {
        fn bind(
            &self,
            identity: &ProviderIdentity,
            sink: Arc<dyn ConnectionSink>,
        ) -> Result<(), ProviderError> {
            if self.refuse.lock().unwrap().contains(identity) {
                return Err(ProviderError::Unreachable("no such service".into()));
            }
            self.sinks.lock().unwrap().insert(identity.clone(), sink);
            Ok(())
        }

        fn unbind(&self, identity: &ProviderIdentity, _sink: &Arc<dyn ConnectionSink>) {
            self.unbound.lock().unwrap().push(identity.clone());
        }
    }

    // -----------------------------------------------------------------------
    // Recording listener
    // -----------------------------------------------------------------------

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Values(String, ProviderIdentity, Measurements),
        Schema(String),
    }

    struct Recorder {
        name: String,
        events: Arc<Mutex<Vec<Event>>>,
    }

    impl CarStatsListener for Recorder {
        fn name(&self) -> &str {
            &self.name
        }
        fn on_new_measurements(
            &self,
            provider: &ProviderIdentity,
            _timestamp: SystemTime,
            values: &Measurements,
        ) -> ListenerResult {
            self.events.lock().unwrap().push(Event::Values(
                self.name.clone(),
                provider.clone(),
                values.clone(),
            ));
            Ok(())
        }
        fn on_schema_changed(&self) -> ListenerResult {
            self.events
                .lock()
                .unwrap()
                .push(Event::Schema(self.name.clone()));
            Ok(())
        }
    }

    struct Exploding;

    impl CarStatsListener for Exploding {
        fn on_new_measurements(
            &self,
            _provider: &ProviderIdentity,
            _timestamp: SystemTime,
            _values: &Measurements,
        ) -> ListenerResult {
            panic!("listener bug")
        }
        fn on_schema_changed(&self) -> ListenerResult {
            Err("not interested".into())
        }
    }

    // -----------------------------------------------------------------------
    // Fixtures
    // -----------------------------------------------------------------------

    fn id(name: &str) -> ProviderIdentity {
        ProviderIdentity::new("test", name)
    }

    fn values(pairs: &[(&str, f64)]) -> Measurements {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::Float(*v)))
            .collect()
    }

    struct Fixture {
        client: Arc<CarStatsClient>,
        binder: Arc<ManualBinder>,
        events: Arc<Mutex<Vec<Event>>>,
        a: Arc<MockProvider>,
        b: Arc<MockProvider>,
    }

    impl Fixture {
        /// Providers A (priority 1: temp, rpm) and B (priority 2: temp, oil).
        fn new() -> Self {
            let binder = Arc::new(ManualBinder::default());
            let discovery = Arc::new(StaticDiscovery::new(vec![id("A"), id("B")]));
            let config = ClientConfig {
                rpc_timeout_ms: 200,
                ..ClientConfig::default()
            };
            let client = CarStatsClient::new(discovery, binder.clone(), config);
            let events = Arc::new(Mutex::new(Vec::new()));
            client.register_listener(Arc::new(Recorder {
                name: "rec".into(),
                events: Arc::clone(&events),
            }));
            Self {
                client,
                binder,
                events,
                a: MockProvider::new(&[("temp", 90.0), ("rpm", 800.0)]),
                b: MockProvider::new(&[("temp", 95.0), ("oil", 50.0)]),
            }
        }

        fn start_and_connect(&self) {
            self.client.start();
            self.binder.connect(&id("A"), &self.a);
            self.binder.connect(&id("B"), &self.b);
        }

        fn take_events(&self) -> Vec<Event> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    // -----------------------------------------------------------------------
    // Start and connect
    // -----------------------------------------------------------------------

    #[test]
    fn test_start_binds_in_priority_order_as_connecting() {
        let f = Fixture::new();
        f.client.start();
        let statuses = f.client.provider_statuses();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].identity, id("A"));
        assert_eq!(statuses[1].identity, id("B"));
        assert!(statuses.iter().all(|s| s.state == ConnectionState::Connecting));
        assert!(f.client.get_schema().is_empty());
    }

    #[test]
    fn test_connect_in_order_merges_ownership() {
        let f = Fixture::new();
        f.start_and_connect();

        let schema = f.client.get_schema();
        assert_eq!(schema.owner_of("temp"), Some(&id("A")));
        assert_eq!(schema.owner_of("rpm"), Some(&id("A")));
        assert_eq!(schema.owner_of("oil"), Some(&id("B")));
        assert_eq!(f.a.callback_count(), 1);
        assert_eq!(f.b.callback_count(), 1);

        let statuses = f.client.provider_statuses();
        assert_eq!(statuses[0].owned_fields, 2);
        assert_eq!(statuses[1].owned_fields, 1);
        assert!(statuses.iter().all(|s| s.state == ConnectionState::Connected));
    }

    #[test]
    fn test_connect_out_of_order_still_respects_priority() {
        let f = Fixture::new();
        f.client.start();
        f.binder.connect(&id("B"), &f.b);
        assert_eq!(f.client.get_schema().owner_of("temp"), Some(&id("B")));

        f.binder.connect(&id("A"), &f.a);
        assert_eq!(f.client.get_schema().owner_of("temp"), Some(&id("A")));
    }

    #[test]
    fn test_each_connect_fires_schema_changed() {
        let f = Fixture::new();
        f.start_and_connect();
        let schema_events = f
            .take_events()
            .into_iter()
            .filter(|e| matches!(e, Event::Schema(_)))
            .count();
        assert_eq!(schema_events, 2);
    }

    #[test]
    fn test_register_failure_does_not_abort_connection() {
        let f = Fixture::new();
        f.a.fail_register.store(true, Ordering::SeqCst);
        f.start_and_connect();
        assert_eq!(
            f.client.provider_statuses()[0].state,
            ConnectionState::Connected
        );
        assert_eq!(f.client.get_schema().owner_of("rpm"), Some(&id("A")));
    }

    #[test]
    fn test_bind_failure_leaves_provider_connecting() {
        let f = Fixture::new();
        f.binder.refuse.lock().unwrap().push(id("A"));
        f.client.start();
        f.binder.connect(&id("B"), &f.b);

        let statuses = f.client.provider_statuses();
        assert_eq!(statuses[0].state, ConnectionState::Connecting);
        assert_eq!(statuses[1].state, ConnectionState::Connected);
        assert_eq!(f.client.get_schema().owner_of("temp"), Some(&id("B")));
    }

    #[test]
    fn test_start_twice_is_ignored() {
        let f = Fixture::new();
        f.client.start();
        f.client.start();
        assert_eq!(f.client.provider_statuses().len(), 2);
    }

    #[test]
    fn test_duplicate_discovery_keeps_first_slot() {
        let binder = Arc::new(ManualBinder::default());
        let discovery = Arc::new(StaticDiscovery::new(vec![id("A"), id("B"), id("A")]));
        let client = CarStatsClient::new(discovery, binder, ClientConfig::default());
        client.start();
        let ids: Vec<_> = client
            .provider_statuses()
            .into_iter()
            .map(|s| s.identity)
            .collect();
        assert_eq!(ids, vec![id("A"), id("B")]);
    }

    // -----------------------------------------------------------------------
    // Push path
    // -----------------------------------------------------------------------

    #[test]
    fn test_push_is_filtered_by_ownership() {
        let f = Fixture::new();
        f.start_and_connect();
        f.take_events();

        f.b.push(1_700_000_000_000, values(&[("temp", 99.0), ("oil", 50.0)]));
        assert_eq!(
            f.take_events(),
            vec![Event::Values("rec".into(), id("B"), values(&[("oil", 50.0)]))]
        );
    }

    #[test]
    fn test_push_carries_provider_timestamp() {
        struct Stamp(Mutex<Option<SystemTime>>);
        impl CarStatsListener for Stamp {
            fn on_new_measurements(
                &self,
                _provider: &ProviderIdentity,
                timestamp: SystemTime,
                _values: &Measurements,
            ) -> ListenerResult {
                *self.0.lock().unwrap() = Some(timestamp);
                Ok(())
            }
            fn on_schema_changed(&self) -> ListenerResult {
                Ok(())
            }
        }

        let f = Fixture::new();
        let stamp = Arc::new(Stamp(Mutex::new(None)));
        f.client.register_listener(stamp.clone());
        f.start_and_connect();
        f.a.push(1_234, values(&[("rpm", 900.0)]));
        assert_eq!(
            *stamp.0.lock().unwrap(),
            Some(UNIX_EPOCH + Duration::from_millis(1_234))
        );
    }

    #[test]
    fn test_failing_listener_isolated_and_state_untouched() {
        let f = Fixture::new();
        f.client.register_listener(Arc::new(Exploding));
        let late = Arc::new(Mutex::new(Vec::new()));
        f.client.register_listener(Arc::new(Recorder {
            name: "late".into(),
            events: Arc::clone(&late),
        }));
        f.start_and_connect();
        let before = f.client.get_schema();

        f.a.push(0, values(&[("rpm", 1000.0)]));
        assert_eq!(late.lock().unwrap().len(), 3); // two schema events, one batch
        assert_eq!(*f.client.get_schema(), *before);
    }

    #[test]
    fn test_provider_schema_change_triggers_recompute() {
        let f = Fixture::new();
        f.start_and_connect();
        f.b
            .schema
            .lock()
            .unwrap()
            .insert("boost".into(), FieldSchema::new(FieldType::Float));
        f.b.signal_schema_changed();
        assert_eq!(f.client.get_schema().owner_of("boost"), Some(&id("B")));
    }

    // -----------------------------------------------------------------------
    // Pull path
    // -----------------------------------------------------------------------

    #[test]
    fn test_merged_measurements_union_of_owned_values() {
        let f = Fixture::new();
        f.start_and_connect();
        let merged = f.client.get_merged_measurements();
        assert_eq!(
            merged,
            values(&[("temp", 90.0), ("rpm", 800.0), ("oil", 50.0)])
        );
    }

    #[test]
    fn test_disconnected_provider_fields_absent_but_still_owned() {
        let f = Fixture::new();
        f.start_and_connect();
        f.binder.disconnect(&id("A"));

        let statuses = f.client.provider_statuses();
        assert_eq!(statuses[0].identity, id("A"));
        assert_eq!(statuses[0].state, ConnectionState::Disconnected);

        let merged = f.client.get_merged_measurements();
        assert_eq!(merged, values(&[("oil", 50.0)]));
        assert_eq!(f.client.get_schema().owner_of("temp"), Some(&id("A")));

        // Reconnect restores A's fields.
        f.binder.connect(&id("A"), &f.a);
        let merged = f.client.get_merged_measurements();
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_failing_provider_contributes_nothing() {
        let f = Fixture::new();
        f.start_and_connect();
        f.a.fail_measurements.store(true, Ordering::SeqCst);
        assert_eq!(f.client.get_merged_measurements(), values(&[("oil", 50.0)]));
    }

    #[test]
    fn test_slow_provider_bounded_by_timeout() {
        let f = Fixture::new();
        f.start_and_connect();
        *f.a.stall.lock().unwrap() = Some(Duration::from_secs(2));

        let started = Instant::now();
        let merged = f.client.get_merged_measurements();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(merged, values(&[("oil", 50.0)]));
    }

    #[test]
    fn test_schema_fetch_failure_contributes_nothing() {
        let f = Fixture::new();
        f.start_and_connect();
        f.a.fail_schema.store(true, Ordering::SeqCst);
        f.client.recompute();

        let schema = f.client.get_schema();
        assert_eq!(schema.owner_of("temp"), Some(&id("B")));
        assert!(schema.owner_of("rpm").is_none());
    }

    #[test]
    fn test_recompute_is_idempotent_but_always_notifies() {
        let f = Fixture::new();
        f.start_and_connect();
        f.take_events();

        f.client.recompute();
        let first = f.client.get_schema();
        f.client.recompute();
        let second = f.client.get_schema();
        assert_eq!(*first, *second);
        assert_eq!(
            f.take_events(),
            vec![Event::Schema("rec".into()), Event::Schema("rec".into())]
        );
    }

    #[test]
    fn test_force_update_dispatches_once_per_listener_in_order() {
        let f = Fixture::new();
        let second = Arc::new(Mutex::new(Vec::new()));
        f.client.register_listener(Arc::new(Recorder {
            name: "second".into(),
            events: Arc::clone(&second),
        }));
        f.start_and_connect();
        f.take_events();
        second.lock().unwrap().clear();

        let merged = f.client.force_update_measurements();
        let expected = values(&[("temp", 90.0), ("rpm", 800.0), ("oil", 50.0)]);
        assert_eq!(merged, expected);
        assert_eq!(
            f.take_events(),
            vec![Event::Values("rec".into(), ProviderIdentity::merged(), expected.clone())]
        );
        assert_eq!(
            *second.lock().unwrap(),
            vec![Event::Values("second".into(), ProviderIdentity::merged(), expected)]
        );
    }

    // -----------------------------------------------------------------------
    // Stop
    // -----------------------------------------------------------------------

    #[test]
    fn test_stop_unregisters_unbinds_and_clears() {
        let f = Fixture::new();
        f.start_and_connect();
        f.client.stop();

        assert_eq!(f.a.unregistered.load(Ordering::SeqCst), 1);
        assert_eq!(f.b.unregistered.load(Ordering::SeqCst), 1);
        assert_eq!(f.a.callback_count(), 0);
        assert_eq!(*f.binder.unbound.lock().unwrap(), vec![id("A"), id("B")]);
        assert!(f.client.get_schema().is_empty());
        assert!(f.client.provider_statuses().is_empty());
        assert!(f.client.get_merged_measurements().is_empty());
        assert!(!f.client.is_started());
    }

    #[test]
    fn test_push_after_stop_is_dropped_quietly() {
        let f = Fixture::new();
        f.start_and_connect();
        let in_flight = Arc::clone(&f.a.callbacks.lock().unwrap()[0]);
        f.client.stop();
        f.take_events();

        in_flight.on_new_measurements(0, values(&[("temp", 1.0)]));
        in_flight.on_schema_changed();
        assert!(f.take_events().is_empty());

        // Late connect from the old session is ignored too.
        f.binder.connect(&id("A"), &f.a);
        assert!(f.client.provider_statuses().is_empty());
    }

    #[test]
    fn test_listeners_survive_stop_and_restart() {
        let f = Fixture::new();
        f.start_and_connect();
        f.client.stop();
        assert_eq!(f.client.listener_count(), 1);

        f.client.start();
        f.binder.connect(&id("A"), &f.a);
        f.take_events();
        f.a.push(0, values(&[("rpm", 700.0)]));
        assert_eq!(
            f.take_events(),
            vec![Event::Values("rec".into(), id("A"), values(&[("rpm", 700.0)]))]
        );
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let f = Fixture::new();
        f.client.stop();
        assert!(f.binder.unbound.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stop_races_with_pushes() {
        let f = Fixture::new();
        f.start_and_connect();
        let a = Arc::clone(&f.a);
        let pusher = std::thread::spawn(move || {
            for i in 0..200 {
                a.push(i, values(&[("rpm", i as f64)]));
            }
        });
        f.client.stop();
        pusher.join().unwrap();
        assert!(f.client.get_schema().is_empty());
    }
}
