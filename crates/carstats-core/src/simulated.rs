//! In-process simulated providers.
//!
//! Stands in for the platform's provider processes so a full session can run
//! locally: a [`SimulatedBinder`] connects on a background thread, a
//! [`SimulatedFleet`] ticks every provider's random-walk values and pushes
//! them to whoever registered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::client::CarStatsClient;
use crate::discovery::{ConnectionSink, ProviderBinder, ProviderDiscovery, StaticDiscovery};
use crate::error::ProviderError;
use crate::poller::sleep_unless_stopped;
use crate::provider::{
    CarStatsProvider, FieldSchema, FieldSchemas, FieldType, Measurements, ProviderCallback,
    ProviderIdentity, Value,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn default_step() -> f64 {
    1.0
}

/// One simulated field: its schema plus random-walk parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedField {
    pub key: String,
    #[serde(flatten)]
    pub schema: FieldSchema,
    #[serde(default)]
    pub initial: f64,
    /// Largest change per tick.
    #[serde(default = "default_step")]
    pub step: f64,
}

impl SimulatedField {
    pub fn float(key: &str, unit: &str, initial: f64, step: f64) -> Self {
        Self {
            key: key.to_string(),
            schema: FieldSchema::new(FieldType::Float).with_unit(unit),
            initial,
            step,
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.schema = self.schema.with_range(min, max);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedProviderConfig {
    pub identity: ProviderIdentity,
    #[serde(default)]
    pub fields: Vec<SimulatedField>,
    #[serde(default)]
    pub needs_permissions: bool,
    /// Delay between a bind request and the connect event.
    #[serde(default)]
    pub connect_delay_ms: u64,
}

/// Two providers with overlapping fields: an infotainment bus reader and an
/// OBD adapter, in that priority order.
pub fn demo_providers() -> Vec<SimulatedProviderConfig> {
    vec![
        SimulatedProviderConfig {
            identity: ProviderIdentity::new("com.example.exlap", ".ExlapProvider"),
            fields: vec![
                SimulatedField::float("vehicleSpeed", "km/h", 50.0, 3.0).with_range(0.0, 250.0),
                SimulatedField::float("engineSpeed", "rpm", 2000.0, 150.0)
                    .with_range(700.0, 7000.0),
                SimulatedField::float("oilTemperature", "°C", 70.0, 1.5)
                    .with_range(-20.0, 150.0),
                SimulatedField::float("coolantTemperature", "°C", 80.0, 1.0)
                    .with_range(-20.0, 130.0),
            ],
            needs_permissions: false,
            connect_delay_ms: 50,
        },
        SimulatedProviderConfig {
            identity: ProviderIdentity::new("com.example.torque", ".TorqueProvider"),
            fields: vec![
                SimulatedField::float("engineSpeed", "rpm", 2100.0, 150.0)
                    .with_range(700.0, 7000.0),
                SimulatedField::float("oilTemperature", "°C", 72.0, 1.5)
                    .with_range(-20.0, 150.0),
                SimulatedField::float("torqueCoolantTemp", "°C", 82.0, 1.0)
                    .with_range(-20.0, 130.0),
                SimulatedField::float("boostPressure", "psi", 8.0, 2.0).with_range(-10.0, 30.0),
            ],
            needs_permissions: true,
            connect_delay_ms: 120,
        },
    ]
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

struct ProviderState {
    fields: Vec<SimulatedField>,
    values: HashMap<String, f64>,
}

impl ProviderState {
    fn measurements(&self) -> Measurements {
        self.fields
            .iter()
            .filter_map(|field| {
                let raw = *self.values.get(&field.key)?;
                Some((field.key.clone(), to_value(field.schema.field_type, raw)))
            })
            .collect()
    }
}

fn to_value(field_type: FieldType, raw: f64) -> Value {
    match field_type {
        FieldType::Float => Value::Float(raw),
        FieldType::Integer => Value::Int(raw.round() as i64),
        FieldType::Boolean => Value::Bool(raw >= 0.5),
        FieldType::String => Value::Text(format!("{raw}")),
    }
}

/// A provider whose values follow a bounded random walk.
pub struct SimulatedProvider {
    identity: ProviderIdentity,
    state: Mutex<ProviderState>,
    callbacks: Mutex<Vec<Arc<dyn ProviderCallback>>>,
    online: AtomicBool,
    needs_permissions: bool,
    permissions_granted: AtomicBool,
}

impl SimulatedProvider {
    pub fn new(config: &SimulatedProviderConfig) -> Self {
        let values = config
            .fields
            .iter()
            .map(|f| (f.key.clone(), f.initial))
            .collect();
        Self {
            identity: config.identity.clone(),
            state: Mutex::new(ProviderState {
                fields: config.fields.clone(),
                values,
            }),
            callbacks: Mutex::new(Vec::new()),
            online: AtomicBool::new(true),
            needs_permissions: config.needs_permissions,
            permissions_granted: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// An offline provider fails every call, like a dead remote process.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn callback_count(&self) -> usize {
        lock(&self.callbacks).len()
    }

    pub fn permissions_granted(&self) -> bool {
        self.permissions_granted.load(Ordering::SeqCst)
    }

    /// Advance every field by one random step and push the new values.
    pub fn tick<R: Rng>(&self, rng: &mut R) -> Measurements {
        let batch = {
            let mut state = lock(&self.state);
            let ProviderState { fields, values } = &mut *state;
            for field in fields.iter() {
                let step = field.step.abs();
                let current = values.entry(field.key.clone()).or_insert(field.initial);
                if step > 0.0 {
                    *current += rng.random_range(-step..=step);
                }
                if let Some(min) = field.schema.min {
                    *current = current.max(min);
                }
                if let Some(max) = field.schema.max {
                    *current = current.min(max);
                }
            }
            state.measurements()
        };
        self.push(batch.clone());
        batch
    }

    /// Set one raw value without pushing it.
    pub fn set_value(&self, key: &str, value: f64) {
        lock(&self.state).values.insert(key.to_string(), value);
    }

    /// Push `values` to every registered callback, stamped now.
    pub fn push(&self, values: Measurements) {
        let callbacks = lock(&self.callbacks).clone();
        let timestamp = now_millis();
        for callback in callbacks {
            callback.on_new_measurements(timestamp, values.clone());
        }
    }

    /// Replace the field set and tell every registered callback.
    pub fn set_fields(&self, fields: Vec<SimulatedField>) {
        {
            let mut state = lock(&self.state);
            for field in &fields {
                state
                    .values
                    .entry(field.key.clone())
                    .or_insert(field.initial);
            }
            state.fields = fields;
        }
        let callbacks = lock(&self.callbacks).clone();
        for callback in callbacks {
            callback.on_schema_changed();
        }
    }

    fn check_online(&self) -> Result<(), ProviderError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(ProviderError::Unreachable(format!(
                "{} is not running",
                self.identity
            )))
        }
    }
}

impl CarStatsProvider for SimulatedProvider {
    fn get_schema(&self) -> Result<FieldSchemas, ProviderError> {
        self.check_online()?;
        Ok(lock(&self.state)
            .fields
            .iter()
            .map(|f| (f.key.clone(), f.schema.clone()))
            .collect())
    }

    fn get_merged_measurements(&self) -> Result<Measurements, ProviderError> {
        self.check_online()?;
        Ok(lock(&self.state).measurements())
    }

    fn register_listener(&self, callback: Arc<dyn ProviderCallback>) -> Result<(), ProviderError> {
        self.check_online()?;
        lock(&self.callbacks).push(callback);
        Ok(())
    }

    fn unregister_listener(
        &self,
        callback: &Arc<dyn ProviderCallback>,
    ) -> Result<(), ProviderError> {
        self.check_online()?;
        lock(&self.callbacks).retain(|cb| !Arc::ptr_eq(cb, callback));
        Ok(())
    }

    fn needs_permissions(&self) -> Result<bool, ProviderError> {
        self.check_online()?;
        Ok(self.needs_permissions && !self.permissions_granted())
    }

    fn request_permissions(&self) -> Result<(), ProviderError> {
        self.check_online()?;
        self.permissions_granted.store(true, Ordering::SeqCst);
        info!("{}: permissions granted", self.identity);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Binder
// ---------------------------------------------------------------------------

/// Binds to simulated providers, delivering `on_connected` from a spawned
/// thread after each provider's connect delay.
pub struct SimulatedBinder {
    providers: HashMap<ProviderIdentity, (Arc<SimulatedProvider>, Duration)>,
    bindings: Mutex<HashMap<ProviderIdentity, Vec<Arc<dyn ConnectionSink>>>>,
}

impl SimulatedBinder {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            bindings: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(&mut self, provider: Arc<SimulatedProvider>, connect_delay: Duration) {
        self.providers
            .insert(provider.identity().clone(), (provider, connect_delay));
    }

    fn sinks(&self, identity: &ProviderIdentity) -> Vec<Arc<dyn ConnectionSink>> {
        lock(&self.bindings)
            .get(identity)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of live bindings to `identity`.
    pub fn binding_count(&self, identity: &ProviderIdentity) -> usize {
        self.sinks(identity).len()
    }

    /// Simulate the provider process dying: it goes offline, drops its
    /// callbacks, and every binding is told it disconnected.
    pub fn disconnect(&self, identity: &ProviderIdentity) {
        let Some((provider, _)) = self.providers.get(identity) else {
            warn!("{identity}: cannot disconnect unknown provider");
            return;
        };
        provider.set_online(false);
        // A dead process forgets who was listening.
        lock(&provider.callbacks).clear();
        for sink in self.sinks(identity) {
            sink.on_disconnected();
        }
        debug!("{identity}: simulated disconnect");
    }

    /// Bring the provider back and reconnect every binding to it.
    pub fn reconnect(&self, identity: &ProviderIdentity) {
        let Some((provider, _)) = self.providers.get(identity) else {
            warn!("{identity}: cannot reconnect unknown provider");
            return;
        };
        provider.set_online(true);
        for sink in self.sinks(identity) {
            let handle: Arc<dyn CarStatsProvider> = provider.clone();
            sink.on_connected(handle);
        }
        debug!("{identity}: simulated reconnect");
    }
}

impl Default for SimulatedBinder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderBinder for SimulatedBinder {
    fn bind(
        &self,
        identity: &ProviderIdentity,
        sink: Arc<dyn ConnectionSink>,
    ) -> Result<(), ProviderError> {
        let (provider, delay) = self
            .providers
            .get(identity)
            .ok_or_else(|| ProviderError::Unreachable(format!("no provider named {identity}")))?;

        lock(&self.bindings)
            .entry(identity.clone())
            .or_default()
            .push(Arc::clone(&sink));

        let provider = Arc::clone(provider);
        let delay = *delay;
        std::thread::Builder::new()
            .name(format!("carstats-bind:{identity}"))
            .spawn(move || {
                std::thread::sleep(delay);
                if provider.is_online() {
                    sink.on_connected(provider);
                }
            })
            .map_err(|e| ProviderError::Unreachable(format!("cannot spawn bind thread: {e}")))?;
        Ok(())
    }

    fn unbind(&self, identity: &ProviderIdentity, sink: &Arc<dyn ConnectionSink>) {
        if let Some(sinks) = lock(&self.bindings).get_mut(identity) {
            sinks.retain(|s| !Arc::ptr_eq(s, sink));
        }
    }
}

// ---------------------------------------------------------------------------
// Fleet
// ---------------------------------------------------------------------------

/// A set of simulated providers with matching discovery and binder.
pub struct SimulatedFleet {
    providers: Vec<Arc<SimulatedProvider>>,
    discovery: Arc<StaticDiscovery>,
    binder: Arc<SimulatedBinder>,
}

impl SimulatedFleet {
    pub fn new(configs: &[SimulatedProviderConfig]) -> Self {
        let mut binder = SimulatedBinder::new();
        let mut providers = Vec::with_capacity(configs.len());
        for config in configs {
            let provider = Arc::new(SimulatedProvider::new(config));
            binder.add(
                Arc::clone(&provider),
                Duration::from_millis(config.connect_delay_ms),
            );
            providers.push(provider);
        }
        let discovery = StaticDiscovery::new(configs.iter().map(|c| c.identity.clone()).collect());
        Self {
            providers,
            discovery: Arc::new(discovery),
            binder: Arc::new(binder),
        }
    }

    pub fn demo() -> Self {
        Self::new(&demo_providers())
    }

    pub fn discovery(&self) -> Arc<dyn ProviderDiscovery> {
        self.discovery.clone()
    }

    pub fn binder(&self) -> Arc<SimulatedBinder> {
        Arc::clone(&self.binder)
    }

    pub fn providers(&self) -> &[Arc<SimulatedProvider>] {
        &self.providers
    }

    pub fn provider(&self, identity: &ProviderIdentity) -> Option<&Arc<SimulatedProvider>> {
        self.providers.iter().find(|p| p.identity() == identity)
    }

    /// A client bound to this fleet. The session is not started.
    pub fn client(&self, config: ClientConfig) -> Arc<CarStatsClient> {
        CarStatsClient::new(self.discovery(), self.binder(), config)
    }

    /// Tick every online provider once.
    pub fn tick_once<R: Rng>(&self, rng: &mut R) {
        for provider in self.providers.iter().filter(|p| p.is_online()) {
            provider.tick(rng);
        }
    }

    /// Tick every online provider each `interval` on a background thread.
    pub fn start_ticker(&self, interval: Duration) -> FleetTicker {
        let stop = Arc::new(AtomicBool::new(false));
        let providers = self.providers.clone();
        let flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("carstats-fleet".into())
            .spawn(move || {
                let mut rng = rand::rng();
                while !flag.load(Ordering::Relaxed) {
                    for provider in providers.iter().filter(|p| p.is_online()) {
                        provider.tick(&mut rng);
                    }
                    sleep_unless_stopped(&flag, interval);
                }
            });
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("cannot spawn fleet ticker: {e}");
                None
            }
        };
        FleetTicker { stop, handle }
    }
}

/// Handle to a running fleet ticker. Stops it on drop.
pub struct FleetTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FleetTicker {
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FleetTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::mpsc;

    fn single(delay_ms: u64) -> SimulatedProviderConfig {
        SimulatedProviderConfig {
            identity: ProviderIdentity::new("sim", "One"),
            fields: vec![SimulatedField::float("temp", "°C", 50.0, 5.0).with_range(0.0, 60.0)],
            needs_permissions: true,
            connect_delay_ms: delay_ms,
        }
    }

    struct ChannelSink(Mutex<mpsc::Sender<&'static str>>);

    impl ConnectionSink for ChannelSink {
        fn on_connected(&self, _handle: Arc<dyn CarStatsProvider>) {
            let _ = self.0.lock().unwrap().send("connected");
        }
        fn on_disconnected(&self) {
            let _ = self.0.lock().unwrap().send("disconnected");
        }
    }

    struct CountingCallback(Mutex<Vec<Measurements>>);

    impl ProviderCallback for CountingCallback {
        fn on_new_measurements(&self, _timestamp_millis: u64, values: Measurements) {
            self.0.lock().unwrap().push(values);
        }
        fn on_schema_changed(&self) {}
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    #[test]
    fn test_config_json_shape() {
        let config: SimulatedProviderConfig = serde_json::from_str(
            r#"{
                "identity": "sim/One",
                "fields": [{"key": "boostPressure", "type": "float", "unit": "psi", "max": 30, "initial": 5}]
            }"#,
        )
        .unwrap();
        assert_eq!(config.identity, ProviderIdentity::new("sim", "One"));
        let field = &config.fields[0];
        assert_eq!(field.schema.field_type, FieldType::Float);
        assert_eq!(field.schema.max, Some(30.0));
        assert!((field.step - 1.0).abs() < f64::EPSILON);
        assert!(!config.needs_permissions);
    }

    #[test]
    fn test_demo_fleet_overlaps() {
        let demo = demo_providers();
        assert_eq!(demo.len(), 2);
        let first: Vec<_> = demo[0].fields.iter().map(|f| f.key.as_str()).collect();
        let shared = demo[1]
            .fields
            .iter()
            .filter(|f| first.contains(&f.key.as_str()))
            .count();
        assert!(shared > 0);
    }

    // -----------------------------------------------------------------------
    // Provider
    // -----------------------------------------------------------------------

    #[test]
    fn test_tick_stays_in_range_and_pushes() {
        let provider = SimulatedProvider::new(&single(0));
        let callback = Arc::new(CountingCallback(Mutex::new(Vec::new())));
        provider.register_listener(callback.clone()).unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let batch = provider.tick(&mut rng);
            let temp = batch["temp"].as_f64().unwrap();
            assert!((0.0..=60.0).contains(&temp));
        }
        assert_eq!(callback.0.lock().unwrap().len(), 200);
    }

    #[test]
    fn test_offline_provider_fails_calls() {
        let provider = SimulatedProvider::new(&single(0));
        provider.set_online(false);
        assert!(matches!(
            provider.get_schema(),
            Err(ProviderError::Unreachable(_))
        ));
        assert!(provider.get_merged_measurements().is_err());
    }

    #[test]
    fn test_permissions_granted_once() {
        let provider = SimulatedProvider::new(&single(0));
        assert_eq!(provider.needs_permissions(), Ok(true));
        provider.request_permissions().unwrap();
        assert_eq!(provider.needs_permissions(), Ok(false));
    }

    #[test]
    fn test_value_types() {
        assert_eq!(to_value(FieldType::Integer, 2.6), Value::Int(3));
        assert_eq!(to_value(FieldType::Boolean, 0.7), Value::Bool(true));
        assert_eq!(to_value(FieldType::Float, 1.5), Value::Float(1.5));
    }

    // -----------------------------------------------------------------------
    // Binder
    // -----------------------------------------------------------------------

    #[test]
    fn test_bind_connects_from_background_thread() {
        let fleet = SimulatedFleet::new(&[single(5)]);
        let (tx, rx) = mpsc::channel();
        let sink: Arc<dyn ConnectionSink> = Arc::new(ChannelSink(Mutex::new(tx)));
        let id = ProviderIdentity::new("sim", "One");

        fleet.binder().bind(&id, Arc::clone(&sink)).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok("connected"));

        fleet.binder().disconnect(&id);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)), Ok("disconnected"));
        fleet.binder().reconnect(&id);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)), Ok("connected"));

        fleet.binder().unbind(&id, &sink);
        assert_eq!(fleet.binder().binding_count(&id), 0);
    }

    #[test]
    fn test_bind_unknown_provider_fails() {
        let fleet = SimulatedFleet::new(&[]);
        let (tx, _rx) = mpsc::channel();
        let sink: Arc<dyn ConnectionSink> = Arc::new(ChannelSink(Mutex::new(tx)));
        let err = fleet
            .binder()
            .bind(&ProviderIdentity::new("x", "Y"), sink)
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unreachable(_)));
    }

    // -----------------------------------------------------------------------
    // Ticker
    // -----------------------------------------------------------------------

    #[test]
    fn test_ticker_pushes_until_stopped() {
        let fleet = SimulatedFleet::new(&[single(0)]);
        let callback = Arc::new(CountingCallback(Mutex::new(Vec::new())));
        fleet.providers()[0]
            .register_listener(callback.clone())
            .unwrap();

        let mut ticker = fleet.start_ticker(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(60));
        ticker.stop();
        let seen = callback.0.lock().unwrap().len();
        assert!(seen > 0);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(callback.0.lock().unwrap().len(), seen);
    }
}
