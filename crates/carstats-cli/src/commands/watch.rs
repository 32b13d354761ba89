use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use carstats_core::{
    Alert, AlertKind, AlertSink, BoostPressureMonitor, CarStatsListener, Config, ListenerResult,
    Measurements, OilTempMonitor, ProviderIdentity,
};

/// Prints every delivered batch.
struct PrintListener;

impl CarStatsListener for PrintListener {
    fn name(&self) -> &str {
        "watch-printer"
    }

    fn on_new_measurements(
        &self,
        provider: &ProviderIdentity,
        timestamp: SystemTime,
        values: &Measurements,
    ) -> ListenerResult {
        let millis = timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        println!("[{millis}] {provider} ({} values)", values.len());
        for line in super::format_measurements(values) {
            println!("    {line}");
        }
        Ok(())
    }

    fn on_schema_changed(&self) -> ListenerResult {
        println!("-- schema changed --");
        Ok(())
    }
}

struct PrintAlertSink;

impl AlertSink for PrintAlertSink {
    fn raise(&self, alert: Alert) {
        println!(">> ALERT {}: {}", alert.title, alert.text);
    }

    fn dismiss(&self, kind: AlertKind) {
        println!(">> dismissed {kind}");
    }
}

pub fn run(config: &Config, duration: Option<u64>, tick_ms: u64) {
    let fleet = super::make_fleet(config);
    let client = fleet.client(config.client.clone());

    let sink: Arc<dyn AlertSink> = Arc::new(PrintAlertSink);
    let oil = Arc::new(OilTempMonitor::new(
        config.monitors.oil_temp.clone(),
        Arc::clone(&sink),
    ));
    let boost = Arc::new(BoostPressureMonitor::new(
        config.monitors.boost.clone(),
        sink,
    ));
    client.register_listener(Arc::new(PrintListener));
    client.register_listener(oil.clone());
    client.register_listener(boost.clone());

    client.start();
    let connected = super::wait_for_connections(&client, config.client.rpc_timeout());
    println!(
        "Watching {connected}/{} providers ({} merged fields). Ctrl+C to stop.",
        client.provider_statuses().len(),
        client.get_schema().len()
    );
    println!();

    let mut ticker = fleet.start_ticker(Duration::from_millis(tick_ms));

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: could not install Ctrl+C handler: {e}");
    }

    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    ticker.stop();
    client.stop();
    oil.close();
    boost.close();
    println!();
    println!("Oil temperature: {:?}, boost: {:?}", oil.state(), boost.state());
}
