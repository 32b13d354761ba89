pub mod permissions;
pub mod poll;
pub mod providers;
pub mod schema;
pub mod server;
pub mod watch;

use std::path::Path;
use std::time::{Duration, Instant};

use carstats_core::{CarStatsClient, Config, ConnectionState, Measurements, SimulatedFleet};

/// Load the config file, or defaults when none was given. Exits on error.
pub fn load_config(path: Option<&Path>) -> Config {
    let Some(path) = path else {
        return Config::default();
    };
    match Config::load(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

/// Simulated fleet from the config, or the demo fleet if it lists no
/// providers.
pub fn make_fleet(config: &Config) -> SimulatedFleet {
    if config.providers.is_empty() {
        SimulatedFleet::demo()
    } else {
        SimulatedFleet::new(&config.providers)
    }
}

/// Wait until every provider is connected or `timeout` passes. Returns the
/// number of connected providers.
pub fn wait_for_connections(client: &CarStatsClient, timeout: Duration) -> usize {
    let deadline = Instant::now() + timeout;
    loop {
        let statuses = client.provider_statuses();
        let connected = statuses
            .iter()
            .filter(|s| s.state == ConnectionState::Connected)
            .count();
        if connected == statuses.len() || Instant::now() >= deadline {
            return connected;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// `key = value` lines, sorted by key.
pub fn format_measurements(values: &Measurements) -> Vec<String> {
    let mut keys: Vec<&String> = values.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|key| format!("{key:<24} {}", values[key]))
        .collect()
}
