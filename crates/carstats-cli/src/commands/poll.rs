use std::sync::Arc;
use std::time::Duration;

use carstats_core::{Config, MeasurementPoller, PollMode};

pub fn run(config: &Config, interval_ms: Option<u64>, count: usize, dispatch: bool) {
    let fleet = super::make_fleet(config);
    let client = fleet.client(config.client.clone());
    client.start();
    super::wait_for_connections(&client, config.client.rpc_timeout());

    let interval = interval_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.client.poll_interval());
    let mode = if dispatch {
        PollMode::Dispatch
    } else {
        PollMode::Cache
    };

    let mut ticker = fleet.start_ticker(interval);
    let mut poller = MeasurementPoller::start(Arc::clone(&client), interval, mode);

    for i in 0..count {
        std::thread::sleep(interval);
        let values = poller.last_measurements();
        println!(
            "Poll {}/{count} ({} fields, {} polls so far)",
            i + 1,
            values.len(),
            poller.poll_count()
        );
        for line in super::format_measurements(&values) {
            println!("    {line}");
        }
    }

    poller.stop();
    ticker.stop();
    client.stop();
}
