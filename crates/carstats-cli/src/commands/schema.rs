use std::time::Duration;

use carstats_core::Config;

pub fn run(config: &Config, wait_ms: u64) {
    let fleet = super::make_fleet(config);
    let client = fleet.client(config.client.clone());
    client.start();

    let connected = super::wait_for_connections(&client, Duration::from_millis(wait_ms));
    let total = client.provider_statuses().len();
    if connected < total {
        log::warn!("only {connected}/{total} providers connected");
    }

    let schema = client.get_schema();
    match serde_json::to_string_pretty(schema.as_ref()) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Error encoding schema: {e}"),
    }
    client.stop();
}
