use std::time::Duration;

use carstats_core::Config;

pub fn run(config: &Config, host: &str, port: u16, tick_ms: u64) {
    let fleet = super::make_fleet(config);
    let client = fleet.client(config.client.clone());
    client.start();
    let connected = super::wait_for_connections(&client, config.client.rpc_timeout());
    let mut ticker = fleet.start_ticker(Duration::from_millis(tick_ms));

    println!("carstats server v{}", carstats_core::VERSION);
    println!(
        "  {connected}/{} providers connected, {} merged fields",
        client.provider_statuses().len(),
        client.get_schema().len()
    );
    println!("  http://{host}:{port}/");
    println!("  http://{host}:{port}/health");
    println!("  http://{host}:{port}/providers");
    println!("  http://{host}:{port}/schema");
    println!("  http://{host}:{port}/measurements");
    println!("  POST http://{host}:{port}/measurements/refresh");
    println!();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error starting runtime: {e}");
            std::process::exit(1);
        }
    };
    let result = rt.block_on(carstats_server::run_server(client.clone(), host, port));

    ticker.stop();
    client.stop();
    if let Err(e) = result {
        eprintln!("Server error: {e}");
        std::process::exit(1);
    }
}
