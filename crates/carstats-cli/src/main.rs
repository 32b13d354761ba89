//! CLI for carstats — one merged telemetry stream out of many providers.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "carstats")]
#[command(about = "carstats — merge live vehicle telemetry from many providers")]
#[command(version = carstats_core::VERSION)]
struct Cli {
    /// JSON config file (client timeouts, monitor thresholds, simulated providers).
    /// Without one the built-in demo fleet is used.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List discovered providers in priority order
    Providers,

    /// Connect to every provider and print the merged schema with field owners as JSON
    Schema {
        /// How long to wait for providers to connect
        #[arg(long, default_value = "2000")]
        wait_ms: u64,
    },

    /// Print every pushed batch and monitor alert until Ctrl+C
    Watch {
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Simulated provider tick period
        #[arg(long, default_value = "500")]
        tick_ms: u64,
    },

    /// Print the merged measurements every interval
    Poll {
        /// Poll period (defaults to client.poll_interval_ms from the config)
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Number of snapshots to print
        #[arg(long, default_value = "10")]
        count: usize,

        /// Also deliver each poll to listeners as a merged event
        #[arg(long)]
        dispatch: bool,
    },

    /// Ask every provider whether it needs permissions and request them
    Permissions {
        /// How long to wait for every provider to answer
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,
    },

    /// Start a session and serve it over HTTP
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(long, default_value = "8042")]
        port: u16,

        /// Simulated provider tick period
        #[arg(long, default_value = "500")]
        tick_ms: u64,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref());

    match cli.command {
        Commands::Providers => commands::providers::run(&config),
        Commands::Schema { wait_ms } => commands::schema::run(&config, wait_ms),
        Commands::Watch { duration, tick_ms } => commands::watch::run(&config, duration, tick_ms),
        Commands::Poll {
            interval_ms,
            count,
            dispatch,
        } => commands::poll::run(&config, interval_ms, count, dispatch),
        Commands::Permissions { timeout_ms } => commands::permissions::run(&config, timeout_ms),
        Commands::Serve {
            host,
            port,
            tick_ms,
        } => commands::server::run(&config, &host, port, tick_ms),
    }
}
