use std::time::Duration;

use carstats_core::{Config, ProbeOutcome, ProviderBinder, request_permissions};

pub fn run(config: &Config, timeout_ms: u64) {
    let fleet = super::make_fleet(config);
    let discovery = fleet.discovery();
    let binder: std::sync::Arc<dyn ProviderBinder> = fleet.binder();
    let timeout = Duration::from_millis(timeout_ms);

    let probe = request_permissions(discovery.as_ref(), binder, timeout);
    let answered = probe.wait(timeout);
    println!("{answered}/{} providers answered", probe.expected());
    println!();

    for (identity, outcome) in probe.outcomes() {
        let status = match outcome {
            ProbeOutcome::NotNeeded => "no permissions needed".to_string(),
            ProbeOutcome::Requested => "permissions requested".to_string(),
            ProbeOutcome::Failed(e) => format!("FAILED ({e})"),
        };
        println!("  {:<40} {status}", identity.to_string());
    }
}
