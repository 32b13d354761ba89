//! Bounded provider calls.
//!
//! Each call runs on its own short-lived thread so an unresponsive provider
//! costs the caller at most `timeout`. A provider that answers late is
//! simply ignored; its thread finishes on its own. Panics raised inside a
//! provider implementation are contained and reported as protocol errors.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::error::ProviderError;
use crate::provider::ProviderIdentity;

fn spawn_call<T, F>(
    identity: &ProviderIdentity,
    call: F,
) -> Result<mpsc::Receiver<Result<T, ProviderError>>, ProviderError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProviderError> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    std::thread::Builder::new()
        .name(format!("carstats-rpc:{identity}"))
        .spawn(move || {
            let result = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(call)) {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Malformed("provider call panicked".into())),
            };
            // The caller may have given up already.
            let _ = tx.send(result);
        })
        .map_err(|e| ProviderError::Unreachable(format!("cannot spawn rpc thread: {e}")))?;
    Ok(rx)
}

fn wait_until<T>(
    rx: &mpsc::Receiver<Result<T, ProviderError>>,
    deadline: Instant,
    timeout: Duration,
) -> Result<T, ProviderError> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(remaining) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(ProviderError::Timeout(timeout)),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(ProviderError::Unreachable(
            "rpc thread ended without a reply".into(),
        )),
    }
}

/// Run one provider call with an upper bound on how long the caller waits.
pub fn call_with_timeout<T, F>(
    identity: &ProviderIdentity,
    timeout: Duration,
    call: F,
) -> Result<T, ProviderError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProviderError> + Send + 'static,
{
    let deadline = Instant::now() + timeout;
    let rx = spawn_call(identity, call)?;
    wait_until(&rx, deadline, timeout)
}

/// Run one call per provider in parallel under a shared deadline.
///
/// Results come back in input order, one per provider, whatever happened to
/// the others.
pub fn fan_out<T, F>(
    calls: Vec<(ProviderIdentity, F)>,
    timeout: Duration,
) -> Vec<(ProviderIdentity, Result<T, ProviderError>)>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProviderError> + Send + 'static,
{
    let deadline = Instant::now() + timeout;
    let pending: Vec<_> = calls
        .into_iter()
        .map(|(identity, call)| {
            let rx = spawn_call(&identity, call);
            (identity, rx)
        })
        .collect();

    pending
        .into_iter()
        .map(|(identity, rx)| {
            let result = rx.and_then(|rx| wait_until(&rx, deadline, timeout));
            (identity, result)
        })
        .collect()
}
