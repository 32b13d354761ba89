//! Error taxonomy for the aggregation core.
//!
//! Provider RPC failures and listener failures are caught where they happen,
//! logged with the offending provider or listener, and never escape a public
//! aggregation operation. Only configuration loading surfaces a `Result` to
//! callers.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Broad class of a failure, used for log context and health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// RPC to an unreachable or disconnected provider.
    Connectivity,
    /// Malformed or unexpected reply from a provider.
    Protocol,
    /// A registered local consumer failed during dispatch.
    Listener,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connectivity => write!(f, "connectivity"),
            Self::Protocol => write!(f, "protocol"),
            Self::Listener => write!(f, "listener"),
        }
    }
}

/// Failure of a single provider RPC.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("provider unreachable: {0}")]
    Unreachable(String),
    #[error("provider did not answer within {0:?}")]
    Timeout(Duration),
    #[error("malformed provider reply: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unreachable(_) | Self::Timeout(_) => ErrorKind::Connectivity,
            Self::Malformed(_) => ErrorKind::Protocol,
        }
    }
}

/// Error returned by a local listener callback.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type of every [`CarStatsListener`](crate::listener::CarStatsListener) callback.
pub type ListenerResult = Result<(), ListenerError>;

/// Configuration loading failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config value for '{field}': {message}")]
    Invalid { field: &'static str, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_kinds() {
        assert_eq!(
            ProviderError::Unreachable("gone".into()).kind(),
            ErrorKind::Connectivity
        );
        assert_eq!(
            ProviderError::Timeout(Duration::from_millis(5)).kind(),
            ErrorKind::Connectivity
        );
        assert_eq!(
            ProviderError::Malformed("bad map".into()).kind(),
            ErrorKind::Protocol
        );
    }

    #[test]
    fn test_error_display() {
        let err = ProviderError::Unreachable("binder died".into());
        assert_eq!(err.to_string(), "provider unreachable: binder died");
        assert_eq!(ErrorKind::Listener.to_string(), "listener");

        let err = ConfigError::Invalid {
            field: "client.rpc_timeout_ms",
            message: "must be greater than zero".into(),
        };
        assert!(err.to_string().contains("client.rpc_timeout_ms"));
    }
}
