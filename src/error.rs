use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the client. None of these are fatal to the process: probe
/// failures are recorded as timeouts and logged, service failures skip the
/// current cycle.
#[derive(Debug, Error)]
pub enum Error {
    #[error("could not connect to '{addr}': {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not send ping to {addr}: {reason}")]
    Ping { addr: String, reason: String },

    #[error("ping to {addr} timed out after {timeout:?}")]
    PingTimeout { addr: String, timeout: Duration },

    #[error("invalid echo frame length {0}")]
    Frame(u32),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service returned {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("could not parse service response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("probe task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
