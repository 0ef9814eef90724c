//! peerbeat is a fleet-health client. It periodically reports liveness to a
//! central management service and measures pairwise network latency between
//! cooperating hosts with a minimal ping/echo protocol, keeping an online
//! per-peer latency aggregate that never retains raw samples.

pub mod client;
pub mod config;
pub mod echo;
pub mod error;
pub mod probe;
pub mod report;
pub mod schedule;
pub mod stats;

pub use client::Client;
pub use config::AppConfig;
pub use error::{Error, Result};
