//! Wire shapes exchanged with the management service: the neighbor directory
//! response, single-sample latency records, and aggregate reports. All
//! latency fields are floats in milliseconds.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stats::RunningStats;

const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// A host the directory tells us to measure latency against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neighbor {
    #[serde(rename = "name")]
    pub hostname: String,
    #[serde(default)]
    pub state: String,
    #[serde(rename = "ip_address")]
    pub ip_addr: String,
    #[serde(default)]
    pub domain: String,
}

/// Directory response: the caller's own identity plus the hosts to probe.
/// An empty target list simply means there is nothing to probe this cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NeighborsResponse {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub targets: Vec<Neighbor>,
}

/// Record of a single ping, posted to the service after each probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySample {
    pub target: String,
    pub latency: f64,
    pub timeout: bool,
}

impl LatencySample {
    /// Build a sample from a measured duration; zero is the timeout sentinel.
    pub fn new(target: &str, latency: Duration) -> Self {
        if latency.is_zero() {
            Self {
                target: target.to_string(),
                latency: 0.0,
                timeout: true,
            }
        } else {
            Self {
                target: target.to_string(),
                latency: latency.as_nanos() as f64 / NANOS_PER_MILLI,
                timeout: false,
            }
        }
    }
}

/// Aggregate latency distribution for one peer, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyReport {
    pub target: String,
    pub messages: u64,
    pub timeouts: u64,
    pub fastest: f64,
    pub slowest: f64,
    pub mean: f64,
    pub stddev: f64,
    pub variance: f64,
    pub range: f64,
}

impl LatencyReport {
    /// Convert a running aggregate (nanoseconds) into a wire report (ms).
    pub fn from_stats(target: &str, stats: &RunningStats) -> Self {
        Self {
            target: target.to_string(),
            messages: stats.messages(),
            timeouts: stats.timeouts(),
            fastest: stats.fastest() / NANOS_PER_MILLI,
            slowest: stats.slowest() / NANOS_PER_MILLI,
            mean: stats.mean() / NANOS_PER_MILLI,
            stddev: stats.stddev() / NANOS_PER_MILLI,
            variance: stats.variance() / (NANOS_PER_MILLI * NANOS_PER_MILLI),
            range: stats.range() / NANOS_PER_MILLI,
        }
    }
}

/// Point-in-time view of every peer's aggregate, for on-demand display.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub updated: DateTime<Utc>,
    pub peers: HashMap<String, LatencyReport>,
}

impl Snapshot {
    pub fn new(peers: HashMap<String, LatencyReport>) -> Self {
        Self {
            updated: Utc::now(),
            peers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_marks_zero_duration_as_timeout() {
        let sample = LatencySample::new("alpha", Duration::ZERO);
        assert!(sample.timeout);
        assert_eq!(sample.latency, 0.0);

        let sample = LatencySample::new("alpha", Duration::from_millis(12));
        assert!(!sample.timeout);
        assert_eq!(sample.latency, 12.0);
    }

    #[test]
    fn neighbors_response_decodes_directory_fields() {
        let body = r#"{
            "source": "local",
            "targets": [
                {"name": "alpha", "state": "ready", "ip_address": "10.0.0.5", "domain": "alpha.example.com"},
                {"name": "beta", "state": "", "ip_address": "10.0.0.6:9000", "domain": ""}
            ]
        }"#;

        let response: NeighborsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.source, "local");
        assert_eq!(response.targets.len(), 2);
        assert_eq!(response.targets[0].hostname, "alpha");
        assert_eq!(response.targets[0].ip_addr, "10.0.0.5");
        assert_eq!(response.targets[1].ip_addr, "10.0.0.6:9000");
    }

    #[test]
    fn sample_serializes_with_wire_field_names() {
        let sample = LatencySample::new("alpha", Duration::from_millis(5));
        let value = serde_json::to_value(&sample).unwrap();
        assert_eq!(value["target"], "alpha");
        assert_eq!(value["latency"], 5.0);
        assert_eq!(value["timeout"], false);
    }

    #[test]
    fn report_serializes_aggregate_fields() {
        let mut stats = RunningStats::default();
        stats.update(Duration::from_millis(10));
        stats.update(Duration::from_millis(20));

        let value = serde_json::to_value(LatencyReport::from_stats("alpha", &stats)).unwrap();
        assert_eq!(value["messages"], 2);
        assert_eq!(value["timeouts"], 0);
        assert_eq!(value["fastest"], 10.0);
        assert_eq!(value["slowest"], 20.0);
        assert_eq!(value["mean"], 15.0);
        assert_eq!(value["range"], 10.0);
    }
}
