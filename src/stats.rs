//! Online latency statistics, one record per peer.
//!
//! Aggregates are folded in with Welford's single-pass algorithm so no sample
//! history is retained. The canonical unit is nanoseconds; conversion to
//! milliseconds happens only at the reporting boundary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::report::LatencyReport;

/// Running latency aggregate for a single peer.
///
/// A zero-duration update is the timeout sentinel: it counts as a delivery
/// attempt and a timeout but contributes nothing to the distribution.
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    messages: u64,
    timeouts: u64,
    mean: f64,
    m2: f64,
    fastest: f64,
    slowest: f64,
}

impl RunningStats {
    /// Fold one measurement into the aggregate.
    pub fn update(&mut self, latency: Duration) {
        self.messages += 1;
        if latency.is_zero() {
            self.timeouts += 1;
            return;
        }

        let value = latency.as_nanos() as f64;
        let n = (self.messages - self.timeouts) as f64;
        let delta = value - self.mean;
        self.mean += delta / n;
        self.m2 += delta * (value - self.mean);

        if self.fastest == 0.0 || value < self.fastest {
            self.fastest = value;
        }
        if value > self.slowest {
            self.slowest = value;
        }
    }

    /// Delivery attempts, timeouts included.
    pub fn messages(&self) -> u64 {
        self.messages
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    fn samples(&self) -> u64 {
        self.messages - self.timeouts
    }

    /// Mean latency in nanoseconds, zero with no successful samples.
    pub fn mean(&self) -> f64 {
        if self.samples() == 0 { 0.0 } else { self.mean }
    }

    /// Sample variance in ns², zero with fewer than two successful samples.
    pub fn variance(&self) -> f64 {
        if self.samples() < 2 {
            0.0
        } else {
            self.m2 / (self.samples() - 1) as f64
        }
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn fastest(&self) -> f64 {
        self.fastest
    }

    pub fn slowest(&self) -> f64 {
        self.slowest
    }

    pub fn range(&self) -> f64 {
        self.slowest - self.fastest
    }
}

/// Thread-safe map from peer hostname to its running statistics.
///
/// Entries are created lazily on first reference and never removed. The map
/// lock is held only to look up or insert an entry; each record has its own
/// mutex so concurrent updates for the same peer serialize without blocking
/// updates for other peers.
#[derive(Debug, Default)]
pub struct StatsTable {
    peers: RwLock<HashMap<String, Arc<Mutex<RunningStats>>>>,
}

impl StatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, host: &str) -> Arc<Mutex<RunningStats>> {
        if let Some(entry) = self.peers.read().unwrap().get(host) {
            return entry.clone();
        }
        let mut peers = self.peers.write().unwrap();
        peers.entry(host.to_string()).or_default().clone()
    }

    /// Next ping sequence number for the host: one more than the delivery
    /// attempts recorded so far, so an unknown host starts at 1. Advisory
    /// only; the read here and the later [`StatsTable::record`] are separate
    /// critical sections, so two in-flight probes to the same host can read
    /// the same value.
    pub fn next_sequence(&self, host: &str) -> u64 {
        let entry = self.entry(host);
        let stats = entry.lock().unwrap();
        stats.messages() + 1
    }

    /// Record one probe result for the host. Zero duration records a timeout.
    pub fn record(&self, host: &str, latency: Duration) {
        let entry = self.entry(host);
        entry.lock().unwrap().update(latency);
    }

    /// Aggregate report for one host, in milliseconds.
    pub fn report(&self, host: &str) -> LatencyReport {
        let entry = self.entry(host);
        let stats = entry.lock().unwrap();
        LatencyReport::from_stats(host, &stats)
    }

    /// Point-in-time reports for every known host. The map lock is dropped
    /// before any record lock is taken, so producers are never blocked for
    /// the duration of the whole snapshot.
    pub fn snapshot(&self) -> HashMap<String, LatencyReport> {
        let entries: Vec<(String, Arc<Mutex<RunningStats>>)> = {
            let peers = self.peers.read().unwrap();
            peers
                .iter()
                .map(|(host, entry)| (host.clone(), entry.clone()))
                .collect()
        };

        entries
            .into_iter()
            .map(|(host, entry)| {
                let report = LatencyReport::from_stats(&host, &entry.lock().unwrap());
                (host, report)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    /// Two-pass mean and sample variance over the same values, in ns.
    fn batch_stats(values: &[Duration]) -> (f64, f64) {
        let samples: Vec<f64> = values.iter().map(|d| d.as_nanos() as f64).collect();
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let variance = if samples.len() < 2 {
            0.0
        } else {
            samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (samples.len() - 1) as f64
        };
        (mean, variance)
    }

    #[test]
    fn online_stats_match_two_pass_computation() {
        let values = [
            millis(3),
            millis(5),
            millis(7),
            millis(11),
            millis(13),
            Duration::from_micros(8420),
            Duration::from_micros(150),
        ];

        let mut stats = RunningStats::default();
        for value in &values {
            stats.update(*value);
        }
        let (mean, variance) = batch_stats(&values);

        assert!((stats.mean() - mean).abs() / mean < 1e-9);
        assert!((stats.variance() - variance).abs() / variance < 1e-9);
    }

    #[test]
    fn timeouts_are_tallied_but_excluded_from_distribution() {
        let mut stats = RunningStats::default();
        stats.update(millis(10));
        stats.update(millis(20));
        let mean = stats.mean();
        let variance = stats.variance();

        stats.update(Duration::ZERO);

        assert_eq!(stats.messages(), 3);
        assert_eq!(stats.timeouts(), 1);
        assert_eq!(stats.mean(), mean);
        assert_eq!(stats.variance(), variance);
        assert_eq!(stats.fastest(), millis(10).as_nanos() as f64);
        assert_eq!(stats.slowest(), millis(20).as_nanos() as f64);
    }

    #[test]
    fn empty_record_reports_zeroes() {
        let stats = RunningStats::default();
        assert_eq!(stats.mean(), 0.0);
        assert_eq!(stats.variance(), 0.0);
        assert_eq!(stats.stddev(), 0.0);
        assert_eq!(stats.range(), 0.0);
    }

    #[test]
    fn next_sequence_starts_at_one_and_counts_attempts() {
        let table = StatsTable::new();
        assert_eq!(table.next_sequence("alpha"), 1);

        table.record("alpha", millis(5));
        assert_eq!(table.next_sequence("alpha"), 2);

        // Timeouts are delivery attempts too.
        table.record("alpha", Duration::ZERO);
        assert_eq!(table.next_sequence("alpha"), 3);

        assert_eq!(table.next_sequence("beta"), 1);
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        let table = Arc::new(StatsTable::new());
        let threads: u64 = 8;
        let per_thread: u64 = 100;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let table = table.clone();
                std::thread::spawn(move || {
                    for _ in 0..per_thread {
                        table.record("alpha", millis(1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let report = table.report("alpha");
        assert_eq!(report.messages, threads * per_thread);
        assert_eq!(report.timeouts, 0);
    }

    #[test]
    fn report_converts_to_milliseconds() {
        let table = StatsTable::new();
        table.record("alpha", millis(10));
        table.record("alpha", millis(20));
        table.record("alpha", Duration::ZERO);

        let report = table.report("alpha");
        assert_eq!(report.messages, 3);
        assert_eq!(report.timeouts, 1);
        assert_eq!(report.fastest, 10.0);
        assert_eq!(report.slowest, 20.0);
        assert_eq!(report.mean, 15.0);
        assert_eq!(report.range, 10.0);
    }

    #[test]
    fn snapshot_covers_every_known_peer() {
        let table = StatsTable::new();
        table.record("alpha", millis(10));
        table.record("beta", Duration::ZERO);

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["alpha"].messages, 1);
        assert_eq!(snapshot["beta"].timeouts, 1);
    }
}
