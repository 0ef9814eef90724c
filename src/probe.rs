//! Concurrent latency prober: one echo probe per neighbor per cycle.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;

use crate::echo;
use crate::error::Error;
use crate::report::Neighbor;
use crate::stats::StatsTable;

/// Fans one ping out to every neighbor concurrently and feeds results into
/// the statistics table. Probe failures are recorded as timeout sentinels and
/// surfaced on the error channel; they never block or abort other probes.
pub struct Prober {
    stats: Arc<StatsTable>,
    errors: mpsc::UnboundedSender<Error>,
    ping_timeout: Duration,
    limiter: Option<Arc<Semaphore>>,
}

impl Prober {
    /// `max_concurrency` bounds the number of in-flight probes per cycle;
    /// `None` probes every neighbor at once, which is fine for small fleets.
    pub fn new(
        stats: Arc<StatsTable>,
        errors: mpsc::UnboundedSender<Error>,
        ping_timeout: Duration,
        max_concurrency: Option<usize>,
    ) -> Self {
        Self {
            stats,
            errors,
            ping_timeout,
            limiter: max_concurrency.map(|n| Arc::new(Semaphore::new(n.max(1)))),
        }
    }

    /// Probe every target once and return the measured latencies, with the
    /// zero-duration sentinel standing in for failed probes. Returns only
    /// after every spawned probe has completed; completion order across
    /// targets is unspecified.
    pub async fn probe(&self, source: &str, targets: &[Neighbor]) -> Vec<(String, Duration)> {
        debug!("probing {} neighbors from {}", targets.len(), source);

        let mut tasks = JoinSet::new();
        for target in targets {
            let stats = self.stats.clone();
            let errors = self.errors.clone();
            let limiter = self.limiter.clone();
            let timeout = self.ping_timeout;
            let source = source.to_string();
            let target = target.clone();

            tasks.spawn(async move {
                let _permit = match limiter {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };

                // The sequence read and the record below are separate
                // critical sections; sequence numbers are advisory.
                let sequence = stats.next_sequence(&target.hostname);
                let latency = match echo::send_ping(
                    &source,
                    &target.hostname,
                    &target.ip_addr,
                    sequence,
                    timeout,
                )
                .await
                {
                    Ok(latency) => latency,
                    Err(err) => {
                        let _ = errors.send(err);
                        Duration::ZERO
                    }
                };
                stats.record(&target.hostname, latency);
                (target.hostname, latency)
            });
        }

        let mut results = Vec::with_capacity(targets.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => {
                    let _ = self.errors.send(Error::Join(err));
                }
            }
        }
        results
    }

    /// Run `rounds` back-to-back probe cycles against the same target list,
    /// for on-demand measurement outside the heartbeat schedule.
    pub async fn probe_rounds(&self, source: &str, targets: &[Neighbor], rounds: u64) {
        for _ in 0..rounds {
            self.probe(source, targets).await;
        }
    }
}
