//! The fleet-health client: reports liveness to the management service on a
//! jittered schedule and, while active, measures latency to every neighbor
//! the directory hands back.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use log::{debug, info, warn};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::echo::Server;
use crate::error::{Error, Result};
use crate::probe::Prober;
use crate::report::{LatencySample, NeighborsResponse, Snapshot};
use crate::schedule::Schedule;
use crate::stats::StatsTable;

pub const HEARTBEAT_ENDPOINT: &str = "/api/heartbeat";
pub const LATENCY_ENDPOINT: &str = "/api/latency";

#[derive(Debug, Default, Deserialize)]
struct HeartbeatResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    active: bool,
}

pub struct Client {
    config: AppConfig,
    http: reqwest::Client,
    stats: Arc<StatsTable>,
    prober: Prober,
    error_tx: mpsc::UnboundedSender<Error>,
    errors: Option<mpsc::UnboundedReceiver<Error>>,
}

impl Client {
    pub fn new(config: AppConfig) -> Result<Self> {
        let mut key = HeaderValue::from_str(&config.api_key)
            .map_err(|_| Error::Config("API key is not a valid header value".to_string()))?;
        key.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert("X-Api-Key", key);

        let http = reqwest::Client::builder()
            .timeout(config.api_timeout())
            .default_headers(headers)
            .build()?;

        let stats = Arc::new(StatsTable::new());
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let prober = Prober::new(
            stats.clone(),
            error_tx.clone(),
            config.ping_timeout(),
            config.max_concurrency,
        );

        Ok(Self {
            config,
            http,
            stats,
            prober,
            error_tx,
            errors: Some(error_rx),
        })
    }

    /// Start the echo server and drive the heartbeat loop until ctrl-c.
    /// Shutdown stops scheduling new cycles; in-flight probes are not waited
    /// for beyond the current cycle.
    pub async fn run(mut self) -> Result<()> {
        let hostname = self.config.hostname();
        let server = Server::new(&self.config.bind_addr, &hostname);
        let replied = server.counter();
        let listener = server.bind().await?;
        tokio::spawn(server.run(listener));

        // Probe and service failures are non-fatal; drain them into the log.
        if let Some(mut errors) = self.errors.take() {
            tokio::spawn(async move {
                while let Some(err) = errors.recv().await {
                    warn!("{err}");
                }
            });
        }

        let schedule = Schedule::new(self.config.interval(), self.config.jitter());
        info!(
            "heartbeat every {:?} (±{:?} jitter) to {}",
            self.config.interval(),
            self.config.jitter(),
            self.config.url
        );

        loop {
            self.beat().await;
            let delay = schedule.next_delay();
            debug!("next heartbeat in {delay:?}");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        info!("shutting down; replied to {} pings", replied.load(Ordering::Relaxed));
        Ok(())
    }

    /// One heartbeat cycle: report liveness, and when the service says this
    /// host is active, run the latency measurements.
    async fn beat(&self) {
        match self.heartbeat().await {
            Ok(hb) if hb.success && hb.active => {
                self.latency(self.config.report_latency).await;
            }
            Ok(hb) => debug!("heartbeat success: {} active: {}", hb.success, hb.active),
            Err(err) => self.report_error(err),
        }
    }

    async fn heartbeat(&self) -> Result<HeartbeatResponse> {
        let body = json!({ "hostname": self.config.hostname() });
        let response = self.post(HEARTBEAT_ENDPOINT, &body).await?;
        Ok(response.json().await?)
    }

    /// Fetch the neighbor list from the directory. An empty response is not
    /// an error, just nothing to probe.
    pub async fn neighbors(&self) -> Result<NeighborsResponse> {
        let response = self.get(LATENCY_ENDPOINT).await?;
        Ok(response.json().await?)
    }

    /// Probe every neighbor once and, when `report` is set, post the
    /// resulting samples back to the service. A failure to fetch neighbors
    /// skips the cycle; a failure to report never loses the local aggregate.
    pub async fn latency(&self, report: bool) {
        let neighbors = match self.neighbors().await {
            Ok(neighbors) => neighbors,
            Err(err) => {
                self.report_error(err);
                return;
            }
        };
        if neighbors.source.is_empty() || neighbors.targets.is_empty() {
            debug!("no neighbors to probe this cycle");
            return;
        }

        let results = self.prober.probe(&neighbors.source, &neighbors.targets).await;

        if report {
            let samples: Vec<LatencySample> = results
                .iter()
                .map(|(target, latency)| LatencySample::new(target, *latency))
                .collect();
            if let Err(err) = self.post_samples(&samples).await {
                self.report_error(err);
            }
        }
    }

    /// On-demand measurement outside the schedule: `rounds` probe cycles
    /// against the current neighbor list.
    pub async fn send_pings(&self, rounds: u64) -> Result<()> {
        let neighbors = self.neighbors().await?;
        if neighbors.source.is_empty() || neighbors.targets.is_empty() {
            info!("no active neighbors to ping");
            return Ok(());
        }

        info!("sending {} pings to {} neighbors", rounds, neighbors.targets.len());
        self.prober
            .probe_rounds(&neighbors.source, &neighbors.targets, rounds)
            .await;
        Ok(())
    }

    /// Current latency aggregates for every known peer.
    pub fn metrics(&self) -> Snapshot {
        Snapshot::new(self.stats.snapshot())
    }

    async fn post_samples(&self, samples: &[LatencySample]) -> Result<()> {
        let response = self.post(LATENCY_ENDPOINT, samples).await?;
        let acks: Vec<serde_json::Value> = response.json().await?;
        debug!("updated latency statistics from {} pings", acks.len());
        Ok(())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.url.trim_end_matches('/'), path)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = self.endpoint(path);
        let response = self.http.get(&url).send().await?;
        check_status(response, &url)
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let url = self.endpoint(path);
        let response = self.http.post(&url).json(body).send().await?;
        check_status(response, &url)
    }

    fn report_error(&self, err: Error) {
        let _ = self.error_tx.send(err);
    }
}

fn check_status(response: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    debug!("{} {}", url, response.status());
    if response.status() != StatusCode::OK {
        return Err(Error::Status {
            status: response.status(),
            url: url.to_string(),
        });
    }
    Ok(response)
}
