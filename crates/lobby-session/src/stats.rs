//! Periodic request-statistics feed.
//!
//! A [`StatsFeed`] owns a [`PeriodicTask`] that, on every tick, asks a
//! [`StatsSource`] for per-path figures covering the window since the last
//! computation, aggregates them into [`RequestStatistics`] and broadcasts
//! the JSON to its hub. Clients can force a `refresh` or change the cadence
//! with `update_interval`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use lobby_core::ConnectionId;
use lobby_hub::{HubHandle, MessageProcessor, Peer, PeriodicTask, WeakHubHandle};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Failure to read statistics.
#[derive(Debug, Error)]
pub enum StatsError {
    /// The backing store could not be queried.
    #[error("statistics source unavailable: {0}")]
    Unavailable(String),
}

/// Where request figures come from.
pub trait StatsSource: Send + Sync + 'static {
    /// Per-path figures for requests in `(from, to]`.
    fn statistics(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<PathStatistics>, StatsError>;
}

/// Figures for one request path.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PathStatistics {
    /// Request path.
    pub path: String,
    /// Requests seen.
    pub request_count: u64,
    /// Mean latency in milliseconds.
    pub average_latency_ms: f64,
    /// Responses with a 4xx status.
    pub client_error_count: u64,
    /// Responses with a 5xx status.
    pub server_error_count: u64,
}

/// Aggregate over all paths, as sent to clients.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestStatistics {
    /// Requests seen.
    pub request_count: u64,
    /// Request-weighted mean latency in milliseconds.
    pub average_latency_ms: f64,
    /// Responses with a 4xx status.
    pub client_error_count: u64,
    /// Responses with a 5xx status.
    pub server_error_count: u64,
    /// Breakdown by path.
    pub requests_per_path: Vec<PathStatistics>,
}

impl RequestStatistics {
    /// Aggregate per-path figures. The mean latency is weighted by request
    /// count and is zero when there were no requests.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_paths(paths: Vec<PathStatistics>) -> Self {
        let mut total = Self::default();
        let mut latency_sum = 0.0;
        for p in &paths {
            total.request_count += p.request_count;
            total.client_error_count += p.client_error_count;
            total.server_error_count += p.server_error_count;
            latency_sum += p.average_latency_ms * p.request_count as f64;
        }
        if total.request_count > 0 {
            total.average_latency_ms = latency_sum / total.request_count as f64;
        }
        total.requests_per_path = paths;
        total
    }
}

#[derive(Deserialize)]
struct StatsMessage {
    action: String,
    #[serde(default)]
    time_interval_in_ms: i64,
}

struct Window {
    since: DateTime<Utc>,
    latest: Bytes,
}

/// Computes snapshots and pushes them to the hub.
struct Collector {
    source: Arc<dyn StatsSource>,
    hub: WeakHubHandle,
    window: Mutex<Window>,
}

impl Collector {
    /// Compute the window since the last refresh and broadcast it. The lock
    /// is held through the hand-off so snapshots reach the hub in order.
    fn refresh(&self) {
        let mut window = self.window.lock();
        let now = Utc::now();
        let paths = match self.source.statistics(window.since, now) {
            Ok(paths) => paths,
            Err(err) => {
                error!(hub_id = %self.hub.id(), error = %err, "failed to read statistics");
                return;
            }
        };
        let stats = RequestStatistics::from_paths(paths);
        let encoded = match serde_json::to_vec(&stats) {
            Ok(encoded) => Bytes::from(encoded),
            Err(err) => {
                error!(error = %err, "failed to encode statistics");
                return;
            }
        };
        window.since = now;
        window.latest = encoded.clone();

        debug!(hub_id = %self.hub.id(), requests = stats.request_count, "statistics refreshed");
        if !self.hub.broadcast(encoded) {
            debug!("stats hub is gone");
        }
    }

    /// Broadcast the latest snapshot again.
    fn rebroadcast(&self, hub: &HubHandle) {
        let window = self.window.lock();
        if let Err(err) = hub.broadcast(window.latest.clone()) {
            debug!(error = %err, "stats not broadcast");
        }
    }

    fn latest(&self) -> Bytes {
        self.window.lock().latest.clone()
    }
}

/// Processor broadcasting request statistics on an interval.
pub struct StatsFeed {
    collector: Arc<Collector>,
    task: Mutex<Option<PeriodicTask>>,
}

impl StatsFeed {
    /// Build the feed and start its timer. Must be called inside a tokio
    /// runtime; pair it with [`ConnectionHub::spawn_with`](lobby_hub::ConnectionHub::spawn_with).
    pub fn start(source: Arc<dyn StatsSource>, hub: WeakHubHandle, interval: Duration) -> Self {
        let empty = serde_json::to_vec(&RequestStatistics::default()).map(Bytes::from).unwrap_or_default();
        let collector = Arc::new(Collector {
            source,
            hub,
            window: Mutex::new(Window {
                since: Utc::now(),
                latest: empty,
            }),
        });
        let tick = Arc::clone(&collector);
        let mut task = PeriodicTask::new(Arc::new(move || tick.refresh()), interval);
        task.start();
        Self {
            collector,
            task: Mutex::new(Some(task)),
        }
    }
}

impl MessageProcessor for StatsFeed {
    fn handle_message(&self, sender: &ConnectionId, payload: &[u8], hub: &HubHandle) {
        let msg: StatsMessage = match serde_json::from_slice(payload) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(conn_id = %sender, error = %err, "dropping malformed stats message");
                return;
            }
        };

        match msg.action.as_str() {
            "refresh" => {
                self.collector.refresh();
                return;
            }
            "update_interval" => match u64::try_from(msg.time_interval_in_ms) {
                Ok(ms) if ms > 0 => {
                    if let Some(task) = self.task.lock().as_ref() {
                        task.update_interval(Duration::from_millis(ms));
                    }
                }
                _ => warn!(conn_id = %sender, value = msg.time_interval_in_ms, "ignoring non-positive interval"),
            },
            other => warn!(conn_id = %sender, action = other, "unknown stats action"),
        }

        self.collector.rebroadcast(hub);
    }

    fn update(&self, peer: &Peer) {
        if !peer.send(self.collector.latest()) {
            debug!(conn_id = %peer.id(), "stats snapshot not queued");
        }
    }

    fn closed(&self) {
        if let Some(mut task) = self.task.lock().take() {
            let _ = tokio::spawn(async move { task.stop().await });
        }
    }
}
