//! In-memory request log backing the statistics feed.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};
use lobby_session::{PathStatistics, StatsError, StatsSource};
use metrics::{counter, histogram};
use parking_lot::Mutex;
use tracing::debug;

use crate::metrics::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

/// One served request.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestRecord {
    /// Route template, or the raw path when no route matched.
    pub path: String,
    /// Response status code.
    pub status: u16,
    /// Time to produce the response.
    pub latency: Duration,
    /// When the response was produced.
    pub at: DateTime<Utc>,
}

/// Bounded log of recent requests; the oldest entries fall off first.
pub struct RequestLog {
    entries: Mutex<VecDeque<RequestRecord>>,
    capacity: usize,
}

impl RequestLog {
    /// Log keeping at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Append a record, evicting the oldest one when full.
    pub fn record(&self, record: RequestRecord) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            let _ = entries.pop_front();
        }
        entries.push_back(record);
    }

    /// Records currently held.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct Tally {
    count: u64,
    latency_ms: f64,
    client_errors: u64,
    server_errors: u64,
}

impl StatsSource for RequestLog {
    /// Per-path figures for records in `(from, to]`, busiest path first.
    fn statistics(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<PathStatistics>, StatsError> {
        let entries = self.entries.lock();
        let mut by_path: HashMap<&str, Tally> = HashMap::new();
        for record in entries.iter().filter(|r| r.at > from && r.at <= to) {
            let tally = by_path.entry(record.path.as_str()).or_default();
            tally.count += 1;
            tally.latency_ms += record.latency.as_secs_f64() * 1000.0;
            match record.status {
                400..=499 => tally.client_errors += 1,
                500.. => tally.server_errors += 1,
                _ => {}
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let mut stats: Vec<PathStatistics> = by_path
            .into_iter()
            .map(|(path, t)| PathStatistics {
                path: path.to_string(),
                request_count: t.count,
                average_latency_ms: t.latency_ms / t.count as f64,
                client_error_count: t.client_errors,
                server_error_count: t.server_errors,
            })
            .collect();
        stats.sort_by(|a, b| b.request_count.cmp(&a.request_count).then_with(|| a.path.cmp(&b.path)));
        Ok(stats)
    }
}

/// Middleware recording every request into the log.
pub async fn track_requests(State(log): State<Arc<RequestLog>>, req: Request, next: Next) -> Response {
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| req.uri().path().to_string(), |p| p.as_str().to_string());
    let started = Instant::now();

    let response = next.run(req).await;

    let latency = started.elapsed();
    let status = response.status().as_u16();
    counter!(HTTP_REQUESTS_TOTAL, "status" => status_class(status)).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS).record(latency.as_secs_f64());
    debug!(%path, status, latency_ms = latency.as_millis(), "request served");

    log.record(RequestRecord {
        path,
        status,
        latency,
        at: Utc::now(),
    });
    response
}

fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}
