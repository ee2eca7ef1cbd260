//! Interval-driven recurring action with adjustable cadence.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Interval used when a task is created with a zero interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// The action a [`PeriodicTask`] runs on every tick.
pub type Action = Arc<dyn Fn() + Send + Sync>;

/// Runs an action on a timer task until stopped.
///
/// The action runs on the timer task itself, so [`stop`](Self::stop)
/// returning means no firing is in flight and none will follow. Dropping the
/// task also stops the loop, without waiting for it.
pub struct PeriodicTask {
    action: Action,
    interval: Duration,
    updates_tx: mpsc::Sender<Duration>,
    updates_rx: Option<mpsc::Receiver<Duration>>,
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Create a stopped task. A zero `interval` falls back to
    /// [`DEFAULT_INTERVAL`].
    pub fn new(action: Action, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            warn!(default = ?DEFAULT_INTERVAL, "zero initial interval, using default");
            DEFAULT_INTERVAL
        } else {
            interval
        };
        let (updates_tx, updates_rx) = mpsc::channel(1);
        Self {
            action,
            interval,
            updates_tx,
            updates_rx: Some(updates_rx),
            stop: CancellationToken::new(),
            handle: None,
        }
    }

    /// Launch the timer loop. The first firing is one interval from now.
    ///
    /// Only the first call has any effect.
    pub fn start(&mut self) {
        let Some(updates) = self.updates_rx.take() else {
            warn!("periodic task already started");
            return;
        };
        info!(interval = ?self.interval, "starting periodic task");
        let first = Instant::now() + self.interval;
        self.handle = Some(tokio::spawn(run(
            Arc::clone(&self.action),
            self.interval,
            first,
            updates,
            self.stop.clone(),
        )));
    }

    /// Request a new interval without waiting.
    ///
    /// Dropped with a warning if an earlier request has not been picked up
    /// yet. A zero interval is ignored. Once applied, the next firing is one
    /// full new interval later.
    pub fn update_interval(&self, interval: Duration) {
        if interval.is_zero() {
            warn!("ignoring zero interval update");
            return;
        }
        match self.updates_tx.try_send(interval) {
            Ok(()) => debug!(?interval, "interval update queued"),
            Err(TrySendError::Full(_)) => warn!(?interval, "interval update pending, dropping request"),
            Err(TrySendError::Closed(_)) => debug!(?interval, "periodic task stopped, dropping update"),
        }
    }

    /// Whether the timer loop is running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the loop and wait for it to exit.
    pub async fn stop(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "periodic task ended abnormally");
            }
            debug!("periodic task stopped");
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn run(
    action: Action,
    mut interval: Duration,
    first: Instant,
    mut updates: mpsc::Receiver<Duration>,
    stop: CancellationToken,
) {
    let mut ticker = interval_at(first, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            Some(next) = updates.recv() => {
                if next != interval {
                    interval = next;
                    ticker = interval_at(Instant::now() + next, next);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    debug!(?interval, "interval updated");
                }
            }
            _ = ticker.tick() => action(),
        }
    }
}
