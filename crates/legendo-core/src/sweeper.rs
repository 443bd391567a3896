//! Periodic removal of expired entries.
//!
//! Expiry is eventual: an entry becomes eligible once its age reaches
//! `max_age` and disappears on the next sweep. A read racing the sweeper may
//! still see an eligible entry.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::store::EntryStore;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub failed: usize,
}

/// One sweep cycle over `store`. Per-entry delete failures are logged and
/// counted; they never stop the cycle.
pub fn sweep_expired(store: &dyn EntryStore, max_age: Duration, now: Instant) -> SweepReport {
    let mut report = SweepReport::default();
    for item in store.scan() {
        report.scanned += 1;
        if now.saturating_duration_since(item.created_at) < max_age {
            continue;
        }
        match store.delete(&item.id) {
            Ok(true) => report.removed += 1,
            // already gone between scan and delete
            Ok(false) => {}
            Err(err) => {
                warn!(id = %item.id, error = %err, "failed to delete expired entry");
                report.failed += 1;
            }
        }
    }
    report
}

/// Control handle for a running sweeper task. Dropping it stops the loop.
pub struct SweeperHandle {
    wake: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Run a cycle now instead of waiting for the interval.
    pub fn sweep_now(&self) {
        self.wake.notify_one();
    }

    pub fn signal_stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn stop(self) {
        self.signal_stop();
        let SweeperHandle { task, .. } = self;
        if let Err(err) = task.await {
            warn!(error = %err, "sweeper task ended abnormally");
        }
    }
}

/// Spawn the sweep loop on the current tokio runtime.
///
/// `on_report` is called after every cycle, including cycles that removed
/// nothing.
pub fn spawn_sweeper<F>(
    store: Arc<dyn EntryStore>,
    interval: Duration,
    max_age: Duration,
    on_report: F,
) -> SweeperHandle
where
    F: Fn(SweepReport) + Send + Sync + 'static,
{
    let wake = Arc::new(Notify::new());
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let wake_clone = wake.clone();

    let task = tokio::spawn(async move {
        info!(
            interval_ms = interval.as_millis() as u64,
            max_age_ms = max_age.as_millis() as u64,
            "sweeper started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = wake_clone.notified() => {
                    debug!("sweeper woken early");
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("sweeper shutting down");
                        return;
                    }
                }
            }

            if *shutdown_rx.borrow() {
                return;
            }

            let report = sweep_expired(store.as_ref(), max_age, Instant::now());
            debug!(
                scanned = report.scanned,
                removed = report.removed,
                failed = report.failed,
                "sweep cycle complete"
            );
            on_report(report);
        }
    });

    SweeperHandle {
        wake,
        shutdown_tx,
        task,
    }
}
