use crate::queue::task_queue::TaskQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls
/// back to `info`. Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Lightweight rolling counters used to derive runtime metrics.
#[derive(Default, Debug)]
pub struct Telemetry {
    units_succeeded: AtomicU64,
    units_skipped_existing: AtomicU64,
    units_deferred: AtomicU64,
    units_failed: AtomicU64,
    tasks_expired: AtomicU64,
    jobs_complete: AtomicU64,
    jobs_partial_failure: AtomicU64,
    jobs_failed: AtomicU64,
}

impl Telemetry {
    pub fn record_unit_succeeded(&self) {
        self.units_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unit_skipped_existing(&self) {
        self.units_skipped_existing.fetch_add(1, Ordering::Relaxed);
    }

    /// A unit deferred because its lease was held elsewhere.
    pub fn record_unit_deferred(&self) {
        self.units_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unit_failed(&self) {
        self.units_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// An expired task also counts as a failed unit.
    pub fn record_task_expired(&self) {
        self.tasks_expired.fetch_add(1, Ordering::Relaxed);
        self.units_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_complete(&self) {
        self.jobs_complete.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_partial_failure(&self) {
        self.jobs_partial_failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn units_succeeded(&self) -> u64 {
        self.units_succeeded.load(Ordering::Relaxed)
    }

    pub fn units_deferred(&self) -> u64 {
        self.units_deferred.load(Ordering::Relaxed)
    }

    pub fn tasks_expired(&self) -> u64 {
        self.tasks_expired.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            units_succeeded: self.units_succeeded.load(Ordering::Relaxed),
            units_skipped_existing: self.units_skipped_existing.load(Ordering::Relaxed),
            units_deferred: self.units_deferred.load(Ordering::Relaxed),
            units_failed: self.units_failed.load(Ordering::Relaxed),
            tasks_expired: self.tasks_expired.load(Ordering::Relaxed),
            jobs_complete: self.jobs_complete.load(Ordering::Relaxed),
            jobs_partial_failure: self.jobs_partial_failure.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct TelemetrySnapshot {
    pub units_succeeded: u64,
    pub units_skipped_existing: u64,
    pub units_deferred: u64,
    pub units_failed: u64,
    pub tasks_expired: u64,
    pub jobs_complete: u64,
    pub jobs_partial_failure: u64,
    pub jobs_failed: u64,
}

impl TelemetrySnapshot {
    fn units_terminal(&self) -> u64 {
        self.units_succeeded + self.units_skipped_existing + self.units_deferred + self.units_failed
    }
}

/// Spawns a background task that periodically logs unit throughput, job
/// outcomes, and queue depth.
pub fn spawn_metrics_reporter<T: Send + 'static>(
    telemetry: Arc<Telemetry>,
    queue: Arc<TaskQueue<T>>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "geopack::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let units_delta = current
                        .units_terminal()
                        .saturating_sub(last_snapshot.units_terminal());
                    let queued_tasks = queue.len().await;

                    tracing::info!(
                        target: "geopack::metrics",
                        units_delta,
                        units_succeeded = current.units_succeeded,
                        units_skipped_existing = current.units_skipped_existing,
                        units_deferred = current.units_deferred,
                        units_failed = current.units_failed,
                        tasks_expired = current.tasks_expired,
                        jobs_complete = current.jobs_complete,
                        jobs_partial_failure = current.jobs_partial_failure,
                        jobs_failed = current.jobs_failed,
                        queued_tasks,
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current;
                }
            }
        }
    })
}
