//! Run-scoped lifecycle for the orchestrator: cancellation wiring, the
//! metrics reporter, and the expired-lease sweeper.

use crate::lease::store::LeaseStore;
use crate::orchestrator::worker_pool::UnitTask;
use crate::queue::task_queue::TaskQueue;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::telemetry::{self, Telemetry};
use anyhow::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub(crate) struct LifecycleHandles {
    pub run_token: CancellationToken,
    fatal_handler: Arc<FatalErrorHandler>,
    metrics_handle: Option<JoinHandle<()>>,
    sweeper_handle: Option<JoinHandle<()>>,
}

pub(crate) struct LifecycleSpawnParams<'a> {
    pub shutdown_root: &'a CancellationToken,
    pub telemetry: Arc<Telemetry>,
    pub queue: Arc<TaskQueue<UnitTask>>,
    pub leases: Arc<dyn LeaseStore>,
    pub metrics_interval: Duration,
    pub lease_sweep_interval: Duration,
}

impl LifecycleHandles {
    pub(crate) fn spawn(params: LifecycleSpawnParams<'_>) -> Self {
        let LifecycleSpawnParams {
            shutdown_root,
            telemetry,
            queue,
            leases,
            metrics_interval,
            lease_sweep_interval,
        } = params;

        let run_token = shutdown_root.child_token();
        let fatal_handler = Arc::new(FatalErrorHandler::new(
            shutdown_root.clone(),
            run_token.clone(),
        ));
        let metrics_handle = telemetry::spawn_metrics_reporter(
            telemetry,
            queue,
            run_token.clone(),
            metrics_interval,
        );
        let sweeper_handle = spawn_lease_sweeper(leases, lease_sweep_interval, run_token.clone());

        Self {
            run_token,
            fatal_handler,
            metrics_handle: Some(metrics_handle),
            sweeper_handle: Some(sweeper_handle),
        }
    }

    pub(crate) fn fatal_handler(&self) -> Arc<FatalErrorHandler> {
        self.fatal_handler.clone()
    }

    pub(crate) fn error(&self) -> Option<Error> {
        self.fatal_handler.error()
    }

    pub(crate) async fn shutdown(mut self) {
        if let Some(handle) = self.metrics_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "metrics reporter task panicked");
            }
        }

        if let Some(handle) = self.sweeper_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "lease sweeper task panicked");
            }
        }
    }
}

/// Background sweep of expired leases. Expiry is also enforced lazily at
/// acquire time; the sweep keeps abandoned entries from lingering between
/// acquisitions of the same fingerprint.
fn spawn_lease_sweeper(
    leases: Arc<dyn LeaseStore>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("lease sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match leases.sweep_expired().await {
                        Ok(0) => {}
                        Ok(purged) => {
                            tracing::info!(purged, "purged expired leases");
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "lease sweep failed");
                        }
                    }
                }
            }
        }
    })
}
