use crate::backends::boundaries::Boundary;
use crate::backends::processing::ProcessingBackend;
use crate::backends::storage::StorageBackend;
use crate::lease::store::LeaseStore;
use crate::orchestrator::dag::JobId;
use crate::orchestrator::unit::{
    ExecutionUnit, ExecutionUnitParams, SkipReason, UnitOutcome, UnitReport,
};
use crate::processors::contract::FailureKind;
use crate::processors::registry::RegisteredProcessor;
use crate::provenance::log::{ProvenanceValue, SharedProvenanceLog};
use crate::queue::task_queue::TaskQueue;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::telemetry::Telemetry;
use anyhow::anyhow;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One queued unit execution, carrying everything a worker needs to run it
/// and the collector channel its terminal outcome flows back through.
pub(crate) struct UnitTask {
    pub job_id: JobId,
    pub boundary: Boundary,
    pub registered: Arc<RegisteredProcessor>,
    pub provenance: SharedProvenanceLog,
    pub enqueued_at: Instant,
    pub expires_after: Duration,
    pub outcome_tx: mpsc::Sender<UnitReport>,
}

impl UnitTask {
    pub fn unit_name(&self) -> String {
        self.registered.descriptor().name()
    }

    /// Whether the task outlived its maximum queued lifetime before a worker
    /// picked it up.
    pub fn is_expired(&self) -> bool {
        self.enqueued_at.elapsed() > self.expires_after
    }
}

/// Dependencies shared by every worker in the pool.
pub(crate) struct WorkerShared {
    pub queue: Arc<TaskQueue<UnitTask>>,
    pub storage: Arc<dyn StorageBackend>,
    pub processing: Arc<dyn ProcessingBackend>,
    pub leases: Arc<dyn LeaseStore>,
    pub telemetry: Arc<Telemetry>,
    pub lease_ttl: Duration,
}

impl Clone for WorkerShared {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            storage: Arc::clone(&self.storage),
            processing: Arc::clone(&self.processing),
            leases: Arc::clone(&self.leases),
            telemetry: Arc::clone(&self.telemetry),
            lease_ttl: self.lease_ttl,
        }
    }
}

/// Bounded pool of workers pulling unit tasks from the shared queue.
///
/// Concurrency per node is fixed at launch: a handful of large units can
/// occupy every worker and make small jobs wait, but FIFO dispatch means
/// they are never denied scheduling.
pub(crate) struct WorkerPool {
    max_workers: usize,
    workers: Vec<JoinHandle<()>>,
    workers_done_tx: Option<watch::Sender<bool>>,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            workers: Vec::new(),
            workers_done_tx: None,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn launch(
        &mut self,
        shared: WorkerShared,
        run_token: CancellationToken,
        fatal_handler: Arc<FatalErrorHandler>,
    ) -> watch::Receiver<bool> {
        self.workers.clear();

        let (workers_done_tx, workers_done_rx) = watch::channel(false);
        self.workers_done_tx = Some(workers_done_tx.clone());
        let remaining_workers = Arc::new(AtomicUsize::new(self.max_workers));

        for worker_id in 0..self.max_workers {
            let shared = shared.clone();
            let shutdown = run_token.clone();
            let fatal_handler = fatal_handler.clone();
            let workers_done = workers_done_tx.clone();
            let remaining_workers = remaining_workers.clone();

            let handle = tokio::spawn(async move {
                let result = AssertUnwindSafe(worker_loop(worker_id, shared, shutdown.clone()))
                    .catch_unwind()
                    .await;

                if let Err(panic_payload) = result {
                    let panic_msg = panic_message(panic_payload.as_ref());
                    tracing::error!(
                        worker = worker_id,
                        panic = %panic_msg,
                        "worker task panicked outside a unit"
                    );
                    let context = format!("worker {worker_id} panicked");
                    fatal_handler.trigger(
                        context.as_str(),
                        anyhow!("worker {worker_id} panicked: {panic_msg}"),
                    );
                }

                if remaining_workers.fetch_sub(1, Ordering::SeqCst) == 1 {
                    let _ = workers_done.send(true);
                }
            });
            self.workers.push(handle);
        }

        workers_done_rx
    }

    /// Hands back the worker handles for joining. Callers cancel the run
    /// token first; workers finish their in-flight unit before exiting.
    pub fn shutdown(&mut self) -> Vec<JoinHandle<()>> {
        self.workers_done_tx = None;
        std::mem::take(&mut self.workers)
    }
}

async fn worker_loop(worker_id: usize, shared: WorkerShared, shutdown: CancellationToken) {
    tracing::debug!(worker = worker_id, "worker task started");

    loop {
        let task = tokio::select! {
            task = shared.queue.pop() => task,
            _ = shutdown.cancelled() => break,
        };
        process_task(worker_id, &shared, task).await;
    }

    tracing::debug!(worker = worker_id, "worker task exited");
}

async fn process_task(worker_id: usize, shared: &WorkerShared, task: UnitTask) {
    let unit_name = task.unit_name();
    let scope = task.provenance.scoped(unit_name.clone());

    let outcome = if task.is_expired() {
        let detail = format!(
            "queued longer than {:?}; dropped without execution",
            task.expires_after
        );
        tracing::warn!(
            worker = worker_id,
            unit = %unit_name,
            job = %task.job_id,
            "unit task expired in queue"
        );
        scope.record("failed", ProvenanceValue::note(detail.clone()));
        UnitOutcome::Failed {
            kind: FailureKind::TaskExpired,
            detail,
        }
    } else {
        let unit = ExecutionUnit::new(ExecutionUnitParams {
            boundary: &task.boundary,
            registered: task.registered.as_ref(),
            storage: shared.storage.as_ref(),
            processing: shared.processing.as_ref(),
            leases: shared.leases.as_ref(),
            lease_ttl: shared.lease_ttl,
            provenance: scope.clone(),
        });

        match AssertUnwindSafe(unit.run()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic_payload) => {
                // A panicking processor is contained as a failed unit. Its
                // lease is left to TTL expiry, matching a crashed worker.
                let detail = format!(
                    "processor panicked: {}",
                    panic_message(panic_payload.as_ref())
                );
                tracing::error!(worker = worker_id, unit = %unit_name, detail = %detail, "unit panicked");
                scope.record("failed", ProvenanceValue::note(detail.clone()));
                UnitOutcome::Failed {
                    kind: FailureKind::ProcessorFailure,
                    detail,
                }
            }
        }
    };

    match &outcome {
        UnitOutcome::Success { .. } => shared.telemetry.record_unit_succeeded(),
        UnitOutcome::Skipped {
            reason: SkipReason::AlreadyExists,
        } => shared.telemetry.record_unit_skipped_existing(),
        UnitOutcome::Skipped {
            reason: SkipReason::LeaseHeld,
        } => shared.telemetry.record_unit_deferred(),
        UnitOutcome::Failed {
            kind: FailureKind::TaskExpired,
            ..
        } => shared.telemetry.record_task_expired(),
        UnitOutcome::Failed { .. } => shared.telemetry.record_unit_failed(),
    }

    let report = UnitReport {
        unit: unit_name,
        outcome,
    };
    if task.outcome_tx.send(report).await.is_err() {
        tracing::warn!(
            worker = worker_id,
            job = %task.job_id,
            "job driver no longer listening for unit outcome"
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
