//! Job orchestration engine.
//!
//! `PackageOrchestrator` composes the smaller modules so each concern is
//! owned by the component that knows it best:
//! - `worker_pool` runs unit tasks with bounded concurrency and contains
//!   per-unit panics.
//! - `unit` owns the lease / existence-check / generate / package sequence.
//! - `dag` reduces unit reports into the job status.
//! - `lifecycle` wires run-scoped cancellation, the metrics reporter, and
//!   the lease sweeper.
//!
//! Each submitted request gets a job driver task enforcing the two barriers:
//! setup strictly precedes the group, finalise runs exactly once after every
//! unit reaches a terminal state (or the run is cancelled).

use crate::backends::boundaries::BoundaryStore;
use crate::backends::processing::ProcessingBackend;
use crate::backends::storage::StorageBackend;
use crate::lease::store::{AcquireOutcome, Fingerprint, LeaseStore, LeaseToken};
use crate::orchestrator::dag::{self, JobId, JobPlan, JobResult, JobStatus, ProcessingRequest};
use crate::orchestrator::lifecycle::{LifecycleHandles, LifecycleSpawnParams};
use crate::orchestrator::unit::{UnitOutcome, UnitReport};
use crate::orchestrator::worker_pool::{UnitTask, WorkerPool, WorkerShared};
use crate::processors::boundary_setup::{BoundarySetupProcessor, SETUP_DATASET, SETUP_VERSION};
use crate::processors::registry::ProcessorRegistry;
use crate::provenance::datapackage::DataPackageResource;
use crate::provenance::log::{ProvenanceValue, SharedProvenanceLog};
use crate::queue::task_queue::TaskQueue;
use crate::runtime::config::OrchestratorConfig;
use crate::runtime::telemetry::Telemetry;
use anyhow::{bail, Context, Result};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const FINALISE_DATASET: &str = "generate_provenance";
const FINALISE_VERSION: &str = "1";
const FINALISE_LEASE_ATTEMPTS: usize = 10;
const FINALISE_LEASE_BACKOFF: Duration = Duration::from_millis(500);

/// Dependencies for a [`PackageOrchestrator`].
pub struct OrchestratorParams {
    pub config: OrchestratorConfig,
    pub registry: ProcessorRegistry,
    pub boundaries: Arc<dyn BoundaryStore>,
    pub storage: Arc<dyn StorageBackend>,
    pub processing: Arc<dyn ProcessingBackend>,
    pub leases: Arc<dyn LeaseStore>,
}

impl OrchestratorParams {
    /// Builds storage and processing backends from the configuration, with a
    /// process-shared lease store.
    pub fn from_config(
        config: OrchestratorConfig,
        registry: ProcessorRegistry,
        boundaries: Arc<dyn BoundaryStore>,
    ) -> Self {
        let storage = crate::backends::init_storage_backend(config.storage_backend());
        let processing = Arc::new(crate::backends::processing::LocalFsProcessingBackend::new(
            config.processing_root().clone(),
        ));
        Self {
            config,
            registry,
            boundaries,
            storage,
            processing,
            leases: Arc::new(crate::lease::memory::SharedLeaseStore::new()),
        }
    }
}

type ResultReceiver = watch::Receiver<Option<Arc<JobResult>>>;

/// The processing pipeline orchestrator.
///
/// Submission is fire-and-forget: `submit` validates the request, returns a
/// correlation id, and the job runs on the worker pool. Results are polled
/// via [`PackageOrchestrator::result`] or awaited via
/// [`PackageOrchestrator::wait_for_result`].
pub struct PackageOrchestrator {
    config: Arc<OrchestratorConfig>,
    registry: Arc<ProcessorRegistry>,
    boundaries: Arc<dyn BoundaryStore>,
    storage: Arc<dyn StorageBackend>,
    processing: Arc<dyn ProcessingBackend>,
    leases: Arc<dyn LeaseStore>,
    queue: Arc<TaskQueue<UnitTask>>,
    telemetry: Arc<Telemetry>,
    worker_pool: WorkerPool,
    lifecycle: Option<LifecycleHandles>,
    jobs: Arc<Mutex<HashMap<JobId, ResultReceiver>>>,
    driver_handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown_root: CancellationToken,
    running: bool,
}

impl PackageOrchestrator {
    /// Creates an orchestrator with its own root cancellation token. Use
    /// [`Self::with_cancellation_token`] to integrate with an existing
    /// shutdown mechanism.
    pub fn new(params: OrchestratorParams) -> Self {
        Self::with_cancellation_token(params, CancellationToken::new())
    }

    pub fn with_cancellation_token(
        params: OrchestratorParams,
        shutdown_token: CancellationToken,
    ) -> Self {
        let OrchestratorParams {
            config,
            registry,
            boundaries,
            storage,
            processing,
            leases,
        } = params;

        let worker_pool = WorkerPool::new(config.worker_concurrency());
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            boundaries,
            storage,
            processing,
            leases,
            queue: Arc::new(TaskQueue::new()),
            telemetry: Arc::new(Telemetry::default()),
            worker_pool,
            lifecycle: None,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            driver_handles: Mutex::new(Vec::new()),
            shutdown_root: shutdown_token,
            running: false,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    /// Returns a clone of the telemetry handle for observability.
    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Replaces the root shutdown token used to derive per-run cancellation
    /// tokens. Must only be called while the orchestrator is idle.
    pub fn replace_shutdown_root(&mut self, shutdown: CancellationToken) {
        debug_assert!(
            !self.running,
            "shutdown token should not change while the orchestrator is running"
        );
        self.shutdown_root = shutdown;
    }

    /// Starts the worker pool and lifecycle tasks.
    pub async fn start(&mut self) -> Result<()> {
        if self.running {
            bail!("orchestrator already running");
        }

        debug_assert!(
            self.config.validate().is_ok(),
            "OrchestratorConfig should have been validated at construction time"
        );

        tracing::info!(
            workers = self.config.worker_concurrency(),
            processors = self.registry.len(),
            "starting package orchestrator"
        );

        let lifecycle = LifecycleHandles::spawn(LifecycleSpawnParams {
            shutdown_root: &self.shutdown_root,
            telemetry: self.telemetry.clone(),
            queue: self.queue.clone(),
            leases: self.leases.clone(),
            metrics_interval: self.config.metrics_interval(),
            lease_sweep_interval: self.config.lease_sweep_interval(),
        });

        let shared = WorkerShared {
            queue: self.queue.clone(),
            storage: self.storage.clone(),
            processing: self.processing.clone(),
            leases: self.leases.clone(),
            telemetry: self.telemetry.clone(),
            lease_ttl: self.config.lease_ttl(),
        };
        let _workers_done_rx = self.worker_pool.launch(
            shared,
            lifecycle.run_token.clone(),
            lifecycle.fatal_handler(),
        );

        self.lifecycle = Some(lifecycle);
        self.running = true;
        Ok(())
    }

    /// Validates a request and schedules it for execution, returning the
    /// job's correlation id.
    ///
    /// Only request validation fails here (`UnknownProcessor`, unknown
    /// boundary, empty processor set); every execution-time failure surfaces
    /// as data in the [`JobResult`] instead.
    pub async fn submit(&self, request: &ProcessingRequest) -> Result<JobId> {
        let lifecycle = match &self.lifecycle {
            Some(lifecycle) if self.running => lifecycle,
            _ => bail!("orchestrator is not running"),
        };

        if request.processors.is_empty() {
            bail!("request names no processors");
        }

        let boundary = self
            .boundaries
            .get(&request.boundary)
            .await
            .context("request validation failed")?;

        let mut units = Vec::with_capacity(request.processors.len());
        for reference in &request.processors {
            let registered = self
                .registry
                .resolve(&reference.dataset, &reference.version)
                .context("request validation failed")?;
            units.push(registered);
        }

        let job_id = Uuid::new_v4();
        let plan = JobPlan {
            job_id,
            boundary,
            units,
        };

        let (result_tx, result_rx) = watch::channel(None);
        self.jobs.lock().unwrap().insert(job_id, result_rx);

        tracing::info!(
            job = %job_id,
            boundary = %request.boundary,
            units = plan.units.len(),
            "job submitted"
        );

        let ctx = JobContext {
            plan,
            config: self.config.clone(),
            storage: self.storage.clone(),
            processing: self.processing.clone(),
            leases: self.leases.clone(),
            telemetry: self.telemetry.clone(),
            queue: self.queue.clone(),
            run_token: lifecycle.run_token.clone(),
            result_tx,
        };
        let handle = tokio::spawn(run_job(ctx));
        self.driver_handles.lock().unwrap().push(handle);

        Ok(job_id)
    }

    /// Non-blocking result lookup. `None` while the job is still running.
    pub fn result(&self, job_id: JobId) -> Option<Arc<JobResult>> {
        let jobs = self.jobs.lock().unwrap();
        jobs.get(&job_id).and_then(|rx| rx.borrow().clone())
    }

    /// Waits until the job produces its result.
    pub async fn wait_for_result(&self, job_id: JobId) -> Result<Arc<JobResult>> {
        let mut rx = {
            let jobs = self.jobs.lock().unwrap();
            jobs.get(&job_id).cloned()
        }
        .with_context(|| format!("unknown job id {job_id}"))?;

        loop {
            let current = rx.borrow().clone();
            if let Some(result) = current {
                return Ok(result);
            }
            rx.changed()
                .await
                .context("job driver dropped without publishing a result")?;
        }
    }

    /// Stops the orchestrator gracefully.
    ///
    /// Cancels workers (in-flight units run to their terminal state), drops
    /// queued tasks, and waits for every job driver to finalise.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }

        tracing::info!("stopping package orchestrator");

        let lifecycle_error = self.lifecycle.as_ref().and_then(|handles| handles.error());
        if let Some(handles) = &self.lifecycle {
            handles.run_token.cancel();
        }

        let worker_handles = self.worker_pool.shutdown();
        let results = join_all(worker_handles).await;
        for (idx, result) in results.into_iter().enumerate() {
            if let Err(err) = result {
                tracing::warn!(worker = idx, error = %err, "worker task terminated unexpectedly");
            }
        }

        // Tasks never started are dropped here; their collector senders close
        // and job drivers finalise with the outcomes they have.
        let dropped = self.queue.clear().await;
        if !dropped.is_empty() {
            tracing::info!(
                dropped = dropped.len(),
                "dropped queued unit tasks after shutdown request"
            );
        }
        drop(dropped);

        let drivers = std::mem::take(&mut *self.driver_handles.lock().unwrap());
        for result in join_all(drivers).await {
            if let Err(err) = result {
                tracing::warn!(error = %err, "job driver terminated unexpectedly");
            }
        }

        if let Some(handles) = self.lifecycle.take() {
            handles.shutdown().await;
        }

        self.running = false;

        if let Some(err) = lifecycle_error {
            return Err(err).context("orchestration pipeline aborted");
        }

        Ok(())
    }
}

struct JobContext {
    plan: JobPlan,
    config: Arc<OrchestratorConfig>,
    storage: Arc<dyn StorageBackend>,
    processing: Arc<dyn ProcessingBackend>,
    leases: Arc<dyn LeaseStore>,
    telemetry: Arc<Telemetry>,
    queue: Arc<TaskQueue<UnitTask>>,
    run_token: CancellationToken,
    result_tx: watch::Sender<Option<Arc<JobResult>>>,
}

async fn run_job(ctx: JobContext) {
    let provenance = SharedProvenanceLog::new();
    provenance.record("job", "submitted", ProvenanceValue::now());
    provenance.record(
        "job",
        "id",
        ProvenanceValue::note(ctx.plan.job_id.to_string()),
    );

    let setup_failure = run_setup(&ctx, &provenance).await;

    let mut reports: Vec<UnitReport> = Vec::with_capacity(ctx.plan.units.len());
    if setup_failure.is_none() {
        let expected = ctx.plan.units.len();
        let (outcome_tx, mut outcome_rx) = mpsc::channel(expected.max(1));

        for registered in &ctx.plan.units {
            ctx.queue
                .push(UnitTask {
                    job_id: ctx.plan.job_id,
                    boundary: ctx.plan.boundary.clone(),
                    registered: Arc::clone(registered),
                    provenance: provenance.clone(),
                    enqueued_at: Instant::now(),
                    expires_after: ctx.config.task_expiry(),
                    outcome_tx: outcome_tx.clone(),
                })
                .await;
        }
        drop(outcome_tx);

        // Group barrier: wait until every unit reaches a terminal state. The
        // channel closing early means queued tasks were dropped at shutdown;
        // finalise then reports the aggregate as incomplete.
        loop {
            tokio::select! {
                maybe_report = outcome_rx.recv() => match maybe_report {
                    Some(report) => {
                        reports.push(report);
                        if reports.len() == expected {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ctx.run_token.cancelled() => break,
            }
        }
    }

    let result = finalise(&ctx, &provenance, reports, setup_failure).await;

    match result.status {
        JobStatus::Complete => ctx.telemetry.record_job_complete(),
        JobStatus::PartialFailure => ctx.telemetry.record_job_partial_failure(),
        JobStatus::Failed => ctx.telemetry.record_job_failed(),
    }
    tracing::info!(
        job = %result.job_id,
        boundary = %result.boundary,
        status = %result.status,
        resources = result.resources.len(),
        "job finalised"
    );

    let _ = ctx.result_tx.send(Some(Arc::new(result)));
}

/// Setup barrier: builds the boundary's top-level structure before any group
/// unit is enqueued. Lease-guarded like every task; a concurrent holder is
/// building the same idempotent structure, so `Busy` proceeds to the group.
async fn run_setup(ctx: &JobContext, provenance: &SharedProvenanceLog) -> Option<String> {
    let scope = provenance.scoped(SETUP_DATASET);
    let fingerprint = Fingerprint::new(&ctx.plan.boundary.name, SETUP_DATASET, SETUP_VERSION);

    match ctx.leases.acquire(&fingerprint, ctx.config.lease_ttl()).await {
        Ok(AcquireOutcome::Granted(token)) => {
            let setup = BoundarySetupProcessor::new(
                &ctx.plan.boundary,
                ctx.storage.as_ref(),
                scope.clone(),
            );
            let result = setup.generate().await;
            if let Err(err) = ctx.leases.release(&token).await {
                tracing::warn!(unit = %fingerprint, error = %err, "failed to release setup lease");
            }
            match result {
                Ok(()) => None,
                Err(err) => {
                    let detail = format!("{err:#}");
                    scope.record("failed", ProvenanceValue::note(detail.clone()));
                    tracing::error!(
                        job = %ctx.plan.job_id,
                        error = %err,
                        "boundary setup failed; group units will not run"
                    );
                    Some(detail)
                }
            }
        }
        Ok(AcquireOutcome::Busy) => {
            scope.record(
                "skipped",
                ProvenanceValue::note("lease-held; setup in progress elsewhere"),
            );
            None
        }
        Err(err) => {
            let detail = format!("lease store unavailable: {err:#}");
            scope.record("failed", ProvenanceValue::note(detail.clone()));
            Some(detail)
        }
    }
}

/// Finalise barrier: validates the aggregate against the requested set,
/// sweeps leftover scratch, computes the job status, and writes the
/// provenance and datapackage documents. Runs exactly once per job, on every
/// path.
async fn finalise(
    ctx: &JobContext,
    provenance: &SharedProvenanceLog,
    reports: Vec<UnitReport>,
    setup_failure: Option<String>,
) -> JobResult {
    let boundary_name = ctx.plan.boundary.name.clone();
    let requested = ctx.plan.unit_names();
    let setup_failed = setup_failure.is_some();
    let (status, missing) = dag::reduce(&requested, &reports, setup_failed);

    let finalise_token = acquire_finalise_lease(ctx).await;

    if !setup_failed {
        for unit in &missing {
            provenance.record(
                unit,
                "missing",
                ProvenanceValue::note("no terminal outcome recorded"),
            );
        }
        if !missing.is_empty() {
            tracing::warn!(
                job = %ctx.plan.job_id,
                missing = missing.len(),
                "aggregate incomplete; job forced to partial-failure"
            );
        }
    }

    if let Err(err) = ctx.processing.sweep_boundary(&boundary_name).await {
        tracing::warn!(boundary = %boundary_name, error = %err, "scratch sweep failed");
        provenance.record(
            "finalise",
            "scratch sweep failed",
            ProvenanceValue::note(format!("{err:#}")),
        );
    }

    let resources: Vec<DataPackageResource> = reports
        .iter()
        .filter_map(|report| match &report.outcome {
            UnitOutcome::Success { resource } => Some(resource.clone()),
            _ => None,
        })
        .collect();

    for resource in &resources {
        if let Err(err) = ctx.storage.update_datapackage(&boundary_name, resource).await {
            tracing::warn!(
                boundary = %boundary_name,
                resource = %resource.name_version(),
                error = %err,
                "datapackage update failed"
            );
            provenance.record(
                "finalise",
                "datapackage update failed",
                ProvenanceValue::note(format!("{}: {err:#}", resource.name_version())),
            );
        }
    }

    provenance.record(
        "finalise",
        "status",
        ProvenanceValue::note(status.as_str()),
    );
    provenance.record("finalise", "completed", ProvenanceValue::now());

    let snapshot = provenance.snapshot();
    let run_document = serde_json::json!({
        "job": ctx.plan.job_id,
        "boundary": &boundary_name,
        "status": status.as_str(),
        "events": &snapshot,
    });
    if let Err(err) = ctx.storage.add_provenance(&boundary_name, run_document).await {
        tracing::warn!(
            job = %ctx.plan.job_id,
            boundary = %boundary_name,
            error = %err,
            "failed to write provenance document"
        );
    }

    if let Some(token) = finalise_token {
        if let Err(err) = ctx.leases.release(&token).await {
            tracing::warn!(error = %err, "failed to release finalise lease");
        }
    }

    JobResult {
        job_id: ctx.plan.job_id,
        boundary: boundary_name,
        status,
        reports,
        resources,
        missing,
        provenance: snapshot,
    }
}

/// Finalise is guarded so concurrent jobs for one boundary serialise their
/// document writes, but it must always run: after bounded retries the write
/// proceeds unguarded (last writer wins on an append-only document).
async fn acquire_finalise_lease(ctx: &JobContext) -> Option<LeaseToken> {
    let fingerprint = Fingerprint::new(
        &ctx.plan.boundary.name,
        FINALISE_DATASET,
        FINALISE_VERSION,
    );

    for _ in 0..FINALISE_LEASE_ATTEMPTS {
        match ctx.leases.acquire(&fingerprint, ctx.config.lease_ttl()).await {
            Ok(AcquireOutcome::Granted(token)) => return Some(token),
            Ok(AcquireOutcome::Busy) => tokio::time::sleep(FINALISE_LEASE_BACKOFF).await,
            Err(err) => {
                tracing::warn!(
                    unit = %fingerprint,
                    error = %err,
                    "finalise lease unavailable; proceeding unguarded"
                );
                return None;
            }
        }
    }

    tracing::warn!(
        unit = %fingerprint,
        "finalise lease still held after retries; proceeding unguarded"
    );
    None
}
