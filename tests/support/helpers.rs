use geopack::{
    Boundary, InMemoryBoundaryStore, JobId, JobResult, LocalFsProcessingBackend,
    LocalFsStorageBackend, OrchestratorConfig, OrchestratorParams, PackageOrchestrator,
    ProcessorRegistry, SharedLeaseStore,
};
use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

pub struct HarnessOptions {
    pub worker_concurrency: usize,
    pub lease_ttl: Duration,
    pub task_expiry: Duration,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            worker_concurrency: 2,
            lease_ttl: Duration::from_secs(60),
            task_expiry: Duration::from_secs(60),
        }
    }
}

/// A started orchestrator over temp-dir backends, plus handles the tests
/// poke at directly.
pub struct Harness {
    pub orchestrator: PackageOrchestrator,
    pub leases: Arc<SharedLeaseStore>,
    pub storage_root: PathBuf,
    pub processing_root: PathBuf,
    _dir: TempDir,
}

pub async fn start_harness(registry: ProcessorRegistry, options: HarnessOptions) -> Harness {
    init_tracing();

    let dir = TempDir::new().expect("temp dir");
    let storage_root = dir.path().join("packages");
    let processing_root = dir.path().join("processing");

    let config = OrchestratorConfig::builder()
        .worker_concurrency(options.worker_concurrency)
        .lease_ttl(options.lease_ttl)
        .task_expiry(options.task_expiry)
        .local_storage(storage_root.clone(), "https://packages.test")
        .processing_root(processing_root.clone())
        .metrics_interval(Duration::from_secs(5))
        .lease_sweep_interval(Duration::from_secs(5))
        .build()
        .expect("config should build");

    let boundaries = Arc::new(InMemoryBoundaryStore::new([
        Boundary::new(1, "KEN", "Kenya"),
        Boundary::new(2, "TZA", "Tanzania"),
    ]));
    let leases = Arc::new(SharedLeaseStore::new());

    let mut orchestrator = PackageOrchestrator::new(OrchestratorParams {
        config,
        registry,
        boundaries,
        storage: Arc::new(LocalFsStorageBackend::new(
            storage_root.clone(),
            "https://packages.test",
        )),
        processing: Arc::new(LocalFsProcessingBackend::new(processing_root.clone())),
        leases: leases.clone(),
    });
    orchestrator.start().await.expect("orchestrator should start");

    Harness {
        orchestrator,
        leases,
        storage_root,
        processing_root,
        _dir: dir,
    }
}

impl Harness {
    pub async fn wait(&self, job_id: JobId) -> Arc<JobResult> {
        tokio::time::timeout(
            Duration::from_secs(10),
            self.orchestrator.wait_for_result(job_id),
        )
        .await
        .expect("job should finalise within the timeout")
        .expect("job result should be published")
    }

    pub fn artifact_path(
        &self,
        boundary: &str,
        dataset: &str,
        version: &str,
        filename: &str,
    ) -> PathBuf {
        self.storage_root
            .join(boundary)
            .join(dataset)
            .join(version)
            .join(filename)
    }

    pub fn boundary_file(&self, boundary: &str, filename: &str) -> PathBuf {
        self.storage_root.join(boundary).join(filename)
    }

    /// Total number of files under the package tree.
    pub fn count_package_files(&self) -> usize {
        count_files(&self.storage_root)
    }
}

pub fn count_files(root: &Path) -> usize {
    let mut count = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                count += 1;
            }
        }
    }
    count
}
