use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_LEASE_TTL_SECS: u64 = 600;
const DEFAULT_TASK_EXPIRY_SECS: u64 = 3_600;
const DEFAULT_LEASE_SWEEP_INTERVAL_SECS: u64 = 30;

/// Selects which storage backend implementation is active for a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendKind {
    /// Hierarchical local filesystem rooted at `root`; public URIs are built
    /// against `public_base_url`.
    LocalFs {
        root: PathBuf,
        public_base_url: String,
    },
}

/// Runtime configuration for the processing pipeline orchestrator.
///
/// All instances must be constructed via [`OrchestratorConfig::builder`] or
/// [`OrchestratorConfig::new`] so invariants are validated before any
/// consumer observes the values. Constructed once at startup and shared by
/// reference; there is no ambient global state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    worker_concurrency: usize,
    lease_ttl: Duration,
    task_expiry: Duration,
    storage_backend: StorageBackendKind,
    processing_root: PathBuf,
    metrics_interval: Duration,
    lease_sweep_interval: Duration,
}

pub struct OrchestratorConfigParams {
    pub worker_concurrency: usize,
    pub lease_ttl: Duration,
    pub task_expiry: Duration,
    pub storage_backend: StorageBackendKind,
    pub processing_root: PathBuf,
    pub metrics_interval: Duration,
    pub lease_sweep_interval: Duration,
}

impl OrchestratorConfig {
    /// Returns a builder to incrementally construct and validate a
    /// configuration.
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    ///
    /// Prefer [`OrchestratorConfig::builder`] when many values use defaults.
    pub fn new(params: OrchestratorConfigParams) -> Result<Self> {
        let OrchestratorConfigParams {
            worker_concurrency,
            lease_ttl,
            task_expiry,
            storage_backend,
            processing_root,
            metrics_interval,
            lease_sweep_interval,
        } = params;

        let config = Self {
            worker_concurrency,
            lease_ttl,
            task_expiry,
            storage_backend,
            processing_root,
            metrics_interval,
            lease_sweep_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Number of unit workers running on this node.
    pub fn worker_concurrency(&self) -> usize {
        self.worker_concurrency
    }

    /// Time-to-live granted to execution leases. Must exceed the worst-case
    /// duration of the slowest processor, or legitimate long-running work
    /// will be preempted by a second worker.
    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    /// Maximum time a unit task may wait in the queue before it is dropped
    /// and reported as expired instead of executed stale.
    pub fn task_expiry(&self) -> Duration {
        self.task_expiry
    }

    pub fn storage_backend(&self) -> &StorageBackendKind {
        &self.storage_backend
    }

    /// Root of the processing scratch tree on this node.
    pub fn processing_root(&self) -> &PathBuf {
        &self.processing_root
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Interval between background sweeps of expired leases.
    pub fn lease_sweep_interval(&self) -> Duration {
        self.lease_sweep_interval
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.worker_concurrency == 0 {
            bail!("worker_concurrency must be greater than 0");
        }

        if self.lease_ttl.is_zero() {
            bail!("lease_ttl must be greater than 0");
        }

        if self.task_expiry.is_zero() {
            bail!("task_expiry must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if self.lease_sweep_interval.is_zero() {
            bail!("lease_sweep_interval must be greater than 0");
        }

        if self.processing_root.as_os_str().is_empty() {
            bail!("processing_root cannot be empty");
        }

        match &self.storage_backend {
            StorageBackendKind::LocalFs {
                root,
                public_base_url,
            } => {
                if root.as_os_str().is_empty() {
                    bail!("storage root cannot be empty");
                }
                validate_url(public_base_url)?;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct OrchestratorConfigBuilder {
    worker_concurrency: Option<usize>,
    lease_ttl: Option<Duration>,
    task_expiry: Option<Duration>,
    storage_backend: Option<StorageBackendKind>,
    processing_root: Option<PathBuf>,
    metrics_interval: Option<Duration>,
    lease_sweep_interval: Option<Duration>,
}

impl OrchestratorConfigBuilder {
    pub fn worker_concurrency(mut self, workers: usize) -> Self {
        self.worker_concurrency = Some(workers);
        self
    }

    pub fn lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = Some(ttl);
        self
    }

    pub fn task_expiry(mut self, expiry: Duration) -> Self {
        self.task_expiry = Some(expiry);
        self
    }

    pub fn storage_backend(mut self, backend: StorageBackendKind) -> Self {
        self.storage_backend = Some(backend);
        self
    }

    pub fn local_storage(
        self,
        root: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
    ) -> Self {
        self.storage_backend(StorageBackendKind::LocalFs {
            root: root.into(),
            public_base_url: public_base_url.into(),
        })
    }

    pub fn processing_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.processing_root = Some(root.into());
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn lease_sweep_interval(mut self, interval: Duration) -> Self {
        self.lease_sweep_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<OrchestratorConfig> {
        let params = OrchestratorConfigParams {
            worker_concurrency: self
                .worker_concurrency
                .context("worker_concurrency is required")?,
            lease_ttl: self
                .lease_ttl
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_LEASE_TTL_SECS)),
            task_expiry: self
                .task_expiry
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_TASK_EXPIRY_SECS)),
            storage_backend: self.storage_backend.context("storage_backend is required")?,
            processing_root: self.processing_root.context("processing_root is required")?,
            metrics_interval: self
                .metrics_interval
                .unwrap_or(crate::runtime::telemetry::DEFAULT_METRICS_INTERVAL),
            lease_sweep_interval: self
                .lease_sweep_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_LEASE_SWEEP_INTERVAL_SECS)),
        };

        OrchestratorConfig::new(params)
    }
}

fn validate_url(url: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("public_base_url must start with http:// or https://");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::telemetry;

    fn base_builder() -> OrchestratorConfigBuilder {
        OrchestratorConfig::builder()
            .worker_concurrency(2)
            .local_storage("/srv/packages", "https://packages.test")
            .processing_root("/srv/processing")
    }

    #[test]
    fn builder_produces_valid_config() {
        let config = base_builder().build().unwrap();
        assert_eq!(config.worker_concurrency(), 2);
        assert_eq!(
            config.lease_ttl(),
            Duration::from_secs(DEFAULT_LEASE_TTL_SECS)
        );
        assert_eq!(
            config.task_expiry(),
            Duration::from_secs(DEFAULT_TASK_EXPIRY_SECS)
        );
        assert_eq!(
            config.metrics_interval(),
            telemetry::DEFAULT_METRICS_INTERVAL
        );
        assert_eq!(
            config.lease_sweep_interval(),
            Duration::from_secs(DEFAULT_LEASE_SWEEP_INTERVAL_SECS)
        );
    }

    #[test]
    fn durations_can_be_overridden() {
        let config = base_builder()
            .lease_ttl(Duration::from_secs(120))
            .task_expiry(Duration::from_secs(60))
            .metrics_interval(Duration::from_secs(1))
            .lease_sweep_interval(Duration::from_secs(5))
            .build()
            .expect("config should build");
        assert_eq!(config.lease_ttl(), Duration::from_secs(120));
        assert_eq!(config.task_expiry(), Duration::from_secs(60));
        assert_eq!(config.metrics_interval(), Duration::from_secs(1));
        assert_eq!(config.lease_sweep_interval(), Duration::from_secs(5));
    }

    #[test]
    fn missing_required_fields_error() {
        let err = OrchestratorConfig::builder()
            .worker_concurrency(2)
            .processing_root("/srv/processing")
            .build()
            .unwrap_err();
        assert!(
            format!("{err}").contains("storage_backend"),
            "error should mention missing storage_backend"
        );

        let err = OrchestratorConfig::builder()
            .local_storage("/srv/packages", "https://packages.test")
            .processing_root("/srv/processing")
            .build()
            .unwrap_err();
        assert!(
            format!("{err}").contains("worker_concurrency"),
            "error should mention missing worker_concurrency"
        );
    }

    #[test]
    fn validation_catches_invalid_values() {
        let err = base_builder().worker_concurrency(0).build().unwrap_err();
        assert!(format!("{err}").contains("worker_concurrency"));

        let err = base_builder()
            .lease_ttl(Duration::from_secs(0))
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("lease_ttl"));

        let err = base_builder()
            .task_expiry(Duration::from_secs(0))
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("task_expiry"));

        let err = base_builder()
            .metrics_interval(Duration::from_secs(0))
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("metrics_interval"));

        let err = base_builder()
            .lease_sweep_interval(Duration::from_secs(0))
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("lease_sweep_interval"));

        let err = base_builder()
            .local_storage("/srv/packages", "ftp://invalid")
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("http:// or https://"));
    }

    #[test]
    fn direct_constructor_runs_validation() {
        let err = OrchestratorConfig::new(OrchestratorConfigParams {
            worker_concurrency: 0,
            lease_ttl: Duration::from_secs(DEFAULT_LEASE_TTL_SECS),
            task_expiry: Duration::from_secs(DEFAULT_TASK_EXPIRY_SECS),
            storage_backend: StorageBackendKind::LocalFs {
                root: "/srv/packages".into(),
                public_base_url: "https://packages.test".into(),
            },
            processing_root: "/srv/processing".into(),
            metrics_interval: telemetry::DEFAULT_METRICS_INTERVAL,
            lease_sweep_interval: Duration::from_secs(DEFAULT_LEASE_SWEEP_INTERVAL_SECS),
        })
        .unwrap_err();

        assert!(
            format!("{err}").contains("worker_concurrency"),
            "error should mention invalid worker_concurrency"
        );
    }
}
