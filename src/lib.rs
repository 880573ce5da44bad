pub mod backends;
pub mod lease;
pub mod orchestrator;
pub mod processors;
pub mod provenance;
pub mod queue;
pub mod runtime;

pub use backends::{
    Boundary, BoundaryStore, InMemoryBoundaryStore, LocalFsProcessingBackend,
    LocalFsStorageBackend, ProcessingBackend, ScratchLease, StorageBackend,
};
pub use lease::{AcquireOutcome, Fingerprint, LeaseStore, LeaseToken, SharedLeaseStore};
pub use orchestrator::{
    JobId, JobResult, JobStatus, OrchestratorParams, PackageOrchestrator, ProcessingRequest,
    ProcessorRef, SkipReason, UnitOutcome, UnitReport,
};
pub use processors::{
    DatasetProcessor, FailureKind, GenerateFuture, GenerationContext, ProcessorDescriptor,
    ProcessorError, ProcessorRegistry, UnknownProcessor,
};
pub use provenance::{
    DataPackageLicense, DataPackageResource, DataPackageSource, ProvenanceLog, ProvenanceValue,
    SharedProvenanceLog,
};
pub use runtime::config::{
    OrchestratorConfig, OrchestratorConfigBuilder, OrchestratorConfigParams, StorageBackendKind,
};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
