//! Pipeline orchestration covering request validation, the
//! setup → fan-out → finalise graph, unit execution, and worker pool
//! coordination.

pub mod dag;
pub mod executor;
pub mod lifecycle;
pub mod unit;
pub mod worker_pool;

pub use dag::{JobId, JobResult, JobStatus, ProcessingRequest, ProcessorRef};
pub use executor::{OrchestratorParams, PackageOrchestrator};
pub use unit::{SkipReason, UnitOutcome, UnitReport};
