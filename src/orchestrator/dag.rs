use crate::backends::boundaries::Boundary;
use crate::orchestrator::unit::UnitReport;
use crate::processors::registry::RegisteredProcessor;
use crate::provenance::datapackage::DataPackageResource;
use crate::provenance::log::ProvenanceLog;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Correlation id returned at submission and used to poll for the result.
pub type JobId = Uuid;

/// Reference to a registered processor by its (dataset, version) identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorRef {
    pub dataset: String,
    pub version: String,
}

impl ProcessorRef {
    pub fn new(dataset: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            version: version.into(),
        }
    }
}

/// A submitted job: one boundary plus the ordered set of processors to run
/// against it. Not mutated after submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingRequest {
    pub boundary: String,
    pub processors: Vec<ProcessorRef>,
}

impl ProcessingRequest {
    pub fn new(boundary: impl Into<String>, processors: Vec<ProcessorRef>) -> Self {
        Self {
            boundary: boundary.into(),
            processors,
        }
    }
}

/// Validated, executable form of a request:
/// `setup -> group(unit_1 .. unit_n) -> finalise`.
pub(crate) struct JobPlan {
    pub job_id: JobId,
    pub boundary: Boundary,
    pub units: Vec<Arc<RegisteredProcessor>>,
}

impl JobPlan {
    pub(crate) fn unit_names(&self) -> Vec<String> {
        self.units
            .iter()
            .map(|unit| unit.descriptor().name())
            .collect()
    }
}

/// Final status of a job. Every job terminates with one of these; there is
/// no silent partial success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Complete,
    PartialFailure,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Complete => "complete",
            JobStatus::PartialFailure => "partial-failure",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally visible artifact of one orchestrated job.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub boundary: String,
    pub status: JobStatus,
    /// Terminal outcome of every unit that reported one.
    pub reports: Vec<UnitReport>,
    /// Resources produced by successful units.
    pub resources: Vec<DataPackageResource>,
    /// Requested units that never reached a terminal outcome; a non-empty
    /// list forces partial-failure.
    pub missing: Vec<String>,
    pub provenance: ProvenanceLog,
}

/// Reduces collected unit reports into the job status, returning the status
/// and the requested units with no terminal outcome.
///
/// A failed setup short-circuits everything. A deferred unit (lease held
/// elsewhere) does not demote the job: the holder owns materialisation of
/// that fingerprint.
pub(crate) fn reduce(
    requested: &[String],
    reports: &[UnitReport],
    setup_failed: bool,
) -> (JobStatus, Vec<String>) {
    let missing: Vec<String> = requested
        .iter()
        .filter(|name| !reports.iter().any(|report| report.unit == **name))
        .cloned()
        .collect();

    let failed = reports
        .iter()
        .filter(|report| report.outcome.is_failed())
        .count();

    let status = if setup_failed {
        JobStatus::Failed
    } else if missing.is_empty() && !reports.is_empty() && failed == reports.len() {
        JobStatus::Failed
    } else if failed > 0 || !missing.is_empty() {
        JobStatus::PartialFailure
    } else {
        JobStatus::Complete
    };

    (status, missing)
}
