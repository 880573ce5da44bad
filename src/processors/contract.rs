use crate::backends::boundaries::Boundary;
use crate::processors::descriptor::ProcessorDescriptor;
use crate::provenance::log::ProvenanceScope;
use anyhow::Error as AnyError;
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};

/// Future returned by a processor's generation hook.
pub type GenerateFuture<'a> = BoxFuture<'a, Result<Vec<PathBuf>, ProcessorError>>;

/// Classification for failed units. Failures are always contained at the
/// unit boundary; the kind tells callers whether resubmission can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The processor's generation logic raised.
    ProcessorFailure,
    /// Storage or scratch I/O failed; retryable by resubmitting the request.
    BackendUnavailable,
    /// The queued task outlived its maximum queued lifetime; never retried
    /// automatically.
    TaskExpired,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ProcessorFailure => "processor-failure",
            FailureKind::BackendUnavailable => "backend-unavailable",
            FailureKind::TaskExpired => "expired",
        }
    }
}

impl serde::Serialize for FailureKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Classified error surfaced by a unit. Processor exceptions never escape
/// unclassified: anything the generation hook raises is wrapped here.
#[derive(Debug)]
pub struct ProcessorError {
    kind: FailureKind,
    source: AnyError,
}

impl ProcessorError {
    pub fn new(kind: FailureKind, source: AnyError) -> Self {
        Self { kind, source }
    }

    pub fn processor(source: impl Into<AnyError>) -> Self {
        Self::new(FailureKind::ProcessorFailure, source.into())
    }

    pub fn backend(source: impl Into<AnyError>) -> Self {
        Self::new(FailureKind::BackendUnavailable, source.into())
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn into_source(self) -> AnyError {
        self.source
    }
}

impl std::fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.source)
    }
}

impl std::error::Error for ProcessorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Inputs handed to a processor's generation hook for one unit execution.
pub struct GenerationContext<'a> {
    pub boundary: &'a Boundary,
    pub descriptor: &'a ProcessorDescriptor,
    /// Unit-local scratch directory. Released (deleted) on every exit path;
    /// artifacts must be returned as paths inside it.
    pub scratch_dir: &'a Path,
    /// Provenance writer namespaced to this unit's identity.
    pub provenance: &'a ProvenanceScope,
}

/// Trait implemented by dataset processors, one implementation per
/// dataset+version.
///
/// The orchestrator owns everything around the hook (leasing, the existence
/// check, artifact transfer, provenance bookkeeping), so implementations
/// contain only the transformation itself. Always async so generation can
/// perform I/O (downloads, clipping, format conversion).
pub trait DatasetProcessor: Send + Sync + 'static {
    /// Produces this unit's artifacts inside `ctx.scratch_dir` and returns
    /// their paths, in declared-output order.
    fn generate<'a>(&'a self, ctx: GenerationContext<'a>) -> GenerateFuture<'a>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn processor_error_keeps_kind_and_source() {
        let err = ProcessorError::processor(anyhow!("clip failed"));
        assert_eq!(err.kind(), FailureKind::ProcessorFailure);
        assert!(format!("{err}").contains("clip failed"));
        assert!(format!("{err}").starts_with("processor-failure"));
    }

    #[test]
    fn failure_kinds_render_stable_labels() {
        assert_eq!(FailureKind::TaskExpired.as_str(), "expired");
        assert_eq!(FailureKind::BackendUnavailable.as_str(), "backend-unavailable");
    }
}
