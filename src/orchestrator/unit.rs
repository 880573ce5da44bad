use crate::backends::boundaries::Boundary;
use crate::backends::processing::ProcessingBackend;
use crate::backends::storage::StorageBackend;
use crate::lease::store::{AcquireOutcome, Fingerprint, LeaseStore};
use crate::processors::contract::{FailureKind, GenerationContext};
use crate::processors::descriptor::ProcessorDescriptor;
use crate::processors::registry::RegisteredProcessor;
use crate::provenance::datapackage::DataPackageResource;
use crate::provenance::log::{ProvenanceScope, ProvenanceValue};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Duration;

/// Why a unit was skipped. Neither reason is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Another worker holds the execution lease for this fingerprint; the
    /// holder is responsible for producing the artifact.
    LeaseHeld,
    /// Every declared output already exists on the storage backend.
    AlreadyExists,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::LeaseHeld => "lease-held",
            SkipReason::AlreadyExists => "already-exists",
        }
    }
}

/// Terminal state of one unit execution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitOutcome {
    Success { resource: DataPackageResource },
    Skipped { reason: SkipReason },
    Failed { kind: FailureKind, detail: String },
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Success { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, UnitOutcome::Failed { .. })
    }

    pub fn is_skipped(&self, reason: SkipReason) -> bool {
        matches!(self, UnitOutcome::Skipped { reason: r } if *r == reason)
    }
}

/// One unit's terminal outcome, tagged with its `dataset.version` identity.
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub unit: String,
    pub outcome: UnitOutcome,
}

pub(crate) struct ExecutionUnitParams<'a> {
    pub boundary: &'a Boundary,
    pub registered: &'a RegisteredProcessor,
    pub storage: &'a dyn StorageBackend,
    pub processing: &'a dyn ProcessingBackend,
    pub leases: &'a dyn LeaseStore,
    pub lease_ttl: Duration,
    pub provenance: ProvenanceScope,
}

/// Wraps one processor invocation: lease, existence check, scratch-scoped
/// generation, artifact packaging, provenance emission, lease release.
///
/// `run` never lets a processor error escape unclassified and never returns
/// early with the lease held.
pub(crate) struct ExecutionUnit<'a> {
    boundary: &'a Boundary,
    registered: &'a RegisteredProcessor,
    storage: &'a dyn StorageBackend,
    processing: &'a dyn ProcessingBackend,
    leases: &'a dyn LeaseStore,
    lease_ttl: Duration,
    provenance: ProvenanceScope,
}

impl<'a> ExecutionUnit<'a> {
    pub fn new(params: ExecutionUnitParams<'a>) -> Self {
        Self {
            boundary: params.boundary,
            registered: params.registered,
            storage: params.storage,
            processing: params.processing,
            leases: params.leases,
            lease_ttl: params.lease_ttl,
            provenance: params.provenance,
        }
    }

    pub async fn run(&self) -> UnitOutcome {
        let descriptor = self.registered.descriptor();
        let fingerprint = Fingerprint::new(
            &self.boundary.name,
            &descriptor.dataset,
            &descriptor.version,
        );

        let token = match self.leases.acquire(&fingerprint, self.lease_ttl).await {
            Ok(AcquireOutcome::Granted(token)) => token,
            Ok(AcquireOutcome::Busy) => {
                tracing::info!(unit = %fingerprint, "lease held elsewhere; deferring unit");
                self.provenance.record(
                    "skipped",
                    ProvenanceValue::note("lease-held; in progress elsewhere"),
                );
                return UnitOutcome::Skipped {
                    reason: SkipReason::LeaseHeld,
                };
            }
            Err(err) => {
                return self.fail(
                    FailureKind::BackendUnavailable,
                    format!("lease store unavailable: {err:#}"),
                );
            }
        };

        let outcome = self.execute(descriptor).await;

        // Release is unconditional, success or failure.
        if let Err(err) = self.leases.release(&token).await {
            tracing::warn!(unit = %fingerprint, error = %err, "failed to release lease");
        }

        outcome
    }

    async fn execute(&self, descriptor: &ProcessorDescriptor) -> UnitOutcome {
        match self.already_materialized(descriptor).await {
            Ok(true) => {
                tracing::info!(
                    unit = self.provenance.scope(),
                    "outputs already materialized; skipping generation"
                );
                self.provenance
                    .record("already exists", ProvenanceValue::Flag(true));
                return UnitOutcome::Skipped {
                    reason: SkipReason::AlreadyExists,
                };
            }
            Ok(false) => {}
            Err(err) => {
                return self.fail(
                    FailureKind::BackendUnavailable,
                    format!("existence check failed: {err:#}"),
                );
            }
        }

        let scratch = match self
            .processing
            .allocate_scratch(
                &self.boundary.name,
                &descriptor.dataset,
                &descriptor.version,
            )
            .await
        {
            Ok(scratch) => scratch,
            Err(err) => {
                return self.fail(
                    FailureKind::BackendUnavailable,
                    format!("scratch allocation failed: {err:#}"),
                );
            }
        };

        let generated = self
            .registered
            .implementation()
            .generate(GenerationContext {
                boundary: self.boundary,
                descriptor,
                scratch_dir: scratch.path(),
                provenance: &self.provenance,
            })
            .await;

        let outcome = match generated {
            Ok(artifacts) => self.package(descriptor, artifacts).await,
            Err(err) => {
                let kind = err.kind();
                self.fail(kind, format!("{err:#}"))
            }
        };

        // Scratch is released on every exit path; the lease guard also
        // covers panics via its Drop.
        if let Err(err) = scratch.release().await {
            tracing::warn!(
                unit = self.provenance.scope(),
                error = %err,
                "failed to release scratch space"
            );
        }

        outcome
    }

    async fn already_materialized(&self, descriptor: &ProcessorDescriptor) -> anyhow::Result<bool> {
        let declared = descriptor.resolved_output_files(&self.boundary.name);
        if declared.is_empty() {
            return Ok(false);
        }
        for filename in &declared {
            let exists = self
                .storage
                .processor_file_exists(
                    &self.boundary.name,
                    &descriptor.dataset,
                    &descriptor.version,
                    filename,
                )
                .await?;
            if !exists {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn package(
        &self,
        descriptor: &ProcessorDescriptor,
        artifacts: Vec<PathBuf>,
    ) -> UnitOutcome {
        if artifacts.is_empty() {
            return self.fail(
                FailureKind::ProcessorFailure,
                "processor completed without producing artifacts".to_string(),
            );
        }

        let mut uris = Vec::with_capacity(artifacts.len());
        let mut hashes = Vec::with_capacity(artifacts.len());
        let mut total_bytes = 0u64;

        for artifact in &artifacts {
            let bytes = match tokio::fs::read(artifact).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    return self.fail(
                        FailureKind::ProcessorFailure,
                        format!("declared artifact {} unreadable: {err}", artifact.display()),
                    );
                }
            };
            total_bytes += bytes.len() as u64;
            hashes.push(sha256_hex(&bytes));

            let uri = match self
                .storage
                .put_processor_data(
                    artifact,
                    &self.boundary.name,
                    &descriptor.dataset,
                    &descriptor.version,
                )
                .await
            {
                Ok(uri) => uri,
                Err(err) => {
                    return self.fail(
                        FailureKind::BackendUnavailable,
                        format!("artifact transfer failed: {err:#}"),
                    );
                }
            };
            uris.push(uri);
        }

        self.provenance
            .record("move to storage success", ProvenanceValue::Flag(true));
        self.provenance
            .record("result URI", ProvenanceValue::uri(uris.join(", ")));
        self.provenance
            .record("total bytes", ProvenanceValue::Bytes(total_bytes));

        UnitOutcome::Success {
            resource: DataPackageResource {
                name: descriptor.dataset.clone(),
                version: descriptor.version.clone(),
                path: uris,
                description: descriptor.description.clone(),
                dataset_format: descriptor.output_format.clone(),
                dataset_size_bytes: total_bytes,
                dataset_hashes: hashes,
                sources: vec![descriptor.source()],
                license: descriptor.data_license.clone(),
            },
        }
    }

    fn fail(&self, kind: FailureKind, detail: String) -> UnitOutcome {
        tracing::warn!(
            unit = self.provenance.scope(),
            kind = kind.as_str(),
            detail = %detail,
            "unit failed"
        );
        self.provenance
            .record("failed", ProvenanceValue::note(detail.clone()));
        UnitOutcome::Failed { kind, detail }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}
