use anyhow::Result;
use futures::future::BoxFuture;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Deterministic key for one (boundary, dataset, version) unit of work.
///
/// Collision-free by construction: the triple is stored structurally and only
/// rendered to `{boundary}.{dataset}.{version}` for lease-store keys and log
/// output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    boundary: String,
    dataset: String,
    version: String,
}

impl Fingerprint {
    pub fn new(
        boundary: impl Into<String>,
        dataset: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            boundary: boundary.into(),
            dataset: dataset.into(),
            version: version.into(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Rendered lease-store key.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.boundary, self.dataset, self.version)
    }
}

/// Proof of lease ownership. Release is compare-and-delete: a token only
/// frees the lease it was granted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseToken {
    fingerprint: Fingerprint,
    owner: Uuid,
}

impl LeaseToken {
    pub(crate) fn new(fingerprint: Fingerprint, owner: Uuid) -> Self {
        Self { fingerprint, owner }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }
}

/// Result of an acquisition attempt. `Busy` is a deferred outcome, never an
/// error: the current holder is responsible for producing the artifact.
#[derive(Debug)]
pub enum AcquireOutcome {
    Granted(LeaseToken),
    Busy,
}

/// Shared lease store. `acquire` must be atomic across all concurrent callers
/// system-wide, and granted leases must expire after their TTL even if
/// `release` is never called.
pub trait LeaseStore: Send + Sync + 'static {
    fn acquire<'a>(
        &'a self,
        fingerprint: &'a Fingerprint,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<AcquireOutcome>>;

    fn release<'a>(&'a self, token: &'a LeaseToken) -> BoxFuture<'a, Result<()>>;

    /// Purges expired leases, returning how many were removed.
    fn sweep_expired<'a>(&'a self) -> BoxFuture<'a, Result<usize>>;
}
