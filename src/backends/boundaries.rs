use super::storage::BackendFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Administrative boundary a package is generated against.
///
/// Boundaries are supplied by an external store and are immutable for the
/// duration of a job; the orchestrator never writes boundary data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Boundary {
    pub id: i64,
    /// Short name, used as the package key on the storage backend.
    pub name: String,
    pub name_long: String,
    /// Work-in-progress boundaries are still packageable but flagged as such.
    pub wip: bool,
}

impl Boundary {
    pub fn new(id: i64, name: impl Into<String>, name_long: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            name_long: name_long.into(),
            wip: false,
        }
    }
}

/// Raised when a requested boundary does not exist in the store.
#[derive(Debug)]
pub struct BoundaryNotFound {
    name: String,
}

impl BoundaryNotFound {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for BoundaryNotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "boundary {} not found", self.name)
    }
}

impl std::error::Error for BoundaryNotFound {}

/// Read-only boundary lookup.
pub trait BoundaryStore: Send + Sync + 'static {
    fn get<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Boundary>;
}

/// Fixed boundary catalogue, populated once at startup.
///
/// Stands in for the relational boundary store in tests and embedded
/// deployments.
#[derive(Debug, Default)]
pub struct InMemoryBoundaryStore {
    boundaries: HashMap<String, Boundary>,
}

impl InMemoryBoundaryStore {
    pub fn new(boundaries: impl IntoIterator<Item = Boundary>) -> Self {
        Self {
            boundaries: boundaries
                .into_iter()
                .map(|boundary| (boundary.name.clone(), boundary))
                .collect(),
        }
    }
}

impl BoundaryStore for InMemoryBoundaryStore {
    fn get<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Boundary> {
        Box::pin(async move {
            self.boundaries
                .get(name)
                .cloned()
                .ok_or_else(|| BoundaryNotFound::new(name).into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_returns_registered_boundary() {
        let store = InMemoryBoundaryStore::new([Boundary::new(1, "KEN", "Kenya")]);
        let boundary = store.get("KEN").await.expect("boundary should resolve");
        assert_eq!(boundary.name, "KEN");
        assert_eq!(boundary.name_long, "Kenya");
        assert!(!boundary.wip);
    }

    #[tokio::test]
    async fn missing_boundary_surfaces_typed_error() {
        let store = InMemoryBoundaryStore::default();
        let err = store.get("XXX").await.unwrap_err();
        assert!(err.downcast_ref::<BoundaryNotFound>().is_some());
        assert!(format!("{err}").contains("XXX"));
    }
}
