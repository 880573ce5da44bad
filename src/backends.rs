//! Capability backends consumed by the orchestrator: package storage,
//! processing scratch space, and boundary lookup.

pub mod boundaries;
pub mod localfs;
pub mod processing;
pub mod storage;

pub use boundaries::{Boundary, BoundaryNotFound, BoundaryStore, InMemoryBoundaryStore};
pub use localfs::LocalFsStorageBackend;
pub use processing::{LocalFsProcessingBackend, ProcessingBackend, ScratchLease};
pub use storage::{BackendFuture, StorageBackend};

use crate::runtime::config::StorageBackendKind;
use std::sync::Arc;

/// Initialises the storage backend selected by the configuration.
pub fn init_storage_backend(kind: &StorageBackendKind) -> Arc<dyn StorageBackend> {
    match kind {
        StorageBackendKind::LocalFs {
            root,
            public_base_url,
        } => Arc::new(LocalFsStorageBackend::new(
            root.clone(),
            public_base_url.clone(),
        )),
    }
}
