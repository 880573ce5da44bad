use super::storage::BackendFuture;
use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Scratch-space provider for in-flight processor runs.
///
/// Scratch is unit-local working storage on the node's filesystem; nothing in
/// it survives the unit. Leftovers from crashed units are removed by
/// `sweep_boundary` during finalise.
pub trait ProcessingBackend: Send + Sync + 'static {
    /// Allocates an empty scratch directory scoped to one unit execution.
    fn allocate_scratch<'a>(
        &'a self,
        boundary: &'a str,
        dataset: &'a str,
        version: &'a str,
    ) -> BackendFuture<'a, ScratchLease>;

    /// Removes all scratch space held under a boundary.
    fn sweep_boundary<'a>(&'a self, boundary: &'a str) -> BackendFuture<'a, ()>;
}

/// Guard for an allocated scratch directory.
///
/// The directory is deleted on every exit path: call [`ScratchLease::release`]
/// for the normal path; dropping an unreleased lease removes it best-effort.
#[derive(Debug)]
pub struct ScratchLease {
    path: PathBuf,
    released: bool,
}

impl ScratchLease {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("failed to release scratch {}", self.path.display())),
        }
    }
}

impl Drop for ScratchLease {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = std::fs::remove_dir_all(&self.path) {
                if err.kind() != ErrorKind::NotFound {
                    tracing::warn!(
                        scratch = %self.path.display(),
                        error = %err,
                        "failed to remove scratch directory on drop"
                    );
                }
            }
        }
    }
}

/// Scratch space under a configured local root:
/// `{root}/{boundary}/{dataset}.{version}/{allocation-id}`.
#[derive(Debug, Clone)]
pub struct LocalFsProcessingBackend {
    root: PathBuf,
}

impl LocalFsProcessingBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ProcessingBackend for LocalFsProcessingBackend {
    fn allocate_scratch<'a>(
        &'a self,
        boundary: &'a str,
        dataset: &'a str,
        version: &'a str,
    ) -> BackendFuture<'a, ScratchLease> {
        Box::pin(async move {
            let path = self
                .root
                .join(boundary)
                .join(format!("{dataset}.{version}"))
                .join(Uuid::new_v4().simple().to_string());
            tokio::fs::create_dir_all(&path)
                .await
                .with_context(|| format!("failed to allocate scratch {}", path.display()))?;
            Ok(ScratchLease::new(path))
        })
    }

    fn sweep_boundary<'a>(&'a self, boundary: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let path = self.root.join(boundary);
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => {
                    Err(err).with_context(|| format!("failed to sweep scratch {}", path.display()))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn release_removes_the_directory() {
        let dir = TempDir::new().unwrap();
        let backend = LocalFsProcessingBackend::new(dir.path());

        let lease = backend
            .allocate_scratch("KEN", "population", "1")
            .await
            .unwrap();
        let path = lease.path().to_owned();
        assert!(path.exists());

        tokio::fs::write(path.join("partial.tif"), b"bytes")
            .await
            .unwrap();
        lease.release().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn dropping_an_unreleased_lease_cleans_up() {
        let dir = TempDir::new().unwrap();
        let backend = LocalFsProcessingBackend::new(dir.path());

        let lease = backend.allocate_scratch("KEN", "roads", "2").await.unwrap();
        let path = lease.path().to_owned();
        assert!(path.exists());

        drop(lease);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn sweep_boundary_removes_all_leftovers() {
        let dir = TempDir::new().unwrap();
        let backend = LocalFsProcessingBackend::new(dir.path());

        let first = backend
            .allocate_scratch("KEN", "population", "1")
            .await
            .unwrap();
        let second = backend.allocate_scratch("KEN", "roads", "2").await.unwrap();
        // Simulate a crashed unit that never released.
        std::mem::forget(second);

        backend.sweep_boundary("KEN").await.unwrap();
        assert!(!dir.path().join("KEN").exists());

        // Sweeping an already-clean boundary is a no-op.
        backend.sweep_boundary("KEN").await.unwrap();
        drop(first);
    }
}
