use super::storage::{
    BackendFuture, StorageBackend, DATAPACKAGE_FILENAME, PROVENANCE_LOG_FILENAME,
};
use crate::provenance::datapackage::{self, DataPackageResource};
use anyhow::{Context, Result};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Package storage rooted at a local filesystem directory.
///
/// The tree mirrors the addressing contract directly:
/// `{root}/{boundary}/{dataset}/{version}/{filename}`, with boundary-level
/// documents at `{root}/{boundary}/`. Public URIs are built by substituting
/// the configured base URL for the root.
#[derive(Debug, Clone)]
pub struct LocalFsStorageBackend {
    root: PathBuf,
    public_base_url: String,
}

impl LocalFsStorageBackend {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        let public_base_url = public_base_url.into().trim_end_matches('/').to_owned();
        Self {
            root: root.into(),
            public_base_url,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn boundary_path(&self, boundary: &str) -> PathBuf {
        self.root.join(boundary)
    }

    fn processor_path(
        &self,
        boundary: &str,
        dataset: &str,
        version: &str,
        filename: &str,
    ) -> PathBuf {
        self.root
            .join(boundary)
            .join(dataset)
            .join(version)
            .join(filename)
    }

    fn build_uri(&self, components: &[&str]) -> String {
        format!("{}/{}", self.public_base_url, components.join("/"))
    }

    async fn read_json_or(&self, path: &Path, default: Value) -> Result<Value> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("malformed JSON document at {}", path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(default),
            Err(err) => {
                Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        }
    }

    async fn write_json(&self, path: &Path, document: &Value) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(document).context("failed to encode document")?;
        tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

impl StorageBackend for LocalFsStorageBackend {
    fn put_processor_data<'a>(
        &'a self,
        local_path: &'a Path,
        boundary: &'a str,
        dataset: &'a str,
        version: &'a str,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let filename = local_path
                .file_name()
                .and_then(|name| name.to_str())
                .with_context(|| format!("artifact path has no filename: {}", local_path.display()))?
                .to_owned();
            let dest = self.processor_path(boundary, dataset, version, &filename);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            tokio::fs::copy(local_path, &dest).await.with_context(|| {
                format!(
                    "failed to move artifact {} into package tree",
                    local_path.display()
                )
            })?;
            Ok(self.build_uri(&[boundary, dataset, version, filename.as_str()]))
        })
    }

    fn processor_file_exists<'a>(
        &'a self,
        boundary: &'a str,
        dataset: &'a str,
        version: &'a str,
        filename: &'a str,
    ) -> BackendFuture<'a, bool> {
        Box::pin(async move {
            Ok(tokio::fs::try_exists(self.processor_path(boundary, dataset, version, filename))
                .await?)
        })
    }

    fn boundary_folder_exists<'a>(&'a self, boundary: &'a str) -> BackendFuture<'a, bool> {
        Box::pin(async move { Ok(tokio::fs::try_exists(self.boundary_path(boundary)).await?) })
    }

    fn create_boundary_folder<'a>(&'a self, boundary: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let path = self.boundary_path(boundary);
            tokio::fs::create_dir_all(&path)
                .await
                .with_context(|| format!("failed to create boundary folder {}", path.display()))
        })
    }

    fn boundary_file_exists<'a>(
        &'a self,
        boundary: &'a str,
        filename: &'a str,
    ) -> BackendFuture<'a, bool> {
        Box::pin(async move {
            Ok(tokio::fs::try_exists(self.boundary_path(boundary).join(filename)).await?)
        })
    }

    fn put_boundary_file<'a>(
        &'a self,
        boundary: &'a str,
        filename: &'a str,
        contents: &'a [u8],
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let path = self.boundary_path(boundary).join(filename);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, contents)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            Ok(self.build_uri(&[boundary, filename]))
        })
    }

    fn add_provenance<'a>(
        &'a self,
        boundary: &'a str,
        run: Value,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let path = self.boundary_path(boundary).join(PROVENANCE_LOG_FILENAME);
            let mut document = self.read_json_or(&path, Value::Array(Vec::new())).await?;
            match document.as_array_mut() {
                Some(runs) => runs.push(run),
                None => document = Value::Array(vec![run]),
            }
            self.write_json(&path, &document).await?;
            Ok(self.build_uri(&[boundary, PROVENANCE_LOG_FILENAME]))
        })
    }

    fn update_datapackage<'a>(
        &'a self,
        boundary: &'a str,
        resource: &'a DataPackageResource,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let path = self.boundary_path(boundary).join(DATAPACKAGE_FILENAME);
            let mut document = self
                .read_json_or(&path, datapackage::empty_datapackage(boundary))
                .await?;
            datapackage::add_resource(&mut document, resource);
            self.write_json(&path, &document).await
        })
    }
}
