use crate::provenance::datapackage::DataPackageResource;
use anyhow::Result;
use futures::future::BoxFuture;
use std::path::Path;

/// Future type returned by backend capability traits.
pub type BackendFuture<'a, T> = BoxFuture<'a, Result<T>>;

/// Name of the per-boundary datapackage document.
pub const DATAPACKAGE_FILENAME: &str = "datapackage.json";
/// Name of the per-boundary provenance document.
pub const PROVENANCE_LOG_FILENAME: &str = "provenance.json";

/// Durable package storage consumed by the orchestrator.
///
/// Artifacts are addressed `{boundary}/{dataset}/{version}/{filename}`; a
/// package is materialized iff every file its descriptor declares exists at
/// that address. Writes are assumed atomic at file granularity; the
/// orchestrator layers no transactionality on top.
pub trait StorageBackend: Send + Sync + 'static {
    /// Moves a generated artifact into the package tree and returns its
    /// public URI.
    fn put_processor_data<'a>(
        &'a self,
        local_path: &'a Path,
        boundary: &'a str,
        dataset: &'a str,
        version: &'a str,
    ) -> BackendFuture<'a, String>;

    /// Whether a single declared output file is already materialized.
    fn processor_file_exists<'a>(
        &'a self,
        boundary: &'a str,
        dataset: &'a str,
        version: &'a str,
        filename: &'a str,
    ) -> BackendFuture<'a, bool>;

    fn boundary_folder_exists<'a>(&'a self, boundary: &'a str) -> BackendFuture<'a, bool>;

    fn create_boundary_folder<'a>(&'a self, boundary: &'a str) -> BackendFuture<'a, ()>;

    fn boundary_file_exists<'a>(
        &'a self,
        boundary: &'a str,
        filename: &'a str,
    ) -> BackendFuture<'a, bool>;

    /// Writes a boundary-level document (index, license, datapackage seed)
    /// and returns its public URI.
    fn put_boundary_file<'a>(
        &'a self,
        boundary: &'a str,
        filename: &'a str,
        contents: &'a [u8],
    ) -> BackendFuture<'a, String>;

    /// Appends one job's provenance record to the boundary's provenance
    /// document and returns the document URI.
    fn add_provenance<'a>(
        &'a self,
        boundary: &'a str,
        run: serde_json::Value,
    ) -> BackendFuture<'a, String>;

    /// Merges a resource entry (and its license) into the boundary's
    /// datapackage document.
    fn update_datapackage<'a>(
        &'a self,
        boundary: &'a str,
        resource: &'a DataPackageResource,
    ) -> BackendFuture<'a, ()>;
}
