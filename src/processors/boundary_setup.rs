use crate::backends::boundaries::Boundary;
use crate::backends::storage::{StorageBackend, DATAPACKAGE_FILENAME};
use crate::provenance::datapackage;
use crate::provenance::log::{ProvenanceScope, ProvenanceValue};
use anyhow::{Context, Result};

pub const INDEX_FILENAME: &str = "index.html";
pub const LICENSE_FILENAME: &str = "license.html";
pub const VERSION_FILENAME: &str = "version.html";

/// Identity the setup stage leases under; versioned like any processor so its
/// fingerprint cannot collide with a dataset.
pub const SETUP_DATASET: &str = "boundary_setup";
pub const SETUP_VERSION: &str = "1";

/// Builds the boundary's top-level package structure: the boundary folder and
/// its index, license, version, and seed datapackage documents.
///
/// Idempotent: every artifact is created only if missing, so re-running setup
/// (retries, resubmitted requests) is safe.
pub struct BoundarySetupProcessor<'a> {
    boundary: &'a Boundary,
    storage: &'a dyn StorageBackend,
    provenance: ProvenanceScope,
}

impl<'a> BoundarySetupProcessor<'a> {
    pub fn new(
        boundary: &'a Boundary,
        storage: &'a dyn StorageBackend,
        provenance: ProvenanceScope,
    ) -> Self {
        Self {
            boundary,
            storage,
            provenance,
        }
    }

    pub async fn generate(&self) -> Result<()> {
        let name = self.boundary.name.as_str();

        if self.storage.boundary_folder_exists(name).await? {
            tracing::debug!(boundary = name, "boundary folder exists");
            self.provenance.record("folder", ProvenanceValue::note("exists"));
        } else {
            self.storage
                .create_boundary_folder(name)
                .await
                .context("failed to create boundary folder")?;
            tracing::debug!(boundary = name, "boundary folder created");
            self.provenance.record("folder", ProvenanceValue::note("created"));
        }

        self.ensure_file(INDEX_FILENAME, self.render_index().into_bytes(), "index")
            .await?;
        self.ensure_file(
            LICENSE_FILENAME,
            self.render_license().into_bytes(),
            "license",
        )
        .await?;
        self.ensure_file(
            VERSION_FILENAME,
            self.render_version().into_bytes(),
            "version",
        )
        .await?;

        let datapackage_seed = serde_json::to_vec_pretty(&datapackage::empty_datapackage(name))
            .context("failed to encode datapackage seed")?;
        self.ensure_file(DATAPACKAGE_FILENAME, datapackage_seed, "datapackage")
            .await?;

        Ok(())
    }

    async fn ensure_file(&self, filename: &str, contents: Vec<u8>, event: &str) -> Result<()> {
        let name = self.boundary.name.as_str();
        if self.storage.boundary_file_exists(name, filename).await? {
            tracing::debug!(boundary = name, filename, "boundary file exists");
            self.provenance.record(event, ProvenanceValue::note("exists"));
            return Ok(());
        }

        self.storage
            .put_boundary_file(name, filename, &contents)
            .await
            .with_context(|| format!("failed to write boundary file {filename}"))?;
        tracing::debug!(boundary = name, filename, "boundary file created");
        self.provenance.record(event, ProvenanceValue::note("created"));
        Ok(())
    }

    fn render_index(&self) -> String {
        format!(
            "<html><head><title>{name}</title></head>\
             <body><h1>{long} ({name})</h1>\
             <p>Data packages for boundary {name}.</p></body></html>\n",
            name = self.boundary.name,
            long = self.boundary.name_long,
        )
    }

    fn render_license(&self) -> String {
        format!(
            "<html><head><title>{name} licenses</title></head>\
             <body><p>Dataset licenses are listed per resource in \
             {DATAPACKAGE_FILENAME}.</p></body></html>\n",
            name = self.boundary.name,
        )
    }

    fn render_version(&self) -> String {
        format!(
            "<html><body><p>{name} package structure version {SETUP_VERSION}</p></body></html>\n",
            name = self.boundary.name,
        )
    }
}
