use crate::provenance::datapackage::{DataPackageLicense, DataPackageSource};
use serde::{Deserialize, Serialize};

/// Static metadata for one dataset processor, registered once at startup and
/// read-only thereafter. Uniquely identified by (dataset, version).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorDescriptor {
    /// Dataset this processor targets; snake_case, no special characters.
    pub dataset: String,
    /// Processor version string.
    pub version: String,
    pub description: String,
    pub data_author: String,
    pub data_license: DataPackageLicense,
    pub data_origin_url: String,
    /// Format of the declared outputs (e.g. `GeoTIFF`, `GPKG`).
    pub output_format: String,
    /// Declared output filenames; a `{boundary}` placeholder expands to the
    /// boundary name. The package is materialized iff every resolved file
    /// exists on the storage backend.
    pub output_filenames: Vec<String>,
}

impl ProcessorDescriptor {
    /// Canonical `dataset.version` identity, used for provenance namespacing
    /// and lease fingerprints.
    pub fn name(&self) -> String {
        format!("{}.{}", self.dataset, self.version)
    }

    /// Output filenames with the boundary placeholder resolved.
    pub fn resolved_output_files(&self, boundary_name: &str) -> Vec<String> {
        self.output_filenames
            .iter()
            .map(|template| template.replace("{boundary}", boundary_name))
            .collect()
    }

    /// Source attribution entry for the datapackage document.
    pub fn source(&self) -> DataPackageSource {
        DataPackageSource {
            title: self.dataset.clone(),
            path: self.data_origin_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ProcessorDescriptor {
        ProcessorDescriptor {
            dataset: "population".to_string(),
            version: "1".to_string(),
            description: "Gridded population".to_string(),
            data_author: "Population Author".to_string(),
            data_license: DataPackageLicense::new(
                "CC-BY-4.0",
                "https://creativecommons.org/licenses/by/4.0/",
                "Creative Commons Attribution 4.0",
            ),
            data_origin_url: "http://origin".to_string(),
            output_format: "GeoTIFF".to_string(),
            output_filenames: vec!["{boundary}_population.tif".to_string()],
        }
    }

    #[test]
    fn name_joins_dataset_and_version() {
        assert_eq!(descriptor().name(), "population.1");
    }

    #[test]
    fn output_templates_resolve_the_boundary() {
        assert_eq!(
            descriptor().resolved_output_files("KEN"),
            vec!["KEN_population.tif".to_string()]
        );
    }
}
