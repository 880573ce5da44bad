use super::contract::DatasetProcessor;
use super::descriptor::ProcessorDescriptor;
use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A descriptor bound to its implementation.
pub struct RegisteredProcessor {
    descriptor: ProcessorDescriptor,
    implementation: Arc<dyn DatasetProcessor>,
}

impl RegisteredProcessor {
    pub fn descriptor(&self) -> &ProcessorDescriptor {
        &self.descriptor
    }

    pub fn implementation(&self) -> &dyn DatasetProcessor {
        self.implementation.as_ref()
    }
}

impl std::fmt::Debug for RegisteredProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredProcessor")
            .field("descriptor", &self.descriptor.name())
            .finish()
    }
}

/// Raised when a request names a (dataset, version) with no registered
/// processor. A request-validation error: the job is rejected before any
/// unit runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProcessor {
    dataset: String,
    version: String,
}

impl UnknownProcessor {
    pub fn new(dataset: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for UnknownProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown processor {}.{}", self.dataset, self.version)
    }
}

impl std::error::Error for UnknownProcessor {}

/// Fixed catalogue of processors for a deployment.
///
/// Built once at startup; adding a processor requires a new build, not a
/// runtime operation.
#[derive(Debug, Default)]
pub struct ProcessorRegistry {
    entries: BTreeMap<(String, String), Arc<RegisteredProcessor>>,
}

impl ProcessorRegistry {
    pub fn builder() -> ProcessorRegistryBuilder {
        ProcessorRegistryBuilder::default()
    }

    /// All registered descriptors, ordered by (dataset, version).
    pub fn list(&self) -> Vec<&ProcessorDescriptor> {
        self.entries.values().map(|entry| entry.descriptor()).collect()
    }

    pub fn resolve(
        &self,
        dataset: &str,
        version: &str,
    ) -> Result<Arc<RegisteredProcessor>, UnknownProcessor> {
        self.entries
            .get(&(dataset.to_owned(), version.to_owned()))
            .cloned()
            .ok_or_else(|| UnknownProcessor::new(dataset, version))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default)]
pub struct ProcessorRegistryBuilder {
    entries: Vec<RegisteredProcessor>,
}

impl ProcessorRegistryBuilder {
    pub fn register(
        mut self,
        descriptor: ProcessorDescriptor,
        implementation: impl DatasetProcessor,
    ) -> Self {
        self.entries.push(RegisteredProcessor {
            descriptor,
            implementation: Arc::new(implementation),
        });
        self
    }

    pub fn build(self) -> Result<ProcessorRegistry> {
        let mut entries = BTreeMap::new();
        for entry in self.entries {
            let key = (
                entry.descriptor.dataset.clone(),
                entry.descriptor.version.clone(),
            );
            if entries.contains_key(&key) {
                bail!(
                    "processor {} registered more than once",
                    entry.descriptor.name()
                );
            }
            entries.insert(key, Arc::new(entry));
        }
        Ok(ProcessorRegistry { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::contract::{GenerateFuture, GenerationContext};
    use crate::provenance::datapackage::DataPackageLicense;

    struct NoopProcessor;

    impl DatasetProcessor for NoopProcessor {
        fn generate<'a>(&'a self, _ctx: GenerationContext<'a>) -> GenerateFuture<'a> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    fn descriptor(dataset: &str, version: &str) -> ProcessorDescriptor {
        ProcessorDescriptor {
            dataset: dataset.to_string(),
            version: version.to_string(),
            description: String::new(),
            data_author: String::new(),
            data_license: DataPackageLicense::default(),
            data_origin_url: String::new(),
            output_format: "GeoTIFF".to_string(),
            output_filenames: vec!["{boundary}_out.tif".to_string()],
        }
    }

    #[test]
    fn resolve_returns_registered_entry() {
        let registry = ProcessorRegistry::builder()
            .register(descriptor("population", "1"), NoopProcessor)
            .register(descriptor("roads", "2"), NoopProcessor)
            .build()
            .unwrap();

        let entry = registry.resolve("roads", "2").expect("roads.2 registered");
        assert_eq!(entry.descriptor().name(), "roads.2");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn resolve_unknown_is_a_validation_error() {
        let registry = ProcessorRegistry::builder().build().unwrap();
        let err = registry.resolve("landcover", "9").unwrap_err();
        assert_eq!(format!("{err}"), "unknown processor landcover.9");
    }

    #[test]
    fn list_is_ordered_and_versions_are_distinct() {
        let registry = ProcessorRegistry::builder()
            .register(descriptor("roads", "2"), NoopProcessor)
            .register(descriptor("population", "1"), NoopProcessor)
            .register(descriptor("population", "2"), NoopProcessor)
            .build()
            .unwrap();

        let names: Vec<String> = registry.list().iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["population.1", "population.2", "roads.2"]);
    }

    #[test]
    fn duplicate_registration_fails_the_build() {
        let err = ProcessorRegistry::builder()
            .register(descriptor("population", "1"), NoopProcessor)
            .register(descriptor("population", "1"), NoopProcessor)
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("population.1"));
    }
}
