//! Job-scoped provenance aggregation and the data-package resource model
//! embedded into job results.

pub mod datapackage;
pub mod log;

pub use datapackage::{DataPackageLicense, DataPackageResource, DataPackageSource};
pub use log::{ProvenanceEntry, ProvenanceLog, ProvenanceScope, ProvenanceValue, SharedProvenanceLog};
