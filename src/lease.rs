//! Distributed mutual exclusion for unit execution: short-lived leases keyed
//! by the (boundary, dataset, version) fingerprint.

pub mod memory;
pub mod store;

pub use memory::SharedLeaseStore;
pub use store::{AcquireOutcome, Fingerprint, LeaseStore, LeaseToken};
