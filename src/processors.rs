//! Processor plugin surface: the generation contract implemented by each
//! dataset processor, descriptor metadata, the startup-time registry, and the
//! internal boundary-setup processor.

pub mod boundary_setup;
pub mod contract;
pub mod descriptor;
pub mod registry;

pub use contract::{DatasetProcessor, FailureKind, GenerateFuture, GenerationContext, ProcessorError};
pub use descriptor::ProcessorDescriptor;
pub use registry::{ProcessorRegistry, ProcessorRegistryBuilder, RegisteredProcessor, UnknownProcessor};
