use geopack::{
    DataPackageLicense, DatasetProcessor, GenerateFuture, GenerationContext, ProcessorDescriptor,
    ProcessorError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// What a scripted processor does when its generation hook runs.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Write every declared output file, optionally after a pause.
    Succeed { delay: Duration },
    /// Raise a generation error.
    Fail,
    /// Panic mid-generation.
    Panic,
}

/// Test processor with a scripted outcome and an invocation counter, so
/// tests can assert a unit's generation logic ran (or was never reached).
pub struct ScriptedProcessor {
    behavior: Behavior,
    invocations: Arc<AtomicUsize>,
}

impl ScriptedProcessor {
    pub fn new(behavior: Behavior) -> (Self, Arc<AtomicUsize>) {
        let invocations = Arc::new(AtomicUsize::new(0));
        (
            Self {
                behavior,
                invocations: invocations.clone(),
            },
            invocations,
        )
    }

    pub fn succeeding() -> (Self, Arc<AtomicUsize>) {
        Self::new(Behavior::Succeed {
            delay: Duration::ZERO,
        })
    }

    pub fn slow(delay: Duration) -> (Self, Arc<AtomicUsize>) {
        Self::new(Behavior::Succeed { delay })
    }

    pub fn failing() -> (Self, Arc<AtomicUsize>) {
        Self::new(Behavior::Fail)
    }

    pub fn panicking() -> (Self, Arc<AtomicUsize>) {
        Self::new(Behavior::Panic)
    }
}

impl DatasetProcessor for ScriptedProcessor {
    fn generate<'a>(&'a self, ctx: GenerationContext<'a>) -> GenerateFuture<'a> {
        Box::pin(async move {
            self.invocations.fetch_add(1, Ordering::SeqCst);

            match self.behavior {
                Behavior::Succeed { delay } => {
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                    let mut artifacts = Vec::new();
                    for filename in ctx.descriptor.resolved_output_files(&ctx.boundary.name) {
                        let path = ctx.scratch_dir.join(&filename);
                        let contents =
                            format!("{} clipped to {}\n", ctx.descriptor.name(), ctx.boundary.name);
                        tokio::fs::write(&path, contents)
                            .await
                            .map_err(ProcessorError::processor)?;
                        artifacts.push(path);
                    }
                    Ok(artifacts)
                }
                Behavior::Fail => Err(ProcessorError::processor(anyhow::anyhow!(
                    "synthetic generation failure"
                ))),
                Behavior::Panic => panic!("synthetic generation panic"),
            }
        })
    }
}

/// Descriptor for a scripted dataset; one declared output per unit.
pub fn descriptor(dataset: &str, version: &str) -> ProcessorDescriptor {
    ProcessorDescriptor {
        dataset: dataset.to_string(),
        version: version.to_string(),
        description: format!("{dataset} clipped to a boundary"),
        data_author: "Example Data Authors".to_string(),
        data_license: DataPackageLicense::new(
            "CC-BY-4.0",
            "https://creativecommons.org/licenses/by/4.0/",
            "Creative Commons Attribution 4.0",
        ),
        data_origin_url: format!("https://origin.test/{dataset}"),
        output_format: "GeoTIFF".to_string(),
        output_filenames: vec![format!("{{boundary}}_{dataset}.tif")],
    }
}
