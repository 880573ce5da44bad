use anyhow::Error as AnyError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Captures the first fatal orchestration error and drives shutdown.
///
/// Unit-level failures are contained as data in job results and never pass
/// through here; this handler exists for the machinery itself (a worker task
/// dying outside a unit), where continuing would hang job barriers silently.
#[derive(Clone)]
pub struct FatalErrorHandler {
    inner: Arc<FatalInner>,
}

struct FatalInner {
    triggered: AtomicBool,
    root_shutdown: CancellationToken,
    run_shutdown: CancellationToken,
    captured_error: Mutex<Option<SharedFatalError>>,
}

#[derive(Clone)]
struct SharedFatalError {
    inner: Arc<AnyError>,
}

impl fmt::Debug for SharedFatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedFatalError").field(&self.inner).finish()
    }
}

impl fmt::Display for SharedFatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.inner.as_ref(), f)
    }
}

impl std::error::Error for SharedFatalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref().as_ref())
    }
}

impl FatalErrorHandler {
    pub fn new(root_shutdown: CancellationToken, run_shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(FatalInner {
                triggered: AtomicBool::new(false),
                root_shutdown,
                run_shutdown,
                captured_error: Mutex::new(None),
            }),
        }
    }

    /// Records the error (first caller wins), cancels both shutdown tokens,
    /// and hands the error back for propagation.
    pub fn trigger(&self, context: &str, error: AnyError) -> AnyError {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            return error;
        }

        tracing::error!(
            context,
            error = %error,
            "fatal orchestration error; initiating shutdown"
        );

        let shared = SharedFatalError {
            inner: Arc::new(error),
        };
        {
            let mut slot = self.inner.captured_error.lock().unwrap();
            if slot.is_none() {
                *slot = Some(shared.clone());
            }
        }

        self.inner.run_shutdown.cancel();
        self.inner.root_shutdown.cancel();

        AnyError::new(shared)
    }

    pub fn error(&self) -> Option<AnyError> {
        self.inner
            .captured_error
            .lock()
            .unwrap()
            .as_ref()
            .map(|error| AnyError::new(error.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn first_trigger_cancels_tokens_and_captures() {
        let root = CancellationToken::new();
        let run = CancellationToken::new();
        let handler = FatalErrorHandler::new(root.clone(), run.clone());

        handler.trigger("worker 0 died", anyhow!("boom"));

        assert!(root.is_cancelled());
        assert!(run.is_cancelled());
        let captured = handler.error().expect("error should be captured");
        assert!(format!("{captured}").contains("boom"));
    }

    #[test]
    fn later_triggers_do_not_overwrite_the_first() {
        let handler =
            FatalErrorHandler::new(CancellationToken::new(), CancellationToken::new());
        handler.trigger("first", anyhow!("first error"));
        handler.trigger("second", anyhow!("second error"));

        let captured = handler.error().expect("error should be captured");
        assert!(format!("{captured}").contains("first error"));
    }
}
