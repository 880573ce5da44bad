use crate::orchestrator::executor::{OrchestratorParams, PackageOrchestrator};
use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Coordinates the orchestrator lifecycle and handles OS signals for
/// graceful shutdowns.
pub struct Runner {
    orchestrator: PackageOrchestrator,
    shutdown: CancellationToken,
    started: bool,
}

impl Runner {
    /// Creates a new runner and wires a root [`CancellationToken`] that
    /// propagates through the entire pipeline (workers, queue, lifecycle
    /// tasks, job drivers).
    pub fn new(params: OrchestratorParams) -> Self {
        let shutdown = CancellationToken::new();
        let orchestrator =
            PackageOrchestrator::with_cancellation_token(params, shutdown.clone());
        Self {
            orchestrator,
            shutdown,
            started: false,
        }
    }

    /// Returns a clone of the root shutdown token so external callers can
    /// integrate with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn orchestrator(&self) -> &PackageOrchestrator {
        &self.orchestrator
    }

    /// Starts the underlying orchestrator.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        self.orchestrator.start().await?;
        self.started = true;
        Ok(())
    }

    /// Stops the pipeline gracefully by cancelling the root token and
    /// delegating to the orchestrator.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }

        self.shutdown.cancel();
        self.orchestrator.stop().await?;
        self.started = false;
        self.reinitialize_shutdown_token();
        Ok(())
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is
    /// cancelled elsewhere.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.start().await?;
        tracing::info!("runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down runner");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
        }

        self.shutdown.cancel();
        self.orchestrator.stop().await?;
        self.started = false;
        self.reinitialize_shutdown_token();
        Ok(())
    }

    fn reinitialize_shutdown_token(&mut self) {
        self.shutdown = CancellationToken::new();
        self.orchestrator.replace_shutdown_root(self.shutdown.clone());
    }
}
