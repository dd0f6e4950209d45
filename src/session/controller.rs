use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::scheduler::{SessionError, SessionScheduler};
use super::state::SessionReport;

/// Runs a scheduler as a background task and owns its cancellation token.
pub struct SessionController {
    handle: Option<JoinHandle<Result<SessionReport, SessionError>>>,
    cancel_token: CancellationToken,
}

impl SessionController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn start(&mut self, scheduler: SessionScheduler) -> Result<()> {
        if self.handle.is_some() {
            bail!("capture session already active");
        }

        let handle = tokio::spawn(scheduler.run(self.cancel_token.clone()));
        self.handle = Some(handle);
        Ok(())
    }

    /// Token that stops the running session when cancelled. Signal handlers hold a clone.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn cancel(&self) {
        if !self.cancel_token.is_cancelled() {
            info!("Cancelling capture session");
            self.cancel_token.cancel();
        }
    }

    /// Wait for the session task to finish draining.
    pub async fn wait(&mut self) -> Result<SessionReport> {
        let Some(handle) = self.handle.take() else {
            bail!("no capture session running");
        };

        let report = handle
            .await
            .context("capture session task failed to join")?
            .context("capture session failed")?;
        Ok(report)
    }
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}
