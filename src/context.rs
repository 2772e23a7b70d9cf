use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::Cancelled;
use crate::types::Settings;

/// Everything one command needs, threaded through the pipeline explicitly.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub settings: Settings,
    cancel: watch::Receiver<bool>,
}

impl CommandContext {
    pub fn new(settings: Settings, cancel: watch::Receiver<bool>) -> Self {
        Self { settings, cancel }
    }

    /// A context nobody can cancel.
    pub fn detached(settings: Settings) -> Self {
        let (_, cancel) = watch::channel(false);
        Self::new(settings, cancel)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Sleep for `duration` unless the command is cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        let deadline = Instant::now() + duration;
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => Ok(()),
            cancelled = wait_for_cancel(self.cancel.clone()) => {
                if cancelled {
                    return Err(Cancelled);
                }
                // Sender gone: nobody can cancel any more.
                tokio::time::sleep_until(deadline).await;
                Ok(())
            }
        }
    }
}

/// Resolves to true on cancellation, false once cancellation became impossible.
async fn wait_for_cancel(mut cancel: watch::Receiver<bool>) -> bool {
    cancel.wait_for(|flag| *flag).await.is_ok()
}
