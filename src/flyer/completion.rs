//! Handle returned by `Session::complete`.

use anyhow::Result;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::hardware::status::SubscriptionStatus;

/// Resolves once the capture subsystem reports the acquisition finished and the
/// box has been disarmed.
///
/// Dropping the handle does not stop the observer; call [`cancel`](Self::cancel)
/// to abandon the wait and leave the hardware armed.
#[derive(Debug)]
pub struct CompletionHandle {
    status: SubscriptionStatus,
    file_name: String,
}

impl CompletionHandle {
    pub(crate) fn new(status: SubscriptionStatus, file_name: &str) -> Self {
        Self {
            status,
            file_name: file_name.to_string(),
        }
    }

    /// Data file of the session being completed
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Abandon the wait; the disarm writes will not be issued.
    pub fn cancel(&self) {
        self.status.cancel();
    }

    /// Token that cancels this wait
    pub fn cancel_token(&self) -> CancellationToken {
        self.status.cancel_token()
    }

    /// True once the observer has stopped
    pub fn is_done(&self) -> bool {
        self.status.is_done()
    }

    /// Wait until the acquisition is done and the box disarmed.
    pub async fn wait(self) -> Result<()> {
        self.status.wait().await
    }

    /// Like [`wait`](Self::wait), but cancels the observer if `timeout` elapses first.
    pub async fn wait_timeout(self, timeout: Duration) -> Result<()> {
        let token = self.cancel_token();
        match tokio::time::timeout(timeout, self.status.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                token.cancel();
                anyhow::bail!(
                    "Acquisition into {} did not finish within {:?}",
                    self.file_name,
                    timeout
                )
            }
        }
    }
}
