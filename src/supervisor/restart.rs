//! Cancellable one-shot restart timer.
//!
//! At most one restart is pending at a time. Each schedule bumps an epoch and
//! the firing carries the epoch it was scheduled under, so a firing that
//! raced with `cancel` or a newer `schedule` is recognised and ignored.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Restart timer owned by the supervisor actor.
#[derive(Debug)]
pub struct RestartTimer {
    epoch: u64,
    pending: Option<JoinHandle<()>>,
    fired: mpsc::UnboundedSender<u64>,
}

impl RestartTimer {
    /// Create a timer that reports firings on `fired`.
    #[must_use]
    pub fn new(fired: mpsc::UnboundedSender<u64>) -> Self {
        Self {
            epoch: 0,
            pending: None,
            fired,
        }
    }

    /// Schedule a firing after `delay`, replacing any pending one.
    pub fn schedule(&mut self, delay: Duration) {
        self.cancel();
        let epoch = self.epoch;
        let fired = self.fired.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = fired.send(epoch);
        }));
    }

    /// Cancel the pending firing, if any.
    pub fn cancel(&mut self) {
        self.epoch += 1;
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    /// Whether a restart is scheduled and has not been accepted yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Accept a firing. Returns `true` only for the firing of the currently
    /// pending schedule, and only once.
    pub fn accept(&mut self, epoch: u64) -> bool {
        if self.pending.is_none() || epoch != self.epoch {
            return false;
        }
        self.pending = None;
        self.epoch += 1;
        true
    }
}

impl Drop for RestartTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
