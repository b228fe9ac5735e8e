// Unread message polling
//
// Idle -> Polling on run(), Polling -> Stopped once the cancel token is seen
// at the top of an iteration. A fetch or handler run in progress is never
// interrupted; only the pause between ticks is.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use tokio::sync::Notify;

use super::WhatsApi;
use crate::error::WapiError;
use crate::models::MessageGroup;

/// Default pause between unread fetches
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Cooperative stop signal shared between the poller and whoever stops it
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Completes once the token is cancelled
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Registered before the flag check so a cancel in between is not lost
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
    Stopped,
}

/// Repeatedly fetches unread messages and hands each non-empty batch to a
/// handler until cancelled.
pub struct UnreadPoller {
    api: Arc<WhatsApi>,
    interval: Duration,
    cancel: CancelToken,
    state: PollState,
    skip_malformed: bool,
}

impl UnreadPoller {
    pub fn new(api: Arc<WhatsApi>, interval: Duration) -> Self {
        UnreadPoller {
            api,
            interval,
            cancel: CancelToken::new(),
            state: PollState::Idle,
            skip_malformed: false,
        }
    }

    /// Uses an existing token instead of a fresh one
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Logs and drops unread batches the models cannot parse instead of
    /// stopping.
    ///
    /// The page has already marked such a batch as read, so it is not
    /// fetched again on the next tick.
    pub fn skip_malformed_batches(mut self, skip: bool) -> Self {
        self.skip_malformed = skip;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Polls until the cancel token is set.
    ///
    /// Every tick fetches the unread groups and, when there are any, calls
    /// `handler` once with the whole batch in chat order. A handler error or
    /// a failed fetch ends the loop and is returned as is; handlers that want
    /// to keep polling must deal with their own errors.
    ///
    /// Cancellation is checked before each tick and also ends the pause
    /// between ticks, so a stop request is seen once the current fetch and
    /// handler run finish.
    pub async fn run<F>(&mut self, mut handler: F) -> Result<()>
    where
        F: FnMut(Vec<MessageGroup>) -> Result<()>,
    {
        if self.state != PollState::Idle {
            return Err(anyhow!("poller cannot start from state {:?}", self.state));
        }

        self.state = PollState::Polling;
        info!("Polling for unread messages every {:?}", self.interval);

        let outcome = self.poll(&mut handler).await;
        self.state = PollState::Stopped;

        match &outcome {
            Ok(()) => info!("Unread polling stopped"),
            Err(e) => info!("Unread polling ended with error: {}", e),
        }
        outcome
    }

    async fn poll<F>(&self, handler: &mut F) -> Result<()>
    where
        F: FnMut(Vec<MessageGroup>) -> Result<()>,
    {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let groups = match self.api.get_unread().await {
                Ok(groups) => groups,
                Err(e @ WapiError::MalformedPayload { .. }) if self.skip_malformed => {
                    warn!("Skipping unread batch: {}", e);
                    Vec::new()
                }
                Err(e) => return Err(e.into()),
            };
            if !groups.is_empty() {
                debug!("Delivering {} unread groups", groups.len());
                handler(groups)?;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.cancel.cancelled() => debug!("Poll pause cut short by cancellation"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());

        token.cancel();
        assert!(other.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        // Already cancelled tokens complete immediately
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .unwrap();
    }
}
