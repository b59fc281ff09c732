//! Payment-confirmation channels.
//!
//! A pending payment is confirmed over exactly one of two channels: polling
//! the credit balance until it rises above the baseline captured when the
//! channel started, or a one-shot callback from the external wallet. Both are
//! modeled as a spawned task holding a [`CancellationToken`]; tearing the
//! channel down is always the same operation regardless of kind, and happens
//! on cancel, method switch, new attempt, logout, and drop. An untracked
//! timer surviving any of those is the primary resource leak this design
//! exists to prevent.

use crate::resource::ResourceApi;
use crate::wallet::PaymentProof;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Which confirmation channel is authoritative for a pending payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationMethod {
    /// Poll the balance endpoint on a fixed interval.
    Poll,
    /// Wait for the external wallet's one-shot paid callback.
    Wallet,
}

/// Events delivered from a confirmation channel back to the flow.
///
/// Every event carries the id of the payment attempt it belongs to; the flow
/// drops events whose attempt is no longer current.
#[derive(Debug)]
pub enum ConfirmationEvent {
    /// The payment was observed as settled.
    Confirmed {
        /// Attempt the confirmation belongs to.
        attempt: u64,
        /// Channel that delivered it.
        via: ConfirmationMethod,
        /// Proof-of-payment, when the wallet supplied one. The flow does not
        /// verify it; the balance is reconciled with the server regardless.
        proof: Option<PaymentProof>,
    },
    /// The wallet reported a payment failure. The attempt stays pending so
    /// the user can retry or cancel.
    WalletFailed {
        /// Attempt the failure belongs to.
        attempt: u64,
        /// Wallet-reported reason.
        reason: String,
    },
}

/// Handle to a live confirmation channel task.
///
/// Dropping the handle cancels the task, so teardown cannot be forgotten by
/// any path that replaces or clears the current attempt.
#[derive(Debug)]
pub struct ChannelHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    /// Wraps a spawned channel task and its cancellation token.
    #[must_use]
    pub const fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { cancel, task }
    }

    /// Stops the channel. Safe to call more than once.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Whether the channel has been stopped.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Starts the polling confirmation channel.
///
/// `baseline` is the balance captured once, at the moment the channel starts
/// — not re-read each tick — so unrelated balance movement cannot shift the
/// comparison. A tick observing `current > baseline` confirms the payment
/// and ends the task. Poll failures are logged and skipped; the next tick
/// tries again.
pub fn spawn_poll<A: ResourceApi + 'static>(
    api: Arc<A>,
    token: String,
    baseline: u64,
    interval: Duration,
    attempt: u64,
    events: mpsc::UnboundedSender<ConfirmationEvent>,
) -> ChannelHandle {
    let cancel = CancellationToken::new();
    let child = cancel.clone();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = child.cancelled() => break,
                _ = ticker.tick() => match api.balance(&token).await {
                    Ok(current) if current > baseline => {
                        tracing::info!(attempt, baseline, current, "payment observed via polling");
                        let _ = events.send(ConfirmationEvent::Confirmed {
                            attempt,
                            via: ConfirmationMethod::Poll,
                            proof: None,
                        });
                        break;
                    }
                    Ok(current) => {
                        tracing::debug!(attempt, baseline, current, "poll tick, no change");
                    }
                    Err(e) => {
                        tracing::warn!(attempt, error = %e, "payment poll failed, will retry");
                    }
                },
            }
        }
    });
    ChannelHandle::new(cancel, task)
}
