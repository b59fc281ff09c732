//! Adapter over the external Lightning wallet connector.
//!
//! The underlying connector library is process-wide, interactive-only state:
//! it pops a user-facing dialog and must never be initialized from a
//! non-interactive execution context. [`WalletAdapter`] wraps it behind a
//! guarded, lazy, idempotent initializer instead of import-time side effects,
//! and turns its "paid" callback into the same one-shot
//! [`ConfirmationEvent`](crate::confirm::ConfirmationEvent) the polling
//! channel produces.

use crate::confirm::{ChannelHandle, ConfirmationEvent, ConfirmationMethod};
use crate::error::ClientError;
use crate::proto::Bolt11Invoice;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Proof-of-payment handed over by the wallet.
///
/// The preimage is trusted as delivered; this client never verifies it
/// cryptographically and always reconciles the balance with the server
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentProof {
    /// Hex-encoded payment preimage.
    pub preimage: String,
}

/// The external wallet capability: pay one invoice, eventually.
///
/// `pay_invoice` resolves when the wallet completes the payment and never
/// resolves if the user walks away — cancellation is handled outside, by
/// tearing down the task awaiting it.
#[async_trait::async_trait]
pub trait WalletProvider: Send + Sync {
    /// Pays the given invoice, returning the preimage as proof.
    async fn pay_invoice(&self, invoice: &Bolt11Invoice) -> Result<PaymentProof, ClientError>;
}

/// Wraps a [`WalletProvider`] with lifecycle guarantees: guarded one-time
/// initialization, a single session at a time, and an idempotent
/// [`close`](Self::close).
pub struct WalletAdapter<W> {
    provider: Arc<W>,
    app_name: String,
    interactive: bool,
    initialized: OnceLock<()>,
    session: Mutex<Option<CancellationToken>>,
}

impl<W> fmt::Debug for WalletAdapter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletAdapter")
            .field("app_name", &self.app_name)
            .field("interactive", &self.interactive)
            .field("initialized", &self.initialized.get().is_some())
            .finish_non_exhaustive()
    }
}

impl<W: WalletProvider + 'static> WalletAdapter<W> {
    /// Creates an adapter for an interactive environment.
    ///
    /// `app_name` is the name the connector announces to the user's wallet.
    #[must_use]
    pub fn new(provider: W, app_name: impl Into<String>) -> Self {
        Self {
            provider: Arc::new(provider),
            app_name: app_name.into(),
            interactive: true,
            initialized: OnceLock::new(),
            session: Mutex::new(None),
        }
    }

    /// Marks the environment as non-interactive.
    ///
    /// Opening a session then fails with [`ClientError::Wallet`] instead of
    /// initializing the connector where no user can respond to it.
    #[must_use]
    pub fn non_interactive(mut self) -> Self {
        self.interactive = false;
        self
    }

    /// Runs the connector's one-time initialization if it has not happened
    /// yet.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Wallet`] in a non-interactive environment.
    pub fn ensure_initialized(&self) -> Result<(), ClientError> {
        if self.initialized.get().is_some() {
            return Ok(());
        }
        if !self.interactive {
            return Err(ClientError::Wallet(
                "wallet connector requires an interactive environment".into(),
            ));
        }
        self.initialized.get_or_init(|| {
            tracing::debug!(app_name = %self.app_name, "initializing wallet connector");
        });
        Ok(())
    }

    /// Opens a payment session for the invoice.
    ///
    /// Any previous session is closed first; at most one is ever open. The
    /// spawned task delivers at most one event: `Confirmed` with the proof,
    /// or `WalletFailed` — or nothing at all if the session is closed before
    /// the wallet finishes.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Wallet`] if initialization is refused.
    pub fn open(
        &self,
        invoice: Bolt11Invoice,
        attempt: u64,
        events: mpsc::UnboundedSender<ConfirmationEvent>,
    ) -> Result<ChannelHandle, ClientError> {
        self.ensure_initialized()?;
        self.close();

        let cancel = CancellationToken::new();
        *self.session_slot() = Some(cancel.clone());

        let provider = Arc::clone(&self.provider);
        let child = cancel.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                () = child.cancelled() => {
                    tracing::debug!(attempt, "wallet session closed before payment");
                }
                result = provider.pay_invoice(&invoice) => match result {
                    Ok(proof) => {
                        tracing::info!(attempt, "wallet reported payment");
                        let _ = events.send(ConfirmationEvent::Confirmed {
                            attempt,
                            via: ConfirmationMethod::Wallet,
                            proof: Some(proof),
                        });
                    }
                    Err(e) => {
                        let _ = events.send(ConfirmationEvent::WalletFailed {
                            attempt,
                            reason: e.to_string(),
                        });
                    }
                },
            }
        });
        Ok(ChannelHandle::new(cancel, task))
    }

    /// Closes the current session, if any.
    ///
    /// Idempotent and safe with no payment in flight; used on user
    /// cancellation and on teardown before a new attempt.
    pub fn close(&self) {
        if let Some(token) = self.session_slot().take() {
            token.cancel();
        }
    }

    fn session_slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverPays;

    #[async_trait::async_trait]
    impl WalletProvider for NeverPays {
        async fn pay_invoice(&self, _invoice: &Bolt11Invoice) -> Result<PaymentProof, ClientError> {
            std::future::pending().await
        }
    }

    #[test]
    fn test_close_without_session_is_noop() {
        let adapter = WalletAdapter::new(NeverPays, "test-app");
        adapter.close();
        adapter.close();
    }

    #[test]
    fn test_non_interactive_refuses_init() {
        let adapter = WalletAdapter::new(NeverPays, "test-app").non_interactive();
        let err = adapter.ensure_initialized().unwrap_err();
        assert!(matches!(err, ClientError::Wallet(_)));
    }

    #[tokio::test]
    async fn test_open_replaces_previous_session() {
        let adapter = WalletAdapter::new(NeverPays, "test-app");
        let (tx, _rx) = mpsc::unbounded_channel();

        let first = adapter
            .open(Bolt11Invoice::new("lnbc1a".into()), 1, tx.clone())
            .unwrap();
        let _second = adapter
            .open(Bolt11Invoice::new("lnbc1b".into()), 2, tx)
            .unwrap();

        // Opening the second session must have cancelled the first.
        assert!(first.is_shutdown());
        adapter.close();
    }

    #[tokio::test]
    async fn test_initialization_happens_once() {
        let adapter = WalletAdapter::new(NeverPays, "test-app");
        adapter.ensure_initialized().unwrap();
        adapter.ensure_initialized().unwrap();
    }
}
