//! The payment-flow orchestrator.
//!
//! [`PaymentFlow`] owns the client-side state machine:
//!
//! ```text
//! Unauthenticated → Idle → AwaitingAction → PaymentPending{method, intent} → Idle
//! ```
//!
//! A metered fetch that comes back 402 turns into an invoice request against
//! the challenge's payment endpoint, and then into a pending payment attempt
//! with exactly one live confirmation channel. Confirmation tears the channel
//! down, reconciles the balance with the server, and — when the payment was
//! started on behalf of a metered fetch — replays that fetch exactly once
//! after a short grace period.
//!
//! All transitions run on the single task that owns the flow: intents are
//! `&mut self` methods, and channel events are applied one at a time through
//! [`PaymentFlow::handle_event`]. Each transition runs to completion before
//! the next event is looked at, so the current invoice and intent have a
//! single writer by construction.

use crate::config::FlowConfig;
use crate::confirm::{self, ChannelHandle, ConfirmationEvent, ConfirmationMethod};
use crate::error::ClientError;
use crate::identity::{Identity, TokenStore};
use crate::proto::{BlockInfo, BlockResponse, Bolt11Invoice, Offer, PaymentChallenge, PaymentMethod};
use crate::resource::ResourceApi;
use crate::wallet::{WalletAdapter, WalletProvider};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Why a payment attempt was started.
///
/// Recorded for the lifetime of one attempt so confirmation knows whether to
/// replay the metered fetch or simply settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentIntent {
    /// Payment unblocks a metered fetch; replay it once on confirmation.
    MeteredAction,
    /// Payment tops up credits; settle into idle on confirmation.
    CreditPurchase,
}

/// Observable state of the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// No bearer token; only signup is possible.
    Unauthenticated,
    /// Signed in, nothing in flight.
    Idle,
    /// A metered fetch is in flight.
    AwaitingAction,
    /// An invoice is live and one confirmation channel is active.
    PaymentPending {
        /// The authoritative confirmation channel.
        method: ConfirmationMethod,
        /// Why the payment was started.
        intent: PaymentIntent,
    },
}

/// How a metered fetch concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockFetch {
    /// The block was delivered and stored.
    Delivered,
    /// The server demanded payment; an attempt is now pending.
    PaymentStarted,
}

/// One live payment attempt. At most one exists at a time; starting a new
/// attempt tears the previous one down first.
#[derive(Debug)]
struct PaymentAttempt {
    id: u64,
    invoice: Bolt11Invoice,
    intent: PaymentIntent,
    method: ConfirmationMethod,
    channel: ChannelHandle,
}

/// The payment-flow state machine.
///
/// Generic over the remote API, the wallet provider, and the token store so
/// every collaborator can be scripted in tests. Dropping the flow aborts any
/// live confirmation channel.
#[derive(Debug)]
pub struct PaymentFlow<A, W, S> {
    api: Arc<A>,
    wallet: WalletAdapter<W>,
    identity: Identity<S>,
    config: FlowConfig,
    credits: u64,
    block: Option<BlockInfo>,
    attempt: Option<PaymentAttempt>,
    attempt_seq: u64,
    awaiting: bool,
    events_tx: mpsc::UnboundedSender<ConfirmationEvent>,
    events_rx: mpsc::UnboundedReceiver<ConfirmationEvent>,
}

impl<A, W, S> PaymentFlow<A, W, S>
where
    A: ResourceApi + 'static,
    W: WalletProvider + 'static,
    S: TokenStore,
{
    /// Creates a flow, reading any persisted bearer token from the store.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Storage`] if the token store is unreadable.
    pub fn new(
        api: Arc<A>,
        wallet: WalletAdapter<W>,
        store: S,
        config: FlowConfig,
    ) -> Result<Self, ClientError> {
        let identity = Identity::load(store)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            api,
            wallet,
            identity,
            config,
            credits: 0,
            block: None,
            attempt: None,
            attempt_seq: 0,
            awaiting: false,
            events_tx,
            events_rx,
        })
    }

    /// The current observable state.
    #[must_use]
    pub fn state(&self) -> FlowState {
        if !self.identity.is_authenticated() {
            FlowState::Unauthenticated
        } else if let Some(attempt) = &self.attempt {
            FlowState::PaymentPending {
                method: attempt.method,
                intent: attempt.intent,
            }
        } else if self.awaiting {
            FlowState::AwaitingAction
        } else {
            FlowState::Idle
        }
    }

    /// Last known credit balance.
    #[must_use]
    pub const fn credits(&self) -> u64 {
        self.credits
    }

    /// The most recently delivered block, if any.
    #[must_use]
    pub const fn block(&self) -> Option<&BlockInfo> {
        self.block.as_ref()
    }

    /// The live invoice of the pending payment attempt, for display.
    #[must_use]
    pub fn pending_invoice(&self) -> Option<&Bolt11Invoice> {
        self.attempt.as_ref().map(|a| &a.invoice)
    }

    /// Validates a token restored from the store by fetching the balance.
    ///
    /// A no-op when no token was persisted. A rejected token signs the
    /// session out before the error is returned.
    ///
    /// # Errors
    ///
    /// Propagates the balance fetch failure.
    pub async fn resume(&mut self) -> Result<(), ClientError> {
        if self.identity.is_authenticated() {
            self.refresh_balance().await?;
        }
        Ok(())
    }

    /// Creates an account, persists its token, and fetches the balance.
    ///
    /// # Errors
    ///
    /// On signup failure the flow stays unauthenticated and the error is
    /// surfaced.
    pub async fn signup(&mut self) -> Result<(), ClientError> {
        let account = self.api.signup().await?;
        tracing::info!("account created");
        self.credits = account.credits;
        self.identity.sign_in(account.id)?;
        self.refresh_balance().await
    }

    /// Signs out: stops any confirmation channel and clears token, balance,
    /// block, invoice, and intent.
    pub fn logout(&mut self) {
        self.teardown_attempt();
        self.identity.sign_out();
        self.credits = 0;
        self.block = None;
        self.awaiting = false;
        tracing::debug!("signed out");
    }

    /// Fetches the metered resource.
    ///
    /// A 402 outcome starts a payment attempt with intent
    /// [`PaymentIntent::MeteredAction`], beginning on the polling channel. A
    /// delivered block refreshes the balance (the server has already
    /// decremented it).
    ///
    /// # Errors
    ///
    /// Network and protocol failures leave the machine in its pre-call state.
    pub async fn fetch_block(&mut self) -> Result<BlockFetch, ClientError> {
        let token = self.require_token()?;
        self.awaiting = true;
        let outcome = self.api.fetch_block(&token).await;
        self.awaiting = false;
        match outcome {
            Ok(BlockResponse::Block(block)) => {
                tracing::debug!(height = block.height, "block delivered");
                self.block = Some(block);
                if let Err(e) = self.refresh_balance().await {
                    if e.is_unauthorized() {
                        return Err(e);
                    }
                    tracing::warn!(error = %e, "balance refresh after block fetch failed");
                }
                Ok(BlockFetch::Delivered)
            }
            Ok(BlockResponse::PaymentRequired(challenge)) => {
                self.begin_attempt(challenge, None, PaymentIntent::MeteredAction)
                    .await?;
                Ok(BlockFetch::PaymentStarted)
            }
            Err(e) => Err(self.absorb_auth_failure(e)),
        }
    }

    /// Starts a direct credit purchase, independent of any metered fetch.
    ///
    /// Fetches a fresh challenge (context tokens are single-use), picks the
    /// offer by id — or the first one when no id is given — and starts a
    /// payment attempt with intent [`PaymentIntent::CreditPurchase`].
    ///
    /// # Errors
    ///
    /// An empty offer list or unknown offer id is [`ClientError::Protocol`];
    /// no channel is opened in that case.
    pub async fn purchase_credits(&mut self, offer_id: Option<&str>) -> Result<(), ClientError> {
        let token = self.require_token()?;
        let challenge = match self.api.payment_options(&token).await {
            Ok(challenge) => challenge,
            Err(e) => return Err(self.absorb_auth_failure(e)),
        };
        self.begin_attempt(challenge, offer_id, PaymentIntent::CreditPurchase)
            .await
    }

    /// Switches the pending attempt to a different confirmation channel.
    ///
    /// The previous channel is torn down before the new one starts; the
    /// polling baseline is re-captured at the switch. Selecting the already
    /// active method is a no-op.
    ///
    /// # Errors
    ///
    /// Fails with [`ClientError::Protocol`] when no payment is pending, or
    /// with [`ClientError::Wallet`] when the wallet refuses to initialize —
    /// in which case the previous channel is restored.
    pub fn select_confirmation(&mut self, method: ConfirmationMethod) -> Result<(), ClientError> {
        let token = self.require_token()?;
        let Some(current) = self.attempt.take() else {
            return Err(ClientError::protocol("no payment pending"));
        };
        if current.method == method {
            self.attempt = Some(current);
            return Ok(());
        }

        // Previous channel down before the new one comes up.
        current.channel.shutdown();
        self.wallet.close();

        let started = self.start_channel(method, current.id, &current.invoice, &token);
        match started {
            Ok(channel) => {
                tracing::debug!(attempt = current.id, ?method, "confirmation channel switched");
                self.attempt = Some(PaymentAttempt {
                    channel,
                    method,
                    ..current
                });
                Ok(())
            }
            Err(e) => {
                // Fall back to the previous method so the attempt is never
                // left without a confirmation channel.
                let channel =
                    self.start_channel(current.method, current.id, &current.invoice, &token)?;
                self.attempt = Some(PaymentAttempt { channel, ..current });
                Err(e)
            }
        }
    }

    /// User-initiated abort of the pending payment.
    ///
    /// Stops the channel and clears invoice and intent; no replay happens.
    /// A no-op when nothing is pending.
    pub fn cancel_payment(&mut self) {
        if self.attempt.is_some() {
            tracing::debug!("payment cancelled by user");
            self.teardown_attempt();
        }
    }

    /// Waits for the next confirmation-channel event and applies it.
    ///
    /// # Errors
    ///
    /// Propagates failures from the applied transition, see
    /// [`handle_event`](Self::handle_event).
    pub async fn tick(&mut self) -> Result<(), ClientError> {
        // The flow holds a sender itself, so recv() cannot return None.
        if let Some(event) = self.events_rx.recv().await {
            self.handle_event(event).await?;
        }
        Ok(())
    }

    /// Applies one confirmation-channel event.
    ///
    /// Events for attempts that are no longer current are dropped, which is
    /// what makes a second confirmation of the same payment — wallet callback
    /// racing the poller — a no-op instead of a double replay.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Wallet`] when the wallet reported a failed
    /// payment (the attempt stays pending), or the failure of the post-
    /// confirmation replay.
    pub async fn handle_event(&mut self, event: ConfirmationEvent) -> Result<(), ClientError> {
        match event {
            ConfirmationEvent::Confirmed { attempt, via, proof } => {
                let Some(current) = self.attempt.as_ref().filter(|a| a.id == attempt) else {
                    tracing::debug!(attempt, "dropping confirmation for stale attempt");
                    return Ok(());
                };
                let intent = current.intent;
                tracing::info!(attempt, ?via, has_proof = proof.is_some(), "payment confirmed");
                self.teardown_attempt();

                // The wallet's proof does not carry the new balance; always
                // reconcile with the server.
                if let Err(e) = self.refresh_balance().await {
                    if e.is_unauthorized() {
                        return Err(e);
                    }
                    tracing::warn!(error = %e, "post-payment balance refresh failed");
                }

                if intent == PaymentIntent::MeteredAction {
                    // Single grace-delayed replay. If it 402s again a fresh
                    // payment cycle starts; it is not auto-looped beyond this
                    // one replay per confirmation.
                    tokio::time::sleep(self.config.retry_grace).await;
                    self.fetch_block().await?;
                }
                Ok(())
            }
            ConfirmationEvent::WalletFailed { attempt, reason } => {
                if self.attempt.as_ref().is_some_and(|a| a.id == attempt) {
                    tracing::warn!(attempt, %reason, "wallet payment failed");
                    return Err(ClientError::Wallet(reason));
                }
                Ok(())
            }
        }
    }

    /// Acquires an invoice for the challenge and starts a pending attempt on
    /// the polling channel.
    ///
    /// The first effect is always tearing down any previous attempt, so two
    /// live channels can never coexist.
    async fn begin_attempt(
        &mut self,
        challenge: PaymentChallenge,
        offer_id: Option<&str>,
        intent: PaymentIntent,
    ) -> Result<(), ClientError> {
        self.teardown_attempt();

        let offer = select_offer(&challenge, offer_id)?.clone();
        let token = self.require_token()?;
        let invoice = match self
            .api
            .request_invoice(&token, &challenge, &offer, PaymentMethod::Lightning)
            .await
        {
            Ok(invoice) => invoice,
            Err(e) => return Err(self.absorb_auth_failure(e)),
        };

        let id = self.next_attempt_id();
        tracing::debug!(attempt = id, offer = %offer.id, ?intent, "invoice acquired");
        let channel = self.start_channel(ConfirmationMethod::Poll, id, &invoice, &token)?;
        self.attempt = Some(PaymentAttempt {
            id,
            invoice,
            intent,
            method: ConfirmationMethod::Poll,
            channel,
        });
        Ok(())
    }

    fn start_channel(
        &self,
        method: ConfirmationMethod,
        attempt: u64,
        invoice: &Bolt11Invoice,
        token: &str,
    ) -> Result<ChannelHandle, ClientError> {
        match method {
            ConfirmationMethod::Poll => Ok(confirm::spawn_poll(
                Arc::clone(&self.api),
                token.to_owned(),
                // Baseline captured once, here; ticks compare against this,
                // not the live value.
                self.credits,
                self.config.poll_interval,
                attempt,
                self.events_tx.clone(),
            )),
            ConfirmationMethod::Wallet => {
                self.wallet
                    .open(invoice.clone(), attempt, self.events_tx.clone())
            }
        }
    }

    fn teardown_attempt(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            attempt.channel.shutdown();
            self.wallet.close();
            tracing::debug!(attempt = attempt.id, "payment attempt torn down");
        }
    }

    async fn refresh_balance(&mut self) -> Result<(), ClientError> {
        let token = self.require_token()?;
        match self.api.balance(&token).await {
            Ok(credits) => {
                self.credits = credits;
                Ok(())
            }
            Err(e) => Err(self.absorb_auth_failure(e)),
        }
    }

    /// Forces the logout transition when a call discovered the token is
    /// invalid, then hands the error back for surfacing.
    fn absorb_auth_failure(&mut self, e: ClientError) -> ClientError {
        if e.is_unauthorized() {
            tracing::warn!("bearer token rejected, signing out");
            self.logout();
        }
        e
    }

    fn require_token(&self) -> Result<String, ClientError> {
        self.identity
            .token()
            .map(str::to_owned)
            .ok_or(ClientError::Unauthorized)
    }

    fn next_attempt_id(&mut self) -> u64 {
        self.attempt_seq += 1;
        self.attempt_seq
    }
}

/// Picks the offer for a payment attempt.
///
/// Without an explicit id this takes the first offer — deterministic, and a
/// documented placeholder until the metered path grows user choice like the
/// purchase path has.
fn select_offer<'a>(
    challenge: &'a PaymentChallenge,
    offer_id: Option<&str>,
) -> Result<&'a Offer, ClientError> {
    if challenge.offers.is_empty() {
        return Err(ClientError::protocol("payment challenge carries no offers"));
    }
    match offer_id {
        None => challenge
            .offers
            .first()
            .ok_or_else(|| ClientError::protocol("payment challenge carries no offers")),
        Some(id) => challenge
            .offers
            .iter()
            .find(|o| o.id == id)
            .ok_or_else(|| ClientError::protocol(format!("offer '{id}' not in challenge"))),
    }
}
