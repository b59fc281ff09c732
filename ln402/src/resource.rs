//! The remote-API contract the payment flow is written against.

use crate::error::ClientError;
use crate::proto::{
    BlockResponse, Bolt11Invoice, Offer, PaymentChallenge, PaymentMethod, SignupResponse,
};

/// The remote L402 server, reduced to the five calls the client needs.
///
/// Every operation is a single request/response round trip: no internal
/// retries, no caching. Retry policy is owned entirely by the flow. The
/// concrete `reqwest` implementation lives in the `ln402-http` crate;
/// tests script this trait directly.
#[async_trait::async_trait]
pub trait ResourceApi: Send + Sync {
    /// Creates a fresh account. The returned `id` is the bearer token.
    async fn signup(&self) -> Result<SignupResponse, ClientError>;

    /// Fetches the authoritative credit balance.
    ///
    /// A non-2xx answer means the token is invalid and maps to
    /// [`ClientError::Unauthorized`].
    async fn balance(&self, token: &str) -> Result<u64, ClientError>;

    /// Fetches the metered resource, or the 402 challenge demanding payment
    /// for it.
    async fn fetch_block(&self, token: &str) -> Result<BlockResponse, ClientError>;

    /// Fetches a fresh payment challenge for a direct credit purchase.
    ///
    /// Implementations must not cache: the challenge's context token is
    /// single-use server-side.
    async fn payment_options(&self, token: &str) -> Result<PaymentChallenge, ClientError>;

    /// Asks the challenge's payment-request endpoint for an invoice covering
    /// the chosen offer.
    async fn request_invoice(
        &self,
        token: &str,
        challenge: &PaymentChallenge,
        offer: &Offer,
        method: PaymentMethod,
    ) -> Result<Bolt11Invoice, ClientError>;
}
