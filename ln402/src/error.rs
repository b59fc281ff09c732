//! The recoverable error taxonomy for the L402 client.

/// Errors surfaced by the client.
///
/// Every variant is recoverable at the flow boundary: none of them crash the
/// process, each maps to a presentation-visible message and a defined state
/// transition. [`Unauthorized`](Self::Unauthorized) additionally forces a
/// logout wherever it is observed.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request failed in transit, or the server answered with a status
    /// the contract does not otherwise classify.
    #[error("network error: {0}")]
    Network(String),

    /// The server rejected the bearer token.
    #[error("unauthorized: bearer token rejected")]
    Unauthorized,

    /// The response was well-formed HTTP but violated the contract — a 402
    /// with no offers, a payment response missing the invoice, and the like.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The user aborted the payment. Not a fault.
    #[error("payment cancelled")]
    Cancelled,

    /// The wallet connector failed or is unavailable in this environment.
    #[error("wallet error: {0}")]
    Wallet(String),

    /// Token persistence failed.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl ClientError {
    /// Shorthand for a [`Network`](Self::Network) error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Shorthand for a [`Protocol`](Self::Protocol) error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Whether this error means the session token is no longer valid.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}
