//! Wire types for the remote L402 server contract.
//!
//! These types mirror the server's JSON bodies bit-exactly. The server side
//! of this contract has historically been unstable in one place: the invoice
//! returned from the payment-request endpoint has appeared under both the
//! `lightning_invoice` and `payment_request` keys. [`InvoiceResponse`]
//! tolerates either.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Response body of `GET /signup`.
///
/// The `id` doubles as the bearer token for every authenticated call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupResponse {
    /// Opaque account identifier, used as the bearer token.
    pub id: String,
    /// Starting credit balance.
    pub credits: u64,
    /// Account creation time, as reported by the server.
    pub created_at: String,
    /// Last time the server touched the credit balance.
    pub last_credit_update_at: String,
}

/// Response body of `GET /info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Current credit balance. Authoritative; never computed locally.
    pub credits: u64,
}

/// The metered resource: the latest Bitcoin block header summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Block height.
    pub height: u64,
    /// Block hash, hex-encoded.
    pub hash: String,
    /// Block timestamp, as reported by the server.
    pub timestamp: String,
}

/// A purchasable credit package inside a [`PaymentChallenge`].
///
/// Opaque to the flow beyond selection; exactly one offer is chosen per
/// payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    /// Offer identifier, echoed back when requesting an invoice.
    pub id: String,
    /// Price of the package.
    pub amount: u64,
    /// Currency the amount is denominated in (e.g. `"USD"`, `"BTC"`).
    pub currency: String,
    /// Human-readable package description.
    pub description: String,
}

/// The 402 response payload: what the server will accept as payment.
///
/// A challenge is single-use on the server side (`payment_context_token`),
/// so it must be re-fetched, never reused, when the purchase flow is
/// revisited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentChallenge {
    /// When the challenge stops being honored. Kept in the server's string
    /// form; this client never interprets it.
    pub expiry: String,
    /// Available credit packages. An empty list is a protocol violation.
    pub offers: Vec<Offer>,
    /// Single-use token tying the eventual invoice request to this challenge.
    pub payment_context_token: String,
    /// Absolute URL to POST the invoice request to.
    pub payment_request_url: String,
}

/// Payment methods understood by the payment-request endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// A BOLT11 Lightning invoice.
    Lightning,
}

/// Request body for `POST {payment_request_url}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRequest {
    /// The chosen offer.
    pub offer_id: String,
    /// How the client intends to pay.
    pub payment_method: PaymentMethod,
    /// The challenge's single-use context token.
    pub payment_context_token: String,
}

/// Response body of the payment-request endpoint.
///
/// Different server versions return the invoice under different keys; both
/// are accepted and [`InvoiceResponse::invoice`] resolves whichever is
/// present, preferring `lightning_invoice`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceResponse {
    /// Invoice under the newer key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lightning_invoice: Option<String>,
    /// Invoice under the legacy key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_request: Option<String>,
}

impl InvoiceResponse {
    /// Resolves the invoice from whichever field the server populated.
    #[must_use]
    pub fn invoice(&self) -> Option<Bolt11Invoice> {
        self.lightning_invoice
            .as_deref()
            .or(self.payment_request.as_deref())
            .map(|s| Bolt11Invoice::new(s.to_owned()))
    }
}

/// An opaque BOLT11 invoice string.
///
/// The client neither parses nor validates it; it is handed verbatim to the
/// confirmation channels and the wallet connector. At most one invoice is
/// live at a time — requesting a new one makes the previous stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bolt11Invoice(String);

impl Bolt11Invoice {
    /// Wraps a raw invoice string.
    #[must_use]
    pub const fn new(raw: String) -> Self {
        Self(raw)
    }

    /// Returns the raw invoice string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Bolt11Invoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a metered resource fetch: either the resource, or a demand
/// for payment.
///
/// Transport failures are reported through
/// [`ClientError`](crate::error::ClientError) instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockResponse {
    /// The server delivered the block (and decremented a credit).
    Block(BlockInfo),
    /// The server wants payment first.
    PaymentRequired(PaymentChallenge),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_deserialize() {
        let json = r#"{
            "expiry": "2025-01-01T00:00:00Z",
            "offers": [
                {"id": "offer-1", "amount": 1, "description": "1 credit", "currency": "USD"}
            ],
            "payment_context_token": "ctx-123",
            "payment_request_url": "https://api.example.com/l402/payment-request"
        }"#;
        let challenge: PaymentChallenge = serde_json::from_str(json).unwrap();
        assert_eq!(challenge.offers.len(), 1);
        assert_eq!(challenge.offers[0].id, "offer-1");
        assert_eq!(challenge.payment_context_token, "ctx-123");
    }

    #[test]
    fn test_invoice_response_new_key() {
        let resp: InvoiceResponse =
            serde_json::from_str(r#"{"lightning_invoice": "lnbc1new"}"#).unwrap();
        assert_eq!(resp.invoice().unwrap().as_str(), "lnbc1new");
    }

    #[test]
    fn test_invoice_response_legacy_key() {
        let resp: InvoiceResponse =
            serde_json::from_str(r#"{"payment_request": "lnbc1legacy"}"#).unwrap();
        assert_eq!(resp.invoice().unwrap().as_str(), "lnbc1legacy");
    }

    #[test]
    fn test_invoice_response_prefers_new_key() {
        let resp: InvoiceResponse = serde_json::from_str(
            r#"{"lightning_invoice": "lnbc1new", "payment_request": "lnbc1legacy"}"#,
        )
        .unwrap();
        assert_eq!(resp.invoice().unwrap().as_str(), "lnbc1new");
    }

    #[test]
    fn test_invoice_response_missing_both() {
        let resp: InvoiceResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.invoice().is_none());
    }

    #[test]
    fn test_invoice_request_serializes_lightning_method() {
        let req = InvoiceRequest {
            offer_id: "offer-1".into(),
            payment_method: PaymentMethod::Lightning,
            payment_context_token: "ctx".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["payment_method"], "lightning");
    }
}
