//! `reqwest`-backed implementation of the remote L402 server contract.
//!
//! One method per endpoint, one round trip per call. No retries, no caching:
//! the payment flow in the core crate owns every retry decision, and payment
//! challenges are single-use server-side so they must always be re-fetched.

use ln402::error::ClientError;
use ln402::proto::{
    AccountInfo, BlockInfo, BlockResponse, Bolt11Invoice, InvoiceRequest, InvoiceResponse, Offer,
    PaymentChallenge, PaymentMethod, SignupResponse,
};
use ln402::resource::ResourceApi;
use reqwest::{Client, Response, StatusCode};
use url::Url;

/// Fallback server address used by [`HttpResourceClient::localhost`].
pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8080";

/// HTTP client for the remote L402 server.
#[derive(Debug, Clone)]
pub struct HttpResourceClient {
    http: Client,
    base: Url,
}

impl HttpResourceClient {
    /// Creates a client against the given server base URL.
    #[must_use]
    pub fn new(base: Url) -> Self {
        Self::with_client(Client::new(), base)
    }

    /// Creates a client reusing an existing `reqwest` client (connection
    /// pooling, custom timeouts).
    #[must_use]
    pub fn with_client(http: Client, base: Url) -> Self {
        Self { http, base }
    }

    /// Creates a client against the default local development server.
    #[must_use]
    pub fn localhost() -> Self {
        Self::new(DEFAULT_API_BASE.parse().expect("default base URL parses"))
    }

    /// The server base URL this client talks to.
    #[must_use]
    pub const fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base
            .join(path)
            .map_err(|e| ClientError::protocol(format!("bad endpoint {path}: {e}")))
    }

    async fn get(&self, path: &str, token: Option<&str>) -> Result<Response, ClientError> {
        let url = self.endpoint(path)?;
        tracing::debug!(%url, "GET");
        let mut request = self.http.get(url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.map_err(transport_error)
    }
}

/// Transit failures (refused connection, timeout, DNS) all map to the
/// `Network` taxonomy member.
fn transport_error(e: reqwest::Error) -> ClientError {
    ClientError::network(e.to_string())
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    response
        .json::<T>()
        .await
        .map_err(|e| ClientError::protocol(format!("malformed response body: {e}")))
}

#[async_trait::async_trait]
impl ResourceApi for HttpResourceClient {
    async fn signup(&self) -> Result<SignupResponse, ClientError> {
        let response = self.get("/signup", None).await?;
        if !response.status().is_success() {
            return Err(ClientError::network(format!(
                "signup failed: {}",
                response.status()
            )));
        }
        decode(response).await
    }

    async fn balance(&self, token: &str) -> Result<u64, ClientError> {
        let response = self.get("/info", Some(token)).await?;
        // Contract: any non-2xx from /info means the token is invalid.
        if !response.status().is_success() {
            return Err(ClientError::Unauthorized);
        }
        let info: AccountInfo = decode(response).await?;
        Ok(info.credits)
    }

    async fn fetch_block(&self, token: &str) -> Result<BlockResponse, ClientError> {
        let response = self.get("/block", Some(token)).await?;
        match response.status() {
            StatusCode::PAYMENT_REQUIRED => {
                let challenge: PaymentChallenge = decode(response).await?;
                Ok(BlockResponse::PaymentRequired(challenge))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ClientError::Unauthorized),
            status if status.is_success() => {
                let block: BlockInfo = decode(response).await?;
                Ok(BlockResponse::Block(block))
            }
            status => Err(ClientError::network(format!("block fetch failed: {status}"))),
        }
    }

    async fn payment_options(&self, token: &str) -> Result<PaymentChallenge, ClientError> {
        let response = self.get("/offers", Some(token)).await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ClientError::Unauthorized);
        }
        // The server emits the challenge payload with either a 200 or a 402.
        if status.is_success() || status == StatusCode::PAYMENT_REQUIRED {
            return decode(response).await;
        }
        Err(ClientError::network(format!(
            "payment options fetch failed: {status}"
        )))
    }

    async fn request_invoice(
        &self,
        token: &str,
        challenge: &PaymentChallenge,
        offer: &Offer,
        method: PaymentMethod,
    ) -> Result<Bolt11Invoice, ClientError> {
        let url: Url = challenge
            .payment_request_url
            .parse()
            .map_err(|e| ClientError::protocol(format!("bad payment request URL: {e}")))?;
        let body = InvoiceRequest {
            offer_id: offer.id.clone(),
            payment_method: method,
            payment_context_token: challenge.payment_context_token.clone(),
        };
        tracing::debug!(%url, offer = %offer.id, "requesting invoice");
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ClientError::Unauthorized),
            status if status.is_success() => {
                let invoice: InvoiceResponse = decode(response).await?;
                invoice
                    .invoice()
                    .ok_or_else(|| ClientError::protocol("payment response missing invoice"))
            }
            status => Err(ClientError::network(format!(
                "invoice request failed: {status}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> HttpResourceClient {
        HttpResourceClient::new(server.uri().parse().unwrap())
    }

    fn challenge_body() -> serde_json::Value {
        json!({
            "expiry": "2030-01-01T00:00:00Z",
            "offers": [
                {"id": "offer-1", "amount": 1, "description": "1 credit", "currency": "USD"}
            ],
            "payment_context_token": "ctx-123",
            "payment_request_url": ""
        })
    }

    #[tokio::test]
    async fn test_signup_returns_account() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/signup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "abc",
                "credits": 0,
                "created_at": "2025-01-01T00:00:00Z",
                "last_credit_update_at": "2025-01-01T00:00:00Z"
            })))
            .mount(&server)
            .await;

        let account = client_for(&server).await.signup().await.unwrap();
        assert_eq!(account.id, "abc");
        assert_eq!(account.credits, 0);
    }

    #[tokio::test]
    async fn test_signup_server_error_is_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/signup"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client_for(&server).await.signup().await.unwrap_err();
        assert!(matches!(err, ClientError::Network(_)));
    }

    #[tokio::test]
    async fn test_balance_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"credits": 7})))
            .mount(&server)
            .await;

        let credits = client_for(&server).await.balance("tok-1").await.unwrap();
        assert_eq!(credits, 7);
    }

    #[tokio::test]
    async fn test_balance_non_success_is_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client_for(&server).await.balance("tok-1").await.unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_block_delivered() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/block"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "height": 800_000,
                "hash": "00000000000000000002b1c6",
                "timestamp": "2025-01-01T00:00:00Z"
            })))
            .mount(&server)
            .await;

        let outcome = client_for(&server).await.fetch_block("tok").await.unwrap();
        match outcome {
            BlockResponse::Block(block) => assert_eq!(block.height, 800_000),
            BlockResponse::PaymentRequired(_) => panic!("expected block"),
        }
    }

    #[tokio::test]
    async fn test_block_402_carries_challenge() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/block"))
            .respond_with(ResponseTemplate::new(402).set_body_json(challenge_body()))
            .mount(&server)
            .await;

        let outcome = client_for(&server).await.fetch_block("tok").await.unwrap();
        match outcome {
            BlockResponse::PaymentRequired(challenge) => {
                assert_eq!(challenge.offers.len(), 1);
                assert_eq!(challenge.payment_context_token, "ctx-123");
            }
            BlockResponse::Block(_) => panic!("expected 402 challenge"),
        }
    }

    #[tokio::test]
    async fn test_block_401_is_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/block"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .fetch_block("tok")
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_payment_options_accepts_402_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/offers"))
            .respond_with(ResponseTemplate::new(402).set_body_json(challenge_body()))
            .mount(&server)
            .await;

        let challenge = client_for(&server)
            .await
            .payment_options("tok")
            .await
            .unwrap();
        assert_eq!(challenge.offers[0].id, "offer-1");
    }

    async fn invoice_round_trip(body: serde_json::Value) -> Result<Bolt11Invoice, ClientError> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/l402/payment-request"))
            .and(header("authorization", "Bearer tok"))
            .and(body_json(json!({
                "offer_id": "offer-1",
                "payment_method": "lightning",
                "payment_context_token": "ctx-123"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let mut challenge: PaymentChallenge = serde_json::from_value(challenge_body()).unwrap();
        challenge.payment_request_url = format!("{}/l402/payment-request", server.uri());
        let offer = challenge.offers[0].clone();

        client_for(&server)
            .await
            .request_invoice("tok", &challenge, &offer, PaymentMethod::Lightning)
            .await
    }

    #[tokio::test]
    async fn test_invoice_under_new_key() {
        let invoice = invoice_round_trip(json!({"lightning_invoice": "lnbc1new"}))
            .await
            .unwrap();
        assert_eq!(invoice.as_str(), "lnbc1new");
    }

    #[tokio::test]
    async fn test_invoice_under_legacy_key() {
        let invoice = invoice_round_trip(json!({"payment_request": "lnbc1legacy"}))
            .await
            .unwrap();
        assert_eq!(invoice.as_str(), "lnbc1legacy");
    }

    #[tokio::test]
    async fn test_invoice_missing_field_is_protocol_error() {
        let err = invoice_round_trip(json!({})).await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_invoice_request_hits_challenge_url() {
        // The POST goes to the URL the challenge names, not a fixed path.
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/custom/pay-here"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"lightning_invoice": "lnbc1x"})),
            )
            .mount(&server)
            .await;

        let mut challenge: PaymentChallenge = serde_json::from_value(challenge_body()).unwrap();
        challenge.payment_request_url = format!("{}/custom/pay-here", server.uri());
        let offer = challenge.offers[0].clone();

        let invoice = client_for(&server)
            .await
            .request_invoice("tok", &challenge, &offer, PaymentMethod::Lightning)
            .await
            .unwrap();
        assert_eq!(invoice.as_str(), "lnbc1x");
    }
}
