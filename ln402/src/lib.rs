//! Core client logic for L402 Lightning micropayments.
//!
//! This crate implements the client side of an HTTP 402 "Payment Required"
//! flow gated behind Lightning Network invoices. A metered request that comes
//! back 402 carries a set of credit offers; the client picks one, asks the
//! server for a BOLT11 invoice, and then waits for payment confirmation on one
//! of two channels: balance polling, or a one-shot callback from an external
//! wallet connector. Once confirmation lands, the original metered request is
//! replayed exactly once.
//!
//! The interesting part is [`flow::PaymentFlow`], the state machine that keeps
//! those two confirmation channels, the single live invoice, and the replay
//! decision consistent and race-free.
//!
//! # Modules
//!
//! - [`proto`] — wire types for the remote L402 server contract
//! - [`error`] — the recoverable error taxonomy
//! - [`identity`] — bearer-token persistence and session lifecycle
//! - [`resource`] — the remote-API trait the flow is written against
//! - [`confirm`] — cancellable payment-confirmation channels
//! - [`wallet`] — the external wallet connector adapter
//! - [`flow`] — the payment-flow orchestrator
//! - [`config`] — timing configuration
//!
//! Transport lives in the companion `ln402-http` crate.

pub mod config;
pub mod confirm;
pub mod error;
pub mod flow;
pub mod identity;
pub mod proto;
pub mod resource;
pub mod wallet;

pub use config::FlowConfig;
pub use error::ClientError;
pub use flow::PaymentFlow;
