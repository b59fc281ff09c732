//! HTTP transport for the L402 Lightning micropayment client.
//!
//! Implements the core crate's [`ResourceApi`](ln402::resource::ResourceApi)
//! trait against the remote server's REST contract with `reqwest`.
//!
//! # Modules
//!
//! - [`client`] — the [`HttpResourceClient`](client::HttpResourceClient)

pub mod client;

pub use client::HttpResourceClient;
