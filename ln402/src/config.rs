//! Timing configuration for the payment flow.

use std::time::Duration;

/// Tunables for the payment-flow state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowConfig {
    /// Cadence of the balance-polling confirmation channel. The first poll
    /// fires one full interval after the channel starts.
    pub poll_interval: Duration,

    /// Fixed grace period between a confirmed payment and the single
    /// automatic replay of the metered request, allowing for server-side
    /// settlement lag. This is a one-shot delay, not a retry loop.
    pub retry_grace: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            retry_grace: Duration::from_secs(1),
        }
    }
}
