use opcn_channel::ChannelError;
use opcn_core::{BlockHeight, NodeId, PaymentHash};

/// Forwarding errors.
#[derive(Debug, thiserror::Error)]
pub enum SwitchError {
    #[error("fee insufficient: outgoing {outgoing} exceeds incoming {incoming}")]
    FeeInsufficient { incoming: u64, outgoing: u64 },

    #[error(
        "expiry violation: outgoing leg expires at {outgoing}, not before incoming {incoming}"
    )]
    ExpiryViolation {
        incoming: BlockHeight,
        outgoing: BlockHeight,
    },

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Payment origination errors surfaced to the payer.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("payment already in flight for {0}")]
    PaymentInFlight(PaymentHash),

    #[error("payment timed out: {0}")]
    Timeout(PaymentHash),

    #[error("route failure at {origin}: {reason}")]
    RouteFailure { origin: NodeId, reason: String },

    #[error(transparent)]
    Switch(#[from] SwitchError),
}

impl From<ChannelError> for PaymentError {
    fn from(err: ChannelError) -> Self {
        Self::Switch(SwitchError::Channel(err))
    }
}
