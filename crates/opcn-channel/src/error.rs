use opcn_core::{BlockHeight, ChannelId, HtlcId};

/// Channel-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel not found: {0}")]
    ChannelNotFound(ChannelId),

    #[error("channel already registered: {0}")]
    DuplicateChannel(ChannelId),

    #[error("cannot lock channel {0} as a pair with itself")]
    SameChannelPair(ChannelId),

    #[error("insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: u64, required: u64 },

    #[error("HTLC amount {amount} exceeds spendable balance {spendable}")]
    AmountExceedsBalance { amount: u64, spendable: u64 },

    #[error("HTLC expiry {expiry} is not in the future (current height {height})")]
    ExpiryInPast {
        expiry: BlockHeight,
        height: BlockHeight,
    },

    #[error("preimage mismatch for HTLC {0}")]
    PreimageMismatch(HtlcId),

    #[error("HTLC already resolved: {0}")]
    AlreadyResolved(HtlcId),

    #[error("HTLC not found: {0}")]
    HtlcNotFound(HtlcId),
}
