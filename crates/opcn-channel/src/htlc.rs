use chrono::{DateTime, Utc};
use opcn_core::{BlockHeight, HtlcId, PaymentHash};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an HTLC. `Added` is the only non-terminal state; the
/// transition to `Settled` or `Failed` happens exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HtlcState {
    /// Pending: amount is reserved out of the payer side's balance.
    Added,
    /// Resolved by preimage reveal; amount credited to the receiver side.
    Settled,
    /// Resolved by failure; amount refunded to the payer side.
    Failed,
}

impl HtlcState {
    /// Whether this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled | Self::Failed)
    }
}

impl std::fmt::Display for HtlcState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "Added"),
            Self::Settled => write!(f, "Settled"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Direction of an HTLC relative to this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Offered to us by the remote peer; reserved from the remote balance.
    Incoming,
    /// Offered by us to the remote peer; reserved from the local balance.
    Outgoing,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incoming => write!(f, "Incoming"),
            Self::Outgoing => write!(f, "Outgoing"),
        }
    }
}

/// How an HTLC resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HtlcOutcome {
    /// Preimage revealed; value moved to the receiver side.
    Success,
    /// Failed or expired; value returned to the payer side.
    Failure,
}

impl std::fmt::Display for HtlcOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::Failure => write!(f, "Failure"),
        }
    }
}

/// A Hash Time-Locked Contract on a single channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Htlc {
    /// Unique identifier, shared by both endpoints' views of the HTLC.
    pub id: HtlcId,
    /// Locked amount in value units.
    pub amount: u64,
    /// Payment identifier; settling requires its preimage.
    pub payment_hash: PaymentHash,
    /// Absolute height after which the HTLC is refundable.
    pub expiry_height: BlockHeight,
    /// Direction relative to the owning node.
    pub direction: Direction,
    /// Current lifecycle state.
    pub state: HtlcState,
    /// When the HTLC was added.
    pub created_at: DateTime<Utc>,
}

impl Htlc {
    /// Create a fresh HTLC in the `Added` state.
    pub fn new(
        id: HtlcId,
        amount: u64,
        payment_hash: PaymentHash,
        expiry_height: BlockHeight,
        direction: Direction,
    ) -> Self {
        Self {
            id,
            amount,
            payment_hash,
            expiry_height,
            direction,
            state: HtlcState::Added,
            created_at: Utc::now(),
        }
    }
}
