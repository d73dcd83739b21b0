//! OPCN core types
//!
//! Shared identifiers and the payment hash scheme used across the channel,
//! routing, switch, and node layers.

pub mod error;
pub mod types;

pub use error::CoreError;
pub use types::{
    BlockHeight, ChannelId, FundingOutpoint, HtlcId, NodeId, PaymentHash, Preimage,
};
