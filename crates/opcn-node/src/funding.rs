//! Channel funding collaborator seam.
//!
//! On-chain funding transaction construction and broadcast is outside this
//! node; the trait below is the contract the node consumes. `fund` returns
//! only once the funding output is confirmed.

use anyhow::Result;
use async_trait::async_trait;
use opcn_core::{FundingOutpoint, NodeId};
use rand::RngCore;

/// Provides confirmed funding outputs for new channels.
#[async_trait]
pub trait ChannelFunder: Send + Sync {
    /// Fund a channel between `local` and `remote` with `capacity` units,
    /// returning the confirmed funding outpoint.
    async fn fund(&self, local: &NodeId, remote: &NodeId, capacity: u64)
        -> Result<FundingOutpoint>;
}

/// In-process funder producing synthetic confirmed outpoints immediately.
/// Used by tests and single-process deployments.
pub struct InstantFunder;

#[async_trait]
impl ChannelFunder for InstantFunder {
    async fn fund(
        &self,
        local: &NodeId,
        remote: &NodeId,
        capacity: u64,
    ) -> Result<FundingOutpoint> {
        let mut txid = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut txid);
        let outpoint = FundingOutpoint { txid, index: 0 };
        tracing::info!(
            %local,
            %remote,
            capacity,
            outpoint = %outpoint,
            "synthetic funding confirmed"
        );
        Ok(outpoint)
    }
}
