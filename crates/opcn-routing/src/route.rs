use opcn_core::{BlockHeight, ChannelId, NodeId};
use serde::{Deserialize, Serialize};

/// One hop of a source-constructed route: the channel to add the HTLC on,
/// the node at its far end, and the HTLC parameters for that leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHop {
    /// Channel the HTLC for this leg is added on.
    pub channel: ChannelId,
    /// The node receiving the HTLC on this leg.
    pub node: NodeId,
    /// HTLC amount for this leg (payment amount plus downstream fees).
    pub amount: u64,
    /// Absolute expiry height for this leg. Strictly decreasing toward the
    /// destination so every intermediary's outgoing leg expires first.
    pub expiry_height: BlockHeight,
}

/// An ordered sequence of hops from payer to payee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    hops: Vec<RouteHop>,
    /// The amount the destination receives.
    pub amount: u64,
}

impl Route {
    /// Create a route from hops already carrying their amounts and expiries.
    pub fn new(hops: Vec<RouteHop>, amount: u64) -> Self {
        Self { hops, amount }
    }

    /// The ordered hops.
    pub fn hops(&self) -> &[RouteHop] {
        &self.hops
    }

    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }

    /// The first hop (the leg the payer adds).
    pub fn first_hop(&self) -> Option<&RouteHop> {
        self.hops.first()
    }

    /// Total fee: what the payer sends beyond what the payee receives.
    pub fn total_fee(&self) -> u64 {
        self.first_hop()
            .map(|h| h.amount - self.amount)
            .unwrap_or(0)
    }

    /// True if amounts never increase and expiries strictly decrease along
    /// the route (per-hop conservation and expiry invariants).
    pub fn is_well_formed(&self) -> bool {
        self.hops.windows(2).all(|pair| {
            pair[1].amount <= pair[0].amount && pair[1].expiry_height < pair[0].expiry_height
        })
    }
}
