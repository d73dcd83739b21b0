use opcn_core::{ChannelId, FundingOutpoint, HtlcId, NodeId, PaymentHash, Preimage};
use opcn_routing::{ChannelAnnouncement, RouteHop};

/// Messages exchanged between in-process peers.
///
/// This is the interface to the out-of-scope wire transport: add, settle,
/// and fail mirror the channel-update messages a real peer link would
/// carry; open and announce mirror funding notification and gossip.
#[derive(Debug, Clone)]
pub enum PeerMessage {
    /// The sender funded a channel with us; create our view of it.
    OpenChannel {
        from: NodeId,
        funding: FundingOutpoint,
        capacity: u64,
    },

    /// Gossip: a channel exists. Re-flooded until every node has seen it.
    AnnounceChannel { announcement: ChannelAnnouncement },

    /// The sender added an HTLC offered to us on `channel`.
    /// `remaining_hops` is the rest of the route past us (source routing;
    /// onion privacy is not modeled here).
    AddHtlc {
        from: NodeId,
        channel: ChannelId,
        htlc_id: HtlcId,
        amount: u64,
        payment_hash: PaymentHash,
        expiry_height: u64,
        remaining_hops: Vec<RouteHop>,
    },

    /// Downstream settled our outgoing HTLC by revealing the preimage.
    SettleHtlc {
        from: NodeId,
        channel: ChannelId,
        htlc_id: HtlcId,
        preimage: Preimage,
    },

    /// Downstream failed our outgoing HTLC. `origin` is the hop where the
    /// failure originated; it is preserved while propagating backward.
    FailHtlc {
        from: NodeId,
        channel: ChannelId,
        htlc_id: HtlcId,
        origin: NodeId,
        reason: String,
    },

    /// Stop the node's message loop.
    Shutdown,
}
