use opcn_core::{ChannelId, NodeId};

/// Routing errors.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("no route from {from} to {to}")]
    NoRoute { from: NodeId, to: NodeId },

    #[error("channel not announced: {0}")]
    UnknownChannel(ChannelId),

    #[error("invalid announcement: {reason}")]
    InvalidAnnouncement { reason: String },
}
