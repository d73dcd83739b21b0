//! OPCN routing layer
//!
//! The local view of the channel graph: announcements learned from gossip,
//! a readiness signal for callers that must not route through a channel
//! before it is announced, and source-route construction.

pub mod error;
pub mod graph;
pub mod route;

pub use error::RoutingError;
pub use graph::{ChannelAnnouncement, ChannelGraph};
pub use route::{Route, RouteHop};
