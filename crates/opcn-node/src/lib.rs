//! OPCN node orchestrator
//!
//! Wires the channel ledger, forwarding switch, event feed, routing graph,
//! invoice registry, and persistence into one node, with an in-process peer
//! message loop standing in for the wire transport.

pub mod config;
pub mod funding;
pub mod invoices;
pub mod messages;
pub mod node;
pub mod storage;

pub use config::NodeConfig;
pub use funding::{ChannelFunder, InstantFunder};
pub use invoices::{Invoice, InvoiceRegistry};
pub use messages::PeerMessage;
pub use node::Node;
pub use storage::Storage;
