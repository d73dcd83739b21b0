use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use opcn_core::{BlockHeight, ChannelId, NodeId};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::error::RoutingError;
use crate::route::{Route, RouteHop};

/// Expiry margin granted to the final recipient, in blocks.
const FINAL_EXPIRY_DELTA: u64 = 40;

/// A channel announcement as disseminated by gossip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAnnouncement {
    pub channel_id: ChannelId,
    pub node_a: NodeId,
    pub node_b: NodeId,
    pub capacity: u64,
    /// Flat fee charged for forwarding over this channel.
    pub base_fee: u64,
    /// Blocks of expiry margin required between the incoming and outgoing
    /// leg when forwarding over this channel.
    pub expiry_delta: u64,
}

impl ChannelAnnouncement {
    /// The endpoint opposite `node`, if `node` is an endpoint at all.
    pub fn peer_of(&self, node: &NodeId) -> Option<&NodeId> {
        if &self.node_a == node {
            Some(&self.node_b)
        } else if &self.node_b == node {
            Some(&self.node_a)
        } else {
            None
        }
    }

    fn validate(&self) -> Result<(), RoutingError> {
        if self.node_a == self.node_b {
            return Err(RoutingError::InvalidAnnouncement {
                reason: "both endpoints are the same node".into(),
            });
        }
        if self.capacity == 0 {
            return Err(RoutingError::InvalidAnnouncement {
                reason: "zero capacity".into(),
            });
        }
        Ok(())
    }
}

/// This node's view of the announced channel graph.
///
/// Waiters register a per-channel notification; `announce` fires it. This is
/// the gossip-convergence signal consumed by callers that must not route
/// through a channel before the network knows about it.
pub struct ChannelGraph {
    channels: DashMap<ChannelId, ChannelAnnouncement>,
    waiters: DashMap<ChannelId, Arc<Notify>>,
}

impl ChannelGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            waiters: DashMap::new(),
        }
    }

    /// Record an announcement. Returns `true` if it was new (callers use
    /// this to decide whether to keep flooding it), `false` if known.
    pub fn announce(&self, announcement: ChannelAnnouncement) -> Result<bool, RoutingError> {
        announcement.validate()?;
        let id = announcement.channel_id;
        if self.channels.contains_key(&id) {
            return Ok(false);
        }
        tracing::info!(
            channel = %id,
            node_a = %announcement.node_a,
            node_b = %announcement.node_b,
            capacity = announcement.capacity,
            "channel announced"
        );
        self.channels.insert(id, announcement);
        if let Some(notify) = self.waiters.get(&id) {
            notify.notify_waiters();
        }
        Ok(true)
    }

    /// Whether the channel has been announced.
    pub fn is_channel_announced(&self, id: &ChannelId) -> bool {
        self.channels.contains_key(id)
    }

    /// The announcement for a channel, if known.
    pub fn announcement(&self, id: &ChannelId) -> Option<ChannelAnnouncement> {
        self.channels.get(id).map(|e| e.clone())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Wait until the channel is announced. One registration per awaited
    /// condition; returns immediately if the announcement is already known.
    pub async fn await_announced(&self, id: ChannelId) {
        loop {
            if self.is_channel_announced(&id) {
                return;
            }
            let notify = self
                .waiters
                .entry(id)
                .or_insert_with(|| Arc::new(Notify::new()))
                .clone();
            let notified = notify.notified();
            // Re-check: the announcement may have landed between the first
            // check and the waiter registration.
            if self.is_channel_announced(&id) {
                return;
            }
            notified.await;
        }
    }

    /// Construct a route from `source` to `destination` over announced
    /// channels: shortest path by hop count, amounts accumulated from the
    /// destination backwards (each forwarding channel adds its base fee),
    /// expiries strictly decreasing toward the destination.
    pub fn build_route(
        &self,
        source: &NodeId,
        destination: &NodeId,
        amount: u64,
        height: BlockHeight,
    ) -> Result<Route, RoutingError> {
        let path = self.shortest_path(source, destination)?;

        // Walk the path backwards, accumulating fee and expiry margin.
        let mut hops = Vec::with_capacity(path.len());
        let mut amt = amount;
        let mut expiry = height + FINAL_EXPIRY_DELTA;
        for (channel_id, next_node) in path.iter().rev() {
            hops.push(RouteHop {
                channel: *channel_id,
                node: next_node.clone(),
                amount: amt,
                expiry_height: expiry,
            });
            let announcement = self
                .announcement(channel_id)
                .ok_or(RoutingError::UnknownChannel(*channel_id))?;
            amt += announcement.base_fee;
            expiry += announcement.expiry_delta;
        }
        hops.reverse();

        let route = Route::new(hops, amount);
        debug_assert!(route.is_well_formed());
        tracing::debug!(
            source = %source,
            destination = %destination,
            amount,
            hops = route.hop_count(),
            fee = route.total_fee(),
            "route built"
        );
        Ok(route)
    }

    /// Breadth-first shortest path; returns `(channel, next node)` per hop.
    fn shortest_path(
        &self,
        source: &NodeId,
        destination: &NodeId,
    ) -> Result<Vec<(ChannelId, NodeId)>, RoutingError> {
        let mut adjacency: HashMap<NodeId, Vec<(ChannelId, NodeId)>> = HashMap::new();
        for entry in self.channels.iter() {
            let ann = entry.value();
            adjacency
                .entry(ann.node_a.clone())
                .or_default()
                .push((ann.channel_id, ann.node_b.clone()));
            adjacency
                .entry(ann.node_b.clone())
                .or_default()
                .push((ann.channel_id, ann.node_a.clone()));
        }

        let mut visited: HashSet<NodeId> = HashSet::from([source.clone()]);
        let mut predecessor: HashMap<NodeId, (NodeId, ChannelId)> = HashMap::new();
        let mut queue: VecDeque<NodeId> = VecDeque::from([source.clone()]);

        while let Some(node) = queue.pop_front() {
            if &node == destination {
                // Reconstruct back to the source.
                let mut path = Vec::new();
                let mut current = node;
                while let Some((prev, channel)) = predecessor.get(&current) {
                    path.push((*channel, current.clone()));
                    current = prev.clone();
                }
                path.reverse();
                return Ok(path);
            }
            for (channel, peer) in adjacency.get(&node).into_iter().flatten() {
                if visited.insert(peer.clone()) {
                    predecessor.insert(peer.clone(), (node.clone(), *channel));
                    queue.push_back(peer.clone());
                }
            }
        }

        Err(RoutingError::NoRoute {
            from: source.clone(),
            to: destination.clone(),
        })
    }
}

impl Default for ChannelGraph {
    fn default() -> Self {
        Self::new()
    }
}
