use chrono::{DateTime, Utc};
use dashmap::DashMap;
use opcn_channel::HtlcOutcome;
use opcn_core::{ChannelId, NodeId, PaymentHash};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

/// Default per-subscriber queue depth.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 128;

/// This node's part in a completed HTLC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HtlcRole {
    /// We originated the payment.
    Send,
    /// We moved it between two of our channels.
    Forward,
    /// We were the final recipient.
    Receive,
}

impl std::fmt::Display for HtlcRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send => write!(f, "Send"),
            Self::Forward => write!(f, "Forward"),
            Self::Receive => write!(f, "Receive"),
        }
    }
}

/// Immutable record of one HTLC resolution as seen by one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtlcEvent {
    pub node: NodeId,
    pub channel: ChannelId,
    pub payment_hash: PaymentHash,
    pub role: HtlcRole,
    pub outcome: HtlcOutcome,
    pub amount: u64,
    pub timestamp: DateTime<Utc>,
}

impl HtlcEvent {
    pub fn new(
        node: NodeId,
        channel: ChannelId,
        payment_hash: PaymentHash,
        role: HtlcRole,
        outcome: HtlcOutcome,
        amount: u64,
    ) -> Self {
        Self {
            node,
            channel,
            payment_hash,
            role,
            outcome,
            amount,
            timestamp: Utc::now(),
        }
    }
}

/// Fan-out publisher for HTLC events.
///
/// Each subscriber gets its own bounded queue. Publishing never blocks: a
/// subscriber whose queue is full or whose stream was dropped is
/// disconnected, so a slow consumer can never stall settlement.
pub struct EventPublisher {
    subscribers: DashMap<Uuid, mpsc::Sender<HtlcEvent>>,
    capacity: usize,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            capacity,
        }
    }

    /// Open a new subscription with its own queue and cancellation (drop
    /// the returned stream to cancel).
    pub fn subscribe(&self) -> HtlcEventStream {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = Uuid::now_v7();
        self.subscribers.insert(id, tx);
        tracing::debug!(subscriber = %id, "HTLC event subscriber added");
        HtlcEventStream { id, rx }
    }

    /// Deliver an event to every live subscriber, best effort.
    pub fn publish(&self, event: HtlcEvent) {
        tracing::debug!(
            node = %event.node,
            payment_hash = %event.payment_hash,
            role = %event.role,
            outcome = %event.outcome,
            amount = event.amount,
            "publishing HTLC event"
        );
        let mut disconnected = Vec::new();
        for entry in self.subscribers.iter() {
            match entry.value().try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        subscriber = %entry.key(),
                        "subscriber queue full, disconnecting"
                    );
                    disconnected.push(*entry.key());
                }
                Err(TrySendError::Closed(_)) => {
                    disconnected.push(*entry.key());
                }
            }
        }
        for id in disconnected {
            self.subscribers.remove(&id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_QUEUE_CAPACITY)
    }
}

/// A live event subscription. Dropping it cancels the subscription.
pub struct HtlcEventStream {
    id: Uuid,
    rx: mpsc::Receiver<HtlcEvent>,
}

impl HtlcEventStream {
    /// Receive the next event. Returns `None` once the subscription is
    /// disconnected and the queue is drained.
    pub async fn recv(&mut self) -> Option<HtlcEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<HtlcEvent> {
        self.rx.try_recv().ok()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}
