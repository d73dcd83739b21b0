//! The OPCN node orchestrator.
//!
//! Ties the layers together: channel ledger, forwarding switch, event
//! publisher, routing graph, invoices, and persistence. Peer traffic runs
//! over an in-process message loop; the wire transport it stands in for is
//! an external collaborator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use dashmap::DashMap;
use opcn_channel::{
    Channel, ChannelBalances, ChannelError, ChannelLedger, Direction, HtlcOutcome,
};
use opcn_core::{BlockHeight, ChannelId, HtlcId, NodeId, PaymentHash, Preimage};
use opcn_routing::{ChannelAnnouncement, ChannelGraph, Route, RouteHop};
use opcn_switch::{
    EventPublisher, ForwardingPair, ForwardingSwitch, HtlcEvent, HtlcEventStream, HtlcRole,
    PaymentError, PaymentOutcome, PaymentRegistry,
};
use tokio::sync::mpsc;

use crate::config::NodeConfig;
use crate::funding::{ChannelFunder, InstantFunder};
use crate::invoices::{Invoice, InvoiceRegistry};
use crate::messages::PeerMessage;
use crate::storage::Storage;

/// Depth of each peer's message inbox.
const PEER_INBOX_CAPACITY: usize = 256;

/// A payment-channel network node.
pub struct Node {
    shared: Arc<NodeShared>,
    /// Taken by `start`.
    inbox_rx: Mutex<Option<mpsc::Receiver<PeerMessage>>>,
}

struct NodeShared {
    id: NodeId,
    config: NodeConfig,
    ledger: Arc<ChannelLedger>,
    switch: ForwardingSwitch,
    publisher: EventPublisher,
    graph: ChannelGraph,
    payments: PaymentRegistry,
    invoices: InvoiceRegistry,
    funder: Box<dyn ChannelFunder>,
    storage: Option<Storage>,
    height: AtomicU64,
    peers: DashMap<NodeId, mpsc::Sender<PeerMessage>>,
    inbox_tx: mpsc::Sender<PeerMessage>,
}

impl Node {
    /// Create a node with the in-process funder.
    pub fn new(config: NodeConfig) -> Result<Self> {
        Self::with_funder(config, Box::new(InstantFunder))
    }

    /// Create a node with a custom funding collaborator. Opens storage if
    /// configured and restores any persisted state.
    pub fn with_funder(config: NodeConfig, funder: Box<dyn ChannelFunder>) -> Result<Self> {
        let id = NodeId::new(config.node.id.clone())?;
        let storage = match &config.storage.data_dir {
            Some(dir) => Some(Storage::open(dir)?),
            None => None,
        };

        let ledger = Arc::new(ChannelLedger::new());
        let switch = ForwardingSwitch::new(Arc::clone(&ledger));
        let (inbox_tx, inbox_rx) = mpsc::channel(PEER_INBOX_CAPACITY);

        let shared = Arc::new(NodeShared {
            id: id.clone(),
            height: AtomicU64::new(config.node.initial_height),
            publisher: EventPublisher::new(config.payments.event_queue_capacity),
            config,
            ledger,
            switch,
            graph: ChannelGraph::new(),
            payments: PaymentRegistry::new(),
            invoices: InvoiceRegistry::new(),
            funder,
            storage,
            peers: DashMap::new(),
            inbox_tx,
        });
        shared.recover()?;

        tracing::info!(node = %id, "node created");
        Ok(Self {
            shared,
            inbox_rx: Mutex::new(Some(inbox_rx)),
        })
    }

    /// Spawn the peer message loop.
    pub fn start(&self) {
        let Some(mut rx) = self.inbox_rx.lock().unwrap().take() else {
            tracing::warn!(node = %self.shared.id, "node already started");
            return;
        };
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            tracing::info!(node = %shared.id, "message loop started");
            while let Some(msg) = rx.recv().await {
                if matches!(msg, PeerMessage::Shutdown) {
                    break;
                }
                shared.handle_message(msg).await;
            }
            tracing::info!(node = %shared.id, "message loop exited");
        });
    }

    /// Stop the message loop.
    pub async fn shutdown(&self) {
        let _ = self.shared.inbox_tx.send(PeerMessage::Shutdown).await;
    }

    pub fn id(&self) -> &NodeId {
        &self.shared.id
    }

    /// Sender half of this node's inbox, for peers to deliver into.
    pub fn inbox(&self) -> mpsc::Sender<PeerMessage> {
        self.shared.inbox_tx.clone()
    }

    /// Register a peer's inbox under its node id.
    pub fn connect_peer(&self, id: NodeId, inbox: mpsc::Sender<PeerMessage>) {
        tracing::info!(node = %self.shared.id, peer = %id, "peer connected");
        self.shared.peers.insert(id, inbox);
    }

    /// Connect two in-process nodes bidirectionally.
    pub fn connect(&self, other: &Node) {
        self.connect_peer(other.id().clone(), other.inbox());
        other.connect_peer(self.id().clone(), self.inbox());
    }

    /// Open a channel to `peer`, funded entirely by this node. Returns once
    /// funding is confirmed and the announcement has entered the local
    /// graph (peers learn of it via gossip flooding).
    pub async fn open_channel(&self, peer: &NodeId, capacity: u64) -> Result<ChannelId> {
        let shared = &self.shared;
        let funding = shared.funder.fund(&shared.id, peer, capacity).await?;

        let channel = Channel::open(
            funding,
            shared.id.clone(),
            peer.clone(),
            capacity,
            capacity,
        );
        let channel_id = shared.ledger.register(channel)?;
        shared.persist_channel(&channel_id);

        shared
            .send_to(
                peer,
                PeerMessage::OpenChannel {
                    from: shared.id.clone(),
                    funding,
                    capacity,
                },
            )
            .await;

        let announcement = ChannelAnnouncement {
            channel_id,
            node_a: shared.id.clone(),
            node_b: peer.clone(),
            capacity,
            base_fee: shared.config.payments.base_fee,
            expiry_delta: shared.config.payments.expiry_delta,
        };
        shared.graph.announce(announcement.clone())?;
        shared.flood(announcement).await;

        Ok(channel_id)
    }

    /// Issue an invoice payable to this node.
    pub fn add_invoice(&self, amount: u64, memo: &str) -> Invoice {
        let invoice = self.shared.invoices.add(amount, memo);
        self.shared.persist_invoice(&invoice.payment_hash);
        invoice
    }

    pub fn lookup_invoice(&self, payment_hash: &PaymentHash) -> Option<Invoice> {
        self.shared.invoices.lookup(payment_hash)
    }

    /// Subscribe to this node's HTLC event feed.
    pub fn subscribe_htlc_events(&self) -> HtlcEventStream {
        self.shared.publisher.subscribe()
    }

    /// Balance snapshot of one of this node's channels.
    pub fn channel_balances(&self, id: &ChannelId) -> Result<ChannelBalances, ChannelError> {
        self.shared.ledger.balances(id)
    }

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.shared.ledger.channel_ids()
    }

    /// Gossip-readiness signal: resolves once the channel is announced in
    /// this node's graph.
    pub async fn await_channel_announced(&self, id: ChannelId) {
        self.shared.graph.await_announced(id).await
    }

    pub fn is_channel_announced(&self, id: &ChannelId) -> bool {
        self.shared.graph.is_channel_announced(id)
    }

    pub fn height(&self) -> BlockHeight {
        self.shared.height()
    }

    /// Advance the node's view of the chain height.
    pub fn set_height(&self, height: BlockHeight) {
        self.shared.height.store(height, Ordering::SeqCst);
        if let Some(storage) = &self.shared.storage {
            if let Err(e) = storage.put_height(height) {
                tracing::warn!(error = %e, "failed to persist height");
            }
        }
    }

    /// Pay `amount` to `destination` for `payment_hash`, constructing the
    /// route from the local graph.
    pub async fn pay(
        &self,
        destination: &NodeId,
        payment_hash: PaymentHash,
        amount: u64,
    ) -> Result<Preimage, PaymentError> {
        let route = self
            .shared
            .graph
            .build_route(&self.shared.id, destination, amount, self.shared.height())
            .map_err(|e| PaymentError::RouteFailure {
                origin: self.shared.id.clone(),
                reason: e.to_string(),
            })?;
        self.pay_route(&route, payment_hash).await
    }

    /// Pay along an explicit route. Adds the first-hop HTLC, hands it to
    /// the first peer, and waits for the terminal resolution with the
    /// configured timeout. A timeout abandons the wait without retracting
    /// the in-flight HTLC.
    pub async fn pay_route(
        &self,
        route: &Route,
        payment_hash: PaymentHash,
    ) -> Result<Preimage, PaymentError> {
        let shared = &self.shared;
        let first_hop = route
            .first_hop()
            .ok_or_else(|| PaymentError::RouteFailure {
                origin: shared.id.clone(),
                reason: "empty route".into(),
            })?
            .clone();

        let outcome_rx = shared.payments.register(payment_hash, route.amount)?;

        let htlc_id = HtlcId::new();
        if let Err(e) = shared.ledger.add_htlc(
            &first_hop.channel,
            htlc_id,
            first_hop.amount,
            payment_hash,
            first_hop.expiry_height,
            Direction::Outgoing,
            shared.height(),
        ) {
            shared.payments.complete(
                &payment_hash,
                PaymentOutcome::Failed {
                    origin: shared.id.clone(),
                    reason: e.to_string(),
                },
            );
            return Err(e.into());
        }
        shared.persist_channel(&first_hop.channel);

        tracing::info!(
            node = %shared.id,
            payment_hash = %payment_hash,
            amount = route.amount,
            hops = route.hop_count(),
            "payment dispatched"
        );
        shared
            .send_to(
                &first_hop.node,
                PeerMessage::AddHtlc {
                    from: shared.id.clone(),
                    channel: first_hop.channel,
                    htlc_id,
                    amount: first_hop.amount,
                    payment_hash,
                    expiry_height: first_hop.expiry_height,
                    remaining_hops: route.hops()[1..].to_vec(),
                },
            )
            .await;

        let timeout = Duration::from_secs(shared.config.payments.timeout_secs);
        match tokio::time::timeout(timeout, outcome_rx).await {
            Ok(Ok(PaymentOutcome::Settled(preimage))) => Ok(preimage),
            Ok(Ok(PaymentOutcome::Failed { origin, reason })) => {
                Err(PaymentError::RouteFailure { origin, reason })
            }
            Ok(Err(_)) => Err(PaymentError::Timeout(payment_hash)),
            Err(_) => {
                shared.payments.abandon(&payment_hash);
                Err(PaymentError::Timeout(payment_hash))
            }
        }
    }
}

impl NodeShared {
    fn height(&self) -> BlockHeight {
        self.height.load(Ordering::SeqCst)
    }

    async fn handle_message(&self, msg: PeerMessage) {
        match msg {
            PeerMessage::OpenChannel {
                from,
                funding,
                capacity,
            } => {
                // Remote funded the channel; our side starts empty.
                let channel = Channel::open(funding, self.id.clone(), from, capacity, 0);
                match self.ledger.register(channel) {
                    Ok(id) => self.persist_channel(&id),
                    Err(e) => tracing::warn!(node = %self.id, error = %e, "open failed"),
                }
            }
            PeerMessage::AnnounceChannel { announcement } => {
                match self.graph.announce(announcement.clone()) {
                    // New to us: keep flooding.
                    Ok(true) => self.flood(announcement).await,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(node = %self.id, error = %e, "invalid announcement")
                    }
                }
            }
            PeerMessage::AddHtlc {
                from,
                channel,
                htlc_id,
                amount,
                payment_hash,
                expiry_height,
                remaining_hops,
            } => {
                self.handle_add_htlc(
                    from,
                    channel,
                    htlc_id,
                    amount,
                    payment_hash,
                    expiry_height,
                    remaining_hops,
                )
                .await
            }
            PeerMessage::SettleHtlc {
                channel,
                htlc_id,
                preimage,
                ..
            } => self.handle_settle_htlc(channel, htlc_id, preimage).await,
            PeerMessage::FailHtlc {
                channel,
                htlc_id,
                origin,
                reason,
                ..
            } => self.handle_fail_htlc(channel, htlc_id, origin, reason).await,
            PeerMessage::Shutdown => {}
        }
    }

    /// An upstream peer offered us an HTLC: accept it, then either settle
    /// it (we are the recipient), forward it (more hops remain), or fail it
    /// back.
    #[allow(clippy::too_many_arguments)]
    async fn handle_add_htlc(
        &self,
        from: NodeId,
        channel: ChannelId,
        htlc_id: HtlcId,
        amount: u64,
        payment_hash: PaymentHash,
        expiry_height: u64,
        remaining_hops: Vec<RouteHop>,
    ) {
        let incoming = match self.ledger.add_htlc(
            &channel,
            htlc_id,
            amount,
            payment_hash,
            expiry_height,
            Direction::Incoming,
            self.height(),
        ) {
            Ok(htlc) => htlc,
            Err(e) => {
                tracing::warn!(node = %self.id, error = %e, "rejecting HTLC add");
                self.send_fail(&from, channel, htlc_id, self.id.clone(), &e.to_string())
                    .await;
                return;
            }
        };
        self.persist_channel(&channel);

        if remaining_hops.is_empty() {
            self.receive_htlc(from, channel, incoming.id, payment_hash, amount)
                .await;
            return;
        }

        let next = &remaining_hops[0];
        match self.switch.forward(
            &channel,
            &incoming,
            &next.channel,
            next.amount,
            next.expiry_height,
            self.height(),
        ) {
            Ok(outgoing) => {
                self.persist_channel(&next.channel);
                if let Some(pair) = self.switch.pair_for_outgoing(&outgoing.id) {
                    self.persist_pair(&pair);
                }
                self.send_to(
                    &next.node,
                    PeerMessage::AddHtlc {
                        from: self.id.clone(),
                        channel: next.channel,
                        htlc_id: outgoing.id,
                        amount: next.amount,
                        payment_hash,
                        expiry_height: next.expiry_height,
                        remaining_hops: remaining_hops[1..].to_vec(),
                    },
                )
                .await;
            }
            Err(e) => {
                tracing::warn!(node = %self.id, error = %e, "forward rejected");
                let reason = e.to_string();
                if let Err(fail_err) = self.ledger.fail_htlc(&channel, htlc_id, &reason) {
                    tracing::warn!(node = %self.id, error = %fail_err, "failing incoming leg");
                }
                self.persist_channel(&channel);
                self.publish_event(
                    channel,
                    payment_hash,
                    HtlcRole::Forward,
                    HtlcOutcome::Failure,
                    amount,
                );
                self.send_fail(&from, channel, htlc_id, self.id.clone(), &reason)
                    .await;
            }
        }
    }

    /// Terminal hop: settle against a known invoice or fail back.
    async fn receive_htlc(
        &self,
        from: NodeId,
        channel: ChannelId,
        htlc_id: HtlcId,
        payment_hash: PaymentHash,
        amount: u64,
    ) {
        match self.invoices.preimage_for(&payment_hash) {
            Some(preimage) => match self.ledger.settle_htlc(&channel, htlc_id, &preimage) {
                Ok(settled) => {
                    self.invoices.mark_settled(&payment_hash, settled.amount);
                    self.persist_channel(&channel);
                    self.persist_invoice(&payment_hash);
                    self.publish_event(
                        channel,
                        payment_hash,
                        HtlcRole::Receive,
                        HtlcOutcome::Success,
                        settled.amount,
                    );
                    self.send_to(
                        &from,
                        PeerMessage::SettleHtlc {
                            from: self.id.clone(),
                            channel,
                            htlc_id,
                            preimage,
                        },
                    )
                    .await;
                }
                Err(e) => {
                    tracing::warn!(node = %self.id, error = %e, "settling received HTLC");
                    let reason = e.to_string();
                    let _ = self.ledger.fail_htlc(&channel, htlc_id, &reason);
                    self.persist_channel(&channel);
                    self.send_fail(&from, channel, htlc_id, self.id.clone(), &reason)
                        .await;
                }
            },
            None => {
                let reason = "unknown payment hash";
                if let Err(e) = self.ledger.fail_htlc(&channel, htlc_id, reason) {
                    tracing::warn!(node = %self.id, error = %e, "failing unknown HTLC");
                }
                self.persist_channel(&channel);
                self.publish_event(
                    channel,
                    payment_hash,
                    HtlcRole::Receive,
                    HtlcOutcome::Failure,
                    amount,
                );
                self.send_fail(&from, channel, htlc_id, self.id.clone(), reason)
                    .await;
            }
        }
    }

    /// Downstream settled our outgoing HTLC: release it, back-propagate
    /// through the forwarding pair if we were an intermediary, and complete
    /// the payment if we originated it.
    async fn handle_settle_htlc(&self, channel: ChannelId, htlc_id: HtlcId, preimage: Preimage) {
        match self.switch.settle_outgoing(&channel, htlc_id, &preimage) {
            Ok((outgoing, Some(pair))) => {
                self.persist_channel(&pair.outgoing_channel);
                self.persist_channel(&pair.incoming_channel);
                self.delete_pair(&pair.outgoing_htlc);
                self.publish_event(
                    pair.outgoing_channel,
                    outgoing.payment_hash,
                    HtlcRole::Forward,
                    HtlcOutcome::Success,
                    pair.outgoing_amount,
                );
                self.relay_settle(&pair, preimage).await;
            }
            Ok((outgoing, None)) => {
                self.persist_channel(&channel);
                // Publish before waking the payer so the event is already
                // queued when `pay` returns.
                if self.payments.is_in_flight(&outgoing.payment_hash) {
                    self.publish_event(
                        channel,
                        outgoing.payment_hash,
                        HtlcRole::Send,
                        HtlcOutcome::Success,
                        outgoing.amount,
                    );
                }
                self.payments
                    .complete(&outgoing.payment_hash, PaymentOutcome::Settled(preimage));
            }
            Err(e) => {
                tracing::warn!(node = %self.id, error = %e, "settle propagation failed")
            }
        }
    }

    /// Downstream failed our outgoing HTLC: refund it, back-propagate the
    /// failure, and surface it to the originator if that is us.
    async fn handle_fail_htlc(
        &self,
        channel: ChannelId,
        htlc_id: HtlcId,
        origin: NodeId,
        reason: String,
    ) {
        match self.switch.fail_outgoing(&channel, htlc_id, &reason) {
            Ok((outgoing, Some(pair))) => {
                self.persist_channel(&pair.outgoing_channel);
                self.persist_channel(&pair.incoming_channel);
                self.delete_pair(&pair.outgoing_htlc);
                self.publish_event(
                    pair.outgoing_channel,
                    outgoing.payment_hash,
                    HtlcRole::Forward,
                    HtlcOutcome::Failure,
                    pair.outgoing_amount,
                );
                let upstream = self
                    .ledger
                    .snapshot(&pair.incoming_channel)
                    .map(|c| c.remote_node)
                    .ok();
                if let Some(upstream) = upstream {
                    self.send_fail(
                        &upstream,
                        pair.incoming_channel,
                        pair.incoming_htlc,
                        origin,
                        &reason,
                    )
                    .await;
                }
            }
            Ok((outgoing, None)) => {
                self.persist_channel(&channel);
                if self.payments.is_in_flight(&outgoing.payment_hash) {
                    self.publish_event(
                        channel,
                        outgoing.payment_hash,
                        HtlcRole::Send,
                        HtlcOutcome::Failure,
                        outgoing.amount,
                    );
                }
                self.payments.complete(
                    &outgoing.payment_hash,
                    PaymentOutcome::Failed { origin, reason },
                );
            }
            Err(e) => {
                tracing::warn!(node = %self.id, error = %e, "fail propagation failed")
            }
        }
    }

    async fn relay_settle(&self, pair: &ForwardingPair, preimage: Preimage) {
        let upstream = self
            .ledger
            .snapshot(&pair.incoming_channel)
            .map(|c| c.remote_node)
            .ok();
        let Some(upstream) = upstream else {
            tracing::warn!(node = %self.id, "incoming channel gone, cannot relay settle");
            return;
        };
        self.send_to(
            &upstream,
            PeerMessage::SettleHtlc {
                from: self.id.clone(),
                channel: pair.incoming_channel,
                htlc_id: pair.incoming_htlc,
                preimage,
            },
        )
        .await;
    }

    async fn send_fail(
        &self,
        peer: &NodeId,
        channel: ChannelId,
        htlc_id: HtlcId,
        origin: NodeId,
        reason: &str,
    ) {
        self.send_to(
            peer,
            PeerMessage::FailHtlc {
                from: self.id.clone(),
                channel,
                htlc_id,
                origin,
                reason: reason.into(),
            },
        )
        .await;
    }

    async fn send_to(&self, peer: &NodeId, msg: PeerMessage) {
        let Some(tx) = self.peers.get(peer).map(|entry| entry.value().clone()) else {
            tracing::warn!(node = %self.id, %peer, "peer not connected");
            return;
        };
        if tx.send(msg).await.is_err() {
            tracing::warn!(node = %self.id, %peer, "peer inbox closed");
        }
    }

    async fn flood(&self, announcement: ChannelAnnouncement) {
        let peers: Vec<_> = self
            .peers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for tx in peers {
            let _ = tx
                .send(PeerMessage::AnnounceChannel {
                    announcement: announcement.clone(),
                })
                .await;
        }
    }

    fn publish_event(
        &self,
        channel: ChannelId,
        payment_hash: PaymentHash,
        role: HtlcRole,
        outcome: HtlcOutcome,
        amount: u64,
    ) {
        self.publisher.publish(HtlcEvent::new(
            self.id.clone(),
            channel,
            payment_hash,
            role,
            outcome,
            amount,
        ));
    }

    fn persist_channel(&self, id: &ChannelId) {
        let Some(storage) = &self.storage else { return };
        match self.ledger.snapshot(id) {
            Ok(channel) => {
                if let Err(e) = storage.put_channel(&channel) {
                    tracing::warn!(channel = %id, error = %e, "persisting channel");
                }
            }
            Err(e) => tracing::warn!(channel = %id, error = %e, "snapshotting channel"),
        }
    }

    fn persist_pair(&self, pair: &ForwardingPair) {
        let Some(storage) = &self.storage else { return };
        if let Err(e) = storage.put_forward(pair) {
            tracing::warn!(error = %e, "persisting forwarding pair");
        }
    }

    fn delete_pair(&self, outgoing_htlc: &HtlcId) {
        let Some(storage) = &self.storage else { return };
        if let Err(e) = storage.delete_forward(outgoing_htlc) {
            tracing::warn!(error = %e, "deleting forwarding pair");
        }
    }

    fn persist_invoice(&self, payment_hash: &PaymentHash) {
        let Some(storage) = &self.storage else { return };
        if let Some(invoice) = self.invoices.lookup(payment_hash) {
            if let Err(e) = storage.put_invoice(&invoice) {
                tracing::warn!(error = %e, "persisting invoice");
            }
        }
    }

    /// Restore persisted state: channels (with their pending HTLC sets),
    /// outstanding forwarding pairs, invoices, and height. Resolution
    /// replay is idempotent, so peers re-sending settles or fails after a
    /// restart completes whatever is left.
    fn recover(&self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        let channels = storage.channels()?;
        let restored_channels = channels.len();
        for channel in channels {
            if let Err(e) = self.ledger.register(channel) {
                tracing::warn!(error = %e, "restoring channel");
            }
        }
        let forwards = storage.forwards()?;
        let restored_forwards = forwards.len();
        for pair in forwards {
            self.switch.restore_pair(pair);
        }
        for invoice in storage.invoices()? {
            self.invoices.restore(invoice);
        }
        if let Some(height) = storage.height()? {
            self.height.store(height, Ordering::SeqCst);
        }

        if restored_channels > 0 || restored_forwards > 0 {
            tracing::info!(
                node = %self.id,
                channels = restored_channels,
                forwards = restored_forwards,
                "state recovered"
            );
        }
        Ok(())
    }
}
