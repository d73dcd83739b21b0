use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use opcn_core::{BlockHeight, ChannelId, HtlcId, PaymentHash, Preimage};

use crate::channel::{Channel, ChannelBalances};
use crate::error::ChannelError;
use crate::htlc::{Direction, Htlc};

/// Registry of this node's channels with one lock per channel.
///
/// Every balance or HTLC mutation on a channel runs under that channel's
/// mutex and never blocks on anything else while holding it. Cross-channel
/// operations go through [`ChannelLedger::with_pair`], which acquires both
/// locks in ascending `ChannelId` order so that concurrent forwards crossing
/// the same two channels in opposite directions cannot deadlock.
pub struct ChannelLedger {
    channels: DashMap<ChannelId, Arc<Mutex<Channel>>>,
}

impl ChannelLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Register a channel. Fails with `DuplicateChannel` if the id is taken.
    pub fn register(&self, channel: Channel) -> Result<ChannelId, ChannelError> {
        let id = channel.id;
        if self.channels.contains_key(&id) {
            return Err(ChannelError::DuplicateChannel(id));
        }
        self.channels.insert(id, Arc::new(Mutex::new(channel)));
        tracing::info!(channel = %id, "channel registered");
        Ok(id)
    }

    /// Remove a channel (cooperative close path). Returns its final state.
    pub fn remove(&self, id: &ChannelId) -> Result<Channel, ChannelError> {
        let (_, arc) = self
            .channels
            .remove(id)
            .ok_or(ChannelError::ChannelNotFound(*id))?;
        let channel = arc.lock().unwrap().clone();
        tracing::info!(channel = %id, "channel removed");
        Ok(channel)
    }

    pub fn contains(&self, id: &ChannelId) -> bool {
        self.channels.contains_key(id)
    }

    /// Ids of all registered channels.
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Run `f` with the channel's lock held.
    pub fn with_channel<T>(
        &self,
        id: &ChannelId,
        f: impl FnOnce(&mut Channel) -> Result<T, ChannelError>,
    ) -> Result<T, ChannelError> {
        let arc = self.arc(id)?;
        let mut channel = arc.lock().unwrap();
        f(&mut channel)
    }

    /// Run `f` with both channels' locks held, acquired in ascending
    /// `ChannelId` order. The closure's arguments match the caller's
    /// `(a, b)` order regardless of which lock was taken first.
    pub fn with_pair<T>(
        &self,
        a: &ChannelId,
        b: &ChannelId,
        f: impl FnOnce(&mut Channel, &mut Channel) -> Result<T, ChannelError>,
    ) -> Result<T, ChannelError> {
        if a == b {
            return Err(ChannelError::SameChannelPair(*a));
        }
        let arc_a = self.arc(a)?;
        let arc_b = self.arc(b)?;

        if a < b {
            let mut ch_a = arc_a.lock().unwrap();
            let mut ch_b = arc_b.lock().unwrap();
            f(&mut ch_a, &mut ch_b)
        } else {
            let mut ch_b = arc_b.lock().unwrap();
            let mut ch_a = arc_a.lock().unwrap();
            f(&mut ch_a, &mut ch_b)
        }
    }

    /// Atomically adjust a channel's committed balances.
    pub fn apply_balance_delta(
        &self,
        id: &ChannelId,
        local_delta: i64,
        remote_delta: i64,
    ) -> Result<(), ChannelError> {
        self.with_channel(id, |ch| ch.apply_balance_delta(local_delta, remote_delta))
    }

    /// Add an HTLC to a channel (reservation included, one critical section).
    pub fn add_htlc(
        &self,
        id: &ChannelId,
        htlc_id: HtlcId,
        amount: u64,
        payment_hash: PaymentHash,
        expiry_height: BlockHeight,
        direction: Direction,
        height: BlockHeight,
    ) -> Result<Htlc, ChannelError> {
        self.with_channel(id, |ch| {
            ch.add_htlc(htlc_id, amount, payment_hash, expiry_height, direction, height)
        })
    }

    /// Settle a pending HTLC with its preimage.
    pub fn settle_htlc(
        &self,
        id: &ChannelId,
        htlc_id: HtlcId,
        preimage: &Preimage,
    ) -> Result<Htlc, ChannelError> {
        self.with_channel(id, |ch| ch.settle_htlc(htlc_id, preimage))
    }

    /// Fail a pending HTLC.
    pub fn fail_htlc(
        &self,
        id: &ChannelId,
        htlc_id: HtlcId,
        reason: &str,
    ) -> Result<Htlc, ChannelError> {
        self.with_channel(id, |ch| ch.fail_htlc(htlc_id, reason))
    }

    /// Look up an HTLC (pending or resolved) on a channel.
    pub fn htlc(&self, id: &ChannelId, htlc_id: HtlcId) -> Result<Htlc, ChannelError> {
        self.with_channel(id, |ch| {
            ch.htlc(&htlc_id)
                .cloned()
                .ok_or(ChannelError::HtlcNotFound(htlc_id))
        })
    }

    /// Balance snapshot of a channel.
    pub fn balances(&self, id: &ChannelId) -> Result<ChannelBalances, ChannelError> {
        self.with_channel(id, |ch| Ok(ch.balances()))
    }

    /// Clone of a channel's full state (persistence snapshot).
    pub fn snapshot(&self, id: &ChannelId) -> Result<Channel, ChannelError> {
        self.with_channel(id, |ch| Ok(ch.clone()))
    }

    fn arc(&self, id: &ChannelId) -> Result<Arc<Mutex<Channel>>, ChannelError> {
        self.channels
            .get(id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(ChannelError::ChannelNotFound(*id))
    }
}

impl Default for ChannelLedger {
    fn default() -> Self {
        Self::new()
    }
}
