use std::collections::HashMap;

use opcn_core::{BlockHeight, ChannelId, FundingOutpoint, HtlcId, NodeId, PaymentHash, Preimage};
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;
use crate::htlc::{Direction, Htlc, HtlcOutcome, HtlcState};

/// Point-in-time balance snapshot of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBalances {
    pub channel: ChannelId,
    pub capacity: u64,
    pub local_balance: u64,
    pub remote_balance: u64,
    pub pending_count: usize,
    pub pending_total: u64,
}

/// One node's view of a bilateral payment channel.
///
/// Invariant: `local_balance + remote_balance + sum(pending HTLC amounts)`
/// equals `capacity` for the channel's whole lifetime. Every mutation below
/// maintains it; the ledger serializes callers so it holds under concurrency.
///
/// Resolved HTLCs are kept (state `Settled`/`Failed`) so that a replayed
/// settle or fail is answered with `AlreadyResolved` instead of corrupting
/// balances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub funding: FundingOutpoint,
    pub local_node: NodeId,
    pub remote_node: NodeId,
    pub capacity: u64,
    local_balance: u64,
    remote_balance: u64,
    pending: HashMap<HtlcId, Htlc>,
    resolved: HashMap<HtlcId, Htlc>,
}

impl Channel {
    /// Open a channel view. `local_balance` is the side funded by this node
    /// (the full capacity for the funder, zero for the fundee).
    pub fn open(
        funding: FundingOutpoint,
        local_node: NodeId,
        remote_node: NodeId,
        capacity: u64,
        local_balance: u64,
    ) -> Self {
        debug_assert!(local_balance <= capacity);
        Self {
            id: ChannelId::from_outpoint(&funding),
            funding,
            local_node,
            remote_node,
            capacity,
            local_balance,
            remote_balance: capacity - local_balance,
            pending: HashMap::new(),
            resolved: HashMap::new(),
        }
    }

    pub fn local_balance(&self) -> u64 {
        self.local_balance
    }

    pub fn remote_balance(&self) -> u64 {
        self.remote_balance
    }

    /// Sum of all pending HTLC amounts (the reserve).
    pub fn pending_total(&self) -> u64 {
        self.pending.values().map(|h| h.amount).sum()
    }

    /// Look up an HTLC, pending or resolved.
    pub fn htlc(&self, id: &HtlcId) -> Option<&Htlc> {
        self.pending.get(id).or_else(|| self.resolved.get(id))
    }

    /// All pending HTLCs.
    pub fn pending_htlcs(&self) -> impl Iterator<Item = &Htlc> {
        self.pending.values()
    }

    /// Balance snapshot.
    pub fn balances(&self) -> ChannelBalances {
        ChannelBalances {
            channel: self.id,
            capacity: self.capacity,
            local_balance: self.local_balance,
            remote_balance: self.remote_balance,
            pending_count: self.pending.len(),
            pending_total: self.pending_total(),
        }
    }

    /// Atomically adjust both committed balances. Fails with
    /// `InsufficientBalance` if either side would go negative; on failure
    /// nothing is applied.
    pub fn apply_balance_delta(
        &mut self,
        local_delta: i64,
        remote_delta: i64,
    ) -> Result<(), ChannelError> {
        let local = checked_apply(self.local_balance, local_delta)?;
        let remote = checked_apply(self.remote_balance, remote_delta)?;
        self.local_balance = local;
        self.remote_balance = remote;
        debug_assert!(self.conserves());
        Ok(())
    }

    /// Add an HTLC: expiry check, then reservation out of the payer side's
    /// spendable balance and creation of the pending HTLC as one step.
    pub fn add_htlc(
        &mut self,
        id: HtlcId,
        amount: u64,
        payment_hash: PaymentHash,
        expiry_height: BlockHeight,
        direction: Direction,
        height: BlockHeight,
    ) -> Result<Htlc, ChannelError> {
        if expiry_height <= height {
            return Err(ChannelError::ExpiryInPast {
                expiry: expiry_height,
                height,
            });
        }

        let spendable = match direction {
            Direction::Outgoing => self.local_balance,
            Direction::Incoming => self.remote_balance,
        };
        if amount > spendable {
            return Err(ChannelError::AmountExceedsBalance { amount, spendable });
        }

        match direction {
            Direction::Outgoing => self.local_balance -= amount,
            Direction::Incoming => self.remote_balance -= amount,
        }

        let htlc = Htlc::new(id, amount, payment_hash, expiry_height, direction);
        self.pending.insert(id, htlc.clone());
        debug_assert!(self.conserves());

        tracing::info!(
            channel = %self.id,
            htlc = %id,
            amount,
            direction = %direction,
            expiry = expiry_height,
            "HTLC added"
        );
        Ok(htlc)
    }

    /// Settle a pending HTLC with its preimage. On success the amount is
    /// credited to the receiver side's committed balance.
    ///
    /// A wrong preimage leaves the HTLC `Added` and balances untouched.
    /// Settling a resolved HTLC returns `AlreadyResolved` and is a no-op.
    pub fn settle_htlc(
        &mut self,
        id: HtlcId,
        preimage: &Preimage,
    ) -> Result<Htlc, ChannelError> {
        if self.resolved.contains_key(&id) {
            return Err(ChannelError::AlreadyResolved(id));
        }
        let mut htlc = self
            .pending
            .remove(&id)
            .ok_or(ChannelError::HtlcNotFound(id))?;

        if !htlc.payment_hash.matches(preimage) {
            self.pending.insert(id, htlc);
            return Err(ChannelError::PreimageMismatch(id));
        }

        htlc.state = HtlcState::Settled;
        self.release(&htlc, HtlcOutcome::Success);
        self.resolved.insert(id, htlc.clone());
        debug_assert!(self.conserves());

        tracing::info!(channel = %self.id, htlc = %id, amount = htlc.amount, "HTLC settled");
        Ok(htlc)
    }

    /// Fail a pending HTLC, refunding the reserved amount to the payer side.
    ///
    /// Failing a resolved HTLC returns `AlreadyResolved` and is a no-op.
    pub fn fail_htlc(&mut self, id: HtlcId, reason: &str) -> Result<Htlc, ChannelError> {
        if self.resolved.contains_key(&id) {
            return Err(ChannelError::AlreadyResolved(id));
        }
        let mut htlc = self
            .pending
            .remove(&id)
            .ok_or(ChannelError::HtlcNotFound(id))?;

        htlc.state = HtlcState::Failed;
        self.release(&htlc, HtlcOutcome::Failure);
        self.resolved.insert(id, htlc.clone());
        debug_assert!(self.conserves());

        tracing::info!(channel = %self.id, htlc = %id, reason, "HTLC failed");
        Ok(htlc)
    }

    /// Fold a resolved HTLC's amount back into committed balances.
    ///
    /// Success pays the receiver side; failure refunds the payer side.
    fn release(&mut self, htlc: &Htlc, outcome: HtlcOutcome) {
        let credit_local = match (htlc.direction, outcome) {
            // We offered it: success pays the remote, failure refunds us.
            (Direction::Outgoing, HtlcOutcome::Success) => false,
            (Direction::Outgoing, HtlcOutcome::Failure) => true,
            // They offered it: success pays us, failure refunds them.
            (Direction::Incoming, HtlcOutcome::Success) => true,
            (Direction::Incoming, HtlcOutcome::Failure) => false,
        };
        if credit_local {
            self.local_balance += htlc.amount;
        } else {
            self.remote_balance += htlc.amount;
        }
    }

    /// Conservation invariant check.
    pub fn conserves(&self) -> bool {
        self.local_balance + self.remote_balance + self.pending_total() == self.capacity
    }
}

fn checked_apply(balance: u64, delta: i64) -> Result<u64, ChannelError> {
    let next = balance as i128 + delta as i128;
    if next < 0 {
        return Err(ChannelError::InsufficientBalance {
            available: balance,
            required: delta.unsigned_abs(),
        });
    }
    Ok(next as u64)
}
