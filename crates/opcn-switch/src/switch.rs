use std::sync::Arc;

use dashmap::DashMap;
use opcn_channel::{ChannelError, ChannelLedger, Direction, Htlc};
use opcn_core::{BlockHeight, ChannelId, HtlcId, PaymentHash, Preimage};
use serde::{Deserialize, Serialize};

use crate::error::SwitchError;

/// Association between an incoming HTLC and the outgoing HTLC it funded,
/// held by an intermediary from forward until resolution.
///
/// Invariant: `incoming_amount >= outgoing_amount` (the difference is the
/// forwarding fee) and `outgoing_expiry < incoming_expiry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingPair {
    pub payment_hash: PaymentHash,
    pub incoming_channel: ChannelId,
    pub incoming_htlc: HtlcId,
    pub incoming_amount: u64,
    pub incoming_expiry: BlockHeight,
    pub outgoing_channel: ChannelId,
    pub outgoing_htlc: HtlcId,
    pub outgoing_amount: u64,
    pub outgoing_expiry: BlockHeight,
}

impl ForwardingPair {
    /// The fee this node keeps if the forward settles.
    pub fn fee(&self) -> u64 {
        self.incoming_amount - self.outgoing_amount
    }
}

/// Binds incoming HTLCs to outgoing ones and propagates resolutions
/// backward, so the intermediary can never owe value on one side without
/// matching recovery on the other.
pub struct ForwardingSwitch {
    ledger: Arc<ChannelLedger>,
    /// Live pairs keyed by the outgoing HTLC id (resolutions arrive from
    /// downstream, which knows the outgoing leg).
    pairs: DashMap<HtlcId, ForwardingPair>,
}

impl ForwardingSwitch {
    pub fn new(ledger: Arc<ChannelLedger>) -> Self {
        Self {
            ledger,
            pairs: DashMap::new(),
        }
    }

    /// Bind `incoming_htlc` to a new outgoing HTLC on `outgoing_channel`.
    ///
    /// Enforces value conservation (`outgoing_amount <= incoming.amount`)
    /// and the expiry ordering that prevents the outgoing leg from
    /// outliving the incoming one. The incoming-leg check and the
    /// outgoing-leg add happen with both channel locks held (ascending id
    /// order), so a failure leaves both channels untouched.
    pub fn forward(
        &self,
        incoming_channel: &ChannelId,
        incoming_htlc: &Htlc,
        outgoing_channel: &ChannelId,
        outgoing_amount: u64,
        outgoing_expiry: BlockHeight,
        height: BlockHeight,
    ) -> Result<Htlc, SwitchError> {
        if outgoing_amount > incoming_htlc.amount {
            return Err(SwitchError::FeeInsufficient {
                incoming: incoming_htlc.amount,
                outgoing: outgoing_amount,
            });
        }
        if outgoing_expiry >= incoming_htlc.expiry_height {
            return Err(SwitchError::ExpiryViolation {
                incoming: incoming_htlc.expiry_height,
                outgoing: outgoing_expiry,
            });
        }

        let outgoing_id = HtlcId::new();
        let incoming_id = incoming_htlc.id;
        let payment_hash = incoming_htlc.payment_hash;

        let outgoing = self.ledger.with_pair(
            incoming_channel,
            outgoing_channel,
            |incoming_ch, outgoing_ch| {
                let pending = incoming_ch
                    .htlc(&incoming_id)
                    .ok_or(ChannelError::HtlcNotFound(incoming_id))?;
                if pending.state.is_terminal() {
                    return Err(ChannelError::AlreadyResolved(incoming_id));
                }
                outgoing_ch.add_htlc(
                    outgoing_id,
                    outgoing_amount,
                    payment_hash,
                    outgoing_expiry,
                    Direction::Outgoing,
                    height,
                )
            },
        )?;

        let pair = ForwardingPair {
            payment_hash,
            incoming_channel: *incoming_channel,
            incoming_htlc: incoming_id,
            incoming_amount: incoming_htlc.amount,
            incoming_expiry: incoming_htlc.expiry_height,
            outgoing_channel: *outgoing_channel,
            outgoing_htlc: outgoing_id,
            outgoing_amount,
            outgoing_expiry,
        };
        self.pairs.insert(outgoing_id, pair);

        tracing::info!(
            payment_hash = %payment_hash,
            incoming_channel = %incoming_channel,
            outgoing_channel = %outgoing_channel,
            incoming_amount = incoming_htlc.amount,
            outgoing_amount,
            "HTLC forwarded"
        );
        Ok(outgoing)
    }

    /// Settle an outgoing HTLC and back-propagate to the incoming leg of
    /// its forwarding pair, if any.
    ///
    /// Re-triggerable: either leg answering `AlreadyResolved` is treated as
    /// done, so replaying after a restart completes whatever is left.
    /// Returns the outgoing HTLC's terminal state and the pair if this was
    /// a forward.
    pub fn settle_outgoing(
        &self,
        channel: &ChannelId,
        htlc_id: HtlcId,
        preimage: &Preimage,
    ) -> Result<(Htlc, Option<ForwardingPair>), SwitchError> {
        let outgoing = match self.ledger.settle_htlc(channel, htlc_id, preimage) {
            Ok(htlc) => htlc,
            Err(ChannelError::AlreadyResolved(_)) => self.ledger.htlc(channel, htlc_id)?,
            Err(e) => return Err(e.into()),
        };

        let pair = self.pairs.get(&htlc_id).map(|entry| entry.clone());
        if let Some(pair) = &pair {
            match self
                .ledger
                .settle_htlc(&pair.incoming_channel, pair.incoming_htlc, preimage)
            {
                Ok(_) | Err(ChannelError::AlreadyResolved(_)) => {
                    self.pairs.remove(&htlc_id);
                }
                // Pair stays registered so the resolution can be replayed.
                Err(e) => return Err(e.into()),
            }
        }
        Ok((outgoing, pair))
    }

    /// Fail an outgoing HTLC and back-propagate the failure to the incoming
    /// leg of its forwarding pair, if any. Re-triggerable like settle.
    pub fn fail_outgoing(
        &self,
        channel: &ChannelId,
        htlc_id: HtlcId,
        reason: &str,
    ) -> Result<(Htlc, Option<ForwardingPair>), SwitchError> {
        let outgoing = match self.ledger.fail_htlc(channel, htlc_id, reason) {
            Ok(htlc) => htlc,
            Err(ChannelError::AlreadyResolved(_)) => self.ledger.htlc(channel, htlc_id)?,
            Err(e) => return Err(e.into()),
        };

        let pair = self.pairs.get(&htlc_id).map(|entry| entry.clone());
        if let Some(pair) = &pair {
            match self
                .ledger
                .fail_htlc(&pair.incoming_channel, pair.incoming_htlc, reason)
            {
                Ok(_) | Err(ChannelError::AlreadyResolved(_)) => {
                    self.pairs.remove(&htlc_id);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok((outgoing, pair))
    }

    /// The live pair for an outgoing HTLC, if any.
    pub fn pair_for_outgoing(&self, htlc_id: &HtlcId) -> Option<ForwardingPair> {
        self.pairs.get(htlc_id).map(|entry| entry.clone())
    }

    /// Re-register a pair recovered from persistent state.
    pub fn restore_pair(&self, pair: ForwardingPair) {
        self.pairs.insert(pair.outgoing_htlc, pair);
    }

    /// All live pairs (persistence snapshot).
    pub fn pending_pairs(&self) -> Vec<ForwardingPair> {
        self.pairs.iter().map(|entry| entry.clone()).collect()
    }

    pub fn pending_pair_count(&self) -> usize {
        self.pairs.len()
    }
}
