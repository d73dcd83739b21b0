use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use opcn_core::{NodeId, PaymentHash, Preimage};
use tokio::sync::oneshot;

use crate::error::PaymentError;

/// Terminal result of an originated payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Settled; the preimage proves receipt.
    Settled(Preimage),
    /// Failed somewhere along the route.
    Failed { origin: NodeId, reason: String },
}

struct PendingPayment {
    /// Waiter for the terminal outcome. `None` once the payer timed out and
    /// abandoned the wait; the entry itself stays until resolution so a
    /// retry with the same hash is still rejected.
    waiter: Option<oneshot::Sender<PaymentOutcome>>,
    amount: u64,
    started_at: DateTime<Utc>,
}

/// Tracks payments this node originated, keyed by payment hash.
///
/// Guarantees at-most-one in-flight payment per hash and delivers each
/// terminal outcome to at most one waiter.
pub struct PaymentRegistry {
    in_flight: DashMap<PaymentHash, PendingPayment>,
}

impl PaymentRegistry {
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
        }
    }

    /// Register an outgoing payment and obtain the waiter for its outcome.
    /// Fails with `PaymentInFlight` while a prior attempt is outstanding.
    pub fn register(
        &self,
        payment_hash: PaymentHash,
        amount: u64,
    ) -> Result<oneshot::Receiver<PaymentOutcome>, PaymentError> {
        match self.in_flight.entry(payment_hash) {
            Entry::Occupied(_) => Err(PaymentError::PaymentInFlight(payment_hash)),
            Entry::Vacant(vacant) => {
                let (tx, rx) = oneshot::channel();
                vacant.insert(PendingPayment {
                    waiter: Some(tx),
                    amount,
                    started_at: Utc::now(),
                });
                tracing::debug!(payment_hash = %payment_hash, amount, "payment registered");
                Ok(rx)
            }
        }
    }

    /// Resolve an in-flight payment. Returns `true` if this node had
    /// originated it (the caller then emits the Send event). The outcome is
    /// delivered to the waiter unless it was abandoned.
    pub fn complete(&self, payment_hash: &PaymentHash, outcome: PaymentOutcome) -> bool {
        match self.in_flight.remove(payment_hash) {
            Some((_, mut pending)) => {
                if let Some(waiter) = pending.waiter.take() {
                    // A closed receiver means the payer gave up; the chain
                    // already resolved, so the result is simply dropped.
                    let _ = waiter.send(outcome);
                } else {
                    tracing::debug!(
                        payment_hash = %payment_hash,
                        "payment resolved after waiter abandoned"
                    );
                }
                true
            }
            None => false,
        }
    }

    /// Abandon the waiter after a local timeout. The payment stays
    /// registered (and `PaymentInFlight`-blocking) until it resolves.
    pub fn abandon(&self, payment_hash: &PaymentHash) {
        if let Some(mut pending) = self.in_flight.get_mut(payment_hash) {
            pending.waiter = None;
            tracing::warn!(payment_hash = %payment_hash, "payment waiter abandoned");
        }
    }

    pub fn is_in_flight(&self, payment_hash: &PaymentHash) -> bool {
        self.in_flight.contains_key(payment_hash)
    }

    /// Amount and start time of an in-flight payment.
    pub fn in_flight_info(&self, payment_hash: &PaymentHash) -> Option<(u64, DateTime<Utc>)> {
        self.in_flight
            .get(payment_hash)
            .map(|p| (p.amount, p.started_at))
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

impl Default for PaymentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
