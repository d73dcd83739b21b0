use chrono::{DateTime, Utc};
use dashmap::DashMap;
use opcn_core::{PaymentHash, Preimage};
use serde::{Deserialize, Serialize};

/// A payment request issued by this node. Holding the preimage is what
/// makes this node the final recipient for the hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub payment_hash: PaymentHash,
    pub preimage: Preimage,
    pub amount: u64,
    pub memo: String,
    pub settled: bool,
    /// Amount actually received; set when the invoice settles.
    pub amount_paid: u64,
    pub created_at: DateTime<Utc>,
}

/// Registry of invoices issued by this node, keyed by payment hash.
pub struct InvoiceRegistry {
    invoices: DashMap<PaymentHash, Invoice>,
}

impl InvoiceRegistry {
    pub fn new() -> Self {
        Self {
            invoices: DashMap::new(),
        }
    }

    /// Issue a new invoice with a fresh preimage.
    pub fn add(&self, amount: u64, memo: &str) -> Invoice {
        let preimage = Preimage::generate();
        let invoice = Invoice {
            payment_hash: preimage.payment_hash(),
            preimage,
            amount,
            memo: memo.into(),
            settled: false,
            amount_paid: 0,
            created_at: Utc::now(),
        };
        self.invoices.insert(invoice.payment_hash, invoice.clone());
        tracing::info!(payment_hash = %invoice.payment_hash, amount, "invoice added");
        invoice
    }

    /// The preimage for an open invoice. `None` for unknown hashes and for
    /// invoices that already settled (a hash is payable once).
    pub fn preimage_for(&self, payment_hash: &PaymentHash) -> Option<Preimage> {
        self.invoices
            .get(payment_hash)
            .filter(|invoice| !invoice.settled)
            .map(|invoice| invoice.preimage)
    }

    /// Mark an invoice settled with the amount actually paid.
    pub fn mark_settled(&self, payment_hash: &PaymentHash, amount_paid: u64) -> Option<Invoice> {
        self.invoices.get_mut(payment_hash).map(|mut invoice| {
            invoice.settled = true;
            invoice.amount_paid = amount_paid;
            tracing::info!(payment_hash = %payment_hash, amount_paid, "invoice settled");
            invoice.clone()
        })
    }

    pub fn lookup(&self, payment_hash: &PaymentHash) -> Option<Invoice> {
        self.invoices.get(payment_hash).map(|invoice| invoice.clone())
    }

    /// Re-register an invoice recovered from persistent state.
    pub fn restore(&self, invoice: Invoice) {
        self.invoices.insert(invoice.payment_hash, invoice);
    }

    /// All invoices (persistence snapshot).
    pub fn all(&self) -> Vec<Invoice> {
        self.invoices.iter().map(|entry| entry.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.invoices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invoices.is_empty()
    }
}

impl Default for InvoiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
