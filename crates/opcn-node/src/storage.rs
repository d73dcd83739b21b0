//! RocksDB storage backend for node state.
//!
//! Channel snapshots carry their pending HTLC sets, so replaying storage
//! after a restart restores every `Added` HTLC; forwarding pairs are stored
//! separately so outstanding forwards can be re-derived.

use anyhow::Result;
use opcn_channel::Channel;
use opcn_core::{ChannelId, HtlcId};
use opcn_switch::ForwardingPair;
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, DB};
use std::path::Path;

use crate::invoices::Invoice;

/// Column family names for different data types.
const CF_CHANNELS: &str = "channels";
const CF_FORWARDS: &str = "forwards";
const CF_INVOICES: &str = "invoices";
const CF_STATE: &str = "state";

const STATE_KEY_HEIGHT: &str = "height";

/// RocksDB-backed storage for an OPCN node.
pub struct Storage {
    db: DB,
}

impl Storage {
    /// Open or create a RocksDB database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_CHANNELS, Options::default()),
            ColumnFamilyDescriptor::new(CF_FORWARDS, Options::default()),
            ColumnFamilyDescriptor::new(CF_INVOICES, Options::default()),
            ColumnFamilyDescriptor::new(CF_STATE, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)?;
        Ok(Self { db })
    }

    fn put(&self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self
            .db
            .cf_handle(cf_name)
            .ok_or_else(|| anyhow::anyhow!("column family '{}' not found", cf_name))?;
        self.db.put_cf(&cf, key, value)?;
        Ok(())
    }

    fn delete(&self, cf_name: &str, key: &[u8]) -> Result<()> {
        let cf = self
            .db
            .cf_handle(cf_name)
            .ok_or_else(|| anyhow::anyhow!("column family '{}' not found", cf_name))?;
        self.db.delete_cf(&cf, key)?;
        Ok(())
    }

    fn values<T: serde::de::DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self
            .db
            .cf_handle(cf_name)
            .ok_or_else(|| anyhow::anyhow!("column family '{}' not found", cf_name))?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    /// Store a channel snapshot (balances plus pending/resolved HTLCs).
    pub fn put_channel(&self, channel: &Channel) -> Result<()> {
        self.put(
            CF_CHANNELS,
            channel.id.to_string().as_bytes(),
            &serde_json::to_vec(channel)?,
        )
    }

    pub fn delete_channel(&self, id: &ChannelId) -> Result<()> {
        self.delete(CF_CHANNELS, id.to_string().as_bytes())
    }

    /// All stored channel snapshots.
    pub fn channels(&self) -> Result<Vec<Channel>> {
        self.values(CF_CHANNELS)
    }

    /// Store a live forwarding pair, keyed by its outgoing HTLC id.
    pub fn put_forward(&self, pair: &ForwardingPair) -> Result<()> {
        self.put(
            CF_FORWARDS,
            pair.outgoing_htlc.to_string().as_bytes(),
            &serde_json::to_vec(pair)?,
        )
    }

    pub fn delete_forward(&self, outgoing_htlc: &HtlcId) -> Result<()> {
        self.delete(CF_FORWARDS, outgoing_htlc.to_string().as_bytes())
    }

    /// All outstanding forwarding pairs.
    pub fn forwards(&self) -> Result<Vec<ForwardingPair>> {
        self.values(CF_FORWARDS)
    }

    /// Store an invoice.
    pub fn put_invoice(&self, invoice: &Invoice) -> Result<()> {
        self.put(
            CF_INVOICES,
            invoice.payment_hash.to_string().as_bytes(),
            &serde_json::to_vec(invoice)?,
        )
    }

    /// All stored invoices.
    pub fn invoices(&self) -> Result<Vec<Invoice>> {
        self.values(CF_INVOICES)
    }

    /// Persist the current block height.
    pub fn put_height(&self, height: u64) -> Result<()> {
        self.put(
            CF_STATE,
            STATE_KEY_HEIGHT.as_bytes(),
            &height.to_le_bytes(),
        )
    }

    /// The persisted block height, if any.
    pub fn height(&self) -> Result<Option<u64>> {
        let cf = self
            .db
            .cf_handle(CF_STATE)
            .ok_or_else(|| anyhow::anyhow!("column family '{}' not found", CF_STATE))?;
        match self.db.get_cf(&cf, STATE_KEY_HEIGHT.as_bytes())? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("corrupt height value"))?;
                Ok(Some(u64::from_le_bytes(arr)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcn_channel::{Direction, HtlcState};
    use opcn_core::{FundingOutpoint, NodeId, Preimage};
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("opcn-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sample_channel() -> Channel {
        Channel::open(
            FundingOutpoint {
                txid: [5; 32],
                index: 1,
            },
            NodeId::new("alice").unwrap(),
            NodeId::new("bob").unwrap(),
            100_000,
            100_000,
        )
    }

    #[test]
    fn test_open_storage() {
        let dir = temp_dir();
        assert!(Storage::open(&dir).is_ok());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_channel_roundtrip_with_pending_htlc() {
        let dir = temp_dir();
        let storage = Storage::open(&dir).unwrap();

        let mut channel = sample_channel();
        let hash = Preimage::generate().payment_hash();
        channel
            .add_htlc(HtlcId::new(), 250, hash, 150, Direction::Outgoing, 100)
            .unwrap();
        storage.put_channel(&channel).unwrap();

        let restored = storage.channels().unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].id, channel.id);
        assert_eq!(restored[0].local_balance(), 99_750);
        let pending: Vec<_> = restored[0].pending_htlcs().collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].amount, 250);
        assert_eq!(pending[0].state, HtlcState::Added);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_forward_roundtrip_and_delete() {
        let dir = temp_dir();
        let storage = Storage::open(&dir).unwrap();

        let pair = ForwardingPair {
            payment_hash: Preimage::generate().payment_hash(),
            incoming_channel: sample_channel().id,
            incoming_htlc: HtlcId::new(),
            incoming_amount: 110,
            incoming_expiry: 160,
            outgoing_channel: sample_channel().id,
            outgoing_htlc: HtlcId::new(),
            outgoing_amount: 100,
            outgoing_expiry: 120,
        };
        storage.put_forward(&pair).unwrap();
        assert_eq!(storage.forwards().unwrap(), vec![pair.clone()]);

        storage.delete_forward(&pair.outgoing_htlc).unwrap();
        assert!(storage.forwards().unwrap().is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_height_roundtrip() {
        let dir = temp_dir();
        let storage = Storage::open(&dir).unwrap();

        assert_eq!(storage.height().unwrap(), None);
        storage.put_height(424_242).unwrap();
        assert_eq!(storage.height().unwrap(), Some(424_242));

        std::fs::remove_dir_all(&dir).ok();
    }
}
