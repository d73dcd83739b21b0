use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

/// Absolute block height on the anchoring chain.
///
/// HTLC expiries are expressed as absolute heights; the chain follower that
/// advances the height is an external collaborator.
pub type BlockHeight = u64;

/// Identifier of a node in the channel network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id. The identifier must be non-empty.
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        if id.is_empty() {
            return Err(CoreError::InvalidNodeId("empty identifier".into()));
        }
        Ok(Self(id))
    }

    /// The bare identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to the on-chain funding output that anchors a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FundingOutpoint {
    /// Funding transaction id.
    pub txid: [u8; 32],
    /// Output index within the funding transaction.
    pub index: u32,
}

impl fmt::Display for FundingOutpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(self.txid), self.index)
    }
}

/// Identifier of a channel, derived from its funding outpoint.
///
/// `ChannelId` is `Ord`: cross-channel operations acquire channel locks in
/// ascending id order, which is what makes that order global.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ChannelId([u8; 32]);

impl ChannelId {
    /// Derive the channel id from the funding outpoint.
    pub fn from_outpoint(outpoint: &FundingOutpoint) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&outpoint.txid);
        hasher.update(&outpoint.index.to_le_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Raw bytes of the id.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Construct from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for ChannelId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(parse_hex32(s)?))
    }
}

/// Unique identifier for an HTLC (UUID v7 — time-ordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HtlcId(pub Uuid);

impl HtlcId {
    /// Create a new random HTLC id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for HtlcId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HtlcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The secret whose hash identifies a payment. Revealing it proves receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preimage([u8; 32]);

impl Preimage {
    /// Generate a fresh random preimage.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Construct from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw bytes of the preimage.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The payment hash this preimage resolves: `blake3(preimage)`.
    pub fn payment_hash(&self) -> PaymentHash {
        PaymentHash(*blake3::hash(&self.0).as_bytes())
    }
}

/// BLAKE3 hash of a preimage; the payment identifier carried by every HTLC
/// along a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentHash(pub [u8; 32]);

impl PaymentHash {
    /// Raw bytes of the hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check whether `preimage` resolves this hash.
    pub fn matches(&self, preimage: &Preimage) -> bool {
        preimage.payment_hash() == *self
    }
}

impl fmt::Display for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for PaymentHash {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(parse_hex32(s)?))
    }
}

fn parse_hex32(s: &str) -> Result<[u8; 32], CoreError> {
    let bytes = hex::decode(s).map_err(|e| CoreError::InvalidHex(e.to_string()))?;
    let got = bytes.len();
    bytes
        .try_into()
        .map_err(|_| CoreError::InvalidLength { expected: 32, got })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outpoint(byte: u8, index: u32) -> FundingOutpoint {
        FundingOutpoint {
            txid: [byte; 32],
            index,
        }
    }

    #[test]
    fn test_node_id_rejects_empty() {
        assert!(NodeId::new("").is_err());
        assert!(NodeId::new("alice").is_ok());
    }

    #[test]
    fn test_channel_id_deterministic() {
        let a = ChannelId::from_outpoint(&outpoint(1, 0));
        let b = ChannelId::from_outpoint(&outpoint(1, 0));
        assert_eq!(a, b);
    }

    #[test]
    fn test_channel_id_distinct_outputs() {
        let a = ChannelId::from_outpoint(&outpoint(1, 0));
        let b = ChannelId::from_outpoint(&outpoint(1, 1));
        assert_ne!(a, b);
    }

    #[test]
    fn test_channel_id_hex_roundtrip() {
        let id = ChannelId::from_outpoint(&outpoint(7, 3));
        let parsed: ChannelId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_channel_id_parse_rejects_bad_input() {
        assert!("zz".parse::<ChannelId>().is_err());
        assert!("abcd".parse::<ChannelId>().is_err()); // too short
    }

    #[test]
    fn test_preimage_hash_matches() {
        let preimage = Preimage::generate();
        let hash = preimage.payment_hash();
        assert!(hash.matches(&preimage));
        assert!(!hash.matches(&Preimage::generate()));
    }

    #[test]
    fn test_preimage_hash_is_blake3() {
        let preimage = Preimage::from_bytes([42u8; 32]);
        let expected = *blake3::hash(&[42u8; 32]).as_bytes();
        assert_eq!(preimage.payment_hash().0, expected);
    }

    #[test]
    fn test_htlc_ids_unique() {
        assert_ne!(HtlcId::new(), HtlcId::new());
    }

    #[test]
    fn test_funding_outpoint_display() {
        let op = outpoint(0xab, 2);
        let s = op.to_string();
        assert!(s.starts_with("abab"));
        assert!(s.ends_with(":2"));
    }

    #[test]
    fn test_payment_hash_serde_roundtrip() {
        let hash = Preimage::generate().payment_hash();
        let json = serde_json::to_string(&hash).unwrap();
        let back: PaymentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, back);
    }
}
