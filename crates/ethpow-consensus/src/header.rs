//! Block header type and its canonical encodings.
//!
//! Two digests are derived from a header:
//! - `hash()`: keccak256 over the full RLP list (the block hash)
//! - `seal_hash()`: keccak256 over the RLP list without `mix_digest` and
//!   `nonce`, which is what the PoW primitive commits to

use alloy_primitives::{b256, keccak256, Address, Bloom, Bytes, B256, B64, U256};
use alloy_rlp::{BufMut, Encodable, Header as RlpHeader};

/// keccak256(rlp([])), the uncle hash of a block without uncles.
pub const EMPTY_UNCLE_HASH: B256 =
    b256!("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347");

/// An Ethereum-style block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub parent_hash: B256,
    pub uncle_hash: B256,
    /// Reward recipient and block author.
    pub coinbase: Address,
    pub state_root: B256,
    pub tx_root: B256,
    pub receipt_root: B256,
    pub bloom: Bloom,
    pub difficulty: U256,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    /// Seconds since the Unix epoch.
    pub time: u64,
    pub extra_data: Bytes,
    pub mix_digest: B256,
    pub nonce: B64,
    /// Present iff EIP-1559 is active at this height.
    pub base_fee: Option<U256>,
    pub withdrawals_root: Option<B256>,
    pub blob_gas_used: Option<u64>,
    pub excess_blob_gas: Option<u64>,
    pub parent_beacon_root: Option<B256>,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            parent_hash: B256::ZERO,
            uncle_hash: EMPTY_UNCLE_HASH,
            coinbase: Address::ZERO,
            state_root: B256::ZERO,
            tx_root: B256::ZERO,
            receipt_root: B256::ZERO,
            bloom: Bloom::ZERO,
            difficulty: U256::ZERO,
            number: 0,
            gas_limit: 0,
            gas_used: 0,
            time: 0,
            extra_data: Bytes::new(),
            mix_digest: B256::ZERO,
            nonce: B64::ZERO,
            base_fee: None,
            withdrawals_root: None,
            blob_gas_used: None,
            excess_blob_gas: None,
            parent_beacon_root: None,
        }
    }
}

impl Header {
    /// Block hash: keccak256 of the full RLP encoding.
    pub fn hash(&self) -> B256 {
        keccak256(rlp_list(&self.full_fields()))
    }

    /// Hash of the header prior to sealing.
    pub fn seal_hash(&self) -> B256 {
        keccak256(rlp_list(&self.seal_fields()))
    }

    /// PoW nonce as an integer (big-endian, as stored on the wire).
    pub fn nonce_u64(&self) -> u64 {
        u64::from_be_bytes(self.nonce.0)
    }

    /// Set the nonce from an integer.
    pub fn set_nonce(&mut self, nonce: u64) {
        self.nonce = B64::from(nonce.to_be_bytes());
    }

    /// Whether the parent of the next block counts as having uncles.
    pub fn has_uncles(&self) -> bool {
        self.uncle_hash != EMPTY_UNCLE_HASH
    }

    /// Name of the first post-merge field set on this header, if any.
    pub fn post_merge_field(&self) -> Option<&'static str> {
        if self.withdrawals_root.is_some() {
            Some("withdrawals_root")
        } else if self.blob_gas_used.is_some() {
            Some("blob_gas_used")
        } else if self.excess_blob_gas.is_some() {
            Some("excess_blob_gas")
        } else if self.parent_beacon_root.is_some() {
            Some("parent_beacon_root")
        } else {
            None
        }
    }

    fn seal_fields(&self) -> Vec<&dyn Encodable> {
        let mut fields: Vec<&dyn Encodable> = vec![
            &self.parent_hash,
            &self.uncle_hash,
            &self.coinbase,
            &self.state_root,
            &self.tx_root,
            &self.receipt_root,
            &self.bloom,
            &self.difficulty,
            &self.number,
            &self.gas_limit,
            &self.gas_used,
            &self.time,
            &self.extra_data,
        ];
        if let Some(base_fee) = &self.base_fee {
            fields.push(base_fee);
        }
        fields
    }

    fn full_fields(&self) -> Vec<&dyn Encodable> {
        let mut fields: Vec<&dyn Encodable> = vec![
            &self.parent_hash,
            &self.uncle_hash,
            &self.coinbase,
            &self.state_root,
            &self.tx_root,
            &self.receipt_root,
            &self.bloom,
            &self.difficulty,
            &self.number,
            &self.gas_limit,
            &self.gas_used,
            &self.time,
            &self.extra_data,
            &self.mix_digest,
            &self.nonce,
        ];
        if let Some(v) = &self.base_fee {
            fields.push(v);
        }
        if let Some(v) = &self.withdrawals_root {
            fields.push(v);
        }
        if let Some(v) = &self.blob_gas_used {
            fields.push(v);
        }
        if let Some(v) = &self.excess_blob_gas {
            fields.push(v);
        }
        if let Some(v) = &self.parent_beacon_root {
            fields.push(v);
        }
        fields
    }
}

impl Encodable for Header {
    fn encode(&self, out: &mut dyn BufMut) {
        out.put_slice(&rlp_list(&self.full_fields()));
    }

    fn length(&self) -> usize {
        let fields = self.full_fields();
        let payload_length: usize = fields.iter().map(|f| f.length()).sum();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

/// A header together with its uncle headers.
///
/// Transactions are opaque to this crate, so a block here is only what the
/// uncle and reward rules need.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    pub header: Header,
    pub uncles: Vec<Header>,
}

impl Block {
    /// Build a block, deriving the header's uncle hash from `uncles`.
    pub fn new(mut header: Header, uncles: Vec<Header>) -> Self {
        header.uncle_hash = calc_uncle_hash(&uncles);
        Self { header, uncles }
    }

    pub fn hash(&self) -> B256 {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }
}

/// keccak256 of the RLP list of uncle headers.
pub fn calc_uncle_hash(uncles: &[Header]) -> B256 {
    if uncles.is_empty() {
        return EMPTY_UNCLE_HASH;
    }
    let fields: Vec<&dyn Encodable> = uncles.iter().map(|u| u as &dyn Encodable).collect();
    keccak256(rlp_list(&fields))
}

fn rlp_list(fields: &[&dyn Encodable]) -> Vec<u8> {
    let payload_length: usize = fields.iter().map(|f| f.length()).sum();
    let mut out = Vec::with_capacity(payload_length + 9);
    RlpHeader {
        list: true,
        payload_length,
    }
    .encode(&mut out);
    for field in fields {
        field.encode(&mut out);
    }
    out
}
