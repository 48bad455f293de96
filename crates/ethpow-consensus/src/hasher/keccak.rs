//! Plain keccak256 proof-of-work.

use super::{EpochContext, Hasher};
use crate::chain_config::{ChainRules, EngineKind};
use alloy_primitives::{keccak256, B256};

/// `keccak256(seal_hash || be64(nonce))`, used as both mix and result.
#[derive(Debug, Clone, Copy, Default)]
pub struct Keccak;

impl Hasher for Keccak {
    fn from_rules(_rules: &dyn ChainRules) -> Self {
        Keccak
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Keccak
    }

    fn compute(&self, seal_hash: B256, nonce: u64, _ctx: &EpochContext) -> (B256, B256) {
        let mut input = [0u8; 40];
        input[..32].copy_from_slice(seal_hash.as_slice());
        input[32..].copy_from_slice(&nonce.to_be_bytes());
        let digest = keccak256(input);
        (digest, digest)
    }
}
