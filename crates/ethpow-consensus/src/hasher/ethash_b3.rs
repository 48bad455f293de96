//! EthashB3: ethash memory walk with Blake3 at both ends.
//!
//! The light cache and dataset items are byte-for-byte those of ethash.
//! Only the 64-byte seed expansion (Blake3 XOF) and the final 32-byte hash
//! (Blake3) differ, which is enough to make ethash hardware useless.

use super::ethash::{compute_with, Flavor};
use super::{ethash_epoch_length, CachePrimitive, EpochContext, Hasher};
use crate::chain_config::{ChainRules, EngineKind, Fork};
use alloy_primitives::B256;

#[derive(Debug, Clone, Default)]
pub struct EthashB3 {
    ecip1099: Option<u64>,
}

impl EthashB3 {
    pub fn new(ecip1099: Option<u64>) -> Self {
        Self { ecip1099 }
    }
}

impl Hasher for EthashB3 {
    fn from_rules(rules: &dyn ChainRules) -> Self {
        Self::new(rules.activation(Fork::Ecip1099))
    }

    fn kind(&self) -> EngineKind {
        EngineKind::EthashB3
    }

    fn epoch_length(&self, height: u64) -> u64 {
        ethash_epoch_length(height, self.ecip1099)
    }

    fn ecip1099_block(&self) -> Option<u64> {
        self.ecip1099
    }

    fn cache_primitive(&self) -> Option<CachePrimitive> {
        Some(CachePrimitive::EthashB3)
    }

    fn compute(&self, seal_hash: B256, nonce: u64, ctx: &EpochContext) -> (B256, B256) {
        compute_with(Flavor::Blake3, seal_hash, nonce, ctx, self.ecip1099)
    }
}
