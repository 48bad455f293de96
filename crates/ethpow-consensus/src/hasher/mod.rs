//! Proof-of-work hash primitives.
//!
//! Each primitive maps `(seal_hash, nonce)` to a `(mix, result)` pair. The
//! seal verifier compares `mix` with the header's mix digest and `result`
//! with the difficulty target.
//!
//! - [`Ethash`]: light-cache hashimoto, keccak throughout
//! - [`EthashB3`]: same memory structure, Blake3 seed expansion and final hash
//! - [`Keccak`]: a single keccak256, no cache
//! - [`Lyra2`]: Lyra2 sponge, no mix digest

mod ethash;
mod ethash_b3;
mod keccak;
mod lyra2;

pub use ethash::{
    cache_size, dataset_size, hashimoto_full, hashimoto_light, seed_hash, Dataset, Ethash,
    LightCache, TEST_CACHE_SIZE, TEST_DATASET_SIZE,
};
pub use ethash_b3::EthashB3;
pub use keccak::Keccak;
pub use lyra2::{lyra2, Lyra2};

use crate::chain_config::{ChainRules, EngineKind};
use crate::params;
use alloy_primitives::B256;
use std::sync::Arc;

/// Which memory-hard cache layout a primitive reads.
///
/// Both ethash flavours share the same cache bytes; the tag keeps their
/// on-disk dumps apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachePrimitive {
    Ethash,
    EthashB3,
}

impl CachePrimitive {
    /// Tag stored in the cache file header.
    pub fn tag(self) -> u32 {
        match self {
            CachePrimitive::Ethash => 1,
            CachePrimitive::EthashB3 => 2,
        }
    }

    /// File-name prefix for cache dumps.
    pub fn file_prefix(self) -> &'static str {
        match self {
            CachePrimitive::Ethash => "cache-",
            CachePrimitive::EthashB3 => "cache-b3-",
        }
    }
}

/// Per-height inputs handed to a primitive.
///
/// Caches are borrowed from the engine's epoch arena; the context only
/// holds reference-counted handles.
#[derive(Debug, Clone, Default)]
pub struct EpochContext {
    pub height: u64,
    pub cache: Option<Arc<LightCache>>,
    pub dataset: Option<Arc<Dataset>>,
}

impl EpochContext {
    pub fn new(height: u64) -> Self {
        Self {
            height,
            cache: None,
            dataset: None,
        }
    }
}

/// A proof-of-work hash primitive.
pub trait Hasher: Send + Sync + 'static {
    /// Build the primitive for a chain, reading any fork heights it needs.
    fn from_rules(rules: &dyn ChainRules) -> Self
    where
        Self: Sized;

    fn kind(&self) -> EngineKind;

    /// Epoch length in blocks at `height`.
    fn epoch_length(&self, _height: u64) -> u64 {
        params::EPOCH_LENGTH
    }

    /// Height at which the doubled epoch length starts, if any.
    fn ecip1099_block(&self) -> Option<u64> {
        None
    }

    /// Whether `compute` reads a light cache.
    fn needs_cache(&self) -> bool {
        self.cache_primitive().is_some()
    }

    fn cache_primitive(&self) -> Option<CachePrimitive> {
        None
    }

    /// Whether the seal carries a mix digest to compare.
    fn has_mix_digest(&self) -> bool {
        true
    }

    /// Compute `(mix, result)` for a seal hash and nonce.
    fn compute(&self, seal_hash: B256, nonce: u64, ctx: &EpochContext) -> (B256, B256);
}

/// Epoch length for ethash-family primitives.
pub(crate) fn ethash_epoch_length(height: u64, ecip1099: Option<u64>) -> u64 {
    if ecip1099.is_some_and(|at| height >= at) {
        params::ECIP1099_EPOCH_LENGTH
    } else {
        params::EPOCH_LENGTH
    }
}
