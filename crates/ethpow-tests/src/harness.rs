//! Test harness for integration tests.
//!
//! Provides an in-memory chain, a state mutator that records every credit,
//! and temporary cache directories.

use alloy_primitives::{Address, B256, U256};
use ethpow_consensus::{Block, ChainReader, EngineConfig, Header, HeaderReader, PowMode, StateMutator};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tempfile::TempDir;

static TRACING: Once = Once::new();

/// Route `tracing` output through the test writer. `RUST_LOG` picks the level.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Blocks keyed by hash plus the canonical chain by number.
#[derive(Default)]
pub struct MemoryChain {
    blocks: RwLock<HashMap<B256, Block>>,
    canonical: RwLock<Vec<B256>>,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `block` to the canonical chain.
    pub fn push(&self, block: Block) {
        let hash = block.hash();
        self.canonical.write().push(hash);
        self.blocks.write().insert(hash, block);
    }

    /// Store `block` without making it canonical.
    pub fn insert_side(&self, block: Block) {
        self.blocks.write().insert(block.hash(), block);
    }

    /// Canonical header at `number`.
    pub fn canonical(&self, number: u64) -> Option<Header> {
        let hash = *self.canonical.read().get(number as usize)?;
        self.blocks.read().get(&hash).map(|b| b.header.clone())
    }

    /// Latest canonical header.
    pub fn tip(&self) -> Option<Header> {
        let hash = *self.canonical.read().last()?;
        self.blocks.read().get(&hash).map(|b| b.header.clone())
    }

    pub fn len(&self) -> usize {
        self.canonical.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HeaderReader for MemoryChain {
    fn get_header(&self, hash: B256, number: u64) -> Option<Header> {
        self.blocks
            .read()
            .get(&hash)
            .filter(|b| b.number() == number)
            .map(|b| b.header.clone())
    }
}

impl ChainReader for MemoryChain {
    fn get_block(&self, hash: B256, number: u64) -> Option<Block> {
        self.blocks
            .read()
            .get(&hash)
            .filter(|b| b.number() == number)
            .cloned()
    }
}

/// Records `add_balance` calls in order.
#[derive(Debug, Default)]
pub struct RecordingState {
    pub credits: Vec<(Address, U256)>,
}

impl RecordingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of credits to `address`.
    pub fn balance(&self, address: Address) -> U256 {
        self.credits
            .iter()
            .filter(|(a, _)| *a == address)
            .fold(U256::ZERO, |acc, (_, amount)| acc + amount)
    }

    /// Sum of all credits.
    pub fn total(&self) -> U256 {
        self.credits
            .iter()
            .fold(U256::ZERO, |acc, (_, amount)| acc + amount)
    }
}

impl StateMutator for RecordingState {
    fn add_balance(&mut self, address: Address, amount: U256) {
        self.credits.push((address, amount));
    }
}

/// Cache directory that is removed on drop.
pub struct TestCacheDir {
    _temp_dir: TempDir,
}

impl TestCacheDir {
    pub fn new() -> Self {
        Self {
            _temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    pub fn path(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Engine settings that dump caches into this directory.
    pub fn engine_config(&self, pow_mode: PowMode) -> EngineConfig {
        EngineConfig {
            cache_dir: Some(self.path().to_path_buf()),
            ..EngineConfig::with_mode(pow_mode)
        }
    }

    /// Files currently in the directory.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(self.path())
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default();
        files.sort();
        files
    }
}

impl Default for TestCacheDir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_chain_lookup() {
        let chain = MemoryChain::new();
        let genesis = Header::default();
        chain.push(Block::new(genesis.clone(), vec![]));

        assert_eq!(chain.len(), 1);
        assert_eq!(chain.get_header(genesis.hash(), 0), Some(genesis.clone()));
        assert!(
            chain.get_header(genesis.hash(), 1).is_none(),
            "lookup must match the number too"
        );
        assert_eq!(chain.tip(), Some(genesis));
    }

    #[test]
    fn test_side_blocks_are_not_canonical() {
        let chain = MemoryChain::new();
        chain.push(Block::new(Header::default(), vec![]));
        let side = Header {
            number: 1,
            time: 5,
            ..Default::default()
        };
        chain.insert_side(Block::new(side.clone(), vec![]));

        assert!(chain.canonical(1).is_none());
        assert!(chain.get_block(side.hash(), 1).is_some());
    }

    #[test]
    fn test_recording_state_sums() {
        let mut state = RecordingState::new();
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        state.add_balance(a, U256::from(3u64));
        state.add_balance(b, U256::from(4u64));
        state.add_balance(a, U256::from(5u64));

        assert_eq!(state.balance(a), U256::from(8u64));
        assert_eq!(state.total(), U256::from(12u64));
        assert_eq!(state.credits[1].0, b, "credits keep call order");
    }

    #[test]
    fn test_cache_dir_starts_empty() {
        let dir = TestCacheDir::new();
        assert!(dir.files().is_empty());
        assert_eq!(dir.engine_config(PowMode::Test).cache_dir.as_deref(), Some(dir.path()));
    }
}
