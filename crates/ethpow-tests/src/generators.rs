//! Test data generators for integration tests.
//!
//! Builds chains of sealed headers on top of an in-memory chain. Sealing
//! searches nonces until the result meets the target, so chains meant for
//! real seal checks should keep their difficulty small.

use crate::harness::MemoryChain;
use alloy_primitives::{Address, Bytes, U256};
use ethpow_consensus::{
    check_target, AnyEngine, Block, ChainConfig, EngineConfig, EngineKind, Header,
};
use std::sync::Arc;
use tracing::debug;

/// Timestamp of generated genesis headers.
pub const GENESIS_TIME: u64 = 1_000;

/// Gas limit of generated headers.
pub const TEST_GAS_LIMIT: u64 = 8_000_000;

/// Minimum difficulty of the cheap-to-seal test chains.
pub const TEST_MIN_DIFFICULTY: u64 = 64;

/// Deterministic address derived from a seed.
pub fn test_address(seed: u8) -> Address {
    Address::repeat_byte(seed)
}

pub fn genesis_header(difficulty: U256) -> Header {
    Header {
        time: GENESIS_TIME,
        gas_limit: TEST_GAS_LIMIT,
        difficulty,
        ..Default::default()
    }
}

/// Developer schedule with a difficulty floor low enough to seal quickly.
pub fn cheap_config(engine: EngineKind) -> ChainConfig {
    let mut config = ChainConfig::developer(engine);
    config.minimum_difficulty = Some(U256::from(TEST_MIN_DIFFICULTY));
    config
}

/// Keccak engine over [`cheap_config`].
pub fn keccak_engine(engine_config: EngineConfig) -> AnyEngine {
    AnyEngine::from_config(Arc::new(cheap_config(EngineKind::Keccak)), engine_config)
        .expect("Failed to build keccak engine")
}

/// Search nonces until the seal of `header` meets its difficulty.
pub fn seal_header(engine: &AnyEngine, header: &mut Header) {
    for nonce in 0u64.. {
        header.set_nonce(nonce);
        let (mix, result) = engine.compute_seal(header);
        header.mix_digest = mix;
        if check_target(result, header.difficulty).is_ok() {
            return;
        }
    }
}

/// Grows a canonical chain one sealed block at a time.
pub struct ChainBuilder {
    engine: AnyEngine,
    chain: MemoryChain,
}

impl ChainBuilder {
    /// Start a chain at a genesis carrying the engine's minimum difficulty.
    pub fn new(engine: AnyEngine) -> Self {
        let genesis = genesis_header(U256::from(TEST_MIN_DIFFICULTY));
        Self::with_genesis(engine, genesis)
    }

    pub fn with_genesis(engine: AnyEngine, genesis: Header) -> Self {
        let chain = MemoryChain::new();
        chain.push(Block::new(genesis, vec![]));
        Self { engine, chain }
    }

    pub fn engine(&self) -> &AnyEngine {
        &self.engine
    }

    pub fn chain(&self) -> &MemoryChain {
        &self.chain
    }

    pub fn tip(&self) -> Header {
        self.chain.tip().expect("chain has a genesis")
    }

    /// Canonical header at `number`.
    pub fn at(&self, number: u64) -> Header {
        self.chain
            .canonical(number)
            .unwrap_or_else(|| panic!("no canonical header at {number}"))
    }

    /// Unsealed child of `parent`, `dt` seconds later. `salt` tells siblings apart.
    pub fn child(&self, parent: &Header, dt: u64, salt: u8) -> Header {
        let time = parent.time + dt;
        Header {
            parent_hash: parent.hash(),
            number: parent.number + 1,
            time,
            gas_limit: parent.gas_limit,
            coinbase: test_address(salt),
            extra_data: Bytes::from(vec![salt]),
            difficulty: self.engine.calc_difficulty(time, parent),
            ..Default::default()
        }
    }

    /// Sealed child of `parent`.
    pub fn sealed_child(&self, parent: &Header, dt: u64, salt: u8) -> Header {
        let mut header = self.child(parent, dt, salt);
        seal_header(&self.engine, &mut header);
        header
    }

    /// Sealed block on top of the tip, not yet appended.
    pub fn next_block(&self, uncles: Vec<Header>) -> Block {
        let header = self.child(&self.tip(), 10, 0);
        let mut block = Block::new(header, uncles);
        seal_header(&self.engine, &mut block.header);
        block
    }

    /// Sealed uncle whose parent sits `depth` blocks below the next block.
    pub fn uncle_at_depth(&self, depth: u64, salt: u8) -> Header {
        let next = self.tip().number + 1;
        let parent = self.at(next - depth - 1);
        self.sealed_child(&parent, 7, salt)
    }

    pub fn push(&mut self, block: Block) {
        self.chain.push(block);
    }

    /// Append `count` blocks without uncles.
    pub fn extend(&mut self, count: u64) -> &mut Self {
        for _ in 0..count {
            let block = self.next_block(vec![]);
            self.push(block);
        }
        debug!(count, tip = self.tip().number, "Extended test chain");
        self
    }

    /// Canonical headers from `from` through the tip.
    pub fn headers_from(&self, from: u64) -> Vec<Header> {
        (from..=self.tip().number).map(|n| self.at(n)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethpow_consensus::HeaderReader;

    #[test]
    fn test_builder_links_headers() {
        let mut builder = ChainBuilder::new(keccak_engine(EngineConfig::default()));
        builder.extend(5);

        assert_eq!(builder.tip().number, 5);
        for n in 1..=5 {
            let header = builder.at(n);
            assert_eq!(header.parent_hash, builder.at(n - 1).hash(), "link at {n}");
            assert!(builder.chain().get_header(header.hash(), n).is_some());
        }
    }

    #[test]
    fn test_sealed_headers_pass_seal_check() {
        let mut builder = ChainBuilder::new(keccak_engine(EngineConfig::default()));
        builder.extend(3);
        for header in builder.headers_from(1) {
            assert!(builder.engine().verify_seal(&header).is_ok());
        }
    }

    #[test]
    fn test_next_block_commits_to_uncles() {
        let mut builder = ChainBuilder::new(keccak_engine(EngineConfig::default()));
        builder.extend(3);
        let uncle = builder.uncle_at_depth(2, 7);
        let block = builder.next_block(vec![uncle]);
        assert!(block.header.has_uncles());
        assert!(builder.engine().verify_seal(&block.header).is_ok());
    }
}
