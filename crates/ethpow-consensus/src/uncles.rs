//! Uncle admission.

use crate::engine::ChainReader;
use crate::error::{ConsensusError, ConsensusResult};
use crate::hasher::Hasher;
use crate::header::{Block, Header, EMPTY_UNCLE_HASH};
use crate::params::{MAX_UNCLES, UNCLE_GENERATION_DEPTH};
use crate::validation::HeaderVerifier;
use alloy_primitives::B256;
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// Check that the uncles of `block` are recent, unique, not ancestors and
/// themselves valid headers.
pub(crate) fn verify_uncles<H: Hasher>(
    verifier: &HeaderVerifier<'_, H>,
    chain: &dyn ChainReader,
    block: &Block,
    now: u64,
) -> ConsensusResult<()> {
    if block.uncles.len() > MAX_UNCLES {
        return Err(ConsensusError::TooManyUncles {
            count: block.uncles.len(),
            max: MAX_UNCLES,
        });
    }
    if block.uncles.is_empty() {
        return Ok(());
    }

    let mut seen: HashSet<B256> = HashSet::new();
    let mut ancestors: HashMap<B256, Header> = HashMap::new();

    let mut cursor = block
        .number()
        .checked_sub(1)
        .map(|number| (block.header.parent_hash, number));
    for _ in 0..UNCLE_GENERATION_DEPTH {
        let Some((hash, number)) = cursor else {
            break;
        };
        let Some(ancestor) = chain.get_header(hash, number) else {
            break;
        };
        cursor = number
            .checked_sub(1)
            .map(|parent_number| (ancestor.parent_hash, parent_number));
        let has_uncles = ancestor.uncle_hash != EMPTY_UNCLE_HASH;
        ancestors.insert(hash, ancestor);
        if has_uncles {
            // A known header without a body still counts as an ancestor.
            let Some(full) = chain.get_block(hash, number) else {
                break;
            };
            seen.extend(full.uncles.iter().map(Header::hash));
        }
    }

    let block_hash = block.hash();
    ancestors.insert(block_hash, block.header.clone());
    seen.insert(block_hash);

    for uncle in &block.uncles {
        let hash = uncle.hash();
        if !seen.insert(hash) {
            return Err(ConsensusError::DuplicateUncle(hash));
        }
        if ancestors.contains_key(&hash) {
            return Err(ConsensusError::UncleIsAncestor(hash));
        }
        let parent = match ancestors.get(&uncle.parent_hash) {
            Some(parent) if uncle.parent_hash != block.header.parent_hash => parent,
            _ => return Err(ConsensusError::DanglingUncle(hash)),
        };
        verifier.verify_header_with(uncle, parent, true, true, now)?;
        trace!(uncle = %hash, number = uncle.number, "Uncle admitted");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_config::{ChainConfig, EngineKind};
    use crate::config::EngineConfig;
    use crate::difficulty::{calc_difficulty, DifficultyRules};
    use crate::engine::HeaderReader;
    use crate::hasher::Keccak;
    use crate::seal::SealVerifier;
    use alloy_primitives::{Address, Bytes, U256};

    #[derive(Default)]
    struct MemChain {
        blocks: HashMap<B256, Block>,
        /// Blocks whose header is served but whose body is not.
        bodiless: HashSet<B256>,
    }

    impl HeaderReader for MemChain {
        fn get_header(&self, hash: B256, number: u64) -> Option<Header> {
            self.blocks
                .get(&hash)
                .filter(|b| b.number() == number)
                .map(|b| b.header.clone())
        }
    }

    impl ChainReader for MemChain {
        fn get_block(&self, hash: B256, number: u64) -> Option<Block> {
            if self.bodiless.contains(&hash) {
                return None;
            }
            self.blocks.get(&hash).filter(|b| b.number() == number).cloned()
        }
    }

    struct Fixture {
        config: ChainConfig,
        difficulty: DifficultyRules,
        seal: SealVerifier<Keccak>,
        chain: MemChain,
        /// Canonical headers by number.
        canon: Vec<Header>,
    }

    impl Fixture {
        fn new(length: u64) -> Self {
            let config = ChainConfig::developer(EngineKind::Keccak);
            let mut fx = Self {
                difficulty: DifficultyRules::for_chain(&config),
                config,
                seal: SealVerifier::new(Keccak, &EngineConfig::fake()),
                chain: MemChain::default(),
                canon: Vec::new(),
            };
            let genesis = Header {
                time: 1000,
                gas_limit: 8_000_000,
                difficulty: U256::from(131_072u64),
                ..Default::default()
            };
            fx.push(Block::new(genesis, vec![]));
            for _ in 0..length {
                let parent = fx.tip().clone();
                let header = fx.child(&parent, 10, 0);
                fx.push(Block::new(header, vec![]));
            }
            fx
        }

        fn tip(&self) -> &Header {
            &self.canon[self.canon.len() - 1]
        }

        fn push(&mut self, block: Block) {
            self.canon.push(block.header.clone());
            self.chain.blocks.insert(block.hash(), block);
        }

        /// A child of `parent`; `salt` separates siblings.
        fn child(&self, parent: &Header, dt: u64, salt: u8) -> Header {
            let time = parent.time + dt;
            Header {
                parent_hash: parent.hash(),
                number: parent.number + 1,
                time,
                gas_limit: parent.gas_limit,
                coinbase: Address::repeat_byte(salt),
                extra_data: Bytes::from(vec![salt]),
                difficulty: calc_difficulty(&self.difficulty, &self.config, time, parent),
                ..Default::default()
            }
        }

        fn verify(&self, block: &Block) -> ConsensusResult<()> {
            let verifier = HeaderVerifier {
                config: &self.config,
                difficulty: &self.difficulty,
                seal: &self.seal,
            };
            verify_uncles(&verifier, &self.chain, block, 1_000_000)
        }

        /// Next canonical block carrying `uncles`.
        fn next_block(&self, uncles: Vec<Header>) -> Block {
            let header = self.child(self.tip(), 10, 0);
            Block::new(header, uncles)
        }

        /// Uncle at depth `depth` below the next block.
        fn uncle_at_depth(&self, depth: u64, salt: u8) -> Header {
            let next = self.tip().number + 1;
            let parent = &self.canon[(next - depth - 1) as usize];
            self.child(parent, 7, salt)
        }
    }

    #[test]
    fn test_no_uncles() {
        let fx = Fixture::new(3);
        assert!(fx.verify(&fx.next_block(vec![])).is_ok());
    }

    #[test]
    fn test_too_many_uncles() {
        let fx = Fixture::new(10);
        let uncles = (1..=3).map(|i| fx.uncle_at_depth(2, i)).collect();
        assert_eq!(
            fx.verify(&fx.next_block(uncles)),
            Err(ConsensusError::TooManyUncles { count: 3, max: 2 })
        );
    }

    #[test]
    fn test_uncle_depths() {
        let fx = Fixture::new(19);
        for depth in 1..=6 {
            let block = fx.next_block(vec![fx.uncle_at_depth(depth, 9)]);
            assert!(fx.verify(&block).is_ok(), "depth {depth} accepted");
        }
        let uncle = fx.uncle_at_depth(7, 9);
        let hash = uncle.hash();
        assert_eq!(
            fx.verify(&fx.next_block(vec![uncle])),
            Err(ConsensusError::DanglingUncle(hash))
        );
    }

    #[test]
    fn test_sibling_of_block_is_dangling() {
        let fx = Fixture::new(5);
        let sibling = fx.child(fx.tip(), 11, 3);
        let hash = sibling.hash();
        assert_eq!(
            fx.verify(&fx.next_block(vec![sibling])),
            Err(ConsensusError::DanglingUncle(hash))
        );
    }

    #[test]
    fn test_ancestor_as_uncle() {
        let fx = Fixture::new(5);
        let ancestor = fx.canon[3].clone();
        let hash = ancestor.hash();
        assert_eq!(
            fx.verify(&fx.next_block(vec![ancestor])),
            Err(ConsensusError::UncleIsAncestor(hash))
        );
    }

    #[test]
    fn test_duplicate_in_same_block() {
        let fx = Fixture::new(5);
        let uncle = fx.uncle_at_depth(2, 4);
        let hash = uncle.hash();
        assert_eq!(
            fx.verify(&fx.next_block(vec![uncle.clone(), uncle])),
            Err(ConsensusError::DuplicateUncle(hash))
        );
    }

    #[test]
    fn test_uncle_already_included_by_ancestor() {
        let mut fx = Fixture::new(5);
        let uncle = fx.uncle_at_depth(2, 4);
        let hash = uncle.hash();
        let including = fx.next_block(vec![uncle.clone()]);
        assert!(fx.verify(&including).is_ok());
        fx.push(including);
        assert_eq!(
            fx.verify(&fx.next_block(vec![uncle])),
            Err(ConsensusError::DuplicateUncle(hash))
        );
    }

    #[test]
    fn test_bodiless_ancestor_still_parents_uncles() {
        let mut fx = Fixture::new(5);
        let with_uncle = fx.next_block(vec![fx.uncle_at_depth(2, 1)]);
        let bodiless = with_uncle.hash();
        fx.push(with_uncle);
        fx.chain.bodiless.insert(bodiless);
        let block = fx.next_block(vec![]);
        fx.push(block);

        // The walk stops at block 6 for lack of a body, after recording it.
        let uncle = fx.child(&fx.canon[6], 7, 5);
        assert_eq!(uncle.parent_hash, bodiless);
        assert!(fx.verify(&fx.next_block(vec![uncle])).is_ok());

        let beyond = fx.uncle_at_depth(3, 6);
        let hash = beyond.hash();
        assert_eq!(
            fx.verify(&fx.next_block(vec![beyond])),
            Err(ConsensusError::DanglingUncle(hash))
        );
    }

    #[test]
    fn test_uncle_header_rules_apply() {
        let fx = Fixture::new(5);
        let mut uncle = fx.uncle_at_depth(2, 4);
        uncle.difficulty += U256::from(1u64);
        assert!(matches!(
            fx.verify(&fx.next_block(vec![uncle])),
            Err(ConsensusError::InvalidDifficulty { .. })
        ));
    }
}
