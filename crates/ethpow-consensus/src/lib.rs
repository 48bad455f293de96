//! # ethpow-consensus
//!
//! Proof-of-work consensus verification for Ethereum-style chains.
//!
//! This crate provides:
//! - A forkable chain configuration with presets and a compatibility check
//! - Ethash, EthashB3, Keccak and Lyra2 seal primitives
//! - Difficulty adjustment (Frontier, Homestead, EIP-100B, Lyra2) and the bomb
//! - Header, uncle and seal verification
//! - Block and uncle reward accounting, including ECIP-1017 eras
//! - Parallel, ordered batch verification of header runs
//!
//! ## Engines
//!
//! An [`Engine`] is generic over its [`Hasher`]. [`AnyEngine`] picks the
//! hasher from the chain configuration at runtime:
//!
//! ```ignore
//! let engine = AnyEngine::from_config(Arc::new(ChainConfig::classic()), EngineConfig::default())?;
//! engine.verify_header(&chain, &header, true)?;
//! ```
//!
//! ## Light caches
//!
//! Ethash verification needs a 16+ MiB cache per epoch. Caches are built on
//! first use, kept in a small LRU, optionally dumped to disk, and the next
//! epoch's cache is pre-generated in the background.

mod batch;
pub mod chain_config;
mod compat;
mod config;
mod difficulty;
mod eip1559;
mod engine;
pub mod epoch_cache;
mod error;
pub mod hasher;
mod header;
mod rewards;
mod seal;
mod uncles;
mod validation;

pub use batch::{AbortHandle, BatchVerification};
pub use chain_config::{ChainConfig, ChainRules, ConfigError, EngineKind, Fork};
pub use compat::is_compatible;
pub use config::{EngineConfig, PowMode};
pub use difficulty::{calc_difficulty, DifficultyRules};
pub use eip1559::{calc_base_fee, verify_eip1559_header};
pub use engine::{AnyEngine, ChainReader, Engine, HeaderReader, StateMutator};
pub use error::{ConfigMismatch, ConsensusError, ConsensusResult};
pub use hasher::{Dataset, EpochContext, Ethash, EthashB3, Hasher, Keccak, Lyra2};
pub use header::{calc_uncle_hash, Block, Header, EMPTY_UNCLE_HASH};
pub use rewards::{
    accumulate_rewards, block_rewards, ecip1017_era, ecip1017_winner_reward, lyra2_era,
    lyra2_winner_reward, BlockRewards,
};
pub use seal::{check_target, SealVerifier};

/// Network and protocol constants.
pub mod params {
    use alloy_primitives::U256;

    /// Maximum size of a header's extra-data section in bytes.
    pub const MAX_EXTRA_DATA_SIZE: u64 = 32;

    /// Seconds a header may be ahead of the local clock.
    pub const ALLOWED_FUTURE_BLOCK_TIME: u64 = 15;

    /// Future-block allowance for EthashB3 chains.
    pub const ETHASH_B3_ALLOWED_FUTURE_BLOCK_TIME: u64 = 7;

    /// Maximum uncles per block.
    pub const MAX_UNCLES: usize = 2;

    /// Ancestors searched when admitting uncles.
    pub const UNCLE_GENERATION_DEPTH: usize = 7;

    /// Gas limit adjustment divisor.
    pub const GAS_LIMIT_BOUND_DIVISOR: u64 = 1024;

    /// Minimum gas limit.
    pub const MIN_GAS_LIMIT: u64 = 5000;

    /// Maximum gas limit (2^63 - 1).
    pub const MAX_GAS_LIMIT: u64 = 0x7fff_ffff_ffff_ffff;

    /// EIP-1559 elasticity multiplier.
    pub const ELASTICITY_MULTIPLIER: u64 = 2;

    /// EIP-1559 base fee change denominator.
    pub const BASE_FEE_CHANGE_DENOMINATOR: u64 = 8;

    /// EIP-1559 base fee of the fork block (1 gwei).
    pub const INITIAL_BASE_FEE: u64 = 1_000_000_000;

    /// Blocks per ethash epoch.
    pub const EPOCH_LENGTH: u64 = 30_000;

    /// Blocks per ethash epoch from ECIP-1099 on.
    pub const ECIP1099_EPOCH_LENGTH: u64 = 60_000;

    /// Last epoch with precomputed ethash sizes.
    pub const MAX_EPOCH: u64 = 2048;

    /// Blocks per difficulty bomb period.
    pub const EXP_DIFF_PERIOD: u64 = 100_000;

    /// Bomb delays introduced by the respective forks.
    pub const EIP649_BOMB_DELAY: u64 = 3_000_000;
    pub const EIP1234_BOMB_DELAY: u64 = 5_000_000;
    pub const EIP2384_BOMB_DELAY: u64 = 9_000_000;
    pub const EIP3554_BOMB_DELAY: u64 = 9_700_000;
    pub const EIP4345_BOMB_DELAY: u64 = 10_700_000;
    pub const EIP5133_BOMB_DELAY: u64 = 11_400_000;

    /// Frontier block reward (5 ether).
    pub const FRONTIER_BLOCK_REWARD: U256 = U256::from_limbs([5_000_000_000_000_000_000, 0, 0, 0]);

    /// Byzantium block reward (3 ether).
    pub const EIP649_BLOCK_REWARD: U256 = U256::from_limbs([3_000_000_000_000_000_000, 0, 0, 0]);

    /// Constantinople block reward (2 ether).
    pub const EIP1234_BLOCK_REWARD: U256 = U256::from_limbs([2_000_000_000_000_000_000, 0, 0, 0]);

    /// Blocks on and after the DAO fork that must carry the pro-fork extra-data.
    pub const DAO_FORK_EXTRA_RANGE: u64 = 10;

    /// Pro-fork extra-data marker.
    pub const DAO_FORK_EXTRA: &[u8] = b"dao-hard-fork";

    /// Lyra2 maximum block reward (50 coins).
    pub const LYRA2_MAX_BLOCK_REWARD: U256 =
        U256::from_limbs([0xb5e3_af16_b188_0000, 2, 0, 0]);

    /// Lyra2 reward era length.
    pub const LYRA2_ERA_LENGTH: u64 = 100_000;
}
