//! Error types for consensus verification.

use crate::chain_config::ConfigError;
use alloy_primitives::{B256, U256};
use thiserror::Error;

/// Header, seal and uncle verification errors.
///
/// Every rule has its own variant so callers can tell a stale parent from a
/// bad seal without string matching.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// Parent (or an ancestor) could not be resolved through the reader.
    #[error("unknown ancestor")]
    UnknownAncestor,

    /// Header timestamp is too far ahead of the local clock.
    #[error("block in the future: time {time}, allowed up to {max_time}")]
    FutureBlock { time: u64, max_time: u64 },

    /// Header timestamp is not strictly after its parent.
    #[error("timestamp older than parent: block {block_time}, parent {parent_time}")]
    OlderBlockTime { block_time: u64, parent_time: u64 },

    /// Non-positive difficulty, or a difficulty that differs from the computed one.
    #[error(
        "invalid difficulty: have {got}, want {}",
        .expected.as_ref().map(ToString::to_string).unwrap_or_else(|| "positive".to_string())
    )]
    InvalidDifficulty {
        got: U256,
        expected: Option<U256>,
    },

    /// Header number is not parent number + 1.
    #[error("invalid block number: have {number}, parent {parent_number}")]
    InvalidNumber { number: u64, parent_number: u64 },

    /// Extra-data section exceeds the allowed size.
    #[error("extra-data too long: {len} > {max}")]
    ExtraDataTooLong { len: usize, max: u64 },

    /// Gas limit out of range or drifted too far from the parent.
    #[error("invalid gas limit {have}: {reason}")]
    GasLimitInvalid { have: u64, reason: String },

    /// More gas used than the limit allows.
    #[error("invalid gas used: have {gas_used}, gas limit {gas_limit}")]
    GasUsedExceedsLimit { gas_used: u64, gas_limit: u64 },

    /// Base fee present or absent contrary to the fork schedule, or wrong value.
    #[error("base fee violation: {0}")]
    BaseFeeViolation(String),

    /// Seal primitive produced a different mix digest.
    #[error("invalid mix digest: have {have}, want {want}")]
    InvalidMixDigest { have: B256, want: B256 },

    /// Seal result above the difficulty target.
    #[error("invalid proof-of-work")]
    InvalidPoW,

    /// Block includes more uncles than allowed.
    #[error("too many uncles: {count} > {max}")]
    TooManyUncles { count: usize, max: usize },

    /// Uncle already included by this block or one of its ancestors.
    #[error("duplicate uncle {0}")]
    DuplicateUncle(B256),

    /// Uncle is itself an ancestor of the block.
    #[error("uncle {0} is ancestor")]
    UncleIsAncestor(B256),

    /// Uncle parent outside the ancestry window or equal to the block parent.
    #[error("uncle {0}'s parent is not ancestor")]
    DanglingUncle(B256),

    /// Header does not match the hash pinned for its height.
    #[error("canonical hash mismatch at block {number}: have {have}, want {want}")]
    ForkHashMismatch { number: u64, have: B256, want: B256 },

    /// Header carries a field this engine does not support.
    #[error("unsupported header field: {0}")]
    UnsupportedHeaderField(&'static str),

    /// Header inside the DAO window without the pro-fork extra-data.
    #[error("bad DAO pro-fork extra-data")]
    BadDaoExtra,

    /// Chain configuration names an engine that is not implemented here.
    #[error("unsupported consensus engine: {0}")]
    UnsupportedEngine(String),

    /// Chain configuration cannot be evaluated.
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

/// Result type for consensus operations.
pub type ConsensusResult<T> = Result<T, ConsensusError>;

/// A configuration change that would rewrite already-finalized history.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("mismatching {what} in database (have {stored:?}, want {new:?}, rewind to {rewind_to})")]
pub struct ConfigMismatch {
    /// Name of the conflicting setting.
    pub what: String,
    /// Activation recorded in the stored configuration.
    pub stored: Option<u64>,
    /// Activation in the new configuration.
    pub new: Option<u64>,
    /// Height the local chain must be rewound to before the new config applies.
    pub rewind_to: u64,
}
