//! Difficulty adjustment.
//!
//! The next difficulty is the parent difficulty nudged by a time-dependent
//! step, clamped to a floor, plus the exponential difficulty bomb. Which
//! step rule applies is decided by the fork schedule at the next height;
//! the constants of each rule depend on the engine.

use crate::chain_config::{ChainRules, EngineKind, Fork};
use crate::header::Header;
use crate::params::{
    EIP1234_BOMB_DELAY, EIP2384_BOMB_DELAY, EIP3554_BOMB_DELAY, EIP4345_BOMB_DELAY,
    EIP5133_BOMB_DELAY, EIP649_BOMB_DELAY, EXP_DIFF_PERIOD,
};
use alloy_primitives::U256;
use tracing::trace;

/// Forks that delay the bomb, highest delay first.
const BOMB_DELAY_FORKS: [(Fork, u64); 6] = [
    (Fork::Eip5133, EIP5133_BOMB_DELAY),
    (Fork::Eip4345, EIP4345_BOMB_DELAY),
    (Fork::Eip3554, EIP3554_BOMB_DELAY),
    (Fork::Eip2384, EIP2384_BOMB_DELAY),
    (Fork::Eip1234, EIP1234_BOMB_DELAY),
    (Fork::Eip649, EIP649_BOMB_DELAY),
];

/// Engine-specific difficulty constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DifficultyRules {
    /// Seconds per unit of adjustment under EIP-100B.
    pub eip100b_step: u64,
    /// Seconds per unit of adjustment under Homestead.
    pub homestead_step: u64,
    /// Frontier threshold below which difficulty rises.
    pub duration_limit: u64,
    /// Lower bound of the adjustment factor.
    pub floor: i64,
    pub bound_divisor: U256,
    /// Clamp for the Frontier and Homestead rules.
    pub minimum: U256,
    /// Clamp for the EIP-100B rule.
    pub eip100b_minimum: U256,
    pub has_bomb: bool,
    /// Use the EIP-100B rule at every height, regardless of the schedule.
    pub always_eip100b: bool,
}

impl DifficultyRules {
    /// Stock constants for an engine.
    pub fn for_engine(kind: EngineKind) -> Self {
        let ethash = Self {
            eip100b_step: 9,
            homestead_step: 10,
            duration_limit: 13,
            floor: -99,
            bound_divisor: U256::from(2048u64),
            minimum: U256::from(131_072u64),
            eip100b_minimum: U256::from(131_072u64),
            has_bomb: true,
            always_eip100b: false,
        };
        match kind {
            EngineKind::Ethash | EngineKind::Keccak | EngineKind::Clique => ethash,
            EngineKind::EthashB3 => Self {
                eip100b_step: 6,
                homestead_step: 5,
                duration_limit: 7,
                eip100b_minimum: U256::from(1_002_317u64),
                has_bomb: false,
                ..ethash
            },
            EngineKind::Lyra2 => Self {
                floor: -20,
                bound_divisor: U256::from(200u64),
                minimum: U256::from(10_000u64),
                eip100b_minimum: U256::from(10_000u64),
                has_bomb: false,
                always_eip100b: true,
                ..ethash
            },
        }
    }

    /// Constants for a chain: the engine's stock values with the chain's
    /// overrides applied.
    pub fn for_chain(rules: &dyn ChainRules) -> Self {
        let mut out = Self::for_engine(rules.engine());
        if let Some(minimum) = rules.minimum_difficulty() {
            out.minimum = minimum;
            out.eip100b_minimum = minimum;
        }
        if let Some(divisor) = rules.difficulty_bound_divisor() {
            out.bound_divisor = divisor;
        }
        if let Some(limit) = rules.duration_limit() {
            out.duration_limit = limit;
        }
        out
    }
}

/// Difficulty a child of `parent` with timestamp `time` must carry.
///
/// A `time` at or before the parent's counts as zero elapsed seconds; the
/// header verifier rejects such headers before asking.
pub fn calc_difficulty(
    rules: &DifficultyRules,
    config: &dyn ChainRules,
    time: u64,
    parent: &Header,
) -> U256 {
    let next = parent.number + 1;
    let elapsed = time.saturating_sub(parent.time);
    let parent_diff = parent.difficulty;
    let quotient = parent_diff / rules.bound_divisor;

    let (adjusted, minimum) = if rules.always_eip100b || config.is_enabled(Fork::Eip100B, next) {
        let base: i64 = if parent.has_uncles() { 2 } else { 1 };
        let x = factor(base, elapsed / rules.eip100b_step, rules.floor);
        (apply(parent_diff, quotient, x), rules.eip100b_minimum)
    } else if config.is_enabled(Fork::Eip2, next) {
        let x = factor(1, elapsed / rules.homestead_step, rules.floor);
        (apply(parent_diff, quotient, x), rules.minimum)
    } else if elapsed < rules.duration_limit {
        (parent_diff.saturating_add(quotient), rules.minimum)
    } else {
        (parent_diff.saturating_sub(quotient), rules.minimum)
    };
    let clamped = adjusted.max(minimum);

    if !rules.has_bomb || config.is_enabled(Fork::Ecip1041, next) {
        return clamped;
    }

    let bomb = bomb(config, next, parent.number);
    trace!(height = next, elapsed, %clamped, %bomb, "calculated difficulty");
    clamped.saturating_add(bomb)
}

/// `max(base - periods, floor)`, saturating.
fn factor(base: i64, periods: u64, floor: i64) -> i64 {
    let periods = i64::try_from(periods).unwrap_or(i64::MAX);
    base.saturating_sub(periods).max(floor)
}

/// `parent + quotient * x`, with negative results saturating at zero.
fn apply(parent: U256, quotient: U256, x: i64) -> U256 {
    let step = quotient.saturating_mul(U256::from(x.unsigned_abs()));
    if x >= 0 {
        parent.saturating_add(step)
    } else {
        parent.saturating_sub(step)
    }
}

/// The exponential term for a block at `next`.
fn bomb(config: &dyn ChainRules, next: u64, parent_number: u64) -> U256 {
    let mut reference = next;

    if config.is_enabled(Fork::Ecip1010Pause, next) {
        let pause = config.activation(Fork::Ecip1010Pause).unwrap_or(next);
        let length = config.ecip1010_length().unwrap_or(0);
        if next < pause.saturating_add(length) {
            reference = pause;
        } else {
            reference -= length;
        }
    } else if config.has_bomb_delay_schedule() {
        let delay = config.difficulty_bomb_delay(reference).saturating_to::<u64>();
        reference = reference.saturating_sub(delay);
    } else if let Some(delay) = BOMB_DELAY_FORKS
        .iter()
        .find(|(fork, _)| config.is_enabled(*fork, next))
        .map(|(_, delay)| *delay)
    {
        reference = parent_number.saturating_sub(delay - 1);
    }

    let period = reference / EXP_DIFF_PERIOD;
    if period <= 1 {
        return U256::ZERO;
    }
    let exponent = period - 2;
    if exponent >= 256 {
        return U256::MAX;
    }
    U256::from(1u64) << (exponent as usize)
}
