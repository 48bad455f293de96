//! Block and uncle rewards.
//!
//! Three policies, picked by chain:
//! - Standard: `R` to the miner plus `R/32` per uncle, `R * (8 - depth) / 8`
//!   to each uncle
//! - ECIP-1017: the winner reward shrinks by 4/5 every era; from the second
//!   era on every uncle earns a flat `wr/32`
//! - Lyra2: the reward shrinks by 249/250 every 100,000 blocks and uncles
//!   earn `wr/32`, with no nephew bonus
//!
//! Rewards never fail: every amount is computed in saturating arithmetic.

use crate::chain_config::{ChainRules, EngineKind, Fork};
use crate::engine::StateMutator;
use crate::header::Header;
use crate::params::{FRONTIER_BLOCK_REWARD, LYRA2_ERA_LENGTH, LYRA2_MAX_BLOCK_REWARD};
use alloy_primitives::U256;
use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use tracing::trace;

/// Lyra2 eras skipped at launch.
const LYRA2_ERA_OFFSET: u64 = 72;

/// Lyra2 disinflation steps already applied before the first era.
const LYRA2_EXPONENT_OFFSET: u64 = 865;

/// Beyond these exponents the reduced reward is below one wei.
const ECIP1017_ZERO_AFTER: u64 = 200;
const LYRA2_ZERO_AFTER: u64 = 11_400;

/// Lyra2 rewards by era. The exact computation walks numbers of ~90k bits.
static LYRA2_REWARDS: Lazy<Mutex<LruCache<u64, U256>>> = Lazy::new(|| {
    Mutex::new(LruCache::new(
        NonZeroUsize::new(16).unwrap_or(NonZeroUsize::MIN),
    ))
});

/// Amounts credited for one block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockRewards {
    /// Credit to the block's coinbase, nephew bonuses included.
    pub miner: U256,
    /// Credit to each uncle's coinbase, in uncle order.
    pub uncles: Vec<U256>,
}

impl BlockRewards {
    /// Sum of all credits.
    pub fn total(&self) -> U256 {
        self.uncles
            .iter()
            .fold(self.miner, |acc, r| acc.saturating_add(*r))
    }
}

/// Zero-based era of `height` for eras of `era_length` blocks.
/// Block 0 and the first `era_length` blocks are era 0.
fn block_era(height: u64, era_length: u64) -> u64 {
    if height == 0 || era_length == 0 {
        return 0;
    }
    (height - 1) / era_length
}

/// ECIP-1017 era of `height`.
pub fn ecip1017_era(height: u64, era_rounds: u64) -> u64 {
    block_era(height, era_rounds)
}

/// Lyra2 reward era of `height`.
pub fn lyra2_era(height: u64) -> u64 {
    block_era(height, LYRA2_ERA_LENGTH) + LYRA2_ERA_OFFSET
}

/// ECIP-1017 winner reward in `era`: `base * 4^era / 5^era`.
pub fn ecip1017_winner_reward(era: u64, base: U256) -> U256 {
    if era == 0 {
        return base;
    }
    if era > ECIP1017_ZERO_AFTER {
        return U256::ZERO;
    }
    scale_by_power(base, 4, 5, era)
}

/// Lyra2 winner reward in `era`.
pub fn lyra2_winner_reward(era: u64) -> U256 {
    if era == 0 {
        return LYRA2_MAX_BLOCK_REWARD;
    }
    if let Some(reward) = LYRA2_REWARDS.lock().get(&era) {
        return *reward;
    }
    let exponent = era.saturating_add(LYRA2_EXPONENT_OFFSET);
    let reward = if exponent > LYRA2_ZERO_AFTER {
        U256::ZERO
    } else {
        scale_by_power(LYRA2_MAX_BLOCK_REWARD, 249, 250, exponent)
    };
    LYRA2_REWARDS.lock().put(era, reward);
    reward
}

/// `floor(base * num^exp / den^exp)`, exact.
///
/// The numerator is built in a growable limb vector, then divided by `den`
/// `exp` times; nested floor divisions equal one floor division by the
/// product.
fn scale_by_power(base: U256, num: u64, den: u64, exp: u64) -> U256 {
    let mut limbs: Vec<u64> = base.as_limbs().to_vec();
    for _ in 0..exp {
        let mut carry = 0u128;
        for limb in limbs.iter_mut() {
            let v = u128::from(*limb) * u128::from(num) + carry;
            *limb = v as u64;
            carry = v >> 64;
        }
        if carry > 0 {
            limbs.push(carry as u64);
        }
    }
    for _ in 0..exp {
        let mut rem = 0u128;
        for limb in limbs.iter_mut().rev() {
            let v = (rem << 64) | u128::from(*limb);
            *limb = (v / u128::from(den)) as u64;
            rem = v % u128::from(den);
        }
        while limbs.len() > 4 && limbs.last() == Some(&0) {
            limbs.pop();
        }
    }
    let mut out = [0u64; 4];
    for (dst, src) in out.iter_mut().zip(&limbs) {
        *dst = *src;
    }
    U256::from_limbs(out)
}

/// `(uncle + 8 - height) * reward / 8`.
fn depth_reward(height: u64, uncle: &Header, reward: U256) -> U256 {
    let factor = (uncle.number + 8).saturating_sub(height);
    reward.saturating_mul(U256::from(factor)) / U256::from(8u64)
}

/// Rewards for `header` with `uncles`. Pure.
pub fn block_rewards(config: &dyn ChainRules, header: &Header, uncles: &[Header]) -> BlockRewards {
    let height = header.number;

    if config.engine() == EngineKind::Lyra2 {
        let miner = lyra2_winner_reward(lyra2_era(height));
        let each = miner / U256::from(32u64);
        return BlockRewards {
            miner,
            uncles: vec![each; uncles.len()],
        };
    }

    if config.is_enabled(Fork::Ecip1017, height) {
        let era = ecip1017_era(height, config.ecip1017_era_rounds().unwrap_or(0));
        let winner = ecip1017_winner_reward(era, FRONTIER_BLOCK_REWARD);
        let bonus = winner / U256::from(32u64);
        let miner = uncles
            .iter()
            .fold(winner, |acc, _| acc.saturating_add(bonus));
        let uncle_rewards = uncles
            .iter()
            .map(|uncle| {
                if era == 0 {
                    depth_reward(height, uncle, FRONTIER_BLOCK_REWARD)
                } else {
                    bonus
                }
            })
            .collect();
        return BlockRewards {
            miner,
            uncles: uncle_rewards,
        };
    }

    let reward = config.block_reward(height);
    let bonus = reward / U256::from(32u64);
    let miner = uncles
        .iter()
        .fold(reward, |acc, _| acc.saturating_add(bonus));
    BlockRewards {
        miner,
        uncles: uncles
            .iter()
            .map(|uncle| depth_reward(height, uncle, reward))
            .collect(),
    }
}

/// Credit the rewards of `header`: each uncle in order, then the miner.
pub fn accumulate_rewards(
    config: &dyn ChainRules,
    state: &mut dyn StateMutator,
    header: &Header,
    uncles: &[Header],
) {
    let rewards = block_rewards(config, header, uncles);
    for (uncle, amount) in uncles.iter().zip(&rewards.uncles) {
        state.add_balance(uncle.coinbase, *amount);
    }
    state.add_balance(header.coinbase, rewards.miner);
    trace!(number = header.number, miner = %rewards.miner, uncles = uncles.len(), "Credited block rewards");
}
