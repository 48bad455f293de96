//! EIP-1559 gas limit and base fee rules.

use crate::chain_config::{ChainRules, Fork};
use crate::error::{ConsensusError, ConsensusResult};
use crate::header::Header;
use crate::params::{
    BASE_FEE_CHANGE_DENOMINATOR, ELASTICITY_MULTIPLIER, GAS_LIMIT_BOUND_DIVISOR, INITIAL_BASE_FEE,
    MIN_GAS_LIMIT,
};
use alloy_primitives::U256;

/// Check that `gas_limit` moved less than 1/1024 away from the parent's
/// limit and stays above the minimum.
pub(crate) fn verify_gas_limit(parent_gas_limit: u64, gas_limit: u64) -> ConsensusResult<()> {
    let diff = parent_gas_limit.abs_diff(gas_limit);
    let limit = parent_gas_limit / GAS_LIMIT_BOUND_DIVISOR;
    if diff >= limit {
        return Err(ConsensusError::GasLimitInvalid {
            have: gas_limit,
            reason: format!(
                "drift {} from parent {} reaches bound {}",
                diff, parent_gas_limit, limit
            ),
        });
    }
    if gas_limit < MIN_GAS_LIMIT {
        return Err(ConsensusError::GasLimitInvalid {
            have: gas_limit,
            reason: format!("below minimum {}", MIN_GAS_LIMIT),
        });
    }
    Ok(())
}

/// Verify the gas limit and base fee of a header at or after the London fork.
pub fn verify_eip1559_header(
    config: &dyn ChainRules,
    parent: &Header,
    header: &Header,
) -> ConsensusResult<()> {
    let mut parent_gas_limit = parent.gas_limit;
    if !config.is_enabled(Fork::Eip1559, parent.number) {
        parent_gas_limit = parent_gas_limit.saturating_mul(ELASTICITY_MULTIPLIER);
    }
    verify_gas_limit(parent_gas_limit, header.gas_limit)?;

    let have = header
        .base_fee
        .ok_or_else(|| ConsensusError::BaseFeeViolation("header is missing base fee".into()))?;
    let want = calc_base_fee(config, parent);
    if have != want {
        return Err(ConsensusError::BaseFeeViolation(format!(
            "invalid base fee: have {}, want {}, parent base fee {:?}, parent gas used {}",
            have, want, parent.base_fee, parent.gas_used
        )));
    }
    Ok(())
}

/// Base fee of the child of `parent`.
pub fn calc_base_fee(config: &dyn ChainRules, parent: &Header) -> U256 {
    // The fork block itself starts from the initial fee.
    if !config.is_enabled(Fork::Eip1559, parent.number) {
        return U256::from(INITIAL_BASE_FEE);
    }

    let parent_base_fee = parent.base_fee.unwrap_or_default();
    let target = parent.gas_limit / ELASTICITY_MULTIPLIER;
    if target == 0 || parent.gas_used == target {
        return parent_base_fee;
    }

    let target_u = U256::from(target);
    let denominator = U256::from(BASE_FEE_CHANGE_DENOMINATOR);
    if parent.gas_used > target {
        let delta = U256::from(parent.gas_used - target);
        let change = (parent_base_fee.saturating_mul(delta) / target_u / denominator)
            .max(U256::from(1u64));
        parent_base_fee.saturating_add(change)
    } else {
        let delta = U256::from(target - parent.gas_used);
        let change = parent_base_fee.saturating_mul(delta) / target_u / denominator;
        parent_base_fee.saturating_sub(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_config::{ChainConfig, EngineKind};

    fn london() -> ChainConfig {
        ChainConfig::new(1, EngineKind::Ethash).with_fork(Fork::Eip1559, 5)
    }

    fn parent(gas_limit: u64, gas_used: u64, base_fee: u64) -> Header {
        Header {
            number: 32,
            gas_limit,
            gas_used,
            base_fee: Some(U256::from(base_fee)),
            ..Default::default()
        }
    }

    #[test]
    fn test_calc_base_fee_vectors() {
        let config = london();
        let cases = [
            (20_000_000, 10_000_000, 1_000_000_000u64),
            (20_000_000, 9_000_000, 987_500_000),
            (20_000_000, 11_000_000, 1_012_500_000),
        ];
        for (gas_limit, gas_used, expected) in cases {
            let p = parent(gas_limit, gas_used, INITIAL_BASE_FEE);
            assert_eq!(
                calc_base_fee(&config, &p),
                U256::from(expected),
                "gas used {gas_used}"
            );
        }
    }

    #[test]
    fn test_fork_block_uses_initial_fee() {
        let config = london();
        let mut p = parent(10_000_000, 10_000_000, 0);
        p.number = 4;
        p.base_fee = None;
        assert_eq!(calc_base_fee(&config, &p), U256::from(INITIAL_BASE_FEE));
    }

    #[test]
    fn test_increase_is_at_least_one() {
        let config = london();
        let p = parent(20_000_000, 10_000_001, 1);
        assert_eq!(calc_base_fee(&config, &p), U256::from(2u64));
    }

    #[test]
    fn test_gas_limit_doubles_at_fork() {
        let config = london();
        let mut p = parent(10_000_000, 0, 0);
        p.number = 4;
        p.base_fee = None;
        let header = Header {
            number: 5,
            gas_limit: 20_000_000,
            base_fee: Some(U256::from(INITIAL_BASE_FEE)),
            ..Default::default()
        };
        assert!(verify_eip1559_header(&config, &p, &header).is_ok());
    }

    #[test]
    fn test_missing_and_wrong_base_fee() {
        let config = london();
        let p = parent(20_000_000, 10_000_000, INITIAL_BASE_FEE);
        let mut header = Header {
            number: 33,
            gas_limit: 20_000_000,
            ..Default::default()
        };
        assert!(matches!(
            verify_eip1559_header(&config, &p, &header),
            Err(ConsensusError::BaseFeeViolation(_))
        ));
        header.base_fee = Some(U256::from(INITIAL_BASE_FEE + 1));
        assert!(matches!(
            verify_eip1559_header(&config, &p, &header),
            Err(ConsensusError::BaseFeeViolation(_))
        ));
    }

    #[test]
    fn test_gas_limit_bounds() {
        assert!(verify_gas_limit(1_024_000, 1_024_999).is_ok());
        assert!(verify_gas_limit(1_024_000, 1_025_000).is_err(), "drift equal to bound");
        assert!(verify_gas_limit(1_024_000, 1_023_001).is_ok());
        assert!(verify_gas_limit(5_000, 4_999).is_err(), "below minimum");
    }
}
