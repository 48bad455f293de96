//! Header verification against a known parent.

use crate::chain_config::{ChainRules, EngineKind, Fork};
use crate::difficulty::{calc_difficulty, DifficultyRules};
use crate::eip1559::{verify_eip1559_header, verify_gas_limit};
use crate::error::{ConsensusError, ConsensusResult};
use crate::hasher::Hasher;
use crate::header::Header;
use crate::params;
use crate::seal::SealVerifier;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

/// Seconds since the Unix epoch, as seen by the local clock.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// How far ahead of the local clock a header timestamp may be.
pub(crate) fn allowed_future_time(kind: EngineKind) -> u64 {
    match kind {
        EngineKind::EthashB3 => params::ETHASH_B3_ALLOWED_FUTURE_BLOCK_TIME,
        _ => params::ALLOWED_FUTURE_BLOCK_TIME,
    }
}

/// Borrowed view of everything a header check needs.
pub(crate) struct HeaderVerifier<'a, H: Hasher> {
    pub config: &'a dyn ChainRules,
    pub difficulty: &'a DifficultyRules,
    pub seal: &'a SealVerifier<H>,
}

impl<H: Hasher> HeaderVerifier<'_, H> {
    /// Check `header` as a child of `parent`. Rules run in a fixed order and
    /// the first failure is returned.
    #[instrument(skip(self, header, parent), fields(number = header.number))]
    pub fn verify_header_with(
        &self,
        header: &Header,
        parent: &Header,
        uncle: bool,
        seal: bool,
        now: u64,
    ) -> ConsensusResult<()> {
        // 1. Extra-data size
        let max_extra = self.config.max_extra_data_size(header.number);
        if header.extra_data.len() as u64 > max_extra {
            return Err(ConsensusError::ExtraDataTooLong {
                len: header.extra_data.len(),
                max: max_extra,
            });
        }

        // 2. Not too far in the future (uncles may be old, never future-checked)
        if !uncle {
            let max_time = now.saturating_add(allowed_future_time(self.config.engine()));
            if header.time > max_time {
                return Err(ConsensusError::FutureBlock {
                    time: header.time,
                    max_time,
                });
            }
        }

        // 3. Strictly after the parent
        if header.time <= parent.time {
            return Err(ConsensusError::OlderBlockTime {
                block_time: header.time,
                parent_time: parent.time,
            });
        }

        // 4. Difficulty follows from the parent and timestamp
        let expected = calc_difficulty(self.difficulty, self.config, header.time, parent);
        if expected != header.difficulty {
            return Err(ConsensusError::InvalidDifficulty {
                got: header.difficulty,
                expected: Some(expected),
            });
        }

        // 5. Gas limit cap
        if header.gas_limit > params::MAX_GAS_LIMIT {
            return Err(ConsensusError::GasLimitInvalid {
                have: header.gas_limit,
                reason: format!("exceeds cap {}", params::MAX_GAS_LIMIT),
            });
        }

        // 6. Gas used within the limit
        if header.gas_used > header.gas_limit {
            return Err(ConsensusError::GasUsedExceedsLimit {
                gas_used: header.gas_used,
                gas_limit: header.gas_limit,
            });
        }

        // 7. Gas limit drift and base fee
        if self.config.is_enabled(Fork::Eip1559, header.number) {
            verify_eip1559_header(self.config, parent, header)?;
        } else {
            if let Some(base_fee) = header.base_fee {
                return Err(ConsensusError::BaseFeeViolation(format!(
                    "base fee {} before the fork",
                    base_fee
                )));
            }
            verify_gas_limit(parent.gas_limit, header.gas_limit)?;
        }

        // 8. Consecutive number
        if header.number != parent.number + 1 {
            return Err(ConsensusError::InvalidNumber {
                number: header.number,
                parent_number: parent.number,
            });
        }

        // 9. No post-merge fields on a proof-of-work chain
        if let Some(field) = header.post_merge_field() {
            return Err(ConsensusError::UnsupportedHeaderField(field));
        }

        // 10. Seal
        if seal {
            self.seal.verify(header, false)?;
        }

        // 11. DAO extra-data window
        if let Some(dao) = self.config.activation(Fork::Eip779) {
            let in_window = header.number >= dao
                && header.number < dao.saturating_add(params::DAO_FORK_EXTRA_RANGE);
            if in_window && header.extra_data.as_ref() != params::DAO_FORK_EXTRA {
                return Err(ConsensusError::BadDaoExtra);
            }
        }

        // 12. Pinned canonical hash
        if !uncle {
            if let Some(want) = self.config.fork_canonical_hash(header.number) {
                let have = header.hash();
                if have != want {
                    return Err(ConsensusError::ForkHashMismatch {
                        number: header.number,
                        have,
                        want,
                    });
                }
            }
        }

        debug!(uncle, seal, "Header verified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_config::ChainConfig;
    use crate::config::EngineConfig;
    use crate::hasher::Keccak;
    use alloy_primitives::{Bytes, B256, U256};

    struct Fixture {
        config: ChainConfig,
        difficulty: DifficultyRules,
        seal: SealVerifier<Keccak>,
    }

    impl Fixture {
        fn new(config: ChainConfig) -> Self {
            Self {
                difficulty: DifficultyRules::for_chain(&config),
                config,
                seal: SealVerifier::new(Keccak, &EngineConfig::fake()),
            }
        }

        fn verifier(&self) -> HeaderVerifier<'_, Keccak> {
            HeaderVerifier {
                config: &self.config,
                difficulty: &self.difficulty,
                seal: &self.seal,
            }
        }

        fn child(&self, parent: &Header, dt: u64) -> Header {
            let time = parent.time + dt;
            Header {
                parent_hash: parent.hash(),
                number: parent.number + 1,
                time,
                gas_limit: parent.gas_limit,
                difficulty: calc_difficulty(&self.difficulty, &self.config, time, parent),
                ..Default::default()
            }
        }

        fn check(&self, header: &Header, parent: &Header) -> ConsensusResult<()> {
            self.verifier()
                .verify_header_with(header, parent, false, true, 1_000_000)
        }
    }

    fn genesis() -> Header {
        Header {
            number: 0,
            time: 1000,
            gas_limit: 8_000_000,
            difficulty: U256::from(131_072u64),
            ..Default::default()
        }
    }

    fn developer() -> Fixture {
        Fixture::new(ChainConfig::developer(EngineKind::Keccak))
    }

    #[test]
    fn test_valid_child() {
        let fx = developer();
        let parent = genesis();
        let header = fx.child(&parent, 10);
        assert!(fx.check(&header, &parent).is_ok());
    }

    #[test]
    fn test_extra_data_too_long() {
        let fx = developer();
        let parent = genesis();
        let mut header = fx.child(&parent, 10);
        header.extra_data = Bytes::from(vec![0u8; 33]);
        assert_eq!(
            fx.check(&header, &parent),
            Err(ConsensusError::ExtraDataTooLong { len: 33, max: 32 })
        );
    }

    #[test]
    fn test_future_block_and_uncle_exemption() {
        let fx = developer();
        let parent = genesis();
        let header = fx.child(&parent, 10);
        let now = header.time - 16;
        assert_eq!(
            fx.verifier()
                .verify_header_with(&header, &parent, false, false, now),
            Err(ConsensusError::FutureBlock {
                time: header.time,
                max_time: now + 15,
            })
        );
        assert!(fx
            .verifier()
            .verify_header_with(&header, &parent, true, false, now)
            .is_ok());
        // Exactly at the allowance is fine.
        assert!(fx
            .verifier()
            .verify_header_with(&header, &parent, false, false, header.time - 15)
            .is_ok());
    }

    #[test]
    fn test_ethash_b3_future_allowance() {
        let fx = Fixture::new(ChainConfig::developer(EngineKind::EthashB3));
        let parent = Header {
            difficulty: U256::from(2_000_000u64),
            ..genesis()
        };
        let header = fx.child(&parent, 10);
        assert!(matches!(
            fx.verifier()
                .verify_header_with(&header, &parent, false, false, header.time - 8),
            Err(ConsensusError::FutureBlock { .. })
        ));
    }

    #[test]
    fn test_older_time() {
        let fx = developer();
        let parent = genesis();
        let mut header = fx.child(&parent, 10);
        header.time = parent.time;
        assert!(matches!(
            fx.check(&header, &parent),
            Err(ConsensusError::OlderBlockTime { .. })
        ));
    }

    #[test]
    fn test_wrong_difficulty() {
        let fx = developer();
        let parent = genesis();
        let mut header = fx.child(&parent, 10);
        let expected = header.difficulty;
        header.difficulty += U256::from(1u64);
        assert_eq!(
            fx.check(&header, &parent),
            Err(ConsensusError::InvalidDifficulty {
                got: expected + U256::from(1u64),
                expected: Some(expected),
            })
        );
    }

    #[test]
    fn test_gas_rules() {
        let fx = developer();
        let parent = genesis();

        let mut header = fx.child(&parent, 10);
        header.gas_limit = params::MAX_GAS_LIMIT + 1;
        assert!(matches!(
            fx.check(&header, &parent),
            Err(ConsensusError::GasLimitInvalid { .. })
        ));

        let mut header = fx.child(&parent, 10);
        header.gas_used = header.gas_limit + 1;
        assert!(matches!(
            fx.check(&header, &parent),
            Err(ConsensusError::GasUsedExceedsLimit { .. })
        ));

        let mut header = fx.child(&parent, 10);
        header.gas_limit = parent.gas_limit + parent.gas_limit / 1024;
        assert!(matches!(
            fx.check(&header, &parent),
            Err(ConsensusError::GasLimitInvalid { .. })
        ));
    }

    #[test]
    fn test_base_fee_before_fork() {
        let fx = developer();
        let parent = genesis();
        let mut header = fx.child(&parent, 10);
        header.base_fee = Some(U256::from(7u64));
        assert!(matches!(
            fx.check(&header, &parent),
            Err(ConsensusError::BaseFeeViolation(_))
        ));
    }

    #[test]
    fn test_london_fork_block() {
        let fx = Fixture::new(
            ChainConfig::developer(EngineKind::Keccak).with_fork(Fork::Eip1559, 1),
        );
        let parent = genesis();
        let mut header = fx.child(&parent, 10);
        header.gas_limit = parent.gas_limit * 2;
        assert!(matches!(
            fx.check(&header, &parent),
            Err(ConsensusError::BaseFeeViolation(_))
        ));
        header.base_fee = Some(U256::from(params::INITIAL_BASE_FEE));
        assert!(fx.check(&header, &parent).is_ok());
    }

    #[test]
    fn test_wrong_number() {
        let fx = developer();
        let parent = genesis();
        let mut header = fx.child(&parent, 10);
        header.number = 2;
        assert_eq!(
            fx.check(&header, &parent),
            Err(ConsensusError::InvalidNumber {
                number: 2,
                parent_number: 0,
            })
        );
    }

    #[test]
    fn test_post_merge_field_rejected() {
        let fx = developer();
        let parent = genesis();
        let mut header = fx.child(&parent, 10);
        header.withdrawals_root = Some(B256::ZERO);
        assert!(matches!(
            fx.check(&header, &parent),
            Err(ConsensusError::UnsupportedHeaderField(_))
        ));
    }

    #[test]
    fn test_dao_extra_window() {
        let fx = Fixture::new(
            ChainConfig::developer(EngineKind::Keccak).with_fork(Fork::Eip779, 1),
        );
        let mut parent = genesis();
        for number in 1..=11 {
            let mut header = fx.child(&parent, 10);
            let result = fx.check(&header, &parent);
            if number <= 10 {
                assert_eq!(result, Err(ConsensusError::BadDaoExtra), "block {number}");
                header.extra_data = Bytes::from_static(params::DAO_FORK_EXTRA);
                assert!(fx.check(&header, &parent).is_ok(), "block {number}");
            } else {
                assert!(result.is_ok(), "block {number} is past the window");
            }
            parent = header;
        }
    }

    #[test]
    fn test_canonical_hash_mismatch() {
        let mut config = ChainConfig::developer(EngineKind::Keccak);
        config.require_block_hashes.insert(1, B256::repeat_byte(0xab));
        let fx = Fixture::new(config);
        let parent = genesis();
        let header = fx.child(&parent, 10);
        assert!(matches!(
            fx.check(&header, &parent),
            Err(ConsensusError::ForkHashMismatch { number: 1, .. })
        ));
        // Uncles are exempt.
        assert!(fx
            .verifier()
            .verify_header_with(&header, &parent, true, true, 1_000_000)
            .is_ok());
    }

    #[test]
    fn test_seal_checked_when_requested() {
        let mut fx = developer();
        fx.seal = SealVerifier::new(Keccak, &EngineConfig::fake_fail(1));
        let parent = genesis();
        let header = fx.child(&parent, 10);
        assert_eq!(fx.check(&header, &parent), Err(ConsensusError::InvalidPoW));
        assert!(fx
            .verifier()
            .verify_header_with(&header, &parent, false, false, 1_000_000)
            .is_ok());
    }
}
