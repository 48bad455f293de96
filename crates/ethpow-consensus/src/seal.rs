//! Proof-of-work seal verification.
//!
//! A seal is valid when the primitive reproduces the header's mix digest
//! and its result does not exceed `2^256 / difficulty`. The target is
//! compared in 512-bit arithmetic so that difficulty 1 admits every result.

use crate::config::{EngineConfig, PowMode};
use crate::epoch_cache::{EpochArena, EpochKey};
use crate::error::{ConsensusError, ConsensusResult};
use crate::hasher::{Dataset, EpochContext, Hasher};
use crate::header::Header;
use alloy_primitives::{B256, U256, U512};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Widen a 256-bit value without loss.
fn widen(value: U256) -> U512 {
    let [a, b, c, d] = value.into_limbs();
    U512::from_limbs([a, b, c, d, 0, 0, 0, 0])
}

/// Check `result <= 2^256 / difficulty`.
///
/// Zero difficulty is rejected with `InvalidDifficulty`.
pub fn check_target(result: B256, difficulty: U256) -> ConsensusResult<()> {
    if difficulty.is_zero() {
        return Err(ConsensusError::InvalidDifficulty {
            got: difficulty,
            expected: None,
        });
    }
    let target = (U512::from(1u64) << 256) / widen(difficulty);
    let value = widen(U256::from_be_bytes(result.0));
    if value > target {
        return Err(ConsensusError::InvalidPoW);
    }
    Ok(())
}

/// Seal verifier for one primitive, owning the primitive's epoch caches.
pub struct SealVerifier<H: Hasher> {
    hasher: H,
    arena: Option<EpochArena>,
    mode: PowMode,
    fake_delay: Duration,
}

impl<H: Hasher> SealVerifier<H> {
    pub fn new(hasher: H, config: &EngineConfig) -> Self {
        let arena = hasher
            .cache_primitive()
            .filter(|_| hasher.needs_cache())
            .map(|primitive| EpochArena::new(primitive, config));
        Self {
            hasher,
            arena,
            mode: config.pow_mode,
            fake_delay: config.fake_delay(),
        }
    }

    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    pub fn mode(&self) -> PowMode {
        self.mode
    }

    fn epoch_key(&self, height: u64) -> EpochKey {
        EpochKey::for_height(height, self.hasher.epoch_length(height))
    }

    /// Inputs for hashing a header at `height`. With `fulldag` a generated
    /// dataset is used when one exists; the light cache is always loaded.
    pub fn epoch_context(&self, height: u64, fulldag: bool) -> EpochContext {
        let mut ctx = EpochContext::new(height);
        if let Some(arena) = &self.arena {
            let key = self.epoch_key(height);
            ctx.cache = Some(arena.get(key, self.hasher.ecip1099_block()));
            if fulldag {
                ctx.dataset = arena.dataset(key);
            }
        }
        ctx
    }

    /// Run the primitive over a header's seal fields.
    pub fn compute(&self, header: &Header, fulldag: bool) -> (B256, B256) {
        let ctx = self.epoch_context(header.number, fulldag);
        self.hasher
            .compute(header.seal_hash(), header.nonce_u64(), &ctx)
    }

    /// Expand the full dataset for the epoch containing `height`.
    ///
    /// Returns `None` for primitives without a cache.
    pub fn generate_dataset(&self, height: u64) -> Option<Arc<Dataset>> {
        let arena = self.arena.as_ref()?;
        let key = self.epoch_key(height);
        debug!(epoch = key.epoch, "Generating ethash dataset");
        Some(arena.generate_dataset(key, self.hasher.ecip1099_block()))
    }

    /// Verify the seal of `header`.
    pub fn verify(&self, header: &Header, fulldag: bool) -> ConsensusResult<()> {
        if self.mode.is_fake() {
            return self.fake_verdict(header);
        }

        if header.difficulty.is_zero() {
            return Err(ConsensusError::InvalidDifficulty {
                got: header.difficulty,
                expected: None,
            });
        }

        let (mix, result) = self.compute(header, fulldag);
        if self.hasher.has_mix_digest() && mix != header.mix_digest {
            return Err(ConsensusError::InvalidMixDigest {
                have: header.mix_digest,
                want: mix,
            });
        }
        check_target(result, header.difficulty)?;

        trace!(number = header.number, %result, "Seal verified");
        Ok(())
    }

    /// Outcome of a fake mode, after its simulated hashing delay.
    fn fake_verdict(&self, header: &Header) -> ConsensusResult<()> {
        match self.mode {
            PowMode::Fake => self.sleep(self.fake_delay),
            PowMode::FakeFail(number) => {
                self.sleep(self.fake_delay);
                if header.number == number {
                    return Err(ConsensusError::InvalidPoW);
                }
            }
            PowMode::PoissonFake => self.sleep(poisson_delay(self.fake_delay)),
            PowMode::FullFake | PowMode::Normal | PowMode::Test => {}
        }
        Ok(())
    }

    fn sleep(&self, delay: Duration) {
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

/// Exponentially distributed delay with the given mean.
fn poisson_delay(mean: Duration) -> Duration {
    if mean.is_zero() {
        return Duration::ZERO;
    }
    let u: f64 = rand::thread_rng().gen();
    mean.mul_f64(-(1.0 - u).ln())
}
