//! The consensus engine façade.
//!
//! [`Engine`] ties a chain's fork schedule to one seal primitive and exposes
//! every verification entry point. [`AnyEngine`] picks the primitive from
//! the chain configuration at runtime.

use crate::batch::{self, BatchVerification, VerifyFn};
use crate::chain_config::{ChainRules, EngineKind};
use crate::config::{EngineConfig, PowMode};
use crate::difficulty::{calc_difficulty, DifficultyRules};
use crate::error::{ConsensusError, ConsensusResult};
use crate::hasher::{Dataset, Ethash, EthashB3, Hasher, Keccak, Lyra2};
use crate::header::{Block, Header};
use crate::rewards::{accumulate_rewards, block_rewards, BlockRewards};
use crate::seal::SealVerifier;
use crate::uncles::verify_uncles;
use crate::validation::{unix_now, HeaderVerifier};
use alloy_primitives::{Address, B256, U256};
use std::sync::Arc;
use tracing::{debug, info};

/// Header lookups by hash and number.
pub trait HeaderReader: Send + Sync {
    fn get_header(&self, hash: B256, number: u64) -> Option<Header>;
}

/// Full block lookups, needed to collect the uncles of ancestors.
pub trait ChainReader: HeaderReader {
    fn get_block(&self, hash: B256, number: u64) -> Option<Block>;
}

/// Balance credits applied at finalization.
pub trait StateMutator {
    fn add_balance(&mut self, address: Address, amount: U256);
}

struct Inner<H: Hasher> {
    config: Arc<dyn ChainRules>,
    difficulty: DifficultyRules,
    seal: SealVerifier<H>,
}

impl<H: Hasher> Inner<H> {
    fn verifier(&self) -> HeaderVerifier<'_, H> {
        HeaderVerifier {
            config: self.config.as_ref(),
            difficulty: &self.difficulty,
            seal: &self.seal,
        }
    }
}

/// Proof-of-work consensus engine over hash primitive `H`.
///
/// Cloning is cheap and clones share the epoch caches.
pub struct Engine<H: Hasher> {
    inner: Arc<Inner<H>>,
}

impl<H: Hasher> Clone for Engine<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: Hasher> Engine<H> {
    /// Build an engine with the primitive configured by `config`.
    pub fn new(config: Arc<dyn ChainRules>, engine_config: EngineConfig) -> ConsensusResult<Self> {
        let hasher = H::from_rules(config.as_ref());
        Self::with_hasher(config, hasher, engine_config)
    }

    /// Build an engine around an explicit primitive.
    ///
    /// Fails with `UnsupportedEngine` if the chain names a different engine.
    pub fn with_hasher(
        config: Arc<dyn ChainRules>,
        hasher: H,
        engine_config: EngineConfig,
    ) -> ConsensusResult<Self> {
        let kind = config.engine();
        if kind != hasher.kind() {
            return Err(ConsensusError::UnsupportedEngine(format!(
                "{} primitive cannot run a {} chain",
                hasher.kind(),
                kind
            )));
        }
        config.validate()?;
        info!(
            engine = %kind,
            chain_id = config.chain_id(),
            mode = ?engine_config.pow_mode,
            "Consensus engine initialized"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                difficulty: DifficultyRules::for_chain(config.as_ref()),
                seal: SealVerifier::new(hasher, &engine_config),
                config,
            }),
        })
    }

    pub fn config(&self) -> &dyn ChainRules {
        self.inner.config.as_ref()
    }

    pub fn hasher(&self) -> &H {
        self.inner.seal.hasher()
    }

    pub fn pow_mode(&self) -> PowMode {
        self.inner.seal.mode()
    }

    pub fn difficulty_rules(&self) -> &DifficultyRules {
        &self.inner.difficulty
    }

    /// The account credited for sealing `header`.
    pub fn author(&self, header: &Header) -> Address {
        header.coinbase
    }

    /// Verify a header whose parent is resolved through `reader`.
    pub fn verify_header(
        &self,
        reader: &dyn HeaderReader,
        header: &Header,
        seal: bool,
    ) -> ConsensusResult<()> {
        if self.pow_mode() == PowMode::FullFake {
            return Ok(());
        }
        if reader.get_header(header.hash(), header.number).is_some() {
            return Ok(());
        }
        let parent = header
            .number
            .checked_sub(1)
            .and_then(|number| reader.get_header(header.parent_hash, number))
            .ok_or(ConsensusError::UnknownAncestor)?;
        self.inner
            .verifier()
            .verify_header_with(header, &parent, false, seal, unix_now())
    }

    /// Verify a run of headers in parallel. Results arrive in input order.
    ///
    /// A header's parent is the header before it when the hashes link,
    /// otherwise it is looked up in `reader`. Missing entries in `seals`
    /// count as `false`.
    pub fn verify_headers(
        &self,
        reader: &dyn HeaderReader,
        headers: &[Header],
        seals: &[bool],
    ) -> BatchVerification {
        if self.pow_mode() == PowMode::FullFake || headers.is_empty() {
            return BatchVerification::accept_all(headers.len());
        }
        let external = batch::external_parents(headers, |hash, number| {
            reader.get_header(hash, number)
        });

        let now = unix_now();
        let inner = Arc::clone(&self.inner);
        let verify: VerifyFn = Arc::new(move |header: &Header, parent: &Header, seal: bool| {
            inner
                .verifier()
                .verify_header_with(header, parent, false, seal, now)
        });
        batch::spawn(headers.to_vec(), external, seals.to_vec(), verify)
    }

    /// Verify the uncles of `block`.
    pub fn verify_uncles(&self, chain: &dyn ChainReader, block: &Block) -> ConsensusResult<()> {
        if self.pow_mode() == PowMode::FullFake {
            return Ok(());
        }
        verify_uncles(&self.inner.verifier(), chain, block, unix_now())
    }

    /// Verify only the proof-of-work of `header`, using the light cache.
    pub fn verify_seal(&self, header: &Header) -> ConsensusResult<()> {
        self.inner.seal.verify(header, false)
    }

    /// Verify the proof-of-work of `header`, reading the full dataset if
    /// one has been generated.
    pub fn verify_seal_full(&self, header: &Header) -> ConsensusResult<()> {
        self.inner.seal.verify(header, true)
    }

    /// Difficulty a child of `parent` with timestamp `time` must carry.
    pub fn calc_difficulty(&self, time: u64, parent: &Header) -> U256 {
        calc_difficulty(&self.inner.difficulty, self.config(), time, parent)
    }

    /// Fill in the difficulty of a header about to be sealed.
    pub fn prepare(&self, reader: &dyn HeaderReader, header: &mut Header) -> ConsensusResult<()> {
        let parent = header
            .number
            .checked_sub(1)
            .and_then(|number| reader.get_header(header.parent_hash, number))
            .ok_or(ConsensusError::UnknownAncestor)?;
        header.difficulty = self.calc_difficulty(header.time, &parent);
        debug!(number = header.number, difficulty = %header.difficulty, "Prepared header");
        Ok(())
    }

    /// Rewards `header` would pay out.
    pub fn block_rewards(&self, header: &Header, uncles: &[Header]) -> BlockRewards {
        block_rewards(self.config(), header, uncles)
    }

    /// Credit block and uncle rewards.
    pub fn finalize(&self, state: &mut dyn StateMutator, header: &Header, uncles: &[Header]) {
        accumulate_rewards(self.config(), state, header, uncles);
    }

    /// Hash the seal commits to.
    pub fn seal_hash(&self, header: &Header) -> B256 {
        header.seal_hash()
    }

    /// Run the primitive over a header's seal fields, returning `(mix, result)`.
    pub fn compute_seal(&self, header: &Header) -> (B256, B256) {
        self.inner.seal.compute(header, true)
    }

    /// Expand the full dataset for the epoch containing `height`.
    pub fn generate_dataset(&self, height: u64) -> Option<Arc<Dataset>> {
        self.inner.seal.generate_dataset(height)
    }
}

/// An engine whose primitive is chosen from the chain configuration.
#[derive(Clone)]
pub enum AnyEngine {
    Ethash(Engine<Ethash>),
    EthashB3(Engine<EthashB3>),
    Keccak(Engine<Keccak>),
    Lyra2(Engine<Lyra2>),
}

macro_rules! dispatch {
    ($self:ident, $engine:ident => $body:expr) => {
        match $self {
            AnyEngine::Ethash($engine) => $body,
            AnyEngine::EthashB3($engine) => $body,
            AnyEngine::Keccak($engine) => $body,
            AnyEngine::Lyra2($engine) => $body,
        }
    };
}

impl AnyEngine {
    pub fn from_config(
        config: Arc<dyn ChainRules>,
        engine_config: EngineConfig,
    ) -> ConsensusResult<Self> {
        Ok(match config.engine() {
            EngineKind::Ethash => AnyEngine::Ethash(Engine::new(config, engine_config)?),
            EngineKind::EthashB3 => AnyEngine::EthashB3(Engine::new(config, engine_config)?),
            EngineKind::Keccak => AnyEngine::Keccak(Engine::new(config, engine_config)?),
            EngineKind::Lyra2 => AnyEngine::Lyra2(Engine::new(config, engine_config)?),
            EngineKind::Clique => {
                return Err(ConsensusError::UnsupportedEngine(
                    EngineKind::Clique.to_string(),
                ))
            }
        })
    }

    pub fn kind(&self) -> EngineKind {
        dispatch!(self, e => e.hasher().kind())
    }

    pub fn config(&self) -> &dyn ChainRules {
        dispatch!(self, e => e.config())
    }

    pub fn author(&self, header: &Header) -> Address {
        header.coinbase
    }

    pub fn verify_header(
        &self,
        reader: &dyn HeaderReader,
        header: &Header,
        seal: bool,
    ) -> ConsensusResult<()> {
        dispatch!(self, e => e.verify_header(reader, header, seal))
    }

    pub fn verify_headers(
        &self,
        reader: &dyn HeaderReader,
        headers: &[Header],
        seals: &[bool],
    ) -> BatchVerification {
        dispatch!(self, e => e.verify_headers(reader, headers, seals))
    }

    pub fn verify_uncles(&self, chain: &dyn ChainReader, block: &Block) -> ConsensusResult<()> {
        dispatch!(self, e => e.verify_uncles(chain, block))
    }

    pub fn verify_seal(&self, header: &Header) -> ConsensusResult<()> {
        dispatch!(self, e => e.verify_seal(header))
    }

    pub fn calc_difficulty(&self, time: u64, parent: &Header) -> U256 {
        dispatch!(self, e => e.calc_difficulty(time, parent))
    }

    pub fn prepare(&self, reader: &dyn HeaderReader, header: &mut Header) -> ConsensusResult<()> {
        dispatch!(self, e => e.prepare(reader, header))
    }

    pub fn finalize(&self, state: &mut dyn StateMutator, header: &Header, uncles: &[Header]) {
        dispatch!(self, e => e.finalize(state, header, uncles))
    }

    pub fn block_rewards(&self, header: &Header, uncles: &[Header]) -> BlockRewards {
        dispatch!(self, e => e.block_rewards(header, uncles))
    }

    pub fn seal_hash(&self, header: &Header) -> B256 {
        header.seal_hash()
    }

    pub fn compute_seal(&self, header: &Header) -> (B256, B256) {
        dispatch!(self, e => e.compute_seal(header))
    }

    pub fn generate_dataset(&self, height: u64) -> Option<Arc<Dataset>> {
        dispatch!(self, e => e.generate_dataset(height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_config::ChainConfig;
    use parking_lot::RwLock;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Headers(RwLock<HashMap<B256, Header>>);

    impl Headers {
        fn insert(&self, header: Header) {
            self.0.write().insert(header.hash(), header);
        }
    }

    impl HeaderReader for Headers {
        fn get_header(&self, hash: B256, number: u64) -> Option<Header> {
            self.0
                .read()
                .get(&hash)
                .filter(|h| h.number == number)
                .cloned()
        }
    }

    fn genesis() -> Header {
        Header {
            time: 1000,
            gas_limit: 8_000_000,
            difficulty: U256::from(64u64),
            ..Default::default()
        }
    }

    fn keccak_engine(mode: PowMode) -> Engine<Keccak> {
        let mut config = ChainConfig::developer(EngineKind::Keccak);
        config.minimum_difficulty = Some(U256::from(64u64));
        Engine::new(Arc::new(config), EngineConfig::with_mode(mode)).unwrap()
    }

    fn sealed_child(engine: &Engine<Keccak>, reader: &Headers, parent: &Header) -> Header {
        let mut header = Header {
            parent_hash: parent.hash(),
            number: parent.number + 1,
            time: parent.time + 10,
            gas_limit: parent.gas_limit,
            ..Default::default()
        };
        engine.prepare(reader, &mut header).unwrap();
        // Difficulty stays small, so a handful of nonces suffice.
        for nonce in 0.. {
            header.set_nonce(nonce);
            let (mix, _) = engine.compute_seal(&header);
            header.mix_digest = mix;
            if engine.verify_seal(&header).is_ok() {
                break;
            }
        }
        header
    }

    #[test]
    fn test_clique_unsupported() {
        let config = Arc::new(ChainConfig::developer(EngineKind::Clique));
        assert!(matches!(
            AnyEngine::from_config(config, EngineConfig::default()),
            Err(ConsensusError::UnsupportedEngine(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ChainConfig::developer(EngineKind::Keccak);
        config.difficulty_bound_divisor = Some(U256::ZERO);
        let err = Engine::<Keccak>::new(Arc::new(config), EngineConfig::default())
            .err()
            .expect("zero divisor must be rejected");
        assert!(matches!(
            err,
            ConsensusError::InvalidConfig(ref e) if e.field == "difficulty_bound_divisor"
        ));
    }

    #[test]
    fn test_hasher_must_match_chain() {
        let config = Arc::new(ChainConfig::developer(EngineKind::Ethash));
        assert!(matches!(
            Engine::<Keccak>::new(config, EngineConfig::default()),
            Err(ConsensusError::UnsupportedEngine(_))
        ));
    }

    #[test]
    fn test_from_config_dispatch() {
        for kind in [
            EngineKind::Ethash,
            EngineKind::EthashB3,
            EngineKind::Keccak,
            EngineKind::Lyra2,
        ] {
            let engine = AnyEngine::from_config(
                Arc::new(ChainConfig::developer(kind)),
                EngineConfig::test(),
            )
            .unwrap();
            assert_eq!(engine.kind(), kind);
        }
    }

    #[test]
    fn test_verify_header_with_reader() {
        let engine = keccak_engine(PowMode::Normal);
        let reader = Headers::default();
        let genesis = genesis();
        reader.insert(genesis.clone());

        let header = sealed_child(&engine, &reader, &genesis);
        assert!(engine.verify_header(&reader, &header, true).is_ok());

        let orphan = Header {
            parent_hash: B256::repeat_byte(5),
            number: 1,
            ..header.clone()
        };
        assert_eq!(
            engine.verify_header(&reader, &orphan, false),
            Err(ConsensusError::UnknownAncestor)
        );

        // A header already in the chain is accepted as-is.
        let mut known = header.clone();
        known.difficulty = U256::ZERO;
        reader.insert(known.clone());
        assert!(engine.verify_header(&reader, &known, true).is_ok());
    }

    #[test]
    fn test_full_fake_skips_everything() {
        let engine = keccak_engine(PowMode::FullFake);
        let reader = Headers::default();
        let junk = Header {
            number: 9,
            ..Default::default()
        };
        assert!(engine.verify_header(&reader, &junk, true).is_ok());
        let results = engine.verify_headers(&reader, &[junk.clone(), junk], &[]).collect();
        assert_eq!(results, vec![Ok(()), Ok(())]);
    }

    #[test]
    fn test_verify_headers_batch() {
        let engine = keccak_engine(PowMode::Normal);
        let reader = Headers::default();
        let mut parent = genesis();
        reader.insert(parent.clone());
        let mut headers = Vec::new();
        for _ in 0..8 {
            let header = sealed_child(&engine, &reader, &parent);
            reader.insert(header.clone());
            parent = header.clone();
            headers.push(header);
        }
        let mut bad = headers.clone();
        bad[5].mix_digest = B256::repeat_byte(1);

        let results = engine.verify_headers(&reader, &bad, &[true; 8]).collect();
        assert_eq!(results.len(), 8);
        for (i, result) in results.iter().enumerate() {
            if i == 5 {
                assert!(matches!(result, Err(ConsensusError::InvalidMixDigest { .. })));
            } else {
                // bad[6] no longer links to bad[5]; its parent comes from the reader.
                assert!(result.is_ok(), "index {i}: {result:?}");
            }
        }
    }

    #[test]
    fn test_verify_headers_unresolvable_parent() {
        let engine = keccak_engine(PowMode::Normal);
        let building = Headers::default();
        let reader = Headers::default();
        let mut parent = genesis();
        building.insert(parent.clone());
        reader.insert(parent.clone());
        let mut headers = Vec::new();
        for _ in 0..4 {
            let header = sealed_child(&engine, &building, &parent);
            building.insert(header.clone());
            parent = header.clone();
            headers.push(header);
        }
        // Only genesis is known to the verifying reader.
        headers[1].mix_digest = B256::repeat_byte(1);

        let results = engine.verify_headers(&reader, &headers, &[true; 4]).collect();
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(ConsensusError::InvalidMixDigest { .. })));
        assert_eq!(results[2], Err(ConsensusError::UnknownAncestor));
        assert!(results[3].is_ok());
    }

    #[test]
    fn test_prepare_needs_parent() {
        let engine = keccak_engine(PowMode::Fake);
        let reader = Headers::default();
        let mut header = Header {
            number: 3,
            ..Default::default()
        };
        assert_eq!(
            engine.prepare(&reader, &mut header),
            Err(ConsensusError::UnknownAncestor)
        );
    }
}
