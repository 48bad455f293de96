//! Ethash proof-of-work.
//!
//! Verification only needs the light cache (16 MiB at epoch 0, growing
//! 128 KiB per epoch). Dataset items are recomputed from the cache on
//! demand:
//!
//! 1. The cache is a keccak512 chain seeded from the epoch seed, then
//!    mixed by three rounds of RandMemoHash
//! 2. A dataset item folds 256 pseudo-random cache rows into one 64-byte row
//! 3. `hashimoto` mixes 64 pairs of dataset items into a 128-byte mix,
//!    compresses it to a 32-byte digest and hashes `seed || digest`
//!
//! The seed expansion and the final hash are pluggable so that EthashB3
//! can reuse the same memory walk.

use super::{ethash_epoch_length, CachePrimitive, EpochContext, Hasher};
use crate::chain_config::{ChainRules, EngineKind, Fork};
use crate::params;
use alloy_primitives::{keccak256, B256};
use sha3::{Digest, Keccak512};
use tracing::{debug, trace};

/// Bytes in a keccak512 row.
const HASH_BYTES: usize = 64;
/// 32-bit words in a keccak512 row.
const HASH_WORDS: usize = 16;
/// Width of the hashimoto mix in bytes.
const MIX_BYTES: usize = 128;
/// Parents folded into each dataset item.
const DATASET_PARENTS: u32 = 256;
/// RandMemoHash rounds over the cache.
const CACHE_ROUNDS: usize = 3;
/// Dataset accesses per hashimoto run.
const LOOP_ACCESSES: u32 = 64;

const CACHE_INIT_BYTES: u64 = 1 << 24;
const CACHE_GROWTH_BYTES: u64 = 1 << 17;
const DATASET_INIT_BYTES: u64 = 1 << 30;
const DATASET_GROWTH_BYTES: u64 = 1 << 23;

/// Cache size used in test mode.
pub const TEST_CACHE_SIZE: u64 = 1024;
/// Dataset size used in test mode.
pub const TEST_DATASET_SIZE: u64 = 32 * 1024;

const FNV_PRIME: u32 = 0x0100_0193;

#[inline]
fn fnv(a: u32, b: u32) -> u32 {
    a.wrapping_mul(FNV_PRIME) ^ b
}

#[inline]
fn fnv_hash(mix: &mut [u32], data: &[u32]) {
    for (m, d) in mix.iter_mut().zip(data) {
        *m = fnv(*m, *d);
    }
}

fn keccak512(data: &[u8]) -> [u8; HASH_BYTES] {
    let mut out = [0u8; HASH_BYTES];
    out.copy_from_slice(&Keccak512::digest(data));
    out
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut i = 3u64;
    while i * i <= n {
        if n % i == 0 {
            return false;
        }
        i += 2;
    }
    true
}

/// Light-cache size in bytes for an epoch.
pub fn cache_size(epoch: u64) -> u64 {
    let mut size = CACHE_INIT_BYTES + CACHE_GROWTH_BYTES * epoch - HASH_BYTES as u64;
    while !is_prime(size / HASH_BYTES as u64) {
        size -= 2 * HASH_BYTES as u64;
    }
    size
}

/// Full dataset size in bytes for an epoch.
pub fn dataset_size(epoch: u64) -> u64 {
    let mut size = DATASET_INIT_BYTES + DATASET_GROWTH_BYTES * epoch - MIX_BYTES as u64;
    while !is_prime(size / MIX_BYTES as u64) {
        size -= 2 * MIX_BYTES as u64;
    }
    size
}

/// Seed for an epoch: keccak256 applied `(epoch * epoch_length + 1) / 30000`
/// times to 32 zero bytes.
pub fn seed_hash(epoch: u64, epoch_length: u64) -> B256 {
    let rounds = (epoch * epoch_length + 1) / params::EPOCH_LENGTH;
    let mut seed = B256::ZERO;
    for _ in 0..rounds {
        seed = keccak256(seed);
    }
    seed
}

fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn bytes_to_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Verification cache for one epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightCache {
    pub epoch: u64,
    pub epoch_length: u64,
    pub seed: B256,
    /// Cache content as little-endian 32-bit words.
    pub words: Vec<u32>,
    /// Size of the virtual dataset this cache expands to.
    pub dataset_size: u64,
}

impl LightCache {
    /// Generate the cache for an epoch. Test mode uses the reduced sizes.
    pub fn generate(epoch: u64, epoch_length: u64, test: bool) -> Self {
        let size = if test { TEST_CACHE_SIZE } else { cache_size(epoch) };
        let seed = seed_hash(epoch, epoch_length);
        debug!(epoch, epoch_length, size, "Generating ethash cache");
        let words = generate_cache(size as usize, seed);
        Self::from_words(epoch, epoch_length, words, test)
    }

    /// Wrap already generated cache words.
    pub fn from_words(epoch: u64, epoch_length: u64, words: Vec<u32>, test: bool) -> Self {
        Self {
            epoch,
            epoch_length,
            seed: seed_hash(epoch, epoch_length),
            words,
            dataset_size: if test { TEST_DATASET_SIZE } else { dataset_size(epoch) },
        }
    }

    /// Expected word count of a cache for this epoch.
    pub fn expected_words(epoch: u64, test: bool) -> usize {
        let size = if test { TEST_CACHE_SIZE } else { cache_size(epoch) };
        size as usize / 4
    }

    fn rows(&self) -> u32 {
        (self.words.len() / HASH_WORDS) as u32
    }

    /// Compute one 64-byte dataset item from the cache.
    pub fn dataset_item(&self, index: u32) -> [u32; HASH_WORDS] {
        let rows = self.rows();
        let base = (index % rows) as usize * HASH_WORDS;

        let mut mix = [0u32; HASH_WORDS];
        mix.copy_from_slice(&self.words[base..base + HASH_WORDS]);
        mix[0] ^= index;
        let mut int_mix = hash_words(&mix);

        for i in 0..DATASET_PARENTS {
            let parent = fnv(index ^ i, int_mix[(i as usize) % HASH_WORDS]) % rows;
            let off = parent as usize * HASH_WORDS;
            fnv_hash(&mut int_mix, &self.words[off..off + HASH_WORDS]);
        }
        hash_words(&int_mix)
    }
}

/// keccak512 over 16 little-endian words.
fn hash_words(words: &[u32; HASH_WORDS]) -> [u32; HASH_WORDS] {
    let mut bytes = [0u8; HASH_BYTES];
    for (chunk, w) in bytes.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&w.to_le_bytes());
    }
    let hashed = keccak512(&bytes);
    let mut out = [0u32; HASH_WORDS];
    for (o, c) in out.iter_mut().zip(hashed.chunks_exact(4)) {
        *o = u32::from_le_bytes([c[0], c[1], c[2], c[3]]);
    }
    out
}

fn generate_cache(size: usize, seed: B256) -> Vec<u32> {
    let rows = size / HASH_BYTES;
    let mut cache = vec![0u8; rows * HASH_BYTES];

    // 1. Sequential keccak512 chain
    cache[..HASH_BYTES].copy_from_slice(&keccak512(seed.as_slice()));
    for offset in (HASH_BYTES..cache.len()).step_by(HASH_BYTES) {
        let row = keccak512(&cache[offset - HASH_BYTES..offset]);
        cache[offset..offset + HASH_BYTES].copy_from_slice(&row);
    }

    // 2. RandMemoHash rounds
    let mut temp = [0u8; HASH_BYTES];
    for _ in 0..CACHE_ROUNDS {
        for j in 0..rows {
            let src_off = ((j + rows - 1) % rows) * HASH_BYTES;
            let dst_off = j * HASH_BYTES;
            let first = u32::from_le_bytes([
                cache[dst_off],
                cache[dst_off + 1],
                cache[dst_off + 2],
                cache[dst_off + 3],
            ]);
            let xor_off = (first as usize % rows) * HASH_BYTES;
            for k in 0..HASH_BYTES {
                temp[k] = cache[src_off + k] ^ cache[xor_off + k];
            }
            cache[dst_off..dst_off + HASH_BYTES].copy_from_slice(&keccak512(&temp));
        }
    }

    bytes_to_words(&cache)
}

/// Fully expanded dataset, only needed for mining or full-DAG verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub epoch: u64,
    pub words: Vec<u32>,
}

impl Dataset {
    /// Expand every item of the dataset from its cache.
    pub fn generate(cache: &LightCache) -> Self {
        let items = (cache.dataset_size as usize) / HASH_BYTES;
        debug!(epoch = cache.epoch, items, "Generating ethash dataset");
        let mut words = Vec::with_capacity(items * HASH_WORDS);
        for index in 0..items as u32 {
            words.extend_from_slice(&cache.dataset_item(index));
        }
        Self {
            epoch: cache.epoch,
            words,
        }
    }

    pub fn size(&self) -> u64 {
        (self.words.len() * 4) as u64
    }

    fn item(&self, index: u32) -> [u32; HASH_WORDS] {
        let off = index as usize * HASH_WORDS;
        let mut out = [0u32; HASH_WORDS];
        out.copy_from_slice(&self.words[off..off + HASH_WORDS]);
        out
    }
}

/// Seed expansion and final hash of a hashimoto run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flavor {
    Keccak,
    Blake3,
}

impl Flavor {
    fn expand(self, input: &[u8]) -> [u8; HASH_BYTES] {
        match self {
            Flavor::Keccak => keccak512(input),
            Flavor::Blake3 => {
                let mut hasher = blake3::Hasher::new();
                hasher.update(input);
                let mut out = [0u8; HASH_BYTES];
                hasher.finalize_xof().fill(&mut out);
                out
            }
        }
    }

    fn finish(self, input: &[u8]) -> B256 {
        match self {
            Flavor::Keccak => keccak256(input),
            Flavor::Blake3 => B256::from(*blake3::hash(input).as_bytes()),
        }
    }
}

pub(crate) fn hashimoto<F>(
    hash: B256,
    nonce: u64,
    size: u64,
    flavor: Flavor,
    lookup: F,
) -> (B256, B256)
where
    F: Fn(u32) -> [u32; HASH_WORDS],
{
    let rows = (size / MIX_BYTES as u64) as u32;

    // 1. Seed = expand(hash || le64(nonce))
    let mut input = [0u8; 40];
    input[..32].copy_from_slice(hash.as_slice());
    input[32..].copy_from_slice(&nonce.to_le_bytes());
    let seed = flavor.expand(&input);
    let seed_head = u32::from_le_bytes([seed[0], seed[1], seed[2], seed[3]]);

    // 2. Mix starts as the seed repeated twice
    let seed_words = bytes_to_words(&seed);
    let mut mix = [0u32; MIX_BYTES / 4];
    for (i, m) in mix.iter_mut().enumerate() {
        *m = seed_words[i % HASH_WORDS];
    }

    // 3. Fold in dataset pages
    let mut temp = [0u32; MIX_BYTES / 4];
    for i in 0..LOOP_ACCESSES {
        let parent = fnv(i ^ seed_head, mix[(i as usize) % mix.len()]) % rows;
        for j in 0..(MIX_BYTES / HASH_BYTES) as u32 {
            let item = lookup(2 * parent + j);
            let off = j as usize * HASH_WORDS;
            temp[off..off + HASH_WORDS].copy_from_slice(&item);
        }
        fnv_hash(&mut mix, &temp);
    }

    // 4. Compress to 8 words
    let mut digest = [0u8; 32];
    for (i, chunk) in mix.chunks_exact(4).enumerate() {
        let folded = fnv(fnv(fnv(chunk[0], chunk[1]), chunk[2]), chunk[3]);
        digest[i * 4..i * 4 + 4].copy_from_slice(&folded.to_le_bytes());
    }

    // 5. Result = finish(seed || digest)
    let mut tail = Vec::with_capacity(HASH_BYTES + 32);
    tail.extend_from_slice(&seed);
    tail.extend_from_slice(&digest);
    let result = flavor.finish(&tail);
    trace!(nonce, mix = %B256::from(digest), %result, "hashimoto");

    (B256::from(digest), result)
}

/// Hashimoto over a light cache, recomputing dataset items on demand.
pub fn hashimoto_light(cache: &LightCache, hash: B256, nonce: u64) -> (B256, B256) {
    hashimoto(hash, nonce, cache.dataset_size, Flavor::Keccak, |i| {
        cache.dataset_item(i)
    })
}

/// Hashimoto over a fully generated dataset.
pub fn hashimoto_full(dataset: &Dataset, hash: B256, nonce: u64) -> (B256, B256) {
    hashimoto(hash, nonce, dataset.size(), Flavor::Keccak, |i| dataset.item(i))
}

/// Run hashimoto for `flavor`, preferring a dataset, then a cache, and
/// generating a cache as a last resort.
pub(crate) fn compute_with(
    flavor: Flavor,
    seal_hash: B256,
    nonce: u64,
    ctx: &EpochContext,
    ecip1099: Option<u64>,
) -> (B256, B256) {
    if let Some(dataset) = &ctx.dataset {
        return hashimoto(seal_hash, nonce, dataset.size(), flavor, |i| dataset.item(i));
    }
    match &ctx.cache {
        Some(cache) => hashimoto(seal_hash, nonce, cache.dataset_size, flavor, |i| {
            cache.dataset_item(i)
        }),
        None => {
            let epoch_length = ethash_epoch_length(ctx.height, ecip1099);
            let cache = LightCache::generate(ctx.height / epoch_length, epoch_length, false);
            hashimoto(seal_hash, nonce, cache.dataset_size, flavor, |i| {
                cache.dataset_item(i)
            })
        }
    }
}

/// The classic ethash primitive.
#[derive(Debug, Clone, Default)]
pub struct Ethash {
    ecip1099: Option<u64>,
}

impl Ethash {
    pub fn new(ecip1099: Option<u64>) -> Self {
        Self { ecip1099 }
    }
}

impl Hasher for Ethash {
    fn from_rules(rules: &dyn ChainRules) -> Self {
        Self::new(rules.activation(Fork::Ecip1099))
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Ethash
    }

    fn epoch_length(&self, height: u64) -> u64 {
        ethash_epoch_length(height, self.ecip1099)
    }

    fn ecip1099_block(&self) -> Option<u64> {
        self.ecip1099
    }

    fn cache_primitive(&self) -> Option<CachePrimitive> {
        Some(CachePrimitive::Ethash)
    }

    fn compute(&self, seal_hash: B256, nonce: u64, ctx: &EpochContext) -> (B256, B256) {
        compute_with(Flavor::Keccak, seal_hash, nonce, ctx, self.ecip1099)
    }
}
