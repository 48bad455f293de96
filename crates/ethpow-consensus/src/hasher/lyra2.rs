//! Lyra2 proof-of-work.
//!
//! Reference Lyra2 password hashing with a Blake2b-round sponge, run with
//! `t_cost = 1` over a 4 x 4 matrix and a 32-byte output. The header input
//! is `seal_hash || nonce`, used as both password and salt. The nonce is
//! written little-endian below the nonce-transition height and big-endian
//! from it on.
//!
//! Lyra2 seals carry no mix digest; `compute` returns a zero mix.

use super::{EpochContext, Hasher};
use crate::chain_config::{ChainRules, EngineKind, Fork};
use alloy_primitives::B256;

/// Words in the sponge rate (the part XORed with input blocks).
const BLOCK_LEN_INT64: usize = 12;
/// Words per input block during the absorb of `pwd || salt || params`.
const BLOCK_LEN_BLAKE2_SAFE_INT64: usize = 8;
const BLOCK_LEN_BLAKE2_SAFE_BYTES: usize = BLOCK_LEN_BLAKE2_SAFE_INT64 * 8;

const T_COST: u64 = 1;
const N_ROWS: usize = 4;
const N_COLS: usize = 4;
const OUTPUT_LEN: usize = 32;

const BLAKE2B_IV: [u64; 8] = [
    0x6a09e667f3bcc908,
    0xbb67ae8584caa73b,
    0x3c6ef372fe94f82b,
    0xa54ff53a5f1d36f1,
    0x510e527fade682d1,
    0x9b05688c2b3e6c1f,
    0x1f83d9abfb41bd6b,
    0x5be0cd19137e2179,
];

/// Sponge state: 12 rate words followed by 4 capacity words.
struct Sponge {
    state: [u64; 16],
}

impl Sponge {
    fn new() -> Self {
        let mut state = [0u64; 16];
        state[8..].copy_from_slice(&BLAKE2B_IV);
        Self { state }
    }

    #[inline]
    fn g(v: &mut [u64; 16], a: usize, b: usize, c: usize, d: usize) {
        v[a] = v[a].wrapping_add(v[b]);
        v[d] = (v[d] ^ v[a]).rotate_right(32);
        v[c] = v[c].wrapping_add(v[d]);
        v[b] = (v[b] ^ v[c]).rotate_right(24);
        v[a] = v[a].wrapping_add(v[b]);
        v[d] = (v[d] ^ v[a]).rotate_right(16);
        v[c] = v[c].wrapping_add(v[d]);
        v[b] = (v[b] ^ v[c]).rotate_right(63);
    }

    fn round(&mut self) {
        let v = &mut self.state;
        Self::g(v, 0, 4, 8, 12);
        Self::g(v, 1, 5, 9, 13);
        Self::g(v, 2, 6, 10, 14);
        Self::g(v, 3, 7, 11, 15);
        Self::g(v, 0, 5, 10, 15);
        Self::g(v, 1, 6, 11, 12);
        Self::g(v, 2, 7, 8, 13);
        Self::g(v, 3, 4, 9, 14);
    }

    fn full_rounds(&mut self) {
        for _ in 0..12 {
            self.round();
        }
    }

    fn absorb_block_blake2_safe(&mut self, block: &[u64]) {
        for (s, w) in self.state.iter_mut().zip(&block[..BLOCK_LEN_BLAKE2_SAFE_INT64]) {
            *s ^= *w;
        }
        self.full_rounds();
    }

    fn absorb_block(&mut self, block: &[u64]) {
        for (s, w) in self.state.iter_mut().zip(&block[..BLOCK_LEN_INT64]) {
            *s ^= *w;
        }
        self.full_rounds();
    }

    fn squeeze(&mut self, out: &mut [u8]) {
        let block_bytes = BLOCK_LEN_INT64 * 8;
        let mut written = 0;
        while written < out.len() {
            let take = (out.len() - written).min(block_bytes);
            let bytes: Vec<u8> = self.state[..BLOCK_LEN_INT64]
                .iter()
                .flat_map(|w| w.to_le_bytes())
                .collect();
            out[written..written + take].copy_from_slice(&bytes[..take]);
            written += take;
            if take == block_bytes {
                self.full_rounds();
            }
        }
    }
}

/// The memory matrix, stored row-major as one flat word vector.
struct Matrix {
    words: Vec<u64>,
    row_len: usize,
    n_cols: usize,
}

impl Matrix {
    fn cell(&self, row: usize, col: usize) -> usize {
        row * self.row_len + col * BLOCK_LEN_INT64
    }

    fn reduced_squeeze_row0(&mut self, sponge: &mut Sponge) {
        for i in 0..self.n_cols {
            let out = self.cell(0, self.n_cols - 1 - i);
            self.words[out..out + BLOCK_LEN_INT64]
                .copy_from_slice(&sponge.state[..BLOCK_LEN_INT64]);
            sponge.round();
        }
    }

    fn reduced_duplex_row1(&mut self, sponge: &mut Sponge) {
        for i in 0..self.n_cols {
            let input = self.cell(0, i);
            let out = self.cell(1, self.n_cols - 1 - i);
            for j in 0..BLOCK_LEN_INT64 {
                sponge.state[j] ^= self.words[input + j];
            }
            sponge.round();
            for j in 0..BLOCK_LEN_INT64 {
                self.words[out + j] = self.words[input + j] ^ sponge.state[j];
            }
        }
    }

    fn reduced_duplex_row_setup(
        &mut self,
        sponge: &mut Sponge,
        prev: usize,
        row_a: usize,
        row: usize,
    ) {
        for i in 0..self.n_cols {
            let input = self.cell(prev, i);
            let in_out = self.cell(row_a, i);
            let out = self.cell(row, self.n_cols - 1 - i);
            for j in 0..BLOCK_LEN_INT64 {
                sponge.state[j] ^= self.words[input + j].wrapping_add(self.words[in_out + j]);
            }
            sponge.round();
            for j in 0..BLOCK_LEN_INT64 {
                self.words[out + j] = self.words[input + j] ^ sponge.state[j];
            }
            self.rotate_xor(in_out, &sponge.state);
        }
    }

    fn reduced_duplex_row(&mut self, sponge: &mut Sponge, prev: usize, row_a: usize, row: usize) {
        for i in 0..self.n_cols {
            let input = self.cell(prev, i);
            let in_out = self.cell(row_a, i);
            let out = self.cell(row, i);
            for j in 0..BLOCK_LEN_INT64 {
                sponge.state[j] ^= self.words[input + j].wrapping_add(self.words[in_out + j]);
            }
            sponge.round();
            for j in 0..BLOCK_LEN_INT64 {
                self.words[out + j] ^= sponge.state[j];
            }
            self.rotate_xor(in_out, &sponge.state);
        }
    }

    /// `M[row*][col] ^= rotW(rand)`: XOR with the rate rotated by one word.
    fn rotate_xor(&mut self, at: usize, state: &[u64; 16]) {
        self.words[at] ^= state[BLOCK_LEN_INT64 - 1];
        for j in 1..BLOCK_LEN_INT64 {
            self.words[at + j] ^= state[j - 1];
        }
    }
}

/// Reference Lyra2 key derivation.
///
/// `n_rows` must be a power of two and at least 2.
pub fn lyra2(out: &mut [u8], pwd: &[u8], salt: &[u8], t_cost: u64, n_rows: usize, n_cols: usize) {
    let row_len = BLOCK_LEN_INT64 * n_cols;
    let mut matrix = Matrix {
        words: vec![0u64; row_len * n_rows],
        row_len,
        n_cols,
    };

    // 1. pad(pwd || salt || basil) with 10*1 into whole 64-byte blocks
    let n_blocks_input = (salt.len() + pwd.len() + 6 * 8) / BLOCK_LEN_BLAKE2_SAFE_BYTES + 1;
    let mut input = vec![0u8; n_blocks_input * BLOCK_LEN_BLAKE2_SAFE_BYTES];
    let mut pos = 0;
    input[pos..pos + pwd.len()].copy_from_slice(pwd);
    pos += pwd.len();
    input[pos..pos + salt.len()].copy_from_slice(salt);
    pos += salt.len();
    for basil in [
        out.len() as u64,
        pwd.len() as u64,
        salt.len() as u64,
        t_cost,
        n_rows as u64,
        n_cols as u64,
    ] {
        input[pos..pos + 8].copy_from_slice(&basil.to_le_bytes());
        pos += 8;
    }
    input[pos] = 0x80;
    let last = input.len() - 1;
    input[last] ^= 0x01;

    let input_words: Vec<u64> = input
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect();

    // 2. Absorb the padded input
    let mut sponge = Sponge::new();
    for block in input_words.chunks_exact(BLOCK_LEN_BLAKE2_SAFE_INT64) {
        sponge.absorb_block_blake2_safe(block);
    }

    // 3. Setup phase
    matrix.reduced_squeeze_row0(&mut sponge);
    matrix.reduced_duplex_row1(&mut sponge);

    let mut row = 2usize;
    let mut prev = 1usize;
    let mut row_a = 0usize;
    let mut step = 1i64;
    let mut window = 2i64;
    let mut gap = 1i64;
    while row < n_rows {
        matrix.reduced_duplex_row_setup(&mut sponge, prev, row_a, row);
        row_a = ((row_a as i64 + step) & (window - 1)) as usize;
        prev = row;
        row += 1;
        if row_a == 0 {
            step = window + gap;
            window *= 2;
            gap = -gap;
        }
    }

    // 4. Wandering phase
    let mask = n_rows as i64 - 1;
    row = 0;
    for tau in 1..=t_cost {
        let step = if tau % 2 == 0 { -1 } else { n_rows as i64 / 2 - 1 };
        loop {
            row_a = (sponge.state[0] & mask as u64) as usize;
            matrix.reduced_duplex_row(&mut sponge, prev, row_a, row);
            prev = row;
            row = ((row as i64 + step) & mask) as usize;
            if row == 0 {
                break;
            }
        }
    }

    // 5. Wrap-up
    let last_row = matrix.cell(row_a, 0);
    sponge.absorb_block(&matrix.words[last_row..last_row + BLOCK_LEN_INT64]);
    sponge.squeeze(out);
}

/// The Lyra2 primitive.
#[derive(Debug, Clone, Default)]
pub struct Lyra2 {
    nonce_transition: Option<u64>,
}

impl Lyra2 {
    pub fn new(nonce_transition: Option<u64>) -> Self {
        Self { nonce_transition }
    }

    /// Whether the nonce is encoded big-endian at `height`.
    pub fn big_endian_nonce(&self, height: u64) -> bool {
        self.nonce_transition.is_some_and(|at| height >= at)
    }

    pub fn hash(&self, seal_hash: B256, nonce: u64, height: u64) -> B256 {
        let mut input = [0u8; 40];
        input[..32].copy_from_slice(seal_hash.as_slice());
        let nonce_bytes = if self.big_endian_nonce(height) {
            nonce.to_be_bytes()
        } else {
            nonce.to_le_bytes()
        };
        input[32..].copy_from_slice(&nonce_bytes);

        let mut out = [0u8; OUTPUT_LEN];
        lyra2(&mut out, &input, &input, T_COST, N_ROWS, N_COLS);
        B256::from(out)
    }
}

impl Hasher for Lyra2 {
    fn from_rules(rules: &dyn ChainRules) -> Self {
        Self::new(rules.activation(Fork::Lyra2NonceTransition))
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Lyra2
    }

    fn has_mix_digest(&self) -> bool {
        false
    }

    fn compute(&self, seal_hash: B256, nonce: u64, ctx: &EpochContext) -> (B256, B256) {
        (B256::ZERO, self.hash(seal_hash, nonce, ctx.height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lyra2_is_deterministic() {
        let hasher = Lyra2::new(Some(100));
        let seal = B256::repeat_byte(0x42);
        assert_eq!(hasher.hash(seal, 12345, 10), hasher.hash(seal, 12345, 10));
        assert_ne!(hasher.hash(seal, 12345, 10), hasher.hash(seal, 12346, 10));
        assert_ne!(hasher.hash(seal, 1, 10), B256::ZERO);
    }

    #[test]
    fn test_nonce_endianness_switch_is_inclusive() {
        let hasher = Lyra2::new(Some(100));
        assert!(!hasher.big_endian_nonce(99));
        assert!(hasher.big_endian_nonce(100));

        let seal = B256::repeat_byte(7);
        // A palindromic nonce encodes the same either way.
        let palindrome = 0x0102_0304_0403_0201u64;
        assert_eq!(hasher.hash(seal, palindrome, 99), hasher.hash(seal, palindrome, 100));
        assert_ne!(hasher.hash(seal, 1, 99), hasher.hash(seal, 1, 100));
        // Little-endian 1 before the switch equals big-endian 1 << 56 after it.
        assert_eq!(hasher.hash(seal, 1, 99), hasher.hash(seal, 1 << 56, 100));
    }

    #[test]
    fn test_lyra2_output_depends_on_parameters() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        lyra2(&mut a, b"password", b"salt", 1, 4, 4);
        lyra2(&mut b, b"password", b"salt", 2, 4, 4);
        assert_ne!(a, b, "time cost is part of the basil");
        lyra2(&mut b, b"password", b"salt", 1, 8, 4);
        assert_ne!(a, b, "row count is part of the basil");
    }

    #[test]
    fn test_lyra2_has_no_mix() {
        let hasher = Lyra2::default();
        let (mix, _) = hasher.compute(B256::ZERO, 0, &EpochContext::new(0));
        assert_eq!(mix, B256::ZERO);
        assert!(!hasher.has_mix_digest());
        assert!(!hasher.needs_cache());
    }
}
