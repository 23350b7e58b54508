//! Deterministic random number stream for one block.
//!
//! Every randomized decision in a block draws from a single stream seeded
//! from the block hash.  The order of draws follows the phase order of the
//! block pipeline and is part of consensus: changing it forks the chain just
//! as surely as changing game rules would.
//!
//! The core generator is PCG-XSH-RR: a 64-bit linear congruential step with
//! a permuted 32-bit output.  Small state, no branches, excellent
//! statistical quality for game purposes.

use sha2::{Digest, Sha256};

const MULTIPLIER: u64 = 6364136223846793005;
const INCREMENT: u64 = 1442695040888963407;

/// Seeded deterministic random stream.
#[derive(Clone, Debug)]
pub struct Rng {
    state: u64,
}

impl Rng {
    /// Seeds the stream from a block hash (hex string or arbitrary bytes).
    ///
    /// The hash is run through SHA-256 so that malformed or short inputs
    /// still yield a full-entropy state, and so the seed derivation is
    /// identical across implementations regardless of hash encoding.
    pub fn seed_from_block_hash(hash: &str) -> Self {
        let bytes = hex::decode(hash).unwrap_or_else(|_| hash.as_bytes().to_vec());
        let digest = Sha256::digest(&bytes);
        let mut state_bytes = [0u8; 8];
        state_bytes.copy_from_slice(&digest[..8]);
        Self {
            state: u64::from_be_bytes(state_bytes),
        }
    }

    /// Seeds directly from an integer.  Test helper.
    pub fn seed_from_u64(seed: u64) -> Self {
        Self { state: seed }
    }

    fn step(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(MULTIPLIER).wrapping_add(INCREMENT);
        self.state
    }

    /// Next raw 32-bit output.
    pub fn next_u32(&mut self) -> u32 {
        let state = self.step();
        let xorshifted = (((state >> 18) ^ state) >> 27) as u32;
        let rot = (state >> 59) as u32;
        xorshifted.rotate_right(rot)
    }

    /// Uniform integer in `[0, n)`.  `n` must be positive.
    ///
    /// Uses rejection sampling to avoid modulo bias; the loop terminates
    /// deterministically given the seed, so all nodes reject the same draws.
    pub fn next_int(&mut self, n: u32) -> u32 {
        assert!(n > 0, "empty range for random draw");
        let zone = u32::MAX - (u32::MAX % n);
        loop {
            let raw = self.next_u32();
            if raw < zone {
                return raw % n;
            }
        }
    }

    /// Uniform integer in `[min, max]` inclusive.
    pub fn next_range(&mut self, min: u32, max: u32) -> u32 {
        if min >= max {
            return min;
        }
        min + self.next_int(max - min + 1)
    }

    /// True with probability `1 / n`.
    pub fn chance(&mut self, n: u32) -> bool {
        self.next_int(n) == 0
    }
}
