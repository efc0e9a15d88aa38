//! SHA-512 hash-prefix proof-of-work solver.
//!
//! Finds the smallest nonce `n >= 1` such that the lowercase hex digest of
//! `SHA-512(puzzle + n)` starts with `difficulty` zero characters.

use sha2::{Digest, Sha512};
use thiserror::Error;

use super::ChallengeSolver;
use crate::challenges::core::FetchError;

pub const DEFAULT_DIFFICULTY: usize = 4;
pub const DEFAULT_MAX_NONCE: u64 = 2_000_000;

/// Brute-force solver, deterministic for a given puzzle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofOfWorkSolver {
    difficulty: usize,
    max_nonce: u64,
}

impl ProofOfWorkSolver {
    pub fn new(difficulty: usize, max_nonce: u64) -> Self {
        Self {
            difficulty,
            max_nonce,
        }
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn max_nonce(&self) -> u64 {
        self.max_nonce
    }

    /// Search nonces `1..=max_nonce`.
    pub fn find_nonce(&self, puzzle: &str) -> Result<u64, ChallengeSolveError> {
        let mut prefix = Sha512::new();
        prefix.update(puzzle.as_bytes());

        for nonce in 1..=self.max_nonce {
            let mut hasher = prefix.clone();
            hasher.update(nonce.to_string().as_bytes());
            let digest = hasher.finalize();

            if leading_zero_nibbles(&digest) >= self.difficulty {
                log::debug!(
                    "proof-of-work solved: difficulty={} nonce={}",
                    self.difficulty,
                    nonce
                );
                return Ok(nonce);
            }
        }

        Err(ChallengeSolveError::Exhausted {
            difficulty: self.difficulty,
            max_nonce: self.max_nonce,
        })
    }
}

impl Default for ProofOfWorkSolver {
    fn default() -> Self {
        Self::new(DEFAULT_DIFFICULTY, DEFAULT_MAX_NONCE)
    }
}

impl ChallengeSolver for ProofOfWorkSolver {
    fn name(&self) -> &'static str {
        "sha512_proof_of_work"
    }

    fn solve(&self, puzzle: &str) -> Result<u64, ChallengeSolveError> {
        self.find_nonce(puzzle)
    }
}

/// Number of leading `'0'` characters in the lowercase hex rendering of `digest`.
fn leading_zero_nibbles(digest: &[u8]) -> usize {
    let mut count = 0;
    for byte in digest {
        if *byte == 0 {
            count += 2;
            continue;
        }
        if byte >> 4 == 0 {
            count += 1;
        }
        break;
    }
    count
}

/// Hex digest of `SHA-512(puzzle + nonce)`.
pub fn challenge_digest(puzzle: &str, nonce: u64) -> String {
    let mut hasher = Sha512::new();
    hasher.update(puzzle.as_bytes());
    hasher.update(nonce.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChallengeSolveError {
    #[error("no nonce within {max_nonce} satisfies difficulty {difficulty}")]
    Exhausted { difficulty: usize, max_nonce: u64 },
}

impl From<ChallengeSolveError> for FetchError {
    fn from(err: ChallengeSolveError) -> Self {
        match err {
            ChallengeSolveError::Exhausted {
                difficulty,
                max_nonce,
            } => FetchError::ChallengeSolve {
                difficulty,
                max_nonce,
            },
        }
    }
}
