//! Challenge solver module registry.
//!
//! Each submodule implements a solver for a specific challenge scheme.

pub mod proof_of_work;

pub use proof_of_work::{ChallengeSolveError, ProofOfWorkSolver};

/// Common solver interface used by the resolver.
///
/// Solving is synchronous and CPU-bound; the resolver moves it onto a
/// blocking thread.
pub trait ChallengeSolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Find the nonce that satisfies `puzzle`.
    fn solve(&self, puzzle: &str) -> Result<u64, ChallengeSolveError>;
}
