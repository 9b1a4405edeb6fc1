//! Shared test fixtures and utilities for recede crates.
//!
//! Provides deterministic RNG setup and random dense matrices with the
//! structure QP tests need (symmetric positive definite Hessians, boxed
//! vectors).

pub mod matrices;
pub mod rng;

// ---------------------------------------------------------------------------
// Re-exports for convenience
// ---------------------------------------------------------------------------

pub use matrices::{random_matrix, random_spd, random_vector};
pub use rng::{deterministic_vec, seeded_rng};
