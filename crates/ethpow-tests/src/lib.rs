//! # ethpow-tests
//!
//! Integration tests for ethpow-consensus.
//!
//! This crate provides:
//! - An in-memory chain and a recording state mutator
//! - Generators for sealed header chains
//! - Property-based tests for consensus invariants
//! - Worked difficulty, seal, uncle and reward scenarios

pub mod generators;
pub mod harness;




pub use generators::*;
pub use harness::*;
