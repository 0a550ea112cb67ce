//! Correctness baselines.
//!
//! These never use lookup tables or threads, so the optimized paths can be
//! compared against them.

pub mod naive;
