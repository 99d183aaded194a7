//! Shared primitives, traits, and utilities for the convgraph workspace.
//!
//! `convgraph-core` provides the foundation the graph crate builds on:
//!
//! - **Error types** — [`ConvGraphError`] and [`Result`] for structured error handling
//! - **Traits** — Core abstractions like [`Summarizable`]
//! - **Randomness** — the [`RandomSource`] seam threaded through every stochastic call,
//!   plus replay/recording sources for reproducing draw sequences

pub mod error;
pub mod random;
pub mod traits;

pub use error::{ConvGraphError, Result};
pub use random::{Draw, RandomSource, RecordingSource, ReplaySource};
pub use traits::*;
