//! Randomness sources.
//!
//! Every stochastic operation in the workspace takes an explicit
//! `&mut impl RandomSource` instead of reaching for a shared generator, so
//! chains are reproducible from a seed and unit tests can replay fixed draw
//! sequences.

use std::collections::VecDeque;

/// The three uniform draws the graph operators need.
pub trait RandomSource {
    /// A fair coin.
    fn next_bool(&mut self) -> bool;

    /// Uniform integer in `[0, n)`. `n` must be positive.
    fn next_below(&mut self, n: usize) -> usize;

    /// Uniform real in `[0, 1)`.
    fn next_f64(&mut self) -> f64;
}

impl<R: rand::Rng + ?Sized> RandomSource for R {
    fn next_bool(&mut self) -> bool {
        self.gen::<bool>()
    }

    fn next_below(&mut self, n: usize) -> usize {
        self.gen_range(0..n)
    }

    fn next_f64(&mut self) -> f64 {
        self.gen::<f64>()
    }
}

/// A single recorded draw.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Draw {
    Bool(bool),
    Below { n: usize, value: usize },
    Real(f64),
}

/// Wraps another source and records every draw it hands out.
#[derive(Debug)]
pub struct RecordingSource<R> {
    inner: R,
    draws: Vec<Draw>,
}

impl<R: RandomSource> RecordingSource<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            draws: Vec::new(),
        }
    }

    /// Draws recorded so far, oldest first.
    pub fn draws(&self) -> &[Draw] {
        &self.draws
    }

    /// Consume the recorder, returning the recorded draws.
    pub fn into_draws(self) -> Vec<Draw> {
        self.draws
    }
}

impl<R: RandomSource> RandomSource for RecordingSource<R> {
    fn next_bool(&mut self) -> bool {
        let b = self.inner.next_bool();
        self.draws.push(Draw::Bool(b));
        b
    }

    fn next_below(&mut self, n: usize) -> usize {
        let value = self.inner.next_below(n);
        self.draws.push(Draw::Below { n, value });
        value
    }

    fn next_f64(&mut self) -> f64 {
        let x = self.inner.next_f64();
        self.draws.push(Draw::Real(x));
        x
    }
}

/// Replays a fixed sequence of draws.
///
/// # Panics
///
/// Panics when the sequence is exhausted or when the next recorded draw is of
/// a different kind than the one requested. Replaying a sequence against code
/// that draws differently is a test bug, not a recoverable condition.
#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    draws: VecDeque<Draw>,
}

impl ReplaySource {
    pub fn new(draws: impl IntoIterator<Item = Draw>) -> Self {
        Self {
            draws: draws.into_iter().collect(),
        }
    }

    /// Replay only uniform reals.
    pub fn from_reals(values: &[f64]) -> Self {
        Self::new(values.iter().map(|&x| Draw::Real(x)))
    }

    /// Number of draws not yet consumed.
    pub fn remaining(&self) -> usize {
        self.draws.len()
    }

    fn pop(&mut self, wanted: &str) -> Draw {
        match self.draws.pop_front() {
            Some(d) => d,
            None => panic!("replay source exhausted while drawing {wanted}"),
        }
    }
}

impl RandomSource for ReplaySource {
    fn next_bool(&mut self) -> bool {
        match self.pop("bool") {
            Draw::Bool(b) => b,
            other => panic!("replay mismatch: wanted bool, found {other:?}"),
        }
    }

    fn next_below(&mut self, n: usize) -> usize {
        match self.pop("integer") {
            Draw::Below { value, .. } if value < n => value,
            other => panic!("replay mismatch: wanted integer below {n}, found {other:?}"),
        }
    }

    fn next_f64(&mut self) -> f64 {
        match self.pop("real") {
            Draw::Real(x) => x,
            other => panic!("replay mismatch: wanted real, found {other:?}"),
        }
    }
}
