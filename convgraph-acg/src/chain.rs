//! Metropolis-Hastings driver for conversion graphs.
//!
//! Each step proposes a create or delete, scores the proposed graph with the
//! coalescent prior and a pluggable likelihood, and accepts or keeps the
//! current graph. Proposals never mutate the current graph, so rejection is
//! simply dropping the proposed one.

use std::collections::HashMap;

use convgraph_core::{ConvGraphError, RandomSource, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, trace};

use crate::coalescent::AcgCoalescent;
use crate::graph::ConversionGraph;
use crate::operator::{ConversionSwapOperator, MoveKind, Proposal};
use crate::population::PopulationFunction;

/// Data likelihood of a conversion graph.
pub trait LogLikelihood {
    fn log_likelihood(&self, graph: &ConversionGraph) -> Result<f64>;
}

/// Constant likelihood: the chain samples from the prior.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatLikelihood;

impl LogLikelihood for FlatLikelihood {
    fn log_likelihood(&self, _graph: &ConversionGraph) -> Result<f64> {
        Ok(0.0)
    }
}

/// Chain configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ChainConfig {
    pub n_steps: usize,
    pub sample_every: usize,
    pub burnin: usize,
    pub seed: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            n_steps: 10000,
            sample_every: 100,
            burnin: 1000,
            seed: 42,
        }
    }
}

impl ChainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_every == 0 {
            return Err(ConvGraphError::Config("sample_every must be > 0".into()));
        }
        Ok(())
    }
}

/// A single chain sample.
#[derive(Debug, Clone)]
pub struct ChainSample {
    pub step: usize,
    pub graph: ConversionGraph,
    pub log_likelihood: f64,
    pub log_prior: f64,
    pub log_posterior: f64,
}

/// Results from a chain run.
#[derive(Debug, Clone)]
pub struct ChainResult {
    pub samples: Vec<ChainSample>,
    /// Accepted fraction of proposals per move kind, rejections included.
    pub acceptance_rates: HashMap<MoveKind, f64>,
    pub final_graph: ConversionGraph,
}

/// Run a Metropolis-Hastings chain from `initial`.
///
/// # Errors
///
/// Fails on an invalid configuration, when `initial` is invalid or has zero
/// prior density, and when a proposal produces an invalid graph.
pub fn run_chain<P, Q, L>(
    initial: &ConversionGraph,
    prior: &AcgCoalescent<P>,
    operator: &ConversionSwapOperator<Q>,
    likelihood: &L,
    config: &ChainConfig,
) -> Result<ChainResult>
where
    P: PopulationFunction,
    Q: PopulationFunction,
    L: LogLikelihood + ?Sized,
{
    config.validate()?;
    initial.validate()?;

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut current = initial.clone();
    let mut current_ll = likelihood.log_likelihood(&current)?;
    let mut current_prior = prior.log_density(&current);
    if current_prior == f64::NEG_INFINITY {
        return Err(ConvGraphError::InvalidInput(
            "initial graph has zero prior density".into(),
        ));
    }

    info!(
        n_steps = config.n_steps,
        conversions = current.total_conv_count(),
        "starting chain"
    );

    let mut samples = Vec::new();
    let mut accept_counts: HashMap<MoveKind, (usize, usize)> = HashMap::new();

    for step in 0..config.n_steps {
        let (kind, proposal) = operator.propose(&current, &mut rng)?;
        let entry = accept_counts.entry(kind).or_insert((0, 0));
        entry.1 += 1;

        let mut accepted = false;
        if let Proposal::Applied {
            graph,
            log_hastings_ratio,
        } = proposal
        {
            let proposed_prior = prior.log_density(&graph);
            if proposed_prior > f64::NEG_INFINITY {
                let proposed_ll = likelihood.log_likelihood(&graph)?;
                let log_alpha = (proposed_ll + proposed_prior) - (current_ll + current_prior)
                    + log_hastings_ratio;
                accepted = log_alpha >= 0.0 || rng.next_f64() < log_alpha.exp();
                if accepted {
                    entry.0 += 1;
                    current = graph;
                    current_ll = proposed_ll;
                    current_prior = proposed_prior;
                }
            }
        }
        trace!(
            step,
            %kind,
            accepted,
            conversions = current.total_conv_count(),
            "chain step"
        );

        if step >= config.burnin && (step - config.burnin) % config.sample_every == 0 {
            samples.push(ChainSample {
                step,
                graph: current.clone(),
                log_likelihood: current_ll,
                log_prior: current_prior,
                log_posterior: current_ll + current_prior,
            });
        }
    }

    let acceptance_rates: HashMap<MoveKind, f64> = accept_counts
        .into_iter()
        .map(|(kind, (accepted, total))| {
            let rate = if total > 0 {
                accepted as f64 / total as f64
            } else {
                0.0
            };
            (kind, rate)
        })
        .collect();

    info!(
        samples = samples.len(),
        conversions = current.total_conv_count(),
        "chain finished"
    );

    Ok(ChainResult {
        samples,
        acceptance_rates,
        final_graph: current,
    })
}
