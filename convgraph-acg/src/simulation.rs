//! Forward simulation of clonal frames and conversion graphs.
//!
//! Clonal frames are drawn from the standard coalescent for a population
//! function: with `k` lineages the pairwise coalescence rate is
//! `k(k-1)/2 / N(t)`, so waiting times are unit exponentials pushed through
//! the inverse of the population intensity. Conversions are then added with
//! a Poisson count and drawn by [`ConversionSampler`].

use convgraph_core::{ConvGraphError, RandomSource, Result};
use tracing::debug;

use crate::clonal_frame::{ClonalFrame, Node, NodeId};
use crate::coalescent::CoalescentParams;
use crate::graph::{ConversionGraph, Locus};
use crate::population::PopulationFunction;
use crate::sampling::ConversionSampler;

/// Simulate a clonal frame with `n_samples` contemporaneous leaves.
///
/// Leaves are named `tip_{i}` and sit at height zero.
///
/// # Errors
///
/// Returns an error if `n_samples < 2`, or if the population function lets
/// lineages survive forever without coalescing.
pub fn simulate_clonal_frame<P: PopulationFunction + ?Sized>(
    n_samples: usize,
    population: &P,
    rng: &mut impl RandomSource,
) -> Result<ClonalFrame> {
    if n_samples < 2 {
        return Err(ConvGraphError::InvalidInput(
            "n_samples must be >= 2".into(),
        ));
    }

    let mut nodes: Vec<Node> = (0..n_samples)
        .map(|i| Node {
            id: i,
            parent: None,
            children: Vec::new(),
            height: 0.0,
            name: Some(format!("tip_{}", i)),
        })
        .collect();
    let mut lineages: Vec<NodeId> = (0..n_samples).collect();
    let mut current_time = 0.0;

    while lineages.len() > 1 {
        let k = lineages.len();
        let pairs = (k * (k - 1)) as f64 / 2.0;
        let wait = -(1.0 - rng.next_f64()).ln() / pairs;
        current_time = population.inverse_intensity(population.intensity(current_time) + wait);
        if !current_time.is_finite() {
            return Err(ConvGraphError::InvalidInput(format!(
                "{k} lineages never coalesce under {population:?}"
            )));
        }

        let idx1 = rng.next_below(k);
        let mut idx2 = rng.next_below(k - 1);
        if idx2 >= idx1 {
            idx2 += 1;
        }
        let (child1, child2) = (lineages[idx1], lineages[idx2]);

        let new_id = nodes.len();
        nodes.push(Node {
            id: new_id,
            parent: None,
            children: vec![child1, child2],
            height: current_time,
            name: None,
        });
        nodes[child1].parent = Some(new_id);
        nodes[child2].parent = Some(new_id);

        // Higher index first so the lower one stays valid.
        lineages.swap_remove(idx1.max(idx2));
        lineages.swap_remove(idx1.min(idx2));
        lineages.push(new_id);
    }

    let root = nodes.len() - 1;
    ClonalFrame::from_nodes(nodes, root)
}

/// Add conversions to `frame` under the coalescent with gene conversion.
///
/// The conversion count is Poisson with mean `ρ · L_cf · (T + n_loci · δ)`;
/// the count bounds in `params` are not applied.
pub fn simulate_acg<P: PopulationFunction + Clone>(
    frame: ClonalFrame,
    loci: Vec<Locus>,
    params: &CoalescentParams,
    population: &P,
    rng: &mut impl RandomSource,
) -> Result<ConversionGraph> {
    params.validate()?;
    let sampler = ConversionSampler::new(population.clone(), params.delta)?;
    let mut graph = ConversionGraph::new(frame, loci)?;

    let mean = params.rho
        * graph.clonal_frame_length()
        * (graph.total_sequence_length() as f64 + graph.loci().len() as f64 * params.delta);
    let count = poisson(mean, rng);

    for _ in 0..count {
        let conv = sampler.draw_conversion(&graph, rng).ok_or_else(|| {
            ConvGraphError::Other("conversion lineage failed to coalesce".into())
        })?;
        graph.add_conversion(conv)?;
    }

    debug!(count, mean, "simulated conversion graph");
    Ok(graph)
}

/// Poisson draw by counting unit-rate arrivals before `mean`.
fn poisson(mean: f64, rng: &mut impl RandomSource) -> usize {
    let mut count = 0;
    let mut t = -(1.0 - rng.next_f64()).ln();
    while t <= mean {
        count += 1;
        t -= (1.0 - rng.next_f64()).ln();
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::{ConstantPopulation, ExponentialGrowth};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn simulated_frame_is_valid() {
        let pop = ConstantPopulation::new(2.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let f = simulate_clonal_frame(8, &pop, &mut rng).unwrap();
        assert_eq!(f.node_count(), 15);
        assert_eq!(f.leaf_count(), 8);
        f.validate().unwrap();
        assert!(f.leaves().iter().all(|&l| f.height(l) == 0.0));
        assert_eq!(f.nodes()[3].name.as_deref(), Some("tip_3"));
    }

    #[test]
    fn rejects_too_few_samples() {
        let pop = ConstantPopulation::new(1.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(simulate_clonal_frame(1, &pop, &mut rng).is_err());
    }

    #[test]
    fn two_sample_root_height_has_mean_pop_size() {
        let pop = ConstantPopulation::new(1.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let reps = 4000;
        let total: f64 = (0..reps)
            .map(|_| {
                let f = simulate_clonal_frame(2, &pop, &mut rng).unwrap();
                f.height(f.root())
            })
            .sum();
        let mean = total / reps as f64;
        assert!((mean - 1.0).abs() < 0.1, "mean root height {mean}");
    }

    #[test]
    fn growth_shortens_trees() {
        let constant = ConstantPopulation::new(1.0).unwrap();
        let growth = ExponentialGrowth::new(1.0, 2.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mean_height = |pop: &dyn PopulationFunction, rng: &mut ChaCha8Rng| {
            (0..500)
                .map(|_| {
                    let f = simulate_clonal_frame(6, pop, rng).unwrap();
                    f.height(f.root())
                })
                .sum::<f64>()
                / 500.0
        };
        let h_const = mean_height(&constant as &dyn PopulationFunction, &mut rng);
        let h_growth = mean_height(&growth as &dyn PopulationFunction, &mut rng);
        assert!(h_growth < h_const);
    }

    #[test]
    fn conversion_count_matches_poisson_mean() {
        let pop = ConstantPopulation::new(1.0).unwrap();
        // mean = 0.01 * 2 * (100 + 10) = 2.2
        let params = CoalescentParams::new(0.01, 10.0);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let reps = 2000;
        let mut total = 0;
        for _ in 0..reps {
            let frame = ClonalFrame::from_newick("(A:1,B:1);").unwrap();
            let g = simulate_acg(frame, vec![Locus::new("l", 100)], &params, &pop, &mut rng).unwrap();
            g.validate().unwrap();
            total += g.total_conv_count();
        }
        let mean = total as f64 / reps as f64;
        assert!((mean - 2.2).abs() < 0.15, "mean count {mean}");
    }

    #[test]
    fn zero_rate_gives_clonal_graph() {
        let pop = ConstantPopulation::new(1.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let frame = simulate_clonal_frame(5, &pop, &mut rng).unwrap();
        let g = simulate_acg(
            frame,
            vec![Locus::new("l", 1000)],
            &CoalescentParams::new(0.0, 100.0),
            &pop,
            &mut rng,
        )
        .unwrap();
        assert_eq!(g.total_conv_count(), 0);
    }
}
