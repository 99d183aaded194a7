//! Reversible create/delete moves for conversions.
//!
//! Deleting a conversion does not just drop the edge: the departing lineage
//! is moved onto the conversion's path, so the clonal frame changes
//! topology. Creating a conversion is the exact mirror. Both moves share the
//! surgery in [`ConversionGraph::swap_lineage`] and the proposal densities
//! of [`ConversionSampler`], so each move's Hastings ratio is the negation
//! of the opposite move's.
//!
//! Surgery runs on a copy of the graph. A rejected proposal never touches
//! the caller's graph; an applied one hands back the new graph.

use std::fmt;

use convgraph_core::{RandomSource, Result};
use tracing::debug;

use crate::graph::{Conversion, ConversionGraph};
use crate::population::PopulationFunction;
use crate::sampling::ConversionSampler;

/// Which half of the move was proposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MoveKind {
    Delete,
    Create,
}

impl MoveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Create => "create",
        }
    }
}

impl fmt::Display for MoveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a proposal was rejected before scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Delete on a graph with no conversions.
    NoConversions,
    /// The chosen or drawn conversion departs and arrives on the same branch.
    InvisibleConversion,
    /// Another conversion attaches to the moved branch above the departure.
    AttachmentAbove,
    /// The surgery would leave a conversion departing from the root branch.
    DepartureAboveRoot,
    /// The drawn lineage never coalesced with the clonal frame.
    NoArrival,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::NoConversions => "no conversions to delete",
            Self::InvisibleConversion => "conversion is invisible",
            Self::AttachmentAbove => "conversion attached above departure point",
            Self::DepartureAboveRoot => "departure above root",
            Self::NoArrival => "lineage failed to coalesce",
        };
        f.write_str(msg)
    }
}

/// Outcome of a single proposal.
#[derive(Debug, Clone)]
pub enum Proposal {
    Applied {
        graph: ConversionGraph,
        log_hastings_ratio: f64,
    },
    Rejected(Rejection),
}

impl Proposal {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    pub fn log_hastings_ratio(&self) -> Option<f64> {
        match self {
            Self::Applied {
                log_hastings_ratio, ..
            } => Some(*log_hastings_ratio),
            Self::Rejected(_) => None,
        }
    }
}

/// Delete/create move on conversions with clonal-frame rewiring.
#[derive(Debug, Clone)]
pub struct ConversionSwapOperator<P> {
    sampler: ConversionSampler<P>,
}

impl<P: PopulationFunction> ConversionSwapOperator<P> {
    pub fn new(sampler: ConversionSampler<P>) -> Self {
        Self { sampler }
    }

    pub fn sampler(&self) -> &ConversionSampler<P> {
        &self.sampler
    }

    /// Propose a delete or a create with equal probability.
    pub fn propose(
        &self,
        graph: &ConversionGraph,
        rng: &mut impl RandomSource,
    ) -> Result<(MoveKind, Proposal)> {
        if rng.next_bool() {
            Ok((MoveKind::Create, self.propose_create(graph, rng)?))
        } else {
            Ok((MoveKind::Delete, self.propose_delete(graph, rng)?))
        }
    }

    /// Remove a uniformly chosen conversion, moving its departing lineage
    /// onto the conversion's path.
    ///
    /// Errors only when the rewired graph fails validation.
    pub fn propose_delete(
        &self,
        graph: &ConversionGraph,
        rng: &mut impl RandomSource,
    ) -> Result<Proposal> {
        let n = graph.total_conv_count();
        if n == 0 {
            return Ok(reject(MoveKind::Delete, Rejection::NoConversions));
        }

        let idx = rng.next_below(n);
        let conv = graph.conversions()[idx];
        if conv.is_invisible() {
            return Ok(reject(MoveKind::Delete, Rejection::InvisibleConversion));
        }
        if graph.has_endpoint_above(conv.node1, conv.height1) {
            return Ok(reject(MoveKind::Delete, Rejection::AttachmentAbove));
        }

        let mut work = graph.clone();
        work.remove_conversion_at(idx)?;
        let Some(swap) = work.swap_lineage(conv.node1, conv.node2, conv.height2)? else {
            return Ok(reject(MoveKind::Delete, Rejection::DepartureAboveRoot));
        };
        work.validate()?;

        // The conversion a create on `work` would have to draw to undo this.
        let reverse = Conversion {
            node2: swap.arrival_node,
            height2: swap.arrival_height,
            ..conv
        };
        let log_hastings_ratio = (n as f64).ln()
            + self.sampler.affected_region_log_prob(&work, &reverse)
            + self.sampler.edge_attachment_log_prob(&work, &reverse);

        debug!(idx, log_hastings_ratio, "delete applied");
        Ok(Proposal::Applied {
            graph: work,
            log_hastings_ratio,
        })
    }

    /// Draw a new conversion and move its departing lineage off the
    /// conversion's path, so that the conversion now carries the lineage's
    /// old route.
    pub fn propose_create(
        &self,
        graph: &ConversionGraph,
        rng: &mut impl RandomSource,
    ) -> Result<Proposal> {
        let region = self.sampler.draw_affected_region(graph, rng);
        let Some(edge) = self.sampler.attach_edge(graph, rng) else {
            return Ok(reject(MoveKind::Create, Rejection::NoArrival));
        };
        let drawn = Conversion {
            locus: region.locus,
            start_site: region.start_site,
            end_site: region.end_site,
            node1: edge.node1,
            height1: edge.height1,
            node2: edge.node2,
            height2: edge.height2,
        };
        if drawn.is_invisible() {
            return Ok(reject(MoveKind::Create, Rejection::InvisibleConversion));
        }
        if graph.has_endpoint_above(drawn.node1, drawn.height1) {
            return Ok(reject(MoveKind::Create, Rejection::AttachmentAbove));
        }

        let mut work = graph.clone();
        let Some(swap) = work.swap_lineage(drawn.node1, drawn.node2, drawn.height2)? else {
            return Ok(reject(MoveKind::Create, Rejection::DepartureAboveRoot));
        };
        work.add_conversion(Conversion {
            node2: swap.arrival_node,
            height2: swap.arrival_height,
            ..drawn
        })?;
        work.validate()?;

        let n_after = work.total_conv_count();
        let log_hastings_ratio = -(n_after as f64).ln()
            - self.sampler.affected_region_log_prob(graph, &drawn)
            - self.sampler.edge_attachment_log_prob(graph, &drawn);

        debug!(n_after, log_hastings_ratio, "create applied");
        Ok(Proposal::Applied {
            graph: work,
            log_hastings_ratio,
        })
    }
}

fn reject(kind: MoveKind, reason: Rejection) -> Proposal {
    debug!(%kind, %reason, "proposal rejected");
    Proposal::Rejected(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clonal_frame::ClonalFrame;
    use crate::graph::Locus;
    use crate::population::ConstantPopulation;
    use convgraph_core::{Draw, ReplaySource};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn graph() -> ConversionGraph {
        let frame = ClonalFrame::from_newick("((A:1,B:1)AB:2,C:3)R;").unwrap();
        ConversionGraph::new(frame, vec![Locus::new("l", 1000)]).unwrap()
    }

    fn operator() -> ConversionSwapOperator<ConstantPopulation> {
        let sampler = ConversionSampler::new(ConstantPopulation::new(1.0).unwrap(), 50.0).unwrap();
        ConversionSwapOperator::new(sampler)
    }

    fn conv(node1: usize, height1: f64, node2: usize, height2: f64) -> Conversion {
        Conversion {
            locus: 0,
            start_site: 100,
            end_site: 200,
            node1,
            height1,
            node2,
            height2,
        }
    }

    /// Keep proposing creates until one is applied.
    fn applied_create(
        op: &ConversionSwapOperator<ConstantPopulation>,
        g: &ConversionGraph,
        rng: &mut ChaCha8Rng,
    ) -> (ConversionGraph, f64) {
        for _ in 0..10_000 {
            if let Proposal::Applied {
                graph,
                log_hastings_ratio,
            } = op.propose_create(g, rng).unwrap()
            {
                return (graph, log_hastings_ratio);
            }
        }
        panic!("no create was applied");
    }

    #[test]
    fn delete_on_empty_graph_rejects() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let p = operator().propose_delete(&graph(), &mut rng).unwrap();
        assert!(matches!(p, Proposal::Rejected(Rejection::NoConversions)));
    }

    #[test]
    fn invisible_delete_always_rejects() {
        let mut g = graph();
        // Ids: R=0, AB=1, A=2, B=3, C=4.
        g.add_conversion(conv(2, 0.2, 2, 0.7)).unwrap();
        let before = g.clone();
        let op = operator();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        for _ in 0..50 {
            let p = op.propose_delete(&g, &mut rng).unwrap();
            assert!(matches!(p, Proposal::Rejected(Rejection::InvisibleConversion)));
        }
        assert_eq!(g, before);
    }

    #[test]
    fn delete_blocked_by_endpoint_above_departure() {
        let mut g = graph();
        g.add_conversion(conv(2, 0.2, 4, 2.0)).unwrap();
        g.add_conversion(conv(3, 0.1, 2, 0.8)).unwrap();
        let mut rng = ReplaySource::new([Draw::Below { n: 2, value: 0 }]);
        let p = operator().propose_delete(&g, &mut rng).unwrap();
        assert!(matches!(p, Proposal::Rejected(Rejection::AttachmentAbove)));
    }

    #[test]
    fn delete_moves_lineage_onto_conversion_path() {
        let mut g = graph();
        // A departs at 0.5 and joins C at 2.0.
        g.add_conversion(conv(2, 0.5, 4, 2.0)).unwrap();
        let mut rng = ReplaySource::new([Draw::Below { n: 1, value: 0 }]);
        let p = operator().propose_delete(&g, &mut rng).unwrap();
        let Proposal::Applied { graph: after, log_hastings_ratio } = p else {
            panic!("delete rejected");
        };
        assert_eq!(after.total_conv_count(), 0);
        let f = after.clonal_frame();
        // AB now joins A and C at 2.0; B hangs off the root.
        assert_eq!(f.parent(2), Some(1));
        assert_eq!(f.parent(4), Some(1));
        assert_eq!(f.height(1), 2.0);
        assert_eq!(f.parent(3), Some(0));
        assert!(log_hastings_ratio.is_finite());
        // The caller's graph is untouched.
        assert_eq!(g.total_conv_count(), 1);
    }

    #[test]
    fn create_then_delete_restores_graph() {
        let op = operator();
        for seed in 0..20 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut g = graph();
            while g.total_conv_count() < 2 {
                let c = op.sampler().draw_conversion(&g, &mut rng).unwrap();
                if !c.is_invisible() {
                    g.add_conversion(c).unwrap();
                }
            }

            let (created, create_ratio) = applied_create(&op, &g, &mut rng);
            assert_eq!(created.total_conv_count(), 3);

            let mut replay = ReplaySource::new([Draw::Below { n: 3, value: 2 }]);
            let p = op.propose_delete(&created, &mut replay).unwrap();
            let Proposal::Applied { graph: restored, log_hastings_ratio } = p else {
                panic!("seed {seed}: reverse delete rejected");
            };

            assert!(restored.clonal_frame().is_equivalent(g.clonal_frame(), 0.0));
            assert_eq!(restored.conversions(), g.conversions());
            assert!(
                (create_ratio + log_hastings_ratio).abs() < 1e-9,
                "seed {seed}: {create_ratio} vs {log_hastings_ratio}"
            );
        }
    }

    #[test]
    fn propose_reports_move_kind() {
        let op = operator();
        let g = graph();
        let mut rng = ReplaySource::new([Draw::Bool(false)]);
        let (kind, p) = op.propose(&g, &mut rng).unwrap();
        assert_eq!(kind, MoveKind::Delete);
        assert!(!p.is_applied());
        assert_eq!(p.log_hastings_ratio(), None);
        assert_eq!(kind.to_string(), "delete");
    }
}
