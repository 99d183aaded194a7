//! Proposal distributions for new conversions.
//!
//! A conversion is drawn in two independent parts: the affected sites and the
//! attachment edge. Each draw has a matching log-probability function so the
//! operator can score the reverse move on any graph.

use convgraph_core::{RandomSource, Result};

use crate::clonal_frame::NodeId;
use crate::coalescent::{attachment_log_density, validate_delta};
use crate::events::interval_index;
use crate::graph::{Conversion, ConversionGraph, LocusId};
use crate::population::PopulationFunction;

/// Sites carried by a proposed conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffectedRegion {
    pub locus: LocusId,
    pub start_site: usize,
    pub end_site: usize,
}

/// Departure and arrival points of a proposed conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attachment {
    pub node1: NodeId,
    pub height1: f64,
    pub node2: NodeId,
    pub height2: f64,
}

/// Draws conversions from the coalescent-with-conversion proposal.
#[derive(Debug, Clone)]
pub struct ConversionSampler<P> {
    population: P,
    delta: f64,
}

impl<P: PopulationFunction> ConversionSampler<P> {
    pub fn new(population: P, delta: f64) -> Result<Self> {
        validate_delta(delta)?;
        Ok(Self { population, delta })
    }

    pub fn population(&self) -> &P {
        &self.population
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// Draw the sites of a new conversion.
    ///
    /// The start site has mass `δ + 1` at the first site of every locus and
    /// `1` elsewhere. The tract length is geometric with mean `δ`, truncated
    /// at the end of the locus.
    pub fn draw_affected_region(
        &self,
        graph: &ConversionGraph,
        rng: &mut impl RandomSource,
    ) -> AffectedRegion {
        let delta = self.delta;
        let alpha = graph.loci().len() as f64 * delta + graph.total_sequence_length() as f64;
        let mut u = rng.next_f64() * alpha;

        let last = graph.loci().len() - 1;
        let mut locus = last;
        for (id, l) in graph.loci().iter().enumerate() {
            let mass = delta + l.site_count() as f64;
            if u < mass || id == last {
                locus = id;
                break;
            }
            u -= mass;
        }

        let site_count = graph.locus(locus).map_or(1, |l| l.site_count());
        let start_site = if u < delta + 1.0 {
            0
        } else {
            (1 + (u - delta - 1.0).floor() as usize).min(site_count - 1)
        };

        let p = 1.0 / delta;
        let tract = if p >= 1.0 {
            0.0
        } else {
            ((1.0 - rng.next_f64()).ln() / (1.0 - p).ln()).floor()
        };
        let max_tract = site_count - 1 - start_site;
        let end_site = if tract >= max_tract as f64 {
            site_count - 1
        } else {
            start_site + tract as usize
        };

        AffectedRegion {
            locus,
            start_site,
            end_site,
        }
    }

    /// Log-probability of drawing `conv`'s sites.
    pub fn affected_region_log_prob(&self, graph: &ConversionGraph, conv: &Conversion) -> f64 {
        let delta = self.delta;
        let alpha = graph.loci().len() as f64 * delta + graph.total_sequence_length() as f64;
        let Some(locus) = graph.locus(conv.locus) else {
            return f64::NEG_INFINITY;
        };

        let mut log_p = if conv.start_site == 0 {
            ((delta + 1.0) / alpha).ln()
        } else {
            (1.0 / alpha).ln()
        };

        let q = 1.0 - 1.0 / delta;
        let tract = (conv.end_site - conv.start_site) as f64;
        log_p += if conv.end_site + 1 == locus.site_count() {
            q.powf(tract).ln()
        } else {
            (q.powf(tract) / delta).ln()
        };
        log_p
    }

    /// Draw departure and arrival points on the clonal frame.
    ///
    /// Returns `None` when the converting lineage never coalesces, which
    /// happens only for population functions whose intensity is bounded.
    pub fn attach_edge(
        &self,
        graph: &ConversionGraph,
        rng: &mut impl RandomSource,
    ) -> Option<Attachment> {
        let frame = graph.clonal_frame();

        let mut u = rng.next_f64() * graph.clonal_frame_length();
        let mut departure = None;
        for node in frame.nodes() {
            if frame.is_root(node.id) {
                continue;
            }
            let len = frame.branch_length(node.id);
            departure = Some((node.id, node.height + u.min(len)));
            if u < len {
                break;
            }
            u -= len;
        }
        let (node1, height1) = departure?;

        let events = graph.cf_events();
        let mut height2 = None;
        for i in interval_index(&events, height1)..events.len() {
            let k = events[i].lineage_count;
            let t0 = events[i].height.max(height1);
            let t1 = events.get(i + 1).map_or(f64::INFINITY, |e| e.height);
            if k == 0 || t1 <= t0 {
                continue;
            }
            let e = -(1.0 - rng.next_f64()).ln();
            let t = self
                .population
                .inverse_intensity(self.population.intensity(t0) + e / k as f64);
            if t < t1 {
                height2 = Some(t);
                break;
            }
        }
        let height2 = height2?;

        let lineages = frame.lineages_at(height2);
        if lineages.is_empty() {
            return None;
        }
        let node2 = lineages[rng.next_below(lineages.len())];

        Some(Attachment {
            node1,
            height1,
            node2,
            height2,
        })
    }

    /// Log-density of drawing `conv`'s departure and arrival on `graph`.
    pub fn edge_attachment_log_prob(&self, graph: &ConversionGraph, conv: &Conversion) -> f64 {
        attachment_log_density(
            &self.population,
            &graph.cf_events(),
            graph.clonal_frame_length(),
            conv,
        )
    }

    /// Draw a complete conversion.
    pub fn draw_conversion(
        &self,
        graph: &ConversionGraph,
        rng: &mut impl RandomSource,
    ) -> Option<Conversion> {
        let region = self.draw_affected_region(graph, rng);
        let edge = self.attach_edge(graph, rng)?;
        Some(Conversion {
            locus: region.locus,
            start_site: region.start_site,
            end_site: region.end_site,
            node1: edge.node1,
            height1: edge.height1,
            node2: edge.node2,
            height2: edge.height2,
        })
    }

    /// Combined log-probability of [`ConversionSampler::draw_conversion`].
    pub fn conversion_log_prob(&self, graph: &ConversionGraph, conv: &Conversion) -> f64 {
        self.affected_region_log_prob(graph, conv) + self.edge_attachment_log_prob(graph, conv)
    }
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

    fn graph(loci: Vec<Locus>) -> ConversionGraph {
        let frame = ClonalFrame::from_newick("((A:1,B:1)AB:2,C:3)R;").unwrap();
        ConversionGraph::new(frame, loci).unwrap()
    }

    fn sampler(delta: f64) -> ConversionSampler<ConstantPopulation> {
        ConversionSampler::new(ConstantPopulation::new(1.0).unwrap(), delta).unwrap()
    }

    #[test]
    fn rejects_short_tracts() {
        let pop = ConstantPopulation::new(1.0).unwrap();
        assert!(ConversionSampler::new(pop, 0.5).is_err());
        assert!(ConversionSampler::new(pop, f64::INFINITY).is_err());
    }

    #[test]
    fn region_draw_maps_uniforms_to_sites() {
        let g = graph(vec![Locus::new("a", 100), Locus::new("b", 100)]);
        let s = sampler(5.0);
        // alpha = 2*5 + 200 = 210; locus a holds [0, 105).
        let mut rng = ReplaySource::from_reals(&[0.0, 0.0]);
        let r = s.draw_affected_region(&g, &mut rng);
        assert_eq!((r.locus, r.start_site, r.end_site), (0, 0, 0));

        let mut rng = ReplaySource::from_reals(&[6.5 / 210.0, 0.0]);
        let r = s.draw_affected_region(&g, &mut rng);
        assert_eq!((r.locus, r.start_site), (0, 1));

        let mut rng = ReplaySource::from_reals(&[110.0 / 210.0, 0.0]);
        let r = s.draw_affected_region(&g, &mut rng);
        assert_eq!((r.locus, r.start_site), (1, 0));
        assert_eq!(rng.remaining(), 0);
    }

    #[test]
    fn long_tract_is_truncated_at_locus_end() {
        let g = graph(vec![Locus::new("a", 100)]);
        let s = sampler(5.0);
        let mut rng = ReplaySource::from_reals(&[100.0 / 105.0, 1.0 - 1e-12]);
        let r = s.draw_affected_region(&g, &mut rng);
        assert_eq!(r.end_site, 99);
        assert!(r.start_site > 90);
    }

    #[test]
    fn region_probabilities_sum_to_one() {
        let g = graph(vec![Locus::new("a", 4), Locus::new("b", 6)]);
        for delta in [1.0, 2.0, 7.5] {
            let s = sampler(delta);
            let mut total = 0.0;
            for (locus, l) in g.loci().iter().enumerate() {
                for start in 0..l.site_count() {
                    for end in start..l.site_count() {
                        let conv = Conversion {
                            locus,
                            start_site: start,
                            end_site: end,
                            node1: 0,
                            height1: 0.0,
                            node2: 0,
                            height2: 0.0,
                        };
                        total += s.affected_region_log_prob(&g, &conv).exp();
                    }
                }
            }
            assert!((total - 1.0).abs() < 1e-12, "delta {delta}: {total}");
        }
    }

    #[test]
    fn edge_draw_follows_replayed_uniforms() {
        let frame = ClonalFrame::from_newick("(A:1,B:1);").unwrap();
        let g = ConversionGraph::new(frame, vec![Locus::new("l", 10)]).unwrap();
        let s = sampler(5.0);
        // Departure at 0.25 * 2 = 0.5 on A; E = ln 2 with two lineages.
        let mut rng = ReplaySource::new([
            Draw::Real(0.25),
            Draw::Real(0.5),
            Draw::Below { n: 2, value: 1 },
        ]);
        let edge = s.attach_edge(&g, &mut rng).unwrap();
        assert_eq!(edge.node1, 1);
        assert!((edge.height1 - 0.5).abs() < 1e-12);
        assert_eq!(edge.node2, 2);
        assert!((edge.height2 - (0.5 + 2f64.ln() / 2.0)).abs() < 1e-12);
    }

    #[test]
    fn edge_draw_crosses_into_root_interval() {
        let frame = ClonalFrame::from_newick("(A:1,B:1);").unwrap();
        let g = ConversionGraph::new(frame, vec![Locus::new("l", 10)]).unwrap();
        let s = sampler(5.0);
        // First exponential overshoots [0.5, 1); second lands at 1 + ln 2.
        let mut rng = ReplaySource::new([
            Draw::Real(0.25),
            Draw::Real(0.9),
            Draw::Real(0.5),
            Draw::Below { n: 1, value: 0 },
        ]);
        let edge = s.attach_edge(&g, &mut rng).unwrap();
        assert_eq!(edge.node2, 0);
        assert!((edge.height2 - (1.0 + 2f64.ln())).abs() < 1e-12);
    }

    #[test]
    fn drawn_conversions_are_valid_with_finite_density() {
        let mut g = graph(vec![Locus::new("a", 500), Locus::new("b", 300)]);
        let s = sampler(20.0);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..200 {
            let conv = s.draw_conversion(&g, &mut rng).unwrap();
            assert!(s.conversion_log_prob(&g, &conv).is_finite());
            g.add_conversion(conv).unwrap();
        }
        g.validate().unwrap();
    }
}
