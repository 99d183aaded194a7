//! Site regions of constant active conversion set.

use convgraph_core::{ConvGraphError, Result};

use crate::graph::{Conversion, ConversionGraph, LocusId};

/// A maximal site interval `[start, end)` of one locus over which the set
/// of conversions covering every site is constant.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub locus: LocusId,
    pub start: usize,
    /// Exclusive.
    pub end: usize,
    /// Conversions covering the whole interval.
    pub active: Vec<Conversion>,
}

impl Region {
    pub fn site_count(&self) -> usize {
        self.end - self.start
    }

    /// True if no conversion is active: the marginal tree is the clonal frame.
    pub fn is_clonal(&self) -> bool {
        self.active.is_empty()
    }
}

/// Partition `locus` into regions.
///
/// Boundaries fall only on conversion start sites and one past their end
/// sites; the regions are disjoint and their union is `[0, site_count)`.
pub fn regions(graph: &ConversionGraph, locus: LocusId) -> Result<Vec<Region>> {
    let site_count = graph
        .locus(locus)
        .ok_or_else(|| ConvGraphError::InvalidInput(format!("unknown locus {locus}")))?
        .site_count();

    let mut bounds = vec![0, site_count];
    for conv in graph.locus_conversions(locus) {
        bounds.push(conv.start_site);
        bounds.push((conv.end_site + 1).min(site_count));
    }
    bounds.sort_unstable();
    bounds.dedup();

    Ok(bounds
        .windows(2)
        .map(|w| {
            let (start, end) = (w[0], w[1]);
            Region {
                locus,
                start,
                end,
                active: graph
                    .locus_conversions(locus)
                    .filter(|c| c.covers(start, end))
                    .copied()
                    .collect(),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clonal_frame::ClonalFrame;
    use crate::graph::Locus;

    fn graph(site_count: usize) -> ConversionGraph {
        let frame = ClonalFrame::from_newick("(A:1,B:1);").unwrap();
        ConversionGraph::new(frame, vec![Locus::new("l", site_count)]).unwrap()
    }

    fn conv(start: usize, end: usize) -> Conversion {
        Conversion {
            locus: 0,
            start_site: start,
            end_site: end,
            node1: 1,
            height1: 0.2,
            node2: 2,
            height2: 0.8,
        }
    }

    #[test]
    fn no_conversions_single_region() {
        let g = graph(100);
        let r = g.regions(0).unwrap();
        assert_eq!(r.len(), 1);
        assert_eq!((r[0].start, r[0].end), (0, 100));
        assert!(r[0].is_clonal());
    }

    #[test]
    fn single_conversion_three_regions() {
        let mut g = graph(10_000);
        let c = conv(500, 1299);
        g.add_conversion(c).unwrap();
        let r = g.regions(0).unwrap();
        let spans: Vec<(usize, usize)> = r.iter().map(|x| (x.start, x.end)).collect();
        assert_eq!(spans, vec![(0, 500), (500, 1300), (1300, 10_000)]);
        assert!(r[0].active.is_empty());
        assert_eq!(r[1].active, vec![c]);
        assert!(r[2].active.is_empty());
        assert_eq!(r.iter().map(Region::site_count).sum::<usize>(), 10_000);
    }

    #[test]
    fn conversion_at_locus_edges() {
        let mut g = graph(50);
        g.add_conversion(conv(0, 49)).unwrap();
        let r = g.regions(0).unwrap();
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].active.len(), 1);
    }

    #[test]
    fn overlapping_conversions() {
        let mut g = graph(100);
        g.add_conversion(conv(10, 59)).unwrap();
        g.add_conversion(conv(40, 79)).unwrap();
        let r = g.regions(0).unwrap();
        let summary: Vec<(usize, usize, usize)> =
            r.iter().map(|x| (x.start, x.end, x.active.len())).collect();
        assert_eq!(
            summary,
            vec![(0, 10, 0), (10, 40, 1), (40, 60, 2), (60, 80, 1), (80, 100, 0)]
        );
    }

    #[test]
    fn adjacent_regions_differ() {
        let mut g = graph(100);
        g.add_conversion(conv(10, 19)).unwrap();
        g.add_conversion(conv(20, 29)).unwrap();
        let r = g.regions(0).unwrap();
        for pair in r.windows(2) {
            assert_ne!(pair[0].active, pair[1].active);
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn unknown_locus() {
        assert!(graph(10).regions(3).is_err());
    }
}
