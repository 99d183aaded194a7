//! The ancestral conversion graph: a clonal frame plus conversion edges.

use convgraph_core::{Annotated, ConvGraphError, Result, Summarizable};
use tracing::debug;

use crate::clonal_frame::{ClonalFrame, NodeId};
use crate::events::{cf_events, CfEvent};
use crate::marginal::MarginalTree;
use crate::region::{regions, Region};

/// Index into the graph's locus list.
pub type LocusId = usize;

/// An aligned locus: a contiguous run of sites sharing one clonal frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Locus {
    name: String,
    site_count: usize,
}

impl Locus {
    pub fn new(name: impl Into<String>, site_count: usize) -> Self {
        Self {
            name: name.into(),
            site_count,
        }
    }

    pub fn site_count(&self) -> usize {
        self.site_count
    }
}

impl Annotated for Locus {
    fn name(&self) -> &str {
        &self.name
    }
}

/// A gene-conversion edge.
///
/// The converting lineage leaves the clonal frame on the branch above
/// `node1` at `height1` and rejoins the branch above `node2` at `height2`,
/// carrying sites `start_site..=end_site` of `locus`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Conversion {
    pub locus: LocusId,
    pub start_site: usize,
    pub end_site: usize,
    pub node1: NodeId,
    pub height1: f64,
    pub node2: NodeId,
    pub height2: f64,
}

impl Conversion {
    /// Departure and arrival on the same branch: no marginal tree changes.
    pub fn is_invisible(&self) -> bool {
        self.node1 == self.node2
    }

    /// True if the conversion covers every site of `start..end` (end exclusive).
    pub fn covers(&self, start: usize, end: usize) -> bool {
        self.start_site <= start && end <= self.end_site + 1
    }

    /// True if either endpoint lies on `node`'s branch strictly above `height`.
    pub fn attaches_above(&self, node: NodeId, height: f64) -> bool {
        (self.node1 == node && self.height1 > height)
            || (self.node2 == node && self.height2 > height)
    }
}

/// Outcome of [`ConversionGraph::swap_lineage`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineageSwap {
    /// The branch that now carries the moved lineage's former path at
    /// `arrival_height`.
    pub arrival_node: NodeId,
    /// Height the moved lineage's parent had before the swap.
    pub arrival_height: f64,
}

/// Clonal frame plus an unordered set of conversions, each tagged with a locus.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConversionGraph {
    frame: ClonalFrame,
    loci: Vec<Locus>,
    conversions: Vec<Conversion>,
}

impl ConversionGraph {
    /// Create a graph with no conversions.
    ///
    /// Fails with a configuration error when `loci` is empty or a locus has
    /// no sites.
    pub fn new(frame: ClonalFrame, loci: Vec<Locus>) -> Result<Self> {
        if loci.is_empty() {
            return Err(ConvGraphError::Config("graph needs at least one locus".into()));
        }
        if let Some(empty) = loci.iter().find(|l| l.site_count == 0) {
            return Err(ConvGraphError::Config(format!(
                "locus '{}' has no sites",
                empty.name
            )));
        }
        for (i, a) in loci.iter().enumerate() {
            if loci[..i].iter().any(|b| b.name == a.name) {
                return Err(ConvGraphError::Config(format!(
                    "duplicate locus name '{}'",
                    a.name
                )));
            }
        }
        frame.validate()?;
        Ok(Self {
            frame,
            loci,
            conversions: Vec::new(),
        })
    }

    /// Parse the extended Newick encoding produced by
    /// [`ConversionGraph::to_extended_newick`].
    pub fn from_extended_newick(input: &str, loci: Vec<Locus>) -> Result<Self> {
        crate::newick::parse_acg(input, loci)
    }

    /// Serialize to extended Newick: conversion records, then the frame.
    pub fn to_extended_newick(&self) -> String {
        crate::newick::write_acg(self)
    }

    pub fn clonal_frame(&self) -> &ClonalFrame {
        &self.frame
    }

    /// Mutable access to the frame for topology operators.
    ///
    /// Conversions are not updated; the caller must restore every invariant
    /// checked by [`ConversionGraph::validate`] before the graph is read.
    pub fn clonal_frame_mut(&mut self) -> &mut ClonalFrame {
        &mut self.frame
    }

    pub fn loci(&self) -> &[Locus] {
        &self.loci
    }

    pub fn locus(&self, id: LocusId) -> Option<&Locus> {
        self.loci.get(id)
    }

    /// Look up a locus id by name.
    pub fn locus_id(&self, name: &str) -> Option<LocusId> {
        self.loci.iter().position(|l| l.name == name)
    }

    /// All conversions across all loci.
    pub fn conversions(&self) -> &[Conversion] {
        &self.conversions
    }

    /// Conversions on one locus.
    pub fn locus_conversions(&self, locus: LocusId) -> impl Iterator<Item = &Conversion> + '_ {
        self.conversions.iter().filter(move |c| c.locus == locus)
    }

    pub fn total_conv_count(&self) -> usize {
        self.conversions.len()
    }

    /// Sum of the site counts of all loci.
    pub fn total_sequence_length(&self) -> usize {
        self.loci.iter().map(|l| l.site_count).sum()
    }

    /// Total branch length of the clonal frame.
    pub fn clonal_frame_length(&self) -> f64 {
        self.frame.total_branch_length()
    }

    /// Sample/coalescence events of the clonal frame, ascending in height.
    pub fn cf_events(&self) -> Vec<CfEvent> {
        cf_events(&self.frame)
    }

    /// Partition of `locus` into regions of constant active conversion set.
    pub fn regions(&self, locus: LocusId) -> Result<Vec<Region>> {
        regions(self, locus)
    }

    /// Marginal tree of one region.
    pub fn marginal_tree(&self, region: &Region) -> Result<MarginalTree> {
        MarginalTree::build(&self.frame, &region.active)
    }

    /// Append a conversion.
    ///
    /// Checks the locus, site range, node references and `height1 <= height2`,
    /// reporting a broken rule as [`ConvGraphError::InvariantViolation`]. An
    /// exact copy of a conversion already in the graph is invalid input.
    pub fn add_conversion(&mut self, conv: Conversion) -> Result<()> {
        self.check_conversion(&conv)?;
        if self.conversions.contains(&conv) {
            return Err(ConvGraphError::InvalidInput(format!(
                "conversion {conv:?} is already in the graph"
            )));
        }
        self.conversions.push(conv);
        Ok(())
    }

    /// Remove a conversion equal to `conv`.
    pub fn delete_conversion(&mut self, conv: &Conversion) -> Result<Conversion> {
        let idx = self
            .conversions
            .iter()
            .position(|c| c == conv)
            .ok_or_else(|| {
                ConvGraphError::InvalidInput(format!("conversion {conv:?} not in graph"))
            })?;
        Ok(self.conversions.remove(idx))
    }

    /// Remove the conversion at `idx` in [`ConversionGraph::conversions`] order.
    pub fn remove_conversion_at(&mut self, idx: usize) -> Result<Conversion> {
        if idx >= self.conversions.len() {
            return Err(ConvGraphError::InvalidInput(format!(
                "conversion index {} out of range ({})",
                idx,
                self.conversions.len()
            )));
        }
        Ok(self.conversions.remove(idx))
    }

    /// True if any conversion has an endpoint on `node`'s branch above `height`.
    pub fn has_endpoint_above(&self, node: NodeId, height: f64) -> bool {
        self.conversions
            .iter()
            .any(|c| c.attaches_above(node, height))
    }

    /// Re-point conversion endpoints on `from`'s branch to `to`.
    ///
    /// With `above = Some(h)` only endpoints strictly above `h` move.
    pub fn redirect_endpoints(&mut self, from: NodeId, to: NodeId, above: Option<f64>) {
        let floor = above.unwrap_or(f64::NEG_INFINITY);
        for conv in &mut self.conversions {
            if conv.node1 == from && conv.height1 > floor {
                conv.node1 = to;
            }
            if conv.node2 == from && conv.height2 > floor {
                conv.node2 = to;
            }
        }
    }

    /// Move `node1` and its parent so that `node1`'s lineage joins the branch
    /// above `target` at `height`, carrying conversion endpoints along.
    ///
    /// The parent `P` is removed and its sibling `S` promoted; endpoints on
    /// `P`'s old branch move to `S`. `P` is then re-inserted above `target`
    /// at `height` and endpoints on `target` above `height` move to `P`.
    /// The returned [`LineageSwap`] names the branch that carries `S`'s old
    /// path at `P`'s former height: the point the opposite move would have to
    /// choose to undo this swap.
    ///
    /// Returns `Ok(None)` when the swap would leave a conversion departing
    /// from above the root; the graph is then partially edited and must be
    /// discarded. The caller rules out endpoints on `node1`'s branch that the
    /// move would strand.
    pub fn swap_lineage(
        &mut self,
        node1: NodeId,
        target: NodeId,
        height: f64,
    ) -> Result<Option<LineageSwap>> {
        let detached = self.frame.detach(node1)?;
        let (parent, sibling) = (detached.parent, detached.sibling);
        self.redirect_endpoints(parent, sibling, None);

        let target = if target == parent { sibling } else { target };
        self.redirect_endpoints(target, parent, Some(height));
        self.frame.graft(parent, target, height)?;

        let root = self.frame.root();
        if self.conversions.iter().any(|c| c.node1 == root) {
            debug!(node1, target, height, "swap leaves a departure above the root");
            return Ok(None);
        }

        Ok(Some(LineageSwap {
            arrival_node: self.frame.lineage_at(sibling, detached.old_height),
            arrival_height: detached.old_height,
        }))
    }

    /// Check every graph invariant, naming the first violation found.
    pub fn validate(&self) -> Result<()> {
        self.frame.validate()?;
        for conv in &self.conversions {
            self.check_conversion(conv)?;
        }
        Ok(())
    }

    fn check_conversion(&self, conv: &Conversion) -> Result<()> {
        let entity = || {
            format!(
                "conversion {}:{}-{} ({}@{} -> {}@{})",
                conv.locus,
                conv.start_site,
                conv.end_site,
                conv.node1,
                conv.height1,
                conv.node2,
                conv.height2
            )
        };
        let locus = self.loci.get(conv.locus).ok_or_else(|| {
            ConvGraphError::invariant("locus-exists", entity(), "unknown locus")
        })?;
        if conv.start_site > conv.end_site || conv.end_site >= locus.site_count {
            return Err(ConvGraphError::invariant(
                "site-range",
                entity(),
                format!("sites must satisfy start <= end < {}", locus.site_count),
            ));
        }
        for node in [conv.node1, conv.node2] {
            if !self.frame.contains(node) {
                return Err(ConvGraphError::invariant(
                    "node-exists",
                    entity(),
                    format!("node {node} is not in the clonal frame"),
                ));
            }
        }
        if !(conv.height1 <= conv.height2) {
            return Err(ConvGraphError::invariant(
                "height1<=height2",
                entity(),
                "departure above arrival",
            ));
        }
        if self.frame.is_root(conv.node1) || !self.on_branch(conv.node1, conv.height1) {
            return Err(ConvGraphError::invariant(
                "departure-on-branch",
                entity(),
                "departure height outside the branch above node1",
            ));
        }
        if !self.on_branch(conv.node2, conv.height2) {
            return Err(ConvGraphError::invariant(
                "arrival-on-branch",
                entity(),
                "arrival height outside the branch above node2",
            ));
        }
        Ok(())
    }

    /// Closed-interval version of [`ClonalFrame::spans`].
    fn on_branch(&self, node: NodeId, height: f64) -> bool {
        height >= self.frame.height(node)
            && self
                .frame
                .parent(node)
                .map_or(true, |p| height <= self.frame.height(p))
    }
}

impl Summarizable for ConversionGraph {
    fn summary(&self) -> String {
        format!(
            "ConversionGraph: {} leaves, {} conversions over {} loci ({} sites), clonal frame length {:.4}",
            self.frame.leaf_count(),
            self.total_conv_count(),
            self.loci.len(),
            self.total_sequence_length(),
            self.clonal_frame_length()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> ConversionGraph {
        let frame = ClonalFrame::from_newick("((A:1,B:1)AB:2,C:3)R;").unwrap();
        ConversionGraph::new(frame, vec![Locus::new("locus0", 1000)]).unwrap()
    }

    fn id(g: &ConversionGraph, name: &str) -> NodeId {
        g.clonal_frame()
            .nodes()
            .iter()
            .find(|n| n.name.as_deref() == Some(name))
            .unwrap()
            .id
    }

    fn conv(g: &ConversionGraph, n1: &str, h1: f64, n2: &str, h2: f64) -> Conversion {
        Conversion {
            locus: 0,
            start_site: 10,
            end_site: 20,
            node1: id(g, n1),
            height1: h1,
            node2: id(g, n2),
            height2: h2,
        }
    }

    #[test]
    fn scalar_state() {
        let g = graph();
        assert_eq!(g.total_conv_count(), 0);
        assert_eq!(g.total_sequence_length(), 1000);
        assert!((g.clonal_frame_length() - 7.0).abs() < 1e-12);
        assert_eq!(g.locus_id("locus0"), Some(0));
        assert_eq!(g.locus(0).unwrap().name(), "locus0");
    }

    #[test]
    fn add_and_delete() {
        let mut g = graph();
        let c = conv(&g, "A", 0.5, "C", 2.0);
        g.add_conversion(c).unwrap();
        assert_eq!(g.total_conv_count(), 1);
        assert_eq!(g.locus_conversions(0).count(), 1);
        g.validate().unwrap();
        let removed = g.delete_conversion(&c).unwrap();
        assert_eq!(removed, c);
        assert!(g.delete_conversion(&c).is_err());
    }

    #[test]
    fn add_rejects_bad_sites_and_heights() {
        let mut g = graph();
        let mut c = conv(&g, "A", 0.5, "C", 2.0);
        c.end_site = 1000;
        assert!(g.add_conversion(c).is_err());

        let mut c = conv(&g, "A", 0.5, "C", 2.0);
        c.height2 = 0.25;
        assert!(g.add_conversion(c).is_err());

        let mut c = conv(&g, "A", 0.5, "C", 2.0);
        c.node2 = 99;
        assert!(g.add_conversion(c).is_err());

        // Departure must lie on node1's branch.
        let c = conv(&g, "A", 1.5, "C", 2.0);
        assert!(g.add_conversion(c).is_err());
    }

    #[test]
    fn add_reports_structured_violation() {
        let mut g = graph();
        let c = conv(&g, "A", 1.5, "C", 2.0);
        match g.add_conversion(c) {
            Err(ConvGraphError::InvariantViolation { invariant, .. }) => {
                assert_eq!(invariant, "departure-on-branch");
            }
            other => panic!("expected invariant violation, got {other:?}"),
        }
    }

    #[test]
    fn add_rejects_duplicate() {
        let mut g = graph();
        let c = conv(&g, "A", 0.5, "C", 2.0);
        g.add_conversion(c).unwrap();
        assert!(matches!(
            g.add_conversion(c),
            Err(ConvGraphError::InvalidInput(_))
        ));
        assert_eq!(g.total_conv_count(), 1);

        let mut shifted = c;
        shifted.end_site += 1;
        g.add_conversion(shifted).unwrap();
        assert_eq!(g.total_conv_count(), 2);
    }

    #[test]
    fn new_rejects_bad_loci() {
        let frame = ClonalFrame::from_newick("(A:1,B:1);").unwrap();
        assert!(ConversionGraph::new(frame.clone(), vec![]).is_err());
        assert!(ConversionGraph::new(frame.clone(), vec![Locus::new("x", 0)]).is_err());
        assert!(ConversionGraph::new(
            frame,
            vec![Locus::new("x", 5), Locus::new("x", 6)]
        )
        .is_err());
    }

    #[test]
    fn invisible_flag() {
        let g = graph();
        assert!(conv(&g, "A", 0.2, "A", 0.8).is_invisible());
        assert!(!conv(&g, "A", 0.2, "B", 0.8).is_invisible());
    }

    #[test]
    fn redirect_respects_floor() {
        let mut g = graph();
        let (a, b, c) = (id(&g, "A"), id(&g, "B"), id(&g, "C"));
        g.add_conversion(conv(&g, "A", 0.2, "C", 0.5)).unwrap();
        g.add_conversion(conv(&g, "B", 0.1, "C", 2.5)).unwrap();
        g.redirect_endpoints(c, a, Some(1.0));
        assert_eq!(g.conversions()[0].node2, c);
        assert_eq!(g.conversions()[1].node2, a);
        assert!(g.has_endpoint_above(a, 2.0));
        assert!(!g.has_endpoint_above(b, 0.1));
    }

    #[test]
    fn swap_lineage_regrafts_and_reports_old_path() {
        let mut g = graph();
        let (a, b, c, ab) = (id(&g, "A"), id(&g, "B"), id(&g, "C"), id(&g, "AB"));
        // Move A onto C's branch at height 2.
        let swap = g.swap_lineage(a, c, 2.0).unwrap().unwrap();
        g.validate().unwrap();
        let f = g.clonal_frame();
        assert_eq!(f.parent(a), Some(ab));
        assert_eq!(f.parent(c), Some(ab));
        assert_eq!(f.height(ab), 2.0);
        assert_eq!(f.parent(b), Some(f.root()));
        // B's old path at height 1 is B's own branch.
        assert_eq!(swap.arrival_node, b);
        assert_eq!(swap.arrival_height, 1.0);
    }

    #[test]
    fn swap_lineage_carries_endpoints() {
        let mut g = graph();
        let (a, b, c, ab) = (id(&g, "A"), id(&g, "B"), id(&g, "C"), id(&g, "AB"));
        // Arrival on AB's branch and on C above the new graft point.
        g.add_conversion(conv(&g, "B", 0.5, "AB", 2.5)).unwrap();
        g.add_conversion(conv(&g, "C", 0.5, "C", 2.8)).unwrap();
        g.swap_lineage(a, c, 2.0).unwrap().unwrap();
        g.validate().unwrap();
        assert_eq!(g.conversions()[0].node2, b);
        assert_eq!(g.conversions()[1].node1, c);
        assert_eq!(g.conversions()[1].node2, ab);
    }

    #[test]
    fn swap_lineage_rejects_departure_above_root() {
        let frame = ClonalFrame::from_newick("((A:1,B:1)AB:2,C:3)R;").unwrap();
        let mut g = ConversionGraph::new(frame, vec![Locus::new("l", 10)]).unwrap();
        let (ab, c) = (id(&g, "AB"), id(&g, "C"));
        // Departure on AB at 2.5; moving C under AB at 1.5 makes R the root
        // at 1.5, leaving AB's departure above it.
        g.add_conversion(Conversion {
            locus: 0,
            start_site: 0,
            end_site: 1,
            node1: ab,
            height1: 2.5,
            node2: ab,
            height2: 2.7,
        })
        .unwrap();
        assert!(g.swap_lineage(c, ab, 1.5).unwrap().is_none());
    }

    #[test]
    fn summary_mentions_counts() {
        let g = graph();
        assert!(g.summary().starts_with("ConversionGraph: 3 leaves, 0 conversions over 1 loci"));
    }
}
