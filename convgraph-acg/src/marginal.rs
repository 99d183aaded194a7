//! Marginal trees: the genealogy of one region.
//!
//! Built by a single chronological sweep over clonal-frame events and the
//! departures/arrivals of the region's active conversions. Each clonal-frame
//! branch holds at most one marginal lineage at any time; a departure lifts
//! the lineage off its branch, an arrival merges it into whatever the target
//! branch carries at that height.

use convgraph_core::{ConvGraphError, Result};

use crate::clonal_frame::{ClonalFrame, NodeId};
use crate::graph::Conversion;

/// A node of a marginal tree.
#[derive(Debug, Clone, PartialEq)]
pub struct MarginalNode {
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub height: f64,
    /// Leaf or clonal-frame coalescence this node corresponds to; `None`
    /// for coalescences created by a conversion arrival.
    pub cf_node: Option<NodeId>,
}

impl MarginalNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// A binary tree derived from the clonal frame and a set of active conversions.
#[derive(Debug, Clone, PartialEq)]
pub struct MarginalTree {
    nodes: Vec<MarginalNode>,
    root: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SweepKind {
    Sample,
    Coalescence,
    Departure,
    Arrival,
}

#[derive(Debug, Clone, Copy)]
struct SweepEvent {
    height: f64,
    kind: SweepKind,
    /// Clonal-frame node for samples and coalescences, conversion index otherwise.
    index: usize,
}

impl MarginalTree {
    /// Build the marginal tree for the given active conversions.
    pub fn build(frame: &ClonalFrame, active: &[Conversion]) -> Result<Self> {
        let mut events: Vec<SweepEvent> = frame
            .nodes()
            .iter()
            .map(|n| SweepEvent {
                height: n.height,
                kind: if n.is_leaf() {
                    SweepKind::Sample
                } else {
                    SweepKind::Coalescence
                },
                index: n.id,
            })
            .collect();
        for (i, conv) in active.iter().enumerate() {
            for node in [conv.node1, conv.node2] {
                if !frame.contains(node) {
                    return Err(ConvGraphError::invariant(
                        "node-exists",
                        format!("active conversion {i}"),
                        format!("node {node} is not in the clonal frame"),
                    ));
                }
            }
            events.push(SweepEvent {
                height: conv.height1,
                kind: SweepKind::Departure,
                index: i,
            });
            events.push(SweepEvent {
                height: conv.height2,
                kind: SweepKind::Arrival,
                index: i,
            });
        }
        events.sort_by(|a, b| {
            a.height
                .total_cmp(&b.height)
                .then(a.kind.cmp(&b.kind))
        });

        let mut nodes: Vec<MarginalNode> = Vec::new();
        let mut on_branch: Vec<Option<usize>> = vec![None; frame.node_count()];
        let mut in_flight: Vec<Option<usize>> = vec![None; active.len()];

        for event in events {
            match event.kind {
                SweepKind::Sample => {
                    nodes.push(MarginalNode {
                        parent: None,
                        children: Vec::new(),
                        height: event.height,
                        cf_node: Some(event.index),
                    });
                    on_branch[event.index] = Some(nodes.len() - 1);
                }
                SweepKind::Coalescence => {
                    let cf = &frame.nodes()[event.index];
                    let mut merged = None;
                    for &child in &cf.children {
                        let lineage = on_branch[child].take();
                        merged = merge(&mut nodes, merged, lineage, event.height, Some(cf.id));
                    }
                    on_branch[event.index] = merged;
                }
                SweepKind::Departure => {
                    let conv = &active[event.index];
                    in_flight[event.index] = on_branch[conv.node1].take();
                }
                SweepKind::Arrival => {
                    let conv = &active[event.index];
                    let lineage = in_flight[event.index].take();
                    let resident = on_branch[conv.node2].take();
                    on_branch[conv.node2] = merge(&mut nodes, resident, lineage, event.height, None);
                }
            }
        }

        let root = on_branch[frame.root()].ok_or_else(|| {
            ConvGraphError::invariant(
                "marginal-root",
                format!("clonal frame root {}", frame.root()),
                "no lineage reaches the root",
            )
        })?;
        Ok(Self { nodes, root })
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn node(&self, id: usize) -> Option<&MarginalNode> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Height of the marginal root.
    pub fn root_height(&self) -> f64 {
        self.nodes[self.root].height
    }

    /// Sorted clonal-frame leaf ids below marginal node `id`.
    pub fn clade(&self, id: usize) -> Vec<NodeId> {
        let mut leaves = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            let node = &self.nodes[n];
            if node.is_leaf() {
                leaves.extend(node.cf_node);
            }
            stack.extend(node.children.iter().copied());
        }
        leaves.sort_unstable();
        leaves
    }

    /// Render as Newick, labelling leaves with their clonal-frame labels.
    pub fn to_newick(&self, frame: &ClonalFrame) -> String {
        let mut buf = String::new();
        self.write_subtree(frame, self.root, &mut buf);
        buf.push(';');
        buf
    }

    fn write_subtree(&self, frame: &ClonalFrame, id: usize, buf: &mut String) {
        let node = &self.nodes[id];
        if !node.children.is_empty() {
            buf.push('(');
            for (i, &child) in node.children.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                self.write_subtree(frame, child, buf);
            }
            buf.push(')');
        }
        if node.is_leaf() {
            if let Some(cf) = node.cf_node.and_then(|c| frame.node(c)) {
                buf.push_str(&cf.label());
            }
        }
        if let Some(p) = node.parent {
            buf.push(':');
            buf.push_str(&(self.nodes[p].height - node.height).to_string());
        }
    }
}

/// Join two optional lineages at `height`.
fn merge(
    nodes: &mut Vec<MarginalNode>,
    a: Option<usize>,
    b: Option<usize>,
    height: f64,
    cf_node: Option<NodeId>,
) -> Option<usize> {
    match (a, b) {
        (Some(x), Some(y)) => {
            let id = nodes.len();
            nodes.push(MarginalNode {
                parent: None,
                children: vec![x, y],
                height,
                cf_node,
            });
            nodes[x].parent = Some(id);
            nodes[y].parent = Some(id);
            Some(id)
        }
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}
