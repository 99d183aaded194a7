//! Chronological clonal-frame events: the coalescent's sufficient statistic.

use crate::clonal_frame::{ClonalFrame, NodeId};

/// Kind of clonal-frame event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CfEventKind {
    Sample,
    Coalescence,
}

/// A sample or coalescence in the clonal frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CfEvent {
    pub height: f64,
    pub kind: CfEventKind,
    /// Number of clonal-frame lineages extant immediately after the event.
    pub lineage_count: usize,
    /// The node the event belongs to.
    pub node: NodeId,
}

/// All clonal-frame events, sorted by ascending height.
///
/// At equal heights samples come before coalescences, so the lineage count
/// never drops to zero before the root.
pub fn cf_events(frame: &ClonalFrame) -> Vec<CfEvent> {
    let mut order: Vec<NodeId> = frame.iter_preorder().collect();
    order.sort_by(|&a, &b| {
        let (na, nb) = (&frame.nodes()[a], &frame.nodes()[b]);
        na.height
            .total_cmp(&nb.height)
            .then_with(|| nb.is_leaf().cmp(&na.is_leaf()))
    });

    let mut lineages = 0usize;
    order
        .into_iter()
        .map(|id| {
            let node = &frame.nodes()[id];
            let kind = if node.is_leaf() {
                lineages += 1;
                CfEventKind::Sample
            } else {
                lineages = lineages.saturating_sub(1);
                CfEventKind::Coalescence
            };
            CfEvent {
                height: node.height,
                kind,
                lineage_count: lineages,
                node: id,
            }
        })
        .collect()
}

/// Index of the event that opens the interval containing `height`.
///
/// Returns the last index whose successor is not strictly below `height`,
/// i.e. the interval `[events[i].height, events[i+1].height]` holding it.
/// Heights above the root land in the final, open-ended interval.
pub fn interval_index(events: &[CfEvent], height: f64) -> usize {
    let mut idx = 0;
    while idx + 1 < events.len() && events[idx + 1].height < height {
        idx += 1;
    }
    idx
}
