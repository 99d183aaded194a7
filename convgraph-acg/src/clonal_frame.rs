//! The clonal frame: a rooted, binary, time-scaled tree.
//!
//! Uses arena-style storage: nodes live in a flat `Vec<Node>` and are
//! referenced by `NodeId` (a `usize` index). Ids are stable for the lifetime
//! of the frame; topology moves re-link existing nodes instead of allocating
//! new ones, so conversions can refer to nodes by id across surgery.

use convgraph_core::{ConvGraphError, Result, Summarizable};

/// Index into the frame's node arena.
pub type NodeId = usize;

/// A single node in the clonal frame.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    /// Index of this node in the arena.
    pub id: NodeId,
    /// Parent node (None for root, or for a node detached mid-surgery).
    pub parent: Option<NodeId>,
    /// Child nodes; empty for leaves, exactly two otherwise.
    pub children: Vec<NodeId>,
    /// Age of the node, increasing towards the root.
    pub height: f64,
    /// Taxon or node label.
    pub name: Option<String>,
}

impl Node {
    /// True if this node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Label used in serialized output: the name, or the arena id.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.id.to_string(),
        }
    }
}

/// Result of [`ClonalFrame::detach`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detached {
    /// The removed parent; still owns the detached child.
    pub parent: NodeId,
    /// The sibling promoted into the parent's former position.
    pub sibling: NodeId,
    /// Height the parent had before it was removed.
    pub old_height: f64,
}

/// A rooted binary tree stored as an arena of nodes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClonalFrame {
    nodes: Vec<Node>,
    root: NodeId,
}

impl ClonalFrame {
    /// Create a frame from pre-built nodes and a root index.
    ///
    /// The result is validated: every node must be reachable from `root`,
    /// internal nodes must have exactly two children, and heights must
    /// strictly increase towards the root.
    pub fn from_nodes(nodes: Vec<Node>, root: NodeId) -> Result<Self> {
        if nodes.is_empty() {
            return Err(ConvGraphError::InvalidInput("empty node list".into()));
        }
        if root >= nodes.len() {
            return Err(ConvGraphError::InvalidInput(format!(
                "root index {} out of range ({})",
                root,
                nodes.len()
            )));
        }
        let frame = Self { nodes, root };
        frame.validate()?;
        Ok(frame)
    }

    /// Parse a plain Newick string (branch lengths required) into a frame.
    pub fn from_newick(input: &str) -> Result<Self> {
        crate::newick::parse_frame(input)
    }

    /// Serialize to Newick with branch lengths.
    pub fn to_newick(&self) -> String {
        crate::newick::write_frame(self)
    }

    /// Access a node by id.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// True if `id` indexes a node of this frame.
    pub fn contains(&self, id: NodeId) -> bool {
        id < self.nodes.len()
    }

    /// All nodes, in arena order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// The root node id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of leaf nodes.
    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// All leaf node ids.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.id)
            .collect()
    }

    pub fn height(&self, id: NodeId) -> f64 {
        self.nodes[id].height
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn is_root(&self, id: NodeId) -> bool {
        id == self.root
    }

    /// The other child of `id`'s parent.
    pub fn sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.nodes[id].parent?;
        self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&c| c != id)
    }

    /// Length of the branch above `id` (zero for the root).
    pub fn branch_length(&self, id: NodeId) -> f64 {
        match self.nodes[id].parent {
            Some(p) => self.nodes[p].height - self.nodes[id].height,
            None => 0.0,
        }
    }

    /// Sum of all branch lengths: the support of a uniform attachment point.
    pub fn total_branch_length(&self) -> f64 {
        self.nodes.iter().map(|n| self.branch_length(n.id)).sum()
    }

    /// True if the branch above `id` covers `height`.
    ///
    /// The root's branch extends to infinity.
    pub fn spans(&self, id: NodeId, height: f64) -> bool {
        let node = &self.nodes[id];
        node.height <= height
            && node
                .parent
                .map_or(true, |p| height < self.nodes[p].height)
    }

    /// The ancestor of `id` (or `id` itself) whose branch covers `height`.
    ///
    /// `height` must not be below `id`'s own height.
    pub fn lineage_at(&self, id: NodeId, height: f64) -> NodeId {
        let mut cur = id;
        while !self.spans(cur, height) {
            match self.nodes[cur].parent {
                Some(p) => cur = p,
                None => break,
            }
        }
        cur
    }

    /// All nodes whose branch covers `height`, in pre-order.
    pub fn lineages_at(&self, height: f64) -> Vec<NodeId> {
        self.iter_preorder()
            .filter(|&id| self.spans(id, height))
            .collect()
    }

    /// Pre-order (parent before children) traversal yielding node ids.
    pub fn iter_preorder(&self) -> PreorderIter<'_> {
        PreorderIter {
            frame: self,
            stack: vec![self.root],
        }
    }

    /// Same topology and heights, ignoring child order.
    pub fn is_equivalent(&self, other: &ClonalFrame, tolerance: f64) -> bool {
        if self.root != other.root || self.nodes.len() != other.nodes.len() {
            return false;
        }
        self.nodes.iter().zip(&other.nodes).all(|(a, b)| {
            a.parent == b.parent
                && (a.height - b.height).abs() <= tolerance
                && a.children.len() == b.children.len()
                && a.children.iter().all(|c| b.children.contains(c))
        })
    }

    // Low-level edits. Each one leaves the frame in an intermediate state;
    // callers restore validity before handing the frame back.

    /// Unlink `child` from `parent`.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent].children.retain(|&c| c != child);
        if self.nodes[child].parent == Some(parent) {
            self.nodes[child].parent = None;
        }
    }

    /// Link `child` under `parent`.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent].children.push(child);
        self.nodes[child].parent = Some(parent);
    }

    /// Put `new` in `old`'s slot among `parent`'s children.
    pub fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
        for c in self.nodes[parent].children.iter_mut() {
            if *c == old {
                *c = new;
            }
        }
        if self.nodes[old].parent == Some(parent) {
            self.nodes[old].parent = None;
        }
        self.nodes[new].parent = Some(parent);
    }

    pub fn set_height(&mut self, id: NodeId, height: f64) {
        self.nodes[id].height = height;
    }

    pub fn set_root(&mut self, id: NodeId) {
        self.nodes[id].parent = None;
        self.root = id;
    }

    /// Detach `node` together with its parent, promoting the sibling.
    ///
    /// Afterwards the parent is out of the tree, has no parent of its own and
    /// keeps `node` as its only child. The sibling takes the parent's place
    /// (becoming root if the parent was root). Must be followed by
    /// [`ClonalFrame::graft`] of the returned parent.
    pub fn detach(&mut self, node: NodeId) -> Result<Detached> {
        self.check_id(node)?;
        let parent = self.nodes[node].parent.ok_or_else(|| {
            ConvGraphError::InvalidInput(format!("cannot detach root node {node}"))
        })?;
        let sibling = self.sibling(node).ok_or_else(|| {
            ConvGraphError::invariant("binary", format!("node {parent}"), "missing sibling")
        })?;
        let old_height = self.nodes[parent].height;

        self.remove_child(parent, sibling);
        match self.nodes[parent].parent {
            Some(grandparent) => self.replace_child(grandparent, parent, sibling),
            None => self.set_root(sibling),
        }
        self.nodes[parent].parent = None;

        Ok(Detached {
            parent,
            sibling,
            old_height,
        })
    }

    /// Insert the detached `parent` on the branch above `target` at `height`.
    ///
    /// `target` becomes the second child of `parent`; if `target` was the
    /// root, `parent` becomes the new root.
    pub fn graft(&mut self, parent: NodeId, target: NodeId, height: f64) -> Result<()> {
        self.check_id(parent)?;
        self.check_id(target)?;
        if self.nodes[parent].parent.is_some() || parent == self.root {
            return Err(ConvGraphError::InvalidInput(format!(
                "node {parent} is not detached"
            )));
        }
        if !self.spans(target, height) {
            return Err(ConvGraphError::InvalidInput(format!(
                "branch above node {target} does not cover height {height}"
            )));
        }

        self.set_height(parent, height);
        match self.nodes[target].parent {
            Some(grandparent) => self.replace_child(grandparent, target, parent),
            None => self.set_root(parent),
        }
        self.add_child(parent, target);
        Ok(())
    }

    /// Check tree validity: reachability, binary shape, strictly increasing heights.
    pub fn validate(&self) -> Result<()> {
        let root = &self.nodes[self.root];
        if root.parent.is_some() {
            return Err(ConvGraphError::invariant(
                "root",
                format!("node {}", self.root),
                "root has a parent",
            ));
        }

        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if seen[id] {
                return Err(ConvGraphError::invariant(
                    "acyclic",
                    format!("node {id}"),
                    "reached twice",
                ));
            }
            seen[id] = true;
            let node = &self.nodes[id];
            if node.id != id {
                return Err(ConvGraphError::invariant(
                    "arena-id",
                    format!("node {id}"),
                    format!("stored id is {}", node.id),
                ));
            }
            if !node.height.is_finite() || node.height < 0.0 {
                return Err(ConvGraphError::invariant(
                    "height",
                    format!("node {id}"),
                    format!("height {} is not a finite non-negative value", node.height),
                ));
            }
            if !node.children.is_empty() && node.children.len() != 2 {
                return Err(ConvGraphError::invariant(
                    "binary",
                    format!("node {id}"),
                    format!("{} children", node.children.len()),
                ));
            }
            for &child in &node.children {
                if child >= self.nodes.len() {
                    return Err(ConvGraphError::invariant(
                        "node-exists",
                        format!("node {id}"),
                        format!("child {child} out of range"),
                    ));
                }
                let c = &self.nodes[child];
                if c.parent != Some(id) {
                    return Err(ConvGraphError::invariant(
                        "parent-link",
                        format!("node {child}"),
                        format!("parent is {:?}, expected {id}", c.parent),
                    ));
                }
                if c.height >= node.height {
                    return Err(ConvGraphError::invariant(
                        "height-order",
                        format!("node {child}"),
                        format!("height {} not below parent height {}", c.height, node.height),
                    ));
                }
                stack.push(child);
            }
        }

        if let Some(orphan) = seen.iter().position(|&s| !s) {
            return Err(ConvGraphError::invariant(
                "reachable",
                format!("node {orphan}"),
                "not reachable from the root",
            ));
        }
        Ok(())
    }

    fn check_id(&self, id: NodeId) -> Result<()> {
        if id >= self.nodes.len() {
            return Err(ConvGraphError::InvalidInput(format!(
                "node index {} out of range ({})",
                id,
                self.nodes.len()
            )));
        }
        Ok(())
    }
}

impl Summarizable for ClonalFrame {
    fn summary(&self) -> String {
        let leaves = self.leaf_count();
        format!(
            "ClonalFrame: {} nodes ({} leaves), root height {:.4}",
            self.node_count(),
            leaves,
            self.height(self.root)
        )
    }
}

/// Pre-order iterator over node ids.
pub struct PreorderIter<'a> {
    frame: &'a ClonalFrame,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for PreorderIter<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        // Push children in reverse order so leftmost is visited first.
        for &child in self.frame.nodes[id].children.iter().rev() {
            self.stack.push(child);
        }
        Some(id)
    }
}
