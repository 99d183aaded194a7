//! Newick and extended Newick parser and writer.
//!
//! Clonal frames use the standard grammar with branch lengths on every
//! non-root node. Conversion graphs prefix the frame with one record per
//! conversion:
//! ```text
//! acg        = offset? conversion* tree
//! offset     = '[&offset,' height ']'
//! conversion = '[&' locus ',' start ',' end ',' label ',' h1 ',' label ',' h2 ']'
//! tree       = subtree ';'
//! subtree    = '(' subtree ',' subtree ')' label (':' length)? | label ':' length
//! ```
//! Heights are rebuilt from branch lengths with the youngest leaf at zero,
//! or at the `offset` height when a graph's leaves are not contemporaneous
//! with the present.
//! The writer labels every node of a graph, using the arena id for unnamed
//! nodes; such ids are read back as node names.

use std::collections::HashMap;

use convgraph_core::{Annotated, ConvGraphError, Result};

use crate::clonal_frame::{ClonalFrame, Node, NodeId};
use crate::graph::{Conversion, ConversionGraph, Locus};

/// Parse a Newick string into a clonal frame.
pub fn parse_frame(input: &str) -> Result<ClonalFrame> {
    let mut parser = Parser::new(input.as_bytes());
    let frame = parser.parse_tree()?;
    parser.expect_end()?;
    Ok(frame)
}

/// Write a clonal frame as Newick. Unnamed internal nodes stay unlabelled.
pub fn write_frame(frame: &ClonalFrame) -> String {
    let mut buf = String::new();
    write_subtree(frame, frame.root(), false, &mut buf);
    buf.push(';');
    buf
}

/// Parse an extended Newick string. Locus names in the records are
/// resolved against `loci`.
pub fn parse_acg(input: &str, loci: Vec<Locus>) -> Result<ConversionGraph> {
    let mut parser = Parser::new(input.as_bytes());
    let mut offset = None;
    let mut records = Vec::new();
    loop {
        parser.skip_whitespace();
        if parser.peek() != Some(b'[') {
            break;
        }
        match parser.parse_record()? {
            Header::Offset(h) => {
                if offset.is_some() || !records.is_empty() {
                    return Err(ConvGraphError::Parse(
                        "offset record must come once, before any conversion".into(),
                    ));
                }
                offset = Some(h);
            }
            Header::Conversion(record) => records.push(record),
        }
    }
    parser.offset = offset.unwrap_or(0.0);
    let frame = parser.parse_tree()?;
    parser.expect_end()?;

    let labels: HashMap<String, NodeId> = frame.nodes().iter().map(|n| (n.label(), n.id)).collect();
    let mut graph = ConversionGraph::new(frame, loci)?;
    for record in records {
        let locus = graph.locus_id(&record.locus).ok_or_else(|| {
            ConvGraphError::Parse(format!("unknown locus '{}' in conversion record", record.locus))
        })?;
        let node = |label: &str| {
            labels.get(label).copied().ok_or_else(|| {
                ConvGraphError::Parse(format!("unknown node label '{label}' in conversion record"))
            })
        };
        graph.add_conversion(Conversion {
            locus,
            start_site: record.start_site,
            end_site: record.end_site,
            node1: node(&record.label1)?,
            height1: record.height1,
            node2: node(&record.label2)?,
            height2: record.height2,
        })?;
    }
    Ok(graph)
}

/// Write a conversion graph as extended Newick.
pub fn write_acg(graph: &ConversionGraph) -> String {
    let frame = graph.clonal_frame();
    let mut buf = String::new();
    let offset = frame
        .leaves()
        .iter()
        .map(|&leaf| frame.height(leaf))
        .fold(f64::INFINITY, f64::min);
    if offset.is_finite() && offset != 0.0 {
        buf.push_str(&format!("[&offset,{offset}]"));
    }
    for conv in graph.conversions() {
        let locus = graph.locus(conv.locus).map_or("", |l| l.name());
        let label = |id: NodeId| frame.node(id).map(|n| n.label()).unwrap_or_default();
        buf.push_str(&format!(
            "[&{},{},{},{},{},{},{}]",
            locus,
            conv.start_site,
            conv.end_site,
            label(conv.node1),
            conv.height1,
            label(conv.node2),
            conv.height2
        ));
    }
    write_subtree(frame, frame.root(), true, &mut buf);
    buf.push(';');
    buf
}

fn write_subtree(frame: &ClonalFrame, id: NodeId, label_all: bool, buf: &mut String) {
    let Some(node) = frame.node(id) else {
        return;
    };
    if !node.children.is_empty() {
        buf.push('(');
        for (i, &child) in node.children.iter().enumerate() {
            if i > 0 {
                buf.push(',');
            }
            write_subtree(frame, child, label_all, buf);
        }
        buf.push(')');
    }
    if label_all || node.is_leaf() {
        buf.push_str(&node.label());
    } else if let Some(name) = &node.name {
        buf.push_str(name);
    }
    if node.parent.is_some() {
        buf.push(':');
        buf.push_str(&frame.branch_length(id).to_string());
    }
}

enum Header {
    Offset(f64),
    Conversion(Record),
}

struct Record {
    locus: String,
    start_site: usize,
    end_site: usize,
    label1: String,
    height1: f64,
    label2: String,
    height2: f64,
}

struct ParsedNode {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    length: Option<f64>,
    name: Option<String>,
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    nodes: Vec<ParsedNode>,
    /// Height of the youngest leaf.
    offset: f64,
}

impl<'a> Parser<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            nodes: Vec::new(),
            offset: 0.0,
        }
    }

    fn parse_record(&mut self) -> Result<Header> {
        if !self.input[self.pos..].starts_with(b"[&") {
            return Err(ConvGraphError::Parse("expected '[&' to open conversion record".into()));
        }
        self.pos += 2;
        let start = self.pos;
        while self.peek().is_some_and(|b| b != b']') {
            self.pos += 1;
        }
        if self.peek() != Some(b']') {
            return Err(ConvGraphError::Parse("unterminated conversion record".into()));
        }
        let body = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
        self.pos += 1;

        let fields: Vec<&str> = body.split(',').map(str::trim).collect();
        if let ["offset", height] = fields.as_slice() {
            let height: f64 = parse_field(height, "offset height")?;
            if !height.is_finite() {
                return Err(ConvGraphError::Parse(format!(
                    "offset height must be finite: '{body}'"
                )));
            }
            return Ok(Header::Offset(height));
        }
        if fields.len() != 7 {
            return Err(ConvGraphError::Parse(format!(
                "conversion record needs 7 fields, found {}: '{body}'",
                fields.len()
            )));
        }
        Ok(Header::Conversion(Record {
            locus: fields[0].to_string(),
            start_site: parse_field(fields[1], "start site")?,
            end_site: parse_field(fields[2], "end site")?,
            label1: fields[3].to_string(),
            height1: parse_field(fields[4], "departure height")?,
            label2: fields[5].to_string(),
            height2: parse_field(fields[6], "arrival height")?,
        }))
    }

    fn parse_tree(&mut self) -> Result<ClonalFrame> {
        self.skip_whitespace();
        let root = self.parse_subtree(None)?;
        self.skip_whitespace();
        if self.peek() != Some(b';') {
            return Err(ConvGraphError::Parse("expected ';' at end of Newick string".into()));
        }
        self.pos += 1;
        self.build_frame(root)
    }

    fn expect_end(&mut self) -> Result<()> {
        self.skip_whitespace();
        if self.pos < self.input.len() {
            return Err(ConvGraphError::Parse(format!(
                "trailing input after ';' at byte {}",
                self.pos
            )));
        }
        Ok(())
    }

    fn parse_subtree(&mut self, parent: Option<NodeId>) -> Result<NodeId> {
        self.skip_whitespace();
        let id = self.alloc_node(parent);

        if self.peek() == Some(b'(') {
            self.pos += 1;
            let first_child = self.parse_subtree(Some(id))?;
            self.nodes[id].children.push(first_child);

            loop {
                self.skip_whitespace();
                if self.peek() == Some(b',') {
                    self.pos += 1;
                    let child = self.parse_subtree(Some(id))?;
                    self.nodes[id].children.push(child);
                } else {
                    break;
                }
            }
            self.skip_whitespace();
            if self.peek() != Some(b')') {
                return Err(ConvGraphError::Parse("expected ')' in Newick string".into()));
            }
            self.pos += 1;
            if self.nodes[id].children.len() != 2 {
                return Err(ConvGraphError::Parse(format!(
                    "internal node with {} children; clonal frames are binary",
                    self.nodes[id].children.len()
                )));
            }
        }

        self.parse_label(id)?;
        Ok(id)
    }

    fn parse_label(&mut self, id: NodeId) -> Result<()> {
        self.skip_whitespace();
        let name = self.parse_name();
        if !name.is_empty() {
            self.nodes[id].name = Some(name);
        }
        self.skip_whitespace();
        if self.peek() == Some(b':') {
            self.pos += 1;
            self.skip_whitespace();
            let len_str = self.parse_float_str();
            if len_str.is_empty() {
                return Err(ConvGraphError::Parse("expected number after ':'".into()));
            }
            let len: f64 = len_str.parse().map_err(|_| {
                ConvGraphError::Parse(format!("invalid branch length: '{}'", len_str))
            })?;
            if !(len.is_finite() && len >= 0.0) {
                return Err(ConvGraphError::Parse(format!(
                    "branch length must be finite and non-negative: '{}'",
                    len_str
                )));
            }
            self.nodes[id].length = Some(len);
        }
        Ok(())
    }

    fn parse_name(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b':' | b',' | b')' | b'(' | b';' | b'[' | b']' => break,
                b' ' | b'\t' | b'\n' | b'\r' => break,
                _ => self.pos += 1,
            }
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn parse_float_str(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b'0'..=b'9' | b'.' | b'-' | b'+' | b'e' | b'E' => self.pos += 1,
                _ => break,
            }
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    /// Turn parsed branch lengths into heights and validate the tree.
    fn build_frame(&mut self, root: NodeId) -> Result<ClonalFrame> {
        let parsed = std::mem::take(&mut self.nodes);

        // Parents are allocated before their children.
        let mut depth = vec![0.0; parsed.len()];
        for (id, node) in parsed.iter().enumerate() {
            if let Some(parent) = node.parent {
                let len = node.length.ok_or_else(|| {
                    ConvGraphError::Parse(format!(
                        "missing branch length on node '{}'",
                        node.name.clone().unwrap_or_else(|| id.to_string())
                    ))
                })?;
                depth[id] = depth[parent] + len;
            }
        }
        let max_depth = parsed
            .iter()
            .enumerate()
            .filter(|(_, n)| n.children.is_empty())
            .map(|(id, _)| depth[id])
            .fold(0.0, f64::max);

        let mut seen: HashMap<&str, NodeId> = HashMap::new();
        for (id, node) in parsed.iter().enumerate() {
            if let Some(name) = node.name.as_deref() {
                if seen.insert(name, id).is_some() {
                    return Err(ConvGraphError::Parse(format!("duplicate node label '{name}'")));
                }
            }
        }

        let nodes = parsed
            .into_iter()
            .enumerate()
            .map(|(id, n)| Node {
                id,
                parent: n.parent,
                children: n.children,
                height: self.offset + max_depth - depth[id],
                name: n.name,
            })
            .collect();
        ClonalFrame::from_nodes(nodes, root)
            .map_err(|e| ConvGraphError::Parse(format!("invalid clonal frame: {e}")))
    }

    fn alloc_node(&mut self, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(ParsedNode {
            parent,
            children: Vec::new(),
            length: None,
            name: None,
        });
        id
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b' ' | b'\t' | b'\n' | b'\r' => self.pos += 1,
                _ => break,
            }
        }
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, what: &str) -> Result<T> {
    field
        .parse()
        .map_err(|_| ConvGraphError::Parse(format!("invalid {what}: '{field}'")))
}
