//! Rebuilds the span forest of a trace from its flat span list.
//!
//! Spans whose parent is missing, or names a span we never saw, become roots; this is how partial
//! and cross-backend traces show up, so it isn't treated as an error.  Every span is attached to at
//! most one parent, resolved once up front, and the tree is walked breadth-first from the roots
//! with an explicit queue, so the walk terminates on any input.  Spans caught in a parent cycle are
//! unreachable from a real root; the earliest of them is cut loose and promoted to a root, which
//! means every input span shows up in the forest exactly once.
use std::collections::{
    HashMap,
    VecDeque,
};

use serde::{
    Deserialize,
    Serialize,
};

use super::model::Span;

/// A span placed in the tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanNode {
    /// The span itself.
    pub span: Span,
    /// Distance from the node's root; roots are 0.
    pub depth: u32,

    /// Indices into [`SpanForest::nodes`], sorted by start time.
    pub children: Vec<usize>,
}

/// Arena-backed forest: nodes are stored flat and refer to each other by index.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanForest {
    /// Every span once, in input order.
    pub nodes: Vec<SpanNode>,

    /// Indices of the root nodes, sorted by start time.
    pub roots: Vec<usize>,
}

impl SpanForest {
    /// Rebuild the tree from parent ids.  Spans whose parent is missing become roots, and a
    /// cycle is broken at its earliest span.
    #[must_use]
    pub fn build(spans: &[Span]) -> Self {
        let mut nodes: Vec<_> =
            spans.iter().map(|span| SpanNode { span: span.clone(), depth: 0, children: vec![] }).collect();

        // First occurrence wins when span ids repeat.
        let mut index_of: HashMap<&str, usize> = HashMap::with_capacity(spans.len());
        for (i, span) in spans.iter().enumerate() {
            index_of.entry(span.span_id.as_str()).or_insert(i);
        }

        let mut parent: Vec<Option<usize>> = spans
            .iter()
            .enumerate()
            .map(|(i, span)| {
                let p = *index_of.get(span.parent_span_id.as_deref()?)?;
                (p != i).then_some(p)
            })
            .collect();
        for (i, p) in parent.iter().enumerate() {
            if let Some(p) = p {
                nodes[*p].children.push(i);
            }
        }
        for node in &mut nodes {
            node.children.sort_by_key(|&c| (spans[c].start_time, c));
        }

        let mut roots: Vec<usize> = (0..nodes.len()).filter(|&i| parent[i].is_none()).collect();
        let mut visited = vec![false; nodes.len()];
        let mut reached = assign_depths(&mut nodes, &roots, &mut visited);

        while reached < nodes.len() {
            let orphan = (0..nodes.len()).filter(|&i| !visited[i]).min_by_key(|&i| (spans[i].start_time, i));
            let Some(orphan) = orphan else {
                break;
            };
            if let Some(p) = parent[orphan].take() {
                nodes[p].children.retain(|&c| c != orphan);
            }
            roots.push(orphan);
            reached += assign_depths(&mut nodes, &[orphan], &mut visited);
        }

        roots.sort_by_key(|&r| (spans[r].start_time, r));
        Self { nodes, roots }
    }

    /// Spans in the forest.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the forest has no spans.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node for `span_id`.
    #[must_use]
    pub fn node(&self, span_id: &str) -> Option<&SpanNode> {
        self.nodes.iter().find(|n| n.span.span_id == span_id)
    }

    /// Span ids of a node's children, in order.
    #[must_use]
    pub fn child_ids(&self, span_id: &str) -> Vec<&str> {
        self.node(span_id)
            .map(|n| n.children.iter().map(|&c| self.nodes[c].span.span_id.as_str()).collect())
            .unwrap_or_default()
    }

    /// Span ids of the roots, in order.
    #[must_use]
    pub fn root_ids(&self) -> Vec<&str> {
        self.roots.iter().map(|&r| self.nodes[r].span.span_id.as_str()).collect()
    }

    /// Depth of the deepest node.
    #[must_use]
    pub fn max_depth(&self) -> u32 {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }
}

/// Breadth-first walk from `starts`, setting `depth = parent.depth + 1`.  Returns how many nodes
/// were newly reached.
fn assign_depths(nodes: &mut [SpanNode], starts: &[usize], visited: &mut [bool]) -> usize {
    let mut queue = VecDeque::new();
    let mut reached = 0;
    for &start in starts {
        if !visited[start] {
            visited[start] = true;
            nodes[start].depth = 0;
            queue.push_back(start);
            reached += 1;
        }
    }

    while let Some(i) = queue.pop_front() {
        let depth = nodes[i].depth + 1;
        for c in nodes[i].children.clone() {
            if !visited[c] {
                visited[c] = true;
                nodes[c].depth = depth;
                queue.push_back(c);
                reached += 1;
            }
        }
    }
    reached
}
