//! Supervision index
//!
//! A static interval tree over a cut's supervisions answering overlap and
//! envelope queries in `O(log n + k)`. Intervals are kept sorted by start in
//! a flat vector; the implicit balanced tree over that vector stores the
//! largest end of every subtree, which lets overlap queries skip subtrees
//! that end before the query begins.

use crate::cut::Cut;
use crate::supervision::SupervisionSegment;
use cutkit_common::timing::Seconds;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
struct Node<T> {
    start: Seconds,
    end: Seconds,
    /// Largest `end` in the subtree rooted at this node
    max_end: Seconds,
    item: T,
}

/// Read-only interval tree
#[derive(Debug, Clone)]
pub struct IntervalTree<T> {
    nodes: Vec<Node<T>>,
}

impl<T> IntervalTree<T> {
    /// Build a tree from `(start, end, item)` triples
    pub fn new(intervals: impl IntoIterator<Item = (Seconds, Seconds, T)>) -> Self {
        let mut nodes: Vec<Node<T>> = intervals
            .into_iter()
            .map(|(start, end, item)| Node {
                start,
                end,
                max_end: end,
                item,
            })
            .collect();
        nodes.sort_by(|a, b| a.start.total_cmp(&b.start));
        let len = nodes.len();
        Self::fill_max_end(&mut nodes, 0, len);
        IntervalTree { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Items with `start < end` and `item_end > begin`
    pub fn overlap(&self, begin: Seconds, end: Seconds) -> Vec<&T> {
        let mut out = Vec::new();
        self.collect_overlap(0, self.nodes.len(), begin, end, &mut out);
        out
    }

    /// Items fully inside `[begin, end]`
    pub fn envelop(&self, begin: Seconds, end: Seconds) -> Vec<&T> {
        let first = self.nodes.partition_point(|n| n.start < begin);
        self.nodes[first..]
            .iter()
            .take_while(|n| n.start <= end)
            .filter(|n| n.end <= end)
            .map(|n| &n.item)
            .collect()
    }

    fn fill_max_end(nodes: &mut [Node<T>], lo: usize, hi: usize) -> Seconds {
        if lo >= hi {
            return Seconds::NEG_INFINITY;
        }
        let mid = lo + (hi - lo) / 2;
        let left = Self::fill_max_end(nodes, lo, mid);
        let right = Self::fill_max_end(nodes, mid + 1, hi);
        let max_end = nodes[mid].end.max(left).max(right);
        nodes[mid].max_end = max_end;
        max_end
    }

    fn collect_overlap<'a>(&'a self, lo: usize, hi: usize, begin: Seconds, end: Seconds, out: &mut Vec<&'a T>) {
        if lo >= hi {
            return;
        }
        let mid = lo + (hi - lo) / 2;
        let node = &self.nodes[mid];
        if node.max_end <= begin {
            return;
        }
        self.collect_overlap(lo, mid, begin, end, out);
        if node.start < end && node.end > begin {
            out.push(&node.item);
        }
        if node.start < end {
            self.collect_overlap(mid + 1, hi, begin, end, out);
        }
    }
}

/// Interval tree over one cut's supervisions
pub type SupervisionIndex = IntervalTree<SupervisionSegment>;

impl SupervisionIndex {
    pub fn from_supervisions(supervisions: &[SupervisionSegment]) -> Self {
        IntervalTree::new(supervisions.iter().map(|s| (s.start, s.end(), s.clone())))
    }
}

/// Supervision indexes keyed by cut id
#[derive(Debug, Clone, Default)]
pub struct CutIndex {
    trees: HashMap<String, SupervisionIndex>,
}

impl CutIndex {
    /// Index the supervisions of every cut
    pub fn build<'a>(cuts: impl IntoIterator<Item = &'a Cut>) -> Self {
        let trees: HashMap<String, SupervisionIndex> = cuts
            .into_iter()
            .map(|cut| {
                (
                    cut.id().to_string(),
                    SupervisionIndex::from_supervisions(&cut.supervisions()),
                )
            })
            .collect();
        debug!("Indexed supervisions of {} cuts", trees.len());
        CutIndex { trees }
    }

    pub fn get(&self, cut_id: &str) -> Option<&SupervisionIndex> {
        self.trees.get(cut_id)
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }
}

/// Index the supervisions of every cut
pub fn index_supervisions<'a>(cuts: impl IntoIterator<Item = &'a Cut>) -> CutIndex {
    CutIndex::build(cuts)
}
