//! Frame tree: the folded dataset as a prefix tree of call paths.
//!
//! Nodes live in a flat arena and refer to each other by index, so building
//! and walking the tree never recurses. Each node finds its children by name
//! through a small map; ordering by name happens only at layout time.

use crate::aggregator::FoldedStack;
use crate::utils::config::{FRAME_DELIMITER, ROOT_FRAME_NAME};
use crate::utils::error::FlamegraphError;
use log::debug;
use std::collections::HashMap;

/// Index of a node in its tree's arena
pub type NodeId = usize;

/// One frame in a specific calling context
#[derive(Debug, Clone)]
pub struct FrameNode {
    pub name: String,
    pub parent: Option<NodeId>,
    /// Root is depth 0
    pub depth: usize,
    /// Samples in this node or anything below it
    pub inclusive_count: u64,
    /// Samples whose leaf is exactly this node
    pub self_count: u64,
    /// Insertion order; see `sorted_children` for render order
    pub children: Vec<NodeId>,
    child_index: HashMap<String, NodeId>,
}

impl FrameNode {
    fn new(name: String, parent: Option<NodeId>, depth: usize) -> Self {
        Self {
            name,
            parent,
            depth,
            inclusive_count: 0,
            self_count: 0,
            children: Vec::new(),
            child_index: HashMap::new(),
        }
    }

    pub fn child(&self, name: &str) -> Option<NodeId> {
        self.child_index.get(name).copied()
    }
}

/// Arena-backed call tree built from folded stacks
#[derive(Debug, Clone)]
pub struct FrameTree {
    nodes: Vec<FrameNode>,
}

impl Default for FrameTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTree {
    /// The synthetic `all` node
    pub const ROOT: NodeId = 0;

    /// Tree holding only the root
    pub fn new() -> Self {
        Self {
            nodes: vec![FrameNode::new(ROOT_FRAME_NAME.to_string(), None, 0)],
        }
    }

    /// **Public** - Build a tree from folded stacks
    ///
    /// # Arguments
    /// * `stacks` - Folded entries (any order; duplicates are summed)
    ///
    /// # Returns
    /// The tree, with `inclusive == self + Σ children.inclusive` at every node
    ///
    /// # Errors
    /// * `FlamegraphError::EmptyInput` - No samples at all
    /// * `FlamegraphError::CountOverflow` - Counts sum past `u64::MAX`
    pub fn build(stacks: &[FoldedStack]) -> Result<Self, FlamegraphError> {
        let mut tree = Self::new();
        for entry in stacks {
            tree.insert(entry.frames(), entry.count)?;
        }

        if tree.total() == 0 {
            return Err(FlamegraphError::EmptyInput);
        }

        debug!(
            "Built frame tree: {} nodes, depth {}, {} samples",
            tree.len(),
            tree.max_depth(),
            tree.total()
        );
        Ok(tree)
    }

    /// Add `count` samples along one root-first path
    ///
    /// Leaves the tree untouched if the root total would overflow.
    pub fn insert<'a>(
        &mut self,
        frames: impl IntoIterator<Item = &'a str>,
        count: u64,
    ) -> Result<(), FlamegraphError> {
        if count == 0 {
            return Ok(());
        }
        // Every node's counts are bounded by the root's.
        let total = self.total();
        let new_total = total
            .checked_add(count)
            .ok_or(FlamegraphError::CountOverflow { total, count })?;

        let mut current = Self::ROOT;
        self.nodes[current].inclusive_count = new_total;
        for name in frames {
            current = self.child_or_insert(current, name);
            self.nodes[current].inclusive_count += count;
        }
        self.nodes[current].self_count += count;
        Ok(())
    }

    fn child_or_insert(&mut self, parent: NodeId, name: &str) -> NodeId {
        if let Some(id) = self.nodes[parent].child(name) {
            return id;
        }
        let id = self.nodes.len();
        let depth = self.nodes[parent].depth + 1;
        self.nodes
            .push(FrameNode::new(name.to_string(), Some(parent), depth));
        let node = &mut self.nodes[parent];
        node.children.push(id);
        node.child_index.insert(name.to_string(), id);
        id
    }

    pub fn node(&self, id: NodeId) -> &FrameNode {
        &self.nodes[id]
    }

    pub fn root(&self) -> &FrameNode {
        &self.nodes[Self::ROOT]
    }

    pub fn nodes(&self) -> &[FrameNode] {
        &self.nodes
    }

    /// Total samples (the root's inclusive count)
    pub fn total(&self) -> u64 {
        self.root().inclusive_count
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Depth of the deepest node (0 for a root-only tree)
    pub fn max_depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    /// Children of `id` in byte order of their names
    pub fn sorted_children(&self, id: NodeId) -> Vec<NodeId> {
        let mut children = self.nodes[id].children.clone();
        children.sort_by(|a, b| self.nodes[*a].name.cmp(&self.nodes[*b].name));
        children
    }

    /// Node reached by following `path` from the root
    pub fn find<'a>(&self, path: impl IntoIterator<Item = &'a str>) -> Option<NodeId> {
        path.into_iter()
            .try_fold(Self::ROOT, |id, name| self.nodes[id].child(name))
    }

    /// Root-first frame names leading to `id`, root excluded
    pub fn path(&self, id: NodeId) -> Vec<&str> {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            if node_id == Self::ROOT {
                break;
            }
            names.push(self.nodes[node_id].name.as_str());
            current = self.nodes[node_id].parent;
        }
        names.reverse();
        names
    }

    /// Turn the tree back into folded stacks (one per node with self samples)
    pub fn to_folded(&self) -> Vec<FoldedStack> {
        let mut out: Vec<FoldedStack> = self
            .nodes
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, node)| node.self_count > 0)
            .map(|(id, node)| {
                let delimiter = FRAME_DELIMITER.to_string();
                FoldedStack::new(self.path(id).join(&delimiter), node.self_count)
            })
            .collect();
        out.sort_by(|a, b| a.stack.cmp(&b.stack));
        out
    }

    /// Check the counting invariant at every node
    pub fn is_consistent(&self) -> bool {
        self.nodes.iter().all(|node| {
            let children: u64 = node
                .children
                .iter()
                .map(|c| self.nodes[*c].inclusive_count)
                .sum();
            node.inclusive_count == node.self_count + children
        })
    }
}
