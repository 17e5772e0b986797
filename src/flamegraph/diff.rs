//! Differential flame graphs.
//!
//! Two folded datasets (before and after) are merged into one tree keyed by
//! call path. Each node carries both counts and their rates relative to the
//! side's total; the rate delta drives a red (grew) / blue (shrank) palette.
//! Layout reuses the normal placement algorithm with widths taken from one
//! chosen side.

use super::color::{diff_color, Rgb};
use super::layout::{
    canvas_height, get_truncated_name, percent_of, place_nodes, row_y, DiffInfo, FlameLayout,
    FlamegraphConfig, LayoutRect,
};
use super::tree::NodeId;
use crate::aggregator::FoldedStack;
use crate::utils::config::{FRAME_HEIGHT, MIN_CANVAS_WIDTH, ROOT_FRAME_NAME};
use crate::utils::error::FlamegraphError;
use log::{debug, info};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Which dataset sets frame widths in a differential layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WeightSide {
    Before,
    #[default]
    After,
}

impl WeightSide {
    pub fn other(self) -> Self {
        match self {
            WeightSide::Before => WeightSide::After,
            WeightSide::After => WeightSide::Before,
        }
    }
}

impl fmt::Display for WeightSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightSide::Before => f.write_str("before"),
            WeightSide::After => f.write_str("after"),
        }
    }
}

impl FromStr for WeightSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "before" => Ok(WeightSide::Before),
            "after" => Ok(WeightSide::After),
            other => Err(format!("expected 'before' or 'after', got '{other}'")),
        }
    }
}

/// One call path in the merged tree
#[derive(Debug, Clone)]
pub struct DiffNode {
    pub name: String,
    pub parent: Option<NodeId>,
    pub depth: usize,
    pub count_before: u64,
    pub count_after: u64,
    pub self_before: u64,
    pub self_after: u64,
    /// `count_before / total_before` (0 when that total is 0)
    pub rate_before: f64,
    pub rate_after: f64,
    /// `rate_after - rate_before`, in [-1, 1]
    pub delta: f64,
    pub children: Vec<NodeId>,
    child_index: HashMap<String, NodeId>,
}

impl DiffNode {
    fn new(name: String, parent: Option<NodeId>, depth: usize) -> Self {
        Self {
            name,
            parent,
            depth,
            count_before: 0,
            count_after: 0,
            self_before: 0,
            self_after: 0,
            rate_before: 0.0,
            rate_after: 0.0,
            delta: 0.0,
            children: Vec::new(),
            child_index: HashMap::new(),
        }
    }

    pub fn count(&self, side: WeightSide) -> u64 {
        match side {
            WeightSide::Before => self.count_before,
            WeightSide::After => self.count_after,
        }
    }

    pub fn self_count(&self, side: WeightSide) -> u64 {
        match side {
            WeightSide::Before => self.self_before,
            WeightSide::After => self.self_after,
        }
    }

    pub fn child(&self, name: &str) -> Option<NodeId> {
        self.child_index.get(name).copied()
    }
}

/// Merged before/after frame tree
#[derive(Debug, Clone)]
pub struct DiffTree {
    nodes: Vec<DiffNode>,
}

/// A call path whose share of samples moved
#[derive(Debug, Clone, PartialEq)]
pub struct FrameChange {
    pub path: String,
    pub rate_before: f64,
    pub rate_after: f64,
    pub delta: f64,
}

impl DiffTree {
    pub const ROOT: NodeId = 0;

    /// **Public** - Merge two folded datasets
    ///
    /// A path present on only one side becomes a normal node with zero
    /// counts on the other side.
    ///
    /// # Errors
    /// * `FlamegraphError::EmptyInput` - Both sides are empty
    /// * `FlamegraphError::CountOverflow` - One side sums past `u64::MAX`
    pub fn build(before: &[FoldedStack], after: &[FoldedStack]) -> Result<Self, FlamegraphError> {
        let mut tree = Self {
            nodes: vec![DiffNode::new(ROOT_FRAME_NAME.to_string(), None, 0)],
        };
        for entry in before {
            tree.insert(entry, WeightSide::Before)?;
        }
        for entry in after {
            tree.insert(entry, WeightSide::After)?;
        }

        if tree.total(WeightSide::Before) == 0 && tree.total(WeightSide::After) == 0 {
            return Err(FlamegraphError::EmptyInput);
        }

        tree.compute_rates();
        debug!(
            "Built diff tree: {} nodes, {} before / {} after samples",
            tree.nodes.len(),
            tree.total(WeightSide::Before),
            tree.total(WeightSide::After)
        );
        Ok(tree)
    }

    fn insert(&mut self, entry: &FoldedStack, side: WeightSide) -> Result<(), FlamegraphError> {
        if entry.count == 0 {
            return Ok(());
        }
        // Root bounds every node on the same side.
        let total = self.total(side);
        if total.checked_add(entry.count).is_none() {
            return Err(FlamegraphError::CountOverflow {
                total,
                count: entry.count,
            });
        }

        let mut current = Self::ROOT;
        self.add(current, side, entry.count);
        for name in entry.frames() {
            current = self.child_or_insert(current, name);
            self.add(current, side, entry.count);
        }
        match side {
            WeightSide::Before => self.nodes[current].self_before += entry.count,
            WeightSide::After => self.nodes[current].self_after += entry.count,
        }
        Ok(())
    }

    fn add(&mut self, id: NodeId, side: WeightSide, count: u64) {
        match side {
            WeightSide::Before => self.nodes[id].count_before += count,
            WeightSide::After => self.nodes[id].count_after += count,
        }
    }

    fn child_or_insert(&mut self, parent: NodeId, name: &str) -> NodeId {
        if let Some(id) = self.nodes[parent].child(name) {
            return id;
        }
        let id = self.nodes.len();
        let depth = self.nodes[parent].depth + 1;
        self.nodes.push(DiffNode::new(name.to_string(), Some(parent), depth));
        let node = &mut self.nodes[parent];
        node.children.push(id);
        node.child_index.insert(name.to_string(), id);
        id
    }

    fn compute_rates(&mut self) {
        let total_before = self.total(WeightSide::Before);
        let total_after = self.total(WeightSide::After);
        for node in &mut self.nodes {
            node.rate_before = rate(node.count_before, total_before);
            node.rate_after = rate(node.count_after, total_after);
            node.delta = node.rate_after - node.rate_before;
        }
    }

    pub fn total(&self, side: WeightSide) -> u64 {
        self.nodes[Self::ROOT].count(side)
    }

    pub fn node(&self, id: NodeId) -> &DiffNode {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[DiffNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn max_depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    pub fn find<'a>(&self, path: impl IntoIterator<Item = &'a str>) -> Option<NodeId> {
        path.into_iter()
            .try_fold(Self::ROOT, |id, name| self.nodes[id].child(name))
    }

    pub fn sorted_children(&self, id: NodeId) -> Vec<NodeId> {
        let mut children = self.nodes[id].children.clone();
        children.sort_by(|a, b| self.nodes[*a].name.cmp(&self.nodes[*b].name));
        children
    }

    fn path(&self, id: NodeId) -> String {
        let mut names = Vec::new();
        let mut current = id;
        while let Some(parent) = self.nodes[current].parent {
            names.push(self.nodes[current].name.as_str());
            current = parent;
        }
        names.reverse();
        names.join(";")
    }

    /// Paths with the largest absolute delta, biggest first
    pub fn biggest_changes(&self, top_n: usize) -> Vec<FrameChange> {
        let mut ids: Vec<NodeId> = (1..self.nodes.len())
            .filter(|id| self.nodes[*id].delta != 0.0)
            .collect();
        ids.sort_by(|a, b| {
            self.nodes[*b]
                .delta
                .abs()
                .total_cmp(&self.nodes[*a].delta.abs())
                .then_with(|| a.cmp(b))
        });
        ids.into_iter()
            .take(top_n)
            .map(|id| {
                let node = &self.nodes[id];
                FrameChange {
                    path: self.path(id),
                    rate_before: node.rate_before,
                    rate_after: node.rate_after,
                    delta: node.delta,
                }
            })
            .collect()
    }
}

fn rate(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

/// Lay out a differential tree
///
/// **Public** - entry point for `diff` rendering
///
/// # Arguments
/// * `tree` - Merged tree from `DiffTree::build`
/// * `config` - Same options as a normal layout
/// * `side` - Dataset that sets widths; falls back to the other side when
///   the chosen one has no samples
///
/// # Errors
/// * `FlamegraphError::EmptyInput` - Both sides are empty
pub fn layout_diff(
    tree: &DiffTree,
    config: &FlamegraphConfig,
    side: WeightSide,
) -> Result<FlameLayout, FlamegraphError> {
    let side = if tree.total(side) > 0 {
        side
    } else {
        side.other()
    };
    let total = tree.total(side);
    if total == 0 {
        return Err(FlamegraphError::EmptyInput);
    }

    info!("Laying out diff tree ({} nodes, widths from {})", tree.len(), side);

    let height = canvas_height(tree.max_depth());
    let placements = place_nodes(
        DiffTree::ROOT,
        config.drawable_width(),
        config.min_width,
        |id| tree.node(id).count(side),
        |id| tree.sorted_children(id),
    );

    let rects = placements
        .into_iter()
        .map(|p| {
            let node = tree.node(p.node);
            let color = if p.node == DiffTree::ROOT {
                Rgb::NEUTRAL
            } else {
                diff_color(node.delta)
            };
            LayoutRect {
                x: p.x,
                y: row_y(height, p.depth),
                width: p.width,
                height: FRAME_HEIGHT - 1.0,
                depth: p.depth,
                node: p.node,
                name: node.name.clone(),
                inclusive_count: node.count(side),
                self_count: node.self_count(side),
                percent: percent_of(node.count(side), total),
                color,
                label: get_truncated_name(&node.name, p.width),
                diff: Some(DiffInfo {
                    count_before: node.count_before,
                    count_after: node.count_after,
                    rate_before: node.rate_before,
                    rate_after: node.rate_after,
                    delta: node.delta,
                }),
            }
        })
        .collect();

    let subtitle = config.subtitle.clone().unwrap_or_else(|| {
        format!(
            "before: {} samples, after: {} samples (widths: {})",
            tree.total(WeightSide::Before),
            tree.total(WeightSide::After),
            side
        )
    });

    Ok(FlameLayout {
        title: config.title.clone(),
        subtitle,
        total_samples: total,
        canvas_width: config.width.max(MIN_CANVAS_WIDTH),
        canvas_height: height,
        rects,
        differential: true,
    })
}
