//! Proportional flame-graph layout.
//!
//! Turns a frame tree into positioned rectangles: root on the bottom row
//! spanning the drawable width, each child placed left to right (by name)
//! with a width proportional to its share of the parent. The result is plain
//! data; `output::svg` and `output::json` are two presentations of it.

use super::color::{name_color, Rgb};
use super::tree::{FrameTree, NodeId};
use crate::utils::config::{
    BOTTOM_MARGIN, CHAR_WIDTH, DEFAULT_WIDTH, FONT_SIZE, FRAME_HEIGHT, LABEL_PADDING,
    MIN_CANVAS_WIDTH, MIN_TRUNCATED_LABEL_WIDTH, MIN_VISIBLE_WIDTH, SIDE_MARGIN, TOP_MARGIN,
};
use crate::utils::error::FlamegraphError;
use log::{debug, info};
use serde::Serialize;

/// Flamegraph configuration
#[derive(Debug, Clone, PartialEq)]
pub struct FlamegraphConfig {
    pub title: String,
    /// Defaults to "<n> samples" when unset
    pub subtitle: Option<String>,
    /// Canvas width in pixels
    pub width: usize,
    /// Narrower frames (and their subtrees) are not emitted
    pub min_width: f64,
}

impl Default for FlamegraphConfig {
    fn default() -> Self {
        Self {
            title: "Flame Graph".to_string(),
            subtitle: None,
            width: DEFAULT_WIDTH,
            min_width: MIN_VISIBLE_WIDTH,
        }
    }
}

impl FlamegraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    /// Canvas width, never below the minimum canvas width
    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width.max(MIN_CANVAS_WIDTH);
        self
    }

    pub fn with_min_width(mut self, min_width: f64) -> Self {
        self.min_width = min_width.max(0.0);
        self
    }

    /// Width available to the root frame
    pub fn drawable_width(&self) -> f64 {
        (self.width.max(MIN_CANVAS_WIDTH) as f64 - 2.0 * SIDE_MARGIN).max(1.0)
    }
}

/// Before/after figures attached to rectangles of a differential layout
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DiffInfo {
    pub count_before: u64,
    pub count_after: u64,
    pub rate_before: f64,
    pub rate_after: f64,
    /// `rate_after - rate_before`
    pub delta: f64,
}

/// One positioned frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub depth: usize,
    /// Node index in the source tree
    pub node: NodeId,
    pub name: String,
    pub inclusive_count: u64,
    pub self_count: u64,
    /// Share of the total, 0-100
    pub percent: f64,
    pub color: Rgb,
    /// Text drawn inside the frame, if it fits
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffInfo>,
}

/// A complete layout, ready to render
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlameLayout {
    pub title: String,
    pub subtitle: String,
    pub total_samples: u64,
    pub canvas_width: usize,
    pub canvas_height: usize,
    /// Pre-order: every parent precedes its children
    pub rects: Vec<LayoutRect>,
    /// Set for differential layouts
    pub differential: bool,
}

impl FlameLayout {
    /// Rectangle for a node, if it was emitted
    pub fn rect_for(&self, node: NodeId) -> Option<&LayoutRect> {
        self.rects.iter().find(|r| r.node == node)
    }

    /// Baseline y of the text row under the frames
    pub fn details_y(&self) -> f64 {
        self.canvas_height as f64 - 6.0
    }
}

/// Position of one emitted node, before any decoration
#[derive(Debug, Clone, Copy)]
pub(crate) struct Placement {
    pub node: NodeId,
    pub depth: usize,
    pub x: f64,
    pub width: f64,
}

/// Width-proportional placement over any tree shape
///
/// `weight(id)` gives a node's inclusive weight, `children(id)` its children
/// in render order. Walks with an explicit stack; nodes narrower than
/// `min_width` are skipped along with their subtrees, but their footprint is
/// still reserved so later siblings stay in place.
pub(crate) fn place_nodes<W, C>(
    root: NodeId,
    root_width: f64,
    min_width: f64,
    weight: W,
    children: C,
) -> Vec<Placement>
where
    W: Fn(NodeId) -> u64,
    C: Fn(NodeId) -> Vec<NodeId>,
{
    let mut placements = Vec::new();
    let mut stack = vec![Placement {
        node: root,
        depth: 0,
        x: SIDE_MARGIN,
        width: root_width,
    }];

    while let Some(current) = stack.pop() {
        if current.width < min_width {
            continue;
        }
        placements.push(current);

        let parent_weight = weight(current.node);
        if parent_weight == 0 {
            continue;
        }

        let mut offset = current.x;
        let mut pending = Vec::new();
        for child in children(current.node) {
            let child_weight = weight(child);
            if child_weight == 0 {
                continue;
            }
            let width = current.width * child_weight as f64 / parent_weight as f64;
            pending.push(Placement {
                node: child,
                depth: current.depth + 1,
                x: offset,
                width,
            });
            offset += width;
        }
        // Reverse so the leftmost child is popped (and emitted) first.
        stack.extend(pending.into_iter().rev());
    }

    placements
}

/// Canvas height for a tree of the given depth
pub fn canvas_height(max_depth: usize) -> usize {
    ((max_depth + 2) as f64 * FRAME_HEIGHT + TOP_MARGIN) as usize
}

/// Top edge of a frame row; row 0 (the root) sits at the bottom
pub fn row_y(canvas_height: usize, depth: usize) -> f64 {
    canvas_height as f64 - BOTTOM_MARGIN - (depth + 1) as f64 * FRAME_HEIGHT
}

/// Get truncated label for a frame of the given pixel width
///
/// **Public** - shared by the SVG renderer and tests
///
/// # Returns
/// * Full name if it fits (`width > chars * 6.5 + 6`)
/// * First `(width - 6) / 6.5 - 2` characters plus `..` if `width > 20`
/// * `None` otherwise
pub fn get_truncated_name(name: &str, width: f64) -> Option<String> {
    let chars = name.chars().count();
    if width > chars as f64 * CHAR_WIDTH + LABEL_PADDING {
        return Some(name.to_string());
    }
    if width > MIN_TRUNCATED_LABEL_WIDTH {
        // The `..` suffix takes two of the characters that fit.
        let max_chars = (((width - LABEL_PADDING) / CHAR_WIDTH) as usize).saturating_sub(2);
        if max_chars > 0 {
            let prefix: String = name.chars().take(max_chars).collect();
            return Some(format!("{prefix}.."));
        }
    }
    None
}

/// Percent of `total`, 0 when total is 0
pub fn percent_of(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * count as f64 / total as f64
    }
}

/// Lay out a frame tree
///
/// **Public** - main entry point for flame graph layout
///
/// # Arguments
/// * `tree` - Frame tree from `FrameTree::build`
/// * `config` - Title, canvas width and visibility threshold
///
/// # Returns
/// Rectangles in pre-order plus canvas dimensions
///
/// # Errors
/// * `FlamegraphError::EmptyInput` - Tree has no samples
///
/// # Example
/// ```ignore
/// let tree = FrameTree::build(&stacks)?;
/// let layout = layout_tree(&tree, &FlamegraphConfig::new().with_title("CPU"))?;
/// ```
pub fn layout_tree(tree: &FrameTree, config: &FlamegraphConfig) -> Result<FlameLayout, FlamegraphError> {
    let total = tree.total();
    if total == 0 {
        return Err(FlamegraphError::EmptyInput);
    }

    info!("Laying out {} frames ({} samples)", tree.len(), total);

    let height = canvas_height(tree.max_depth());
    let placements = place_nodes(
        FrameTree::ROOT,
        config.drawable_width(),
        config.min_width,
        |id| tree.node(id).inclusive_count,
        |id| tree.sorted_children(id),
    );

    let rects: Vec<LayoutRect> = placements
        .into_iter()
        .map(|p| {
            let node = tree.node(p.node);
            let color = if p.node == FrameTree::ROOT {
                Rgb::NEUTRAL
            } else {
                name_color(&node.name)
            };
            LayoutRect {
                x: p.x,
                y: row_y(height, p.depth),
                width: p.width,
                height: FRAME_HEIGHT - 1.0,
                depth: p.depth,
                node: p.node,
                name: node.name.clone(),
                inclusive_count: node.inclusive_count,
                self_count: node.self_count,
                percent: percent_of(node.inclusive_count, total),
                color,
                label: get_truncated_name(&node.name, p.width),
                diff: None,
            }
        })
        .collect();

    debug!(
        "Emitted {} of {} frames (font {}px)",
        rects.len(),
        tree.len(),
        FONT_SIZE
    );

    Ok(FlameLayout {
        title: config.title.clone(),
        subtitle: config
            .subtitle
            .clone()
            .unwrap_or_else(|| format!("{total} samples")),
        total_samples: total,
        canvas_width: config.width.max(MIN_CANVAS_WIDTH),
        canvas_height: height,
        rects,
        differential: false,
    })
}
