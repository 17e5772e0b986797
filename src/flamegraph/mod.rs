//! Frame trees and flame graph layout.
//!
//! This module converts folded stacks into a call tree and then into
//! positioned, colored rectangles. Rendering to SVG or JSON lives in
//! `output`; everything here is pure computation.

pub mod color;
pub mod diff;
pub mod layout;
pub mod tree;

// Re-export main types
pub use color::{diff_color, name_color, Rgb};
pub use diff::{layout_diff, DiffNode, DiffTree, FrameChange, WeightSide};
pub use layout::{
    get_truncated_name, layout_tree, DiffInfo, FlameLayout, FlamegraphConfig, LayoutRect,
};
pub use tree::{FrameNode, FrameTree, NodeId};
