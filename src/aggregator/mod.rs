//! Aggregation of samples into folded stacks and metrics.
//!
//! This module transforms resolved samples into:
//! - Folded stack format (for frame trees and flame graphs)
//! - Hot stack and hot function rankings
//! - Sample distribution statistics

pub mod folded_format;
pub mod metrics;
pub mod stack_folder;

// Re-export main types and functions
pub use folded_format::{format_folded, parse_folded, read_folded_file, LineDiagnostic, ParsedFolded};
pub use metrics::{
    calculate_hot_functions, calculate_hot_stacks, calculate_sample_distribution, HotFunction,
    HotStack, SampleDistribution,
};
pub use stack_folder::{
    fold_samples, fold_stacks, merge_folded, resolve_sample, sanitize_frame_name, total_count,
    FoldOutcome, FoldedStack, FrameFilter,
};
