//! Calculate hot stacks and sample distribution from folded data.
//!
//! Hot stacks are the call paths that collected the most samples.
//! These are the primary targets for optimization.

use super::stack_folder::FoldedStack;
use log::debug;
use serde::Serialize;
use std::collections::HashMap;

/// One of the most-sampled stacks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotStack {
    pub stack: String,
    pub samples: u64,
    /// Share of all samples, 0-100
    pub percentage: f64,
}

/// Samples attributed to a function as the innermost frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotFunction {
    pub name: String,
    pub self_samples: u64,
    pub percentage: f64,
}

/// Calculate hot stacks from folded stacks
///
/// **Public** - main entry point for metrics calculation
///
/// # Arguments
/// * `stacks` - Folded stacks (any order)
/// * `top_n` - Number of stacks to return
///
/// # Returns
/// The `top_n` stacks by sample count, descending; ties keep stack order
pub fn calculate_hot_stacks(stacks: &[FoldedStack], top_n: usize) -> Vec<HotStack> {
    debug!("Calculating top {} hot stacks from {} stacks", top_n, stacks.len());

    let total: u64 = stacks.iter().map(|s| s.count).sum();
    let mut ranked: Vec<&FoldedStack> = stacks.iter().collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.stack.cmp(&b.stack)));

    ranked
        .into_iter()
        .take(top_n)
        .map(|stack| HotStack {
            stack: stack.stack.clone(),
            samples: stack.count,
            percentage: percentage(stack.count, total),
        })
        .collect()
}

/// Aggregate self samples per leaf function
///
/// **Public** - "where is the CPU actually burning" view
pub fn calculate_hot_functions(stacks: &[FoldedStack], top_n: usize) -> Vec<HotFunction> {
    let total: u64 = stacks.iter().map(|s| s.count).sum();
    let mut by_leaf: HashMap<&str, u64> = HashMap::new();
    for stack in stacks {
        *by_leaf.entry(stack.leaf()).or_insert(0) += stack.count;
    }

    let mut ranked: Vec<(&str, u64)> = by_leaf.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    ranked
        .into_iter()
        .take(top_n)
        .map(|(name, self_samples)| HotFunction {
            name: name.to_string(),
            self_samples,
            percentage: percentage(self_samples, total),
        })
        .collect()
}

fn percentage(part: u64, total: u64) -> f64 {
    if total > 0 {
        (part as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

/// Calculate sample distribution statistics
///
/// **Public** - provides summary statistics
pub fn calculate_sample_distribution(stacks: &[FoldedStack]) -> SampleDistribution {
    if stacks.is_empty() {
        return SampleDistribution::default();
    }

    let total: u64 = stacks.iter().map(|s| s.count).sum();
    let count = stacks.len();

    let mut counts: Vec<u64> = stacks.iter().map(|s| s.count).collect();
    counts.sort_unstable_by(|a, b| b.cmp(a));
    let median = counts[counts.len() / 2];

    // Top 10% of stacks
    let top_count = (count as f64 * 0.1).ceil() as usize;
    let top_samples: u64 = counts.iter().take(top_count).sum();

    SampleDistribution {
        total_samples: total,
        stack_count: count,
        mean_samples_per_stack: total as f64 / count as f64,
        median_samples_per_stack: median,
        max_depth: stacks.iter().map(FoldedStack::depth).max().unwrap_or(0),
        top_10_percent_samples: top_samples,
        top_10_percent_percentage: percentage(top_samples, total),
    }
}

/// Sample distribution statistics
///
/// **Public** - returned from calculate_sample_distribution
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SampleDistribution {
    pub total_samples: u64,

    /// Number of distinct stacks
    pub stack_count: usize,

    pub mean_samples_per_stack: f64,
    pub median_samples_per_stack: u64,

    /// Deepest stack, in frames
    pub max_depth: usize,

    /// Samples in the top 10% of stacks
    pub top_10_percent_samples: u64,
    pub top_10_percent_percentage: f64,
}

impl SampleDistribution {
    /// True if the top 10% of stacks hold more than 80% of samples
    pub fn is_highly_concentrated(&self) -> bool {
        self.top_10_percent_percentage > 80.0
    }

    /// Get human-readable summary
    ///
    /// **Public** - for logging and the summary command
    pub fn summary(&self) -> String {
        format!(
            "Samples: {} | Stacks: {} | Mean: {:.1} | Median: {} | Max depth: {} | Top 10%: {:.1}%",
            self.total_samples,
            self.stack_count,
            self.mean_samples_per_stack,
            self.median_samples_per_stack,
            self.max_depth,
            self.top_10_percent_percentage
        )
    }
}
