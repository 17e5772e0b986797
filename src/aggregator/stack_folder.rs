//! Fold resolved call-stacks into the collapsed-stack dataset.
//!
//! Folded stacks are the input of every later stage.
//! Format: "root;caller;callee count"
//!
//! Example: "main;run_workload;compute_hot 712"
//! This means: 712 samples landed in compute_hot, called from run_workload,
//! called from main.

use crate::source::RawSample;
use crate::symbols::{is_unresolved, SymbolCache, Symbolizer};
use crate::utils::config::{FilterSettings, DEFAULT_DENY_LIST, FRAME_DELIMITER};
use log::debug;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashSet;

/// A single folded stack entry
///
/// **Public** - consumed by the frame tree, metrics and writers
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FoldedStack {
    /// Frames root-first, joined by `;`
    pub stack: String,

    /// Number of samples with exactly this stack (always >= 1)
    pub count: u64,
}

impl FoldedStack {
    pub fn new(stack: impl Into<String>, count: u64) -> Self {
        Self {
            stack: stack.into(),
            count,
        }
    }

    /// Frames from root to leaf
    pub fn frames(&self) -> impl Iterator<Item = &str> {
        self.stack.split(FRAME_DELIMITER)
    }

    pub fn depth(&self) -> usize {
        self.frames().count()
    }

    /// Innermost frame
    pub fn leaf(&self) -> &str {
        self.stack
            .rsplit(FRAME_DELIMITER)
            .next()
            .unwrap_or(self.stack.as_str())
    }

    /// One line of folded text, without the newline
    pub fn to_line(&self) -> String {
        format!("{} {}", self.stack, self.count)
    }
}

/// Which frames survive folding
///
/// Entries ending in `::` deny a whole module path; anything else must match
/// the frame name exactly. Unresolved markers are dropped unless
/// `keep_unknown` is set.
#[derive(Debug, Clone)]
pub struct FrameFilter {
    exact: HashSet<String>,
    prefixes: Vec<String>,
    keep_unknown: bool,
}

impl Default for FrameFilter {
    /// Deny the sampler's own frames
    fn default() -> Self {
        let mut filter = Self::empty();
        for name in DEFAULT_DENY_LIST {
            filter = filter.with_deny(*name);
        }
        filter
    }
}

impl FrameFilter {
    /// Filter that denies nothing except unresolved markers
    pub fn empty() -> Self {
        Self {
            exact: HashSet::new(),
            prefixes: Vec::new(),
            keep_unknown: false,
        }
    }

    /// Default deny-list extended with a `[filter]` settings table
    pub fn from_settings(settings: &FilterSettings) -> Self {
        settings
            .deny
            .iter()
            .fold(Self::default(), |filter, name| filter.with_deny(name.as_str()))
            .with_keep_unknown(settings.keep_unknown)
    }

    pub fn with_deny(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if name.ends_with("::") {
            self.prefixes.push(name);
        } else {
            self.exact.insert(name);
        }
        self
    }

    pub fn with_keep_unknown(mut self, keep: bool) -> Self {
        self.keep_unknown = keep;
        self
    }

    /// True if `name` should appear in folded output
    pub fn allows(&self, name: &str) -> bool {
        if is_unresolved(name) {
            return self.keep_unknown;
        }
        if self.exact.contains(name) {
            return false;
        }
        !self.prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
    }
}

/// Result of folding a batch of stacks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FoldOutcome {
    /// Sorted by stack, one entry per distinct stack
    pub stacks: Vec<FoldedStack>,

    /// Stacks offered to the folder
    pub input_stacks: u64,

    /// Stacks that had no usable frame left after filtering
    pub empty_dropped: u64,
}

impl FoldOutcome {
    /// Sum of all counts; equals `input_stacks - empty_dropped`
    pub fn total_count(&self) -> u64 {
        total_count(&self.stacks)
    }
}

/// Sum of counts over a folded dataset
pub fn total_count(stacks: &[FoldedStack]) -> u64 {
    stacks.iter().map(|s| s.count).sum()
}

/// Make a frame name safe for the folded text format
///
/// The delimiter becomes `:` and line breaks become spaces.
pub fn sanitize_frame_name(name: &str) -> Cow<'_, str> {
    if !name.contains([FRAME_DELIMITER, '\n', '\r']) {
        return Cow::Borrowed(name);
    }
    Cow::Owned(
        name.chars()
            .map(|c| match c {
                FRAME_DELIMITER => ':',
                '\n' | '\r' => ' ',
                other => other,
            })
            .collect(),
    )
}

/// Resolve one sample into root-first frame names
///
/// **Public** - symbolization step of the pipeline
///
/// # Arguments
/// * `sample` - Raw sample, deepest frame first
/// * `symbolizer` - Resolver for addresses not yet cached
/// * `cache` - Session cache of resolved names
pub fn resolve_sample(
    sample: &RawSample,
    symbolizer: &mut dyn Symbolizer,
    cache: &mut SymbolCache,
) -> Vec<String> {
    sample
        .addresses
        .iter()
        .rev()
        .map(|addr| cache.resolve(*addr, symbolizer))
        .collect()
}

/// Fold resolved stacks into sorted `(stack, count)` entries
///
/// **Public** - main entry point for folding
///
/// # Arguments
/// * `stacks` - Root-first frame names, one vector per sample
/// * `filter` - Frames to drop before joining
///
/// # Returns
/// Entries sorted by stack string (byte order) with duplicates merged. The
/// result does not depend on the order of `stacks`.
///
/// # Algorithm
/// 1. Drop denied frames (and unresolved ones, unless kept)
/// 2. Drop stacks left empty or made only of unresolved markers
/// 3. Join the rest with `;` and sort
/// 4. Merge runs of equal keys
pub fn fold_stacks<S: AsRef<str>>(stacks: &[Vec<S>], filter: &FrameFilter) -> FoldOutcome {
    debug!("Folding {} stacks", stacks.len());

    let mut keys: Vec<String> = Vec::with_capacity(stacks.len());
    let mut empty_dropped = 0u64;

    for frames in stacks {
        let kept: Vec<Cow<'_, str>> = frames
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| filter.allows(name))
            .map(sanitize_frame_name)
            .collect();

        if kept.iter().all(|name| is_unresolved(name)) {
            empty_dropped += 1;
            continue;
        }

        let mut key = String::new();
        for (i, name) in kept.iter().enumerate() {
            if i > 0 {
                key.push(FRAME_DELIMITER);
            }
            key.push_str(name);
        }
        keys.push(key);
    }

    keys.sort_unstable();

    let mut folded: Vec<FoldedStack> = Vec::new();
    for key in keys {
        match folded.last_mut() {
            Some(last) if last.stack == key => last.count += 1,
            _ => folded.push(FoldedStack::new(key, 1)),
        }
    }

    debug!(
        "Folded into {} unique stacks ({} emptied by filtering)",
        folded.len(),
        empty_dropped
    );

    FoldOutcome {
        stacks: folded,
        input_stacks: stacks.len() as u64,
        empty_dropped,
    }
}

/// Resolve and fold a batch of raw samples in one pass
///
/// **Public** - convenience wrapper used by the record/profile commands
pub fn fold_samples(
    samples: &[RawSample],
    symbolizer: &mut dyn Symbolizer,
    cache: &mut SymbolCache,
    filter: &FrameFilter,
) -> FoldOutcome {
    let resolved: Vec<Vec<String>> = samples
        .iter()
        .map(|sample| resolve_sample(sample, symbolizer, cache))
        .collect();
    debug!(
        "Resolved {} samples ({} distinct addresses cached)",
        resolved.len(),
        cache.len()
    );
    fold_stacks(&resolved, filter)
}

/// Sort and merge already-counted entries
///
/// **Public** - used when reading folded text and when combining datasets
///
/// Counts saturate at `u64::MAX`; `parse_folded` rejects lines that would.
pub fn merge_folded(mut stacks: Vec<FoldedStack>) -> Vec<FoldedStack> {
    stacks.sort_unstable_by(|a, b| a.stack.cmp(&b.stack));

    let mut merged: Vec<FoldedStack> = Vec::with_capacity(stacks.len());
    for entry in stacks {
        match merged.last_mut() {
            Some(last) if last.stack == entry.stack => {
                last.count = last.count.saturating_add(entry.count)
            }
            _ => merged.push(entry),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Address;
    use crate::symbols::TableSymbolizer;

    fn stack(frames: &[&str]) -> Vec<String> {
        frames.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn test_fold_counts_duplicates() {
        let stacks = vec![
            stack(&["main", "b"]),
            stack(&["main", "a"]),
            stack(&["main", "b"]),
        ];
        let outcome = fold_stacks(&stacks, &FrameFilter::empty());

        assert_eq!(
            outcome.stacks,
            vec![FoldedStack::new("main;a", 1), FoldedStack::new("main;b", 2)]
        );
        assert_eq!(outcome.total_count(), 3);
    }

    #[test]
    fn test_filter_drops_sampler_frames() {
        let stacks = vec![
            stack(&["main", "work", "flamefold::source::self_sampler::sigprof_handler", "__restore_rt"]),
            stack(&["[unknown]", "main", "[unknown]", "work"]),
        ];
        let outcome = fold_stacks(&stacks, &FrameFilter::default());

        assert_eq!(outcome.stacks, vec![FoldedStack::new("main;work", 2)]);
    }

    #[test]
    fn test_all_unknown_stack_is_dropped() {
        let stacks = vec![stack(&["[unknown]", "[kernel]"]), stack(&["main"])];

        let outcome = fold_stacks(&stacks, &FrameFilter::default());
        assert_eq!(outcome.empty_dropped, 1);
        assert_eq!(outcome.total_count(), 1);

        let keep = FrameFilter::default().with_keep_unknown(true);
        let outcome = fold_stacks(&stacks, &keep);
        assert_eq!(outcome.empty_dropped, 1);
    }

    #[test]
    fn test_keep_unknown_retains_markers_in_mixed_stacks() {
        let stacks = vec![stack(&["main", "[unknown]"])];
        let outcome = fold_stacks(&stacks, &FrameFilter::empty().with_keep_unknown(true));
        assert_eq!(outcome.stacks, vec![FoldedStack::new("main;[unknown]", 1)]);
    }

    #[test]
    fn test_sanitize_frame_name() {
        assert_eq!(sanitize_frame_name("plain"), "plain");
        assert_eq!(sanitize_frame_name("a;b\nc"), "a:b c");
    }

    #[test]
    fn test_resolve_sample_reverses_to_root_first() {
        let mut symbolizer = TableSymbolizer::new()
            .with(0x30, "leaf")
            .with(0x20, "mid")
            .with(0x10, "main");
        let mut cache = SymbolCache::new();
        let sample = RawSample::new(vec![Address(0x30), Address(0x20), Address(0x10)], 0);

        assert_eq!(
            resolve_sample(&sample, &mut symbolizer, &mut cache),
            vec!["main", "mid", "leaf"]
        );
    }

    #[test]
    fn test_merge_folded_combines_counts() {
        let merged = merge_folded(vec![
            FoldedStack::new("b", 2),
            FoldedStack::new("a", 1),
            FoldedStack::new("b", 3),
        ]);
        assert_eq!(merged, vec![FoldedStack::new("a", 1), FoldedStack::new("b", 5)]);
    }

    #[test]
    fn test_merge_folded_saturates() {
        let max = i64::MAX as u64;
        let merged = merge_folded(vec![
            FoldedStack::new("a", max),
            FoldedStack::new("a", max),
            FoldedStack::new("a", max),
        ]);
        assert_eq!(merged, vec![FoldedStack::new("a", u64::MAX)]);
    }

    #[test]
    fn test_leaf_and_depth() {
        let entry = FoldedStack::new("main;run;compute_hot", 4);
        assert_eq!(entry.leaf(), "compute_hot");
        assert_eq!(entry.depth(), 3);
        assert_eq!(entry.to_line(), "main;run;compute_hot 4");
    }
}
