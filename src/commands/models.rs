//! Argument and result types shared by the commands.

use crate::flamegraph::WeightSide;
use log::{info, warn};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Where a command writes its results
///
/// Every field is optional; a command with no outputs still logs its run summary.
#[derive(Debug, Clone, Default)]
pub struct OutputTargets {
    /// Folded stack text
    pub folded: Option<PathBuf>,

    /// SVG flame graph
    pub svg: Option<PathBuf>,

    /// JSON layout document
    pub json: Option<PathBuf>,
}

impl OutputTargets {
    pub fn is_empty(&self) -> bool {
        self.folded.is_none() && self.svg.is_none() && self.json.is_none()
    }
}

/// Options every rendering command accepts
///
/// CLI values win over the settings file, which wins over built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Optional settings file (TOML)
    pub config: Option<PathBuf>,

    /// Flame graph title
    pub title: Option<String>,

    /// Canvas width in pixels
    pub width: Option<usize>,

    /// Narrowest frame that is drawn, in pixels
    pub min_width: Option<f64>,
}

/// Arguments for the record command
///
/// **Public** - used by main.rs to construct from CLI args
#[derive(Debug, Clone)]
pub struct RecordArgs {
    /// How long the built-in workload runs
    pub duration: Duration,

    /// Sampling frequency override
    pub frequency_hz: Option<u32>,

    /// Sample cap override
    pub max_samples: Option<usize>,

    pub outputs: OutputTargets,
    pub render: RenderOptions,

    /// Print text summary to stdout
    pub print_summary: bool,
}

impl Default for RecordArgs {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(2),
            frequency_hz: None,
            max_samples: None,
            outputs: OutputTargets {
                folded: Some(PathBuf::from("record.folded")),
                svg: Some(PathBuf::from("record.svg")),
                json: None,
            },
            render: RenderOptions::default(),
            print_summary: false,
        }
    }
}

/// Arguments for the profile command
#[derive(Debug, Clone)]
pub struct ProfileArgs {
    /// Target process id
    pub pid: i32,

    pub duration: Duration,
    pub frequency_hz: Option<u32>,
    pub max_samples: Option<usize>,

    /// Ring buffer size in pages (power of two)
    pub mmap_pages: Option<usize>,

    pub outputs: OutputTargets,
    pub render: RenderOptions,
    pub print_summary: bool,
}

/// Arguments for the render command
#[derive(Debug, Clone)]
pub struct RenderArgs {
    /// Folded stack input
    pub input: PathBuf,

    pub outputs: OutputTargets,
    pub render: RenderOptions,
    pub print_summary: bool,
}

/// Arguments for the diff command
#[derive(Debug, Clone)]
pub struct DiffArgs {
    /// Folded stacks of the baseline run
    pub before: PathBuf,

    /// Folded stacks of the new run
    pub after: PathBuf,

    /// Path to write the differential SVG
    pub output_svg: Option<PathBuf>,

    /// Path to write the differential layout JSON
    pub output_json: Option<PathBuf>,

    /// Which run sets frame widths
    pub weight: WeightSide,

    /// Number of changed frames listed in the terminal summary
    pub top_changes: usize,

    pub render: RenderOptions,

    /// Print a human-readable summary to the terminal
    pub summary: bool,
}

impl Default for DiffArgs {
    fn default() -> Self {
        Self {
            before: PathBuf::new(),
            after: PathBuf::new(),
            output_svg: Some(PathBuf::from("diff.svg")),
            output_json: None,
            weight: WeightSide::After,
            top_changes: 10,
            render: RenderOptions::default(),
            summary: true,
        }
    }
}

/// Arguments for the summary command
#[derive(Debug, Clone)]
pub struct SummaryArgs {
    pub input: PathBuf,

    /// Rows in the hot stack table
    pub top: usize,
}

/// What happened to the samples of one command run
///
/// Logged at the end of every command so drops are never silent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Samples captured (or read from folded input)
    pub samples_collected: u64,

    /// Samples discarded because the sample cap was reached
    pub capacity_drops: u64,

    /// Kernel-reported lost perf records
    pub lost_records: u64,

    /// Stacks that folded down to nothing
    pub empty_stack_drops: u64,

    /// Distinct stacks after folding
    pub unique_stacks: usize,

    /// Malformed folded lines that were skipped
    pub skipped_lines: usize,
}

impl RunSummary {
    /// True if any input was dropped or skipped
    pub fn has_losses(&self) -> bool {
        self.capacity_drops > 0
            || self.lost_records > 0
            || self.empty_stack_drops > 0
            || self.skipped_lines > 0
    }

    /// Log the summary, as a warning when something was lost
    pub fn log(&self) {
        if self.has_losses() {
            warn!("Run summary: {}", self);
        } else {
            info!("Run summary: {}", self);
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} samples, {} unique stacks, {} dropped at capacity, {} lost, {} empty stacks, {} skipped lines",
            self.samples_collected,
            self.unique_stacks,
            self.capacity_drops,
            self.lost_records,
            self.empty_stack_drops,
            self.skipped_lines
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_summary_losses() {
        let mut summary = RunSummary {
            samples_collected: 10,
            unique_stacks: 3,
            ..Default::default()
        };
        assert!(!summary.has_losses());

        summary.skipped_lines = 1;
        assert!(summary.has_losses());
        assert_eq!(
            summary.to_string(),
            "10 samples, 3 unique stacks, 0 dropped at capacity, 0 lost, 0 empty stacks, 1 skipped lines"
        );
    }

    #[test]
    fn test_output_targets_empty() {
        assert!(OutputTargets::default().is_empty());
        assert!(!RecordArgs::default().outputs.is_empty());
    }
}
