//! flamefold CLI
//!
//! Records, renders and compares CPU profiles as flame graphs.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use std::path::PathBuf;
use std::time::Duration;

use flamefold::commands::{
    display_version, execute_diff, execute_profile, execute_record, execute_render,
    execute_summary, DiffArgs, OutputTargets, ProfileArgs, RecordArgs, RenderArgs, RenderOptions,
    SummaryArgs,
};
use flamefold::flamegraph::WeightSide;
use flamefold::utils::config::DEFAULT_DURATION_SECS;

/// flamefold - stack sampling and flame graphs
#[derive(Parser, Debug)]
#[command(name = "flamefold")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Flame graph appearance, shared by every rendering command
#[derive(Args, Debug, Clone)]
struct RenderFlags {
    /// Settings file (TOML) with [render], [sampling] and [filter] tables
    #[arg(long, env = "FLAMEFOLD_CONFIG")]
    config: Option<PathBuf>,

    /// Flamegraph title
    #[arg(long)]
    title: Option<String>,

    /// Flamegraph width in pixels
    #[arg(long)]
    width: Option<usize>,

    /// Frames narrower than this many pixels are not drawn
    #[arg(long)]
    min_width: Option<f64>,
}

impl From<RenderFlags> for RenderOptions {
    fn from(flags: RenderFlags) -> Self {
        Self {
            config: flags.config,
            title: flags.title,
            width: flags.width,
            min_width: flags.min_width,
        }
    }
}

/// Output files for commands that produce a single profile
#[derive(Args, Debug, Clone)]
struct OutputFlags {
    /// Output path for folded stacks
    #[arg(long)]
    folded: Option<PathBuf>,

    /// Output path for SVG flamegraph
    #[arg(long)]
    svg: Option<PathBuf>,

    /// Output path for JSON layout
    #[arg(long)]
    json: Option<PathBuf>,
}

impl From<OutputFlags> for OutputTargets {
    fn from(flags: OutputFlags) -> Self {
        Self {
            folded: flags.folded,
            svg: flags.svg,
            json: flags.json,
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Sample a built-in CPU workload in this process
    Record {
        /// Workload duration in seconds
        #[arg(short, long, default_value = "2")]
        duration: f64,

        /// Sampling frequency in Hz
        #[arg(short, long)]
        freq: Option<u32>,

        /// Maximum samples kept
        #[arg(long)]
        max_samples: Option<usize>,

        #[command(flatten)]
        outputs: OutputFlags,

        #[command(flatten)]
        render: RenderFlags,

        /// Print text summary to stdout
        #[arg(long)]
        summary: bool,
    },

    /// Sample another running process with perf events (Linux)
    Profile {
        /// Process id to sample
        #[arg(short, long)]
        pid: i32,

        /// Sampling duration in seconds
        #[arg(short, long, default_value_t = DEFAULT_DURATION_SECS as f64)]
        duration: f64,

        /// Sampling frequency in Hz
        #[arg(short, long)]
        freq: Option<u32>,

        /// Maximum samples kept
        #[arg(long)]
        max_samples: Option<usize>,

        /// Ring buffer size in pages (power of two)
        #[arg(long)]
        mmap_pages: Option<usize>,

        #[command(flatten)]
        outputs: OutputFlags,

        #[command(flatten)]
        render: RenderFlags,

        /// Print text summary to stdout
        #[arg(long)]
        summary: bool,
    },

    /// Render folded stacks as a flamegraph
    Render {
        /// Folded stack file
        input: PathBuf,

        /// Output path for SVG flamegraph
        #[arg(short, long, default_value = "flamegraph.svg")]
        svg: PathBuf,

        /// Output path for JSON layout
        #[arg(long)]
        json: Option<PathBuf>,

        #[command(flatten)]
        render: RenderFlags,

        /// Print text summary to stdout
        #[arg(long)]
        summary: bool,
    },

    /// Compare two folded profiles as a differential flamegraph
    Diff {
        /// Folded stacks of the baseline run
        before: PathBuf,

        /// Folded stacks of the new run
        after: PathBuf,

        /// Output path for the differential SVG
        #[arg(short, long, default_value = "diff.svg")]
        svg: PathBuf,

        /// Output path for the differential JSON layout
        #[arg(long)]
        json: Option<PathBuf>,

        /// Which run sets frame widths (before | after)
        #[arg(long, default_value = "after")]
        weight: WeightSide,

        /// Number of changed frames to list
        #[arg(long, default_value = "10")]
        top: usize,

        #[command(flatten)]
        render: RenderFlags,

        /// Skip the terminal summary
        #[arg(long)]
        quiet: bool,
    },

    /// Print hot stacks and self time of a folded file
    Summary {
        /// Folded stack file
        input: PathBuf,

        /// Number of stacks to show
        #[arg(long, default_value = "10")]
        top: usize,
    },

    /// Display version information
    Version,
}

fn parse_duration(seconds: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds)
        .with_context(|| format!("Invalid duration: {seconds} seconds"))
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    // Execute command
    match cli.command {
        Commands::Record {
            duration,
            freq,
            max_samples,
            outputs,
            render,
            summary,
        } => {
            let mut outputs = OutputTargets::from(outputs);
            if outputs.is_empty() {
                outputs = RecordArgs::default().outputs;
            }
            execute_record(RecordArgs {
                duration: parse_duration(duration)?,
                frequency_hz: freq,
                max_samples,
                outputs,
                render: render.into(),
                print_summary: summary,
            })?;
        }

        Commands::Profile {
            pid,
            duration,
            freq,
            max_samples,
            mmap_pages,
            outputs,
            render,
            summary,
        } => {
            let mut outputs = OutputTargets::from(outputs);
            if outputs.is_empty() {
                outputs.folded = Some(PathBuf::from(format!("pid-{pid}.folded")));
                outputs.svg = Some(PathBuf::from(format!("pid-{pid}.svg")));
            }
            execute_profile(ProfileArgs {
                pid,
                duration: parse_duration(duration)?,
                frequency_hz: freq,
                max_samples,
                mmap_pages,
                outputs,
                render: render.into(),
                print_summary: summary,
            })?;
        }

        Commands::Render {
            input,
            svg,
            json,
            render,
            summary,
        } => {
            execute_render(RenderArgs {
                input,
                outputs: OutputTargets {
                    folded: None,
                    svg: Some(svg),
                    json,
                },
                render: render.into(),
                print_summary: summary,
            })?;
        }

        Commands::Diff {
            before,
            after,
            svg,
            json,
            weight,
            top,
            render,
            quiet,
        } => {
            execute_diff(DiffArgs {
                before,
                after,
                output_svg: Some(svg),
                output_json: json,
                weight,
                top_changes: top,
                render: render.into(),
                summary: !quiet,
            })?;
        }

        Commands::Summary { input, top } => {
            execute_summary(SummaryArgs { input, top })?;
        }

        Commands::Version => {
            display_version();
        }
    }

    Ok(())
}
