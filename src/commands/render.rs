//! Render command implementation.
//!
//! Reads folded stacks (from `record`, `profile` or any other folding tool)
//! and writes the flame graph as SVG and/or a JSON layout.

use super::models::{RenderArgs, RunSummary};
use super::utils::{flamegraph_config, load_settings, read_folded_input, summary_for_folded, write_outputs};
use crate::output::generate_text_summary;
use crate::utils::error::FlamegraphError;
use anyhow::{Context, Result};
use log::info;

/// Execute the render command
///
/// **Public** - main entry point called from main.rs
///
/// # Errors
/// * Input cannot be read
/// * Input holds no valid stacks (`FlamegraphError::EmptyInput`)
/// * Output files cannot be written
pub fn execute_render(args: RenderArgs) -> Result<RunSummary> {
    let settings = load_settings(args.render.config.as_deref())?;

    info!("Step 1/2: Reading folded stacks");
    let parsed = read_folded_input(&args.input)?;
    let summary = summary_for_folded(&parsed);
    if parsed.stacks.is_empty() {
        summary.log();
        return Err(FlamegraphError::EmptyInput)
            .with_context(|| format!("No valid stacks in {}", args.input.display()));
    }

    info!("Step 2/2: Rendering {} unique stacks", parsed.stacks.len());
    let default_title = args
        .input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Flame Graph".to_string());
    let config = flamegraph_config(&args.render, &settings, &default_title);
    write_outputs(&parsed.stacks, &args.outputs, &config)?;

    if args.print_summary {
        println!("{}", generate_text_summary(&parsed.stacks, 10));
    }

    summary.log();
    Ok(summary)
}
