//! Diff command implementation.
//! Merges two folded profiles into a differential flame graph.

use super::models::DiffArgs;
use super::utils::{flamegraph_config, load_settings, read_folded_input, summary_for_folded};
use crate::flamegraph::{layout_diff, DiffTree};
use crate::output::{render_diff_summary, write_layout_json, write_svg};
use anyhow::{Context, Result};
use colored::*;
use log::info;

/// Execute the diff command
///
/// **Public** - main entry point called from main.rs
///
/// # Errors
/// * Either input cannot be read
/// * Both inputs are empty (`FlamegraphError::EmptyInput`)
/// * Output files cannot be written
pub fn execute_diff(args: DiffArgs) -> Result<DiffTree> {
    let settings = load_settings(args.render.config.as_deref())?;

    // Step 1: Load both datasets
    let before = read_folded_input(&args.before).context("Failed to read baseline stacks")?;
    let after = read_folded_input(&args.after).context("Failed to read new stacks")?;
    summary_for_folded(&before).log();
    summary_for_folded(&after).log();

    // Step 2: Merge
    let tree = DiffTree::build(&before.stacks, &after.stacks)
        .context("Failed to merge profiles")?;

    // Step 3: Lay out and write
    if args.output_svg.is_some() || args.output_json.is_some() {
        let config = flamegraph_config(&args.render, &settings, "Differential Flame Graph");
        let layout = layout_diff(&tree, &config, args.weight)
            .context("Failed to lay out differential flamegraph")?;

        if let Some(path) = &args.output_svg {
            write_svg(&layout, path).context("Failed to write differential SVG")?;
            println!(
                "🔥 Differential flamegraph written to {}",
                path.display().to_string().cyan()
            );
        }
        if let Some(path) = &args.output_json {
            write_layout_json(&layout, path).context("Failed to write layout JSON")?;
            info!("✓ Layout written to: {}", path.display());
        }
    }

    // Step 4: Terminal summary
    if args.summary {
        println!("{}", render_diff_summary(&tree, &tree.biggest_changes(args.top_changes)));
    }

    Ok(tree)
}
