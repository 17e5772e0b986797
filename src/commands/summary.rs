//! Summary command implementation.

use super::models::{RunSummary, SummaryArgs};
use super::utils::{read_folded_input, summary_for_folded};
use crate::output::generate_text_summary;
use anyhow::Result;

/// Print hot stacks and self time for a folded file
///
/// **Public** - main entry point called from main.rs
pub fn execute_summary(args: SummaryArgs) -> Result<RunSummary> {
    let parsed = read_folded_input(&args.input)?;
    let summary = summary_for_folded(&parsed);

    if parsed.stacks.is_empty() {
        println!("No valid stacks in {}", args.input.display());
    } else {
        println!("{}", generate_text_summary(&parsed.stacks, args.top));
    }

    summary.log();
    Ok(summary)
}
