//! Helpers shared by the commands.

use super::models::{OutputTargets, RenderOptions, RunSummary};
use crate::aggregator::{read_folded_file, FoldedStack, FrameFilter, ParsedFolded};
use crate::flamegraph::{layout_tree, FlamegraphConfig, FrameTree};
use crate::output::{write_folded, write_layout_json, write_svg};
use crate::utils::config::Settings;
use anyhow::{Context, Result};
use log::{debug, info};
use std::path::Path;

/// Load the settings file if one was given
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => {
            info!("Loading settings from: {}", path.display());
            Settings::load(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))
        }
        None => Ok(Settings::default()),
    }
}

/// Flame graph options: CLI, then settings file, then defaults
pub fn flamegraph_config(
    options: &RenderOptions,
    settings: &Settings,
    default_title: &str,
) -> FlamegraphConfig {
    let mut config = FlamegraphConfig::new().with_title(
        options
            .title
            .clone()
            .or_else(|| settings.render.title.clone())
            .unwrap_or_else(|| default_title.to_string()),
    );
    if let Some(width) = options.width.or(settings.render.width) {
        config = config.with_width(width);
    }
    if let Some(min_width) = options.min_width.or(settings.render.min_width) {
        config = config.with_min_width(min_width);
    }
    debug!("Flamegraph config: {:?}", config);
    config
}

/// Frame filter from the `[filter]` table
pub fn frame_filter(settings: &Settings) -> FrameFilter {
    FrameFilter::from_settings(&settings.filter)
}

/// Read folded input, logging every skipped line
pub fn read_folded_input(path: &Path) -> Result<ParsedFolded> {
    info!("Reading folded stacks from: {}", path.display());
    let parsed = read_folded_file(path)
        .with_context(|| format!("Failed to read folded stacks from {}", path.display()))?;
    debug!(
        "{} unique stacks, {} skipped lines",
        parsed.stacks.len(),
        parsed.diagnostics.len()
    );
    Ok(parsed)
}

/// Build, lay out and write every requested output for a folded dataset
pub fn write_outputs(
    stacks: &[FoldedStack],
    outputs: &OutputTargets,
    config: &FlamegraphConfig,
) -> Result<()> {
    if let Some(path) = &outputs.folded {
        write_folded(stacks, path).context("Failed to write folded stacks")?;
        info!("✓ Folded stacks written to: {}", path.display());
    }

    if outputs.svg.is_none() && outputs.json.is_none() {
        return Ok(());
    }

    let tree = FrameTree::build(stacks).context("Failed to build frame tree")?;
    let layout = layout_tree(&tree, config).context("Failed to lay out flamegraph")?;

    if let Some(path) = &outputs.svg {
        write_svg(&layout, path).context("Failed to write flamegraph SVG")?;
        info!("✓ Flamegraph written to: {}", path.display());
    }
    if let Some(path) = &outputs.json {
        write_layout_json(&layout, path).context("Failed to write layout JSON")?;
        info!("✓ Layout written to: {}", path.display());
    }
    Ok(())
}

/// Summary for a command that read folded text instead of sampling
pub fn summary_for_folded(parsed: &ParsedFolded) -> RunSummary {
    RunSummary {
        samples_collected: parsed.stacks.iter().map(|s| s.count).sum(),
        unique_stacks: parsed.stacks.len(),
        skipped_lines: parsed.diagnostics.len(),
        ..Default::default()
    }
}

/// Display version information
pub fn display_version() {
    println!("flamefold v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Sampling profiler front-end: folded stacks, frame trees and flame graphs.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::parse_folded;

    #[test]
    fn test_cli_overrides_settings() {
        let mut settings = Settings::default();
        settings.render.title = Some("From file".to_string());
        settings.render.width = Some(800);

        let options = RenderOptions {
            title: Some("From CLI".to_string()),
            ..Default::default()
        };
        let config = flamegraph_config(&options, &settings, "Default");

        assert_eq!(config.title, "From CLI");
        assert_eq!(config.width, 800);
    }

    #[test]
    fn test_default_title() {
        let config = flamegraph_config(&RenderOptions::default(), &Settings::default(), "CPU");
        assert_eq!(config.title, "CPU");
        assert_eq!(config.width, 1200);
    }

    #[test]
    fn test_missing_settings_file_is_an_error() {
        assert!(load_settings(Some(Path::new("/nonexistent/flamefold.toml"))).is_err());
        assert!(load_settings(None).is_ok());
    }

    #[test]
    fn test_summary_for_folded() {
        let parsed = parse_folded("a;b 3\nbroken\na;c 2\n");
        let summary = summary_for_folded(&parsed);
        assert_eq!(summary.samples_collected, 5);
        assert_eq!(summary.unique_stacks, 2);
        assert_eq!(summary.skipped_lines, 1);
    }
}
