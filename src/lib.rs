//! flamefold
//!
//! Sampling profiler front-end: collects call stacks from this process
//! (SIGPROF) or from another process (perf events), folds them into
//! `frame;frame;frame count` lines, and lays them out as flame graphs,
//! including differential before/after graphs.
//!
//! This crate provides the core implementation for the `flamefold` CLI tool.
//!
//! ## Getting Started
//!
//! ```bash
//! flamefold record --duration 2 --svg record.svg
//! flamefold profile --pid 1234 --duration 10 --svg app.svg
//! flamefold render app.folded --svg app.svg --json app.json
//! flamefold diff before.folded after.folded --svg diff.svg
//! ```
//!
//! ## Library use
//!
//! ```ignore
//! use flamefold::aggregator::parse_folded;
//! use flamefold::flamegraph::{layout_tree, FlamegraphConfig, FrameTree};
//! use flamefold::output::render_svg;
//!
//! let parsed = parse_folded("main;work 3\nmain;idle 1\n");
//! let tree = FrameTree::build(&parsed.stacks)?;
//! let layout = layout_tree(&tree, &FlamegraphConfig::new().with_title("CPU"))?;
//! let svg = render_svg(&layout);
//! ```

pub mod aggregator;
pub mod commands;
pub mod flamegraph;
pub mod output;
pub mod source;
pub mod symbols;
pub mod utils;
