//! Output writers for folded stacks, layouts and flame graphs.
//!
//! This module handles writing data to disk in various formats:
//! - Folded stack text
//! - SVG flame graphs (normal and differential)
//! - JSON layout documents
//! - Terminal text summaries

pub mod folded;
pub mod json;
pub mod svg;
pub mod text;

// Re-export main functions
pub use folded::write_folded;
pub use json::{layout_to_string, read_layout_json, write_layout_json, LayoutDocument};
pub use svg::{render_svg, write_svg, xml_escape};
pub use text::{generate_text_summary, render_diff_summary};

use crate::utils::error::OutputError;
use log::debug;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Validate that an output path is writable
///
/// **Private** - shared by every writer
fn validate_output_path(path: &Path, expected_ext: &str) -> Result<(), OutputError> {
    if path.as_os_str().is_empty() {
        return Err(OutputError::InvalidPath("Path is empty".to_string()));
    }

    // Check if we're trying to overwrite a directory
    if path.is_dir() {
        return Err(OutputError::InvalidPath(format!(
            "Path is a directory: {}",
            path.display()
        )));
    }

    if path.extension().map_or(true, |ext| ext != expected_ext) {
        debug!(
            "File does not have .{} extension: {}",
            expected_ext,
            path.display()
        );
    }

    Ok(())
}

/// Validate `path`, create its parent directories and write `content`
///
/// **Private** - common tail of the text-based writers
fn write_text_file(content: &str, path: &Path, expected_ext: &str) -> Result<(), OutputError> {
    validate_output_path(path, expected_ext)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            debug!("Creating parent directories: {}", parent.display());
            std::fs::create_dir_all(parent).map_err(|e| {
                OutputError::InvalidPath(format!(
                    "Cannot create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    let file = File::create(path).map_err(OutputError::WriteFailed)?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(content.as_bytes())
        .map_err(OutputError::WriteFailed)?;
    writer.flush().map_err(OutputError::WriteFailed)?;

    Ok(())
}
