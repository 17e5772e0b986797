//! JSON layout output writer.
//!
//! Serializes a `FlameLayout` with a small envelope so other tools can draw
//! the same rectangles without re-running the layout.

use crate::flamegraph::FlameLayout;
use crate::utils::error::OutputError;
use chrono::Utc;
use log::{debug, info};
use serde::Serialize;
use std::fs::File;
use std::path::Path;

/// Format version of the layout document
pub const LAYOUT_FORMAT_VERSION: &str = "1.0.0";

/// Layout plus provenance
#[derive(Debug, Serialize)]
pub struct LayoutDocument<'a> {
    pub version: &'static str,
    /// RFC 3339 timestamp
    pub generated_at: String,
    pub generator: String,
    #[serde(flatten)]
    pub layout: &'a FlameLayout,
}

impl<'a> LayoutDocument<'a> {
    pub fn new(layout: &'a FlameLayout) -> Self {
        Self {
            version: LAYOUT_FORMAT_VERSION,
            generated_at: Utc::now().to_rfc3339(),
            generator: format!("flamefold {}", env!("CARGO_PKG_VERSION")),
            layout,
        }
    }
}

/// Write a layout to a JSON string (for testing or in-memory use)
///
/// **Public** - useful for tests and piping
pub fn layout_to_string(layout: &FlameLayout) -> Result<String, OutputError> {
    serde_json::to_string_pretty(&LayoutDocument::new(layout)).map_err(OutputError::SerializationFailed)
}

/// Write a layout to a JSON file
///
/// **Public** - main entry point for JSON output
///
/// # Arguments
/// * `layout` - Layout to write
/// * `output_path` - Path to output JSON file
///
/// # Errors
/// * `OutputError::WriteFailed` - I/O error during write
/// * `OutputError::SerializationFailed` - JSON serialization error
/// * `OutputError::InvalidPath` - Path cannot be created or is invalid
///
/// # Example
/// ```ignore
/// let layout = layout_tree(&tree, &config)?;
/// write_layout_json(&layout, "layout.json")?;
/// ```
pub fn write_layout_json(layout: &FlameLayout, output_path: impl AsRef<Path>) -> Result<(), OutputError> {
    let output_path = output_path.as_ref();
    info!("Writing layout JSON to: {}", output_path.display());

    let json = layout_to_string(layout)?;
    super::write_text_file(&json, output_path, "json")?;

    info!(
        "Layout written successfully ({} rects, {} bytes)",
        layout.rects.len(),
        calculate_file_size(output_path)
    );
    Ok(())
}

/// Calculate file size in bytes
///
/// **Private** - internal utility
fn calculate_file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Read a layout document back as untyped JSON
///
/// **Public** - useful for validation and testing
///
/// # Errors
/// * `OutputError::WriteFailed` - File read error (reusing WriteFailed for I/O)
/// * `OutputError::SerializationFailed` - JSON parse error
pub fn read_layout_json(input_path: impl AsRef<Path>) -> Result<serde_json::Value, OutputError> {
    let input_path = input_path.as_ref();
    debug!("Reading layout from: {}", input_path.display());

    let file = File::open(input_path).map_err(OutputError::WriteFailed)?;
    let value: serde_json::Value =
        serde_json::from_reader(file).map_err(OutputError::SerializationFailed)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::FoldedStack;
    use crate::flamegraph::{layout_tree, FlamegraphConfig, FrameTree};

    fn layout() -> FlameLayout {
        let tree = FrameTree::build(&[FoldedStack::new("main;work", 2)]).unwrap();
        layout_tree(&tree, &FlamegraphConfig::new().with_title("json")).unwrap()
    }

    #[test]
    fn test_document_shape() {
        let json = layout_to_string(&layout()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["version"], LAYOUT_FORMAT_VERSION);
        assert_eq!(value["title"], "json");
        assert_eq!(value["total_samples"], 2);
        assert_eq!(value["rects"].as_array().unwrap().len(), 3);
        assert_eq!(value["rects"][0]["color"], "rgb(200,200,200)");
        assert!(value["rects"][0].get("diff").is_none());
        assert!(value["generated_at"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_write_and_read_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/layout.json");

        write_layout_json(&layout(), &path).unwrap();

        let value = read_layout_json(&path).unwrap();
        assert_eq!(value["rects"][2]["name"], "work");
    }
}
