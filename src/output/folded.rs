//! Folded-stack text writer.

use super::write_text_file;
use crate::aggregator::{format_folded, FoldedStack};
use crate::utils::error::OutputError;
use log::info;
use std::path::Path;

/// Write stacks as `frame;frame;frame count` lines
///
/// **Public** - output of `record` and `profile`, input of `render`
///
/// # Errors
/// * `OutputError::WriteFailed` - I/O error during write
/// * `OutputError::InvalidPath` - Path is invalid
pub fn write_folded(stacks: &[FoldedStack], output_path: impl AsRef<Path>) -> Result<(), OutputError> {
    let output_path = output_path.as_ref();
    info!("Writing folded stacks to: {}", output_path.display());

    write_text_file(&format_folded(stacks), output_path, "folded")?;

    info!("Wrote {} folded stacks", stacks.len());
    Ok(())
}
