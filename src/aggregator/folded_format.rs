//! Folded-stack text format.
//!
//! One entry per line: `frame1;frame2;...;frameN <count>`. The count is
//! separated from the stack by the last space, so frame names may contain
//! spaces but never `;` or a newline.

use super::stack_folder::{merge_folded, FoldedStack};
use log::{debug, warn};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

/// Why a line of folded input was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineDiagnostic {
    /// 1-based line number
    pub line: usize,
    pub content: String,
    pub reason: String,
}

impl fmt::Display for LineDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {} ({:?})", self.line, self.reason, self.content)
    }
}

/// Parsed folded input
#[derive(Debug, Clone, Default)]
pub struct ParsedFolded {
    /// Sorted and merged
    pub stacks: Vec<FoldedStack>,

    /// Malformed lines that were skipped
    pub diagnostics: Vec<LineDiagnostic>,
}

/// Parse folded text
///
/// **Public** - input side of `render`, `diff` and `summary`
///
/// Blank lines and `#` comments are ignored. Malformed lines (missing or
/// non-numeric count, count <= 0, empty stack or frame name, a count that
/// pushes the total past `u64::MAX`) are skipped, logged and reported in
/// `diagnostics`; parsing never fails as a whole.
pub fn parse_folded(text: &str) -> ParsedFolded {
    let mut entries = Vec::new();
    let mut diagnostics = Vec::new();
    let mut total: u64 = 0;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let parsed = parse_line(trimmed).and_then(|entry| {
            total = total
                .checked_add(entry.count)
                .ok_or("sample count overflows the profile total")?;
            Ok(entry)
        });
        match parsed {
            Ok(entry) => entries.push(entry),
            Err(reason) => {
                let diagnostic = LineDiagnostic {
                    line: idx + 1,
                    content: line.to_string(),
                    reason: reason.to_string(),
                };
                warn!("Skipping folded {}", diagnostic);
                diagnostics.push(diagnostic);
            }
        }
    }

    let stacks = merge_folded(entries);
    debug!(
        "Parsed {} unique stacks ({} lines skipped)",
        stacks.len(),
        diagnostics.len()
    );

    ParsedFolded {
        stacks,
        diagnostics,
    }
}

fn parse_line(line: &str) -> Result<FoldedStack, &'static str> {
    let (stack, count) = line
        .rsplit_once(char::is_whitespace)
        .ok_or("missing sample count")?;
    let stack = stack.trim_end();
    if stack.is_empty() {
        return Err("empty stack");
    }
    if stack.split(';').any(|frame| frame.trim().is_empty()) {
        return Err("empty frame name");
    }
    let count: i64 = count.parse().map_err(|_| "sample count is not an integer")?;
    if count <= 0 {
        return Err("sample count must be positive");
    }
    Ok(FoldedStack::new(stack, count as u64))
}

/// Read and parse a folded file
///
/// # Errors
/// Returns an error only if the file cannot be read
pub fn read_folded_file(path: impl AsRef<Path>) -> io::Result<ParsedFolded> {
    let text = fs::read_to_string(path.as_ref())?;
    debug!("Read {} bytes from {}", text.len(), path.as_ref().display());
    Ok(parse_folded(&text))
}

/// Format entries as folded text, one line each, newline-terminated
pub fn format_folded(stacks: &[FoldedStack]) -> String {
    let mut out = String::with_capacity(stacks.iter().map(|s| s.stack.len() + 12).sum());
    for entry in stacks {
        out.push_str(&entry.stack);
        out.push(' ');
        out.push_str(&entry.count.to_string());
        out.push('\n');
    }
    out
}
