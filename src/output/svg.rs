//! SVG flame graph renderer and writer.
//!
//! Draws a `FlameLayout` as a standalone interactive SVG: hover a frame to
//! see its details, Ctrl+F to highlight matches, Esc to reset.

use super::write_text_file;
use crate::flamegraph::color::{diff_color, Rgb};
use crate::flamegraph::{FlameLayout, LayoutRect};
use crate::utils::config::{FONT_SIZE, FRAME_HEIGHT};
use crate::utils::error::OutputError;
use log::info;
use std::path::Path;

const BACKGROUND: &str = "#f8f8f8";

/// Hover details and Ctrl+F search
const SCRIPT: &str = r#"<script type="text/javascript"><![CDATA[
  var frames = document.querySelectorAll('.frame');
  var details = document.getElementById('details');
  frames.forEach(function(f) {
    f.style.cursor = 'pointer';
    f.addEventListener('mouseover', function() {
      f.style.stroke = '#000'; f.style.strokeWidth = '0.5';
      var t = f.parentNode.querySelector('title');
      if (t && details) details.textContent = t.textContent;
    });
    f.addEventListener('mouseout', function() {
      f.style.stroke = 'none';
      if (details) details.textContent = '';
    });
  });
  function resetSearch() {
    frames.forEach(function(f) { f.style.opacity = '1'; });
  }
  document.addEventListener('keydown', function(e) {
    if (e.ctrlKey && e.key === 'f') {
      e.preventDefault();
      var term = prompt('Search function name:');
      if (!term) { resetSearch(); return; }
      term = term.toLowerCase();
      frames.forEach(function(f) {
        var t = f.parentNode.querySelector('title');
        var hit = t && t.textContent.toLowerCase().indexOf(term) >= 0;
        f.style.opacity = hit ? '1' : '0.3';
      });
    }
    if (e.key === 'Escape') { resetSearch(); }
  });
]]></script>
"#;

/// Escape text for use in SVG content and attribute values
pub fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// Render a layout to SVG text
///
/// **Public** - pure rendering, no I/O
pub fn render_svg(layout: &FlameLayout) -> String {
    let width = layout.canvas_width;
    let height = layout.canvas_height;
    let mut svg = String::with_capacity(512 + layout.rects.len() * 320);

    svg.push_str("<?xml version=\"1.0\" standalone=\"no\"?>\n");
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">"#
    ));
    svg.push('\n');
    svg.push_str(&format!(
        r#"<rect width="100%" height="100%" fill="{BACKGROUND}" />"#
    ));
    svg.push('\n');

    // Title and subtitle
    svg.push_str(&format!(
        r##"<text x="{}" y="20" font-size="16" font-family="sans-serif" text-anchor="middle" fill="#333">{}</text>"##,
        width / 2,
        xml_escape(&layout.title)
    ));
    svg.push('\n');
    svg.push_str(&format!(
        r##"<text x="{}" y="36" font-size="11" font-family="sans-serif" text-anchor="middle" fill="#888">{}. Ctrl+F to search, Esc to reset.</text>"##,
        width / 2,
        xml_escape(&layout.subtitle)
    ));
    svg.push('\n');

    if layout.differential {
        render_diff_legend(&mut svg);
    }

    // Details bar
    svg.push_str(&format!(
        r##"<text id="details" x="4" y="{:.0}" font-size="{FONT_SIZE}" font-family="monospace" fill="#333"></text>"##,
        layout.details_y()
    ));
    svg.push('\n');

    for rect in &layout.rects {
        render_rect(&mut svg, rect);
    }

    svg.push_str(SCRIPT);
    svg.push_str("</svg>\n");
    svg
}

fn tooltip(rect: &LayoutRect) -> String {
    match rect.diff {
        Some(diff) => format!(
            "{} ({:.1}% of total, before: {}, after: {}, {:+.2} pts)",
            rect.name,
            rect.percent,
            diff.count_before,
            diff.count_after,
            diff.delta * 100.0
        ),
        None => format!(
            "{} ({} samples, {:.1}%)",
            rect.name, rect.inclusive_count, rect.percent
        ),
    }
}

fn render_rect(svg: &mut String, rect: &LayoutRect) {
    svg.push_str("<g>\n");
    svg.push_str(&format!("<title>{}</title>\n", xml_escape(&tooltip(rect))));
    svg.push_str(&format!(
        r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.0}" fill="{}" rx="1" ry="1" class="frame" />"#,
        rect.x, rect.y, rect.width, rect.height, rect.color
    ));
    svg.push('\n');

    if let Some(label) = &rect.label {
        svg.push_str(&format!(
            r##"<text x="{:.1}" y="{:.1}" font-size="{FONT_SIZE}" font-family="monospace" fill="#000">{}</text>"##,
            rect.x + 3.0,
            rect.y + FRAME_HEIGHT - 4.0,
            xml_escape(label)
        ));
        svg.push('\n');
    }

    svg.push_str("</g>\n");
}

fn render_diff_legend(svg: &mut String) {
    let items: [(&str, Rgb); 3] = [
        ("grew", diff_color(1.0)),
        ("unchanged", Rgb::NEUTRAL),
        ("shrank", diff_color(-1.0)),
    ];
    for (i, (label, color)) in items.iter().enumerate() {
        let x = 10 + i * 100;
        svg.push_str(&format!(
            r#"<rect x="{x}" y="42" width="12" height="12" fill="{color}" rx="2" />"#
        ));
        svg.push_str(&format!(
            r##"<text x="{}" y="52" font-size="11" font-family="sans-serif" fill="#333">{label}</text>"##,
            x + 16
        ));
        svg.push('\n');
    }
}

/// Render a layout and write it to a file
///
/// **Public** - main entry point for SVG output
///
/// # Arguments
/// * `layout` - Layout from `layout_tree` or `layout_diff`
/// * `output_path` - Path to output SVG file
///
/// # Errors
/// * `OutputError::WriteFailed` - I/O error during write
/// * `OutputError::InvalidPath` - Path is invalid
///
/// # Example
/// ```ignore
/// let layout = layout_tree(&tree, &FlamegraphConfig::default())?;
/// write_svg(&layout, "flamegraph.svg")?;
/// ```
pub fn write_svg(layout: &FlameLayout, output_path: impl AsRef<Path>) -> Result<(), OutputError> {
    let output_path = output_path.as_ref();
    info!("Writing SVG to: {}", output_path.display());

    let svg = render_svg(layout);
    write_text_file(&svg, output_path, "svg")?;

    info!(
        "SVG written successfully ({} frames, {:.2} KB)",
        layout.rects.len(),
        svg.len() as f64 / 1024.0
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::FoldedStack;
    use crate::flamegraph::{layout_diff, layout_tree, DiffTree, FlamegraphConfig, FrameTree, WeightSide};

    fn sample_layout() -> FlameLayout {
        let stacks = vec![
            FoldedStack::new("main;Vec<u8>::push", 3),
            FoldedStack::new("main;compute", 1),
        ];
        let tree = FrameTree::build(&stacks).unwrap();
        layout_tree(&tree, &FlamegraphConfig::new().with_title("A & B")).unwrap()
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape(r#"<a & "b">"#), "&lt;a &amp; &quot;b&quot;&gt;");
    }

    #[test]
    fn test_render_contains_frames_and_script() {
        let svg = render_svg(&sample_layout());

        assert!(svg.starts_with("<?xml"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert!(svg.contains("A &amp; B"));
        assert!(svg.contains("4 samples. Ctrl+F to search"));
        assert!(svg.contains("<title>Vec&lt;u8&gt;::push (3 samples, 75.0%)</title>"));
        assert_eq!(svg.matches("class=\"frame\"").count(), 4);
        assert!(svg.contains("id=\"details\""));
        assert!(!svg.contains("grew"));
    }

    #[test]
    fn test_diff_render_has_legend() {
        let before = vec![FoldedStack::new("a", 1)];
        let after = vec![FoldedStack::new("a", 1), FoldedStack::new("b", 1)];
        let tree = DiffTree::build(&before, &after).unwrap();
        let layout = layout_diff(&tree, &FlamegraphConfig::default(), WeightSide::After).unwrap();

        let svg = render_svg(&layout);
        assert!(svg.contains("grew"));
        assert!(svg.contains("<title>b (50.0% of total, before: 0, after: 1, +50.00 pts)</title>"));
        assert!(svg.contains("<title>a (50.0% of total, before: 1, after: 1, -50.00 pts)</title>"));
    }

    #[test]
    fn test_write_svg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/flame.svg");
        write_svg(&sample_layout(), &path).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("<svg"));
    }
}
