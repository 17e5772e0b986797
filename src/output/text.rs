//! Terminal summaries of folded profiles and differential comparisons.

use crate::aggregator::{
    calculate_hot_functions, calculate_hot_stacks, calculate_sample_distribution, FoldedStack,
};
use crate::flamegraph::{name_color, DiffTree, FrameChange, WeightSide};
use colored::*;

const STACK_COLUMN: usize = 52;

/// Keep the tail of a long stack, where the leaf is
fn shorten_stack(stack: &str, max_chars: usize) -> String {
    let chars = stack.chars().count();
    if chars <= max_chars {
        return stack.to_string();
    }
    let tail: String = stack.chars().skip(chars - (max_chars - 3)).collect();
    format!("...{tail}")
}

fn leaf_colored(name: &str, padded: &str) -> ColoredString {
    let rgb = name_color(name);
    padded.truecolor(rgb.r, rgb.g, rgb.b)
}

/// Render hot stacks, hot functions and a bar chart for a profile
///
/// **Public** - used by the `summary`, `record` and `profile` commands
///
/// # Arguments
/// * `stacks` - Folded stacks
/// * `max_lines` - Rows in the hot stack table
pub fn generate_text_summary(stacks: &[FoldedStack], max_lines: usize) -> String {
    let distribution = calculate_sample_distribution(stacks);
    let hot = calculate_hot_stacks(stacks, max_lines);
    let mut lines = Vec::new();

    lines.push(format!("  {}", "HOT STACKS".bold()));
    lines.push(format!(
        "  ┏{}┳━━━━━━━━━━━━┳━━━━━━━━━┓",
        "━".repeat(STACK_COLUMN + 2)
    ));
    lines.push(format!(
        "  ┃ {:<width$} ┃ {:^10} ┃ {:^7} ┃",
        "Stack (hottest first)",
        "SAMPLES",
        "%",
        width = STACK_COLUMN
    ));
    lines.push(format!(
        "  ┣{}╋━━━━━━━━━━━━╋━━━━━━━━━┫",
        "━".repeat(STACK_COLUMN + 2)
    ));

    for stack in &hot {
        let leaf = stack.stack.rsplit(';').next().unwrap_or(&stack.stack);
        let display = format!(
            "{:<width$}",
            shorten_stack(&stack.stack, STACK_COLUMN),
            width = STACK_COLUMN
        );
        lines.push(format!(
            "  ┃ {} ┃ {:>10} ┃ {:>6.1}% ┃",
            leaf_colored(leaf, &display),
            stack.samples,
            stack.percentage
        ));
    }

    lines.push(format!(
        "  ┗{}┻━━━━━━━━━━━━┻━━━━━━━━━┛",
        "━".repeat(STACK_COLUMN + 2)
    ));

    lines.push(String::new());
    lines.push(format!("  {}", "SELF TIME BY FUNCTION".bold()));
    lines.push(format!("  all {} 100%", "█".repeat(50)));
    for function in calculate_hot_functions(stacks, 5) {
        let bar = "█".repeat((function.percentage / 2.0) as usize);
        let name = format!("{:<28}", shorten_stack(&function.name, 28));
        lines.push(format!(
            "  └─ {} {} {:>5.1}%",
            leaf_colored(&function.name, &name),
            leaf_colored(&function.name, &format!("{bar:50}")),
            function.percentage
        ));
    }

    lines.push(String::new());
    lines.push(format!("  {}", distribution.summary()));
    if distribution.is_highly_concentrated() {
        lines.push(format!(
            "  {}",
            "Most samples sit in a few stacks: start there.".yellow()
        ));
    }

    if stacks.len() > max_lines {
        lines.push(String::new());
        lines.push(format!(
            "   (Showing top {} of {} unique stacks)",
            max_lines,
            stacks.len()
        ));
    }

    lines.join("\n")
}

fn delta_symbol(delta: f64) -> &'static str {
    if delta > 0.0 {
        "📈"
    } else if delta < 0.0 {
        "📉"
    } else {
        "➡️"
    }
}

/// Render the totals and the largest rate changes of a comparison
///
/// **Public** - terminal half of the `diff` command
pub fn render_diff_summary(tree: &DiffTree, changes: &[FrameChange]) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n{}\n", "Profile Comparison".bold()));
    out.push_str("---------------------------------------------------\n");
    out.push_str(&format!(
        "Samples: {} -> {}\n",
        tree.total(WeightSide::Before),
        tree.total(WeightSide::After)
    ));
    out.push_str("---------------------------------------------------\n");

    if changes.is_empty() {
        out.push_str(&format!("{}\n", "No frame changed its share of samples.".green()));
        return out;
    }

    out.push_str("\nLargest changes in share of samples:\n");
    for change in changes {
        let line = format!(
            "  {} {}: {:.2}% -> {:.2}% ({:+.2} pts)",
            delta_symbol(change.delta),
            shorten_stack(&change.path, 60),
            change.rate_before * 100.0,
            change.rate_after * 100.0,
            change.delta * 100.0
        );
        let line = if change.delta > 0.0 {
            line.red()
        } else {
            line.blue()
        };
        out.push_str(&line.to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shorten_stack() {
        assert_eq!(shorten_stack("a;b", 10), "a;b");
        assert_eq!(shorten_stack("main;alpha;beta", 10), "...ha;beta");
        assert_eq!(shorten_stack("ää;öö;üü;ßß", 8), "...üü;ßß");
    }

    #[test]
    fn test_text_summary() {
        let stacks = vec![
            FoldedStack::new("main;hot", 70),
            FoldedStack::new("main;warm", 20),
            FoldedStack::new("main;cold", 10),
        ];
        let summary = generate_text_summary(&stacks, 2);

        assert!(summary.contains("HOT STACKS"));
        assert!(summary.contains("main;hot"));
        assert!(summary.contains("  70.0%"));
        assert!(summary.contains("Samples: 100 | Stacks: 3"));
        assert!(summary.contains("(Showing top 2 of 3 unique stacks)"));
    }

    #[test]
    fn test_diff_summary() {
        let before = vec![FoldedStack::new("main;a", 1), FoldedStack::new("main;b", 1)];
        let after = vec![FoldedStack::new("main;a", 3), FoldedStack::new("main;b", 1)];
        let tree = DiffTree::build(&before, &after).unwrap();

        let text = render_diff_summary(&tree, &tree.biggest_changes(5));
        assert!(text.contains("Samples: 2 -> 4"));
        assert!(text.contains("main;a"));
        assert!(text.contains("+25.00 pts"));
        assert!(text.contains("-25.00 pts"));
    }
}
