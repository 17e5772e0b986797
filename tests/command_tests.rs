use flamefold::commands::{
    execute_diff, execute_render, execute_summary, DiffArgs, OutputTargets, RenderArgs,
    RenderOptions, SummaryArgs,
};
use flamefold::flamegraph::WeightSide;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;

fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_render_writes_svg_and_json() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(
        dir.path(),
        "app.folded",
        "main;parse 3\nmain;eval 2\nnot a valid line\nmain;parse 1\n",
    );
    let svg = dir.path().join("out/app.svg");
    let json = dir.path().join("out/app.json");

    let summary = execute_render(RenderArgs {
        input,
        outputs: OutputTargets {
            folded: None,
            svg: Some(svg.clone()),
            json: Some(json.clone()),
        },
        render: RenderOptions::default(),
        print_summary: false,
    })
    .unwrap();

    assert_eq!(summary.samples_collected, 6);
    assert_eq!(summary.unique_stacks, 2);
    assert_eq!(summary.skipped_lines, 1);

    let svg_text = fs::read_to_string(&svg).unwrap();
    assert!(svg_text.contains(">app</text>"));
    assert!(svg_text.contains("<title>parse (4 samples, 66.7%)</title>"));

    let layout: serde_json::Value = serde_json::from_str(&fs::read_to_string(&json).unwrap()).unwrap();
    assert_eq!(layout["total_samples"], 6);
}

#[test]
fn test_render_settings_file_and_cli_override() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "cpu.folded", "a;b 1\n");
    let config = write(
        dir.path(),
        "flamefold.toml",
        "[render]\ntitle = \"From settings\"\nwidth = 800\n",
    );
    let json = dir.path().join("cpu.json");

    execute_render(RenderArgs {
        input,
        outputs: OutputTargets {
            json: Some(json.clone()),
            ..Default::default()
        },
        render: RenderOptions {
            config: Some(config),
            width: Some(600),
            ..Default::default()
        },
        print_summary: false,
    })
    .unwrap();

    let layout: serde_json::Value = serde_json::from_str(&fs::read_to_string(&json).unwrap()).unwrap();
    assert_eq!(layout["title"], "From settings");
    assert_eq!(layout["canvas_width"], 600);
}

#[test]
fn test_render_empty_input_fails() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "empty.folded", "# nothing here\n");

    let err = execute_render(RenderArgs {
        input,
        outputs: OutputTargets::default(),
        render: RenderOptions::default(),
        print_summary: false,
    })
    .unwrap_err();

    assert!(format!("{err:#}").contains("nothing to render"));
}

#[test]
fn test_diff_command() {
    let dir = tempfile::tempdir().unwrap();
    let before = write(dir.path(), "before.folded", "main;a 3\nmain;b 1\n");
    let after = write(dir.path(), "after.folded", "main;a 1\nmain;b 1\nmain;c 2\n");
    let svg = dir.path().join("diff.svg");

    let tree = execute_diff(DiffArgs {
        before,
        after,
        output_svg: Some(svg.clone()),
        output_json: None,
        weight: WeightSide::After,
        top_changes: 5,
        render: RenderOptions::default(),
        summary: false,
    })
    .unwrap();

    assert_eq!(tree.total(WeightSide::Before), 4);
    assert_eq!(tree.total(WeightSide::After), 4);
    let a = tree.node(tree.find(["main", "a"]).unwrap());
    assert_eq!(a.delta, -0.5);

    let svg_text = fs::read_to_string(&svg).unwrap();
    assert!(svg_text.contains("grew"));
    assert!(svg_text.contains("<title>c (50.0% of total, before: 0, after: 2, +50.00 pts)</title>"));
}

#[test]
fn test_summary_command() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "s.folded", "x;y 5\nx;z 5\n");

    let summary = execute_summary(SummaryArgs { input, top: 5 }).unwrap();
    assert_eq!(summary.samples_collected, 10);
    assert!(!summary.has_losses());
}
