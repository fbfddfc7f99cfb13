//! CLI tests for `matrix-lab`.
//!
//! Spawns the binary against configs in a temp dir and checks exit codes and
//! the files it leaves behind.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use matrix::exit_codes;

const CONFIG: &str = r#"
name = "cli"

[[variations]]
name = "style"
values = ["short", "long"]

[dataset]
source = "inline"
items = [{ id = "a", text = "alpha" }, { id = "b", text = "beta" }]

[executor]
plugin = "echo"

[[evaluators]]
plugin = "length"

[selection]
strategy = "weighted_sum"

[checkpoint]
path = "snapshot.json"
"#;

fn lab(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_matrix-lab"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("spawn matrix-lab")
}

fn write_config(dir: &Path, contents: &str) {
    fs::write(dir.join("experiment.toml"), contents).expect("write config");
}

#[test]
fn run_writes_snapshot_and_index() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_config(temp.path(), CONFIG);

    let output = lab(
        temp.path(),
        &["run", "experiment.toml", "--index", "out/index.json"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Experiment: cli"), "{stdout}");
    assert!(stdout.contains("Selection (weighted_sum)"), "{stdout}");
    assert!(temp.path().join("snapshot.json").exists());

    let index: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(temp.path().join("out").join("index.json")).expect("index"),
    )
    .expect("index json");
    assert_eq!(index["items"], serde_json::json!(["a", "b"]));

    let report = lab(temp.path(), &["report", "snapshot.json"]);
    assert_eq!(report.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&report.stdout).contains("Pairs: 4"));
}

#[test]
fn resume_with_corrupt_snapshot_exits_with_checkpoint_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_config(temp.path(), CONFIG);
    fs::write(temp.path().join("snapshot.json"), "not json").expect("corrupt");

    let output = lab(temp.path(), &["run", "experiment.toml", "--resume"]);
    assert_eq!(output.status.code(), Some(exit_codes::CHECKPOINT));
    assert!(String::from_utf8_lossy(&output.stderr).contains("snapshot.json"));

    let forced = lab(
        temp.path(),
        &["run", "experiment.toml", "--force", "--no-display"],
    );
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
    assert!(forced.stdout.is_empty());
}

#[test]
fn strict_run_reports_failed_pairs() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = CONFIG.replace(
        "plugin = \"echo\"",
        "plugin = \"command\"\ncommand = [\"sh\", \"-c\", \"cat >/dev/null; exit 3\"]",
    );
    write_config(temp.path(), &config);

    let lenient = lab(temp.path(), &["run", "experiment.toml", "--no-display"]);
    assert_eq!(lenient.status.code(), Some(exit_codes::OK));

    let strict = lab(
        temp.path(),
        &["run", "experiment.toml", "--force", "--no-display", "--strict"],
    );
    assert_eq!(strict.status.code(), Some(exit_codes::FAILED_PAIRS));
}

#[test]
fn invalid_config_exits_with_invalid_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_config(
        temp.path(),
        &CONFIG.replace("values = [\"short\", \"long\"]", "values = []"),
    );
    let output = lab(temp.path(), &["run", "experiment.toml"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("style has no values"));
}

#[test]
fn list_prints_combinations() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_config(temp.path(), CONFIG);
    let output = lab(temp.path(), &["list", "experiment.toml"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "[0] style=short\n[1] style=long\n"
    );
}
