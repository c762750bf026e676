//! Black-box tests of the tuick binary's callback modes and exit codes.

use std::process::{Command, Output};

fn tuick() -> Command {
    Command::new(env!("CARGO_BIN_EXE_tuick"))
}

fn run(args: &[&str]) -> Output {
    tuick().args(args).output().expect("run tuick")
}

#[test]
fn format_emits_one_record_for_a_ruff_line() {
    let output = run(&["--format", "-f", "ruff", "--", "echo", "a.py:3:5: oops"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        output.stdout,
        b"a.py\x1f3\x1f5\x1f\x1f\x1fa.py:3:5: oops\x00"
    );
}

#[test]
fn format_emits_informational_record_for_summary_line() {
    let output = run(&["--format", "-f", "ruff", "--", "echo", "Summary: 3 errors"]);
    assert!(output.status.success());
    assert_eq!(output.stdout, b"\x1f\x1f\x1f\x1f\x1fSummary: 3 errors\x00");
}

#[test]
fn format_with_raw_pattern_overrides_detection() {
    let output = run(&["--format", "-e", "%f=%l: %m", "--", "echo", "x.rs=7: broken"]);
    assert!(output.status.success());
    assert_eq!(output.stdout, b"x.rs\x1f7\x1f\x1f\x1f\x1fx.rs=7: broken\x00");
}

#[test]
fn no_command_is_a_usage_error() {
    let output = run(&[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no command"));
}

#[test]
fn exclusive_modes_are_a_usage_error() {
    let output = run(&["--format", "--reload", "--", "echo", "x"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(
        String::from_utf8_lossy(&output.stderr).contains("mutually exclusive"),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn undetectable_tool_is_a_usage_error() {
    let output = run(&["--format", "--", "some-unknown-tool", "src/"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn missing_checker_binary_exits_2() {
    let output = run(&[
        "--format",
        "-f",
        "ruff",
        "--",
        "definitely-not-installed-9f2e",
    ]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn select_launches_the_configured_editor() {
    // `echo` stands in for an editor with no known goto syntax: it just
    // receives the bare file argument.
    let output = tuick()
        .args(["--select", "a.py", "3", "5", "", ""])
        .env("EDITOR", "echo")
        .env_remove("VISUAL")
        .output()
        .expect("run tuick");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn select_without_editor_is_a_usage_error() {
    let output = tuick()
        .args(["--select", "a.py", "3", "5", "", ""])
        .env_remove("EDITOR")
        .env_remove("VISUAL")
        .output()
        .expect("run tuick");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn select_of_informational_block_is_a_no_op() {
    let output = tuick()
        .args(["--select", "", "", "", "", ""])
        .env_remove("EDITOR")
        .env_remove("VISUAL")
        .output()
        .expect("run tuick");
    assert!(output.status.success(), "no location means nothing to do");
}

#[test]
fn reload_outside_a_session_fails() {
    let output = tuick()
        .args(["--reload"])
        .env_remove("TUICK_RELOAD_PORT")
        .env_remove("TUICK_RELOAD_KEY")
        .output()
        .expect("run tuick");
    assert!(!output.status.success());
}
