//! CLI Integration Tests for Slotgen
//!
//! Runs the `slotgen` binary end to end for each subcommand, feeding input
//! on stdin and checking what lands on stdout and stderr.

use serde_json::{json, Value as JsonValue};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Path to the slotgen binary built for this test run
fn slotgen_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_slotgen"))
}

/// Get a temp directory for test inputs
fn temp_dir() -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push("slotgen_cli_tests");
    fs::create_dir_all(&path).ok();
    path
}

/// A config file with every setting at its default, so a slotgen.toml in
/// the working directory cannot leak into the test
fn default_config() -> PathBuf {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    let path = temp_dir().join(format!("slotgen-{}-{}.toml", std::process::id(), n));
    fs::write(&path, "[text]\nfield_delim = \",\"\n").expect("Failed to write config");
    path
}

fn run(args: &[&str], stdin: &[u8]) -> Output {
    let config = default_config();
    let mut child = Command::new(slotgen_binary())
        .arg("-c")
        .arg(&config)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to run slotgen");
    child
        .stdin
        .take()
        .expect("stdin is piped")
        .write_all(stdin)
        .expect("Failed to write stdin");
    let output = child.wait_with_output().expect("Failed to wait for slotgen");
    assert!(
        output.status.success(),
        "slotgen {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

// ============================================================================
// Unescape
// ============================================================================

#[test]
fn test_unescape_drops_trailing_escape() {
    let output = run(&["unescape"], b"a\\\n");
    assert_eq!(String::from_utf8_lossy(&output.stdout), "a\n");
}

#[test]
fn test_unescape_per_line() {
    let output = run(&["unescape", "-e", "^"], b"x^,y\n^^\nplain\n");
    assert_eq!(String::from_utf8_lossy(&output.stdout), "x,y\n^\nplain\n");
}

// ============================================================================
// IR
// ============================================================================

#[test]
fn test_ir_escaped_string_not_generated() {
    let output = run(&["ir", "--schema", "string", "--escape", "\\"], b"");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("; slot 0 (string): not generated"),
        "unexpected output:\n{}",
        stdout
    );
}

#[test]
fn test_ir_lists_generated_routines() {
    let output = run(&["ir", "--schema", "int,double"], b"");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("; slot 0 (int): WriteSlot [compiled]"));
    assert!(stdout.contains("; slot 1 (double): WriteSlot.1 [compiled]"));
    assert!(!stdout.contains("not generated"));
}

// ============================================================================
// Scan
// ============================================================================

#[test]
fn test_scan_rows_and_stats() {
    let output = run(&["scan", "--schema", "int,string", "--stats"], b"1,a\n,b\n");

    let rows: Vec<JsonValue> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|l| serde_json::from_str(l).expect("row is JSON"))
        .collect();
    assert_eq!(rows, vec![json!([1, "a"]), json!([null, "b"])]);

    let stderr = String::from_utf8_lossy(&output.stderr);
    let start = stderr.find('{').expect("stats on stderr");
    let report: JsonValue = serde_json::from_str(&stderr[start..]).expect("stats are JSON");
    assert_eq!(report["scan"]["rows"], json!(2));
    assert_eq!(report["scan"]["nulls"], json!(1));
    assert_eq!(report["scan"]["parse_errors"], json!(0));
    assert_eq!(report["generated_slots"], json!(2));
    assert_eq!(report["cache"]["misses"], json!(2));
}

#[test]
fn test_scan_interpreted_matches_compiled() {
    let input = b"7|x\nbad|y\n|\n";
    let compiled = run(&["scan", "-s", "int,string", "-d", "|"], input);
    let interpreted = run(&["scan", "-s", "int,string", "-d", "|", "--interp"], input);
    let plain = run(&["scan", "-s", "int,string", "-d", "|", "--no-codegen"], input);

    assert_eq!(compiled.stdout, interpreted.stdout);
    assert_eq!(compiled.stdout, plain.stdout);
    assert_eq!(
        String::from_utf8_lossy(&compiled.stdout),
        "[7,\"x\"]\n[null,\"y\"]\n[null,null]\n"
    );
    // The bad int is reported on stderr.
    assert!(String::from_utf8_lossy(&compiled.stderr).contains("bad"));
}

#[test]
fn test_scan_missing_input_file() {
    let output = Command::new(slotgen_binary())
        .args(["-c"])
        .arg(default_config())
        .args(["scan", "--schema", "int", "/nonexistent/slotgen-input.csv"])
        .output()
        .expect("Failed to run slotgen");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to read"));
}
