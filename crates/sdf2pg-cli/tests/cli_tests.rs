//! CLI integration tests for sdf2pg.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for various error conditions.

use assert_cmd::Command;
use predicates::prelude::*;

/// Get a command for the sdf2pg binary.
fn cmd() -> Command {
    Command::cargo_bin("sdf2pg").unwrap()
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_flags() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output"))
        .stdout(predicate::str::contains("--table"))
        .stdout(predicate::str::contains("--list"))
        .stdout(predicate::str::contains("--password"))
        .stdout(predicate::str::contains("--output-json"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sdf2pg"));
}

#[test]
fn test_help_shows_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: public]"))
        .stdout(predicate::str::contains("[default: info]"));
}

// =============================================================================
// Argument Validation Tests
// =============================================================================

#[test]
fn test_missing_source_is_usage_error() {
    cmd()
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_unknown_flag_is_usage_error() {
    cmd()
        .args(["source.sdf", "--frobnicate"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_output_with_multiple_tables_is_usage_error() {
    cmd()
        .args([
            "source.sdf",
            "--table",
            "USERINFO",
            "--table",
            "CHECKINOUT",
            "--output",
            "out.sql",
        ])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--output"));
}

// =============================================================================
// Runtime Error Tests
// =============================================================================

#[cfg(not(feature = "odbc"))]
#[test]
fn test_engineless_build_fails_with_guidance() {
    cmd()
        .arg("source.sdf")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("odbc"));
}

#[cfg(feature = "odbc")]
#[test]
fn test_missing_source_file_fails() {
    // Fails either on the missing file or, on hosts without an ODBC driver
    // manager, on environment setup; never succeeds.
    let dir = tempfile::tempdir().unwrap();
    cmd()
        .arg(dir.path().join("absent.sdf"))
        .arg("--yes")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}
