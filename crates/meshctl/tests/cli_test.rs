//! Integration tests for the `meshctl` CLI binary.
//!
//! These tests cover argument parsing, payload decoding, configuration
//! management and the simulated controller runs. Nothing touches a radio.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `meshctl` binary with env isolation.
///
/// Clears the `MESHCTL_*` variables the tests rely on and points config
/// directories at a nonexistent path so tests never touch the user's
/// real configuration.
fn meshctl_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("meshctl");
    cmd.env("HOME", "/tmp/meshctl-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/meshctl-cli-test-nonexistent")
        .env_remove("MESHCTL_CONFIG")
        .env_remove("MESHCTL_OUTPUT")
        .env_remove("MESHCTL_PROVISIONING__BUSY_BACKOFF_SECS")
        .env_remove("RUST_LOG");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// Two nodes: 0x0001 TransferActive 80%, 0x0002 TransferActive 40%.
const DISTRIBUTE_HEX: &str = "0200 0100 02 50 0200 02 28";
// Two nodes: 0x0001 ApplySuccess, 0x0002 ApplyFailed.
const COMPLETE_HEX: &str = "0200 0100 05 64 0200 07 64";

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = meshctl_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    meshctl_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("decode")
            .and(predicate::str::contains("simulate"))
            .and(predicate::str::contains("app-version")),
    );
}

#[test]
fn test_version_flag() {
    meshctl_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("meshctl"));
}

#[test]
fn test_invalid_subcommand() {
    let output = meshctl_cmd().arg("foobar").output().unwrap();
    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(text.contains("foobar") || text.contains("unrecognized"), "{text}");
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    meshctl_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    meshctl_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Decode ──────────────────────────────────────────────────────────

#[test]
fn test_decode_upload_maps_to_first_half() {
    meshctl_cmd()
        .args(["decode", "upload", "32", "-o", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::diff("25\n"));
}

#[test]
fn test_decode_empty_upload_is_pending() {
    meshctl_cmd()
        .args(["decode", "upload", "-o", "json-compact"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""pending":true"#));
}

#[test]
fn test_decode_distribute_reports_straggler_progress() {
    meshctl_cmd()
        .args(["decode", "distribute", DISTRIBUTE_HEX, "-o", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::diff("70\n"));
}

#[test]
fn test_decode_distribute_json() {
    let output = meshctl_cmd()
        .args(["decode", "distribute", DISTRIBUTE_HEX, "-o", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["aggregate_percent"], 40);
    assert_eq!(value["overall_percent"], 70);
    assert_eq!(value["nodes"].as_array().unwrap().len(), 2);
}

#[test]
fn test_decode_distribute_table() {
    meshctl_cmd()
        .args(["decode", "distribute", DISTRIBUTE_HEX, "--color", "never"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("0x0002")
                .and(predicate::str::contains("transfer active"))
                .and(predicate::str::contains("70%")),
        );
}

#[test]
fn test_decode_complete_lists_outcomes() {
    meshctl_cmd()
        .args(["decode", "complete", COMPLETE_HEX, "-o", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::diff("0x0001 ok\n0x0002 failed\n"));
}

#[test]
fn test_decode_truncated_report_is_usage_error() {
    let output = meshctl_cmd()
        .args(["decode", "distribute", "0200 0100 02 50"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = combined_output(&output);
    assert!(text.contains("decode status payload"), "{text}");
}

#[test]
fn test_decode_rejects_invalid_hex() {
    let output = meshctl_cmd().args(["decode", "upload", "xyz"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("not valid hex"));
}

// ── App version ─────────────────────────────────────────────────────

#[test]
fn test_app_version_from_ver_token() {
    meshctl_cmd()
        .args(["app-version", "CID:0x0211 PID:0x0001 VER:1.3.7"])
        .assert()
        .success()
        .stdout(predicate::str::diff("1.3.7\n"));
}

#[test]
fn test_app_version_falls_back_to_last_token() {
    meshctl_cmd()
        .args(["app-version", "firmware v2.0.1"])
        .assert()
        .success()
        .stdout(predicate::str::diff("2.0.1\n"));
}

#[test]
fn test_app_version_without_digits_fails() {
    let output = meshctl_cmd()
        .args(["app-version", "bootloader only"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(combined_output(&output).contains("No application version"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honors_flag() {
    meshctl_cmd()
        .args(["config", "path", "--config", "/tmp/meshctl-explicit.toml"])
        .assert()
        .success()
        .stdout(predicate::str::diff("/tmp/meshctl-explicit.toml\n"));
}

#[test]
fn test_config_init_then_show() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let path_arg = path.to_str().unwrap();

    meshctl_cmd()
        .args(["config", "init", "--config", path_arg])
        .assert()
        .success();
    assert!(path.exists());

    meshctl_cmd()
        .args(["config", "show", "--config", path_arg])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[provisioning]")
                .and(predicate::str::contains("timeout_secs = 60")),
        );

    // A second init refuses to clobber the file.
    let output = meshctl_cmd()
        .args(["config", "init", "--config", path_arg])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(6));
}

#[test]
fn test_invalid_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[provisioning]\ntimeout_secs = 0\n").unwrap();

    let output = meshctl_cmd()
        .args(["decode", "upload", "10", "--config", path.to_str().unwrap()])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("provisioning.timeout_secs"));
}

#[test]
fn test_config_output_default_applies() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[defaults]\noutput = \"plain\"\n").unwrap();

    meshctl_cmd()
        .args(["decode", "upload", "64", "--config", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::diff("50\n"));
}

#[test]
fn test_config_json_compact_default_applies() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[defaults]\noutput = \"json-compact\"\n").unwrap();

    meshctl_cmd()
        .args(["decode", "upload", "--config", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""pending":true"#));
}

// ── Simulations ─────────────────────────────────────────────────────

#[test]
fn test_simulate_harness_counts_passes() {
    let output = meshctl_cmd()
        .args(["simulate", "harness", "--passes", "2", "--step-delay", "1ms", "-o", "json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["passes"], 2);
    assert!(value["error"].is_null());
}

#[test]
fn test_simulate_harness_failure_exits_non_zero() {
    let output = meshctl_cmd()
        .args([
            "simulate", "harness", "--passes", "3", "--fail-at", "2", "--step-delay", "1ms", "-o",
            "json",
        ])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["passes"], 1);
    assert_eq!(value["failed_stage"], "Provisioning");
}

#[test]
fn test_simulate_harness_retries_busy_network() {
    meshctl_cmd()
        .env("MESHCTL_PROVISIONING__BUSY_BACKOFF_SECS", "0")
        .args([
            "simulate", "harness", "--passes", "1", "--busy-first", "--step-delay", "1ms", "-o",
            "plain",
        ])
        .assert()
        .success()
        .stdout(predicate::str::diff("1\n"));
}

#[test]
fn test_simulate_dfu_lists_updated_nodes() {
    let output = meshctl_cmd()
        .args(["simulate", "dfu", "--nodes", "2", "--step-delay", "1ms", "-o", "plain"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, vec!["0x0001 apply success", "0x0002 apply success"]);
}

#[test]
fn test_simulate_dfu_distributor_error_fails() {
    let output = meshctl_cmd()
        .args(["simulate", "dfu", "--error-code", "4", "--step-delay", "1ms"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_simulate_ota_reports_app_version() {
    meshctl_cmd()
        .args([
            "simulate", "ota", "--size", "1000", "--chunk", "256", "--step-delay", "1ms", "-o",
            "plain",
        ])
        .assert()
        .success()
        .stdout(predicate::str::diff("1.3.7\n"));
}
