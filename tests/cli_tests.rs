//! Tests for the `setup-toolchain` command-line surface
//!
//! This module tests:
//! - `version` output
//! - `validate` on good and broken manifests, including exit codes
//! - `run` exit codes for optional and required failures, and the JSON report
//!
//! None of these touch the network: failing downloads point at a closed local port.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const DIGEST: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

#[allow(deprecated)]
fn toolchain_cmd() -> Command {
    let mut cmd = Command::cargo_bin("setup-toolchain").unwrap();
    cmd.env_remove("PROVISION_VARIANT");
    cmd
}

fn write_manifest(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("Failed to write manifest");
    path
}

fn unreachable_binary_manifest(root: &Path, required: bool) -> String {
    format!(
        r#"
settings:
  bin_dir: {root}/bin
  state_dir: {root}/state
  fetch:
    attempts: 3
    timeout_secs: 2
    backoff_ms: 1
entries:
  - name: aligner
    kind: direct_binary
    source: http://127.0.0.1:9/aligner.tar.gz
    expected_digest: "sha256:{DIGEST}"
    required: {required}
"#,
        root = root.display()
    )
}

#[test]
fn test_version_prints_package_version() {
    toolchain_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_validate_lists_entries_and_default_variant() {
    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(
        &dir,
        "toolchain.yaml",
        r#"
entries:
  - name: pyset
    kind: index_package_set
    source:
      requirements: ["numpy==1.26.4", "torch==2.3.0"]
    variant:
      package: torch
      default: cpu
      alternatives:
        cpu: https://download.pytorch.org/whl/cpu
        cuda: https://download.pytorch.org/whl/cu121
  - name: bio
    kind: env_manager_package_set
    required: false
    source:
      environment: bio
      channels: [conda-forge, bioconda]
      packages: ["hmmer=3.4"]
"#,
    );

    toolchain_cmd()
        .args(["validate", "--manifest"])
        .arg(&manifest)
        .assert()
        .success()
        .stdout(predicate::str::contains("pyset"))
        .stdout(predicate::str::contains("variant=cpu"))
        .stdout(predicate::str::contains("bio"))
        .stdout(predicate::str::contains("optional"));
}

#[test]
fn test_validate_honours_variant_env() {
    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(
        &dir,
        "toolchain.toml",
        r#"
[[entries]]
name = "pyset"
kind = "index_package_set"
source = { requirements = ["torch==2.3.0"] }
variant = { package = "torch", default = "cpu", alternatives = { cpu = "https://download.pytorch.org/whl/cpu", cuda = "https://download.pytorch.org/whl/cu121" } }
"#,
    );

    toolchain_cmd()
        .env("PROVISION_VARIANT", "cuda")
        .args(["validate", "--manifest"])
        .arg(&manifest)
        .assert()
        .success()
        .stdout(predicate::str::contains("variant=cuda"));
}

#[test]
fn test_validate_rejects_binary_without_digest() {
    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(
        &dir,
        "toolchain.yaml",
        r#"
entries:
  - name: aligner
    kind: direct_binary
    source: https://releases.example.org/aligner.tar.gz
"#,
    );

    toolchain_cmd()
        .args(["validate", "--manifest"])
        .arg(&manifest)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("aligner"))
        .stderr(predicate::str::contains("digest"));
}

#[test]
fn test_missing_manifest_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    toolchain_cmd()
        .args(["run", "--manifest"])
        .arg(dir.path().join("nope.yaml"))
        .assert()
        .code(2);
}

#[test]
fn test_run_with_optional_failure_succeeds_and_writes_json() {
    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(
        &dir,
        "toolchain.yaml",
        &unreachable_binary_manifest(dir.path(), false),
    );
    let report = dir.path().join("out").join("report.json");

    toolchain_cmd()
        .args(["run", "--manifest"])
        .arg(&manifest)
        .arg("--report-json")
        .arg(&report)
        .assert()
        .success()
        .stdout(predicate::str::contains("aligner"))
        .stdout(predicate::str::contains("NetworkError"));

    let json = fs::read_to_string(&report).expect("report written");
    assert!(json.contains("\"NetworkError\""));
    assert!(json.contains("\"Success\""));
    assert!(!dir.path().join("bin").join("aligner").exists());
}

#[test]
fn test_run_with_required_failure_exits_one() {
    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(
        &dir,
        "toolchain.yaml",
        &unreachable_binary_manifest(dir.path(), true),
    );

    toolchain_cmd()
        .args(["--quiet", "run", "--manifest"])
        .arg(&manifest)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("FAILED"));
}
