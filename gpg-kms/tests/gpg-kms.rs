use std::fs;

use assert_cmd::Command;
use tempfile::TempDir;

fn gpg_kms() -> Command {
    let mut cmd = Command::cargo_bin("gpg-kms").unwrap();
    cmd.env_remove("FORTANIX_API_ENDPOINT")
        .env_remove("FORTANIX_API_KEY");
    cmd
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn help() {
    gpg_kms().arg("--help").assert().success();
    gpg_kms().args(&["dsm", "sign", "--help"]).assert().success();
}

#[test]
fn subcommand_required() {
    gpg_kms().assert().failure();
    gpg_kms().arg("dsm").assert().failure();
}

#[test]
fn export_requires_identity() {
    let output = gpg_kms()
        .args(&["dsm", "export", "--key", "release", "--name", "Alice"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(stderr(&output).contains("--email"));
}

#[test]
fn sign_reads_stdin_without_input() {
    // The arguments are accepted; the run stops at the missing
    // credentials.
    let output = gpg_kms()
        .args(&["dsm", "sign", "--key", "release"])
        .write_stdin("hello")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(stderr(&output).contains("FORTANIX_API_ENDPOINT"));
}

#[test]
fn dsm_credentials_required() {
    let tmp_dir = TempDir::new().unwrap();
    let sig = tmp_dir.path().join("sig");
    let output = gpg_kms()
        .args(&["dsm", "export",
                "--key", "release",
                "--name", "Alice",
                "--email", "alice@example.com",
                "--armor",
                &sig.to_string_lossy()])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(stderr(&output).contains("FORTANIX_API_ENDPOINT"));
    assert!(!sig.exists());
}

#[test]
fn bad_timeout() {
    let output = gpg_kms()
        .args(&["--timeout", "soon", "dsm", "sign", "--key", "release", "-"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(stderr(&output).contains("--timeout"));
}

#[test]
fn existing_output_not_overwritten() {
    let tmp_dir = TempDir::new().unwrap();
    let input = tmp_dir.path().join("input");
    let sig = tmp_dir.path().join("input.sig");
    fs::write(&input, b"hello").unwrap();
    fs::write(&sig, b"keep me").unwrap();

    gpg_kms()
        .env("FORTANIX_API_ENDPOINT", "https://127.0.0.1:1")
        .env("FORTANIX_API_KEY", "invalid")
        .args(&["--timeout", "2", "dsm", "sign", "--key", "release",
                "--detach-sign",
                &input.to_string_lossy(), &sig.to_string_lossy()])
        .assert()
        .failure();
    assert_eq!(fs::read(&sig).unwrap(), b"keep me");
}
