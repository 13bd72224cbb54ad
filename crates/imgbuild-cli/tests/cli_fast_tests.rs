//! Fast CLI tests using assert_cmd.
//! These test the binary directly without needing a container runtime.

#![allow(deprecated)] // assert_cmd::Command::cargo_bin is deprecated but works fine

use assert_cmd::Command;
use predicates::prelude::*;

fn imgbuild(config_home: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("imgbuild").unwrap();
    cmd.env("HOME", config_home)
        .env("XDG_CONFIG_HOME", config_home.join(".config"));
    cmd
}

#[test]
fn test_help_flag() {
    Command::cargo_bin("imgbuild")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Container Image Builder"));
}

#[test]
fn test_version_flag() {
    Command::cargo_bin("imgbuild")
        .unwrap()
        .arg("--version")
        .assert()
        .success();
}

#[test]
fn test_build_help_lists_options() {
    Command::cargo_bin("imgbuild")
        .unwrap()
        .args(["build", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--build-arg"))
        .stdout(predicate::str::contains("--no-cache"));
}

#[test]
fn test_build_missing_context_fails_fast() {
    let tmp = tempfile::tempdir().unwrap();
    imgbuild(tmp.path())
        .args(["build", "/definitely/not/a/context"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Build context not found"));
}

#[test]
fn test_build_rejects_malformed_build_arg() {
    let tmp = tempfile::tempdir().unwrap();
    imgbuild(tmp.path())
        .args(["build", ".", "--build-arg", "NOVALUE"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("KEY=VALUE"));
}

#[test]
fn test_unknown_provider_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    imgbuild(tmp.path())
        .args(["--provider", "containerd", "build", "."])
        .assert()
        .failure();
}

#[test]
fn test_config_shows_defaults() {
    let tmp = tempfile::tempdir().unwrap();
    imgbuild(tmp.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("not created yet"))
        .stdout(predicate::str::contains("[build]"));
}

#[test]
fn test_config_init_writes_file() {
    let tmp = tempfile::tempdir().unwrap();
    imgbuild(tmp.path())
        .args(["config", "--init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created default config"));

    imgbuild(tmp.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("not created yet").not());
}
