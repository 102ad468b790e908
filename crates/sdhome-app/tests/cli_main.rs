//! Basic CLI surface tests for the `sdhome` binary.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_the_db_path_and_verbose_flags() {
    let mut cmd = Command::cargo_bin("sdhome").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--db-path"))
        .stdout(predicate::str::contains("--verbose"));
}

#[test]
fn version_flag_reports_the_binary_name() {
    let mut cmd = Command::cargo_bin("sdhome").unwrap();
    cmd.arg("--version");

    cmd.assert().success().stdout(predicate::str::contains("sdhome"));
}
