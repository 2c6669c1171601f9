//! Smoke tests for the slurm-ops binary.

mod common;

use common::TestEnv;
use predicates::prelude::*;

#[test]
fn test_help() {
    let env = TestEnv::new();
    env.slurm_ops()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("config"))
        .stdout(predicate::str::contains("secret"));
}

#[test]
fn test_version_flag() {
    let env = TestEnv::new();
    env.slurm_ops()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("slurm-ops"));
}

#[test]
fn test_unknown_backend() {
    let env = TestEnv::new();
    env.slurm_ops()
        .args(["--service", "slurmd", "--backend", "rpm", "version"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown backend 'rpm'"));
}

#[test]
fn test_bad_owner() {
    let env = TestEnv::new();
    env.slurm_ops()
        .env("SLURM_OPS_OWNER", "slurm")
        .args(["--service", "slurmd", "options", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("USER:GROUP"));
}
