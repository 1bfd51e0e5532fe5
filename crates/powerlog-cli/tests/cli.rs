//! Argument validation and offline commands of the `powerlog` binary
//!
//! Nothing here needs a node: validation must fail before any connection is
//! attempted, and the RPC URL points at a port nothing listens on so a
//! regression shows up as a connection error instead of a hang.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

const DEAD_RPC: &str = "http://127.0.0.1:9";

fn powerlog(dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("powerlog").unwrap();
    cmd.current_dir(dir)
        .env_remove("PRIVATE_KEY")
        .env_remove("POWERLOG_CONFIG")
        .env_remove("POWERLOG_SIGNATURE_FILE")
        .env("POWERLOG_RPC_URL", DEAD_RPC);
    cmd
}

#[test]
fn test_rejects_non_positive_value() {
    let dir = tempfile::tempdir().unwrap();
    for value in ["0", "-5", "abc", "1.5"] {
        powerlog(dir.path())
            .args(["add-record", "--value", value, "--period", "1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Argument --value must be a positive integer"))
            .stderr(predicate::str::contains("cannot connect").not());
    }
}

#[test]
fn test_rejects_non_positive_period() {
    let dir = tempfile::tempdir().unwrap();
    powerlog(dir.path())
        .args(["add-record", "--value", "150", "--period", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Argument --period must be a positive integer"));
}

#[test]
fn test_rejects_non_positive_id() {
    let dir = tempfile::tempdir().unwrap();
    for command in ["get-record", "decrypt-record", "exists"] {
        powerlog(dir.path())
            .args([command, "--id", "0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Argument --id must be a positive integer"));
    }
}

#[test]
fn test_rejects_bad_batch_entry() {
    let dir = tempfile::tempdir().unwrap();
    powerlog(dir.path())
        .args(["batch-add", "--values", "150,,175", "--period", "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Argument --values must be a positive integer"));
}

#[test]
fn test_rejects_bad_contract_address() {
    let dir = tempfile::tempdir().unwrap();
    powerlog(dir.path())
        .args(["total", "--address", "0x1234"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Argument --address"));
}

#[test]
fn test_valid_arguments_reach_the_node() {
    let dir = tempfile::tempdir().unwrap();
    powerlog(dir.path())
        .args(["total"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot connect to http://127.0.0.1:9"));
}

#[test]
fn test_gen_addresses_from_localhost_deployment() {
    let dir = tempfile::tempdir().unwrap();
    let localhost = dir.path().join("deployments").join("localhost");
    fs::create_dir_all(&localhost).unwrap();
    fs::write(
        localhost.join("PowerUsage.json"),
        r#"{"address": "0x5fbdb2315678afecb367f032d93f642f64180aa3", "abi": [{"type": "function", "name": "getTotalRecords"}]}"#,
    )
    .unwrap();

    powerlog(dir.path())
        .args(["gen-addresses", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"chainName\": \"hardhat\""))
        .stdout(predicate::str::contains("PowerUsageAddresses.json"));

    let addresses = fs::read_to_string(dir.path().join("abi").join("PowerUsageAddresses.json")).unwrap();
    assert!(addresses.contains("0x5fbdb2315678afecb367f032d93f642f64180aa3"));
    assert!(addresses.contains("\"11155111\""));
    assert!(dir.path().join("abi").join("PowerUsageABI.json").exists());
}

#[test]
fn test_gen_addresses_without_deployments_fails() {
    let dir = tempfile::tempdir().unwrap();
    powerlog(dir.path())
        .args(["gen-addresses"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no deployment found"));
}
