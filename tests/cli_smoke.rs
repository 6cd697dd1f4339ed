//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::boolean::PredicateBooleanExt;
use predicates::str::contains;
use tempfile::TempDir;

/// Runs the binary in `dir` with every region source cleared.
fn isolated(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("spotlaunch");
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env("AWS_CONFIG_FILE", dir.path().join("no-such-config"))
        .env_remove("AWS_DEFAULT_REGION")
        .env_remove("AWS_REGION")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("spotlaunch");
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(contains("launch"))
        .stdout(contains("plan"));
}

#[test]
fn version_is_reported() {
    let mut cmd = cargo_bin_cmd!("spotlaunch");
    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn missing_launch_spec_is_a_configuration_error() {
    let dir = TempDir::new().expect("tempdir");
    isolated(&dir)
        .arg("launch")
        .assert()
        .code(1)
        .stdout("")
        .stderr(contains("configuration error"))
        .stderr(contains("launch_spec.json"));
}

#[test]
fn unresolved_region_fails_before_any_provider_call() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(
        dir.path().join("launch_spec.json"),
        r#"{ "INSTANCE_COUNT": 1, "MAX_SPOT_PRICE": "0.05", "ImageId": "ami-1", "InstanceType": "t3.micro" }"#,
    )
    .expect("write spec");

    isolated(&dir)
        .env("SPOTLAUNCH_AWS_BIN", dir.path().join("aws-must-not-run"))
        .args(["launch", "--wait"])
        .assert()
        .code(1)
        .stderr(contains("no region resolved"));
}

#[test]
fn plan_prints_the_request_payload() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(
        dir.path().join("spec.json"),
        r#"{
            "INSTANCE_COUNT": "2",
            "MAX_SPOT_PRICE": "0.08",
            "ImageId": "ami-bba18dd2",
            "InstanceType": "t1.micro",
            "KeyName": "ops",
            "Placement": { "AvailabilityZone": "us-east-1" }
        }"#,
    )
    .expect("write spec");

    isolated(&dir)
        .args(["plan", "-l", "spec.json"])
        .assert()
        .success()
        .stdout(contains(r#""Region": "us-east-1""#))
        .stdout(contains(r#""SpotPrice": "0.08""#))
        .stdout(contains(r#""InstanceCount": 2"#))
        .stdout(contains(r#""KeyName": "ops""#))
        .stdout(contains("Placement").not());
}

#[test]
fn plan_rejects_non_text_user_data() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(
        dir.path().join("launch_spec.json"),
        r#"{ "INSTANCE_COUNT": 1, "MAX_SPOT_PRICE": "0.05", "ImageId": "ami-1", "InstanceType": "t3.micro",
             "Placement": { "AvailabilityZone": "us-west-2a" } }"#,
    )
    .expect("write spec");
    std::fs::write(dir.path().join("blob.bin"), [0xff_u8, 0xfe, 0x00]).expect("write blob");

    isolated(&dir)
        .args(["plan", "--user-data", "blob.bin"])
        .assert()
        .code(1)
        .stderr(contains("user data error"));
}
