use assert_cmd::Command;
use predicates::prelude::*;

fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}

#[test]
fn config_hash_prints_hash_and_canonical_json() {
    Command::cargo_bin("pve")
        .unwrap()
        .args(["config-hash", &fixture("base.yaml")])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("config_hash="))
        .stdout(predicate::str::contains("\"timezone\":\"Asia/Kolkata\""));
}

#[test]
fn config_hash_is_stable_across_runs() {
    let run = || {
        Command::cargo_bin("pve")
            .unwrap()
            .args(["config-hash", &fixture("base.yaml")])
            .output()
            .unwrap()
            .stdout
    };
    assert_eq!(run(), run());
}

#[test]
fn config_check_reports_unused_keys() {
    Command::cargo_bin("pve")
        .unwrap()
        .args(["config-check", "--mode", "daemon", &fixture("unused.yaml")])
        .assert()
        .success()
        .stdout(predicate::str::contains("mode=DAEMON"))
        .stdout(predicate::str::contains("unused=/legacy_dashboard/theme"));
}

#[test]
fn config_check_fails_on_unused_when_asked() {
    Command::cargo_bin("pve")
        .unwrap()
        .args([
            "config-check",
            "--mode",
            "replay",
            "--fail-on-unused",
            &fixture("unused.yaml"),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_UNUSED_KEYS"));
}

#[test]
fn config_check_rejects_unknown_mode() {
    Command::cargo_bin("pve")
        .unwrap()
        .args(["config-check", "--mode", "paper", &fixture("base.yaml")])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid --mode"));
}

#[test]
fn points_validate_summarizes_file() {
    Command::cargo_bin("pve")
        .unwrap()
        .args([
            "points",
            "validate",
            &fixture("points.json"),
            "--effective-from",
            "2024-03-01T00:00:00Z",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("valid=true points=3 factories=1 routes=1"));
}

#[test]
fn points_validate_rejects_non_array() {
    Command::cargo_bin("pve")
        .unwrap()
        .args(["points", "validate", &fixture("base.yaml")])
        .assert()
        .failure()
        .stderr(predicate::str::contains("JSON array of scan points"));
}
