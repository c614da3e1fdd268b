use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Minimal valid config: one hub, one fps, a two-lane group
fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = r#"
[[fps]]
name = "fps0"
extruder = "extruder"
reload_margin_mm = 50.0

[[hub]]
name = "hub0"
fps = "fps0"
upper_threshold = 0.65
lower_threshold = 0.35
path_length_mm = 1140.0

[[group]]
name = "PLA"
lanes = [["hub0", 0], ["hub0", 1]]
"#;
    let path = dir.path().join("ams.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn write_invalid_config(dir: &tempfile::TempDir) -> PathBuf {
    // thresholds inverted
    let toml = r#"
[[fps]]
name = "fps0"
extruder = "extruder"

[[hub]]
name = "hub0"
fps = "fps0"
upper_threshold = 0.35
lower_threshold = 0.65
path_length_mm = 1140.0
"#;
    let path = dir.path().join("bad.toml");
    fs::write(&path, toml).unwrap();
    path
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["check"], 0, "config OK", "stdout")]
#[case(&["run", "--scenario", "clean", "--ticks", "30"], 0, "no pause events", "stdout")]
#[case(&["run", "--scenario", "bogus"], 2, "invalid value", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = Command::cargo_bin("ams_cli").unwrap();
    cmd.arg("--config").arg(&cfg);
    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert().code(exit_code);
    match stream {
        "stdout" => assert.stdout(predicate::str::contains(needle)),
        _ => assert.stderr(predicate::str::contains(needle)),
    };
}

#[test]
fn check_rejects_an_inverted_pressure_band() {
    let dir = tempdir().unwrap();
    let cfg = write_invalid_config(&dir);

    Command::cargo_bin("ams_cli")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("lower_threshold"));
}

#[test]
fn check_reports_a_missing_config_file() {
    Command::cargo_bin("ams_cli")
        .unwrap()
        .arg("--config")
        .arg("/nonexistent/ams.toml")
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read config"));
}

#[test]
fn stuck_scenario_emits_a_stuck_spool_event_as_json() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let out = Command::cargo_bin("ams_cli")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .arg("--json")
        .args(["run", "--scenario", "stuck", "--ticks", "40"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let v: serde_json::Value = serde_json::from_slice(&out).expect("stdout is one JSON object");
    let events = v["events"].as_array().expect("events array");
    assert_eq!(events.len(), 1, "exactly one pause event: {v}");
    assert_eq!(events[0]["reason"], "stuck_spool");
    assert_eq!(events[0]["requires_ack"], true);
    assert_eq!(v["pauses"].as_array().map(Vec::len), Some(1));
}

#[test]
fn clean_scenario_is_quiet_as_json() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let out = Command::cargo_bin("ams_cli")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .arg("--json")
        .args(["run", "--scenario", "clean", "--ticks", "60"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let v: serde_json::Value = serde_json::from_slice(&out).expect("stdout is one JSON object");
    assert_eq!(v["events"].as_array().map(Vec::len), Some(0), "{v}");
    assert_eq!(v["pauses"].as_array().map(Vec::len), Some(0));
    assert_eq!(v["hubs"][0]["fault"], serde_json::Value::Null);
}

#[test]
fn runout_scenario_hands_off_without_pausing() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let out = Command::cargo_bin("ams_cli")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .arg("--json")
        .args(["run", "--scenario", "runout", "--ticks", "90"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let v: serde_json::Value = serde_json::from_slice(&out).expect("stdout is one JSON object");
    assert_eq!(v["events"].as_array().map(Vec::len), Some(0), "{v}");
    let lanes = v["hubs"][0]["lanes"].as_array().expect("lanes");
    assert_eq!(lanes[0]["status"], "empty", "{v}");
    assert_eq!(lanes[1]["status"], "tool_loaded", "{v}");
}

#[test]
fn retry_scenario_exhausts_and_records_the_stall() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let out = Command::cargo_bin("ams_cli")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .arg("--json")
        .args(["run", "--scenario", "retry", "--ticks", "60"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let v: serde_json::Value = serde_json::from_slice(&out).expect("stdout is one JSON object");
    let events = v["events"].as_array().expect("events array");
    assert_eq!(events.len(), 1, "{v}");
    assert_eq!(v["hubs"][0]["last_failure"], "encoder_stalled");
}
