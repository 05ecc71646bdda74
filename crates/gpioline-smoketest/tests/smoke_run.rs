//! Integration tests running the GPIO smoke test against the simulator

use gpioline_config::{SmokeConfig, TimingConfig};
use gpioline_hal::sim::{SimChip, SimProfile};
use gpioline_hal::{Chip, ChipConfig, host};
use gpioline_smoketest::{Registry, RunContext, RunReport, ScenarioStatus};
use std::fs;
use tempfile::TempDir;

fn quick_config() -> SmokeConfig {
    SmokeConfig {
        timing: TimingConfig::quick(),
        ..SmokeConfig::default()
    }
}

fn run_gpio(chip: &Chip, config: &SmokeConfig, scenarios: &[&str]) -> RunReport {
    let registry = Registry::with_defaults();
    let test = registry.get("gpio").expect("gpio test registered");
    let args: Vec<String> = scenarios.iter().map(|s| s.to_string()).collect();
    test.run(&RunContext { chip, config }, &args)
        .expect("run should complete")
}

#[test]
fn test_full_run_on_jumpered_sim_passes() {
    let config = quick_config();
    let state = host::init(&config.host_options());
    let chip = state.chip().expect("sim chip loaded");

    let report = run_gpio(chip, &config, &[]);
    assert_eq!(report.scenarios.len(), 11, "{report}");
    assert!(report.passed(), "{report}");
    assert!(!report.aborted());
    assert_eq!(report.failure_count(), 0);
    for name in ["write-read-single-pin", "halt", "line-set-config-with-override"] {
        assert_eq!(report.scenario(name).unwrap().status, ScenarioStatus::Passed);
    }
    assert_eq!(chip.open_handles("GPIO5"), 0);
    assert_eq!(chip.open_handles("GPIO13"), 0);
}

#[test]
fn test_missing_jumper_fails_without_aborting() {
    let profile = SimProfile::new("no-jumper").with_lines(["GPIO5", "GPIO13"]);
    let chip = Chip::new(SimChip::new(profile), ChipConfig::default());
    let config = quick_config();

    let report = run_gpio(&chip, &config, &[]);
    assert!(!report.passed());
    assert!(!report.aborted());
    assert_eq!(
        report.scenario("write-read-single-pin").unwrap().status,
        ScenarioStatus::Failed
    );
    assert_eq!(
        report.scenario("wait-for-edge-single-pin").unwrap().status,
        ScenarioStatus::Failed
    );
    // Nothing depends on the jumper here
    assert_eq!(
        report.scenario("wait-for-edge-timeout").unwrap().status,
        ScenarioStatus::Passed
    );
    assert_eq!(report.scenario("halt").unwrap().status, ScenarioStatus::Passed);
}

#[test]
fn test_unknown_line_is_fatal() {
    let mut config = quick_config();
    config.lines.in_line = "GPIO99".to_string();
    let state = host::init(&config.host_options());
    let chip = state.chip().unwrap();

    let report = run_gpio(chip, &config, &[]);
    assert!(report.aborted());
    assert_eq!(report.scenarios[0].status, ScenarioStatus::Fatal);
    assert!(report.scenarios[0].failures[0].contains("GPIO99"));
    assert!(
        report.scenarios[1..]
            .iter()
            .all(|s| s.status == ScenarioStatus::Skipped)
    );
}

#[test]
fn test_scenario_filter_and_json_report() {
    let config = quick_config();
    let state = host::init(&config.host_options());
    let chip = state.chip().unwrap();

    let report = run_gpio(chip, &config, &["line-set-halt", "halt"]);
    let names: Vec<_> = report.scenarios.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["halt", "line-set-halt"]);
    assert!(report.passed(), "{report}");

    let json: serde_json::Value = serde_json::to_value(&report).unwrap();
    assert_eq!(json["test"], "gpio");
    assert_eq!(json["chip"], "sim-raspberry-pi");
    assert_eq!(json["scenarios"][0]["status"], "passed");
    assert!(json["elapsed_ms"].is_u64());
}

#[test]
fn test_unknown_scenario_is_an_error() {
    let config = quick_config();
    let state = host::init(&config.host_options());
    let chip = state.chip().unwrap();

    let registry = Registry::with_defaults();
    let test = registry.get("gpio").unwrap();
    let err = test
        .run(
            &RunContext { chip, config: &config },
            &["no-such-scenario".to_string()],
        )
        .unwrap_err();
    assert!(err.to_string().contains("no-such-scenario"));
}

#[test]
fn test_run_from_config_file_with_sim_profile() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let profile = dir.path().join("bench.toml");
    fs::write(
        &profile,
        r#"
label = "bench"
lines = ["GPIO20", "GPIO21"]
jumpers = [["GPIO20", "GPIO21"]]
"#,
    )
    .unwrap();

    let config_path = dir.path().join("smoketest.toml");
    fs::write(
        &config_path,
        format!(
            r#"
backend = "sim"
sim_profile = "{}"

[lines]
in_line = "GPIO21"
out_line = "GPIO20"

[timing]
wait_timeout_ms = 100
tolerance = 0.5
edge_timeout_ms = 200
negative_window_ms = 30
halt_after_ms = 50
halt_wait_ms = 2000
halt_slack_ms = 400
settle_ms = 5
"#,
            profile.display()
        ),
    )
    .unwrap();

    let config = SmokeConfig::load(&config_path).unwrap();
    config.validate().unwrap();
    let state = host::init(&config.host_options());
    let chip = state.chip().unwrap();
    assert_eq!(chip.label(), "bench");

    let report = run_gpio(chip, &config, &["write-read-single-pin", "line-set-wait-for-edge"]);
    assert!(report.passed(), "{report}");
}
