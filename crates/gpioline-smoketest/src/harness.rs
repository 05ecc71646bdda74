//! Scenario runner
//!
//! A scenario records non-fatal failures on its [`Recorder`] and keeps
//! going. A fatal failure ends the scenario with [`Abort`] and skips every
//! scenario after it in the run.

use anyhow::bail;
use gpioline_config::{LinesConfig, TimingConfig};
use gpioline_hal::{Chip, Line, Pull};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// Returned by a scenario that cannot continue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abort;

pub type Step = Result<(), Abort>;

/// Hardware and settings a scenario runs against
#[derive(Debug, Clone, Copy)]
pub struct Bench<'a> {
    pub chip: &'a Chip,
    pub lines: &'a LinesConfig,
    pub timing: &'a TimingConfig,
}

impl Bench<'_> {
    /// Pull used when arming inputs
    pub fn pull(&self) -> Pull {
        self.chip.config().default_pull
    }

    /// Open `name`; failing to do so is fatal
    pub fn open(&self, rec: &mut Recorder, name: &str) -> Result<Line, Abort> {
        rec.require(self.chip.by_name(name), &format!("open {name}"))
    }

    pub fn in_line(&self, rec: &mut Recorder) -> Result<Line, Abort> {
        self.open(rec, &self.lines.in_line)
    }

    pub fn out_line(&self, rec: &mut Recorder) -> Result<Line, Abort> {
        self.open(rec, &self.lines.out_line)
    }
}

/// Failure log of one scenario
#[derive(Debug)]
pub struct Recorder {
    scenario: &'static str,
    failures: Vec<String>,
    fatal: bool,
}

impl Recorder {
    pub fn new(scenario: &'static str) -> Self {
        Self {
            scenario,
            failures: Vec::new(),
            fatal: false,
        }
    }

    /// Record a failure and carry on
    pub fn error(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::error!("{}: {}", self.scenario, msg);
        self.failures.push(msg);
    }

    /// Record a failure unless `ok`. Returns `ok`.
    pub fn check(&mut self, ok: bool, msg: impl FnOnce() -> String) -> bool {
        if !ok {
            self.error(msg());
        }
        ok
    }

    /// Record a failure that ends the run
    pub fn fatal(&mut self, msg: impl Into<String>) -> Abort {
        self.error(msg);
        self.fatal = true;
        Abort
    }

    /// Unwrap `result`, recording a non-fatal failure on error
    pub fn ok<T, E: fmt::Display>(&mut self, result: Result<T, E>, what: &str) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.error(format!("{what}: {e}"));
                None
            }
        }
    }

    /// Unwrap `result`, aborting the run on error
    pub fn require<T, E: fmt::Display>(&mut self, result: Result<T, E>, what: &str) -> Result<T, Abort> {
        result.map_err(|e| self.fatal(format!("{what}: {e}")))
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    pub fn failures(&self) -> &[String] {
        &self.failures
    }
}

pub type ScenarioFn = fn(&Bench<'_>, &mut Recorder) -> Step;

/// A named conformance check
#[derive(Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    pub run: ScenarioFn,
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario").field("name", &self.name).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    Fatal,
    Skipped,
}

impl fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScenarioStatus::Passed => "PASS",
            ScenarioStatus::Failed => "FAIL",
            ScenarioStatus::Fatal => "FATAL",
            ScenarioStatus::Skipped => "SKIP",
        };
        f.pad(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub status: ScenarioStatus,
    pub failures: Vec<String>,
    pub elapsed_ms: u64,
}

/// Outcome of one smoke-test run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub test: String,
    pub chip: String,
    pub scenarios: Vec<ScenarioReport>,
    pub elapsed_ms: u64,
}

impl RunReport {
    /// Whether every selected scenario ran without failure
    pub fn passed(&self) -> bool {
        self.scenarios
            .iter()
            .all(|s| s.status == ScenarioStatus::Passed)
    }

    /// Whether a fatal failure cut the run short
    pub fn aborted(&self) -> bool {
        self.scenarios
            .iter()
            .any(|s| s.status == ScenarioStatus::Fatal)
    }

    pub fn failure_count(&self) -> usize {
        self.scenarios.iter().map(|s| s.failures.len()).sum()
    }

    pub fn scenario(&self, name: &str) -> Option<&ScenarioReport> {
        self.scenarios.iter().find(|s| s.name == name)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} on {}:", self.test, self.chip)?;
        for scenario in &self.scenarios {
            writeln!(
                f,
                "  {:<5} {} ({} ms)",
                scenario.status, scenario.name, scenario.elapsed_ms
            )?;
            for failure in &scenario.failures {
                writeln!(f, "        - {failure}")?;
            }
        }
        write!(
            f,
            "{} failure(s) in {} ms",
            self.failure_count(),
            self.elapsed_ms
        )
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Run `scenarios` in order, restricted to `filters` when any are given
pub fn run_scenarios(
    test: &str,
    bench: &Bench<'_>,
    scenarios: &[Scenario],
    filters: &[String],
) -> anyhow::Result<RunReport> {
    for filter in filters {
        if !scenarios.iter().any(|s| s.name == filter) {
            bail!("unknown scenario {filter:?}");
        }
    }

    let run_start = Instant::now();
    let mut reports = Vec::new();
    let mut aborted = false;
    for scenario in scenarios
        .iter()
        .filter(|s| filters.is_empty() || filters.iter().any(|f| f == s.name))
    {
        if aborted {
            tracing::warn!("Skipping {} after fatal failure", scenario.name);
            reports.push(ScenarioReport {
                name: scenario.name.to_string(),
                status: ScenarioStatus::Skipped,
                failures: Vec::new(),
                elapsed_ms: 0,
            });
            continue;
        }

        tracing::info!("Running {}", scenario.name);
        let start = Instant::now();
        let mut rec = Recorder::new(scenario.name);
        // An Abort is already recorded as fatal
        let _ = (scenario.run)(bench, &mut rec);

        let status = if rec.is_fatal() {
            aborted = true;
            ScenarioStatus::Fatal
        } else if rec.failures().is_empty() {
            ScenarioStatus::Passed
        } else {
            ScenarioStatus::Failed
        };
        tracing::info!("{} {} in {:?}", status, scenario.name, start.elapsed());
        reports.push(ScenarioReport {
            name: scenario.name.to_string(),
            status,
            failures: rec.failures,
            elapsed_ms: millis(start.elapsed()),
        });
    }

    Ok(RunReport {
        test: test.to_string(),
        chip: bench.chip.label().to_string(),
        scenarios: reports,
        elapsed_ms: millis(run_start.elapsed()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpioline_hal::ChipConfig;
    use gpioline_hal::sim::{SimChip, SimProfile};

    fn passing(_: &Bench<'_>, _: &mut Recorder) -> Step {
        Ok(())
    }

    fn failing(_: &Bench<'_>, rec: &mut Recorder) -> Step {
        rec.check(1 + 1 == 3, || "arithmetic is broken".to_string());
        rec.error("second failure");
        Ok(())
    }

    fn fatal(_: &Bench<'_>, rec: &mut Recorder) -> Step {
        Err(rec.fatal("cannot continue"))
    }

    const SCENARIOS: [Scenario; 4] = [
        Scenario { name: "a", description: "passes", run: passing },
        Scenario { name: "b", description: "fails", run: failing },
        Scenario { name: "c", description: "aborts", run: fatal },
        Scenario { name: "d", description: "passes", run: passing },
    ];

    fn with_bench<R>(f: impl FnOnce(&Bench<'_>) -> R) -> R {
        let chip = Chip::new(SimChip::new(SimProfile::new("unit")), ChipConfig::default());
        let lines = LinesConfig::default();
        let timing = TimingConfig::quick();
        f(&Bench { chip: &chip, lines: &lines, timing: &timing })
    }

    #[test]
    fn test_recorder_separates_fatal() {
        let mut rec = Recorder::new("unit");
        assert!(rec.check(true, || unreachable!()));
        assert_eq!(rec.ok::<u8, String>(Err("boom".into()), "step"), None);
        assert!(!rec.is_fatal());
        assert_eq!(rec.failures(), ["step: boom"]);

        assert_eq!(rec.require::<u8, String>(Err("gone".into()), "open"), Err(Abort));
        assert!(rec.is_fatal());
        assert_eq!(rec.failures().len(), 2);
    }

    #[test]
    fn test_fatal_skips_the_rest() {
        let report = with_bench(|bench| run_scenarios("unit", bench, &SCENARIOS, &[]).unwrap());
        let statuses: Vec<_> = report.scenarios.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            [
                ScenarioStatus::Passed,
                ScenarioStatus::Failed,
                ScenarioStatus::Fatal,
                ScenarioStatus::Skipped
            ]
        );
        assert!(!report.passed());
        assert!(report.aborted());
        assert_eq!(report.failure_count(), 3);
        assert_eq!(report.chip, "unit");
    }

    #[test]
    fn test_filters() {
        let report = with_bench(|bench| {
            run_scenarios("unit", bench, &SCENARIOS, &["d".to_string(), "a".to_string()]).unwrap()
        });
        let names: Vec<_> = report.scenarios.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["a", "d"]);
        assert!(report.passed());

        let err = with_bench(|bench| {
            run_scenarios("unit", bench, &SCENARIOS, &["zzz".to_string()]).unwrap_err()
        });
        assert!(err.to_string().contains("zzz"));
    }

    #[test]
    fn test_report_display() {
        let report = with_bench(|bench| run_scenarios("unit", bench, &SCENARIOS[..2], &[]).unwrap());
        let text = report.to_string();
        assert!(text.contains("PASS  a"));
        assert!(text.contains("FAIL  b"));
        assert!(text.contains("- second failure"));
    }

    #[test]
    fn test_status_honours_width() {
        assert_eq!(format!("[{:<5}]", ScenarioStatus::Passed), "[PASS ]");
        assert_eq!(format!("[{:<5}]", ScenarioStatus::Fatal), "[FATAL]");
        assert_eq!(format!("[{:>6}]", ScenarioStatus::Skipped), "[  SKIP]");
    }
}
