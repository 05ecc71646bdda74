//! Smoke-test registry
//!
//! The dispatcher looks smoke tests up by name in an explicit [`Registry`].

use crate::harness::{Bench, RunReport, run_scenarios};
use crate::scenarios;
use anyhow::{Result, bail};
use gpioline_config::SmokeConfig;
use gpioline_hal::Chip;

/// What a smoke test runs against
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub chip: &'a Chip,
    pub config: &'a SmokeConfig,
}

/// A smoke test selectable from the command line
pub trait SmokeTest: Send + Sync {
    /// Identifier used on the command line
    fn name(&self) -> &'static str;

    /// One line for the usage table, including any wiring requirement
    fn description(&self) -> &'static str;

    /// Scenarios that can be selected individually
    fn scenarios(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Run the test. `args` are the command-line arguments after the name.
    fn run(&self, ctx: &RunContext<'_>, args: &[String]) -> Result<RunReport>;
}

/// GPIO conformance test over two jumpered lines
#[derive(Debug, Default, Clone, Copy)]
pub struct GpioSmokeTest;

impl SmokeTest for GpioSmokeTest {
    fn name(&self) -> &'static str {
        "gpio"
    }

    fn description(&self) -> &'static str {
        "Tests basic functionality, edge detection and input pull resistors (jumper in_line to out_line)"
    }

    fn scenarios(&self) -> Vec<&'static str> {
        scenarios::all().iter().map(|s| s.name).collect()
    }

    fn run(&self, ctx: &RunContext<'_>, args: &[String]) -> Result<RunReport> {
        let bench = Bench {
            chip: ctx.chip,
            lines: &ctx.config.lines,
            timing: &ctx.config.timing,
        };
        tracing::info!(
            "Testing {} -> {} on {}",
            bench.lines.out_line,
            bench.lines.in_line,
            ctx.chip.label()
        );
        run_scenarios(self.name(), &bench, &scenarios::all(), args)
    }
}

#[derive(Default)]
pub struct Registry {
    tests: Vec<Box<dyn SmokeTest>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in smoke test
    pub fn with_defaults() -> Self {
        Self {
            tests: vec![Box::new(GpioSmokeTest)],
        }
    }

    pub fn register(&mut self, test: Box<dyn SmokeTest>) -> Result<()> {
        if self.get(test.name()).is_some() {
            bail!("smoke test {:?} is already registered", test.name());
        }
        self.tests.push(test);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn SmokeTest> {
        self.tests
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.tests.iter().map(|t| t.name()).collect();
        names.sort_unstable();
        names
    }

    /// Sorted, aligned table of names and descriptions
    pub fn usage_table(&self) -> String {
        let width = self.tests.iter().map(|t| t.name().len()).max().unwrap_or(0);
        let mut table = String::new();
        for name in self.names() {
            if let Some(test) = self.get(name) {
                table.push_str(&format!("  {name:<width$} {}\n", test.description()));
            }
        }
        table
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("tests", &self.names())
            .finish()
    }
}
