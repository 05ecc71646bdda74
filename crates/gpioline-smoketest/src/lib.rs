//! GPIO conformance smoke test
//!
//! Runs scenario-driven checks of the line contract against two lines that
//! are wired together, and reports per-scenario results.
//!
//! # Example
//!
//! ```no_run
//! use gpioline_config::SmokeConfig;
//! use gpioline_hal::host;
//! use gpioline_smoketest::{Registry, RunContext};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = SmokeConfig::default();
//!     let state = host::init(&config.host_options());
//!     let chip = state.chip().ok_or_else(|| anyhow::anyhow!("no chip"))?;
//!
//!     let registry = Registry::with_defaults();
//!     let gpio = registry.get("gpio").ok_or_else(|| anyhow::anyhow!("no gpio test"))?;
//!     let report = gpio.run(&RunContext { chip, config: &config }, &[])?;
//!     println!("{report}");
//!     Ok(())
//! }
//! ```

pub mod harness;
pub mod registry;
pub mod scenarios;

pub use harness::{
    Abort, Bench, Recorder, RunReport, Scenario, ScenarioReport, ScenarioStatus, run_scenarios,
};
pub use registry::{GpioSmokeTest, Registry, RunContext, SmokeTest};
