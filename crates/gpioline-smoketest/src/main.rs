//! gpioline smoke-test dispatcher
//!
//! Probes the host, resolves the chip and runs the smoke test named on the
//! command line:
//!
//! 1. Load configuration (file, environment, flags)
//! 2. Initialize host drivers
//! 3. Run the selected test
//! 4. Report, exiting non-zero on any failure

use anyhow::{Context, Result, anyhow, bail};
use clap::{CommandFactory, Parser};
use gpioline_config::SmokeConfig;
use gpioline_hal::{BackendKind, HostState, host};
use gpioline_smoketest::{Registry, RunContext};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Runs smoke tests against GPIO hardware or the simulator
#[derive(Parser, Debug)]
#[command(name = "gpioline-smoketest", author, version, about, long_about = None)]
struct Args {
    /// Verbose mode
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Configuration file (default: user then system config)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Backend to test (sim, sysfs)
    #[arg(long)]
    backend: Option<BackendKind>,

    /// sysfs GPIO class directory
    #[arg(long)]
    sysfs_root: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Smoke test to run, `list`, or `help`
    name: Option<String>,

    /// Scenarios to run (default: all)
    scenarios: Vec<String>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("gpioline-smoketest: {err:#}.");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let registry = Registry::with_defaults();

    let Some(name) = args.name.as_deref() else {
        usage(&registry);
        println!();
        bail!("please specify a test to run or use help");
    };
    match name {
        "help" => {
            usage(&registry);
            return Ok(());
        }
        "list" => {
            list(&registry);
            return Ok(());
        }
        _ => {}
    }
    let test = registry
        .get(name)
        .ok_or_else(|| anyhow!("test case {name:?} was not found"))?;

    setup_logging(args.verbose);

    let config = load_config(&args)?;
    let state = host::init(&config.host_options());
    log_drivers(&state);
    let chip = state
        .into_chip()
        .context("no GPIO chip could be loaded")?;

    let report = test.run(&RunContext { chip: &chip, config: &config }, &args.scenarios)?;
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        println!("{report}");
    }

    if !report.passed() {
        bail!(
            "{} failed with {} failure(s)",
            test.name(),
            report.failure_count()
        );
    }
    info!("Test {} successful", test.name());
    Ok(())
}

/// Setup logging
fn setup_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn load_config(args: &Args) -> Result<SmokeConfig> {
    let mut config = match &args.config {
        Some(path) => SmokeConfig::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => SmokeConfig::load_default().context("Failed to load configuration")?,
    };
    config
        .apply_env()
        .context("Invalid environment override")?;

    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(root) = &args.sysfs_root {
        config.sysfs_root = root.clone();
    }
    config.validate().context("Invalid configuration")?;
    debug!("Configuration: {:?}", config);
    Ok(config)
}

fn log_drivers(state: &HostState) {
    if !state.failed.is_empty() {
        warn!("Failed to load some drivers:");
        for failure in &state.failed {
            warn!("- {}: {}", failure.driver, failure.error);
        }
    }
    info!("Using drivers:");
    for driver in &state.loaded {
        info!("- {}", driver);
    }
    if !state.skipped.is_empty() {
        debug!("Drivers skipped:");
        for driver in &state.skipped {
            debug!("- {}", driver);
        }
    }
}

fn usage(registry: &Registry) {
    eprintln!("{}", Args::command().render_help());
    eprintln!("Tests available:");
    eprint!("{}", registry.usage_table());
}

fn list(registry: &Registry) {
    for name in registry.names() {
        println!("{name}");
        if let Some(test) = registry.get(name) {
            for scenario in test.scenarios() {
                println!("  {scenario}");
            }
        }
    }
}
