//! Host probing
//!
//! Loads the backend drivers a run asked for and records what happened to
//! each one, so callers can report loaded, failed and skipped drivers.

use crate::chip::{Chip, ChipConfig};
use crate::signal::Pull;
use crate::sim::{SimChip, SimProfile};
use crate::sysfs::{DEFAULT_ROOT, SysfsChip};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which backend drives the lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Sim,
    Sysfs,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Sim => write!(f, "sim"),
            BackendKind::Sysfs => write!(f, "sysfs"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sim" => Ok(BackendKind::Sim),
            "sysfs" => Ok(BackendKind::Sysfs),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HostOptions {
    pub backend: BackendKind,
    pub sysfs_root: PathBuf,
    /// Simulator layout; the Raspberry Pi bench when unset
    pub sim_profile: Option<PathBuf>,
    /// Load the simulator when the sysfs probe fails
    pub fallback_to_sim: bool,
    pub chip: ChipConfig,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            backend: BackendKind::Sim,
            sysfs_root: PathBuf::from(DEFAULT_ROOT),
            sim_profile: None,
            fallback_to_sim: false,
            chip: ChipConfig::default(),
        }
    }
}

/// A driver that failed to load
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverFailure {
    pub driver: String,
    pub error: String,
}

/// Outcome of [`init`]
#[derive(Debug, Default)]
pub struct HostState {
    pub loaded: Vec<String>,
    pub failed: Vec<DriverFailure>,
    pub skipped: Vec<String>,
    pub chips: Vec<Chip>,
}

impl HostState {
    /// First loaded chip
    pub fn chip(&self) -> Option<&Chip> {
        self.chips.first()
    }

    pub fn into_chip(self) -> Option<Chip> {
        self.chips.into_iter().next()
    }
}

/// Probe the backends selected by `options`.
///
/// A driver that fails is recorded in [`HostState::failed`] rather than
/// returned as an error; the caller decides whether an empty host is fatal.
pub fn init(options: &HostOptions) -> HostState {
    let mut state = HostState::default();

    let want_sim = match options.backend {
        BackendKind::Sysfs => match probe_sysfs(options) {
            Ok(chip) => {
                state.loaded.push("sysfs".to_string());
                state.chips.push(chip);
                false
            }
            Err(e) => {
                tracing::warn!("sysfs driver failed: {}", e);
                state.failed.push(DriverFailure {
                    driver: "sysfs".to_string(),
                    error: e.to_string(),
                });
                options.fallback_to_sim
            }
        },
        BackendKind::Sim => {
            state.skipped.push("sysfs".to_string());
            true
        }
    };

    if want_sim {
        match load_sim(options) {
            Ok(chip) => {
                state.loaded.push("sim".to_string());
                state.chips.push(chip);
            }
            Err(e) => {
                tracing::warn!("sim driver failed: {}", e);
                state.failed.push(DriverFailure {
                    driver: "sim".to_string(),
                    error: e.to_string(),
                });
            }
        }
    } else {
        state.skipped.push("sim".to_string());
    }

    tracing::info!(
        "Host init: loaded={:?} failed={} skipped={:?}",
        state.loaded,
        state.failed.len(),
        state.skipped
    );
    state
}

fn probe_sysfs(options: &HostOptions) -> Result<Chip> {
    let backend = SysfsChip::probe(&options.sysfs_root)?;
    // No bias control through sysfs
    let mut config = options.chip;
    if config.default_pull != Pull::None {
        tracing::debug!(
            "sysfs cannot apply {}, using PullNoChange",
            config.default_pull
        );
        config.default_pull = Pull::None;
    }
    Ok(Chip::new(backend, config))
}

fn load_sim(options: &HostOptions) -> Result<Chip> {
    let profile = match &options.sim_profile {
        Some(path) => SimProfile::from_file(path)?,
        None => SimProfile::raspberry_pi(),
    };
    Ok(Chip::new(SimChip::new(profile), options.chip))
}
