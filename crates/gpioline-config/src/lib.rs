//! Configuration management for the gpioline smoke test
//!
//! Selects the backend, names the two jumpered lines under test, sets chip
//! policy and scenario timings. TOML files can be layered, and a few
//! settings can be overridden from the environment.

mod timing;

pub use timing::TimingConfig;

use gpioline_hal::{BackendKind, ChipConfig, HostOptions, Pull, sysfs};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Standard configuration paths
pub const CONFIG_DIR: &str = "/etc/gpioline";
pub const USER_CONFIG_SUBDIR: &str = ".config/gpioline";
pub const CONFIG_FILE: &str = "smoketest.toml";

/// Environment overrides
pub const ENV_BACKEND: &str = "GPIOLINE_BACKEND";
pub const ENV_IN_LINE: &str = "GPIOLINE_IN_LINE";
pub const ENV_OUT_LINE: &str = "GPIOLINE_OUT_LINE";

/// The two lines under test, assumed to be jumpered together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinesConfig {
    #[serde(default = "default_in_line")]
    pub in_line: String,
    #[serde(default = "default_out_line")]
    pub out_line: String,
}

fn default_in_line() -> String {
    "GPIO13".to_string()
}

fn default_out_line() -> String {
    "GPIO5".to_string()
}

impl Default for LinesConfig {
    fn default() -> Self {
        Self {
            in_line: default_in_line(),
            out_line: default_out_line(),
        }
    }
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from(sysfs::DEFAULT_ROOT)
}

/// Smoke-test configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmokeConfig {
    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,

    /// Simulator layout file; the Raspberry Pi bench when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sim_profile: Option<PathBuf>,

    #[serde(default)]
    pub lines: LinesConfig,

    #[serde(default)]
    pub chip: ChipConfig,

    #[serde(default)]
    pub timing: TimingConfig,
}

impl Default for SmokeConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            sysfs_root: default_sysfs_root(),
            sim_profile: None,
            lines: LinesConfig::default(),
            chip: ChipConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

impl SmokeConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load_default() -> Result<Self, ConfigError> {
        // Try user config first, then system config
        if let Some(user_config) = user_config_path() {
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        let system_config = Path::new(CONFIG_DIR).join(CONFIG_FILE);
        if system_config.exists() {
            return Self::load(&system_config);
        }

        tracing::debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Load several files, later ones overriding earlier ones key by key.
    /// Missing files are skipped.
    pub fn load_layered<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ConfigError> {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                tracing::debug!("Skipping missing config layer {}", path.display());
                continue;
            }
            let layer: toml::Value = toml::from_str(&std::fs::read_to_string(path)?)?;
            merge_toml(&mut merged, layer);
            tracing::debug!("Applied config layer {}", path.display());
        }
        Ok(merged.try_into::<Self>()?)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        tracing::info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Apply `GPIOLINE_*` environment overrides
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up by environment variable name
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup(ENV_BACKEND) {
            self.backend = backend
                .parse()
                .map_err(|e: String| ConfigError::Invalid(format!("{ENV_BACKEND}: {e}")))?;
        }
        if let Some(line) = lookup(ENV_IN_LINE) {
            self.lines.in_line = line;
        }
        if let Some(line) = lookup(ENV_OUT_LINE) {
            self.lines.out_line = line;
        }
        Ok(())
    }

    /// Host probing options for this configuration
    pub fn host_options(&self) -> HostOptions {
        HostOptions {
            backend: self.backend,
            sysfs_root: self.sysfs_root.clone(),
            sim_profile: self.sim_profile.clone(),
            fallback_to_sim: false,
            chip: self.chip,
        }
    }

    /// Check the configuration is usable for a run
    pub fn validate(&self) -> Result<(), ConfigError> {
        let lines = &self.lines;
        if lines.in_line.is_empty() || lines.out_line.is_empty() {
            return Err(ConfigError::Invalid("line names must not be empty".into()));
        }
        if lines.in_line == lines.out_line {
            return Err(ConfigError::Invalid(format!(
                "in_line and out_line are both {}",
                lines.in_line
            )));
        }

        let timing = &self.timing;
        if !timing.tolerance.is_finite() || timing.tolerance < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "tolerance must be a non-negative number, got {}",
                timing.tolerance
            )));
        }
        if timing.wait_timeout_ms == 0 || timing.edge_timeout_ms == 0 {
            return Err(ConfigError::Invalid("wait timeouts must be positive".into()));
        }
        if timing.halt_after_ms >= timing.halt_wait_ms {
            return Err(ConfigError::Invalid(format!(
                "halt_after_ms ({}) must be shorter than halt_wait_ms ({})",
                timing.halt_after_ms, timing.halt_wait_ms
            )));
        }

        if self.backend == BackendKind::Sysfs && self.chip.default_pull != Pull::None {
            tracing::warn!(
                "sysfs cannot apply {}; pull checks will fail on this backend",
                self.chip.default_pull
            );
        }
        Ok(())
    }
}

fn user_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join(USER_CONFIG_SUBDIR)
            .join(CONFIG_FILE)
    })
}

/// Helper function to merge TOML values
pub fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                if let Some(base_value) = base_table.get_mut(&key) {
                    merge_toml(base_value, value);
                } else {
                    base_table.insert(key, value);
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
