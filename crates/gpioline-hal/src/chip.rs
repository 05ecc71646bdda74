//! Chip registry
//!
//! A [`Chip`] snapshots the line names of its backend at construction and
//! leases [`Line`] handles out by name. Membership never changes afterwards.

use crate::driver::ChipBackend;
use crate::line::Line;
use crate::signal::Pull;
use crate::{LineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Policy for opening a name that already has a live handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sharing {
    /// Independent handles to the same physical line; last writer wins
    #[default]
    Shared,
    /// A second open fails with [`LineError::AlreadyOpen`]
    Exclusive,
}

/// Chip-wide line policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChipConfig {
    /// Pull applied when a line is switched to input by `read()` before it
    /// was ever configured
    #[serde(default = "default_pull")]
    pub default_pull: Pull,

    #[serde(default)]
    pub sharing: Sharing,
}

fn default_pull() -> Pull {
    Pull::Up
}

impl Default for ChipConfig {
    fn default() -> Self {
        Self {
            default_pull: default_pull(),
            sharing: Sharing::Shared,
        }
    }
}

/// Open-handle counts per line name
#[derive(Debug, Clone, Default)]
struct LeaseTable {
    counts: Arc<Mutex<HashMap<String, usize>>>,
}

impl LeaseTable {
    fn acquire(&self, name: &str, sharing: Sharing) -> Result<Lease> {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let count = counts.entry(name.to_string()).or_insert(0);
        if sharing == Sharing::Exclusive && *count > 0 {
            return Err(LineError::AlreadyOpen(name.to_string()));
        }
        *count += 1;
        Ok(Lease {
            table: self.clone(),
            name: name.to_string(),
        })
    }

    fn count(&self, name: &str) -> usize {
        self.counts
            .lock()
            .map(|c| c.get(name).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

/// A claim on a line name, returned to the chip when dropped
#[derive(Debug)]
pub(crate) struct Lease {
    table: LeaseTable,
    name: String,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut counts = self.table.counts.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = counts.get_mut(&self.name) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(&self.name);
            }
        }
    }
}

/// Registry of the lines one backend exposes
pub struct Chip {
    backend: Box<dyn ChipBackend>,
    names: Vec<String>,
    config: ChipConfig,
    leases: LeaseTable,
}

impl Chip {
    /// Build a chip over `backend`, snapshotting its line names
    pub fn new(backend: impl ChipBackend + 'static, config: ChipConfig) -> Self {
        Self::from_backend(Box::new(backend), config)
    }

    pub fn from_backend(backend: Box<dyn ChipBackend>, config: ChipConfig) -> Self {
        let names = backend.line_names();
        tracing::info!(
            "Chip {} exposes {} line(s), sharing={:?}",
            backend.label(),
            names.len(),
            config.sharing
        );
        Self {
            backend,
            names,
            config,
            leases: LeaseTable::default(),
        }
    }

    pub fn label(&self) -> &str {
        self.backend.label()
    }

    pub fn config(&self) -> &ChipConfig {
        &self.config
    }

    /// Every line name, in line-number order
    pub fn all(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Open the line called `name`
    pub fn by_name(&self, name: &str) -> Result<Line> {
        if !self.contains(name) {
            return Err(LineError::NotFound(name.to_string()));
        }

        let lease = self.leases.acquire(name, self.config.sharing)?;
        let driver = self.backend.open_line(name)?;
        tracing::debug!("Opened {} on {}", name, self.label());
        Line::open(name, driver, self.config.default_pull, Some(lease))
    }

    /// Open the `number`th line of [`Chip::all`]
    pub fn by_number(&self, number: usize) -> Result<Line> {
        let name = self
            .names
            .get(number)
            .ok_or_else(|| LineError::NotFound(format!("line #{number}")))?;
        self.by_name(name)
    }

    /// Number of live handles on `name`
    pub fn open_handles(&self, name: &str) -> usize {
        self.leases.count(name)
    }
}

impl std::fmt::Debug for Chip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chip")
            .field("label", &self.label())
            .field("lines", &self.names.len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimChip, SimProfile};

    fn test_chip(sharing: Sharing) -> Chip {
        let profile = SimProfile::new("test")
            .with_lines(["GPIO5", "GPIO13", "GPIO21"])
            .with_jumper("GPIO5", "GPIO13");
        Chip::new(
            SimChip::new(profile),
            ChipConfig {
                sharing,
                ..ChipConfig::default()
            },
        )
    }

    #[test]
    fn test_enumeration_is_stable() {
        let chip = test_chip(Sharing::Shared);
        assert_eq!(chip.all(), ["GPIO5", "GPIO13", "GPIO21"]);
        assert_eq!(chip.all(), chip.all());
        assert_eq!(chip.label(), "test");
        assert!(chip.contains("GPIO13"));
        assert!(!chip.contains("GPIO14"));
    }

    #[test]
    fn test_unknown_name() {
        let chip = test_chip(Sharing::Shared);
        assert!(matches!(chip.by_name("GPIO99"), Err(LineError::NotFound(_))));
        assert!(matches!(chip.by_number(3), Err(LineError::NotFound(_))));
    }

    #[test]
    fn test_by_number() {
        let chip = test_chip(Sharing::Shared);
        let line = chip.by_number(1).unwrap();
        assert_eq!(line.name(), "GPIO13");
    }

    #[test]
    fn test_shared_handles() {
        let chip = test_chip(Sharing::Shared);
        let a = chip.by_name("GPIO5").unwrap();
        let b = chip.by_name("GPIO5").unwrap();
        assert_eq!(chip.open_handles("GPIO5"), 2);
        drop(a);
        assert_eq!(chip.open_handles("GPIO5"), 1);
        b.close().unwrap();
        assert_eq!(chip.open_handles("GPIO5"), 0);
    }

    #[test]
    fn test_exclusive_handles() {
        let chip = test_chip(Sharing::Exclusive);
        let line = chip.by_name("GPIO5").unwrap();
        assert!(matches!(
            chip.by_name("GPIO5"),
            Err(LineError::AlreadyOpen(_))
        ));
        drop(line);
        assert!(chip.by_name("GPIO5").is_ok());
    }

    #[test]
    fn test_chip_config_toml() {
        let config: ChipConfig = toml::from_str("sharing = \"exclusive\"").unwrap();
        assert_eq!(config.default_pull, Pull::Up);
        assert_eq!(config.sharing, Sharing::Exclusive);
    }
}
