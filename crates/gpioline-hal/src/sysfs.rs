//! Linux sysfs GPIO backend
//!
//! Drives lines through `/sys/class/gpio`: every `gpiochipN` directory
//! contributes `ngpio` lines starting at `base`, named `GPIO<n>`. Opening a
//! line exports it if needed; the last handle unexports what this process
//! exported.
//!
//! The sysfs interface has no bias control, so only [`Pull::None`] is
//! accepted. Edges are detected with `poll(2)` on the `value` attribute;
//! the backend cannot notify, so waits run in bounded poll slices.

use crate::driver::{ChipBackend, LineDriver};
use crate::line::POLL_SLICE;
use crate::signal::{Direction, Edge, EdgeEvent, EdgeKind, Level, Pull};
use crate::{LineError, Result};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default sysfs GPIO class directory
pub const DEFAULT_ROOT: &str = "/sys/class/gpio";

/// A `gpiochipN` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysfsBank {
    pub label: String,
    pub base: u32,
    pub ngpio: u32,
}

#[derive(Debug, Default)]
struct ExportState {
    handles: usize,
    exported_by_us: bool,
}

type ExportTable = Arc<Mutex<HashMap<u32, ExportState>>>;

/// Chip backend over the sysfs GPIO class
pub struct SysfsChip {
    root: PathBuf,
    label: String,
    banks: Vec<SysfsBank>,
    exports: ExportTable,
}

impl SysfsChip {
    /// Probe the banks under `root`
    pub fn probe(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(LineError::NotFound(root.display().to_string()));
        }

        let mut banks = Vec::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with("gpiochip") {
                continue;
            }

            let path = entry.path();
            let (Ok(base), Ok(ngpio)) = (
                read_number(&path.join("base")),
                read_number(&path.join("ngpio")),
            ) else {
                tracing::warn!("Skipping {}: missing base or ngpio", path.display());
                continue;
            };
            let label = fs::read_to_string(path.join("label"))
                .map(|s| s.trim().to_string())
                .unwrap_or(name);
            tracing::debug!("Found bank {} base={} ngpio={}", label, base, ngpio);
            banks.push(SysfsBank { label, base, ngpio });
        }

        if banks.is_empty() {
            return Err(LineError::NotFound(format!(
                "no gpiochip under {}",
                root.display()
            )));
        }
        banks.sort_by_key(|b| b.base);

        let label = banks
            .iter()
            .map(|b| b.label.as_str())
            .collect::<Vec<_>>()
            .join("+");
        tracing::info!("Probed sysfs GPIO at {}: {}", root.display(), label);

        Ok(Self {
            root: root.to_path_buf(),
            label,
            banks,
            exports: ExportTable::default(),
        })
    }

    pub fn banks(&self) -> &[SysfsBank] {
        &self.banks
    }

    /// Global line number of `GPIO<n>`
    pub fn line_number(name: &str) -> Option<u32> {
        let prefix = name.get(..4)?;
        if !prefix.eq_ignore_ascii_case("gpio") {
            return None;
        }
        name[4..].parse().ok()
    }

    fn export(&self, name: &str, number: u32) -> Result<bool> {
        let line_dir = self.root.join(format!("gpio{number}"));
        if line_dir.is_dir() {
            return Ok(false);
        }

        match fs::write(self.root.join("export"), number.to_string()) {
            Ok(()) => {}
            // Exported by someone else in the meantime
            Err(e) if e.raw_os_error() == Some(libc::EBUSY) => return Ok(false),
            Err(e) => return Err(LineError::io(name, e)),
        }

        if !line_dir.is_dir() {
            return Err(LineError::io(
                name,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} did not appear after export", line_dir.display()),
                ),
            ));
        }
        tracing::debug!("Exported {}", name);
        Ok(true)
    }
}

impl ChipBackend for SysfsChip {
    fn label(&self) -> &str {
        &self.label
    }

    fn line_names(&self) -> Vec<String> {
        self.banks
            .iter()
            .flat_map(|b| b.base..b.base + b.ngpio)
            .map(|n| format!("GPIO{n}"))
            .collect()
    }

    fn open_line(&self, name: &str) -> Result<Box<dyn LineDriver>> {
        let number = Self::line_number(name).ok_or_else(|| LineError::NotFound(name.to_string()))?;

        let mut exports = self.exports.lock().unwrap_or_else(|e| e.into_inner());
        let state = exports.entry(number).or_default();
        if state.handles == 0 {
            match self.export(name, number) {
                Ok(exported) => state.exported_by_us = exported,
                Err(e) => {
                    exports.remove(&number);
                    return Err(e);
                }
            }
        }
        state.handles += 1;

        Ok(Box::new(SysfsLine {
            name: name.to_string(),
            number,
            root: self.root.clone(),
            dir: self.root.join(format!("gpio{number}")),
            exports: Arc::clone(&self.exports),
            edge: Mutex::new(Edge::None),
            value: Mutex::new(None),
            seqno: AtomicU64::new(0),
            released: AtomicBool::new(false),
        }))
    }
}

fn read_number(path: &Path) -> std::io::Result<u32> {
    fs::read_to_string(path)?
        .trim()
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

fn parse_level(name: &str, raw: &str) -> Result<Level> {
    match raw.trim() {
        "0" => Ok(Level::Low),
        "1" => Ok(Level::High),
        other => Err(LineError::io(
            name,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unexpected value {other:?}"),
            ),
        )),
    }
}

/// Milliseconds for `poll(2)`, rounded up and clamped
fn poll_millis(timeout: Duration) -> u16 {
    let millis = timeout.as_micros().div_ceil(1000);
    millis.min(u128::from(u16::MAX)) as u16
}

/// One open handle on a sysfs line
struct SysfsLine {
    name: String,
    number: u32,
    root: PathBuf,
    dir: PathBuf,
    exports: ExportTable,
    edge: Mutex<Edge>,
    /// `value` opened for polling while an edge filter is armed
    value: Mutex<Option<File>>,
    seqno: AtomicU64,
    released: AtomicBool,
}

impl SysfsLine {
    fn write_attr(&self, attr: &str, value: &str) -> Result<()> {
        fs::write(self.dir.join(attr), value).map_err(|e| LineError::io(&self.name, e))
    }

    fn read_attr(&self, attr: &str) -> Result<String> {
        fs::read_to_string(self.dir.join(attr))
            .map(|s| s.trim().to_string())
            .map_err(|e| LineError::io(&self.name, e))
    }

    fn disarm(&self) {
        *self.edge.lock().unwrap_or_else(|e| e.into_inner()) = Edge::None;
        *self.value.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl LineDriver for SysfsLine {
    fn set_input(&self, pull: Pull, edge: Edge) -> Result<()> {
        if pull != Pull::None {
            return Err(LineError::config(
                &self.name,
                format!("{pull} is not supported by the sysfs interface"),
            ));
        }

        self.disarm();
        self.write_attr("direction", "in")?;
        self.write_attr("edge", edge.sysfs_name())?;

        // A fresh descriptor read once has no pending notification
        let mut file = File::open(self.dir.join("value")).map_err(|e| LineError::io(&self.name, e))?;
        let mut discard = String::new();
        file.read_to_string(&mut discard)
            .map_err(|e| LineError::io(&self.name, e))?;

        *self.edge.lock().unwrap_or_else(|e| e.into_inner()) = edge;
        *self.value.lock().unwrap_or_else(|e| e.into_inner()) = Some(file);
        Ok(())
    }

    fn set_output(&self, level: Level) -> Result<()> {
        self.disarm();
        let direction = match level {
            Level::Low => "low",
            Level::High => "high",
        };
        self.write_attr("direction", direction)
    }

    fn read(&self) -> Result<Level> {
        parse_level(&self.name, &self.read_attr("value")?)
    }

    fn pull(&self) -> Result<Pull> {
        Ok(Pull::None)
    }

    fn direction(&self) -> Result<Direction> {
        match self.read_attr("direction")?.as_str() {
            "in" => Ok(Direction::Input),
            "out" | "high" | "low" => Ok(Direction::Output),
            other => Err(LineError::io(
                &self.name,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("unexpected direction {other:?}"),
                ),
            )),
        }
    }

    fn next_edge(&self, timeout: Duration) -> Result<Option<EdgeEvent>> {
        let edge = *self.edge.lock().unwrap_or_else(|e| e.into_inner());
        let mut value = self.value.lock().unwrap_or_else(|e| e.into_inner());
        if edge == Edge::None || value.is_none() {
            drop(value);
            std::thread::sleep(timeout.min(POLL_SLICE));
            return Ok(None);
        }
        let Some(file) = value.as_mut() else {
            return Ok(None);
        };

        let revents = {
            let mut fds = [PollFd::new(
                file.as_fd(),
                PollFlags::POLLPRI | PollFlags::POLLERR,
            )];
            match poll(&mut fds, PollTimeout::from(poll_millis(timeout))) {
                Ok(0) | Err(Errno::EINTR) => return Ok(None),
                Ok(_) => fds[0].revents().unwrap_or(PollFlags::empty()),
                Err(errno) => return Err(LineError::io(&self.name, errno.into())),
            }
        };
        if !revents.intersects(PollFlags::POLLPRI | PollFlags::POLLERR) {
            return Ok(None);
        }

        let mut raw = String::new();
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_to_string(&mut raw))
            .map_err(|e| LineError::io(&self.name, e))?;
        let level = parse_level(&self.name, &raw)?;

        let kind = match edge {
            Edge::Rising => EdgeKind::Rising,
            Edge::Falling => EdgeKind::Falling,
            _ => EdgeKind::towards(level),
        };
        Ok(Some(EdgeEvent {
            line: self.name.clone(),
            kind,
            timestamp: Instant::now(),
            seqno: self.seqno.fetch_add(1, Ordering::SeqCst) + 1,
        }))
    }

    fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.disarm();

        let mut exports = self.exports.lock().unwrap_or_else(|e| e.into_inner());
        let Some(state) = exports.get_mut(&self.number) else {
            return Ok(());
        };
        state.handles = state.handles.saturating_sub(1);
        if state.handles > 0 {
            return Ok(());
        }

        let exported_by_us = state.exported_by_us;
        exports.remove(&self.number);
        if exported_by_us {
            fs::write(self.root.join("unexport"), self.number.to_string())
                .map_err(|e| LineError::io(&self.name, e))?;
            tracing::debug!("Unexported {}", self.name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// A fake sysfs tree with two banks and GPIO2 already exported
    fn fake_sysfs() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        for (chip, base, ngpio, label) in [("gpiochip0", 0, 4, "pinctrl"), ("gpiochip100", 100, 2, "expander")] {
            fs::create_dir_all(root.join(chip)).unwrap();
            fs::write(root.join(chip).join("base"), format!("{base}\n")).unwrap();
            fs::write(root.join(chip).join("ngpio"), format!("{ngpio}\n")).unwrap();
            fs::write(root.join(chip).join("label"), format!("{label}\n")).unwrap();
        }
        fs::create_dir_all(root.join("gpio2")).unwrap();
        fs::write(root.join("gpio2/direction"), "in\n").unwrap();
        fs::write(root.join("gpio2/value"), "0\n").unwrap();
        fs::write(root.join("gpio2/edge"), "none\n").unwrap();
        dir
    }

    #[test]
    fn test_line_number() {
        assert_eq!(SysfsChip::line_number("GPIO13"), Some(13));
        assert_eq!(SysfsChip::line_number("gpio7"), Some(7));
        assert_eq!(SysfsChip::line_number("GPIO"), None);
        assert_eq!(SysfsChip::line_number("PA7"), None);
    }

    #[test]
    fn test_poll_millis_rounds_up() {
        assert_eq!(poll_millis(Duration::ZERO), 0);
        assert_eq!(poll_millis(Duration::from_micros(1)), 1);
        assert_eq!(poll_millis(Duration::from_millis(50)), 50);
        assert_eq!(poll_millis(Duration::from_secs(3600)), u16::MAX);
    }

    #[test]
    fn test_probe_banks() {
        let dir = fake_sysfs();
        let chip = SysfsChip::probe(dir.path()).unwrap();
        assert_eq!(chip.banks().len(), 2);
        assert_eq!(chip.label(), "pinctrl+expander");
        assert_eq!(
            chip.line_names(),
            vec!["GPIO0", "GPIO1", "GPIO2", "GPIO3", "GPIO100", "GPIO101"]
        );
    }

    #[test]
    fn test_probe_missing_root() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            SysfsChip::probe(&dir.path().join("nope")),
            Err(LineError::NotFound(_))
        ));
        assert!(matches!(
            SysfsChip::probe(dir.path()),
            Err(LineError::NotFound(_))
        ));
    }

    #[test]
    fn test_output_and_read() {
        let dir = fake_sysfs();
        let chip = SysfsChip::probe(dir.path()).unwrap();
        let line = chip.open_line("GPIO2").unwrap();

        assert_eq!(line.direction().unwrap(), Direction::Input);
        line.set_output(Level::High).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("gpio2/direction")).unwrap(),
            "high"
        );
        assert_eq!(line.direction().unwrap(), Direction::Output);

        fs::write(dir.path().join("gpio2/value"), "1\n").unwrap();
        assert_eq!(line.read().unwrap(), Level::High);
    }

    #[test]
    fn test_input_configuration() {
        let dir = fake_sysfs();
        let chip = SysfsChip::probe(dir.path()).unwrap();
        let line = chip.open_line("GPIO2").unwrap();

        assert!(matches!(
            line.set_input(Pull::Up, Edge::Both),
            Err(LineError::Config { .. })
        ));
        line.set_input(Pull::None, Edge::Both).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("gpio2/edge")).unwrap(), "both");
        assert_eq!(fs::read_to_string(dir.path().join("gpio2/direction")).unwrap(), "in");
        assert_eq!(line.pull().unwrap(), Pull::None);
    }

    #[test]
    fn test_wait_without_interrupt_times_out() {
        let dir = fake_sysfs();
        let chip = SysfsChip::probe(dir.path()).unwrap();
        let line = chip.open_line("GPIO2").unwrap();
        line.set_input(Pull::None, Edge::Both).unwrap();

        let start = Instant::now();
        assert!(line.next_edge(Duration::from_millis(30)).unwrap().is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_malformed_value() {
        let dir = fake_sysfs();
        let chip = SysfsChip::probe(dir.path()).unwrap();
        let line = chip.open_line("GPIO2").unwrap();
        fs::write(dir.path().join("gpio2/value"), "x\n").unwrap();
        assert!(matches!(line.read(), Err(LineError::LineIo { .. })));
    }

    #[test]
    fn test_failed_export_is_rolled_back() {
        let dir = fake_sysfs();
        let chip = SysfsChip::probe(dir.path()).unwrap();
        // Writing the export file succeeds but no gpio3 directory appears
        assert!(matches!(
            chip.open_line("GPIO3"),
            Err(LineError::LineIo { .. })
        ));
        assert!(chip.exports.lock().unwrap().is_empty());
        assert!(matches!(chip.open_line("PA7"), Err(LineError::NotFound(_))));
    }

    #[test]
    fn test_release_keeps_foreign_export() {
        let dir = fake_sysfs();
        let chip = SysfsChip::probe(dir.path()).unwrap();
        let a = chip.open_line("GPIO2").unwrap();
        let b = chip.open_line("GPIO2").unwrap();
        a.release().unwrap();
        b.release().unwrap();
        b.release().unwrap();
        assert!(!dir.path().join("unexport").exists());
        assert!(chip.exports.lock().unwrap().is_empty());
    }
}
