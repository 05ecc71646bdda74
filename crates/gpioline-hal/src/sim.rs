//! Simulated chip for testing without real hardware
//!
//! Lines joined by a jumper share a *net*. The level of a net is resolved as:
//!
//! 1. an external stimulus applied through [`SimControl::drive`], else
//! 2. the most recent output driver on the net, else
//! 3. a pull-up (`High`) or pull-down (`Low`) on any member, else
//! 4. the previous level (a floating net keeps its charge).
//!
//! Every change of a net's level queues an edge on each input member whose
//! filter matches it.
//!
//! # Usage
//!
//! ```no_run
//! use gpioline_hal::sim::{SimChip, SimProfile};
//! use gpioline_hal::{Chip, ChipConfig, Level};
//!
//! let sim = SimChip::new(SimProfile::raspberry_pi());
//! let control = sim.control();
//! let chip = Chip::new(sim, ChipConfig::default());
//!
//! control.drive("GPIO13", Level::High);
//! assert_eq!(chip.by_name("GPIO5").unwrap().read().unwrap(), Level::High);
//! ```

use crate::cancel::EdgeSignal;
use crate::driver::{ChipBackend, LineDriver};
use crate::line::{deadline_after, remaining_until};
use crate::signal::{Direction, Edge, EdgeEvent, EdgeKind, Level, Pull};
use crate::{LineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Edges kept per line before the oldest is dropped
pub const EDGE_QUEUE_CAPACITY: usize = 64;

/// Environment variable naming a TOML profile for [`SimProfile::from_env`]
pub const PROFILE_ENV: &str = "GPIOLINE_SIM_PROFILE";

/// Layout of a simulated board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimProfile {
    pub label: String,
    pub lines: Vec<String>,
    /// Pairs of lines wired together
    #[serde(default)]
    pub jumpers: Vec<[String; 2]>,
}

impl SimProfile {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            lines: Vec::new(),
            jumpers: Vec::new(),
        }
    }

    pub fn with_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lines.extend(lines.into_iter().map(Into::into));
        self
    }

    pub fn with_jumper(mut self, a: &str, b: &str) -> Self {
        self.jumpers.push([a.to_string(), b.to_string()]);
        self
    }

    /// A 40-pin header board: GPIO0..GPIO27, GPIO5 jumpered to GPIO13
    pub fn raspberry_pi() -> Self {
        Self::new("sim-raspberry-pi")
            .with_lines((0..28).map(|n| format!("GPIO{n}")))
            .with_jumper("GPIO5", "GPIO13")
    }

    /// Load a profile from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| LineError::config(&path.display().to_string(), e.to_string()))
    }

    /// Profile named by `GPIOLINE_SIM_PROFILE`, or [`SimProfile::raspberry_pi`]
    pub fn from_env() -> Result<Self> {
        match std::env::var(PROFILE_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(Path::new(&path)),
            _ => Ok(Self::raspberry_pi()),
        }
    }
}

/// Failure injected into a simulated line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    /// `set_input` and `set_output` fail with a configuration error
    RejectConfig,
    /// `read` and `set_output` fail with an IO error
    Io,
}

#[derive(Debug)]
struct Pin {
    net: usize,
    direction: Direction,
    driven: Level,
    driven_seq: u64,
    pull: Pull,
    edge: Edge,
    queue: VecDeque<EdgeEvent>,
    seqno: u64,
    fault: Option<SimFault>,
    handles: usize,
    watchers: Vec<EdgeSignal>,
}

impl Pin {
    fn new(net: usize) -> Self {
        Self {
            net,
            direction: Direction::Input,
            driven: Level::Low,
            driven_seq: 0,
            pull: Pull::None,
            edge: Edge::None,
            queue: VecDeque::new(),
            seqno: 0,
            fault: None,
            handles: 0,
            watchers: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Net {
    level: Level,
    external: Option<Level>,
    members: Vec<String>,
}

#[derive(Debug, Default)]
struct Bus {
    pins: HashMap<String, Pin>,
    nets: Vec<Net>,
    drive_seq: u64,
}

impl Bus {
    fn from_profile(profile: &SimProfile) -> Self {
        let mut bus = Bus::default();
        for name in &profile.lines {
            if bus.pins.contains_key(name) {
                tracing::warn!("[SIM] Duplicate line {} ignored", name);
                continue;
            }
            bus.nets.push(Net {
                level: Level::Low,
                external: None,
                members: vec![name.clone()],
            });
            bus.pins.insert(name.clone(), Pin::new(bus.nets.len() - 1));
        }

        for [a, b] in &profile.jumpers {
            let (Some(net_a), Some(net_b)) = (
                bus.pins.get(a).map(|p| p.net),
                bus.pins.get(b).map(|p| p.net),
            ) else {
                tracing::warn!("[SIM] Jumper {}-{} references an unknown line", a, b);
                continue;
            };
            if net_a == net_b {
                continue;
            }
            let moved = std::mem::take(&mut bus.nets[net_b].members);
            for member in &moved {
                if let Some(pin) = bus.pins.get_mut(member) {
                    pin.net = net_a;
                }
            }
            bus.nets[net_a].members.extend(moved);
        }
        bus
    }

    fn pin(&self, name: &str) -> Result<&Pin> {
        self.pins
            .get(name)
            .ok_or_else(|| LineError::NotFound(name.to_string()))
    }

    fn pin_mut(&mut self, name: &str) -> Result<&mut Pin> {
        self.pins
            .get_mut(name)
            .ok_or_else(|| LineError::NotFound(name.to_string()))
    }

    fn resolve(&self, net: usize) -> Level {
        let net = &self.nets[net];
        if let Some(level) = net.external {
            return level;
        }

        let pins: Vec<&Pin> = net.members.iter().filter_map(|m| self.pins.get(m)).collect();
        if let Some(driver) = pins
            .iter()
            .filter(|p| p.direction == Direction::Output)
            .max_by_key(|p| p.driven_seq)
        {
            return driver.driven;
        }
        if pins.iter().any(|p| p.pull == Pull::Up) {
            return Level::High;
        }
        if pins.iter().any(|p| p.pull == Pull::Down) {
            return Level::Low;
        }
        net.level
    }

    /// Recompute the level of `net`, queueing edges on a change.
    /// Returns `true` if the level changed.
    fn settle(&mut self, net: usize) -> bool {
        let level = self.resolve(net);
        if level == self.nets[net].level {
            return false;
        }
        self.nets[net].level = level;

        let kind = EdgeKind::towards(level);
        let timestamp = Instant::now();
        let members = self.nets[net].members.clone();
        for member in members {
            let Some(pin) = self.pins.get_mut(&member) else {
                continue;
            };
            if pin.direction != Direction::Input || !pin.edge.matches(kind) {
                continue;
            }
            if pin.queue.len() >= EDGE_QUEUE_CAPACITY {
                pin.queue.pop_front();
                tracing::warn!("[SIM] Edge queue of {} full, dropped oldest edge", member);
            }
            pin.seqno += 1;
            pin.queue.push_back(EdgeEvent {
                line: member.clone(),
                kind,
                timestamp,
                seqno: pin.seqno,
            });
            for watcher in &pin.watchers {
                watcher.raise();
            }
        }
        tracing::debug!("[SIM] Net {} settled {:?}", net, level);
        true
    }
}

#[derive(Debug)]
struct SimShared {
    bus: Mutex<Bus>,
    changed: Condvar,
}

impl SimShared {
    fn lock(&self) -> MutexGuard<'_, Bus> {
        self.bus.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Simulated chip backend
pub struct SimChip {
    label: String,
    names: Vec<String>,
    shared: Arc<SimShared>,
}

impl SimChip {
    pub fn new(profile: SimProfile) -> Self {
        let bus = Bus::from_profile(&profile);
        let mut names = Vec::new();
        for name in profile.lines {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        tracing::debug!("[SIM] Chip {} with {} line(s)", profile.label, names.len());

        Self {
            label: profile.label,
            names,
            shared: Arc::new(SimShared {
                bus: Mutex::new(bus),
                changed: Condvar::new(),
            }),
        }
    }

    /// Create from `GPIOLINE_SIM_PROFILE` or the default board
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(SimProfile::from_env()?))
    }

    /// Test hooks sharing this chip's electrical state
    pub fn control(&self) -> SimControl {
        SimControl {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl ChipBackend for SimChip {
    fn label(&self) -> &str {
        &self.label
    }

    fn line_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn open_line(&self, name: &str) -> Result<Box<dyn LineDriver>> {
        self.shared.lock().pin_mut(name)?.handles += 1;
        Ok(Box::new(SimLine {
            name: name.to_string(),
            shared: Arc::clone(&self.shared),
            released: AtomicBool::new(false),
        }))
    }
}

/// One open handle on a simulated line
struct SimLine {
    name: String,
    shared: Arc<SimShared>,
    released: AtomicBool,
}

impl SimLine {
    fn injected_io_error(&self) -> LineError {
        LineError::io(&self.name, std::io::Error::other("injected fault"))
    }
}

impl LineDriver for SimLine {
    fn set_input(&self, pull: Pull, edge: Edge) -> Result<()> {
        let mut bus = self.shared.lock();
        let pin = bus.pin_mut(&self.name)?;
        if pin.fault == Some(SimFault::RejectConfig) {
            return Err(LineError::config(&self.name, "injected configuration fault"));
        }
        pin.direction = Direction::Input;
        pin.pull = pull;
        pin.edge = edge;
        let net = pin.net;

        bus.settle(net);
        // The filter is armed once the line has settled
        bus.pin_mut(&self.name)?.queue.clear();
        self.shared.changed.notify_all();
        Ok(())
    }

    fn set_output(&self, level: Level) -> Result<()> {
        let mut bus = self.shared.lock();
        bus.drive_seq += 1;
        let seq = bus.drive_seq;
        let pin = bus.pin_mut(&self.name)?;
        match pin.fault {
            Some(SimFault::RejectConfig) => {
                return Err(LineError::config(&self.name, "injected configuration fault"));
            }
            Some(SimFault::Io) => return Err(self.injected_io_error()),
            None => {}
        }
        pin.direction = Direction::Output;
        pin.driven = level;
        pin.driven_seq = seq;
        pin.edge = Edge::None;
        pin.queue.clear();
        let net = pin.net;

        if bus.settle(net) {
            self.shared.changed.notify_all();
        }
        Ok(())
    }

    fn read(&self) -> Result<Level> {
        let bus = self.shared.lock();
        let pin = bus.pin(&self.name)?;
        if pin.fault == Some(SimFault::Io) {
            return Err(self.injected_io_error());
        }
        Ok(bus.nets[pin.net].level)
    }

    fn pull(&self) -> Result<Pull> {
        Ok(self.shared.lock().pin(&self.name)?.pull)
    }

    fn direction(&self) -> Result<Direction> {
        Ok(self.shared.lock().pin(&self.name)?.direction)
    }

    fn next_edge(&self, timeout: Duration) -> Result<Option<EdgeEvent>> {
        let deadline = deadline_after(timeout);
        let mut bus = self.shared.lock();
        loop {
            if let Some(event) = bus.pin_mut(&self.name)?.queue.pop_front() {
                return Ok(Some(event));
            }
            let remaining = remaining_until(deadline);
            if remaining.is_zero() {
                return Ok(None);
            }
            bus = match deadline {
                Some(_) => {
                    self.shared
                        .changed
                        .wait_timeout(bus, remaining)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
                None => self
                    .shared
                    .changed
                    .wait(bus)
                    .unwrap_or_else(|e| e.into_inner()),
            };
        }
    }

    fn watch(&self, signal: &EdgeSignal) -> bool {
        let mut bus = self.shared.lock();
        match bus.pin_mut(&self.name) {
            Ok(pin) => {
                pin.watchers.push(signal.clone());
                true
            }
            Err(_) => false,
        }
    }

    fn unwatch(&self, signal: &EdgeSignal) {
        let mut bus = self.shared.lock();
        if let Ok(pin) = bus.pin_mut(&self.name) {
            pin.watchers.retain(|w| !w.same_as(signal));
        }
    }

    fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut bus = self.shared.lock();
        let pin = bus.pin_mut(&self.name)?;
        pin.handles = pin.handles.saturating_sub(1);
        if pin.handles == 0 {
            pin.edge = Edge::None;
            pin.queue.clear();
            pin.watchers.clear();
        }
        tracing::debug!("[SIM] Released {}", self.name);
        Ok(())
    }
}

/// Test hooks for a [`SimChip`]
#[derive(Clone)]
pub struct SimControl {
    shared: Arc<SimShared>,
}

impl SimControl {
    /// Apply an external stimulus to the net of `name`
    pub fn drive(&self, name: &str, level: Level) {
        self.set_external(name, Some(level));
    }

    /// Remove the external stimulus from the net of `name`
    pub fn release(&self, name: &str) {
        self.set_external(name, None);
    }

    fn set_external(&self, name: &str, level: Option<Level>) {
        let mut bus = self.shared.lock();
        let Some(net) = bus.pins.get(name).map(|p| p.net) else {
            tracing::warn!("[SIM] No line named {}", name);
            return;
        };
        bus.nets[net].external = level;
        if bus.settle(net) {
            self.shared.changed.notify_all();
        }
    }

    /// Electrical level of the net `name` belongs to
    pub fn level(&self, name: &str) -> Option<Level> {
        let bus = self.shared.lock();
        bus.pins.get(name).map(|p| bus.nets[p.net].level)
    }

    pub fn direction(&self, name: &str) -> Option<Direction> {
        self.shared.lock().pins.get(name).map(|p| p.direction)
    }

    /// Number of undelivered edges on `name`
    pub fn queued_edges(&self, name: &str) -> usize {
        self.shared
            .lock()
            .pins
            .get(name)
            .map(|p| p.queue.len())
            .unwrap_or(0)
    }

    /// Number of open handles on `name`
    pub fn handles(&self, name: &str) -> usize {
        self.shared
            .lock()
            .pins
            .get(name)
            .map(|p| p.handles)
            .unwrap_or(0)
    }

    pub fn inject_fault(&self, name: &str, fault: SimFault) {
        if let Some(pin) = self.shared.lock().pins.get_mut(name) {
            pin.fault = Some(fault);
        }
    }

    pub fn clear_fault(&self, name: &str) {
        if let Some(pin) = self.shared.lock().pins.get_mut(name) {
            pin.fault = None;
        }
    }
}
