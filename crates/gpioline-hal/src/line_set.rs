//! Coordinated operations over several lines
//!
//! A [`LineSet`] owns its member lines. Creation is all-or-nothing, as is
//! reconfiguration. Waits cover every member at once and report which member
//! the edge came from.

use crate::cancel::{CancelToken, EdgeSignal};
use crate::chip::Chip;
use crate::line::{Line, LineSnapshot, POLL_SLICE, WaitGuard, deadline_after, remaining_until};
use crate::signal::{Edge, EdgeEvent, Level, LineConfig, WaitOutcome};
use crate::{LineError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

const SET_NAME: &str = "line set";

/// An ordered group of open lines
pub struct LineSet {
    members: Vec<Line>,
    default: LineConfig,
    overrides: HashMap<String, LineConfig>,
    halt: CancelToken,
    signal: EdgeSignal,
    notifying: bool,
    waiting: AtomicBool,
    /// Member the next scan starts at
    next: AtomicUsize,
}

impl LineSet {
    /// Open every line in `names`, in order.
    ///
    /// If any open fails, the members opened so far are closed again and
    /// [`LineError::PartialFailure`] names the line that failed.
    pub fn create<I, S>(
        chip: &Chip,
        names: I,
        default: LineConfig,
        overrides: HashMap<String, LineConfig>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
        if names.is_empty() {
            return Err(LineError::config(SET_NAME, "no lines given"));
        }

        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(LineError::config(name, "listed twice"));
            }
        }
        if let Some(stray) = overrides.keys().find(|k| !seen.contains(k.as_str())) {
            return Err(LineError::config(stray, "override for a line outside the set"));
        }

        let mut members: Vec<Line> = Vec::with_capacity(names.len());
        for name in &names {
            match chip.by_name(name) {
                Ok(line) => members.push(line),
                Err(source) => {
                    let opened = members.len();
                    tracing::warn!(
                        "Opening {} failed, closing {} line(s) already opened",
                        name,
                        opened
                    );
                    for member in members.drain(..) {
                        if let Err(e) = member.close() {
                            tracing::warn!("Rollback close of {} failed: {}", member.name(), e);
                        }
                    }
                    return Err(LineError::PartialFailure {
                        failed: name.clone(),
                        opened,
                        source: Box::new(source),
                    });
                }
            }
        }

        let signal = EdgeSignal::new();
        let mut notifying = true;
        for member in &members {
            notifying &= member.watch(&signal);
        }
        tracing::debug!("Created line set {:?}, notifying={}", names, notifying);

        Ok(Self {
            members,
            default,
            overrides,
            halt: CancelToken::new(),
            signal,
            notifying,
            waiting: AtomicBool::new(false),
            next: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member names, in creation order
    pub fn names(&self) -> Vec<&str> {
        self.members.iter().map(Line::name).collect()
    }

    pub fn lines(&self) -> &[Line] {
        &self.members
    }

    pub fn line(&self, name: &str) -> Option<&Line> {
        self.members.iter().find(|l| l.name() == name)
    }

    pub fn default_config(&self) -> LineConfig {
        self.default
    }

    /// Configuration `configure_all(edge)` applies to `name`
    pub fn config_for(&self, name: &str, edge: Edge) -> LineConfig {
        self.overrides
            .get(name)
            .copied()
            .unwrap_or(LineConfig::new(self.default.pull, edge))
    }

    pub fn is_halted(&self) -> bool {
        self.halt.is_cancelled()
    }

    /// Configure every member as input: overridden members get their
    /// override, the rest the default pull with `edge`.
    ///
    /// Atomic: if a member fails, the members already reconfigured are put
    /// back the way they were.
    pub fn configure_all(&self, edge: Edge) -> Result<()> {
        if self.waiting.load(Ordering::SeqCst) {
            return Err(LineError::WaitInProgress(SET_NAME.to_string()));
        }

        let snapshots: Vec<LineSnapshot> = self.members.iter().map(Line::snapshot).collect();
        for (index, member) in self.members.iter().enumerate() {
            let config = self.config_for(member.name(), edge);
            if let Err(e) = member.configure_input(config.pull, config.edge) {
                tracing::warn!(
                    "Configuring {} failed, restoring {} member(s)",
                    member.name(),
                    index
                );
                for (done, snapshot) in self.members[..index].iter().zip(&snapshots).rev() {
                    if let Err(restore) = done.restore(snapshot) {
                        tracing::warn!("Failed to restore {}: {}", done.name(), restore);
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Read every member, in order
    pub fn read_all(&self) -> Result<Vec<Level>> {
        self.members.iter().map(Line::read).collect()
    }

    /// Drive every member; `levels` pairs up with the members in order
    pub fn out_all(&self, levels: &[Level]) -> Result<()> {
        if levels.len() != self.members.len() {
            return Err(LineError::config(
                SET_NAME,
                format!(
                    "{} level(s) given for {} line(s)",
                    levels.len(),
                    self.members.len()
                ),
            ));
        }
        for (member, level) in self.members.iter().zip(levels) {
            member.out(*level)?;
        }
        Ok(())
    }

    /// Block until any member sees a matching edge, `timeout`, or a halt
    pub fn wait_for_edge(&self, timeout: Duration) -> Result<WaitOutcome> {
        if self.halt.is_cancelled() {
            return Ok(WaitOutcome::Cancelled);
        }
        if self.waiting.swap(true, Ordering::SeqCst) {
            return Err(LineError::WaitInProgress(SET_NAME.to_string()));
        }
        let _guard = WaitGuard(&self.waiting);
        // Members count as waiting too, so they refuse reconfiguration
        let _members = self
            .members
            .iter()
            .map(Line::begin_wait)
            .collect::<Result<Vec<_>>>()?;

        let count = self.members.len() as u32;
        let slice = (POLL_SLICE / count.max(1)).max(Duration::from_millis(1));
        let deadline = deadline_after(timeout);
        loop {
            let seen = self.signal.generation();
            if self.halt.is_cancelled() {
                tracing::debug!("Line set wait cancelled");
                return Ok(WaitOutcome::Cancelled);
            }
            if let Some(event) = self.scan(Duration::ZERO)? {
                return Ok(WaitOutcome::EdgeDetected(event));
            }

            let remaining = remaining_until(deadline);
            if remaining.is_zero() {
                return Ok(WaitOutcome::TimedOut);
            }

            if self.notifying {
                self.signal.wait_past(seen, remaining);
            } else if let Some(event) = self.scan(remaining.min(slice))? {
                return Ok(WaitOutcome::EdgeDetected(event));
            }
        }
    }

    /// One round over the members, starting where the last delivery left off
    fn scan(&self, per_member: Duration) -> Result<Option<EdgeEvent>> {
        let count = self.members.len();
        let start = self.next.load(Ordering::SeqCst) % count;
        for offset in 0..count {
            let index = (start + offset) % count;
            let member = &self.members[index];
            if let Some(mut event) = member.poll_edge(per_member)? {
                self.next.store((index + 1) % count, Ordering::SeqCst);
                event.line = member.name().to_string();
                tracing::debug!("{:?} edge on set member {}", event.kind, event.line);
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    /// Drain queued edges of every member
    pub fn clear_edges(&self) -> Result<usize> {
        let mut drained = 0;
        loop {
            match self.wait_for_edge(crate::line::DRAIN_TIMEOUT)? {
                WaitOutcome::EdgeDetected(_) => drained += 1,
                WaitOutcome::TimedOut | WaitOutcome::Cancelled => return Ok(drained),
            }
        }
    }

    /// Halt the set and every member. Safe while a wait is in flight;
    /// halting twice is not an error.
    pub fn halt(&self) -> Result<()> {
        if self.halt.cancel() {
            tracing::debug!("Halting line set {:?}", self.names());
        }
        self.signal.raise();
        for member in &self.members {
            match member.halt() {
                Ok(()) | Err(LineError::AlreadyHalted(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Close every member. Every member is attempted; the first failure is
    /// returned.
    pub fn close(&self) -> Result<()> {
        self.halt.cancel();
        self.signal.raise();

        let mut first = None;
        for member in &self.members {
            member.unwatch(&self.signal);
            if let Err(e) = member.close() {
                tracing::warn!("Failed to close {}: {}", member.name(), e);
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for LineSet {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close line set: {}", e);
        }
    }
}

impl std::fmt::Debug for LineSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineSet")
            .field("members", &self.names())
            .field("notifying", &self.notifying)
            .field("halted", &self.halt.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::ChipConfig;
    use crate::signal::{EdgeKind, Pull};
    use crate::sim::{SimChip, SimControl, SimFault, SimProfile};
    use std::thread;
    use std::time::Instant;

    fn bench() -> (Chip, SimControl) {
        let sim = SimChip::new(
            SimProfile::new("bench")
                .with_lines(["GPIO5", "GPIO6", "GPIO13", "GPIO19"])
                .with_jumper("GPIO5", "GPIO13")
                .with_jumper("GPIO6", "GPIO19"),
        );
        let control = sim.control();
        (Chip::new(sim, ChipConfig::default()), control)
    }

    fn inputs(chip: &Chip) -> LineSet {
        LineSet::create(
            chip,
            ["GPIO13", "GPIO19"],
            LineConfig::new(Pull::Up, Edge::None),
            HashMap::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_creation_keeps_order() {
        let (chip, _) = bench();
        let set = LineSet::create(
            &chip,
            ["GPIO19", "GPIO5", "GPIO13"],
            LineConfig::default(),
            HashMap::new(),
        )
        .unwrap();
        assert_eq!(set.names(), ["GPIO19", "GPIO5", "GPIO13"]);
        assert_eq!(set.len(), 3);
        assert!(set.line("GPIO5").is_some());
        assert!(set.line("GPIO6").is_none());
    }

    #[test]
    fn test_partial_failure_rolls_back() {
        let (chip, _) = bench();
        let err = LineSet::create(
            &chip,
            ["GPIO5", "GPIO13", "GPIO99", "GPIO6"],
            LineConfig::default(),
            HashMap::new(),
        )
        .unwrap_err();

        match err {
            LineError::PartialFailure { failed, opened, source } => {
                assert_eq!(failed, "GPIO99");
                assert_eq!(opened, 2);
                assert!(matches!(*source, LineError::NotFound(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(chip.open_handles("GPIO5"), 0);
        assert_eq!(chip.open_handles("GPIO13"), 0);
    }

    #[test]
    fn test_invalid_membership() {
        let (chip, _) = bench();
        assert!(matches!(
            LineSet::create(&chip, ["GPIO5", "GPIO5"], LineConfig::default(), HashMap::new()),
            Err(LineError::Config { .. })
        ));

        let overrides = HashMap::from([("GPIO6".to_string(), LineConfig::default())]);
        assert!(matches!(
            LineSet::create(&chip, ["GPIO5"], LineConfig::default(), overrides),
            Err(LineError::Config { .. })
        ));

        let empty: [&str; 0] = [];
        assert!(LineSet::create(&chip, empty, LineConfig::default(), HashMap::new()).is_err());
        assert_eq!(chip.open_handles("GPIO5"), 0);
    }

    #[test]
    fn test_read_write_all() {
        let (chip, _) = bench();
        let outputs = LineSet::create(
            &chip,
            ["GPIO5", "GPIO6"],
            LineConfig::default(),
            HashMap::new(),
        )
        .unwrap();
        let inputs = inputs(&chip);

        outputs.out_all(&[Level::High, Level::Low]).unwrap();
        assert_eq!(inputs.read_all().unwrap(), [Level::High, Level::Low]);
        outputs.out_all(&[Level::Low, Level::High]).unwrap();
        assert_eq!(inputs.read_all().unwrap(), [Level::Low, Level::High]);

        assert!(matches!(
            outputs.out_all(&[Level::High]),
            Err(LineError::Config { .. })
        ));
    }

    #[test]
    fn test_configure_with_override() {
        let (chip, _) = bench();
        let overrides = HashMap::from([(
            "GPIO19".to_string(),
            LineConfig::new(Pull::Down, Edge::Falling),
        )]);
        let set = LineSet::create(
            &chip,
            ["GPIO13", "GPIO19"],
            LineConfig::new(Pull::Up, Edge::None),
            overrides,
        )
        .unwrap();

        set.configure_all(Edge::Rising).unwrap();
        let a = set.line("GPIO13").unwrap().snapshot();
        let b = set.line("GPIO19").unwrap().snapshot();
        assert_eq!((a.pull, a.edge), (Pull::Up, Edge::Rising));
        assert_eq!((b.pull, b.edge), (Pull::Down, Edge::Falling));
    }

    #[test]
    fn test_configure_all_is_atomic() {
        let (chip, control) = bench();
        let set = inputs(&chip);
        set.configure_all(Edge::Falling).unwrap();

        control.inject_fault("GPIO19", SimFault::RejectConfig);
        assert!(matches!(
            set.configure_all(Edge::Rising),
            Err(LineError::Config { .. })
        ));
        assert_eq!(set.line("GPIO13").unwrap().edge(), Edge::Falling);
        assert_eq!(set.line("GPIO19").unwrap().edge(), Edge::Falling);
    }

    #[test]
    fn test_wait_reports_member() {
        let (chip, control) = bench();
        let set = inputs(&chip);
        set.configure_all(Edge::Both).unwrap();
        set.clear_edges().unwrap();

        control.drive("GPIO19", Level::Low);
        let outcome = set.wait_for_edge(Duration::from_secs(1)).unwrap();
        let event = outcome.edge().expect("edge expected");
        assert_eq!(event.line, "GPIO19");
        assert_eq!(event.kind, EdgeKind::Falling);
    }

    #[test]
    fn test_round_robin_delivery() {
        let (chip, control) = bench();
        let set = inputs(&chip);
        set.configure_all(Edge::Both).unwrap();
        set.clear_edges().unwrap();

        control.drive("GPIO13", Level::Low);
        control.drive("GPIO13", Level::High);
        control.drive("GPIO19", Level::Low);

        let first = set.wait_for_edge(Duration::from_secs(1)).unwrap();
        let second = set.wait_for_edge(Duration::from_secs(1)).unwrap();
        assert_eq!(first.edge().unwrap().line, "GPIO13");
        assert_eq!(second.edge().unwrap().line, "GPIO19");
    }

    #[test]
    fn test_wait_timeout() {
        let (chip, _) = bench();
        let set = inputs(&chip);
        set.configure_all(Edge::Both).unwrap();
        set.clear_edges().unwrap();

        let start = Instant::now();
        assert_eq!(
            set.wait_for_edge(Duration::from_millis(200)).unwrap(),
            WaitOutcome::TimedOut
        );
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
    }

    #[test]
    fn test_halt_wakes_set_waiter() {
        let (chip, _) = bench();
        let set = inputs(&chip);
        set.configure_all(Edge::Both).unwrap();
        set.clear_edges().unwrap();

        let start = Instant::now();
        let outcome = thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(100));
                set.halt().unwrap();
            });
            set.wait_for_edge(Duration::from_secs(30)).unwrap()
        });
        assert_eq!(outcome, WaitOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(2));

        set.halt().unwrap();
        assert!(set.is_halted());
        assert!(set.lines().iter().all(Line::is_halted));
        assert_eq!(
            set.wait_for_edge(Duration::from_secs(30)).unwrap(),
            WaitOutcome::Cancelled
        );
    }

    #[test]
    fn test_members_refuse_reconfigure_during_set_wait() {
        let (chip, _) = bench();
        let set = inputs(&chip);
        set.configure_all(Edge::Both).unwrap();
        set.clear_edges().unwrap();

        thread::scope(|s| {
            let member = set.line("GPIO13").unwrap();
            let waiter = s.spawn(|| set.wait_for_edge(Duration::from_millis(500)));
            while !member.is_waiting() {
                thread::yield_now();
            }
            assert!(matches!(
                member.configure_input(Pull::Up, Edge::Rising),
                Err(LineError::WaitInProgress(_))
            ));
            assert!(matches!(
                member.wait_for_edge(Duration::from_millis(10)),
                Err(LineError::WaitInProgress(_))
            ));
            assert_eq!(waiter.join().unwrap().unwrap(), WaitOutcome::TimedOut);
        });

        set.line("GPIO13")
            .unwrap()
            .configure_input(Pull::Up, Edge::Rising)
            .unwrap();
        assert_eq!(set.line("GPIO13").unwrap().edge(), Edge::Rising);
    }

    #[test]
    fn test_set_wait_refused_while_member_waits() {
        let (chip, _) = bench();
        let set = inputs(&chip);
        set.configure_all(Edge::Both).unwrap();
        let busy = set.line("GPIO19").unwrap();

        thread::scope(|s| {
            let waiter = s.spawn(|| busy.wait_for_edge(Duration::from_secs(30)));
            while !busy.is_waiting() {
                thread::yield_now();
            }
            assert!(matches!(
                set.wait_for_edge(Duration::from_millis(10)),
                Err(LineError::WaitInProgress(_))
            ));
            // The claim on GPIO13 was handed back
            set.line("GPIO13")
                .unwrap()
                .configure_input(Pull::Up, Edge::Falling)
                .unwrap();
            busy.halt().unwrap();
            assert_eq!(waiter.join().unwrap().unwrap(), WaitOutcome::Cancelled);
        });
    }

    #[test]
    fn test_close_releases_every_member() {
        let (chip, control) = bench();
        let set = inputs(&chip);
        set.close().unwrap();
        set.close().unwrap();
        assert_eq!(chip.open_handles("GPIO13"), 0);
        assert_eq!(control.handles("GPIO19"), 0);
        drop(set);
        assert_eq!(chip.open_handles("GPIO19"), 0);
    }
}
