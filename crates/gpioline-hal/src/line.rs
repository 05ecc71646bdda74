//! Single GPIO line
//!
//! A [`Line`] wraps one backend handle and enforces the line contract:
//!
//! - `read()` on an output line switches it to input first, keeping the
//!   retained pull and disarming edge detection.
//! - `out()` on an input line switches it to output first.
//! - `wait_for_edge()` blocks until a matching edge, the timeout or a halt.
//! - `halt()` is terminal: the in-flight wait returns `Cancelled` and every
//!   later wait returns `Cancelled` immediately.
//!
//! All operations take `&self`, so a line can be shared with the thread that
//! halts it.

use crate::cancel::{CancelToken, EdgeSignal};
use crate::chip::Lease;
use crate::driver::LineDriver;
use crate::signal::{Direction, Edge, EdgeEvent, Level, Pull, WaitOutcome};
use crate::{LineError, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Upper bound on one blocking driver call when the driver cannot notify
pub const POLL_SLICE: Duration = Duration::from_millis(50);

/// Timeout of each wait in the drain pattern
pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(10);

/// Observable state of a line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineSnapshot {
    pub name: String,
    pub direction: Direction,
    pub level: Level,
    pub pull: Pull,
    pub edge: Edge,
    pub halted: bool,
    pub closed: bool,
}

#[derive(Debug)]
struct LineState {
    direction: Direction,
    level: Level,
    pull: Pull,
    edge: Edge,
    /// Set once direction was commanded through this handle
    configured: bool,
    closed: bool,
}

/// Clears the in-flight wait flag on every exit path
pub(crate) struct WaitGuard<'a>(pub(crate) &'a AtomicBool);

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

pub(crate) fn remaining_until(deadline: Option<Instant>) -> Duration {
    match deadline {
        Some(deadline) => deadline.saturating_duration_since(Instant::now()),
        None => Duration::MAX,
    }
}

/// An open GPIO line
pub struct Line {
    name: String,
    driver: Box<dyn LineDriver>,
    state: Mutex<LineState>,
    halt: CancelToken,
    signal: EdgeSignal,
    notifying: bool,
    waiting: AtomicBool,
    lease: Mutex<Option<Lease>>,
}

impl Line {
    pub(crate) fn open(
        name: &str,
        driver: Box<dyn LineDriver>,
        default_pull: Pull,
        lease: Option<Lease>,
    ) -> Result<Self> {
        let probed = (|| {
            let direction = driver.direction()?;
            let pull = match driver.pull()? {
                Pull::None => default_pull,
                pull => pull,
            };
            Ok::<_, LineError>((direction, pull, driver.read()?))
        })();
        let (direction, pull, level) = match probed {
            Ok(probed) => probed,
            Err(e) => {
                if let Err(release) = driver.release() {
                    tracing::warn!("Failed to release {} after open failed: {}", name, release);
                }
                return Err(e);
            }
        };

        let signal = EdgeSignal::new();
        let notifying = driver.watch(&signal);
        if !notifying {
            tracing::debug!("{} cannot notify, polling every {:?}", name, POLL_SLICE);
        }

        Ok(Self {
            name: name.to_string(),
            driver,
            state: Mutex::new(LineState {
                direction,
                level,
                pull,
                edge: Edge::None,
                configured: false,
                closed: false,
            }),
            halt: CancelToken::new(),
            signal,
            notifying,
            waiting: AtomicBool::new(false),
            lease: Mutex::new(lease),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock_state(&self) -> MutexGuard<'_, LineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_open(&self, state: &LineState) -> Result<()> {
        if state.closed {
            return Err(LineError::Closed(self.name.clone()));
        }
        Ok(())
    }

    /// Current direction as last commanded through this handle
    pub fn direction(&self) -> Direction {
        self.lock_state().direction
    }

    /// Edge filter currently armed
    pub fn edge(&self) -> Edge {
        self.lock_state().edge
    }

    pub fn is_halted(&self) -> bool {
        self.halt.is_cancelled()
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    pub fn snapshot(&self) -> LineSnapshot {
        let state = self.lock_state();
        LineSnapshot {
            name: self.name.clone(),
            direction: state.direction,
            level: state.level,
            pull: state.pull,
            edge: state.edge,
            halted: self.halt.is_cancelled(),
            closed: state.closed,
        }
    }

    /// Switch to input with `pull` and arm `edge`.
    ///
    /// Edges that occurred before this call are discarded. Refused with
    /// [`LineError::WaitInProgress`] while a wait is blocked on this line;
    /// halt the line first.
    pub fn configure_input(&self, pull: Pull, edge: Edge) -> Result<()> {
        let mut state = self.lock_state();
        self.ensure_open(&state)?;
        if self.waiting.load(Ordering::SeqCst) {
            return Err(LineError::WaitInProgress(self.name.clone()));
        }

        self.driver.set_input(pull, edge)?;
        state.direction = Direction::Input;
        state.pull = pull;
        state.edge = edge;
        state.configured = true;
        tracing::debug!("{} configured as input, pull={}, edge={}", self.name, pull, edge);
        Ok(())
    }

    /// Drive `level`, switching the line to output first if needed
    pub fn out(&self, level: Level) -> Result<()> {
        let mut state = self.lock_state();
        self.ensure_open(&state)?;

        if state.direction == Direction::Input {
            tracing::debug!("{} auto-switching Input -> Output", self.name);
        }
        self.driver.set_output(level)?;
        state.direction = Direction::Output;
        state.level = level;
        state.edge = Edge::None;
        state.configured = true;
        Ok(())
    }

    /// Sample the line, switching it to input first if needed.
    ///
    /// A line never configured through this handle counts as not being an
    /// input yet, so the first read applies the chip's default pull.
    pub fn read(&self) -> Result<Level> {
        let mut state = self.lock_state();
        self.ensure_open(&state)?;

        if state.direction == Direction::Output || !state.configured {
            tracing::debug!(
                "{} auto-switching {} -> Input, pull={}",
                self.name,
                state.direction,
                state.pull
            );
            self.driver.set_input(state.pull, Edge::None)?;
            state.direction = Direction::Input;
            state.edge = Edge::None;
            state.configured = true;
        }
        let level = self.driver.read()?;
        state.level = level;
        Ok(level)
    }

    /// Bias actually in effect on the line
    pub fn pull(&self) -> Result<Pull> {
        let state = self.lock_state();
        self.ensure_open(&state)?;
        self.driver.pull()
    }

    /// Block until a matching edge, `timeout`, or a halt.
    ///
    /// Queued edges are delivered oldest first. Never returns
    /// [`WaitOutcome::TimedOut`] before `timeout` has elapsed.
    pub fn wait_for_edge(&self, timeout: Duration) -> Result<WaitOutcome> {
        self.ensure_open(&self.lock_state())?;
        if self.halt.is_cancelled() {
            return Ok(WaitOutcome::Cancelled);
        }
        let _guard = self.begin_wait()?;

        let deadline = deadline_after(timeout);
        loop {
            let seen = self.signal.generation();
            if self.halt.is_cancelled() {
                tracing::debug!("Wait on {} cancelled", self.name);
                return Ok(WaitOutcome::Cancelled);
            }
            if let Some(event) = self.driver.next_edge(Duration::ZERO)? {
                return Ok(self.deliver(event));
            }

            let remaining = remaining_until(deadline);
            if remaining.is_zero() {
                return Ok(WaitOutcome::TimedOut);
            }

            if self.notifying {
                self.signal.wait_past(seen, remaining);
            } else if let Some(event) = self.driver.next_edge(remaining.min(POLL_SLICE))? {
                return Ok(self.deliver(event));
            }
        }
    }

    /// Mark a wait in flight on this line, for itself or for its line set
    pub(crate) fn begin_wait(&self) -> Result<WaitGuard<'_>> {
        if self.waiting.swap(true, Ordering::SeqCst) {
            return Err(LineError::WaitInProgress(self.name.clone()));
        }
        Ok(WaitGuard(&self.waiting))
    }

    #[cfg(test)]
    pub(crate) fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::SeqCst)
    }

    fn deliver(&self, event: EdgeEvent) -> WaitOutcome {
        tracing::debug!("{:?} edge on {} (#{})", event.kind, self.name, event.seqno);
        WaitOutcome::EdgeDetected(event)
    }

    /// Drain queued edges: wait with a short timeout until nothing is left.
    /// Returns the number of edges drained.
    pub fn clear_edges(&self) -> Result<usize> {
        let mut drained = 0;
        loop {
            match self.wait_for_edge(DRAIN_TIMEOUT)? {
                WaitOutcome::EdgeDetected(_) => drained += 1,
                WaitOutcome::TimedOut | WaitOutcome::Cancelled => return Ok(drained),
            }
        }
    }

    /// Permanently disable waits on this line, waking any blocked waiter
    pub fn halt(&self) -> Result<()> {
        if !self.halt.cancel() {
            return Err(LineError::AlreadyHalted(self.name.clone()));
        }
        self.signal.raise();
        tracing::debug!("Halted {}", self.name);
        Ok(())
    }

    /// Release the line. Idempotent; also performed on drop.
    pub fn close(&self) -> Result<()> {
        let mut state = self.lock_state();
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        self.halt.cancel();
        self.signal.raise();
        self.driver.unwatch(&self.signal);
        let result = self.driver.release();
        self.lease.lock().unwrap_or_else(|e| e.into_inner()).take();
        tracing::debug!("Closed {}", self.name);
        result
    }

    pub(crate) fn watch(&self, signal: &EdgeSignal) -> bool {
        self.driver.watch(signal)
    }

    pub(crate) fn unwatch(&self, signal: &EdgeSignal) {
        self.driver.unwatch(signal);
    }

    /// Pop a queued edge without blocking
    pub(crate) fn poll_edge(&self, timeout: Duration) -> Result<Option<EdgeEvent>> {
        self.ensure_open(&self.lock_state())?;
        self.driver.next_edge(timeout)
    }

    /// Return the line to a previously captured state
    pub(crate) fn restore(&self, snapshot: &LineSnapshot) -> Result<()> {
        match snapshot.direction {
            Direction::Output => self.out(snapshot.level),
            Direction::Input => self.configure_input(snapshot.pull, snapshot.edge),
        }
    }
}

impl Drop for Line {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close {}: {}", self.name, e);
        }
    }
}

impl std::fmt::Debug for Line {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Line")
            .field("name", &self.name)
            .field("notifying", &self.notifying)
            .field("halted", &self.halt.is_cancelled())
            .finish()
    }
}
