//! Backend traits
//!
//! A [`ChipBackend`] enumerates the lines a piece of hardware exposes and
//! hands out one [`LineDriver`] per opened handle. [`crate::Line`] layers the
//! auto-switch, wait and halt contract on top of a driver, so drivers only
//! deal with the electrical side.

use crate::Result;
use crate::cancel::EdgeSignal;
use crate::signal::{Direction, Edge, EdgeEvent, Level, Pull};
use std::time::Duration;

/// Driver for a single opened line
pub trait LineDriver: Send + Sync {
    /// Switch to input with the given bias and edge filter.
    ///
    /// Edges queued before the call must be discarded.
    fn set_input(&self, pull: Pull, edge: Edge) -> Result<()>;

    /// Switch to output and drive `level`.
    fn set_output(&self, level: Level) -> Result<()>;

    /// Sample the line.
    fn read(&self) -> Result<Level>;

    /// Bias currently in effect.
    fn pull(&self) -> Result<Pull>;

    /// Direction currently in effect.
    fn direction(&self) -> Result<Direction>;

    /// Pop the oldest queued edge, blocking at most `timeout` for one.
    fn next_edge(&self, timeout: Duration) -> Result<Option<EdgeEvent>>;

    /// Register `signal` to be raised whenever this line queues an edge.
    ///
    /// Drivers that cannot notify return `false`; callers then poll
    /// [`LineDriver::next_edge`] in bounded slices.
    fn watch(&self, signal: &EdgeSignal) -> bool {
        let _ = signal;
        false
    }

    /// Remove a signal registered with [`LineDriver::watch`].
    fn unwatch(&self, signal: &EdgeSignal) {
        let _ = signal;
    }

    /// Release the underlying resource.
    fn release(&self) -> Result<()>;
}

/// A chip: the set of lines one backend exposes
pub trait ChipBackend: Send + Sync {
    /// Human readable label
    fn label(&self) -> &str;

    /// Names of every line, in line-number order
    fn line_names(&self) -> Vec<String>;

    /// Open a handle on `name`
    fn open_line(&self, name: &str) -> Result<Box<dyn LineDriver>>;
}
