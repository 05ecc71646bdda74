//! GPIO line abstraction
//!
//! This crate provides digital I/O lines with directional auto-switching,
//! pull configuration, edge-triggered waits and cooperative cancellation,
//! over either a simulated chip or the Linux sysfs GPIO interface.
//!
//! # Example
//!
//! ```no_run
//! use gpioline_hal::{Chip, ChipConfig, Edge, Level, Pull, WaitOutcome};
//! use gpioline_hal::sim::{SimChip, SimProfile};
//! use std::time::Duration;
//!
//! fn main() -> gpioline_hal::Result<()> {
//!     let chip = Chip::new(SimChip::new(SimProfile::raspberry_pi()), ChipConfig::default());
//!     let out = chip.by_name("GPIO5")?;
//!     let input = chip.by_name("GPIO13")?;
//!
//!     out.out(Level::Low)?;
//!     input.configure_input(Pull::Up, Edge::Rising)?;
//!     out.out(Level::High)?;
//!
//!     if let WaitOutcome::EdgeDetected(event) = input.wait_for_edge(Duration::from_secs(1))? {
//!         println!("{:?} edge on {}", event.kind, event.line);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod chip;
pub mod driver;
pub mod error;
pub mod host;
pub mod line;
pub mod line_set;
pub mod signal;
pub mod sim;
pub mod sysfs;

pub use cancel::{CancelToken, EdgeSignal};
pub use chip::{Chip, ChipConfig, Sharing};
pub use driver::{ChipBackend, LineDriver};
pub use error::LineError;
pub use host::{BackendKind, DriverFailure, HostOptions, HostState};
pub use line::{DRAIN_TIMEOUT, Line, LineSnapshot, POLL_SLICE};
pub use line_set::LineSet;
pub use signal::{Direction, Edge, EdgeEvent, EdgeKind, Level, LineConfig, Pull, WaitOutcome};

/// HAL Result type
pub type Result<T> = std::result::Result<T, LineError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_handles_are_shareable() {
        assert_send_sync::<Line>();
        assert_send_sync::<LineSet>();
        assert_send_sync::<Chip>();
    }
}
