//! Electrical signal types
//!
//! Levels, directions, pull resistors, edge filters and the events and
//! outcomes produced by edge waits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Not;
use std::time::Instant;

/// Digital level of a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[default]
    Low,
    High,
}

impl Level {
    /// Value written to or read from a sysfs `value` attribute
    pub fn sysfs_value(self) -> &'static str {
        match self {
            Level::Low => "0",
            Level::High => "1",
        }
    }
}

impl From<bool> for Level {
    fn from(value: bool) -> Self {
        if value { Level::High } else { Level::Low }
    }
}

impl From<Level> for bool {
    fn from(level: Level) -> Self {
        matches!(level, Level::High)
    }
}

impl Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => f.write_str("Low"),
            Level::High => f.write_str("High"),
        }
    }
}

/// Line direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("Input"),
            Direction::Output => f.write_str("Output"),
        }
    }
}

/// Pull resistor biasing an undriven input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Pull {
    #[default]
    None,
    Up,
    Down,
}

impl fmt::Display for Pull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pull::None => f.write_str("PullNoChange"),
            Pull::Up => f.write_str("PullUp"),
            Pull::Down => f.write_str("PullDown"),
        }
    }
}

/// Edge filter armed on an input line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    #[default]
    None,
    Rising,
    Falling,
    Both,
}

impl Edge {
    /// Whether a transition of `kind` passes this filter
    pub fn matches(self, kind: EdgeKind) -> bool {
        match self {
            Edge::None => false,
            Edge::Rising => kind == EdgeKind::Rising,
            Edge::Falling => kind == EdgeKind::Falling,
            Edge::Both => true,
        }
    }

    /// Value of the sysfs `edge` attribute
    pub fn sysfs_name(self) -> &'static str {
        match self {
            Edge::None => "none",
            Edge::Rising => "rising",
            Edge::Falling => "falling",
            Edge::Both => "both",
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::None => f.write_str("NoEdge"),
            Edge::Rising => f.write_str("RisingEdge"),
            Edge::Falling => f.write_str("FallingEdge"),
            Edge::Both => f.write_str("BothEdges"),
        }
    }
}

/// Transition actually observed on a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Rising,
    Falling,
}

impl EdgeKind {
    /// Transition that ends at `level`
    pub fn towards(level: Level) -> Self {
        match level {
            Level::High => EdgeKind::Rising,
            Level::Low => EdgeKind::Falling,
        }
    }
}

/// An edge delivered by a wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeEvent {
    /// Name of the line the edge occurred on
    pub line: String,
    pub kind: EdgeKind,
    pub timestamp: Instant,
    /// Per-line sequence number, increasing in occurrence order
    pub seqno: u64,
}

/// Result of an edge wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    EdgeDetected(EdgeEvent),
    TimedOut,
    Cancelled,
}

impl WaitOutcome {
    pub fn is_edge(&self) -> bool {
        matches!(self, WaitOutcome::EdgeDetected(_))
    }

    /// The delivered edge, if any
    pub fn edge(&self) -> Option<&EdgeEvent> {
        match self {
            WaitOutcome::EdgeDetected(event) => Some(event),
            _ => None,
        }
    }
}

/// Pull and edge applied to an input line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LineConfig {
    #[serde(default)]
    pub pull: Pull,
    #[serde(default)]
    pub edge: Edge,
}

impl LineConfig {
    pub fn new(pull: Pull, edge: Edge) -> Self {
        Self { pull, edge }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_conversions() {
        assert_eq!(Level::from(true), Level::High);
        assert_eq!(Level::from(false), Level::Low);
        assert!(bool::from(Level::High));
        assert_eq!(!Level::Low, Level::High);
    }

    #[test]
    fn test_edge_filter_matching() {
        assert!(Edge::Rising.matches(EdgeKind::Rising));
        assert!(!Edge::Rising.matches(EdgeKind::Falling));
        assert!(Edge::Falling.matches(EdgeKind::Falling));
        assert!(Edge::Both.matches(EdgeKind::Rising));
        assert!(Edge::Both.matches(EdgeKind::Falling));
        assert!(!Edge::None.matches(EdgeKind::Rising));
    }

    #[test]
    fn test_edge_kind_towards() {
        assert_eq!(EdgeKind::towards(Level::High), EdgeKind::Rising);
        assert_eq!(EdgeKind::towards(Level::Low), EdgeKind::Falling);
    }

    #[test]
    fn test_labels() {
        assert_eq!(Pull::Up.to_string(), "PullUp");
        assert_eq!(Edge::Both.to_string(), "BothEdges");
        assert_eq!(Edge::Falling.sysfs_name(), "falling");
    }

    #[test]
    fn test_line_config_toml() {
        let config: LineConfig = toml::from_str("pull = \"down\"\nedge = \"rising\"").unwrap();
        assert_eq!(config, LineConfig::new(Pull::Down, Edge::Rising));

        let config: LineConfig = toml::from_str("").unwrap();
        assert_eq!(config, LineConfig::default());
    }
}
