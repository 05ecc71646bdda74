//! Conformance scenarios over two jumpered lines

mod line;
mod line_set;

use crate::harness::{Recorder, Scenario};
use gpioline_hal::{Edge, EdgeKind, Level, WaitOutcome};
use std::time::{Duration, Instant};

/// Transition table for edge detection: start level, filter, written level
pub(crate) const EDGE_TABLE: [(Level, Edge, Level); 4] = [
    (Level::Low, Edge::Rising, Level::High),
    (Level::High, Edge::Falling, Level::Low),
    (Level::Low, Edge::Both, Level::High),
    (Level::High, Edge::Both, Level::Low),
];

/// Every scenario, in run order
pub fn all() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "write-read-single-pin",
            description: "Level propagation, pull after read, auto-reverse of roles",
            run: line::write_read_single_pin,
        },
        Scenario {
            name: "wait-for-edge-timeout",
            description: "An edge wait with no edge times out on time",
            run: line::wait_for_edge_timeout,
        },
        Scenario {
            name: "wait-for-edge-single-pin",
            description: "Rising, falling and both-edge detection",
            run: line::wait_for_edge_single_pin,
        },
        Scenario {
            name: "stale-edges-discarded",
            description: "Re-arming an input discards queued edges",
            run: line::stale_edges_discarded,
        },
        Scenario {
            name: "halt",
            description: "Halt interrupts a blocked wait",
            run: line::halt,
        },
        Scenario {
            name: "line-set-creation",
            description: "Line set ordering and rollback of a failed creation",
            run: line_set::creation,
        },
        Scenario {
            name: "line-set-read-write",
            description: "Line set reads and writes",
            run: line_set::read_write,
        },
        Scenario {
            name: "line-set-wait-for-edge-timeout",
            description: "A line set wait with no edge times out on time",
            run: line_set::wait_for_edge_timeout,
        },
        Scenario {
            name: "line-set-halt",
            description: "Halt interrupts a blocked line set wait",
            run: line_set::halt,
        },
        Scenario {
            name: "line-set-wait-for-edge",
            description: "Line set edge detection reports the member",
            run: line_set::wait_for_edge,
        },
        Scenario {
            name: "line-set-config-with-override",
            description: "Per-line overrides of the line set configuration",
            run: line_set::config_with_override,
        },
    ]
}

/// Check a wait that should have timed out: not early, and not later than
/// `limit`
pub(crate) fn check_timeout(
    rec: &mut Recorder,
    outcome: &WaitOutcome,
    elapsed: Duration,
    timeout: Duration,
    limit: Duration,
) {
    rec.check(*outcome == WaitOutcome::TimedOut, || {
        format!("expected a timeout, got {outcome:?}")
    });
    rec.check(elapsed >= timeout && elapsed <= limit, || {
        format!(
            "timeout duration failure: expected {} ms to {} ms, took {} ms",
            timeout.as_millis(),
            limit.as_millis(),
            elapsed.as_millis()
        )
    });
}

/// Check a wait interrupted by `halt()`: cancelled, and back within `limit`
/// of the halt being issued
pub(crate) fn check_halted(
    rec: &mut Recorder,
    outcome: &WaitOutcome,
    halted_at: Instant,
    returned_at: Instant,
    limit: Duration,
) {
    rec.check(*outcome == WaitOutcome::Cancelled, || {
        format!("halted wait returned {outcome:?}")
    });
    let latency = returned_at.saturating_duration_since(halted_at);
    rec.check(latency <= limit, || {
        format!(
            "halt did not interrupt the wait: returned {} ms after halt(), limit {} ms",
            latency.as_millis(),
            limit.as_millis()
        )
    });
}

/// Check that `outcome` is the edge `start -> end` on `line`
pub(crate) fn check_edge(
    rec: &mut Recorder,
    outcome: &WaitOutcome,
    line: &str,
    edge: Edge,
    start: Level,
    end: Level,
) {
    let Some(event) = outcome.edge() else {
        rec.error(format!(
            "expected {edge} on {line} for {start} -> {end}, got {outcome:?}"
        ));
        return;
    };
    let kind = EdgeKind::towards(end);
    rec.check(event.kind == kind, || {
        format!("{edge} on {line}: expected {kind:?}, got {:?}", event.kind)
    });
    rec.check(event.line == line, || {
        format!("edge reported on {}, expected {line}", event.line)
    });
}
