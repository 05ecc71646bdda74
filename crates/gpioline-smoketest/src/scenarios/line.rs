//! Single-line scenarios

use super::{EDGE_TABLE, check_edge, check_halted, check_timeout};
use crate::harness::{Bench, Recorder, Step};
use gpioline_hal::{Direction, Edge, Level, Line, LineError, WaitOutcome};
use std::thread;
use std::time::Instant;

fn expect_level(rec: &mut Recorder, line: &Line, expected: Level, context: &str) {
    if let Some(level) = rec.ok(line.read(), &format!("{}.read()", line.name())) {
        rec.check(level == expected, || {
            format!("{context}: expected {expected} on {}, read {level}", line.name())
        });
    }
}

fn drive(rec: &mut Recorder, line: &Line, level: Level) {
    rec.ok(line.out(level), &format!("{}.out({level})", line.name()));
}

/// Arm `line` as an input and drain whatever is queued
fn arm(bench: &Bench<'_>, rec: &mut Recorder, line: &Line, edge: Edge) -> Step {
    rec.require(
        line.configure_input(bench.pull(), edge),
        &format!("{}.configure_input()", line.name()),
    )?;
    rec.ok(line.clear_edges(), &format!("{}.clear_edges()", line.name()));
    Ok(())
}

pub(super) fn write_read_single_pin(bench: &Bench<'_>, rec: &mut Recorder) -> Step {
    let input = bench.in_line(rec)?;
    let output = bench.out_line(rec)?;

    drive(rec, &output, Level::High);
    expect_level(rec, &input, Level::High, "write/read");
    let expected_pull = bench.pull();
    if let Some(pull) = rec.ok(input.pull(), "pull()") {
        rec.check(pull == expected_pull, || {
            format!("pull() returned {pull}, expected {expected_pull}")
        });
    }
    drive(rec, &output, Level::Low);
    expect_level(rec, &input, Level::Low, "write/read");

    // Roles reverse automatically on out() and read()
    drive(rec, &input, Level::Low);
    thread::sleep(bench.timing.settle());
    drive(rec, &input, Level::High);
    expect_level(rec, &output, Level::High, "auto-reverse");
    drive(rec, &input, Level::Low);
    expect_level(rec, &output, Level::Low, "auto-reverse");

    rec.check(input.direction() == Direction::Output, || {
        format!("{} should have switched to output", input.name())
    });
    rec.check(output.direction() == Direction::Input, || {
        format!("{} should have switched to input", output.name())
    });
    Ok(())
}

pub(super) fn wait_for_edge_timeout(bench: &Bench<'_>, rec: &mut Recorder) -> Step {
    let line = bench.in_line(rec)?;
    arm(bench, rec, &line, Edge::Both)?;

    let timeout = bench.timing.wait_timeout();
    let start = Instant::now();
    let outcome = rec.require(line.wait_for_edge(timeout), "wait_for_edge()")?;
    check_timeout(
        rec,
        &outcome,
        start.elapsed(),
        timeout,
        bench.timing.wait_timeout_limit(),
    );
    Ok(())
}

pub(super) fn wait_for_edge_single_pin(bench: &Bench<'_>, rec: &mut Recorder) -> Step {
    let input = bench.in_line(rec)?;
    let output = bench.out_line(rec)?;

    for (start, edge, end) in EDGE_TABLE {
        drive(rec, &output, start);
        arm(bench, rec, &input, edge)?;
        drive(rec, &output, end);

        if let Some(outcome) = rec.ok(
            input.wait_for_edge(bench.timing.edge_timeout()),
            "wait_for_edge()",
        ) {
            check_edge(rec, &outcome, input.name(), edge, start, end);
        }

        // The reverse transition must not match a single-edge filter
        if edge != Edge::Both {
            drive(rec, &output, start);
            if let Some(outcome) = rec.ok(
                input.wait_for_edge(bench.timing.negative_window()),
                "wait_for_edge()",
            ) {
                rec.check(outcome == WaitOutcome::TimedOut, || {
                    format!("{edge} filter delivered {end} -> {start}: {outcome:?}")
                });
            }
        }
    }
    Ok(())
}

pub(super) fn stale_edges_discarded(bench: &Bench<'_>, rec: &mut Recorder) -> Step {
    let input = bench.in_line(rec)?;
    let output = bench.out_line(rec)?;

    drive(rec, &output, Level::Low);
    arm(bench, rec, &input, Edge::Both)?;
    for _ in 0..3 {
        drive(rec, &output, Level::High);
        drive(rec, &output, Level::Low);
    }

    // Re-arming without draining
    rec.require(
        input.configure_input(bench.pull(), Edge::Both),
        "configure_input()",
    )?;
    if let Some(outcome) = rec.ok(
        input.wait_for_edge(bench.timing.negative_window()),
        "wait_for_edge()",
    ) {
        rec.check(outcome == WaitOutcome::TimedOut, || {
            format!("edge from before re-arming was delivered: {outcome:?}")
        });
    }

    drive(rec, &output, Level::High);
    if let Some(outcome) = rec.ok(
        input.wait_for_edge(bench.timing.edge_timeout()),
        "wait_for_edge()",
    ) {
        check_edge(rec, &outcome, input.name(), Edge::Both, Level::Low, Level::High);
    }
    Ok(())
}

pub(super) fn halt(bench: &Bench<'_>, rec: &mut Recorder) -> Step {
    let line = bench.in_line(rec)?;
    arm(bench, rec, &line, Edge::Both)?;

    let (outcome, returned_at, halted) = thread::scope(|s| {
        let halter = s.spawn(|| {
            thread::sleep(bench.timing.halt_after());
            (Instant::now(), line.halt())
        });
        let outcome = line.wait_for_edge(bench.timing.halt_wait());
        (outcome, Instant::now(), halter.join())
    });

    let halted_at = match halted {
        Ok((halted_at, result)) => {
            rec.ok(result, "halt()");
            halted_at
        }
        Err(_) => return Err(rec.fatal("halting thread panicked")),
    };
    if let Some(outcome) = rec.ok(outcome, "wait_for_edge()") {
        check_halted(rec, &outcome, halted_at, returned_at, bench.timing.halt_latency());
    }

    rec.check(matches!(line.halt(), Err(LineError::AlreadyHalted(_))), || {
        "second halt() should report AlreadyHalted".to_string()
    });
    let start = Instant::now();
    if let Some(outcome) = rec.ok(
        line.wait_for_edge(bench.timing.halt_wait()),
        "wait_for_edge() after halt",
    ) {
        rec.check(outcome == WaitOutcome::Cancelled, || {
            format!("wait after halt returned {outcome:?}")
        });
    }
    rec.check(start.elapsed() < bench.timing.halt_latency(), || {
        "wait after halt did not return immediately".to_string()
    });
    Ok(())
}
