//! Line set scenarios

use super::{EDGE_TABLE, check_edge, check_halted, check_timeout};
use crate::harness::{Abort, Bench, Recorder, Step};
use gpioline_hal::{Edge, Level, LineConfig, LineError, LineSet, WaitOutcome};
use std::collections::HashMap;
use std::thread;
use std::time::Instant;

fn create(
    bench: &Bench<'_>,
    names: &[&str],
    overrides: HashMap<String, LineConfig>,
) -> gpioline_hal::Result<LineSet> {
    LineSet::create(
        bench.chip,
        names,
        LineConfig::new(bench.pull(), Edge::None),
        overrides,
    )
}

fn create_required(bench: &Bench<'_>, rec: &mut Recorder, names: &[&str]) -> Result<LineSet, Abort> {
    rec.require(
        create(bench, names, HashMap::new()),
        &format!("LineSet::create({names:?})"),
    )
}

/// Configure every member and drain queued edges
fn arm(rec: &mut Recorder, set: &LineSet, edge: Edge) -> Step {
    rec.require(set.configure_all(edge), "configure_all()")?;
    rec.ok(set.clear_edges(), "clear_edges()");
    Ok(())
}

pub(super) fn creation(bench: &Bench<'_>, rec: &mut Recorder) -> Step {
    let (in_line, out_line) = (bench.lines.in_line.as_str(), bench.lines.out_line.as_str());

    let set = create_required(bench, rec, &[out_line, in_line])?;
    rec.check(set.names() == [out_line, in_line], || {
        format!("members out of order: {:?}", set.names())
    });
    rec.check(set.len() == 2, || format!("expected 2 members, got {}", set.len()));
    rec.ok(set.close(), "close()");
    drop(set);

    let missing = format!("{in_line}-missing");
    if bench.chip.contains(&missing) {
        return Err(rec.fatal(format!("chip unexpectedly has a line called {missing}")));
    }
    match create(bench, &[out_line, in_line, missing.as_str()], HashMap::new()) {
        Err(LineError::PartialFailure { failed, opened, .. }) => {
            rec.check(failed == missing, || format!("failure reported for {failed}"));
            rec.check(opened == 2, || format!("{opened} line(s) reported opened, expected 2"));
        }
        Err(e) => rec.error(format!("expected a partial failure, got {e}")),
        Ok(_) => rec.error(format!("creating a set with {missing} succeeded")),
    }
    for name in [out_line, in_line] {
        let handles = bench.chip.open_handles(name);
        rec.check(handles == 0, || format!("{name} leaked {handles} handle(s)"));
    }

    let reopened = create(bench, &[out_line, in_line], HashMap::new());
    rec.ok(reopened, "reopening after rollback");
    Ok(())
}

pub(super) fn read_write(bench: &Bench<'_>, rec: &mut Recorder) -> Step {
    let outputs = create_required(bench, rec, &[bench.lines.out_line.as_str()])?;
    let inputs = create_required(bench, rec, &[bench.lines.in_line.as_str()])?;

    for (writer, reader) in [(&outputs, &inputs), (&inputs, &outputs)] {
        for level in [Level::High, Level::Low] {
            rec.ok(writer.out_all(&[level]), "out_all()");
            if let Some(levels) = rec.ok(reader.read_all(), "read_all()") {
                rec.check(levels == [level], || {
                    format!(
                        "wrote {level} on {:?}, read {levels:?} on {:?}",
                        writer.names(),
                        reader.names()
                    )
                });
            }
        }
    }

    rec.check(
        matches!(
            outputs.out_all(&[Level::High, Level::High]),
            Err(LineError::Config { .. })
        ),
        || "out_all() with too many levels should be rejected".to_string(),
    );
    Ok(())
}

pub(super) fn wait_for_edge_timeout(bench: &Bench<'_>, rec: &mut Recorder) -> Step {
    let set = create_required(bench, rec, &[bench.lines.in_line.as_str()])?;
    arm(rec, &set, Edge::Both)?;

    let timeout = bench.timing.wait_timeout();
    let start = Instant::now();
    let outcome = rec.require(set.wait_for_edge(timeout), "wait_for_edge()")?;
    check_timeout(
        rec,
        &outcome,
        start.elapsed(),
        timeout,
        bench.timing.wait_timeout_limit(),
    );
    Ok(())
}

pub(super) fn halt(bench: &Bench<'_>, rec: &mut Recorder) -> Step {
    let set = create_required(bench, rec, &[bench.lines.in_line.as_str()])?;
    arm(rec, &set, Edge::Both)?;

    let (outcome, returned_at, halted) = thread::scope(|s| {
        let halter = s.spawn(|| {
            thread::sleep(bench.timing.halt_after());
            (Instant::now(), set.halt())
        });
        let outcome = set.wait_for_edge(bench.timing.halt_wait());
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

    rec.ok(set.halt(), "second halt()");
    rec.check(set.lines().iter().all(|l| l.is_halted()), || {
        "halt() left a member running".to_string()
    });
    if let Some(outcome) = rec.ok(
        set.wait_for_edge(bench.timing.halt_wait()),
        "wait_for_edge() after halt",
    ) {
        rec.check(outcome == WaitOutcome::Cancelled, || {
            format!("wait after halt returned {outcome:?}")
        });
    }
    Ok(())
}

pub(super) fn wait_for_edge(bench: &Bench<'_>, rec: &mut Recorder) -> Step {
    let output = bench.out_line(rec)?;
    let set = create_required(bench, rec, &[bench.lines.in_line.as_str()])?;

    for (start, edge, end) in EDGE_TABLE {
        rec.ok(output.out(start), "out()");
        arm(rec, &set, edge)?;
        rec.ok(output.out(end), "out()");

        if let Some(outcome) = rec.ok(
            set.wait_for_edge(bench.timing.edge_timeout()),
            "wait_for_edge()",
        ) {
            check_edge(rec, &outcome, &bench.lines.in_line, edge, start, end);
        }
    }
    Ok(())
}

pub(super) fn config_with_override(bench: &Bench<'_>, rec: &mut Recorder) -> Step {
    let (in_line, out_line) = (bench.lines.in_line.as_str(), bench.lines.out_line.as_str());
    let override_config = LineConfig::new(bench.pull(), Edge::Falling);
    let overrides = HashMap::from([(out_line.to_string(), override_config)]);

    let result = create(bench, &[in_line, out_line], overrides);
    let set = rec.require(result, "LineSet::create() with override")?;
    rec.require(set.configure_all(Edge::Rising), "configure_all()")?;

    let expected = [
        (in_line, LineConfig::new(bench.pull(), Edge::Rising)),
        (out_line, override_config),
    ];
    for (name, config) in expected {
        let Some(line) = set.line(name) else {
            return Err(rec.fatal(format!("{name} missing from the set")));
        };
        let snapshot = line.snapshot();
        rec.check(
            snapshot.pull == config.pull && snapshot.edge == config.edge,
            || {
                format!(
                    "{name}: expected {} {}, got {} {}",
                    config.pull, config.edge, snapshot.pull, snapshot.edge
                )
            },
        );
    }

    // Drive through the overridden member; the other keeps its Rising filter
    let Some(driver) = set.line(out_line) else {
        return Err(rec.fatal(format!("{out_line} missing from the set")));
    };
    rec.ok(driver.out(Level::Low), "out()");
    rec.ok(set.clear_edges(), "clear_edges()");
    rec.ok(driver.out(Level::High), "out()");
    if let Some(outcome) = rec.ok(
        set.wait_for_edge(bench.timing.edge_timeout()),
        "wait_for_edge()",
    ) {
        check_edge(rec, &outcome, in_line, Edge::Rising, Level::Low, Level::High);
    }
    Ok(())
}
