// tests/scheduler_core.rs

//! Phase transitions of the pure scheduler core, driven by hand-built
//! snapshots instead of real workers.

use std::error::Error;
use std::sync::Arc;

use jobdag::build_graph;
use jobdag::dag::{StateSnapshot, TaskState};
use jobdag::engine::{CoreCommand, RunEvent, RunPhase, SchedulerCore, TaskOutcome};
use jobdag_test_utils::builders::{diamond, task};

type TestResult = Result<(), Box<dyn Error>>;

fn snapshot(states: &[(&str, TaskState)]) -> StateSnapshot {
    states
        .iter()
        .map(|(name, state)| (name.to_string(), *state))
        .collect()
}

fn finished(task: &str) -> RunEvent {
    RunEvent::TaskFinished {
        task: task.to_string(),
        outcome: TaskOutcome::Success,
    }
}

fn failed(task: &str, detail: &str) -> RunEvent {
    RunEvent::TaskFinished {
        task: task.to_string(),
        outcome: TaskOutcome::Failed {
            detail: detail.to_string(),
        },
    }
}

fn dispatch(names: &[&str]) -> CoreCommand {
    CoreCommand::Dispatch(names.iter().map(|s| s.to_string()).collect())
}

use TaskState::{Completed, Failed, Pending, Running};

#[test]
fn diamond_runs_to_success() -> TestResult {
    let mut core = SchedulerCore::new(Arc::new(build_graph(diamond())?));
    assert_eq!(core.phase(), RunPhase::Seeding);

    let step = core.seed(&snapshot(&[("A", Pending), ("B", Pending), ("C", Pending), ("D", Pending)]));
    assert_eq!(step.commands, vec![dispatch(&["A"])]);
    assert!(step.keep_running);
    assert_eq!(core.phase(), RunPhase::Draining);

    let step = core.step(
        finished("A"),
        &snapshot(&[("A", Completed), ("B", Pending), ("C", Pending), ("D", Pending)]),
    );
    assert_eq!(step.commands, vec![dispatch(&["B", "C"])]);
    assert_eq!(core.in_flight(), 2);

    let step = core.step(
        finished("B"),
        &snapshot(&[("A", Completed), ("B", Completed), ("C", Running), ("D", Pending)]),
    );
    assert!(step.commands.is_empty());

    let step = core.step(
        finished("C"),
        &snapshot(&[("A", Completed), ("B", Completed), ("C", Completed), ("D", Pending)]),
    );
    assert_eq!(step.commands, vec![dispatch(&["D"])]);

    let step = core.step(
        finished("D"),
        &snapshot(&[("A", Completed), ("B", Completed), ("C", Completed), ("D", Completed)]),
    );
    assert!(!step.keep_running);
    assert!(core.is_settled());
    assert_eq!(core.phase(), RunPhase::Succeeded);
    Ok(())
}

#[test]
fn join_is_dispatched_once_when_both_parents_finish_together() -> TestResult {
    let mut core = SchedulerCore::new(Arc::new(build_graph(diamond())?));
    core.seed(&snapshot(&[("A", Pending), ("B", Pending), ("C", Pending), ("D", Pending)]));
    core.step(
        finished("A"),
        &snapshot(&[("A", Completed), ("B", Pending), ("C", Pending), ("D", Pending)]),
    );

    // Both B and C are already terminal when the first event is handled.
    let both_done = snapshot(&[("A", Completed), ("B", Completed), ("C", Completed), ("D", Pending)]);
    let first = core.step(finished("B"), &both_done);
    let second = core.step(finished("C"), &both_done);

    assert_eq!(first.commands, vec![dispatch(&["D"])]);
    assert!(second.commands.is_empty());
    assert!(core.was_dispatched("D"));
    assert_eq!(core.in_flight(), 1);
    Ok(())
}

#[test]
fn failure_drains_in_flight_and_blocks_new_dispatch() -> TestResult {
    let graph = build_graph(vec![task("A", &[]), task("B", &[]), task("C", &["B"])])?;
    let mut core = SchedulerCore::new(Arc::new(graph));

    let step = core.seed(&snapshot(&[("A", Pending), ("B", Pending), ("C", Pending)]));
    assert_eq!(step.commands, vec![dispatch(&["A", "B"])]);

    let step = core.step(
        failed("A", "exit code 1"),
        &snapshot(&[("A", Failed), ("B", Running), ("C", Pending)]),
    );
    assert!(step.commands.is_empty());
    assert!(step.keep_running, "B is still in flight");
    assert_eq!(core.phase(), RunPhase::Failed);

    // B succeeds, but C must not be dispatched any more.
    let step = core.step(
        finished("B"),
        &snapshot(&[("A", Failed), ("B", Completed), ("C", Pending)]),
    );
    assert!(step.commands.is_empty());
    assert!(!step.keep_running);
    assert_eq!(core.phase(), RunPhase::Failed);
    assert!(!core.was_dispatched("C"));

    assert_eq!(core.failures().len(), 1);
    assert_eq!(core.failures()[0].task, "A");
    assert_eq!(core.failures()[0].detail, "exit code 1");
    Ok(())
}

#[test]
fn abort_cancels_in_flight_and_settles_as_aborted() -> TestResult {
    let graph = build_graph(vec![task("A", &[]), task("B", &["A"])])?;
    let mut core = SchedulerCore::new(Arc::new(graph));
    core.seed(&snapshot(&[("A", Pending), ("B", Pending)]));

    let step = core.step(RunEvent::AbortRequested, &snapshot(&[("A", Running), ("B", Pending)]));
    assert_eq!(step.commands, vec![CoreCommand::CancelInFlight]);
    assert!(step.keep_running);
    assert_eq!(core.phase(), RunPhase::Aborted);

    // A second abort is a no-op.
    let step = core.step(RunEvent::AbortRequested, &snapshot(&[("A", Running), ("B", Pending)]));
    assert!(step.commands.is_empty());

    let step = core.step(
        failed("A", "cancelled by request"),
        &snapshot(&[("A", Failed), ("B", Pending)]),
    );
    assert!(!step.keep_running);
    assert_eq!(core.phase(), RunPhase::Aborted);
    Ok(())
}

#[test]
fn abort_before_seeding_dispatches_nothing() -> TestResult {
    let mut core = SchedulerCore::new(Arc::new(build_graph(diamond())?));
    let snap = snapshot(&[("A", Pending), ("B", Pending), ("C", Pending), ("D", Pending)]);

    let step = core.step(RunEvent::AbortRequested, &snap);
    assert_eq!(step.commands, vec![CoreCommand::CancelInFlight]);
    assert!(core.is_settled());

    let step = core.seed(&snap);
    assert!(step.commands.is_empty());
    assert_eq!(core.phase(), RunPhase::Aborted);
    Ok(())
}

#[test]
fn abort_during_failure_drain_keeps_failed_phase() -> TestResult {
    let graph = build_graph(vec![task("A", &[]), task("B", &[])])?;
    let mut core = SchedulerCore::new(Arc::new(graph));
    core.seed(&snapshot(&[("A", Pending), ("B", Pending)]));

    core.step(failed("A", "boom"), &snapshot(&[("A", Failed), ("B", Running)]));
    let step = core.step(RunEvent::AbortRequested, &snapshot(&[("A", Failed), ("B", Running)]));

    assert_eq!(step.commands, vec![CoreCommand::CancelInFlight]);
    assert_eq!(core.phase(), RunPhase::Failed);
    Ok(())
}

#[test]
fn refused_dispatch_releases_the_slot() -> TestResult {
    let graph = build_graph(vec![task("A", &[]), task("B", &[])])?;
    let mut core = SchedulerCore::new(Arc::new(graph));
    core.seed(&snapshot(&[("A", Pending), ("B", Pending)]));

    core.step(failed("A", "boom"), &snapshot(&[("A", Failed), ("B", Pending)]));
    let step = core.dispatch_refused("B", &snapshot(&[("A", Failed), ("B", Pending)]));

    assert!(!step.keep_running);
    assert_eq!(core.phase(), RunPhase::Failed);
    assert_eq!(core.in_flight(), 0);
    Ok(())
}

#[test]
fn empty_graph_succeeds_immediately() -> TestResult {
    let mut core = SchedulerCore::new(Arc::new(build_graph(Vec::new())?));
    let step = core.seed(&StateSnapshot::default());

    assert!(step.commands.is_empty());
    assert!(!step.keep_running);
    assert_eq!(core.phase(), RunPhase::Succeeded);
    Ok(())
}

#[test]
fn pending_work_with_nothing_in_flight_is_stalled() -> TestResult {
    let graph = build_graph(vec![task("A", &[]), task("B", &[])])?;
    let mut core = SchedulerCore::new(Arc::new(graph));
    core.seed(&snapshot(&[("A", Pending), ("B", Pending)]));

    core.step(finished("A"), &snapshot(&[("A", Completed), ("B", Running)]));
    let step = core.dispatch_refused("B", &snapshot(&[("A", Completed), ("B", Pending)]));

    assert!(!step.keep_running);
    assert_eq!(core.phase(), RunPhase::Stalled);
    Ok(())
}
