// tests/scheduler_scenarios.rs

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use jobdag::engine::{JobRecord, RunOptions, Scheduler};
use jobdag::errors::JobdagError;
use jobdag::exec::{JobCallback, JobHandle};
use jobdag::types::JobStatus;
use jobdag_test_utils::builders::{diamond, task};
use jobdag_test_utils::fake_backend::{FakeBackend, FakeEvent};
use jobdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn scheduler(backend: &Arc<FakeBackend>, max_concurrency: usize) -> Scheduler<FakeBackend> {
    Scheduler::new(Arc::clone(backend), RunOptions { max_concurrency })
}

fn started(name: &str) -> FakeEvent {
    FakeEvent::Started(name.to_string())
}

fn finished(name: &str) -> FakeEvent {
    FakeEvent::Finished(name.to_string())
}

#[tokio::test]
async fn diamond_with_two_slots_runs_in_dependency_order() -> TestResult {
    init_tracing();
    let backend = Arc::new(FakeBackend::new().with_default_delay(Duration::from_millis(30)));

    let results = with_timeout(scheduler(&backend, 2).run_descriptors(diamond())).await?;

    assert_eq!(results.len(), 4);
    for name in ["A", "B", "C", "D"] {
        let record = results.get(name).expect("record for every task");
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.output.as_deref(), Some(format!("{name} done").as_str()));
    }

    let pos = |e: FakeEvent| backend.position_of(&e).expect("event recorded");

    // A runs alone first.
    assert_eq!(backend.started()[0], "A");
    assert!(pos(finished("A")) < pos(started("B")));
    assert!(pos(finished("A")) < pos(started("C")));

    // B and C overlap.
    assert!(pos(started("B")) < pos(finished("C")));
    assert!(pos(started("C")) < pos(finished("B")));

    // D waits for both.
    assert!(pos(finished("B")) < pos(started("D")));
    assert!(pos(finished("C")) < pos(started("D")));

    assert_eq!(backend.max_concurrent(), 2);
    Ok(())
}

#[tokio::test]
async fn failing_task_blocks_its_dependents() -> TestResult {
    init_tracing();
    let backend = Arc::new(FakeBackend::new().failing("A", "exit code 3"));

    let err = with_timeout(
        scheduler(&backend, 2).run_descriptors(vec![task("A", &[]), task("B", &["A"])]),
    )
    .await
    .unwrap_err();

    match err {
        JobdagError::TaskExecution {
            task,
            detail,
            failed_tasks,
        } => {
            assert_eq!(task, "A");
            assert!(detail.contains("exit code 3"), "detail was: {detail}");
            assert_eq!(failed_tasks, vec!["A"]);
        }
        other => panic!("expected TaskExecution, got {other:?}"),
    }

    assert_eq!(backend.started(), vec!["A"]);
    Ok(())
}

#[tokio::test]
async fn cycle_is_rejected_before_anything_runs() -> TestResult {
    init_tracing();
    let backend = Arc::new(FakeBackend::new());

    let err = with_timeout(
        scheduler(&backend, 2).run_descriptors(vec![task("A", &["B"]), task("B", &["A"])]),
    )
    .await
    .unwrap_err();

    assert!(
        matches!(err, JobdagError::Validation(jobdag::errors::GraphError::CyclicDependency { .. })),
        "got {err:?}"
    );
    assert!(backend.events().is_empty());
    Ok(())
}

#[tokio::test]
async fn running_siblings_drain_after_a_failure() -> TestResult {
    init_tracing();
    let backend = Arc::new(
        FakeBackend::new()
            .failing("a_fast", "boom")
            .with_delay("a_fast", Duration::from_millis(5))
            .with_delay("b_slow", Duration::from_millis(150)),
    );

    let err = with_timeout(scheduler(&backend, 2).run_descriptors(vec![
        task("a_fast", &[]),
        task("b_slow", &[]),
        task("c_after_slow", &["b_slow"]),
        task("d_after_fast", &["a_fast"]),
    ]))
    .await
    .unwrap_err();

    let JobdagError::TaskExecution { task, .. } = err else {
        panic!("expected TaskExecution, got {err:?}");
    };
    assert_eq!(task, "a_fast");

    // The slow sibling was allowed to finish, not cancelled.
    assert!(backend.position_of(&finished("b_slow")).is_some());
    assert!(backend.cancelled().is_empty());

    // Only the two roots were ever ready; nothing downstream started.
    let mut started = backend.started();
    started.sort();
    assert_eq!(started, vec!["a_fast", "b_slow"]);
    Ok(())
}

#[tokio::test]
async fn simultaneous_failures_are_all_enumerated() -> TestResult {
    init_tracing();
    let backend = Arc::new(
        FakeBackend::new()
            .failing("x", "x broke")
            .failing("y", "y broke")
            .with_default_delay(Duration::from_millis(10)),
    );

    let err = with_timeout(
        scheduler(&backend, 2).run_descriptors(vec![task("x", &[]), task("y", &[])]),
    )
    .await
    .unwrap_err();

    let JobdagError::TaskExecution { task, failed_tasks, .. } = err else {
        panic!("expected TaskExecution, got {err:?}");
    };
    assert!(task == "x" || task == "y");
    let mut failed_tasks = failed_tasks;
    failed_tasks.sort();
    assert_eq!(failed_tasks, vec!["x", "y"]);
    Ok(())
}

#[tokio::test]
async fn concurrency_bound_holds_for_a_wide_graph() -> TestResult {
    init_tracing();
    let backend = Arc::new(FakeBackend::new().with_default_delay(Duration::from_millis(15)));
    let descriptors: Vec<_> = (0..12).map(|i| task(&format!("t{i}"), &[])).collect();

    let results = with_timeout(scheduler(&backend, 3).run_descriptors(descriptors)).await?;

    assert_eq!(results.len(), 12);
    assert!(backend.max_concurrent() <= 3, "saw {}", backend.max_concurrent());
    Ok(())
}

#[tokio::test]
async fn single_slot_serialises_everything() -> TestResult {
    init_tracing();
    let backend = Arc::new(FakeBackend::new().with_default_delay(Duration::from_millis(5)));

    let results = with_timeout(scheduler(&backend, 1).run_descriptors(diamond())).await?;

    assert_eq!(results.len(), 4);
    assert_eq!(backend.max_concurrent(), 1);
    Ok(())
}

#[tokio::test]
async fn empty_workflow_returns_empty_result() -> TestResult {
    let backend = Arc::new(FakeBackend::new());
    let results = with_timeout(scheduler(&backend, 2).run_descriptors(Vec::new())).await?;
    assert!(results.is_empty());
    Ok(())
}

#[tokio::test]
async fn zero_concurrency_is_a_config_error() {
    let backend = Arc::new(FakeBackend::new());
    let err = scheduler(&backend, 0)
        .run_descriptors(diamond())
        .await
        .unwrap_err();
    assert!(matches!(err, JobdagError::ConfigError(_)), "got {err:?}");
    assert!(backend.events().is_empty());
}

#[tokio::test]
async fn panicking_backend_becomes_a_task_failure() -> TestResult {
    init_tracing();
    let backend = Arc::new(FakeBackend::new().panicking("A"));

    let err = with_timeout(
        scheduler(&backend, 2).run_descriptors(vec![task("A", &[]), task("B", &["A"])]),
    )
    .await
    .unwrap_err();

    let JobdagError::TaskExecution { task, .. } = err else {
        panic!("expected TaskExecution, got {err:?}");
    };
    assert_eq!(task, "A");
    assert_eq!(backend.started(), vec!["A"]);
    Ok(())
}

struct PanicsWhenRunning(&'static str);

impl JobCallback for PanicsWhenRunning {
    fn on_job_running(&self, task: &str) {
        if task == self.0 {
            panic!("callback blew up for '{task}'");
        }
    }
}

#[tokio::test]
async fn panicking_callback_fails_the_task_instead_of_hanging() -> TestResult {
    init_tracing();
    let backend = Arc::new(FakeBackend::new());

    let err = with_timeout(
        scheduler(&backend, 2)
            .with_callback(Arc::new(PanicsWhenRunning("A")))
            .run_descriptors(vec![task("A", &[]), task("B", &["A"])]),
    )
    .await
    .unwrap_err();

    let JobdagError::TaskExecution { task, detail, failed_tasks } = err else {
        panic!("expected TaskExecution, got {err:?}");
    };
    assert_eq!(task, "A");
    assert!(detail.contains("panicked"), "detail: {detail}");
    assert_eq!(failed_tasks, vec!["A".to_string()]);
    assert!(backend.started().is_empty());
    Ok(())
}

#[tokio::test]
async fn panicking_callback_after_completion_keeps_the_result() -> TestResult {
    init_tracing();
    let backend = Arc::new(FakeBackend::new());

    struct PanicsOnCompleted;
    impl JobCallback for PanicsOnCompleted {
        fn on_job_completed(&self, _task: &str, _record: &JobRecord) {
            panic!("completion hook failed");
        }
    }

    let results = with_timeout(
        scheduler(&backend, 2)
            .with_callback(Arc::new(PanicsOnCompleted))
            .run_descriptors(vec![task("A", &[]), task("B", &["A"])]),
    )
    .await?;

    assert_eq!(results.len(), 2);
    assert_eq!(backend.started(), vec!["A", "B"]);
    Ok(())
}

#[derive(Default)]
struct CountingCallback {
    running: AtomicUsize,
    submitted: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl JobCallback for CountingCallback {
    fn on_job_running(&self, _task: &str) {
        self.running.fetch_add(1, Ordering::SeqCst);
    }

    fn on_job_submitted(&self, _task: &str, _handle: &JobHandle) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
    }

    fn on_job_completed(&self, _task: &str, _record: &JobRecord) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_job_failed(&self, _task: &str, _detail: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn callbacks_see_every_lifecycle_step() -> TestResult {
    init_tracing();
    let backend = Arc::new(FakeBackend::new().failing("C", "nope"));
    let callback = Arc::new(CountingCallback::default());

    let scheduler = scheduler(&backend, 2).with_callback(callback.clone());
    let err = with_timeout(scheduler.run_descriptors(vec![
        task("A", &[]),
        task("B", &["A"]),
        task("C", &["A"]),
    ]))
    .await;
    assert!(err.is_err());

    assert_eq!(callback.running.load(Ordering::SeqCst), 3);
    assert_eq!(callback.submitted.load(Ordering::SeqCst), 3);
    assert_eq!(callback.completed.load(Ordering::SeqCst), 2);
    assert_eq!(callback.failed.load(Ordering::SeqCst), 1);
    Ok(())
}
