// tests/abort_behaviour.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use jobdag::engine::{AbortHandle, RunOptions, Scheduler};
use jobdag::errors::JobdagError;
use jobdag_test_utils::builders::task;
use jobdag_test_utils::fake_backend::FakeBackend;
use jobdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn abort_cancels_running_jobs_and_reports_aborted() -> TestResult {
    init_tracing();
    let backend = Arc::new(FakeBackend::new().holding("A").holding("B"));
    let scheduler = Scheduler::new(Arc::clone(&backend), RunOptions { max_concurrency: 2 });
    let abort = scheduler.abort_handle();

    let run = tokio::spawn(async move {
        scheduler
            .run_descriptors(vec![task("A", &[]), task("B", &[]), task("C", &["A"])])
            .await
    });

    with_timeout(backend.wait_for_submissions(2)).await;
    abort.abort();

    let err = with_timeout(run).await?.unwrap_err();
    assert!(matches!(err, JobdagError::Aborted), "got {err:?}");

    let mut cancelled = backend.cancelled();
    cancelled.sort();
    assert_eq!(cancelled, vec!["A", "B"]);
    assert!(!backend.started().contains(&"C".to_string()));
    Ok(())
}

#[tokio::test]
async fn abort_before_run_dispatches_nothing() -> TestResult {
    init_tracing();
    let backend = Arc::new(FakeBackend::new());
    let scheduler = Scheduler::new(Arc::clone(&backend), RunOptions { max_concurrency: 2 });
    scheduler.abort_handle().abort();

    let err = with_timeout(scheduler.run_descriptors(vec![task("A", &[])]))
        .await
        .unwrap_err();

    assert!(matches!(err, JobdagError::Aborted), "got {err:?}");
    assert!(backend.events().is_empty());
    Ok(())
}

#[tokio::test]
async fn abort_outlives_the_run_it_stopped() -> TestResult {
    init_tracing();
    let backend = Arc::new(FakeBackend::new());
    let scheduler = Scheduler::new(Arc::clone(&backend), RunOptions { max_concurrency: 2 });

    let first = with_timeout(scheduler.run_descriptors(vec![task("A", &[])])).await?;
    assert_eq!(first.len(), 1);

    scheduler.abort_handle().abort();
    let err = with_timeout(scheduler.run_descriptors(vec![task("B", &[])]))
        .await
        .unwrap_err();
    assert!(matches!(err, JobdagError::Aborted), "got {err:?}");

    // A fresh scheduler on the same backend is unaffected.
    let fresh = Scheduler::new(Arc::clone(&backend), RunOptions { max_concurrency: 2 });
    let results = with_timeout(fresh.run_descriptors(vec![task("C", &[])])).await?;
    assert_eq!(results.len(), 1);
    assert_eq!(backend.started(), vec!["A", "C"]);
    Ok(())
}

#[tokio::test]
async fn abort_while_waiting_for_a_slot_stops_dispatch() -> TestResult {
    init_tracing();
    let backend = Arc::new(FakeBackend::new().holding("a"));
    let scheduler = Scheduler::new(Arc::clone(&backend), RunOptions { max_concurrency: 1 });
    let abort = scheduler.abort_handle();

    let run = tokio::spawn(async move {
        scheduler
            .run_descriptors(vec![task("a", &[]), task("b", &[]), task("c", &[])])
            .await
    });

    with_timeout(backend.wait_for_submissions(1)).await;
    // The loop is now blocked submitting "b" behind the single slot.
    tokio::time::sleep(Duration::from_millis(20)).await;
    abort.abort();

    let err = with_timeout(run).await?.unwrap_err();
    assert!(matches!(err, JobdagError::Aborted), "got {err:?}");
    assert_eq!(backend.started(), vec!["a"]);
    assert_eq!(backend.cancelled(), vec!["a"]);
    Ok(())
}

#[tokio::test]
async fn abort_handle_is_shared_between_clones() {
    let handle = AbortHandle::new();
    let clone = handle.clone();
    assert!(!handle.is_requested());

    let waiter = tokio::spawn(async move { clone.requested().await });
    handle.abort();
    handle.abort();

    with_timeout(waiter).await.expect("waiter task");
    assert!(handle.is_requested());
}

#[tokio::test]
async fn abort_during_failure_drain_still_reports_the_failure() -> TestResult {
    init_tracing();
    let backend = Arc::new(
        FakeBackend::new()
            .failing("a_fails", "boom")
            .holding("b_held"),
    );
    let scheduler = Scheduler::new(Arc::clone(&backend), RunOptions { max_concurrency: 2 });
    let abort = scheduler.abort_handle();

    let run = tokio::spawn(async move {
        scheduler
            .run_descriptors(vec![task("a_fails", &[]), task("b_held", &[])])
            .await
    });

    // b_held never finishes by itself, so the run is draining on it.
    with_timeout(backend.wait_for_submissions(2)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    abort.abort();

    let err = with_timeout(run).await?.unwrap_err();
    let JobdagError::TaskExecution { task, .. } = err else {
        panic!("expected TaskExecution, got {err:?}");
    };
    assert_eq!(task, "a_fails");
    assert_eq!(backend.cancelled(), vec!["b_held"]);
    Ok(())
}
