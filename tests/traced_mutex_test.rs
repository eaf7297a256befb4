//! Traced mutex behavior under concurrency.
//!
//! Tests:
//! - Concurrent callers never hold the lock at the same time
//! - Every acquisition produces exactly one wait span
//! - Waiters report how many callers were ahead of them

mod common;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use booktrace::error::LockError;
use booktrace::session::Session;
use booktrace::sync::mutex::{attributes, WAIT_SPAN_NAME};
use booktrace::sync::TracedMutex;
use common::{attr, wait_for, TestTelemetry};
use opentelemetry::Context;

const CALLERS: usize = 16;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion_across_tasks() {
    let telemetry = TestTelemetry::new();
    let mutex = Arc::new(TracedMutex::new("mysql", telemetry.tracer("mysql")));
    let holders = Arc::new(AtomicUsize::new(0));
    let max_holders = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..CALLERS)
        .map(|i| {
            let mutex = Arc::clone(&mutex);
            let holders = Arc::clone(&holders);
            let max_holders = Arc::clone(&max_holders);
            tokio::spawn(async move {
                let session = Session::new(format!("caller-{i}"));
                let _guard = mutex.lock(&Context::new(), &session).await;
                let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                max_holders.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                holders.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(max_holders.load(Ordering::SeqCst), 1);
    assert_eq!(mutex.holder(), None);
    assert_eq!(mutex.waiting(), 0);

    let spans = telemetry.spans_named(WAIT_SPAN_NAME);
    assert_eq!(spans.len(), CALLERS);
    for span in &spans {
        assert!(span.end_time >= span.start_time);
        assert_eq!(attr(span, attributes::WAITER), attr(span, attributes::HOLDER));
    }
}

#[tokio::test]
async fn test_waiters_report_callers_ahead() {
    let telemetry = TestTelemetry::new();
    let mutex = Arc::new(TracedMutex::new("mysql", telemetry.tracer("mysql")));

    mutex.acquire(&Context::new(), &Session::new("holder")).await;

    let waiters: Vec<_> = (0..3)
        .map(|i| {
            let mutex = Arc::clone(&mutex);
            tokio::spawn(async move {
                let session = Session::new(format!("waiter-{i}"));
                mutex.acquire(&Context::new(), &session).await;
                mutex.release(&session);
            })
        })
        .collect();

    assert!(wait_for(Duration::from_secs(5), || mutex.waiting() == 3).await);
    mutex.release(&Session::new("holder"));
    for waiter in waiters {
        waiter.await.unwrap();
    }

    let ahead: BTreeSet<String> = telemetry
        .spans_named(WAIT_SPAN_NAME)
        .iter()
        .filter(|s| attr(s, attributes::WAITER).is_some_and(|w| w.starts_with("waiter-")))
        .filter_map(|s| attr(s, attributes::WAITERS_AHEAD))
        .collect();
    assert_eq!(ahead, BTreeSet::from(["1".into(), "2".into(), "3".into()]));
}

#[test]
fn test_release_on_fresh_mutex_is_illegal_state() {
    let telemetry = TestTelemetry::new();
    let mutex = TracedMutex::new("mysql", telemetry.tracer("mysql"));
    assert!(matches!(
        mutex.try_release(&Session::new("a")),
        Err(LockError::NotHeld { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeated_release_never_frees_another_holder() {
    let telemetry = TestTelemetry::new();
    let mutex = Arc::new(TracedMutex::new("mysql", telemetry.tracer("mysql")));
    let (a, b) = (Session::new("a"), Session::new("b"));

    mutex.acquire(&Context::new(), &a).await;
    mutex.release(&a);
    mutex.acquire(&Context::new(), &b).await;
    assert!(matches!(
        mutex.try_release(&a),
        Err(LockError::NotHolder { .. })
    ));

    let contender = Arc::clone(&mutex);
    let c = tokio::spawn(async move {
        let c = Session::new("c");
        contender.acquire(&Context::new(), &c).await;
        let holder = contender.holder();
        contender.release(&c);
        holder
    });

    assert!(wait_for(Duration::from_secs(5), || mutex.waiting() == 1).await);
    assert_eq!(mutex.holder(), Some(b.clone()));
    mutex.release(&b);
    assert_eq!(c.await.unwrap(), Some(Session::new("c")));
}

#[tokio::test]
async fn test_disabled_mutex_allows_concurrent_holders() {
    let telemetry = TestTelemetry::new();
    let mutex = TracedMutex::new("mysql", telemetry.tracer("mysql")).with_enabled(false);

    let _first = mutex.lock(&Context::new(), &Session::new("a")).await;
    let _second = mutex.lock(&Context::new(), &Session::new("b")).await;

    assert!(telemetry.spans().is_empty());
}
