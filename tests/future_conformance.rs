//! Future conformance suite.
//!
//! Verifies the asynchronous-result contract end to end: terminal
//! transitions happen exactly once, notifiers fire exactly once (late
//! registrations synchronously), and cancellation cascades into attached
//! cancellables without double-closing resources.

mod common;

use common::init_test_logging;
use evio::future::{closing_cancellable, result_notifier, FutureResult, Status};
use evio::util::Close;
use evio::{Error, ErrorKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Notifier A registered before completion and notifier B after; both fire
/// exactly once with the value, B synchronously on the registering thread.
#[test]
fn notifier_ordering() {
    init_test_logging();
    let sink = FutureResult::<i32>::new();
    let future = sink.io_future();

    let log: Arc<parking_lot::Mutex<Vec<(char, i32)>>> =
        Arc::new(parking_lot::Mutex::new(Vec::new()));

    let a_log = Arc::clone(&log);
    future.on_complete(move |f| a_log.lock().push(('A', f.get().unwrap())));

    sink.set_result(42);

    let registering_thread = thread::current().id();
    let b_log = Arc::clone(&log);
    future.on_complete(move |f| {
        assert_eq!(thread::current().id(), registering_thread);
        b_log.lock().push(('B', f.get().unwrap()));
    });

    assert_eq!(log.lock().as_slice(), &[('A', 42), ('B', 42)]);
    assert_eq!(future.get().unwrap(), 42);
}

struct Resource {
    closes: AtomicUsize,
}

impl Close for Resource {
    fn close(&self) -> evio::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Cancelling a future bound to a closing cancellable closes the resource
/// exactly once and drives exactly one transition to cancelled.
#[test]
fn cancel_cascade() {
    init_test_logging();
    let sink = FutureResult::<()>::new();
    let future = sink.io_future();
    let resource = Arc::new(Resource {
        closes: AtomicUsize::new(0),
    });

    // The cooperating cancellable: release the in-flight resource, then
    // drive the sink to its cancelled terminal state.
    let closer = closing_cancellable(Arc::clone(&resource));
    let cancel_sink = sink.clone();
    sink.set_cancel_handler(Arc::new(move || {
        closer.cancel();
        cancel_sink.set_cancelled();
    }));

    future.cancel();
    future.cancel();

    assert_eq!(resource.closes.load(Ordering::SeqCst), 1);
    assert_eq!(future.status(), Status::Cancelled);
    assert_eq!(future.get().unwrap_err().kind(), ErrorKind::Cancelled);
    // A terminal future ignores further transitions.
    assert!(!sink.set_result(()));
}

/// A future chained through the manager notifier mirrors every terminal
/// state into the downstream sink.
#[test]
fn manager_notifier_chain() {
    init_test_logging();
    for terminal in ["done", "failed", "cancelled"] {
        let upstream = FutureResult::<u8>::new();
        let downstream = FutureResult::<u8>::new();
        upstream
            .io_future()
            .add_notifier(result_notifier(), downstream.clone());
        match terminal {
            "done" => {
                upstream.set_result(9);
                assert_eq!(downstream.io_future().get().unwrap(), 9);
            }
            "failed" => {
                upstream.set_exception(Error::new(ErrorKind::Io));
                assert_eq!(
                    downstream.io_future().get().unwrap_err().kind(),
                    ErrorKind::Io
                );
            }
            _ => {
                upstream.set_cancelled();
                assert_eq!(downstream.io_future().status(), Status::Cancelled);
            }
        }
    }
}

/// Waiters on other threads observe the terminal state; the transition
/// happens-before their observation.
#[test]
fn cross_thread_completion() {
    init_test_logging();
    let sink = FutureResult::<Vec<u8>>::new();
    let mut waiters = Vec::new();
    for _ in 0..4 {
        let future = sink.io_future();
        waiters.push(thread::spawn(move || future.get().unwrap()));
    }
    thread::sleep(Duration::from_millis(10));
    sink.set_result(vec![1, 2, 3]);
    for waiter in waiters {
        assert_eq!(waiter.join().unwrap(), vec![1, 2, 3]);
    }
}

/// A bounded wait on a never-completing future reports `Waiting` after the
/// timeout instead of blocking forever.
#[test]
fn bounded_wait_observes_waiting() {
    init_test_logging();
    let sink = FutureResult::<()>::new();
    let start = std::time::Instant::now();
    let status = sink.io_future().wait_timeout(Duration::from_millis(40));
    assert_eq!(status, Status::Waiting);
    assert!(start.elapsed() >= Duration::from_millis(40));
}

/// Notifiers fire exactly once even when registration and completion race
/// across threads.
#[test]
fn concurrent_registration_and_completion() {
    init_test_logging();
    for _ in 0..50 {
        let sink = FutureResult::<u32>::new();
        let future = sink.io_future();
        let fired = Arc::new(AtomicUsize::new(0));

        let register = {
            let future = future.clone();
            let fired = Arc::clone(&fired);
            thread::spawn(move || {
                future.on_complete(move |_| {
                    fired.fetch_add(1, Ordering::SeqCst);
                });
            })
        };
        let complete = thread::spawn(move || {
            sink.set_result(1);
        });
        register.join().unwrap();
        complete.join().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
