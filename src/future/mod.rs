//! The asynchronous-result object.
//!
//! An [`IoFuture`] carries the outcome of a deferred I/O operation through a
//! small thread-safe state machine:
//!
//! ```text
//!             set_result
//!           ┌────────────► Done(value)
//!           │ set_exception
//! Waiting ──┼────────────► Failed(error)
//!           │ set_cancelled
//!           └────────────► Cancelled
//! ```
//!
//! The transition out of *Waiting* happens exactly once. Every notifier
//! registered before the transition fires exactly once on the completing
//! thread; a notifier registered afterwards fires synchronously on the
//! registering thread. The transition happens-before every notifier
//! invocation and every subsequent [`status`](IoFuture::status) or
//! [`get`](IoFuture::get) observation on any thread.
//!
//! The write side is the [`FutureResult`] sink: exactly one of
//! `set_result` / `set_exception` / `set_cancelled` succeeds; later calls
//! are no-ops.
//!
//! Cancellation is advisory: [`IoFuture::cancel`] fires the attached
//! [`Cancellable`]s (at most once in total) and otherwise changes nothing;
//! a cooperating cancellable is expected to race the in-flight operation
//! and drive the sink to *Cancelled*.

mod cancel;
mod cast;
mod notifier;

pub use cancel::{closing_cancellable, null_cancellable, Cancellable};
pub use cast::CastIoFuture;
pub use notifier::{
    channel_listener_notifier, handling, result_notifier, runnable_notifier,
    ChannelListenerNotifier, Handling, HandlingNotifier, Notifier, ResultNotifier,
    RunnableNotifier,
};

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The observable state of an [`IoFuture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// The operation is still in progress.
    Waiting,
    /// The operation produced a value.
    Done,
    /// The operation failed.
    Failed,
    /// The operation was cancelled.
    Cancelled,
}

type NotifierFn<T> = Box<dyn FnOnce(&IoFuture<T>) + Send>;

enum State<T> {
    Waiting {
        notifiers: Vec<NotifierFn<T>>,
        cancellables: Vec<Arc<dyn Cancellable>>,
        cancel_requested: bool,
    },
    Done(T),
    Failed(Error),
    Cancelled,
}

impl<T> State<T> {
    const fn status(&self) -> Status {
        match self {
            Self::Waiting { .. } => Status::Waiting,
            Self::Done(_) => Status::Done,
            Self::Failed(_) => Status::Failed,
            Self::Cancelled => Status::Cancelled,
        }
    }
}

struct Inner<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

impl<T> Inner<T> {
    /// Swaps in a terminal state; returns the pending notifiers, or `None`
    /// when the future was already terminal (the new state is discarded).
    fn transition(&self, terminal: State<T>) -> Option<Vec<NotifierFn<T>>> {
        let mut state = self.state.lock();
        if !matches!(*state, State::Waiting { .. }) {
            return None;
        }
        let previous = std::mem::replace(&mut *state, terminal);
        self.cond.notify_all();
        drop(state);
        match previous {
            State::Waiting { notifiers, .. } => Some(notifiers),
            // Guarded above.
            _ => None,
        }
    }
}

/// Read side of an asynchronous operation; see the [module docs](self).
///
/// Handles are cheap to clone and share; all clones observe the same state.
pub struct IoFuture<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for IoFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for IoFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoFuture")
            .field("status", &self.status())
            .finish()
    }
}

impl<T> IoFuture<T> {
    /// Returns the current status without blocking.
    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.state.lock().status()
    }

    /// Blocks until the future is terminal and returns the terminal status.
    pub fn wait(&self) -> Status {
        let mut state = self.inner.state.lock();
        while matches!(*state, State::Waiting { .. }) {
            self.inner.cond.wait(&mut state);
        }
        state.status()
    }

    /// Blocks up to `timeout` and returns the status observed, which may
    /// still be [`Status::Waiting`].
    pub fn wait_timeout(&self, timeout: Duration) -> Status {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while matches!(*state, State::Waiting { .. }) {
            if self.inner.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.status()
    }

    /// Returns the failure stored in a *failed* future.
    #[must_use]
    pub fn exception(&self) -> Option<Error> {
        match &*self.inner.state.lock() {
            State::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Requests cancellation.
    ///
    /// Fires the attached cancellables (at most once in total across all
    /// calls) and returns. The state is not changed here; a cooperating
    /// cancellable drives the sink to *Cancelled*. Never fails, idempotent,
    /// callable from any thread.
    pub fn cancel(&self) -> &Self {
        let drained = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Waiting {
                    cancellables,
                    cancel_requested,
                    ..
                } => {
                    *cancel_requested = true;
                    std::mem::take(cancellables)
                }
                _ => Vec::new(),
            }
        };
        for cancellable in drained {
            cancellable.cancel();
        }
        self
    }

    /// Registers a completion callback.
    ///
    /// If the future is already terminal the callback runs synchronously on
    /// the calling thread; otherwise it runs on the completing thread,
    /// exactly once.
    pub fn on_complete<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&IoFuture<T>) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        match &mut *state {
            State::Waiting { notifiers, .. } => {
                notifiers.push(Box::new(callback));
            }
            _ => {
                drop(state);
                callback(self);
            }
        }
        self
    }
}

impl<T: Clone + 'static> IoFuture<T> {
    /// Blocks until terminal and returns the value.
    ///
    /// # Errors
    ///
    /// Returns the stored error when *failed* and *cancelled* when the
    /// operation was cancelled.
    pub fn get(&self) -> Result<T> {
        self.wait();
        match &*self.inner.state.lock() {
            State::Done(value) => Ok(value.clone()),
            State::Failed(err) => Err(err.clone()),
            State::Cancelled => Err(Error::cancelled()),
            // wait() only returns on a terminal state.
            State::Waiting { .. } => unreachable!("wait returned while waiting"),
        }
    }

    /// Registers a [`Notifier`] with an attachment.
    ///
    /// The notifier fires exactly once with the terminal future and the
    /// attachment; registration after terminal entry fires synchronously on
    /// the registering thread.
    pub fn add_notifier<A, N>(&self, notifier: N, attachment: A) -> &Self
    where
        A: Send + 'static,
        N: Notifier<T, A> + 'static,
    {
        self.on_complete(move |future| notifier.notify(future, &attachment))
    }
}

/// Object-safe read surface shared by [`IoFuture`] and [`CastIoFuture`].
pub trait AsyncResult<T> {
    /// Returns the current status without blocking.
    fn status(&self) -> Status;
    /// Blocks until terminal; returns the terminal status.
    fn wait(&self) -> Status;
    /// Blocks up to `timeout`; may return [`Status::Waiting`].
    fn wait_timeout(&self, timeout: Duration) -> Status;
    /// Blocks until terminal and returns the value or failure.
    ///
    /// # Errors
    ///
    /// Returns the stored error when *failed*, *cancelled* when cancelled.
    fn get(&self) -> Result<T>;
    /// Returns the stored failure, present only when *failed*.
    fn exception(&self) -> Option<Error>;
    /// Requests cancellation (advisory, idempotent).
    fn request_cancel(&self);
}

impl<T: Clone + 'static> AsyncResult<T> for IoFuture<T> {
    fn status(&self) -> Status {
        IoFuture::status(self)
    }

    fn wait(&self) -> Status {
        IoFuture::wait(self)
    }

    fn wait_timeout(&self, timeout: Duration) -> Status {
        IoFuture::wait_timeout(self, timeout)
    }

    fn get(&self) -> Result<T> {
        IoFuture::get(self)
    }

    fn exception(&self) -> Option<Error> {
        IoFuture::exception(self)
    }

    fn request_cancel(&self) {
        self.cancel();
    }
}

/// Write side of an [`IoFuture`]; see the [module docs](self).
pub struct FutureResult<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for FutureResult<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for FutureResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for FutureResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureResult")
            .field("status", &self.inner.state.lock().status())
            .finish()
    }
}

impl<T> FutureResult<T> {
    /// Creates a sink and its (not yet completed) future.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Waiting {
                    notifiers: Vec::new(),
                    cancellables: Vec::new(),
                    cancel_requested: false,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Returns the read side.
    #[must_use]
    pub fn io_future(&self) -> IoFuture<T> {
        IoFuture {
            inner: Arc::clone(&self.inner),
        }
    }

    fn fire(&self, notifiers: Vec<NotifierFn<T>>) {
        let future = self.io_future();
        for notifier in notifiers {
            notifier(&future);
        }
    }

    /// Completes the future with a value. Returns `false` when the future
    /// was already terminal (the value is dropped).
    pub fn set_result(&self, value: T) -> bool {
        match self.inner.transition(State::Done(value)) {
            Some(notifiers) => {
                self.fire(notifiers);
                true
            }
            None => false,
        }
    }

    /// Fails the future. Returns `false` when already terminal.
    pub fn set_exception(&self, error: Error) -> bool {
        match self.inner.transition(State::Failed(error)) {
            Some(notifiers) => {
                self.fire(notifiers);
                true
            }
            None => false,
        }
    }

    /// Marks the future cancelled. Returns `false` when already terminal.
    pub fn set_cancelled(&self) -> bool {
        match self.inner.transition(State::Cancelled) {
            Some(notifiers) => {
                self.fire(notifiers);
                true
            }
            None => false,
        }
    }

    /// Attaches a cooperating cancellable, fired when (and only when) the
    /// future's [`cancel`](IoFuture::cancel) is requested while waiting.
    ///
    /// If cancellation was already requested, or the future is already
    /// *cancelled*, the cancellable fires immediately.
    pub fn set_cancel_handler(&self, cancellable: Arc<dyn Cancellable>) {
        let fire_now = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Waiting {
                    cancellables,
                    cancel_requested,
                    ..
                } => {
                    if *cancel_requested {
                        true
                    } else {
                        cancellables.push(cancellable.clone());
                        false
                    }
                }
                State::Cancelled => true,
                _ => false,
            }
        };
        if fire_now {
            cancellable.cancel();
        }
    }
}
