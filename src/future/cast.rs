//! Payload re-typing for futures.

use super::{AsyncResult, IoFuture, Notifier, Status};
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// Re-types an `IoFuture<I>` as a future of `O` by applying a projection at
/// read time.
///
/// All operations forward to the parent; the projection runs on each `get`.
/// This replaces dynamic class-based casting with an explicit projection
/// function supplied at wrap time.
///
/// ```
/// use evio::future::{CastIoFuture, FutureResult};
///
/// let sink = FutureResult::<u32>::new();
/// let cast = CastIoFuture::new(sink.io_future(), |v: &u32| v.to_string());
/// sink.set_result(7);
/// assert_eq!(cast.get().unwrap(), "7");
/// ```
pub struct CastIoFuture<I, O> {
    parent: IoFuture<I>,
    project: Arc<dyn Fn(&I) -> O + Send + Sync>,
}

impl<I, O> Clone for CastIoFuture<I, O> {
    fn clone(&self) -> Self {
        Self {
            parent: self.parent.clone(),
            project: Arc::clone(&self.project),
        }
    }
}

impl<I, O> CastIoFuture<I, O>
where
    I: Clone + Send + 'static,
    O: 'static,
{
    /// Wraps `parent`, projecting its payload through `project` at read
    /// time.
    pub fn new<F>(parent: IoFuture<I>, project: F) -> Self
    where
        F: Fn(&I) -> O + Send + Sync + 'static,
    {
        Self {
            parent,
            project: Arc::new(project),
        }
    }

    /// Returns the current status without blocking.
    #[must_use]
    pub fn status(&self) -> Status {
        self.parent.status()
    }

    /// Blocks until the parent is terminal.
    pub fn wait(&self) -> Status {
        self.parent.wait()
    }

    /// Blocks up to `timeout`; may return [`Status::Waiting`].
    pub fn wait_timeout(&self, timeout: Duration) -> Status {
        self.parent.wait_timeout(timeout)
    }

    /// Blocks until terminal and returns the projected value.
    ///
    /// # Errors
    ///
    /// Forwards the parent's failure or cancellation.
    pub fn get(&self) -> Result<O> {
        self.parent.get().map(|value| (self.project)(&value))
    }

    /// Returns the parent's stored failure, if any.
    #[must_use]
    pub fn exception(&self) -> Option<Error> {
        self.parent.exception()
    }

    /// Forwards a cancellation request to the parent.
    pub fn cancel(&self) -> &Self {
        self.parent.cancel();
        self
    }

    /// Registers a completion callback receiving this cast future.
    pub fn on_complete<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&CastIoFuture<I, O>) + Send + 'static,
        O: Send + Sync,
    {
        let this = self.clone();
        self.parent.on_complete(move |_| callback(&this));
        self
    }

    /// Registers a [`Notifier`] with an attachment, dispatched with this
    /// cast future as the terminal result.
    pub fn add_notifier<A, N>(&self, notifier: N, attachment: A) -> &Self
    where
        A: Send + 'static,
        N: Notifier<O, A> + 'static,
        O: Send + Sync,
    {
        self.on_complete(move |future| notifier.notify(future, &attachment))
    }
}

impl<I, O> AsyncResult<O> for CastIoFuture<I, O>
where
    I: Clone + Send + 'static,
    O: 'static,
{
    fn status(&self) -> Status {
        CastIoFuture::status(self)
    }

    fn wait(&self) -> Status {
        CastIoFuture::wait(self)
    }

    fn wait_timeout(&self, timeout: Duration) -> Status {
        CastIoFuture::wait_timeout(self, timeout)
    }

    fn get(&self) -> Result<O> {
        CastIoFuture::get(self)
    }

    fn exception(&self) -> Option<Error> {
        CastIoFuture::exception(self)
    }

    fn request_cancel(&self) {
        self.cancel();
    }
}
