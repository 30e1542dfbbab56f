//! Notifier traits and the stock notifiers.

use super::{AsyncResult, FutureResult, Status};
use crate::error::Error;
use crate::listener::{invoke_channel_listener, ChannelListener};
use std::sync::Arc;

/// A callback registered on a future, fired exactly once on terminal state.
///
/// The attachment is supplied at registration and handed back on dispatch;
/// its type is unconstrained.
pub trait Notifier<T, A>: Send + Sync {
    /// Called with the terminal future and the attachment.
    fn notify(&self, future: &dyn AsyncResult<T>, attachment: &A);
}

impl<T, A, F> Notifier<T, A> for F
where
    F: Fn(&dyn AsyncResult<T>, &A) + Send + Sync,
{
    fn notify(&self, future: &dyn AsyncResult<T>, attachment: &A) {
        self(future, attachment);
    }
}

/// A notifier that dispatches on the terminal state.
///
/// Wrap implementations with [`handling`] to register them.
pub trait HandlingNotifier<T, A>: Send + Sync {
    /// Called when the future completed with a value.
    fn handle_done(&self, value: T, attachment: &A) {
        let _ = (value, attachment);
    }

    /// Called when the future failed.
    fn handle_failed(&self, error: Error, attachment: &A) {
        let _ = (error, attachment);
    }

    /// Called when the future was cancelled.
    fn handle_cancelled(&self, attachment: &A) {
        let _ = attachment;
    }
}

/// Adapter that turns a [`HandlingNotifier`] into a [`Notifier`].
pub struct Handling<N>(pub N);

/// Wraps a [`HandlingNotifier`] for registration with
/// [`IoFuture::add_notifier`](super::IoFuture::add_notifier).
pub const fn handling<N>(notifier: N) -> Handling<N> {
    Handling(notifier)
}

impl<T, A, N> Notifier<T, A> for Handling<N>
where
    N: HandlingNotifier<T, A>,
{
    fn notify(&self, future: &dyn AsyncResult<T>, attachment: &A) {
        match future.status() {
            Status::Done => {
                if let Ok(value) = future.get() {
                    self.0.handle_done(value, attachment);
                }
            }
            Status::Failed => {
                if let Some(error) = future.exception() {
                    self.0.handle_failed(error, attachment);
                }
            }
            Status::Cancelled => self.0.handle_cancelled(attachment),
            Status::Waiting => {}
        }
    }
}

/// Forwards a terminal state into the attached [`FutureResult`] sink.
///
/// This is the manager notifier: chaining a future into another future's
/// write side.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResultNotifier;

impl<T> HandlingNotifier<T, FutureResult<T>> for ResultNotifier {
    fn handle_done(&self, value: T, sink: &FutureResult<T>) {
        sink.set_result(value);
    }

    fn handle_failed(&self, error: Error, sink: &FutureResult<T>) {
        sink.set_exception(error);
    }

    fn handle_cancelled(&self, sink: &FutureResult<T>) {
        sink.set_cancelled();
    }
}

/// Returns the notifier that forwards the terminal state to the attached
/// [`FutureResult`].
#[must_use]
pub const fn result_notifier() -> Handling<ResultNotifier> {
    Handling(ResultNotifier)
}

/// A notifier that runs a closure regardless of the terminal state.
pub struct RunnableNotifier<F>(F);

impl<T, A, F> Notifier<T, A> for RunnableNotifier<F>
where
    F: Fn() + Send + Sync,
{
    fn notify(&self, _future: &dyn AsyncResult<T>, _attachment: &A) {
        (self.0)();
    }
}

/// Wraps a closure to run on any terminal state.
pub const fn runnable_notifier<F: Fn() + Send + Sync>(action: F) -> RunnableNotifier<F> {
    RunnableNotifier(action)
}

/// Invokes the channel listener given as the attachment with the channel the
/// future resolved to.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChannelListenerNotifier;

impl<C> HandlingNotifier<Arc<C>, Arc<dyn ChannelListener<C>>> for ChannelListenerNotifier
where
    C: ?Sized + Send + Sync + 'static,
{
    fn handle_done(&self, channel: Arc<C>, listener: &Arc<dyn ChannelListener<C>>) {
        invoke_channel_listener(&channel, listener.as_ref());
    }
}

/// Returns the notifier that invokes the attached channel listener on the
/// resolved channel.
#[must_use]
pub const fn channel_listener_notifier() -> Handling<ChannelListenerNotifier> {
    Handling(ChannelListenerNotifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn result_notifier_forwards_done() {
        let upstream = FutureResult::<u32>::new();
        let downstream = FutureResult::<u32>::new();
        upstream
            .io_future()
            .add_notifier(result_notifier(), downstream.clone());
        upstream.set_result(7);
        assert_eq!(downstream.io_future().get().unwrap(), 7);
    }

    #[test]
    fn result_notifier_forwards_failure_and_cancel() {
        let upstream = FutureResult::<u32>::new();
        let downstream = FutureResult::<u32>::new();
        upstream
            .io_future()
            .add_notifier(result_notifier(), downstream.clone());
        upstream.set_exception(Error::new(ErrorKind::Io));
        assert_eq!(
            downstream.io_future().get().unwrap_err().kind(),
            ErrorKind::Io
        );

        let upstream = FutureResult::<u32>::new();
        let downstream = FutureResult::<u32>::new();
        upstream
            .io_future()
            .add_notifier(result_notifier(), downstream.clone());
        upstream.set_cancelled();
        assert_eq!(downstream.io_future().status(), Status::Cancelled);
    }

    #[test]
    fn runnable_notifier_fires_on_any_terminal() {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);
        let sink = FutureResult::<()>::new();
        sink.io_future().add_notifier(
            runnable_notifier(move || {
                counted.fetch_add(1, Ordering::SeqCst);
            }),
            (),
        );
        sink.set_cancelled();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handling_notifier_dispatches_by_state() {
        struct Recorder(Arc<AtomicUsize>);

        impl HandlingNotifier<u8, ()> for Recorder {
            fn handle_done(&self, value: u8, _attachment: &()) {
                self.0.fetch_add(usize::from(value), Ordering::SeqCst);
            }
        }

        let count = Arc::new(AtomicUsize::new(0));
        let sink = FutureResult::<u8>::new();
        sink.io_future()
            .add_notifier(handling(Recorder(Arc::clone(&count))), ());
        sink.set_result(5);
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }
}
