//! Channel listener plumbing: the listener trait, atomic listener slots,
//! setters, delegation and executor dispatch.
//!
//! A listener is attached to a channel's readiness slot only ever through a
//! [`ListenerSetter`]; replacement is atomic, so an invocation observes
//! either the old or the new listener, never a torn value. A slot whose
//! channel has dispatched its close event is *terminated*: it drops its
//! listener and silently ignores every later `set`.
//!
//! Listener failures never propagate into the dispatcher:
//! [`invoke_channel_listener`] isolates panics, logs them and reports a
//! success flag instead.

use crate::executor::Executor;
use crate::tracing_compat::{debug, error, trace};
use crate::util::{safe_close, Close};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A callback consuming a channel reference.
///
/// Listeners run on whatever thread dispatches the readiness event (the
/// selector thread unless an [`ExecutorListener`] interposes) and must be
/// safe for either. The channel arrives as an `Arc` so a listener can hand
/// the channel off by cloning the handle.
pub trait ChannelListener<C: ?Sized>: Send + Sync {
    /// Handles the event on the given channel.
    fn handle_event(&self, channel: &Arc<C>);
}

impl<C: ?Sized, F> ChannelListener<C> for F
where
    F: Fn(&Arc<C>) + Send + Sync,
{
    fn handle_event(&self, channel: &Arc<C>) {
        self(channel);
    }
}

/// Attaches (or clears) a listener on one readiness slot.
pub trait ListenerSetter<C: ?Sized>: Send + Sync {
    /// Sets the listener; `None` clears the slot.
    fn set(&self, listener: Option<Arc<dyn ChannelListener<C>>>);
}

/// An atomically replaceable listener slot.
///
/// The slot is empty by default. After [`terminate`](Self::terminate) the
/// slot stays empty and `set` becomes a no-op, which is the contract for a
/// channel whose close has already been dispatched.
pub struct ListenerCell<C: ?Sized> {
    slot: Mutex<Option<Arc<dyn ChannelListener<C>>>>,
    terminated: AtomicBool,
}

impl<C: ?Sized> Default for ListenerCell<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ?Sized> ListenerCell<C> {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            terminated: AtomicBool::new(false),
        }
    }

    /// Returns the current listener, if any.
    #[must_use]
    pub fn get(&self) -> Option<Arc<dyn ChannelListener<C>>> {
        self.slot.lock().clone()
    }

    /// Clears the slot and latches it: every later `set` is ignored.
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
        self.slot.lock().take();
    }

    /// Invokes the current listener with `channel`, isolating failures.
    ///
    /// Returns `false` only when a listener ran and failed.
    pub fn invoke(&self, channel: &Arc<C>) -> bool {
        match self.get() {
            Some(listener) => invoke_channel_listener(channel, listener.as_ref()),
            None => true,
        }
    }
}

impl<C: ?Sized> ListenerSetter<C> for ListenerCell<C> {
    fn set(&self, listener: Option<Arc<dyn ChannelListener<C>>>) {
        let mut slot = self.slot.lock();
        if self.terminated.load(Ordering::Acquire) {
            return;
        }
        *slot = listener;
    }
}

struct NullSetter;

impl<C: ?Sized> ListenerSetter<C> for NullSetter {
    fn set(&self, _listener: Option<Arc<dyn ChannelListener<C>>>) {}
}

/// Returns a setter that ignores everything set on it.
#[must_use]
pub fn null_setter<C: ?Sized>() -> Arc<dyn ListenerSetter<C>> {
    Arc::new(NullSetter)
}

/// A setter bound to an upstream setter of a different channel type.
///
/// Listeners set here are wrapped so that each dispatch substitutes the
/// fixed `real_channel`; translation happens on dispatch, not on set. This
/// lets a listener written for a wrapper channel be attached to the wrapped
/// channel's slot.
pub struct DelegatingSetter<T: ?Sized, O: ?Sized> {
    upstream: Arc<dyn ListenerSetter<O>>,
    real_channel: Arc<T>,
}

impl<T: ?Sized, O: ?Sized> DelegatingSetter<T, O> {
    /// Creates a setter delegating to `upstream`, substituting
    /// `real_channel` on each dispatch.
    #[must_use]
    pub fn new(upstream: Arc<dyn ListenerSetter<O>>, real_channel: Arc<T>) -> Self {
        Self {
            upstream,
            real_channel,
        }
    }
}

struct DelegatingListener<T: ?Sized, O: ?Sized> {
    listener: Arc<dyn ChannelListener<T>>,
    real_channel: Arc<T>,
    _upstream: std::marker::PhantomData<fn(&Arc<O>)>,
}

impl<T, O> ChannelListener<O> for DelegatingListener<T, O>
where
    T: ?Sized + Send + Sync,
    O: ?Sized,
{
    fn handle_event(&self, _channel: &Arc<O>) {
        self.listener.handle_event(&self.real_channel);
    }
}

impl<T, O> ListenerSetter<T> for DelegatingSetter<T, O>
where
    T: ?Sized + Send + Sync + 'static,
    O: ?Sized + 'static,
{
    fn set(&self, listener: Option<Arc<dyn ChannelListener<T>>>) {
        match listener {
            Some(listener) => self.upstream.set(Some(Arc::new(DelegatingListener {
                listener,
                real_channel: Arc::clone(&self.real_channel),
                _upstream: std::marker::PhantomData,
            }))),
            None => self.upstream.set(None),
        }
    }
}

/// A listener that submits the wrapped listener's dispatch to an executor.
///
/// When the executor rejects the task the channel is safe-closed; a
/// readiness event that cannot be serviced must not be silently lost with
/// the channel left open.
pub struct ExecutorListener<C: ?Sized> {
    listener: Arc<dyn ChannelListener<C>>,
    executor: Arc<dyn Executor>,
}

impl<C: ?Sized> ExecutorListener<C> {
    /// Wraps `listener` so its dispatch runs on `executor`.
    #[must_use]
    pub fn new(listener: Arc<dyn ChannelListener<C>>, executor: Arc<dyn Executor>) -> Self {
        Self { listener, executor }
    }
}

impl<C> ChannelListener<C> for ExecutorListener<C>
where
    C: Close + ?Sized + Send + Sync + 'static,
{
    fn handle_event(&self, channel: &Arc<C>) {
        let listener = Arc::clone(&self.listener);
        let channel_for_task = Arc::clone(channel);
        let task = Box::new(move || {
            invoke_channel_listener(&channel_for_task, listener.as_ref());
        });
        if let Err(rejected) = self.executor.execute(task) {
            error!(reason = rejected.reason, "failed to submit listener task, closing channel");
            safe_close(&**channel);
        }
    }
}

/// Invokes a channel listener, isolating and logging any panic.
///
/// Returns `true` when the listener completed normally. Listener failures
/// must never reach the selector; this is the only sanctioned way to run
/// one.
pub fn invoke_channel_listener<C: ?Sized>(
    channel: &Arc<C>,
    listener: &dyn ChannelListener<C>,
) -> bool {
    trace!("invoking channel listener");
    match catch_unwind(AssertUnwindSafe(|| listener.handle_event(channel))) {
        Ok(()) => true,
        Err(payload) => {
            let message = panic_message(&payload);
            error!(panic = message, "a channel event listener panicked");
            false
        }
    }
}

/// Invokes a channel listener through an executor, falling back to inline
/// invocation when the executor rejects the task.
pub fn invoke_channel_listener_via<C>(
    executor: &dyn Executor,
    channel: &Arc<C>,
    listener: Arc<dyn ChannelListener<C>>,
) where
    C: ?Sized + Send + Sync + 'static,
{
    let channel_for_task = Arc::clone(channel);
    let task_listener = Arc::clone(&listener);
    let task = Box::new(move || {
        invoke_channel_listener(&channel_for_task, task_listener.as_ref());
    });
    if executor.execute(task).is_err() {
        debug!("executor rejected listener task, invoking inline");
        invoke_channel_listener(channel, listener.as_ref());
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{direct_executor, RejectedError, Task};
    use std::sync::atomic::AtomicUsize;

    struct Target;

    #[test]
    fn cell_set_and_invoke() {
        let cell: ListenerCell<Target> = ListenerCell::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);
        cell.set(Some(Arc::new(move |_: &Arc<Target>| {
            counted.fetch_add(1, Ordering::SeqCst);
        })));
        let channel = Arc::new(Target);
        assert!(cell.invoke(&channel));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_cell_invoke_succeeds() {
        let cell: ListenerCell<Target> = ListenerCell::new();
        assert!(cell.invoke(&Arc::new(Target)));
    }

    #[test]
    fn terminated_cell_ignores_set() {
        let cell: ListenerCell<Target> = ListenerCell::new();
        cell.terminate();
        cell.set(Some(Arc::new(|_: &Arc<Target>| {})));
        assert!(cell.get().is_none());
    }

    #[test]
    fn panicking_listener_is_contained() {
        let cell: ListenerCell<Target> = ListenerCell::new();
        cell.set(Some(Arc::new(|_: &Arc<Target>| panic!("listener bug"))));
        assert!(!cell.invoke(&Arc::new(Target)));
    }

    #[test]
    fn delegating_setter_substitutes_real_channel() {
        struct Real(u8);
        let upstream: Arc<ListenerCell<Target>> = Arc::new(ListenerCell::new());
        let real = Arc::new(Real(9));
        let setter = DelegatingSetter::new(
            upstream.clone() as Arc<dyn ListenerSetter<Target>>,
            Arc::clone(&real),
        );

        let seen = Arc::new(AtomicUsize::new(0));
        let recorded = Arc::clone(&seen);
        setter.set(Some(Arc::new(move |ch: &Arc<Real>| {
            recorded.store(usize::from(ch.0), Ordering::SeqCst);
        })));

        upstream.invoke(&Arc::new(Target));
        assert_eq!(seen.load(Ordering::SeqCst), 9);
    }

    struct RejectingExecutor;

    impl Executor for RejectingExecutor {
        fn execute(&self, _task: Task) -> Result<(), RejectedError> {
            Err(RejectedError::new("queue full"))
        }
    }

    #[test]
    fn rejected_dispatch_falls_back_inline() {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);
        let listener: Arc<dyn ChannelListener<Target>> =
            Arc::new(move |_: &Arc<Target>| {
                counted.fetch_add(1, Ordering::SeqCst);
            });
        invoke_channel_listener_via(&RejectingExecutor, &Arc::new(Target), listener);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn executor_listener_dispatches_through_executor() {
        struct CloseTarget(AtomicUsize);
        impl Close for CloseTarget {
            fn close(&self) -> crate::error::Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);
        let inner: Arc<dyn ChannelListener<CloseTarget>> =
            Arc::new(move |_: &Arc<CloseTarget>| {
                counted.fetch_add(1, Ordering::SeqCst);
            });
        let wrapped = ExecutorListener::new(inner, direct_executor());
        let channel = Arc::new(CloseTarget(AtomicUsize::new(0)));
        wrapped.handle_event(&channel);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(channel.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn executor_listener_closes_channel_on_rejection() {
        struct CloseTarget(AtomicUsize);
        impl Close for CloseTarget {
            fn close(&self) -> crate::error::Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let inner: Arc<dyn ChannelListener<CloseTarget>> =
            Arc::new(|_: &Arc<CloseTarget>| {});
        let wrapped = ExecutorListener::new(inner, Arc::new(RejectingExecutor));
        let channel = Arc::new(CloseTarget(AtomicUsize::new(0)));
        wrapped.handle_event(&channel);
        assert_eq!(channel.0.load(Ordering::SeqCst), 1);
    }
}
