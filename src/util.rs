//! General I/O utility helpers: safe close, stock listeners and notifiers.

use crate::error::Result;
use crate::future::{handling, Handling, HandlingNotifier, IoFuture};
use crate::listener::ChannelListener;
use crate::tracing_compat::trace;
use std::sync::Arc;

/// Anything with an open/closed lifecycle.
///
/// `close` must be idempotent; closing an already-closed resource returns
/// `Ok(())`.
pub trait Close: Send + Sync {
    /// Closes the resource.
    ///
    /// # Errors
    ///
    /// Returns the underlying close failure, if any.
    fn close(&self) -> Result<()>;
}

/// Closes a resource, logging and discarding any error.
///
/// The resource is not retried; every close path that must not fail funnels
/// through here.
pub fn safe_close<C: Close + ?Sized>(resource: &C) {
    if let Err(err) = resource.close() {
        trace!(error = %err, "closing resource failed");
    }
}

/// Cancels a future resource and closes its result if the operation still
/// completes.
///
/// Cancellation is advisory, so the operation may win the race and produce
/// a live resource; the attached notifier disposes of it either way.
pub fn safe_close_future<C>(future: &IoFuture<Arc<C>>)
where
    C: Close + ?Sized + 'static,
    Arc<C>: Send + Sync,
{
    future.cancel().add_notifier(closing_notifier(), ());
}

/// Notifier that safe-closes a successful result.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClosingNotifier;

impl<C> HandlingNotifier<Arc<C>, ()> for ClosingNotifier
where
    C: Close + ?Sized + 'static,
    Arc<C>: Send + Sync,
{
    fn handle_done(&self, resource: Arc<C>, _attachment: &()) {
        safe_close(&*resource);
    }
}

/// Returns the notifier that safe-closes a done result.
#[must_use]
pub const fn closing_notifier() -> Handling<ClosingNotifier> {
    handling(ClosingNotifier)
}

struct NullListener;

impl<C: ?Sized> ChannelListener<C> for NullListener {
    fn handle_event(&self, _channel: &Arc<C>) {}
}

/// Returns a listener that ignores every event.
#[must_use]
pub fn null_channel_listener<C: ?Sized>() -> Arc<dyn ChannelListener<C>> {
    Arc::new(NullListener)
}

struct ClosingListener;

impl<C: Close + ?Sized> ChannelListener<C> for ClosingListener {
    fn handle_event(&self, channel: &Arc<C>) {
        safe_close(&**channel);
    }
}

/// Returns a listener that safe-closes the channel it is invoked on.
#[must_use]
pub fn closing_channel_listener<C: Close + ?Sized + 'static>() -> Arc<dyn ChannelListener<C>> {
    Arc::new(ClosingListener)
}
