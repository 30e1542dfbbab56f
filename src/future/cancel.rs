//! Cooperative cancellation handles.

use crate::util::{safe_close, Close};
use std::sync::Arc;

/// A handle whose `cancel` attempts cooperative abort of an operation
/// without guaranteeing it.
///
/// `cancel` never fails and must tolerate being called more than once.
pub trait Cancellable: Send + Sync {
    /// Requests the abort.
    fn cancel(&self);
}

impl<F> Cancellable for F
where
    F: Fn() + Send + Sync,
{
    fn cancel(&self) {
        self();
    }
}

struct ClosingCancellable<C: ?Sized> {
    resource: Arc<C>,
}

impl<C: Close + ?Sized> Cancellable for ClosingCancellable<C> {
    fn cancel(&self) {
        safe_close(&*self.resource);
    }
}

/// Binds a resource so that `cancel()` safe-closes it.
///
/// In-flight connection futures attach one of these so an abort releases
/// the half-open socket.
#[must_use]
pub fn closing_cancellable<C>(resource: Arc<C>) -> Arc<dyn Cancellable>
where
    C: Close + ?Sized + 'static,
{
    Arc::new(ClosingCancellable { resource })
}

struct NullCancellable;

impl Cancellable for NullCancellable {
    fn cancel(&self) {}
}

/// Returns the cancellable that does nothing.
#[must_use]
pub fn null_cancellable() -> Arc<dyn Cancellable> {
    Arc::new(NullCancellable)
}
