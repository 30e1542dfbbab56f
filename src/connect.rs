//! Connectors, channel sources and destinations.
//!
//! A [`ChannelSource`] is a factory for one kind of outbound channel; a
//! [`Connector`] produces channels to arbitrary destination addresses; a
//! [`ChannelDestination`] accepts a single inbound connection. All three
//! hand back an [`IoFuture`] resolving to the channel, with open/bind
//! listeners invoked as the underlying operation progresses.
//!
//! [`RetryingChannelSource`] composes retry on top of any source: each
//! `open` performs up to `max_tries` attempts, restarting on failure and
//! surfacing success or cancellation directly.

use crate::channels::{BoundChannel, StreamChannel};
use crate::error::{Error, ErrorKind};
use crate::future::{FutureResult, IoFuture, Status};
use crate::listener::{invoke_channel_listener, ChannelListener};
use crate::options::OptionMap;
use crate::tracing_compat::debug;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A factory producing channels of one kind.
pub trait ChannelSource: Send + Sync {
    /// The channel type this source produces.
    type Channel: ?Sized + Send + Sync;

    /// Opens a new channel.
    ///
    /// The open listener, when given, is invoked with the channel once it
    /// is ready; the returned future resolves to the same channel. The
    /// listener must close or hand off the channel before returning if it
    /// cannot take ownership.
    fn open(
        &self,
        open_listener: Option<Arc<dyn ChannelListener<Self::Channel>>>,
    ) -> IoFuture<Arc<Self::Channel>>;
}

/// Connects to arbitrary peers from arbitrary bound source addresses.
pub trait Connector<A>: Send + Sync {
    /// The channel type this connector produces.
    type Channel: ?Sized + Send + Sync;

    /// Establishes a connection to `dest`.
    ///
    /// The bind listener fires after the local bind, the open listener
    /// after the full connect; the two invocations are independent and not
    /// ordered with respect to each other.
    fn connect_to(
        &self,
        dest: A,
        open_listener: Option<Arc<dyn ChannelListener<Self::Channel>>>,
        bind_listener: Option<Arc<dyn ChannelListener<dyn BoundChannel<A>>>>,
    ) -> IoFuture<Arc<Self::Channel>>;
}

/// Accepts a single inbound connection from a local bind.
pub trait ChannelDestination<A>: Send + Sync {
    /// The channel type this destination produces.
    type Channel: ?Sized + Send + Sync;

    /// Accepts one connection.
    ///
    /// The bind listener fires when the local bind completes, the open
    /// listener when the connection is accepted; the invocations are not
    /// ordered.
    fn accept(
        &self,
        open_listener: Option<Arc<dyn ChannelListener<Self::Channel>>>,
        bind_listener: Option<Arc<dyn ChannelListener<dyn BoundChannel<A>>>>,
    ) -> IoFuture<Arc<Self::Channel>>;
}

/// Adapts a connector plus a fixed destination into a [`ChannelSource`].
pub struct ConnectorSource<A, C: ?Sized> {
    connector: Arc<dyn Connector<A, Channel = C>>,
    dest: A,
}

impl<A: Clone, C: ?Sized> ConnectorSource<A, C> {
    /// Creates a source that always connects to `dest`.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector<A, Channel = C>>, dest: A) -> Self {
        Self { connector, dest }
    }
}

impl<A, C> ChannelSource for ConnectorSource<A, C>
where
    A: Clone + Send + Sync,
    C: ?Sized + Send + Sync,
{
    type Channel = C;

    fn open(
        &self,
        open_listener: Option<Arc<dyn ChannelListener<C>>>,
    ) -> IoFuture<Arc<C>> {
        self.connector.connect_to(self.dest.clone(), open_listener, None)
    }
}

struct RetryState<C: ?Sized> {
    delegate: Arc<dyn ChannelSource<Channel = C>>,
    open_listener: Option<Arc<dyn ChannelListener<C>>>,
    sink: FutureResult<Arc<C>>,
    remaining: AtomicU32,
    max_tries: u32,
    current: Mutex<Option<IoFuture<Arc<C>>>>,
}

impl<C: ?Sized + Send + Sync + 'static> RetryState<C> {
    fn try_one(state: &Arc<Self>) {
        let attempt = state.delegate.open(state.open_listener.clone());
        *state.current.lock() = Some(attempt.clone());
        let retry = Arc::clone(state);
        attempt.on_complete(move |future| match future.status() {
            Status::Done => {
                if let Ok(channel) = future.get() {
                    retry.sink.set_result(channel);
                }
            }
            Status::Cancelled => {
                retry.sink.set_cancelled();
            }
            Status::Failed => {
                let cause = future
                    .exception()
                    .unwrap_or_else(|| Error::new(ErrorKind::Io));
                let left = retry.remaining.fetch_sub(1, Ordering::SeqCst) - 1;
                if left == 0 {
                    retry.sink.set_exception(
                        Error::with_context(
                            ErrorKind::Io,
                            format!(
                                "failed to create channel after {} tries",
                                retry.max_tries
                            ),
                        )
                        .with_source(cause),
                    );
                } else {
                    debug!(attempts_left = left, "channel open failed, retrying");
                    Self::try_one(&retry);
                }
            }
            Status::Waiting => {}
        });
    }
}

/// A channel source that retries a delegate source a bounded number of
/// times before giving up.
///
/// Success and cancellation surface directly; after `max_tries` failures
/// the future fails with a wrapping error carrying the last cause.
pub struct RetryingChannelSource<C: ?Sized> {
    delegate: Arc<dyn ChannelSource<Channel = C>>,
    max_tries: u32,
}

impl<C: ?Sized> RetryingChannelSource<C> {
    /// Wraps `delegate` with up to `max_tries` attempts per open.
    ///
    /// # Panics
    ///
    /// Panics when `max_tries` is zero.
    #[must_use]
    pub fn new(delegate: Arc<dyn ChannelSource<Channel = C>>, max_tries: u32) -> Self {
        assert!(max_tries >= 1, "max_tries must be at least 1");
        Self {
            delegate,
            max_tries,
        }
    }
}

impl<C> ChannelSource for RetryingChannelSource<C>
where
    C: ?Sized + Send + Sync + 'static,
{
    type Channel = C;

    fn open(
        &self,
        open_listener: Option<Arc<dyn ChannelListener<C>>>,
    ) -> IoFuture<Arc<C>> {
        let sink = FutureResult::new();
        let state = Arc::new(RetryState {
            delegate: Arc::clone(&self.delegate),
            open_listener,
            sink: sink.clone(),
            remaining: AtomicU32::new(self.max_tries),
            max_tries: self.max_tries,
            current: Mutex::new(None),
        });
        let for_cancel = Arc::clone(&state);
        sink.set_cancel_handler(Arc::new(move || {
            if let Some(attempt) = for_cancel.current.lock().clone() {
                attempt.cancel();
            }
        }));
        RetryState::try_one(&state);
        sink.io_future()
    }
}

/// A channel source producing in-memory pipe stream pairs.
///
/// Each `open` creates a connected pair, hands one end to the configured
/// acceptor listener and resolves the future with the other. Useful for
/// loopback transports and tests.
pub struct PipeChannelSource {
    options: OptionMap,
    acceptor: Arc<dyn ChannelListener<dyn StreamChannel>>,
}

impl PipeChannelSource {
    /// Creates a pipe source delivering accepted ends to `acceptor`.
    #[must_use]
    pub fn new(
        options: OptionMap,
        acceptor: Arc<dyn ChannelListener<dyn StreamChannel>>,
    ) -> Self {
        Self { options, acceptor }
    }
}

impl ChannelSource for PipeChannelSource {
    type Channel = dyn StreamChannel;

    fn open(
        &self,
        open_listener: Option<Arc<dyn ChannelListener<dyn StreamChannel>>>,
    ) -> IoFuture<Arc<dyn StreamChannel>> {
        let (local, accepted) = crate::channels::pipe::stream_pair(&self.options);
        let accepted: Arc<dyn StreamChannel> = accepted;
        invoke_channel_listener(&accepted, self.acceptor.as_ref());

        let local: Arc<dyn StreamChannel> = local;
        if let Some(listener) = open_listener {
            invoke_channel_listener(&local, listener.as_ref());
        }
        let sink = FutureResult::new();
        sink.set_result(local);
        sink.io_future()
    }
}
