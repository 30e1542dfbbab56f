//! Channel contracts and channel composition.
//!
//! A channel is a resource with an open/closed lifecycle, optional half-open
//! directions and up to three listener slots (read-ready, write-ready,
//! close). Concrete channels advertise exactly the capabilities they
//! implement by implementing the corresponding traits:
//!
//! | Trait | Capability |
//! |-------|------------|
//! | [`CloseableChannel`] | lifecycle + close listener |
//! | [`SuspendableReadChannel`] | read suspension, `await_readable` |
//! | [`SuspendableWriteChannel`] | write suspension, `flush`, `shutdown_writes`, `await_writable` |
//! | [`StreamSourceChannel`] | non-blocking byte reads (single + scatter) |
//! | [`StreamSinkChannel`] | non-blocking byte writes (single + gather) |
//! | [`StreamChannel`] | both stream directions |
//! | [`ReadableMessageChannel`] / [`WritableMessageChannel`] | message-boundary transfers |
//! | [`BoundChannel`] / [`ConnectedChannel`] | local / peer addresses |
//!
//! Non-blocking transfers report [`ReadResult::WouldBlock`] (never consuming
//! bytes) instead of blocking; blocking is confined to the `await_*` calls
//! and the [`blocking`] adapter. After a peer half-close, reads return
//! [`ReadResult::Eof`] until close; after `shutdown_writes` completes,
//! writes fail with *closed*.
//!
//! Every listener slot is mutated only through its setter, and a close is
//! dispatched exactly once, after which all slots are terminal no-ops.

pub mod blocking;
pub mod framed;
pub mod pipe;

use crate::buffer::ByteBuffer;
use crate::error::Result;
use crate::listener::ListenerSetter;
use crate::util::Close;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of a non-blocking read-side transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadResult {
    /// Bytes were transferred (a whole message, for message channels).
    Bytes(usize),
    /// The channel is not ready; nothing was consumed.
    WouldBlock,
    /// The peer has shut down its write side; no more data will arrive.
    Eof,
}

impl ReadResult {
    /// Returns the transferred byte count, zero for the other outcomes.
    #[must_use]
    pub const fn count(self) -> usize {
        match self {
            Self::Bytes(n) => n,
            Self::WouldBlock | Self::Eof => 0,
        }
    }
}

/// A channel with an open/closed lifecycle and a close listener slot.
pub trait CloseableChannel: Close {
    /// Returns true until the channel is closed.
    fn is_open(&self) -> bool;

    /// Returns the setter for the close listener.
    ///
    /// The close listener fires exactly once; afterwards every slot on the
    /// channel ignores further `set` calls.
    fn close_setter(&self) -> Arc<dyn ListenerSetter<dyn CloseableChannel>>;
}

/// Read-direction suspension and bounded waiting.
pub trait SuspendableReadChannel: CloseableChannel {
    /// Stops read-readiness dispatch; buffered readiness may be coalesced
    /// or dropped while suspended.
    fn suspend_reads(&self);

    /// Re-enables read-readiness dispatch, re-checking readiness
    /// synchronously before re-arming.
    fn resume_reads(&self);

    /// Shuts down the read side.
    ///
    /// # Errors
    ///
    /// Returns the underlying failure, if any.
    fn shutdown_reads(&self) -> Result<()>;

    /// Blocks until the channel is readable.
    ///
    /// # Errors
    ///
    /// Fails with *closed* when the channel closes while waiting.
    fn await_readable(&self) -> Result<()>;

    /// Blocks until readable or `timeout` elapses; returns `false` on
    /// timeout.
    ///
    /// # Errors
    ///
    /// Fails with *closed* when the channel closes while waiting.
    fn await_readable_for(&self, timeout: Duration) -> Result<bool>;
}

/// Write-direction suspension, flushing and bounded waiting.
pub trait SuspendableWriteChannel: CloseableChannel {
    /// Stops write-readiness dispatch.
    fn suspend_writes(&self);

    /// Re-enables write-readiness dispatch, re-checking readiness
    /// synchronously before re-arming.
    fn resume_writes(&self);

    /// Pushes out any buffered data without blocking; `false` means not
    /// done yet.
    ///
    /// # Errors
    ///
    /// Returns the underlying failure, if any.
    fn flush(&self) -> Result<bool>;

    /// Shuts down the write side without blocking; `false` means buffered
    /// data still has to drain. Once complete, further writes fail with
    /// *closed*.
    ///
    /// # Errors
    ///
    /// Returns the underlying failure, if any.
    fn shutdown_writes(&self) -> Result<bool>;

    /// Blocks until the channel is writable.
    ///
    /// # Errors
    ///
    /// Fails with *closed* when the channel closes while waiting.
    fn await_writable(&self) -> Result<()>;

    /// Blocks until writable or `timeout` elapses; returns `false` on
    /// timeout.
    ///
    /// # Errors
    ///
    /// Fails with *closed* when the channel closes while waiting.
    fn await_writable_for(&self, timeout: Duration) -> Result<bool>;
}

/// Non-blocking byte reads.
pub trait StreamSourceChannel: SuspendableReadChannel {
    /// Reads into `dst` up to its remaining capacity.
    ///
    /// # Errors
    ///
    /// Fails with *closed* after the read side is shut down, or with the
    /// underlying failure.
    fn read(&self, dst: &mut ByteBuffer) -> Result<ReadResult>;

    /// Scattering read across `dsts` in order.
    ///
    /// # Errors
    ///
    /// As [`read`](Self::read).
    fn read_scatter(&self, dsts: &mut [ByteBuffer]) -> Result<ReadResult>;

    /// Returns the setter for the read-ready listener.
    fn read_setter(&self) -> Arc<dyn ListenerSetter<dyn StreamSourceChannel>>;
}

/// Non-blocking byte writes.
pub trait StreamSinkChannel: SuspendableWriteChannel {
    /// Writes from `src`, returning the bytes consumed; `0` means not
    /// ready.
    ///
    /// # Errors
    ///
    /// Fails with *closed* after `shutdown_writes`, or with the underlying
    /// failure.
    fn write(&self, src: &mut ByteBuffer) -> Result<usize>;

    /// Gathering write from `srcs` in order.
    ///
    /// # Errors
    ///
    /// As [`write`](Self::write).
    fn write_gather(&self, srcs: &mut [ByteBuffer]) -> Result<usize>;

    /// Returns the setter for the write-ready listener.
    fn write_setter(&self) -> Arc<dyn ListenerSetter<dyn StreamSinkChannel>>;
}

/// Both stream directions. Implemented automatically.
pub trait StreamChannel: StreamSourceChannel + StreamSinkChannel {}

impl<T: StreamSourceChannel + StreamSinkChannel + ?Sized> StreamChannel for T {}

/// A channel bound to a local address.
pub trait BoundChannel<A>: CloseableChannel {
    /// Returns the local address.
    fn local_address(&self) -> A;
}

/// A channel connected to a peer.
pub trait ConnectedChannel<A>: BoundChannel<A> {
    /// Returns the peer address.
    fn peer_address(&self) -> A;
}

/// Message-boundary writes; each `send` is all-or-nothing.
pub trait WritableMessageChannel: SuspendableWriteChannel {
    /// Sends one message; `false` means the channel was not ready and the
    /// message was not consumed.
    ///
    /// # Errors
    ///
    /// Fails with *oversized-message* when the message exceeds the outbound
    /// maximum (nothing reaches the wire), or *closed*.
    fn send(&self, msg: &mut ByteBuffer) -> Result<bool>;

    /// Sends the concatenation of `msgs` as one message.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send).
    fn send_gather(&self, msgs: &mut [ByteBuffer]) -> Result<bool>;

    /// Returns the setter for the write-ready listener.
    fn write_setter(&self) -> Arc<dyn ListenerSetter<dyn WritableMessageChannel>>;
}

/// Message-boundary reads; at most one message per call.
pub trait ReadableMessageChannel: SuspendableReadChannel {
    /// Receives at most one message into `dst`.
    ///
    /// # Errors
    ///
    /// Fails with *closed* or the underlying failure.
    fn receive(&self, dst: &mut ByteBuffer) -> Result<ReadResult>;

    /// Receives at most one message scattered across `dsts`.
    ///
    /// # Errors
    ///
    /// As [`receive`](Self::receive).
    fn receive_scatter(&self, dsts: &mut [ByteBuffer]) -> Result<ReadResult>;

    /// Returns the setter for the read-ready listener.
    fn receive_setter(&self) -> Arc<dyn ListenerSetter<dyn ReadableMessageChannel>>;
}
