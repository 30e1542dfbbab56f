//! In-memory connected stream-channel pair.
//!
//! [`stream_pair`] returns two [`PipeStreamChannel`]s joined by a pair of
//! bounded byte queues, one per direction. The pair implements the full
//! stream-channel contract (listeners, suspension, half-close, bounded
//! waiting and close) without a selector: readiness callbacks run inline on
//! the thread that made the channel ready, and dispatch for one direction is
//! serialized by a per-direction guard, so a listener is never re-entered
//! for the same direction.
//!
//! The queue capacity per direction is taken from the
//! [`RECEIVE_BUFFER`](crate::options::RECEIVE_BUFFER) option.

use super::{
    CloseableChannel, ReadResult, StreamSinkChannel, StreamSourceChannel,
    SuspendableReadChannel, SuspendableWriteChannel,
};
use crate::buffer::ByteBuffer;
use crate::error::{Error, Result};
use crate::listener::{invoke_channel_listener, ListenerCell, ListenerSetter};
use crate::options::{OptionMap, RECEIVE_BUFFER};
use crate::tracing_compat::trace;
use crate::util::Close;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

const DEFAULT_CAPACITY: usize = 64 * 1024;

struct DirState {
    queue: VecDeque<u8>,
    capacity: usize,
    /// Producer shut its write side down; consumer drains then sees EOF.
    eof: bool,
    /// Direction torn down hard; producer writes fail, consumer drains then
    /// sees EOF.
    closed: bool,
    read_suspended: bool,
    write_suspended: bool,
    read_dispatching: bool,
    write_dispatching: bool,
    /// Bumped whenever the consumer side gains readiness.
    read_events: u64,
    /// Bumped whenever the producer side gains readiness.
    write_events: u64,
}

impl DirState {
    fn readable(&self) -> bool {
        !self.queue.is_empty() || self.eof || self.closed
    }

    fn writable(&self) -> bool {
        self.queue.len() < self.capacity && !self.eof && !self.closed
    }
}

struct Direction {
    state: Mutex<DirState>,
    readable: Condvar,
    writable: Condvar,
}

impl Direction {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(DirState {
                queue: VecDeque::new(),
                capacity,
                eof: false,
                closed: false,
                read_suspended: false,
                write_suspended: false,
                read_dispatching: false,
                write_dispatching: false,
                read_events: 0,
                write_events: 0,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        })
    }
}

/// One end of an in-memory stream-channel pair; see the [module docs](self).
pub struct PipeStreamChannel {
    /// Peer writes here; this end reads.
    incoming: Arc<Direction>,
    /// This end writes here; the peer reads.
    outgoing: Arc<Direction>,
    read_cell: Arc<ListenerCell<dyn StreamSourceChannel>>,
    write_cell: Arc<ListenerCell<dyn StreamSinkChannel>>,
    close_cell: Arc<ListenerCell<dyn CloseableChannel>>,
    closed: AtomicBool,
    self_ref: OnceLock<Weak<PipeStreamChannel>>,
    peer: OnceLock<Weak<PipeStreamChannel>>,
}

/// Creates a connected pair of pipe stream channels.
///
/// Data written to one channel is readable from the other. The per-direction
/// queue capacity comes from the `RECEIVE_BUFFER` option (64 KiB default).
#[must_use]
pub fn stream_pair(options: &OptionMap) -> (Arc<PipeStreamChannel>, Arc<PipeStreamChannel>) {
    let capacity = options.get_or(&RECEIVE_BUFFER, DEFAULT_CAPACITY).max(1);
    let a_to_b = Direction::new(capacity);
    let b_to_a = Direction::new(capacity);

    let a = PipeStreamChannel::new(Arc::clone(&b_to_a), Arc::clone(&a_to_b));
    let b = PipeStreamChannel::new(a_to_b, b_to_a);
    a.peer.set(Arc::downgrade(&b)).ok();
    b.peer.set(Arc::downgrade(&a)).ok();
    (a, b)
}

impl PipeStreamChannel {
    fn new(incoming: Arc<Direction>, outgoing: Arc<Direction>) -> Arc<Self> {
        let channel = Arc::new(Self {
            incoming,
            outgoing,
            read_cell: Arc::new(ListenerCell::new()),
            write_cell: Arc::new(ListenerCell::new()),
            close_cell: Arc::new(ListenerCell::new()),
            closed: AtomicBool::new(false),
            self_ref: OnceLock::new(),
            peer: OnceLock::new(),
        });
        channel.self_ref.set(Arc::downgrade(&channel)).ok();
        channel
    }

    fn self_arc(&self) -> Option<Arc<Self>> {
        self.self_ref.get().and_then(Weak::upgrade)
    }

    fn peer_arc(&self) -> Option<Arc<Self>> {
        self.peer.get().and_then(Weak::upgrade)
    }

    /// Serialized read-readiness dispatch for `channel`'s incoming
    /// direction. Loops only while new readiness events arrive during an
    /// invocation, so a non-consuming listener cannot spin.
    fn dispatch_read(channel: &Arc<Self>) {
        let dir = &channel.incoming;
        {
            let mut state = dir.state.lock();
            if state.read_dispatching {
                return;
            }
            state.read_dispatching = true;
        }
        loop {
            let generation = {
                let state = dir.state.lock();
                if state.read_suspended || !state.readable() {
                    break;
                }
                state.read_events
            };
            let Some(listener) = channel.read_cell.get() else {
                break;
            };
            let as_source: Arc<dyn StreamSourceChannel> = Arc::clone(channel) as _;
            invoke_channel_listener(&as_source, listener.as_ref());
            let state = dir.state.lock();
            if state.read_events == generation {
                break;
            }
        }
        dir.state.lock().read_dispatching = false;
    }

    /// Serialized write-readiness dispatch for `channel`'s outgoing
    /// direction.
    fn dispatch_write(channel: &Arc<Self>) {
        let dir = &channel.outgoing;
        {
            let mut state = dir.state.lock();
            if state.write_dispatching {
                return;
            }
            state.write_dispatching = true;
        }
        loop {
            let generation = {
                let state = dir.state.lock();
                if state.write_suspended || !state.writable() {
                    break;
                }
                state.write_events
            };
            let Some(listener) = channel.write_cell.get() else {
                break;
            };
            let as_sink: Arc<dyn StreamSinkChannel> = Arc::clone(channel) as _;
            invoke_channel_listener(&as_sink, listener.as_ref());
            let state = dir.state.lock();
            if state.write_events == generation {
                break;
            }
        }
        dir.state.lock().write_dispatching = false;
    }

    fn notify_peer_readable(&self) {
        if let Some(peer) = self.peer_arc() {
            Self::dispatch_read(&peer);
        }
    }

    fn notify_peer_writable(&self) {
        if let Some(peer) = self.peer_arc() {
            Self::dispatch_write(&peer);
        }
    }

    fn read_into(&self, dst: &mut ByteBuffer) -> Result<usize> {
        if dst.remaining() == 0 {
            return Ok(0);
        }
        let taken = {
            let mut state = self.incoming.state.lock();
            let n = state.queue.len().min(dst.remaining());
            let bytes: Vec<u8> = state.queue.drain(..n).collect();
            if n > 0 {
                state.write_events += 1;
                self.incoming.writable.notify_all();
            }
            bytes
        };
        if taken.is_empty() {
            return Ok(0);
        }
        dst.put_slice(&taken)?;
        Ok(taken.len())
    }
}

impl Close for PipeStreamChannel {
    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        trace!("closing pipe channel");
        for dir in [&self.incoming, &self.outgoing] {
            let mut state = dir.state.lock();
            state.closed = true;
            state.read_events += 1;
            state.write_events += 1;
            dir.readable.notify_all();
            dir.writable.notify_all();
        }
        // The peer observes EOF on its read side and failure on writes.
        self.notify_peer_readable();
        if let Some(this) = self.self_arc() {
            let as_closeable: Arc<dyn CloseableChannel> = this as _;
            self.close_cell.invoke(&as_closeable);
        }
        self.read_cell.terminate();
        self.write_cell.terminate();
        self.close_cell.terminate();
        Ok(())
    }
}

impl CloseableChannel for PipeStreamChannel {
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn close_setter(&self) -> Arc<dyn ListenerSetter<dyn CloseableChannel>> {
        Arc::clone(&self.close_cell) as _
    }
}

impl SuspendableReadChannel for PipeStreamChannel {
    fn suspend_reads(&self) {
        self.incoming.state.lock().read_suspended = true;
    }

    fn resume_reads(&self) {
        {
            let mut state = self.incoming.state.lock();
            state.read_suspended = false;
            state.read_events += 1;
        }
        // Readiness gathered while suspended may have been coalesced; check
        // again now.
        if let Some(this) = self.self_arc() {
            Self::dispatch_read(&this);
        }
    }

    fn shutdown_reads(&self) -> Result<()> {
        let mut state = self.incoming.state.lock();
        state.closed = true;
        state.queue.clear();
        state.write_events += 1;
        self.incoming.readable.notify_all();
        self.incoming.writable.notify_all();
        Ok(())
    }

    fn await_readable(&self) -> Result<()> {
        let mut state = self.incoming.state.lock();
        while !state.readable() {
            self.incoming.readable.wait(&mut state);
        }
        Ok(())
    }

    fn await_readable_for(&self, timeout: Duration) -> Result<bool> {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.incoming.state.lock();
        while !state.readable() {
            if self
                .incoming
                .readable
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return Ok(state.readable());
            }
        }
        Ok(true)
    }
}

impl StreamSourceChannel for PipeStreamChannel {
    fn read(&self, dst: &mut ByteBuffer) -> Result<ReadResult> {
        if !self.is_open() {
            return Err(Error::closed());
        }
        let n = self.read_into(dst)?;
        if n > 0 {
            self.notify_peer_writable();
            return Ok(ReadResult::Bytes(n));
        }
        if dst.remaining() == 0 {
            return Ok(ReadResult::Bytes(0));
        }
        let state = self.incoming.state.lock();
        if state.queue.is_empty() && (state.eof || state.closed) {
            Ok(ReadResult::Eof)
        } else {
            Ok(ReadResult::WouldBlock)
        }
    }

    fn read_scatter(&self, dsts: &mut [ByteBuffer]) -> Result<ReadResult> {
        if !self.is_open() {
            return Err(Error::closed());
        }
        let mut total = 0;
        for dst in dsts.iter_mut() {
            total += self.read_into(dst)?;
        }
        if total > 0 {
            self.notify_peer_writable();
            return Ok(ReadResult::Bytes(total));
        }
        if !crate::buffer::any_has_remaining(dsts) {
            return Ok(ReadResult::Bytes(0));
        }
        let state = self.incoming.state.lock();
        if state.queue.is_empty() && (state.eof || state.closed) {
            Ok(ReadResult::Eof)
        } else {
            Ok(ReadResult::WouldBlock)
        }
    }

    fn read_setter(&self) -> Arc<dyn ListenerSetter<dyn StreamSourceChannel>> {
        Arc::clone(&self.read_cell) as _
    }
}

impl SuspendableWriteChannel for PipeStreamChannel {
    fn suspend_writes(&self) {
        self.outgoing.state.lock().write_suspended = true;
    }

    fn resume_writes(&self) {
        {
            let mut state = self.outgoing.state.lock();
            state.write_suspended = false;
            state.write_events += 1;
        }
        if let Some(this) = self.self_arc() {
            Self::dispatch_write(&this);
        }
    }

    fn flush(&self) -> Result<bool> {
        // Writes land in the peer queue directly; nothing to stage.
        Ok(true)
    }

    fn shutdown_writes(&self) -> Result<bool> {
        {
            let mut state = self.outgoing.state.lock();
            if !state.eof {
                state.eof = true;
                state.read_events += 1;
                self.outgoing.readable.notify_all();
                self.outgoing.writable.notify_all();
            }
        }
        self.notify_peer_readable();
        Ok(true)
    }

    fn await_writable(&self) -> Result<()> {
        let mut state = self.outgoing.state.lock();
        while !state.writable() && !state.closed && !state.eof {
            self.outgoing.writable.wait(&mut state);
        }
        Ok(())
    }

    fn await_writable_for(&self, timeout: Duration) -> Result<bool> {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.outgoing.state.lock();
        while !state.writable() && !state.closed && !state.eof {
            if self
                .outgoing
                .writable
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return Ok(state.writable() || state.closed || state.eof);
            }
        }
        Ok(true)
    }
}

impl StreamSinkChannel for PipeStreamChannel {
    fn write(&self, src: &mut ByteBuffer) -> Result<usize> {
        if !self.is_open() {
            return Err(Error::closed());
        }
        let written = {
            let mut state = self.outgoing.state.lock();
            if state.closed || state.eof {
                return Err(Error::closed());
            }
            let space = state.capacity - state.queue.len();
            let n = space.min(src.remaining());
            if n == 0 {
                return Ok(0);
            }
            let bytes = src.take(n)?;
            state.queue.extend(bytes);
            state.read_events += 1;
            self.outgoing.readable.notify_all();
            n
        };
        self.notify_peer_readable();
        Ok(written)
    }

    fn write_gather(&self, srcs: &mut [ByteBuffer]) -> Result<usize> {
        let mut total = 0;
        for src in srcs.iter_mut() {
            if !src.has_remaining() {
                continue;
            }
            let n = self.write(src)?;
            total += n;
            if src.has_remaining() {
                break;
            }
        }
        Ok(total)
    }

    fn write_setter(&self) -> Arc<dyn ListenerSetter<dyn StreamSinkChannel>> {
        Arc::clone(&self.write_cell) as _
    }
}

impl std::fmt::Debug for PipeStreamChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeStreamChannel")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn pair() -> (Arc<PipeStreamChannel>, Arc<PipeStreamChannel>) {
        stream_pair(&OptionMap::empty())
    }

    #[test]
    fn bytes_flow_between_ends() {
        let (a, b) = pair();
        let mut src = ByteBuffer::from_slice(b"ping");
        assert_eq!(a.write(&mut src).unwrap(), 4);

        let mut dst = ByteBuffer::allocate(16);
        assert_eq!(b.read(&mut dst).unwrap(), ReadResult::Bytes(4));
        dst.flip();
        assert_eq!(dst.bytes(), b"ping");
        assert_eq!(b.read(&mut dst).unwrap(), ReadResult::WouldBlock);
    }

    #[test]
    fn empty_read_would_block_consumes_nothing() {
        let (_a, b) = pair();
        let mut dst = ByteBuffer::allocate(8);
        assert_eq!(b.read(&mut dst).unwrap(), ReadResult::WouldBlock);
        assert_eq!(dst.position(), 0);
    }

    #[test]
    fn read_listener_fires_on_readiness_edge() {
        let (a, b) = pair();
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);
        b.read_setter().set(Some(Arc::new(
            move |channel: &Arc<dyn StreamSourceChannel>| {
                let mut dst = ByteBuffer::allocate(64);
                let _ = channel.read(&mut dst);
                counted.fetch_add(1, Ordering::SeqCst);
            },
        )));
        let mut src = ByteBuffer::from_slice(b"x");
        a.write(&mut src).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn suspended_reads_coalesce_and_resume_redelivers() {
        let (a, b) = pair();
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);
        b.suspend_reads();
        b.read_setter().set(Some(Arc::new(
            move |channel: &Arc<dyn StreamSourceChannel>| {
                let mut dst = ByteBuffer::allocate(64);
                let _ = channel.read(&mut dst);
                counted.fetch_add(1, Ordering::SeqCst);
            },
        )));
        a.write(&mut ByteBuffer::from_slice(b"one")).unwrap();
        a.write(&mut ByteBuffer::from_slice(b"two")).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        b.resume_reads();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_writes_gives_peer_eof() {
        let (a, b) = pair();
        a.write(&mut ByteBuffer::from_slice(b"end")).unwrap();
        assert!(a.shutdown_writes().unwrap());
        assert!(matches!(
            a.write(&mut ByteBuffer::from_slice(b"no")),
            Err(err) if err.is_closed()
        ));

        let mut dst = ByteBuffer::allocate(8);
        assert_eq!(b.read(&mut dst).unwrap(), ReadResult::Bytes(3));
        assert_eq!(b.read(&mut dst).unwrap(), ReadResult::Eof);
    }

    #[test]
    fn close_fires_close_listener_once() {
        let (a, _b) = pair();
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);
        a.close_setter().set(Some(Arc::new(
            move |_: &Arc<dyn CloseableChannel>| {
                counted.fetch_add(1, Ordering::SeqCst);
            },
        )));
        a.close().unwrap();
        a.close().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!a.is_open());
    }

    #[test]
    fn listener_set_after_close_is_noop() {
        let (a, _b) = pair();
        a.close().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);
        a.read_setter().set(Some(Arc::new(
            move |_: &Arc<dyn StreamSourceChannel>| {
                counted.fetch_add(1, Ordering::SeqCst);
            },
        )));
        a.resume_reads();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn peer_close_reads_buffered_then_eof() {
        let (a, b) = pair();
        a.write(&mut ByteBuffer::from_slice(b"tail")).unwrap();
        a.close().unwrap();
        let mut dst = ByteBuffer::allocate(16);
        assert_eq!(b.read(&mut dst).unwrap(), ReadResult::Bytes(4));
        assert_eq!(b.read(&mut dst).unwrap(), ReadResult::Eof);
        assert!(b.write(&mut ByteBuffer::from_slice(b"x")).is_err());
    }

    #[test]
    fn await_readable_blocks_until_data() {
        let (a, b) = pair();
        let handle = thread::spawn(move || {
            b.await_readable().unwrap();
            let mut dst = ByteBuffer::allocate(8);
            b.read(&mut dst).unwrap()
        });
        thread::sleep(Duration::from_millis(20));
        a.write(&mut ByteBuffer::from_slice(b"go")).unwrap();
        assert_eq!(handle.join().unwrap(), ReadResult::Bytes(2));
    }

    #[test]
    fn await_readable_for_times_out() {
        let (_a, b) = pair();
        let start = std::time::Instant::now();
        assert!(!b.await_readable_for(Duration::from_millis(40)).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn capacity_backpressure_and_write_listener() {
        let options = OptionMap::builder().set(&RECEIVE_BUFFER, 4).build();
        let (a, b) = stream_pair(&options);
        let mut src = ByteBuffer::from_slice(b"abcdef");
        assert_eq!(a.write(&mut src).unwrap(), 4);
        assert_eq!(a.write(&mut src).unwrap(), 0);

        let resumed = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&resumed);
        a.write_setter().set(Some(Arc::new(
            move |_: &Arc<dyn StreamSinkChannel>| {
                counted.fetch_add(1, Ordering::SeqCst);
            },
        )));

        let mut dst = ByteBuffer::allocate(4);
        b.read(&mut dst).unwrap();
        assert_eq!(resumed.load(Ordering::SeqCst), 1);
        assert_eq!(a.write(&mut src).unwrap(), 2);
    }
}
