//! Blocking adapters over readiness channels.
//!
//! [`BlockingByteChannel`] wraps a stream channel and exposes blocking
//! byte-channel operations bounded by independent read and write timeouts.
//! The free functions at the bottom are the untimed and timed blocking
//! helpers usable with any channel advertising the required capabilities.
//!
//! A timeout of zero means "wait indefinitely". Timeouts are normalized to
//! milliseconds; a positive sub-millisecond timeout is clamped up to 1 ms.
//! The setters mutate atomically and take effect on the next blocking call.

use super::{
    ReadResult, ReadableMessageChannel, StreamChannel, StreamSinkChannel,
    StreamSourceChannel, SuspendableWriteChannel,
    WritableMessageChannel,
};
use crate::buffer::{any_has_remaining, ByteBuffer};
use crate::error::{Error, ErrorKind, Result};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn timeout_millis(timeout: Duration) -> u64 {
    if timeout.is_zero() {
        0
    } else {
        u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1)
    }
}

/// A blocking wrapper for a stream channel.
///
/// Read and write operations block until some data can be transferred; once
/// any amount moves, the operation returns.
pub struct BlockingByteChannel {
    delegate: Arc<dyn StreamChannel>,
    /// Milliseconds; zero waits forever.
    read_timeout: AtomicU64,
    write_timeout: AtomicU64,
}

impl BlockingByteChannel {
    /// Wraps `delegate` with no timeouts (wait indefinitely).
    #[must_use]
    pub fn new(delegate: Arc<dyn StreamChannel>) -> Self {
        Self {
            delegate,
            read_timeout: AtomicU64::new(0),
            write_timeout: AtomicU64::new(0),
        }
    }

    /// Wraps `delegate` with the given read and write timeouts.
    #[must_use]
    pub fn with_timeouts(
        delegate: Arc<dyn StreamChannel>,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        let channel = Self::new(delegate);
        channel.set_read_timeout(read_timeout);
        channel.set_write_timeout(write_timeout);
        channel
    }

    /// Sets the read timeout; takes effect on the next blocking read.
    pub fn set_read_timeout(&self, timeout: Duration) {
        self.read_timeout
            .store(timeout_millis(timeout), Ordering::SeqCst);
    }

    /// Sets the write timeout; takes effect on the next blocking write.
    pub fn set_write_timeout(&self, timeout: Duration) {
        self.write_timeout
            .store(timeout_millis(timeout), Ordering::SeqCst);
    }

    /// Returns true until the underlying channel is closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.delegate.is_open()
    }

    /// Closes the underlying channel.
    ///
    /// # Errors
    ///
    /// Propagates the underlying close failure.
    pub fn close(&self) -> Result<()> {
        self.delegate.close()
    }

    /// Blocking read; transfers at least one byte unless EOF or the
    /// destination is full.
    ///
    /// # Errors
    ///
    /// Fails with *read-timeout* when the read timeout elapses first.
    pub fn read(&self, dst: &mut ByteBuffer) -> Result<ReadResult> {
        let timeout = self.read_timeout.load(Ordering::SeqCst);
        if timeout == 0 {
            loop {
                match self.delegate.read(dst)? {
                    ReadResult::WouldBlock if dst.has_remaining() => {
                        self.delegate.await_readable()?;
                    }
                    ReadResult::WouldBlock => return Ok(ReadResult::Bytes(0)),
                    other => return Ok(other),
                }
            }
        }
        let deadline = Instant::now() + Duration::from_millis(timeout);
        loop {
            match self.delegate.read(dst)? {
                ReadResult::WouldBlock if dst.has_remaining() => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::with_context(ErrorKind::ReadTimeout, "read timed out"));
                    }
                    self.delegate.await_readable_for(deadline - now)?;
                }
                ReadResult::WouldBlock => return Ok(ReadResult::Bytes(0)),
                other => return Ok(other),
            }
        }
    }

    /// Blocking scattering read.
    ///
    /// # Errors
    ///
    /// As [`read`](Self::read).
    pub fn read_scatter(&self, dsts: &mut [ByteBuffer]) -> Result<ReadResult> {
        let timeout = self.read_timeout.load(Ordering::SeqCst);
        let deadline =
            (timeout != 0).then(|| Instant::now() + Duration::from_millis(timeout));
        loop {
            match self.delegate.read_scatter(dsts)? {
                ReadResult::WouldBlock if any_has_remaining(dsts) => match deadline {
                    None => self.delegate.await_readable()?,
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            return Err(Error::with_context(
                                ErrorKind::ReadTimeout,
                                "read timed out",
                            ));
                        }
                        self.delegate.await_readable_for(deadline - now)?;
                    }
                },
                ReadResult::WouldBlock => return Ok(ReadResult::Bytes(0)),
                other => return Ok(other),
            }
        }
    }

    /// Blocking write; transfers at least one byte.
    ///
    /// # Errors
    ///
    /// Fails with *write-timeout* when the write timeout elapses first.
    pub fn write(&self, src: &mut ByteBuffer) -> Result<usize> {
        let timeout = self.write_timeout.load(Ordering::SeqCst);
        let deadline =
            (timeout != 0).then(|| Instant::now() + Duration::from_millis(timeout));
        loop {
            let written = self.delegate.write(src)?;
            if written > 0 || !src.has_remaining() {
                return Ok(written);
            }
            match deadline {
                None => self.delegate.await_writable()?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::with_context(
                            ErrorKind::WriteTimeout,
                            "write timed out",
                        ));
                    }
                    self.delegate.await_writable_for(deadline - now)?;
                }
            }
        }
    }

    /// Blocking gathering write; transfers at least one byte.
    ///
    /// # Errors
    ///
    /// As [`write`](Self::write).
    pub fn write_gather(&self, srcs: &mut [ByteBuffer]) -> Result<usize> {
        let timeout = self.write_timeout.load(Ordering::SeqCst);
        let deadline =
            (timeout != 0).then(|| Instant::now() + Duration::from_millis(timeout));
        loop {
            let written = self.delegate.write_gather(srcs)?;
            if written > 0 || !any_has_remaining(srcs) {
                return Ok(written);
            }
            match deadline {
                None => self.delegate.await_writable()?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::with_context(
                            ErrorKind::WriteTimeout,
                            "write timed out",
                        ));
                    }
                    self.delegate.await_writable_for(deadline - now)?;
                }
            }
        }
    }

    /// Blocking flush, bounded by the write timeout.
    ///
    /// # Errors
    ///
    /// Fails with *write-timeout* when the flush does not complete in time.
    pub fn flush(&self) -> Result<()> {
        let timeout = self.write_timeout.load(Ordering::SeqCst);
        if timeout == 0 {
            return flush_blocking(&*self.delegate);
        }
        let deadline = Instant::now() + Duration::from_millis(timeout);
        while !self.delegate.flush()? {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::with_context(ErrorKind::WriteTimeout, "flush timed out"));
            }
            self.delegate.await_writable_for(deadline - now)?;
        }
        Ok(())
    }
}

impl io::Read for BlockingByteChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut dst = ByteBuffer::allocate(buf.len());
        match BlockingByteChannel::read(self, &mut dst).map_err(io::Error::from)? {
            ReadResult::Bytes(n) => {
                dst.flip();
                dst.get_slice(&mut buf[..n]).map_err(io::Error::from)?;
                Ok(n)
            }
            ReadResult::Eof | ReadResult::WouldBlock => Ok(0),
        }
    }
}

impl io::Write for BlockingByteChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut src = ByteBuffer::from_slice(buf);
        BlockingByteChannel::write(self, &mut src).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        BlockingByteChannel::flush(self).map_err(io::Error::from)
    }
}

impl std::fmt::Debug for BlockingByteChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingByteChannel")
            .field("read_timeout_ms", &self.read_timeout.load(Ordering::SeqCst))
            .field("write_timeout_ms", &self.write_timeout.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Blocks until the channel's buffered data is fully pushed out.
///
/// # Errors
///
/// Propagates channel failures.
pub fn flush_blocking<C>(channel: &C) -> Result<()>
where
    C: SuspendableWriteChannel + ?Sized,
{
    while !channel.flush()? {
        channel.await_writable()?;
    }
    Ok(())
}

/// Blocks until the channel's write side is fully shut down.
///
/// # Errors
///
/// Propagates channel failures.
pub fn shutdown_writes_blocking<C>(channel: &C) -> Result<()>
where
    C: SuspendableWriteChannel + ?Sized,
{
    while !channel.shutdown_writes()? {
        channel.await_writable()?;
    }
    Ok(())
}

/// Blocking read: retries until bytes arrive, EOF, or the buffer is full.
///
/// # Errors
///
/// Propagates channel failures.
pub fn read_blocking<C>(channel: &C, dst: &mut ByteBuffer) -> Result<ReadResult>
where
    C: StreamSourceChannel + ?Sized,
{
    loop {
        match channel.read(dst)? {
            ReadResult::WouldBlock if dst.has_remaining() => channel.await_readable()?,
            ReadResult::WouldBlock => return Ok(ReadResult::Bytes(0)),
            other => return Ok(other),
        }
    }
}

/// Blocking read bounded by one timed wait: on "not ready" it waits up to
/// `timeout` and retries once.
///
/// # Errors
///
/// Propagates channel failures.
pub fn read_blocking_timeout<C>(
    channel: &C,
    dst: &mut ByteBuffer,
    timeout: Duration,
) -> Result<ReadResult>
where
    C: StreamSourceChannel + ?Sized,
{
    match channel.read(dst)? {
        ReadResult::WouldBlock if dst.has_remaining() => {
            channel.await_readable_for(timeout)?;
            channel.read(dst)
        }
        other => Ok(other),
    }
}

/// Blocking write: loops until the whole buffer is written.
///
/// # Errors
///
/// Propagates channel failures.
pub fn write_blocking<C>(channel: &C, src: &mut ByteBuffer) -> Result<usize>
where
    C: StreamSinkChannel + ?Sized,
{
    let mut total = 0;
    while src.has_remaining() {
        let written = channel.write(src)?;
        if written == 0 {
            channel.await_writable()?;
        } else {
            total += written;
        }
    }
    Ok(total)
}

/// Blocking write bounded by `timeout`; returns the bytes written, which
/// may be fewer than requested when the timeout elapses.
///
/// # Errors
///
/// Propagates channel failures.
pub fn write_blocking_timeout<C>(
    channel: &C,
    src: &mut ByteBuffer,
    timeout: Duration,
) -> Result<usize>
where
    C: StreamSinkChannel + ?Sized,
{
    let deadline = Instant::now() + timeout;
    let mut total = 0;
    while src.has_remaining() {
        let written = channel.write(src)?;
        if written == 0 {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            channel.await_writable_for(deadline - now)?;
        } else {
            total += written;
        }
    }
    Ok(total)
}

/// Blocking send: waits for writability until the message is accepted.
///
/// # Errors
///
/// Propagates channel failures, including *oversized-message*.
pub fn send_blocking<C>(channel: &C, msg: &mut ByteBuffer) -> Result<()>
where
    C: WritableMessageChannel + ?Sized,
{
    while !channel.send(msg)? {
        channel.await_writable()?;
    }
    Ok(())
}

/// Blocking send bounded by `timeout`; returns whether the message was
/// accepted.
///
/// # Errors
///
/// Propagates channel failures, including *oversized-message*.
pub fn send_blocking_timeout<C>(
    channel: &C,
    msg: &mut ByteBuffer,
    timeout: Duration,
) -> Result<bool>
where
    C: WritableMessageChannel + ?Sized,
{
    let deadline = Instant::now() + timeout;
    loop {
        if channel.send(msg)? {
            return Ok(true);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        channel.await_writable_for(deadline - now)?;
    }
}

/// Blocking receive: waits for readability until a message arrives or EOF.
///
/// # Errors
///
/// Propagates channel failures.
pub fn receive_blocking<C>(channel: &C, dst: &mut ByteBuffer) -> Result<ReadResult>
where
    C: ReadableMessageChannel + ?Sized,
{
    loop {
        match channel.receive(dst)? {
            ReadResult::WouldBlock => channel.await_readable()?,
            other => return Ok(other),
        }
    }
}

/// Blocking receive bounded by one timed wait.
///
/// # Errors
///
/// Propagates channel failures.
pub fn receive_blocking_timeout<C>(
    channel: &C,
    dst: &mut ByteBuffer,
    timeout: Duration,
) -> Result<ReadResult>
where
    C: ReadableMessageChannel + ?Sized,
{
    match channel.receive(dst)? {
        ReadResult::WouldBlock => {
            channel.await_readable_for(timeout)?;
            channel.receive(dst)
        }
        other => Ok(other),
    }
}
