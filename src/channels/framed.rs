//! Length-framed message overlay over stream channels.
//!
//! Wire format: an unsigned 32-bit big-endian length `L` followed by exactly
//! `L` payload bytes. `L = 0` is a legal zero-byte message.
//!
//! The read side is a listener installed with [`install_message_reader`]; it
//! drives a three-phase state machine (reading-length, reading-body,
//! dispatch) and hands each completed payload to the current
//! [`MessageHandler`] exactly once as a read-only view. A frame length above
//! the configured inbound maximum closes the channel and reports a framing
//! error.
//!
//! The write side is [`FramedMessageWriter`], a
//! [`WritableMessageChannel`] over a stream sink. Each accepted `send`
//! prepends the length prefix; bytes the sink cannot take immediately are
//! held in a staging buffer and drained on the next writability, and no new
//! message is accepted while the staging buffer is non-empty.

use super::{
    CloseableChannel, ReadResult, StreamSinkChannel, StreamSourceChannel,
    SuspendableWriteChannel, WritableMessageChannel,
};
use crate::buffer::ByteBuffer;
use crate::error::{Error, ErrorKind, Result};
use crate::listener::{ChannelListener, DelegatingSetter, ListenerSetter};
use crate::options::{OptionMap, MAX_INBOUND_MESSAGE_SIZE, MAX_OUTBOUND_MESSAGE_SIZE};
use crate::tracing_compat::{debug, trace};
use crate::util::{safe_close, Close};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Consumes messages delivered by the framed reader.
pub trait MessageHandler: Send + Sync {
    /// Called exactly once per decoded message with a read-only payload
    /// view.
    fn handle_message(&self, message: ByteBuffer);

    /// Called when the stream ends cleanly on a frame boundary.
    fn handle_eof(&self) {}

    /// Called when the stream violates the framing protocol; the channel
    /// has already been closed.
    fn handle_framing_error(&self, error: Error) {
        let _ = error;
    }
}

/// Atomically replaceable slot for the user message handler.
///
/// The handler may be set, replaced or cleared at any time; each dispatch
/// uses the handler current at that moment.
#[derive(Default)]
pub struct MessageHandlerSetter {
    slot: Mutex<Option<Arc<dyn MessageHandler>>>,
}

impl MessageHandlerSetter {
    /// Creates an empty setter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the handler; `None` clears it (messages are then dropped).
    pub fn set(&self, handler: Option<Arc<dyn MessageHandler>>) {
        *self.slot.lock() = handler;
    }

    fn get(&self) -> Option<Arc<dyn MessageHandler>> {
        self.slot.lock().clone()
    }
}

enum Phase {
    Length { prefix: [u8; 4], got: usize },
    Body { body: ByteBuffer },
}

impl Phase {
    const fn start() -> Self {
        Self::Length {
            prefix: [0; 4],
            got: 0,
        }
    }
}

enum Step {
    Again,
    Idle,
    Dispatch(ByteBuffer),
    Eof,
    Fail(Error),
}

struct MessageReader {
    max_inbound: usize,
    phase: Mutex<Phase>,
    handler: Arc<MessageHandlerSetter>,
}

impl MessageReader {
    fn step(&self, channel: &Arc<dyn StreamSourceChannel>) -> Step {
        let mut phase = self.phase.lock();
        match &mut *phase {
            Phase::Length { prefix, got } => {
                let mut tmp = ByteBuffer::allocate(4 - *got);
                match channel.read(&mut tmp) {
                    Err(err) => Step::Fail(err),
                    Ok(ReadResult::WouldBlock) => Step::Idle,
                    Ok(ReadResult::Eof) => {
                        if *got == 0 {
                            Step::Eof
                        } else {
                            Step::Fail(Error::with_context(
                                ErrorKind::Framing,
                                "stream ended inside a length prefix",
                            ))
                        }
                    }
                    Ok(ReadResult::Bytes(n)) => {
                        tmp.flip();
                        if tmp.get_slice(&mut prefix[*got..*got + n]).is_err() {
                            return Step::Fail(Error::buffer_underflow());
                        }
                        *got += n;
                        if *got < 4 {
                            return Step::Again;
                        }
                        let length = u32::from_be_bytes(*prefix) as usize;
                        if length > self.max_inbound {
                            return Step::Fail(Error::with_context(
                                ErrorKind::Framing,
                                format!(
                                    "inbound message length {length} exceeds maximum {}",
                                    self.max_inbound
                                ),
                            ));
                        }
                        if length == 0 {
                            *phase = Phase::start();
                            return Step::Dispatch(ByteBuffer::empty());
                        }
                        trace!(length, "reading message body");
                        *phase = Phase::Body {
                            body: ByteBuffer::allocate(length),
                        };
                        Step::Again
                    }
                }
            }
            Phase::Body { body } => match channel.read(body) {
                Err(err) => Step::Fail(err),
                Ok(ReadResult::WouldBlock) => Step::Idle,
                Ok(ReadResult::Eof) => Step::Fail(Error::with_context(
                    ErrorKind::Framing,
                    "stream ended inside a message body",
                )),
                Ok(ReadResult::Bytes(_)) => {
                    if body.has_remaining() {
                        Step::Again
                    } else {
                        let mut complete =
                            std::mem::replace(&mut *phase, Phase::start());
                        match &mut complete {
                            Phase::Body { body } => {
                                body.flip();
                                Step::Dispatch(body.clone())
                            }
                            // We matched Body to get here.
                            Phase::Length { .. } => Step::Idle,
                        }
                    }
                }
            },
        }
    }
}

impl ChannelListener<dyn StreamSourceChannel> for MessageReader {
    fn handle_event(&self, channel: &Arc<dyn StreamSourceChannel>) {
        loop {
            match self.step(channel) {
                Step::Again => {}
                Step::Idle => return,
                Step::Dispatch(message) => {
                    if let Some(handler) = self.handler.get() {
                        handler.handle_message(message);
                    }
                }
                Step::Eof => {
                    if let Some(handler) = self.handler.get() {
                        handler.handle_eof();
                    }
                    return;
                }
                Step::Fail(err) => {
                    debug!(error = %err, "framing failure, closing channel");
                    safe_close(&**channel);
                    if let Some(handler) = self.handler.get() {
                        handler.handle_framing_error(err);
                    }
                    return;
                }
            }
        }
    }
}

/// Installs a framed message reader as the channel's read-ready listener.
///
/// The returned setter controls the user message handler and may be used to
/// change it at any time. Message sizes are bounded by the
/// `MAX_INBOUND_MESSAGE_SIZE` option.
pub fn install_message_reader(
    channel: Arc<dyn StreamSourceChannel>,
    options: &OptionMap,
) -> Arc<MessageHandlerSetter> {
    let handler = Arc::new(MessageHandlerSetter::new());
    let reader = Arc::new(MessageReader {
        max_inbound: options.get_or(&MAX_INBOUND_MESSAGE_SIZE, u32::MAX as usize),
        phase: Mutex::new(Phase::start()),
        handler: Arc::clone(&handler),
    });
    channel.read_setter().set(Some(reader));
    handler
}

/// A writable message channel that length-frames each message onto a stream
/// sink.
pub struct FramedMessageWriter {
    sink: Arc<dyn StreamSinkChannel>,
    max_outbound: usize,
    staging: Mutex<Option<ByteBuffer>>,
    self_ref: Weak<FramedMessageWriter>,
}

impl FramedMessageWriter {
    /// Creates a message writer over `sink`, bounded by the
    /// `MAX_OUTBOUND_MESSAGE_SIZE` option.
    #[must_use]
    pub fn new(sink: Arc<dyn StreamSinkChannel>, options: &OptionMap) -> Arc<Self> {
        let max_outbound = options.get_or(&MAX_OUTBOUND_MESSAGE_SIZE, u32::MAX as usize);
        Arc::new_cyclic(|self_ref| Self {
            sink,
            max_outbound,
            staging: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    /// Drains staged wire bytes; returns whether the staging buffer is now
    /// empty.
    fn drain(&self, staging: &mut Option<ByteBuffer>) -> Result<bool> {
        if let Some(pending) = staging {
            while pending.has_remaining() {
                if self.sink.write(pending)? == 0 {
                    return Ok(false);
                }
            }
            *staging = None;
        }
        Ok(true)
    }

    fn send_frame(&self, total: usize, fill: impl FnOnce(&mut ByteBuffer) -> Result<()>) -> Result<bool> {
        if total > self.max_outbound {
            return Err(Error::with_context(
                ErrorKind::OversizedMessage,
                format!("message length {total} exceeds maximum {}", self.max_outbound),
            ));
        }
        let mut staging = self.staging.lock();
        if !self.drain(&mut staging)? {
            // A previous frame is still in flight; the message is not
            // consumed.
            return Ok(false);
        }
        let mut frame = ByteBuffer::allocate(4 + total);
        frame.put_u32(total as u32)?;
        fill(&mut frame)?;
        frame.flip();
        while frame.has_remaining() {
            if self.sink.write(&mut frame)? == 0 {
                trace!(pending = frame.remaining(), "staging partial frame");
                *staging = Some(frame);
                break;
            }
        }
        Ok(true)
    }

    fn self_arc(&self) -> Option<Arc<Self>> {
        self.self_ref.upgrade()
    }
}

impl Close for FramedMessageWriter {
    fn close(&self) -> Result<()> {
        self.sink.close()
    }
}

impl CloseableChannel for FramedMessageWriter {
    fn is_open(&self) -> bool {
        self.sink.is_open()
    }

    fn close_setter(&self) -> Arc<dyn ListenerSetter<dyn CloseableChannel>> {
        match self.self_arc() {
            Some(this) => Arc::new(DelegatingSetter::new(
                self.sink.close_setter(),
                this as Arc<dyn CloseableChannel>,
            )),
            None => crate::listener::null_setter(),
        }
    }
}

impl SuspendableWriteChannel for FramedMessageWriter {
    fn suspend_writes(&self) {
        self.sink.suspend_writes();
    }

    fn resume_writes(&self) {
        self.sink.resume_writes();
    }

    fn flush(&self) -> Result<bool> {
        let mut staging = self.staging.lock();
        if !self.drain(&mut staging)? {
            return Ok(false);
        }
        self.sink.flush()
    }

    fn shutdown_writes(&self) -> Result<bool> {
        let mut staging = self.staging.lock();
        if !self.drain(&mut staging)? {
            return Ok(false);
        }
        self.sink.shutdown_writes()
    }

    fn await_writable(&self) -> Result<()> {
        self.sink.await_writable()
    }

    fn await_writable_for(&self, timeout: Duration) -> Result<bool> {
        self.sink.await_writable_for(timeout)
    }
}

impl WritableMessageChannel for FramedMessageWriter {
    fn send(&self, msg: &mut ByteBuffer) -> Result<bool> {
        let total = msg.remaining();
        let accepted = self.send_frame(total, |frame| frame.put_buffer(msg))?;
        Ok(accepted)
    }

    fn send_gather(&self, msgs: &mut [ByteBuffer]) -> Result<bool> {
        let total = crate::buffer::total_remaining(msgs) as usize;
        self.send_frame(total, |frame| {
            for msg in msgs.iter_mut() {
                frame.put_buffer(msg)?;
            }
            Ok(())
        })
    }

    fn write_setter(&self) -> Arc<dyn ListenerSetter<dyn WritableMessageChannel>> {
        match self.self_arc() {
            Some(this) => Arc::new(DelegatingSetter::new(
                self.sink.write_setter(),
                this as Arc<dyn WritableMessageChannel>,
            )),
            None => crate::listener::null_setter(),
        }
    }
}

impl std::fmt::Debug for FramedMessageWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedMessageWriter")
            .field("max_outbound", &self.max_outbound)
            .finish_non_exhaustive()
    }
}
