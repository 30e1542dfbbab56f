//! Evio: a readiness-based non-blocking network I/O framework.
//!
//! # Overview
//!
//! Evio is a portable abstraction layer over readiness-based socket I/O.
//! Applications compose stream- and message-oriented channels, attach event
//! listeners, express asynchronous connection attempts as explicit futures,
//! and convert readiness into bounded blocking operations with timeouts,
//! all without paying for a thread per connection.
//!
//! # Core Guarantees
//!
//! - **Single-assignment futures**: every [`future::IoFuture`] leaves its
//!   waiting state exactly once; every notifier fires exactly once
//! - **Atomic listener slots**: listeners are replaced only through
//!   setters; an invocation sees the old or the new listener, never a torn
//!   value, and never fires again after close
//! - **Non-blocking by default**: blocking is confined to the explicit
//!   `wait`/`await_*` operations and the blocking adapter
//! - **Contained listener failures**: a panicking listener is logged and
//!   isolated, never propagated into the dispatcher
//! - **Fail-safe close**: wrapper construction failures close the wrapped
//!   channel before the error propagates
//!
//! # Module Structure
//!
//! - [`buffer`]: the `ByteBuffer` cursor, slice/fill/scatter helpers,
//!   string codecs and the hex dumper
//! - [`options`]: typed option keys and the immutable option map
//! - [`future`]: the asynchronous-result object, notifiers, chaining and
//!   cancellation
//! - [`listener`]: listener traits, atomic slots, delegating setters and
//!   executor dispatch
//! - [`channels`]: channel capability traits, the in-memory pipe provider,
//!   the blocking adapter and the length-framed message overlay
//! - [`connect`]: channel sources, connectors, destinations and the
//!   retrying source
//! - [`ssl`]: the TLS engine oracle and the TLS overlay channel
//! - [`executor`]: task submission with trivial direct/null executors
//! - [`error`]: the error taxonomy
//! - [`util`]: safe-close helpers and stock listeners/notifiers
//!
//! # Example
//!
//! ```
//! use evio::buffer::ByteBuffer;
//! use evio::channels::framed::{install_message_reader, FramedMessageWriter};
//! use evio::channels::pipe;
//! use evio::channels::WritableMessageChannel;
//! use evio::options::OptionMap;
//!
//! let options = OptionMap::empty();
//! let (left, right) = pipe::stream_pair(&options);
//! let handler = install_message_reader(right, &options);
//! # let _ = handler;
//! let writer = FramedMessageWriter::new(left, &options);
//! writer.send(&mut ByteBuffer::from_slice(b"hello")).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]

pub mod buffer;
pub mod channels;
pub mod connect;
pub mod error;
pub mod executor;
pub mod future;
pub mod listener;
pub mod options;
pub mod ssl;
pub mod tracing_compat;
pub mod util;

// Re-exports for convenient access to core types
pub use buffer::ByteBuffer;
pub use channels::{ReadResult, StreamChannel, StreamSinkChannel, StreamSourceChannel};
pub use error::{Error, ErrorKind, Result};
pub use future::{Cancellable, FutureResult, IoFuture, Status};
pub use listener::{ChannelListener, ListenerSetter};
pub use options::OptionMap;
