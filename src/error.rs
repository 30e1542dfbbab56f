//! Error types and error handling strategy.
//!
//! This module defines the core error type used throughout the crate.
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Listener failures are logged and swallowed, never propagated
//! - Future-bound operations transition the future to *failed* instead of
//!   panicking out of a callback
//! - `cancel()` and safe-close never fail

use core::fmt;
use std::io;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Buffers ===
    /// A read required more bytes than the buffer had remaining.
    BufferUnderflow,
    /// A write required more space than the buffer had remaining.
    BufferOverflow,

    // === Channels ===
    /// The channel (or the relevant direction) is closed.
    Closed,
    /// The operation was cancelled.
    Cancelled,
    /// A blocking read did not complete within its timeout.
    ReadTimeout,
    /// A blocking write or flush did not complete within its timeout.
    WriteTimeout,

    // === Options ===
    /// The option is unknown or not applicable to the target.
    UnsupportedOption,

    // === Framing ===
    /// A message exceeded the configured outbound maximum.
    OversizedMessage,
    /// The inbound stream violated the framing protocol.
    Framing,

    // === Plumbing ===
    /// A wrapped I/O failure from a collaborator.
    Io,
    /// The operation was interrupted (EINTR from collaborator I/O).
    Interrupted,
}

impl ErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::BufferUnderflow => "buffer underflow",
            Self::BufferOverflow => "buffer overflow",
            Self::Closed => "channel closed",
            Self::Cancelled => "operation cancelled",
            Self::ReadTimeout => "read timed out",
            Self::WriteTimeout => "write timed out",
            Self::UnsupportedOption => "unsupported option",
            Self::OversizedMessage => "oversized message",
            Self::Framing => "framing error",
            Self::Io => "I/O error",
            Self::Interrupted => "interrupted",
        }
    }
}

/// The main error type for evio operations.
///
/// Carries a kind, an optional context string and an optional source error.
/// `Error` is `Clone` because a failed future hands the same stored error to
/// every caller of `get()`.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Creates a new error with the given kind and context message.
    #[must_use]
    pub fn with_context(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: Some(context.into()),
            source: None,
        }
    }

    /// Attaches a source error.
    #[must_use]
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the context message, if any.
    #[must_use]
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error represents a closed channel.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.kind, ErrorKind::Closed)
    }

    /// Returns true if this error represents a read or write timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::ReadTimeout | ErrorKind::WriteTimeout)
    }

    // Shorthand constructors for the common kinds.

    /// A *buffer-underflow* error.
    #[must_use]
    pub const fn buffer_underflow() -> Self {
        Self::new(ErrorKind::BufferUnderflow)
    }

    /// A *buffer-overflow* error.
    #[must_use]
    pub const fn buffer_overflow() -> Self {
        Self::new(ErrorKind::BufferOverflow)
    }

    /// A *closed* error.
    #[must_use]
    pub const fn closed() -> Self {
        Self::new(ErrorKind::Closed)
    }

    /// A *cancelled* error.
    #[must_use]
    pub const fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(ctx) => write!(f, "{}: {}", self.kind.as_str(), ctx),
            None => f.write_str(self.kind.as_str()),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::Interrupted => ErrorKind::Interrupted,
            io::ErrorKind::TimedOut => ErrorKind::ReadTimeout,
            io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe => ErrorKind::Closed,
            _ => ErrorKind::Io,
        };
        Self::new(kind).with_source(err)
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match err.kind() {
            ErrorKind::ReadTimeout | ErrorKind::WriteTimeout => io::ErrorKind::TimedOut,
            ErrorKind::Closed => io::ErrorKind::BrokenPipe,
            ErrorKind::Cancelled => io::ErrorKind::Other,
            ErrorKind::Interrupted => io::ErrorKind::Interrupted,
            ErrorKind::BufferUnderflow | ErrorKind::BufferOverflow => {
                io::ErrorKind::InvalidInput
            }
            _ => io::ErrorKind::Other,
        };
        Self::new(kind, err)
    }
}

/// A specialized `Result` type for evio operations.
pub type Result<T> = std::result::Result<T, Error>;
