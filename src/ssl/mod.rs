//! TLS overlay for stream channels.
//!
//! The TLS engine is an external oracle with four operations: `wrap`
//! (app-plain → net-cipher), `unwrap` (net-cipher → app-plain), a handshake
//! status, and `begin_handshake`. [`TlsStreamChannel`] layers that oracle
//! over any stream channel:
//!
//! ```text
//!        app reads/writes
//!              │
//!      ┌───────▼────────┐   wrap / unwrap    ┌────────────┐
//!      │ TlsStreamChannel│ ◄────────────────► │ TlsEngine  │
//!      └───────┬────────┘                     └────────────┘
//!              │ cipher staging (both directions)
//!      ┌───────▼────────┐
//!      │ underlying chan │
//!      └────────────────┘
//! ```
//!
//! Readiness is derived: when the engine needs unwrap and the underlying
//! stream is not readable, the overlay is not readable; when it needs wrap
//! and the underlying stream cannot take the bytes, the overlay is not
//! writable. Engine tasks run on the configured executor, inline when the
//! executor rejects. Every construction failure safe-closes the underlying
//! channel before the error propagates.
//!
//! A concrete `rustls`-backed engine is available behind the `tls` cargo
//! feature.

#[cfg(feature = "tls")]
mod rustls_engine;

#[cfg(feature = "tls")]
pub use rustls_engine::RustlsEngine;

use crate::buffer::ByteBuffer;
use crate::channels::{
    CloseableChannel, ReadResult, StreamChannel, StreamSinkChannel, StreamSourceChannel,
    SuspendableReadChannel, SuspendableWriteChannel,
};
use crate::error::{Error, Result};
use crate::executor::{Executor, Task};
use crate::listener::{ChannelListener, DelegatingSetter, ListenerSetter};
use crate::options::{
    OptionMap, SslClientAuthMode, SSL_CLIENT_AUTH_MODE, SSL_ENABLED_CIPHER_SUITES,
    SSL_ENABLED_PROTOCOLS, SSL_ENABLE_SESSION_CREATION, SSL_USE_CLIENT_MODE,
};
use crate::tracing_compat::{debug, trace};
use crate::util::{safe_close, Close};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

const CIPHER_CHUNK: usize = 16 * 1024;
const WRAP_OVERHEAD: usize = 2 * 1024;

/// What the engine needs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// No handshake in progress.
    NotHandshaking,
    /// The engine has bytes to send; call `wrap`.
    NeedWrap,
    /// The engine needs bytes from the peer; call `unwrap`.
    NeedUnwrap,
    /// A delegated task must run before the handshake can continue.
    NeedTask,
    /// The handshake just completed.
    Finished,
}

/// Result status of a single wrap/unwrap call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// The operation completed.
    Ok,
    /// More input is needed before any output can be produced.
    BufferUnderflow,
    /// The destination cannot hold the output.
    BufferOverflow,
    /// The TLS session is closed.
    Closed,
}

/// Byte accounting for a single wrap/unwrap call.
#[derive(Debug, Clone, Copy)]
pub struct EngineResult {
    /// Bytes consumed from the source buffer.
    pub consumed: usize,
    /// Bytes produced into the destination buffer.
    pub produced: usize,
    /// Completion status.
    pub status: EngineStatus,
}

/// The TLS engine oracle.
///
/// Implementations own all cryptographic state; the overlay only moves
/// bytes and schedules work.
pub trait TlsEngine: Send + Sync {
    /// Encrypts app-plain bytes from `src` into net-cipher bytes in `dst`.
    ///
    /// # Errors
    ///
    /// Fails on a fatal TLS error; the session is unusable afterwards.
    fn wrap(&self, src: &mut ByteBuffer, dst: &mut ByteBuffer) -> Result<EngineResult>;

    /// Decrypts net-cipher bytes from `src` into app-plain bytes in `dst`.
    ///
    /// # Errors
    ///
    /// Fails on a fatal TLS error; the session is unusable afterwards.
    fn unwrap(&self, src: &mut ByteBuffer, dst: &mut ByteBuffer) -> Result<EngineResult>;

    /// Returns what the engine needs next.
    fn handshake_status(&self) -> HandshakeStatus;

    /// Starts (or restarts) the handshake.
    ///
    /// # Errors
    ///
    /// Fails when the engine cannot handshake in its current state.
    fn begin_handshake(&self) -> Result<()>;

    /// Takes the next delegated task, if any.
    fn take_task(&self) -> Option<Task> {
        None
    }

    /// Marks the outbound side closed; subsequent `wrap` calls produce the
    /// close-notify exchange.
    fn close_outbound(&self);

    /// Switches between client and server mode; only before the handshake.
    ///
    /// # Errors
    ///
    /// Fails with *unsupported-option* when the mode is fixed.
    fn set_client_mode(&self, client: bool) -> Result<()>;

    /// Sets the client-certificate authentication mode (server side).
    ///
    /// # Errors
    ///
    /// Fails with *unsupported-option* when not applicable.
    fn set_client_auth(&self, mode: SslClientAuthMode) -> Result<()>;

    /// Enables or disables new session creation.
    ///
    /// # Errors
    ///
    /// Fails with *unsupported-option* when not applicable.
    fn set_session_creation(&self, enabled: bool) -> Result<()>;

    /// The cipher suites the engine supports.
    fn supported_cipher_suites(&self) -> Vec<String>;

    /// Replaces the enabled cipher-suite set.
    ///
    /// # Errors
    ///
    /// Fails when a name is unsupported.
    fn set_enabled_cipher_suites(&self, suites: Vec<String>) -> Result<()>;

    /// The protocol versions the engine supports.
    fn supported_protocols(&self) -> Vec<String>;

    /// Replaces the enabled protocol set.
    ///
    /// # Errors
    ///
    /// Fails when a name is unsupported.
    fn set_enabled_protocols(&self, protocols: Vec<String>) -> Result<()>;
}

/// Applies the TLS-relevant options to an engine.
///
/// Client mode defaults to the opposite of `server` and may be overridden
/// by `SSL_USE_CLIENT_MODE`. Client-auth is applied only in server mode.
/// Requested cipher suites and protocols are intersected with the engine's
/// supported sets, preserving the requested order.
///
/// # Errors
///
/// Propagates engine configuration failures.
pub fn configure_engine(
    engine: &dyn TlsEngine,
    options: &OptionMap,
    server: bool,
) -> Result<()> {
    let client_mode = options.get_or(&SSL_USE_CLIENT_MODE, !server);
    engine.set_client_mode(client_mode)?;
    if !client_mode {
        if let Some(mode) = options.get(&SSL_CLIENT_AUTH_MODE) {
            engine.set_client_auth(mode)?;
        }
    }
    engine.set_session_creation(options.get_or(&SSL_ENABLE_SESSION_CREATION, true))?;
    if let Some(requested) = options.get(&SSL_ENABLED_CIPHER_SUITES) {
        let supported: HashSet<String> =
            engine.supported_cipher_suites().into_iter().collect();
        let enabled: Vec<String> = requested
            .iter()
            .filter(|name| supported.contains(*name))
            .cloned()
            .collect();
        engine.set_enabled_cipher_suites(enabled)?;
    }
    if let Some(requested) = options.get(&SSL_ENABLED_PROTOCOLS) {
        let supported: HashSet<String> =
            engine.supported_protocols().into_iter().collect();
        let enabled: Vec<String> = requested
            .iter()
            .filter(|name| supported.contains(*name))
            .cloned()
            .collect();
        engine.set_enabled_protocols(enabled)?;
    }
    Ok(())
}

struct TlsIo {
    /// Cipher bytes read from the wire, not yet unwrapped.
    inbound_cipher: Vec<u8>,
    /// Cipher bytes produced by the engine, not yet written to the wire.
    outbound_cipher: Vec<u8>,
    /// App bytes produced while pumping the handshake, served before new
    /// unwraps.
    app_staging: Vec<u8>,
    eof: bool,
}

/// A TLS-protected stream channel over an underlying stream channel.
pub struct TlsStreamChannel {
    underlying: Arc<dyn StreamChannel>,
    engine: Box<dyn TlsEngine>,
    executor: Arc<dyn Executor>,
    io: Mutex<TlsIo>,
    self_ref: Weak<TlsStreamChannel>,
}

/// Creates a TLS overlay channel.
///
/// Configures the engine from `options` (`server` selects the default
/// direction), begins the handshake lazily and returns the wrapped channel.
/// On any configuration failure the underlying channel is safe-closed
/// before the error propagates.
///
/// # Errors
///
/// Propagates engine configuration and handshake-start failures.
pub fn new_tls_channel(
    underlying: Arc<dyn StreamChannel>,
    engine: Box<dyn TlsEngine>,
    executor: Arc<dyn Executor>,
    options: &OptionMap,
    server: bool,
) -> Result<Arc<TlsStreamChannel>> {
    if let Err(err) = configure_engine(engine.as_ref(), options, server) {
        safe_close(&*underlying);
        return Err(err);
    }
    if let Err(err) = engine.begin_handshake() {
        safe_close(&*underlying);
        return Err(err);
    }
    Ok(Arc::new_cyclic(|self_ref| TlsStreamChannel {
        underlying,
        engine,
        executor,
        io: Mutex::new(TlsIo {
            inbound_cipher: Vec::new(),
            outbound_cipher: Vec::new(),
            app_staging: Vec::new(),
            eof: false,
        }),
        self_ref: self_ref.clone(),
    }))
}

/// Returns a listener that wraps each accepted channel in a server-side TLS
/// overlay before handing it to `listener`.
///
/// When overlay construction fails, or the wrapped listener panics, the
/// accepted channel is safe-closed before the dispatcher regains control.
pub fn tls_wrapping_listener<F>(
    make_engine: F,
    listener: Arc<dyn ChannelListener<TlsStreamChannel>>,
    executor: Arc<dyn Executor>,
    options: OptionMap,
) -> Arc<dyn ChannelListener<dyn StreamChannel>>
where
    F: Fn() -> Box<dyn TlsEngine> + Send + Sync + 'static,
{
    Arc::new(move |channel: &Arc<dyn StreamChannel>| {
        let guard = CloseGuard {
            channel: Some(Arc::clone(channel)),
        };
        match new_tls_channel(
            Arc::clone(channel),
            make_engine(),
            Arc::clone(&executor),
            &options,
            true,
        ) {
            Ok(tls) => {
                listener.handle_event(&tls);
                guard.disarm();
            }
            Err(err) => {
                // new_tls_channel already closed the underlying channel.
                debug!(error = %err, "TLS overlay construction failed");
                guard.disarm();
            }
        }
    })
}

struct CloseGuard {
    channel: Option<Arc<dyn StreamChannel>>,
}

impl CloseGuard {
    fn disarm(mut self) {
        self.channel = None;
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            safe_close(&*channel);
        }
    }
}

impl TlsStreamChannel {
    fn self_arc(&self) -> Option<Arc<Self>> {
        self.self_ref.upgrade()
    }

    /// Drains staged cipher bytes to the wire; true when the staging buffer
    /// emptied.
    fn flush_outbound(&self, io: &mut TlsIo) -> Result<bool> {
        while !io.outbound_cipher.is_empty() {
            let mut buf = ByteBuffer::wrap(std::mem::take(&mut io.outbound_cipher));
            let written = self.underlying.write(&mut buf)?;
            io.outbound_cipher = buf.to_vec();
            if written == 0 {
                return Ok(io.outbound_cipher.is_empty());
            }
        }
        Ok(true)
    }

    /// Pulls one chunk of cipher bytes from the wire into the inbound
    /// staging; reports whether anything arrived.
    fn fill_inbound(&self, io: &mut TlsIo) -> Result<ReadResult> {
        let mut chunk = ByteBuffer::allocate(CIPHER_CHUNK);
        match self.underlying.read(&mut chunk)? {
            ReadResult::Bytes(n) => {
                chunk.flip();
                io.inbound_cipher.extend_from_slice(chunk.bytes());
                Ok(ReadResult::Bytes(n))
            }
            ReadResult::WouldBlock => Ok(ReadResult::WouldBlock),
            ReadResult::Eof => {
                io.eof = true;
                Ok(ReadResult::Eof)
            }
        }
    }

    /// Drives the handshake as far as the wire and the executor allow.
    fn pump(&self, io: &mut TlsIo) -> Result<()> {
        loop {
            match self.engine.handshake_status() {
                HandshakeStatus::NotHandshaking | HandshakeStatus::Finished => return Ok(()),
                HandshakeStatus::NeedTask => match self.engine.take_task() {
                    Some(task) => {
                        if let Err(rejected) = self.executor.execute(task) {
                            // A rejected task still has to run; the
                            // handshake cannot otherwise progress.
                            debug!(reason = rejected.reason, "running TLS task inline");
                            if let Some(task) = self.engine.take_task() {
                                task();
                            }
                        }
                    }
                    // Task in flight on the executor.
                    None => return Ok(()),
                },
                HandshakeStatus::NeedWrap => {
                    let mut empty = ByteBuffer::empty();
                    let mut out = ByteBuffer::allocate(CIPHER_CHUNK);
                    let result = self.engine.wrap(&mut empty, &mut out)?;
                    out.flip();
                    io.outbound_cipher.extend_from_slice(out.bytes());
                    let drained = self.flush_outbound(io)?;
                    if result.produced == 0 || !drained {
                        return Ok(());
                    }
                }
                HandshakeStatus::NeedUnwrap => {
                    let mut progressed = false;
                    if !io.inbound_cipher.is_empty() {
                        let mut src =
                            ByteBuffer::wrap(std::mem::take(&mut io.inbound_cipher));
                        let mut scratch = ByteBuffer::allocate(CIPHER_CHUNK);
                        let result = self.engine.unwrap(&mut src, &mut scratch)?;
                        io.inbound_cipher = src.to_vec();
                        scratch.flip();
                        if scratch.has_remaining() {
                            io.app_staging.extend_from_slice(scratch.bytes());
                        }
                        progressed = result.consumed > 0 || result.produced > 0;
                        if result.status == EngineStatus::Closed {
                            return Ok(());
                        }
                    }
                    if !progressed
                        && !matches!(self.fill_inbound(io)?, ReadResult::Bytes(_))
                    {
                        return Ok(());
                    }
                }
            }
        }
    }
}

impl Close for TlsStreamChannel {
    fn close(&self) -> Result<()> {
        self.underlying.close()
    }
}

impl CloseableChannel for TlsStreamChannel {
    fn is_open(&self) -> bool {
        self.underlying.is_open()
    }

    fn close_setter(&self) -> Arc<dyn ListenerSetter<dyn CloseableChannel>> {
        match self.self_arc() {
            Some(this) => Arc::new(DelegatingSetter::new(
                self.underlying.close_setter(),
                this as Arc<dyn CloseableChannel>,
            )),
            None => crate::listener::null_setter(),
        }
    }
}

impl SuspendableReadChannel for TlsStreamChannel {
    fn suspend_reads(&self) {
        self.underlying.suspend_reads();
    }

    fn resume_reads(&self) {
        self.underlying.resume_reads();
    }

    fn shutdown_reads(&self) -> Result<()> {
        self.underlying.shutdown_reads()
    }

    fn await_readable(&self) -> Result<()> {
        {
            let io = self.io.lock();
            if !io.app_staging.is_empty() || !io.inbound_cipher.is_empty() {
                return Ok(());
            }
        }
        self.underlying.await_readable()
    }

    fn await_readable_for(&self, timeout: Duration) -> Result<bool> {
        {
            let io = self.io.lock();
            if !io.app_staging.is_empty() || !io.inbound_cipher.is_empty() {
                return Ok(true);
            }
        }
        self.underlying.await_readable_for(timeout)
    }
}

impl StreamSourceChannel for TlsStreamChannel {
    fn read(&self, dst: &mut ByteBuffer) -> Result<ReadResult> {
        if !self.underlying.is_open() {
            return Err(Error::closed());
        }
        let mut io = self.io.lock();
        self.pump(&mut io)?;

        let mut total = 0;
        if !io.app_staging.is_empty() && dst.has_remaining() {
            let n = io.app_staging.len().min(dst.remaining());
            let staged: Vec<u8> = io.app_staging.drain(..n).collect();
            dst.put_slice(&staged)?;
            total += n;
        }

        loop {
            if !dst.has_remaining() {
                break;
            }
            if !io.inbound_cipher.is_empty() {
                let mut src = ByteBuffer::wrap(std::mem::take(&mut io.inbound_cipher));
                let result = self.engine.unwrap(&mut src, dst)?;
                io.inbound_cipher = src.to_vec();
                total += result.produced;
                match result.status {
                    EngineStatus::Closed => {
                        return Ok(if total > 0 {
                            ReadResult::Bytes(total)
                        } else {
                            ReadResult::Eof
                        });
                    }
                    EngineStatus::BufferOverflow => break,
                    EngineStatus::Ok if result.produced > 0 => continue,
                    EngineStatus::Ok | EngineStatus::BufferUnderflow => {}
                }
            }
            match self.fill_inbound(&mut io)? {
                ReadResult::Bytes(_) => {}
                ReadResult::WouldBlock => break,
                ReadResult::Eof => {
                    return Ok(if total > 0 {
                        ReadResult::Bytes(total)
                    } else {
                        ReadResult::Eof
                    });
                }
            }
        }
        if total > 0 {
            Ok(ReadResult::Bytes(total))
        } else {
            Ok(ReadResult::WouldBlock)
        }
    }

    fn read_scatter(&self, dsts: &mut [ByteBuffer]) -> Result<ReadResult> {
        let mut total = 0;
        for dst in dsts.iter_mut() {
            if !dst.has_remaining() {
                continue;
            }
            match self.read(dst)? {
                ReadResult::Bytes(n) => total += n,
                ReadResult::WouldBlock => break,
                ReadResult::Eof => {
                    return Ok(if total > 0 {
                        ReadResult::Bytes(total)
                    } else {
                        ReadResult::Eof
                    });
                }
            }
        }
        if total > 0 {
            Ok(ReadResult::Bytes(total))
        } else {
            Ok(ReadResult::WouldBlock)
        }
    }

    fn read_setter(&self) -> Arc<dyn ListenerSetter<dyn StreamSourceChannel>> {
        match self.self_arc() {
            Some(this) => Arc::new(DelegatingSetter::new(
                self.underlying.read_setter(),
                this as Arc<dyn StreamSourceChannel>,
            )),
            None => crate::listener::null_setter(),
        }
    }
}

impl SuspendableWriteChannel for TlsStreamChannel {
    fn suspend_writes(&self) {
        self.underlying.suspend_writes();
    }

    fn resume_writes(&self) {
        self.underlying.resume_writes();
    }

    fn flush(&self) -> Result<bool> {
        let mut io = self.io.lock();
        self.pump(&mut io)?;
        if !self.flush_outbound(&mut io)? {
            return Ok(false);
        }
        self.underlying.flush()
    }

    fn shutdown_writes(&self) -> Result<bool> {
        let mut io = self.io.lock();
        self.engine.close_outbound();
        // Emit the close-notify exchange.
        loop {
            let mut empty = ByteBuffer::empty();
            let mut out = ByteBuffer::allocate(WRAP_OVERHEAD);
            let result = self.engine.wrap(&mut empty, &mut out)?;
            out.flip();
            io.outbound_cipher.extend_from_slice(out.bytes());
            if result.produced == 0 {
                break;
            }
        }
        if !self.flush_outbound(&mut io)? {
            return Ok(false);
        }
        self.underlying.shutdown_writes()
    }

    fn await_writable(&self) -> Result<()> {
        self.underlying.await_writable()
    }

    fn await_writable_for(&self, timeout: Duration) -> Result<bool> {
        self.underlying.await_writable_for(timeout)
    }
}

impl StreamSinkChannel for TlsStreamChannel {
    fn write(&self, src: &mut ByteBuffer) -> Result<usize> {
        if !self.underlying.is_open() {
            return Err(Error::closed());
        }
        let mut io = self.io.lock();
        self.pump(&mut io)?;
        if !self.flush_outbound(&mut io)? {
            // The wire is backed up; the overlay is not writable.
            return Ok(0);
        }
        if src.remaining() == 0 {
            return Ok(0);
        }
        let mut out = ByteBuffer::allocate(src.remaining() + WRAP_OVERHEAD);
        let result = self.engine.wrap(src, &mut out)?;
        out.flip();
        io.outbound_cipher.extend_from_slice(out.bytes());
        if result.status == EngineStatus::Closed {
            return Err(Error::closed());
        }
        trace!(consumed = result.consumed, "wrapped app bytes");
        self.flush_outbound(&mut io)?;
        Ok(result.consumed)
    }

    fn write_gather(&self, srcs: &mut [ByteBuffer]) -> Result<usize> {
        let mut total = 0;
        for src in srcs.iter_mut() {
            if !src.has_remaining() {
                continue;
            }
            let written = self.write(src)?;
            total += written;
            if src.has_remaining() {
                break;
            }
        }
        Ok(total)
    }

    fn write_setter(&self) -> Arc<dyn ListenerSetter<dyn StreamSinkChannel>> {
        match self.self_arc() {
            Some(this) => Arc::new(DelegatingSetter::new(
                self.underlying.write_setter(),
                this as Arc<dyn StreamSinkChannel>,
            )),
            None => crate::listener::null_setter(),
        }
    }
}

impl std::fmt::Debug for TlsStreamChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsStreamChannel")
            .field("handshake", &self.engine.handshake_status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::pipe::stream_pair;
    use crate::executor::direct_executor;
    use crate::options::Sequence;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Identity engine: no handshake, wrap/unwrap copy bytes through.
    struct PlainEngine {
        closed: AtomicBool,
        client_mode: PlMutex<Option<bool>>,
        client_auth: PlMutex<Option<SslClientAuthMode>>,
        session_creation: AtomicBool,
        enabled_suites: PlMutex<Vec<String>>,
        enabled_protocols: PlMutex<Vec<String>>,
    }

    impl PlainEngine {
        fn new() -> Self {
            Self {
                closed: AtomicBool::new(false),
                client_mode: PlMutex::new(None),
                client_auth: PlMutex::new(None),
                session_creation: AtomicBool::new(true),
                enabled_suites: PlMutex::new(Vec::new()),
                enabled_protocols: PlMutex::new(Vec::new()),
            }
        }

        fn copy(src: &mut ByteBuffer, dst: &mut ByteBuffer) -> EngineResult {
            let n = src.remaining().min(dst.remaining());
            if let Ok(bytes) = src.take(n) {
                let _ = dst.put_slice(&bytes);
            }
            EngineResult {
                consumed: n,
                produced: n,
                status: EngineStatus::Ok,
            }
        }
    }

    impl TlsEngine for PlainEngine {
        fn wrap(&self, src: &mut ByteBuffer, dst: &mut ByteBuffer) -> Result<EngineResult> {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(EngineResult {
                    consumed: 0,
                    produced: 0,
                    status: EngineStatus::Closed,
                });
            }
            Ok(Self::copy(src, dst))
        }

        fn unwrap(&self, src: &mut ByteBuffer, dst: &mut ByteBuffer) -> Result<EngineResult> {
            Ok(Self::copy(src, dst))
        }

        fn handshake_status(&self) -> HandshakeStatus {
            HandshakeStatus::NotHandshaking
        }

        fn begin_handshake(&self) -> Result<()> {
            Ok(())
        }

        fn close_outbound(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn set_client_mode(&self, client: bool) -> Result<()> {
            *self.client_mode.lock() = Some(client);
            Ok(())
        }

        fn set_client_auth(&self, mode: SslClientAuthMode) -> Result<()> {
            *self.client_auth.lock() = Some(mode);
            Ok(())
        }

        fn set_session_creation(&self, enabled: bool) -> Result<()> {
            self.session_creation.store(enabled, Ordering::SeqCst);
            Ok(())
        }

        fn supported_cipher_suites(&self) -> Vec<String> {
            vec!["TLS_AES_128_GCM_SHA256".into(), "TLS_AES_256_GCM_SHA384".into()]
        }

        fn set_enabled_cipher_suites(&self, suites: Vec<String>) -> Result<()> {
            *self.enabled_suites.lock() = suites;
            Ok(())
        }

        fn supported_protocols(&self) -> Vec<String> {
            vec!["TLSv1.2".into(), "TLSv1.3".into()]
        }

        fn set_enabled_protocols(&self, protocols: Vec<String>) -> Result<()> {
            *self.enabled_protocols.lock() = protocols;
            Ok(())
        }
    }

    #[test]
    fn configure_intersects_with_supported_sets() {
        let engine = PlainEngine::new();
        let options = OptionMap::builder()
            .set(
                &SSL_ENABLED_CIPHER_SUITES,
                Sequence::new(vec![
                    "TLS_AES_256_GCM_SHA384".to_string(),
                    "TLS_BOGUS".to_string(),
                ]),
            )
            .set(
                &SSL_ENABLED_PROTOCOLS,
                Sequence::new(vec!["TLSv1.3".to_string(), "SSLv3".to_string()]),
            )
            .build();
        configure_engine(&engine, &options, false).unwrap();
        assert_eq!(
            engine.enabled_suites.lock().as_slice(),
            ["TLS_AES_256_GCM_SHA384"]
        );
        assert_eq!(engine.enabled_protocols.lock().as_slice(), ["TLSv1.3"]);
        // Created as client wrapper: client mode defaults to true, so
        // client-auth is not applied.
        assert_eq!(*engine.client_mode.lock(), Some(true));
        assert!(engine.client_auth.lock().is_none());
    }

    #[test]
    fn server_default_applies_client_auth() {
        let engine = PlainEngine::new();
        let options = OptionMap::builder()
            .set(&SSL_CLIENT_AUTH_MODE, SslClientAuthMode::Required)
            .build();
        configure_engine(&engine, &options, true).unwrap();
        assert_eq!(*engine.client_mode.lock(), Some(false));
        assert_eq!(*engine.client_auth.lock(), Some(SslClientAuthMode::Required));
    }

    #[test]
    fn bytes_flow_through_the_overlay() {
        let (a, b) = stream_pair(&OptionMap::empty());
        let tls_a = new_tls_channel(
            a,
            Box::new(PlainEngine::new()),
            direct_executor(),
            &OptionMap::empty(),
            false,
        )
        .unwrap();
        let tls_b = new_tls_channel(
            b,
            Box::new(PlainEngine::new()),
            direct_executor(),
            &OptionMap::empty(),
            true,
        )
        .unwrap();

        let mut src = ByteBuffer::from_slice(b"secret");
        assert_eq!(tls_a.write(&mut src).unwrap(), 6);

        let mut dst = ByteBuffer::allocate(16);
        assert_eq!(tls_b.read(&mut dst).unwrap(), ReadResult::Bytes(6));
        dst.flip();
        assert_eq!(dst.bytes(), b"secret");
        let mut more = ByteBuffer::allocate(8);
        assert_eq!(tls_b.read(&mut more).unwrap(), ReadResult::WouldBlock);
    }

    #[test]
    fn shutdown_sends_close_notify_and_peer_sees_eof() {
        let (a, b) = stream_pair(&OptionMap::empty());
        let tls_a = new_tls_channel(
            a,
            Box::new(PlainEngine::new()),
            direct_executor(),
            &OptionMap::empty(),
            false,
        )
        .unwrap();

        tls_a.write(&mut ByteBuffer::from_slice(b"bye")).unwrap();
        assert!(tls_a.shutdown_writes().unwrap());
        assert!(tls_a.write(&mut ByteBuffer::from_slice(b"x")).is_err());

        let mut dst = ByteBuffer::allocate(8);
        assert_eq!(b.read(&mut dst).unwrap(), ReadResult::Bytes(3));
        assert_eq!(b.read(&mut dst).unwrap(), ReadResult::Eof);
    }

    /// Engine that requires one wrap and one unwrap before it is ready.
    struct HandshakingEngine {
        inner: PlainEngine,
        sent_hello: AtomicBool,
        got_hello: AtomicBool,
    }

    impl HandshakingEngine {
        fn new() -> Self {
            Self {
                inner: PlainEngine::new(),
                sent_hello: AtomicBool::new(false),
                got_hello: AtomicBool::new(false),
            }
        }
    }

    impl TlsEngine for HandshakingEngine {
        fn wrap(&self, src: &mut ByteBuffer, dst: &mut ByteBuffer) -> Result<EngineResult> {
            if !self.sent_hello.load(Ordering::SeqCst) {
                self.sent_hello.store(true, Ordering::SeqCst);
                dst.put_slice(b"HELO")?;
                return Ok(EngineResult {
                    consumed: 0,
                    produced: 4,
                    status: EngineStatus::Ok,
                });
            }
            self.inner.wrap(src, dst)
        }

        fn unwrap(&self, src: &mut ByteBuffer, dst: &mut ByteBuffer) -> Result<EngineResult> {
            if !self.got_hello.load(Ordering::SeqCst) {
                if src.remaining() < 4 {
                    return Ok(EngineResult {
                        consumed: 0,
                        produced: 0,
                        status: EngineStatus::BufferUnderflow,
                    });
                }
                src.skip(4)?;
                self.got_hello.store(true, Ordering::SeqCst);
                return Ok(EngineResult {
                    consumed: 4,
                    produced: 0,
                    status: EngineStatus::Ok,
                });
            }
            self.inner.unwrap(src, dst)
        }

        fn handshake_status(&self) -> HandshakeStatus {
            if !self.sent_hello.load(Ordering::SeqCst) {
                HandshakeStatus::NeedWrap
            } else if !self.got_hello.load(Ordering::SeqCst) {
                HandshakeStatus::NeedUnwrap
            } else {
                HandshakeStatus::NotHandshaking
            }
        }

        fn begin_handshake(&self) -> Result<()> {
            Ok(())
        }

        fn close_outbound(&self) {
            self.inner.close_outbound();
        }

        fn set_client_mode(&self, client: bool) -> Result<()> {
            self.inner.set_client_mode(client)
        }

        fn set_client_auth(&self, mode: SslClientAuthMode) -> Result<()> {
            self.inner.set_client_auth(mode)
        }

        fn set_session_creation(&self, enabled: bool) -> Result<()> {
            self.inner.set_session_creation(enabled)
        }

        fn supported_cipher_suites(&self) -> Vec<String> {
            self.inner.supported_cipher_suites()
        }

        fn set_enabled_cipher_suites(&self, suites: Vec<String>) -> Result<()> {
            self.inner.set_enabled_cipher_suites(suites)
        }

        fn supported_protocols(&self) -> Vec<String> {
            self.inner.supported_protocols()
        }

        fn set_enabled_protocols(&self, protocols: Vec<String>) -> Result<()> {
            self.inner.set_enabled_protocols(protocols)
        }
    }

    #[test]
    fn handshake_pumps_before_app_data() {
        let (a, b) = stream_pair(&OptionMap::empty());
        let tls_a = new_tls_channel(
            a,
            Box::new(HandshakingEngine::new()),
            direct_executor(),
            &OptionMap::empty(),
            false,
        )
        .unwrap();
        let tls_b = new_tls_channel(
            b,
            Box::new(HandshakingEngine::new()),
            direct_executor(),
            &OptionMap::empty(),
            true,
        )
        .unwrap();

        // a's first write pumps its NeedWrap hello onto the wire, then
        // sends the app bytes; b's read consumes a's hello during its own
        // pump, sends its hello back, and surfaces the app payload.
        let mut src = ByteBuffer::from_slice(b"data");
        assert_eq!(tls_a.write(&mut src).unwrap(), 4);

        let mut dst = ByteBuffer::allocate(8);
        assert_eq!(tls_b.read(&mut dst).unwrap(), ReadResult::Bytes(4));
        dst.flip();
        assert_eq!(dst.bytes(), b"data");

        // And the reverse direction completes a's unwrap leg.
        tls_b.write(&mut ByteBuffer::from_slice(b"ok")).unwrap();
        let mut back = ByteBuffer::allocate(8);
        assert_eq!(tls_a.read(&mut back).unwrap(), ReadResult::Bytes(2));
    }

    #[test]
    fn wrapping_listener_closes_channel_on_failure() {
        struct BrokenEngine(PlainEngine);

        impl TlsEngine for BrokenEngine {
            fn wrap(&self, src: &mut ByteBuffer, dst: &mut ByteBuffer) -> Result<EngineResult> {
                self.0.wrap(src, dst)
            }
            fn unwrap(&self, src: &mut ByteBuffer, dst: &mut ByteBuffer) -> Result<EngineResult> {
                self.0.unwrap(src, dst)
            }
            fn handshake_status(&self) -> HandshakeStatus {
                HandshakeStatus::NotHandshaking
            }
            fn begin_handshake(&self) -> Result<()> {
                Err(Error::with_context(crate::error::ErrorKind::Io, "no certificate"))
            }
            fn close_outbound(&self) {}
            fn set_client_mode(&self, client: bool) -> Result<()> {
                self.0.set_client_mode(client)
            }
            fn set_client_auth(&self, mode: SslClientAuthMode) -> Result<()> {
                self.0.set_client_auth(mode)
            }
            fn set_session_creation(&self, enabled: bool) -> Result<()> {
                self.0.set_session_creation(enabled)
            }
            fn supported_cipher_suites(&self) -> Vec<String> {
                self.0.supported_cipher_suites()
            }
            fn set_enabled_cipher_suites(&self, suites: Vec<String>) -> Result<()> {
                self.0.set_enabled_cipher_suites(suites)
            }
            fn supported_protocols(&self) -> Vec<String> {
                self.0.supported_protocols()
            }
            fn set_enabled_protocols(&self, protocols: Vec<String>) -> Result<()> {
                self.0.set_enabled_protocols(protocols)
            }
        }

        let accepted = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&accepted);
        let listener = tls_wrapping_listener(
            || Box::new(BrokenEngine(PlainEngine::new())),
            Arc::new(move |_: &Arc<TlsStreamChannel>| {
                counted.fetch_add(1, Ordering::SeqCst);
            }),
            direct_executor(),
            OptionMap::empty(),
        );

        let (a, _b) = stream_pair(&OptionMap::empty());
        let channel: Arc<dyn StreamChannel> = a.clone();
        listener.handle_event(&channel);
        assert_eq!(accepted.load(Ordering::SeqCst), 0);
        assert!(!a.is_open());
    }
}
