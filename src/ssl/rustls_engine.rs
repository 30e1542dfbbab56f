//! Rustls-backed TLS engine.
//!
//! Adapts a `rustls` client or server connection to the [`TlsEngine`]
//! oracle. Rustls fixes cipher suites and protocol versions when its config
//! is built, so the engine's enabled-set setters record the intersection
//! applied by [`configure_engine`](super::configure_engine) for inspection;
//! enforcement lives in the `ClientConfig`/`ServerConfig` the engine was
//! constructed with. Client/server mode is likewise fixed at construction.

use super::{EngineResult, EngineStatus, HandshakeStatus, TlsEngine};
use crate::buffer::ByteBuffer;
use crate::error::{Error, ErrorKind, Result};
use crate::options::SslClientAuthMode;
use parking_lot::Mutex;
use rustls::{ClientConfig, ClientConnection, ServerConfig, ServerConnection};
use rustls_pki_types::ServerName;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Wrapper to handle both client and server connections.
enum TlsConnection {
    Client(ClientConnection),
    Server(ServerConnection),
}

impl TlsConnection {
    fn is_handshaking(&self) -> bool {
        match self {
            Self::Client(c) => c.is_handshaking(),
            Self::Server(s) => s.is_handshaking(),
        }
    }

    fn wants_write(&self) -> bool {
        match self {
            Self::Client(c) => c.wants_write(),
            Self::Server(s) => s.wants_write(),
        }
    }

    fn read_tls(&mut self, rd: &mut dyn io::Read) -> io::Result<usize> {
        match self {
            Self::Client(c) => c.read_tls(rd),
            Self::Server(s) => s.read_tls(rd),
        }
    }

    fn write_tls(&mut self, wr: &mut dyn io::Write) -> io::Result<usize> {
        match self {
            Self::Client(c) => c.write_tls(wr),
            Self::Server(s) => s.write_tls(wr),
        }
    }

    fn process_new_packets(&mut self) -> std::result::Result<rustls::IoState, rustls::Error> {
        match self {
            Self::Client(c) => c.process_new_packets(),
            Self::Server(s) => s.process_new_packets(),
        }
    }

    fn write_plaintext(&mut self, data: &[u8]) -> io::Result<usize> {
        use io::Write;
        match self {
            Self::Client(c) => c.writer().write(data),
            Self::Server(s) => s.writer().write(data),
        }
    }

    fn read_plaintext(&mut self, data: &mut [u8]) -> io::Result<usize> {
        use io::Read;
        match self {
            Self::Client(c) => c.reader().read(data),
            Self::Server(s) => s.reader().read(data),
        }
    }

    fn send_close_notify(&mut self) {
        match self {
            Self::Client(c) => c.send_close_notify(),
            Self::Server(s) => s.send_close_notify(),
        }
    }
}

/// Reads from the remaining bytes of a [`ByteBuffer`], reporting
/// `WouldBlock` when drained so rustls stops instead of seeing EOF.
struct BufferReader<'a>(&'a mut ByteBuffer);

impl io::Read for BufferReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.0.remaining().min(buf.len());
        if n == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        self.0
            .get_slice(&mut buf[..n])
            .map_err(io::Error::from)?;
        Ok(n)
    }
}

/// Writes into the remaining space of a [`ByteBuffer`], reporting
/// `WouldBlock` when full so rustls re-queues the rest.
struct BufferWriter<'a>(&'a mut ByteBuffer);

impl io::Write for BufferWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.0.remaining().min(buf.len());
        if n == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        self.0.put_slice(&buf[..n]).map_err(io::Error::from)?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn tls_failure(err: rustls::Error) -> Error {
    Error::with_context(ErrorKind::Io, "TLS failure").with_source(err)
}

/// A [`TlsEngine`] backed by rustls.
pub struct RustlsEngine {
    conn: Mutex<TlsConnection>,
    client: bool,
    session_creation: AtomicBool,
    client_auth: Mutex<Option<SslClientAuthMode>>,
    enabled_suites: Mutex<Vec<String>>,
    enabled_protocols: Mutex<Vec<String>>,
}

impl RustlsEngine {
    /// Creates a client-side engine for `server_name`.
    ///
    /// # Errors
    ///
    /// Propagates rustls connection-construction failures.
    pub fn client(config: Arc<ClientConfig>, server_name: ServerName<'static>) -> Result<Self> {
        let conn = ClientConnection::new(config, server_name).map_err(tls_failure)?;
        Ok(Self::new(TlsConnection::Client(conn), true))
    }

    /// Creates a server-side engine.
    ///
    /// # Errors
    ///
    /// Propagates rustls connection-construction failures.
    pub fn server(config: Arc<ServerConfig>) -> Result<Self> {
        let conn = ServerConnection::new(config).map_err(tls_failure)?;
        Ok(Self::new(TlsConnection::Server(conn), false))
    }

    fn new(conn: TlsConnection, client: bool) -> Self {
        Self {
            conn: Mutex::new(conn),
            client,
            session_creation: AtomicBool::new(true),
            client_auth: Mutex::new(None),
            enabled_suites: Mutex::new(Vec::new()),
            enabled_protocols: Mutex::new(Vec::new()),
        }
    }

    /// Returns the client-auth mode recorded from the option map, if any.
    #[must_use]
    pub fn client_auth(&self) -> Option<SslClientAuthMode> {
        *self.client_auth.lock()
    }

    /// Returns the enabled protocol set recorded from the option map.
    #[must_use]
    pub fn recorded_protocols(&self) -> Vec<String> {
        self.enabled_protocols.lock().clone()
    }
}

impl TlsEngine for RustlsEngine {
    fn wrap(&self, src: &mut ByteBuffer, dst: &mut ByteBuffer) -> Result<EngineResult> {
        let mut conn = self.conn.lock();
        let mut consumed = 0;
        if !conn.is_handshaking() && src.has_remaining() {
            let chunk = src.bytes().to_vec();
            match conn.write_plaintext(&chunk) {
                Ok(n) => {
                    src.skip(n)?;
                    consumed = n;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(err.into()),
            }
        }
        let before = dst.position();
        while conn.wants_write() {
            match conn.write_tls(&mut BufferWriter(&mut *dst)) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(EngineResult {
                        consumed,
                        produced: dst.position() - before,
                        status: EngineStatus::BufferOverflow,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(EngineResult {
            consumed,
            produced: dst.position() - before,
            status: EngineStatus::Ok,
        })
    }

    fn unwrap(&self, src: &mut ByteBuffer, dst: &mut ByteBuffer) -> Result<EngineResult> {
        let mut conn = self.conn.lock();
        let start = src.position();
        loop {
            match conn.read_tls(&mut BufferReader(&mut *src)) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err.into()),
            }
        }
        let consumed = src.position() - start;
        let io_state = conn.process_new_packets().map_err(tls_failure)?;

        let mut produced = 0;
        let mut chunk = [0u8; 4096];
        while dst.has_remaining() {
            let want = dst.remaining().min(chunk.len());
            match conn.read_plaintext(&mut chunk[..want]) {
                Ok(0) => break,
                Ok(n) => {
                    dst.put_slice(&chunk[..n])?;
                    produced += n;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err.into()),
            }
        }

        let status = if io_state.peer_has_closed() && produced == 0 {
            EngineStatus::Closed
        } else if consumed == 0 && produced == 0 {
            EngineStatus::BufferUnderflow
        } else {
            EngineStatus::Ok
        };
        Ok(EngineResult {
            consumed,
            produced,
            status,
        })
    }

    fn handshake_status(&self) -> HandshakeStatus {
        let conn = self.conn.lock();
        if conn.is_handshaking() {
            if conn.wants_write() {
                HandshakeStatus::NeedWrap
            } else {
                HandshakeStatus::NeedUnwrap
            }
        } else {
            HandshakeStatus::NotHandshaking
        }
    }

    fn begin_handshake(&self) -> Result<()> {
        // rustls starts handshaking at connection construction.
        Ok(())
    }

    fn close_outbound(&self) {
        self.conn.lock().send_close_notify();
    }

    fn set_client_mode(&self, client: bool) -> Result<()> {
        if client == self.client {
            Ok(())
        } else {
            Err(Error::with_context(
                ErrorKind::UnsupportedOption,
                "rustls fixes client/server mode at connection construction",
            ))
        }
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
        [
            "TLS13_AES_128_GCM_SHA256",
            "TLS13_AES_256_GCM_SHA384",
            "TLS13_CHACHA20_POLY1305_SHA256",
            "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
            "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
            "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
            "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
            "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
            "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
        ]
        .iter()
        .map(ToString::to_string)
        .collect()
    }

    fn set_enabled_cipher_suites(&self, suites: Vec<String>) -> Result<()> {
        *self.enabled_suites.lock() = suites;
        Ok(())
    }

    fn supported_protocols(&self) -> Vec<String> {
        vec!["TLSv1.2".to_string(), "TLSv1.3".to_string()]
    }

    fn set_enabled_protocols(&self, protocols: Vec<String>) -> Result<()> {
        *self.enabled_protocols.lock() = protocols;
        Ok(())
    }
}

impl std::fmt::Debug for RustlsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RustlsEngine")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}
