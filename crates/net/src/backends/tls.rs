//! TLS backend (§4.3.2): a `TcpBackend`-shaped nonblocking socket with
//! `rustls` layered over it. Contract mirrors TCP exactly except streaming
//! is always sequential both ways, `info` carries no HTTP fields, and
//! `read_body`/`write_body` surface `WANT_READ`/`WANT_WRITE` as `NotReady`.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd};
use std::sync::Arc;
use std::time::Instant;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore};
use tracing::{debug, warn};

use crate::backend::{BackendError, InfoOutcome, Method, OpenFlags, OpenOutcome, ProtocolBackend, ReadOutcome};
use crate::ring::RingBuffer;
use crate::sockopt;
use crate::urlparse::{self, TcpOptions};

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    /// Installed only when the session URL carries `?insecure=1`. Accepts
    /// any certificate chain — the platform TLS library's equivalent
    /// footgun, not a stronger guarantee than reusing it (§1 Non-goals).
    #[derive(Debug)]
    pub struct NoVerification;

    impl ServerCertVerifier for NoVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::ED25519,
            ]
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlsState {
    Idle,
    Connecting,
    Handshaking,
    Connected,
    PeerClosed,
    Error,
}

pub struct TlsBackend {
    host: String,
    port: u16,
    opts: TcpOptions,
    stream: Option<TcpStream>,
    conn: Option<ClientConnection>,
    state: TlsState,
    peer_closed: bool,
    read_cursor: u32,
    write_cursor: u32,
    rx: RingBuffer,
    connect_start: Instant,
    last_errno: i32,
    candidates: Vec<std::net::SocketAddr>,
    candidate_idx: usize,
}

impl Default for TlsBackend {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            opts: TcpOptions::default(),
            stream: None,
            conn: None,
            state: TlsState::Idle,
            peer_closed: false,
            read_cursor: 0,
            write_cursor: 0,
            rx: RingBuffer::new(8 * 1024),
            connect_start: Instant::now(),
            last_errno: 0,
            candidates: Vec::new(),
            candidate_idx: 0,
        }
    }
}

fn client_config(insecure: bool) -> Arc<ClientConfig> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let builder = ClientConfig::builder();
    let config = if insecure {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoVerification))
            .with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Arc::new(config)
}

impl TlsBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_next_candidate(&mut self) -> Result<(), BackendError> {
        while self.candidate_idx < self.candidates.len() {
            let addr = self.candidates[self.candidate_idx];
            self.candidate_idx += 1;
            match sockopt::connect_nonblocking(addr) {
                Ok((fd, immediate)) => {
                    let raw = fd.as_raw_fd();
                    if self.opts.keepalive {
                        let _ = sockopt::set_keepalive(raw, true);
                    }
                    let stream = unsafe { TcpStream::from_raw_fd(fd.into_raw_fd()) };
                    let _ = stream.set_nodelay(self.opts.nodelay);
                    self.stream = Some(stream);
                    self.connect_start = Instant::now();
                    self.state = if immediate {
                        TlsState::Handshaking
                    } else {
                        TlsState::Connecting
                    };
                    debug!(host = %self.host, port = self.port, immediate, "tls tcp connect attempted");
                    return Ok(());
                }
                Err(e) => {
                    self.last_errno = e.raw_os_error().unwrap_or(-1);
                    continue;
                }
            }
        }
        self.state = TlsState::Error;
        Err(BackendError::IoError)
    }

    fn step_connect(&mut self) {
        let Some(stream) = &self.stream else { return };
        let fd = stream.as_raw_fd();
        let elapsed_ms = self.connect_start.elapsed().as_millis() as u32;
        match sockopt::is_writable(fd) {
            Ok(true) => match sockopt::socket_error(fd) {
                Ok(0) => self.state = TlsState::Handshaking,
                Ok(errno) => {
                    self.last_errno = errno;
                    self.state = TlsState::Error;
                }
                Err(_) => self.state = TlsState::Error,
            },
            Ok(false) => {
                if elapsed_ms >= self.opts.connect_timeout_ms {
                    self.last_errno = libc::ETIMEDOUT;
                    self.state = TlsState::Error;
                }
            }
            Err(_) => self.state = TlsState::Error,
        }
    }

    /// Pumps `rustls`' TLS record layer against the raw socket: read
    /// ciphertext in, let it decrypt, flush any pending ciphertext out.
    /// Called from every public entry point so handshake and application
    /// data progress on every poll without a separate state for each.
    fn pump(&mut self) {
        let (Some(stream), Some(conn)) = (&mut self.stream, &mut self.conn) else {
            return;
        };

        if conn.wants_write() {
            match conn.write_tls(stream) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(_) => {
                    self.state = TlsState::Error;
                    return;
                }
            }
        }

        if conn.wants_read() {
            match conn.read_tls(stream) {
                Ok(0) => {
                    self.peer_closed = true;
                }
                Ok(_) => match conn.process_new_packets() {
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "tls record processing failed");
                        self.state = TlsState::Error;
                        return;
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(_) => {
                    self.state = TlsState::Error;
                    return;
                }
            }
        }

        if self.state == TlsState::Handshaking && !conn.is_handshaking() {
            self.state = TlsState::Connected;
        }

        if self.state == TlsState::Connected {
            let mut tmp = [0u8; 4096];
            loop {
                let want = tmp.len().min(self.rx.free_space());
                if want == 0 {
                    break;
                }
                match conn.reader().read(&mut tmp[..want]) {
                    Ok(0) => {
                        self.peer_closed = true;
                        self.state = TlsState::PeerClosed;
                        break;
                    }
                    Ok(n) => {
                        self.rx.push(&tmp[..n]);
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(_) => {
                        self.peer_closed = true;
                        self.state = TlsState::PeerClosed;
                        break;
                    }
                }
            }
        }

        if self.peer_closed && self.rx.is_empty() && self.state == TlsState::Connected {
            self.state = TlsState::PeerClosed;
        }
    }
}

impl ProtocolBackend for TlsBackend {
    fn open(
        &mut self,
        _method: Method,
        _flags: OpenFlags,
        url: &str,
        _request_headers: &[(String, String)],
        _body_len_hint: u32,
        _response_header_allowlist: &[String],
    ) -> Result<OpenOutcome, BackendError> {
        let (host, port, opts) = urlparse::parse_host_port(url)?;
        self.rx = RingBuffer::new(opts.rx_buf);
        self.opts = opts;
        self.host = host.clone();
        self.port = port;

        self.candidates = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|_| BackendError::IoError)?
            .collect();
        self.candidate_idx = 0;
        if self.candidates.is_empty() {
            self.state = TlsState::Error;
            return Err(BackendError::IoError);
        }

        let server_name = ServerName::try_from(host).map_err(|_| BackendError::InvalidRequest)?.to_owned();
        let config = client_config(opts.insecure);
        self.conn = Some(ClientConnection::new(config, server_name).map_err(|_| BackendError::InvalidRequest)?);

        self.try_next_candidate()?;
        Ok(OpenOutcome {
            needs_body_write: false,
        })
    }

    fn write_body(&mut self, offset: u32, data: &[u8]) -> Result<u16, BackendError> {
        if offset != self.write_cursor {
            return Err(BackendError::InvalidRequest);
        }
        self.pump();

        match self.state {
            TlsState::Connecting | TlsState::Handshaking => return Err(BackendError::NotReady),
            TlsState::Connected => {}
            TlsState::PeerClosed | TlsState::Error => return Err(BackendError::IoError),
            TlsState::Idle => return Err(BackendError::IoError),
        }

        if data.is_empty() {
            return Ok(0);
        }

        let Some(conn) = &mut self.conn else {
            return Err(BackendError::IoError);
        };
        match conn.writer().write(data) {
            Ok(n) => {
                self.pump();
                self.write_cursor = self.write_cursor.wrapping_add(n as u32);
                Ok(n as u16)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(BackendError::DeviceBusy),
            Err(_) => Err(BackendError::IoError),
        }
    }

    fn read_body(&mut self, offset: u32, max: u16) -> Result<ReadOutcome, BackendError> {
        if offset != self.read_cursor {
            return Err(BackendError::InvalidRequest);
        }
        self.pump();

        if self.rx.is_empty() {
            return match self.state {
                TlsState::Connecting | TlsState::Handshaking | TlsState::Connected => Err(BackendError::NotReady),
                TlsState::PeerClosed => Ok(ReadOutcome {
                    data: Vec::new(),
                    eof: true,
                    truncated: false,
                }),
                TlsState::Error => Err(BackendError::IoError),
                TlsState::Idle => Err(BackendError::NotReady),
            };
        }

        let data = self.rx.pop(max as usize);
        self.read_cursor = self.read_cursor.wrapping_add(data.len() as u32);
        let truncated = data.len() == max as usize && !self.rx.is_empty();
        let eof = self.rx.is_empty() && self.state == TlsState::PeerClosed;
        Ok(ReadOutcome { data, eof, truncated })
    }

    fn info(&mut self, max_header_bytes: u16) -> Result<InfoOutcome, BackendError> {
        if self.state == TlsState::Error {
            return Err(BackendError::IoError);
        }
        let block = format!(
            "Scheme: tls\r\nRemote: {}:{}\r\nHandshaking: {}\r\nConnected: {}\r\nPeerClosed: {}\r\nLastErrno: {}\r\n",
            self.host,
            self.port,
            self.state == TlsState::Handshaking,
            self.state == TlsState::Connected,
            self.peer_closed,
            self.last_errno,
        );
        let mut bytes = block.into_bytes();
        bytes.truncate(max_header_bytes as usize);
        Ok(InfoOutcome {
            http_status: None,
            content_length: None,
            headers_block: bytes,
        })
    }

    fn poll(&mut self) {
        if self.state == TlsState::Connecting {
            self.step_connect();
        }
        if matches!(self.state, TlsState::Handshaking | TlsState::Connected) {
            self.pump();
        }
    }

    fn close(&mut self) {
        if let Some(conn) = &mut self.conn {
            conn.send_close_notify();
            if let Some(stream) = &mut self.stream {
                let _ = conn.write_tls(stream);
            }
        }
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.conn = None;
        self.state = TlsState::Idle;
    }

    fn is_streaming(&self) -> bool {
        true
    }

    fn requires_sequential_read(&self) -> bool {
        true
    }

    fn requires_sequential_write(&self) -> bool {
        true
    }
}
