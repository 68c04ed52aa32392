//! The nontrivial backend: a nonblocking, multi-step TCP stream with a
//! receive ring buffer. See `SPEC_FULL.md` §4.3.1.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd};
use std::time::Instant;

use tracing::{debug, warn};

use crate::backend::{BackendError, InfoOutcome, Method, OpenFlags, OpenOutcome, ProtocolBackend, ReadOutcome};
use crate::ring::RingBuffer;
use crate::sockopt;
use crate::urlparse::{self, TcpOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Idle,
    Connecting,
    Connected,
    PeerClosed,
    Error,
}

/// Also reused directly by the modem device, which drives this primitive
/// for its `ATDT` dial command instead of going through `NetworkDevice`.
pub struct TcpBackend {
    host: String,
    port: u16,
    opts: TcpOptions,
    stream: Option<TcpStream>,
    state: TcpState,
    peer_closed: bool,
    read_cursor: u32,
    write_cursor: u32,
    rx: RingBuffer,
    connect_start: Instant,
    last_errno: i32,
    candidates: Vec<std::net::SocketAddr>,
    candidate_idx: usize,
}

impl Default for TcpBackend {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            opts: TcpOptions::default(),
            stream: None,
            state: TcpState::Idle,
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

impl TcpBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TcpState {
        self.state
    }

    /// Adopts an already-connected stream (the modem device's listen
    /// socket hands off an accepted connection here on `ATA`/auto-answer)
    /// instead of dialing out. The stream is switched to nonblocking and
    /// treated exactly like a just-connected outbound session.
    pub fn adopt_stream(&mut self, stream: TcpStream, rx_buf: usize) -> Result<(), BackendError> {
        stream.set_nonblocking(true).map_err(|_| BackendError::IoError)?;
        let _ = stream.set_nodelay(true);
        self.rx = RingBuffer::new(rx_buf);
        self.stream = Some(stream);
        self.read_cursor = 0;
        self.write_cursor = 0;
        self.peer_closed = false;
        self.state = TcpState::Connected;
        Ok(())
    }

    /// Begins a nonblocking connect to `host:port`. Called directly by the
    /// modem device, and by `Self::open` for `tcp://` sessions.
    pub fn open_host_port(&mut self, host: String, port: u16, opts: TcpOptions) -> Result<(), BackendError> {
        self.rx = RingBuffer::new(opts.rx_buf);
        self.opts = opts;
        self.host = host;
        self.port = port;

        self.candidates = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| BackendError::IoError)?
            .collect();
        self.candidate_idx = 0;

        if self.candidates.is_empty() {
            self.state = TcpState::Error;
            return Err(BackendError::IoError);
        }
        self.try_next_candidate()
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
                    let _ = sockopt::set_rcvbuf(raw, self.opts.rx_buf);

                    let stream = unsafe { TcpStream::from_raw_fd(fd.into_raw_fd()) };
                    let _ = stream.set_nodelay(self.opts.nodelay);
                    self.stream = Some(stream);
                    self.connect_start = Instant::now();
                    self.state = if immediate {
                        TcpState::Connected
                    } else {
                        TcpState::Connecting
                    };
                    debug!(host = %self.host, port = self.port, immediate, "tcp connect attempted");
                    return Ok(());
                }
                Err(e) => {
                    self.last_errno = e.raw_os_error().unwrap_or(-1);
                    continue;
                }
            }
        }
        self.state = TcpState::Error;
        Err(BackendError::IoError)
    }

    fn step_connect(&mut self) {
        let Some(stream) = &self.stream else { return };
        let fd = stream.as_raw_fd();
        let elapsed_ms = self.connect_start.elapsed().as_millis() as u32;

        match sockopt::is_writable(fd) {
            Ok(true) => match sockopt::socket_error(fd) {
                Ok(0) => self.state = TcpState::Connected,
                Ok(errno) => {
                    self.last_errno = errno;
                    self.state = TcpState::Error;
                }
                Err(_) => self.state = TcpState::Error,
            },
            Ok(false) => {
                if elapsed_ms >= self.opts.connect_timeout_ms {
                    self.last_errno = libc::ETIMEDOUT;
                    self.state = TcpState::Error;
                }
            }
            Err(_) => self.state = TcpState::Error,
        }
    }

    fn pump_recv(&mut self) {
        if self.state != TcpState::Connected || self.rx.free_space() == 0 {
            return;
        }
        let Some(stream) = &mut self.stream else { return };
        let mut tmp = [0u8; 4096];
        loop {
            let want = tmp.len().min(self.rx.free_space());
            if want == 0 {
                break;
            }
            match stream.read(&mut tmp[..want]) {
                Ok(0) => {
                    self.peer_closed = true;
                    self.state = TcpState::PeerClosed;
                    break;
                }
                Ok(n) => {
                    self.rx.push(&tmp[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    match e.raw_os_error() {
                        Some(libc::ECONNRESET) | Some(libc::ENOTCONN) | Some(libc::EPIPE) => {
                            self.peer_closed = true;
                            self.state = TcpState::PeerClosed;
                        }
                        other => {
                            self.last_errno = other.unwrap_or(-1);
                            self.state = TcpState::Error;
                            warn!(errno = self.last_errno, "tcp recv error");
                        }
                    }
                    break;
                }
            }
        }
    }
}

impl ProtocolBackend for TcpBackend {
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
        self.open_host_port(host, port, opts)?;
        Ok(OpenOutcome {
            needs_body_write: false,
        })
    }

    fn write_body(&mut self, offset: u32, data: &[u8]) -> Result<u16, BackendError> {
        if offset != self.write_cursor {
            return Err(BackendError::InvalidRequest);
        }

        if data.is_empty() {
            if self.state == TcpState::Connected && self.opts.halfclose {
                if let Some(stream) = &self.stream {
                    let _ = stream.shutdown(Shutdown::Write);
                }
            }
            return Ok(0);
        }

        match self.state {
            TcpState::Connecting => return Err(BackendError::NotReady),
            TcpState::Connected | TcpState::PeerClosed => {}
            _ => return Err(BackendError::IoError),
        }

        let Some(stream) = &mut self.stream else {
            return Err(BackendError::IoError);
        };
        match stream.write(data) {
            Ok(0) => Err(BackendError::DeviceBusy),
            Ok(n) => {
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

        self.pump_recv();

        if self.rx.is_empty() {
            return match self.state {
                TcpState::Connected | TcpState::Connecting => Err(BackendError::NotReady),
                TcpState::PeerClosed => Ok(ReadOutcome {
                    data: Vec::new(),
                    eof: true,
                    truncated: false,
                }),
                TcpState::Error => Err(BackendError::IoError),
                TcpState::Idle => Err(BackendError::NotReady),
            };
        }

        let data = self.rx.pop(max as usize);
        self.read_cursor = self.read_cursor.wrapping_add(data.len() as u32);
        let truncated = data.len() == max as usize && !self.rx.is_empty();
        let eof = self.rx.is_empty() && self.state == TcpState::PeerClosed;
        Ok(ReadOutcome { data, eof, truncated })
    }

    fn info(&mut self, max_header_bytes: u16) -> Result<InfoOutcome, BackendError> {
        if self.state == TcpState::Error {
            return Err(BackendError::IoError);
        }
        let block = format!(
            "Scheme: tcp\r\nRemote: {}:{}\r\nConnecting: {}\r\nConnected: {}\r\nPeerClosed: {}\r\nRxAvailable: {}\r\nReadCursor: {}\r\nWriteCursor: {}\r\nLastErrno: {}\r\n",
            self.host,
            self.port,
            self.state == TcpState::Connecting,
            self.state == TcpState::Connected,
            self.peer_closed,
            self.rx.len(),
            self.read_cursor,
            self.write_cursor,
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
        if self.state == TcpState::Connecting {
            self.step_connect();
        }
        if self.state == TcpState::Connected {
            self.pump_recv();
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.state = TcpState::Idle;
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read as _, Write as _};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    fn spawn_echo_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                loop {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });
        port
    }

    fn wait_until_connected(backend: &mut TcpBackend) {
        for _ in 0..200 {
            backend.poll();
            if backend.state() == TcpState::Connected {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("tcp backend never reached Connected");
    }

    #[test]
    fn scenario_s1_tcp_echo() {
        let port = spawn_echo_server();
        let mut backend = TcpBackend::new();
        backend
            .open(
                Method::Get,
                OpenFlags::default(),
                &format!("tcp://127.0.0.1:{port}"),
                &[],
                0,
                &[],
            )
            .unwrap();

        wait_until_connected(&mut backend);

        let written = backend.write_body(0, b"hello").unwrap();
        assert_eq!(written, 5);

        let mut received = Vec::new();
        for _ in 0..200 {
            backend.poll();
            match backend.read_body(received.len() as u32, 64) {
                Ok(out) => {
                    received.extend_from_slice(&out.data);
                    if received.len() >= 5 {
                        assert!(!out.eof);
                        break;
                    }
                }
                Err(BackendError::NotReady) => thread::sleep(Duration::from_millis(10)),
                Err(e) => panic!("unexpected error {e:?}"),
            }
        }
        assert_eq!(received, b"hello");

        backend.close();
        assert_eq!(backend.state(), TcpState::Idle);
    }

    #[test]
    fn non_sequential_offset_is_invalid_request() {
        let port = spawn_echo_server();
        let mut backend = TcpBackend::new();
        backend
            .open(Method::Get, OpenFlags::default(), &format!("tcp://127.0.0.1:{port}"), &[], 0, &[])
            .unwrap();
        assert_eq!(backend.write_body(7, b"x"), Err(BackendError::InvalidRequest));
    }

    #[test]
    fn unknown_scheme_rejected_by_url_parse() {
        let mut backend = TcpBackend::new();
        assert!(backend
            .open(Method::Get, OpenFlags::default(), "not-a-url", &[], 0, &[])
            .is_err());
    }
}
