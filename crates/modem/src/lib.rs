//! `ModemDevice` (§4.5): a Hayes AT interpreter sitting on top of the TCP
//! backend `fujinet-net` already ships, exposing two sequential byte pipes
//! to the host (`Write`/`Read`) plus `Status` and a binary `Control`
//! command that mirrors every AT verb this modem understands.
//!
//! The AT-line path (`hayes::parse` over bytes written in command mode)
//! and the `Control` opcode both bottom out in `apply_command`, so a
//! console/diagnostics caller gets the exact same state machine a host
//! typing `ATDT...` would drive.

pub mod hayes;
pub mod telnet;
pub mod wire;

use std::net::{TcpListener, TcpStream};

use fujinet_bus::Device;
use fujinet_net::backend::{BackendError, ProtocolBackend};
use fujinet_net::backends::tcp::{TcpBackend, TcpState};
use fujinet_net::ring::RingBuffer;
use fujinet_net::urlparse::TcpOptions;
use fujinet_wire::{IORequest, IOResponse, StatusCode, PROTOCOL_VERSION};
use tracing::{debug, trace};

use hayes::{Command, ResultCode};
use telnet::TelnetFilter;

/// Host-visible pipe capacity, in each direction (§3 "bounded ring buffers").
pub const RING_CAPACITY: usize = 4096;
/// How often a pending caller re-triggers `RING` while unanswered.
pub const RING_INTERVAL_TICKS: u64 = 5;
/// How long a pending caller rings before being dropped.
pub const RING_TIMEOUT_TICKS: u64 = 50;
/// Delay between the backend reaching `Connected` and `CONNECT` being
/// emitted, for both `ATDT` and answered calls (§4.5).
pub const ANSWER_DELAY_TICKS: u64 = 3;
/// Required silence, in ticks, before and after the `+++` escape sequence.
pub const ESCAPE_GUARD_TICKS: u64 = 10;

const MAX_COMMAND_LINE: usize = 256;
const NET_READ_CHUNK: u16 = 512;
const ADOPTED_RX_BUF: usize = 8 * 1024;
const DEFAULT_DIAL_PORT: u16 = 23;

/// Splits `"host[:port]"` (no URL scheme) the way `ATDT` targets arrive.
fn parse_dial_target(target: &str) -> Option<(String, u16)> {
    let target = target.trim();
    if target.is_empty() {
        return None;
    }
    if let Some((host, port_str)) = target.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            if !host.is_empty() {
                return Some((host.to_string(), port));
            }
        }
    }
    Some((target.to_string(), DEFAULT_DIAL_PORT))
}

pub struct ModemDevice {
    host_to_net: RingBuffer,
    net_to_host: RingBuffer,
    host_write_cursor: u32,
    host_read_cursor: u32,

    command_mode: bool,
    command_line: Vec<u8>,

    backend: TcpBackend,
    backend_write_cursor: u32,
    backend_read_cursor: u32,
    connect_pending_since: Option<u64>,
    connect_emitted: bool,
    link_was_up: bool,

    listener: Option<TcpListener>,
    listen_port: u16,
    pending_accept: Option<TcpStream>,
    ring_pending: bool,
    ring_started_tick: u64,
    last_ring_tick: Option<u64>,

    auto_answer: bool,
    numeric_result: bool,
    telnet_enabled: bool,
    echo: bool,
    baud: u32,
    baud_lock: bool,
    telnet_filter: TelnetFilter,

    escape_plus_count: u8,
    escape_last_activity_tick: u64,
    escape_armed_tick: Option<u64>,

    tick: u64,
}

impl Default for ModemDevice {
    fn default() -> Self {
        Self {
            host_to_net: RingBuffer::new(RING_CAPACITY),
            net_to_host: RingBuffer::new(RING_CAPACITY),
            host_write_cursor: 0,
            host_read_cursor: 0,

            command_mode: true,
            command_line: Vec::new(),

            backend: TcpBackend::new(),
            backend_write_cursor: 0,
            backend_read_cursor: 0,
            connect_pending_since: None,
            connect_emitted: false,
            link_was_up: false,

            listener: None,
            listen_port: 0,
            pending_accept: None,
            ring_pending: false,
            ring_started_tick: 0,
            last_ring_tick: None,

            auto_answer: false,
            numeric_result: false,
            telnet_enabled: true,
            echo: true,
            baud: 2400,
            baud_lock: false,
            telnet_filter: TelnetFilter::default(),

            escape_plus_count: 0,
            escape_last_activity_tick: 0,
            escape_armed_tick: None,

            tick: 0,
        }
    }
}

impl ModemDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_result(&mut self, code: ResultCode) {
        let bytes = code.render(self.numeric_result);
        trace!(?code, numeric = self.numeric_result, "modem result code");
        self.net_to_host.push(&bytes);
    }

    fn status_flags(&self) -> u8 {
        use wire::status_flags::*;
        let mut flags = 0u8;
        if self.command_mode {
            flags |= COMMAND_MODE;
        }
        if self.backend.state() == TcpState::Connected {
            flags |= CONNECTED;
        }
        if self.listener.is_some() {
            flags |= LISTENING;
        }
        if self.ring_pending {
            flags |= PENDING_CALLER;
        }
        if self.auto_answer {
            flags |= AUTOANSWER;
        }
        if self.telnet_enabled {
            flags |= TELNET;
        }
        if self.echo {
            flags |= ECHO;
        }
        if self.numeric_result {
            flags |= NUMERIC_RESULT;
        }
        flags
    }

    // ---- command execution, shared by the AT-line path and Control ----

    fn apply_command(&mut self, cmd: Command) -> Option<ResultCode> {
        match cmd {
            Command::Attention => Some(ResultCode::Ok),
            Command::Reset => {
                self.do_reset();
                Some(ResultCode::Ok)
            }
            Command::Hangup => {
                self.do_hangup();
                Some(ResultCode::Ok)
            }
            Command::Answer => {
                if self.pending_accept.is_some() {
                    self.do_answer();
                    None
                } else {
                    Some(ResultCode::Error)
                }
            }
            Command::Dial(target) => match self.do_dial(&target) {
                Ok(()) => None,
                Err(()) => Some(ResultCode::NoCarrier),
            },
            Command::SetBaud(baud) => {
                if self.baud_lock {
                    Some(ResultCode::Error)
                } else {
                    self.baud = baud;
                    Some(ResultCode::Ok)
                }
            }
            Command::SetBaudLock(v) => {
                self.baud_lock = v;
                Some(ResultCode::Ok)
            }
            Command::SetEcho(v) => {
                self.echo = v;
                Some(ResultCode::Ok)
            }
            Command::SetAutoAnswer(v) => {
                self.auto_answer = v;
                Some(ResultCode::Ok)
            }
            Command::SetNumericResult(v) => {
                self.numeric_result = v;
                Some(ResultCode::Ok)
            }
            Command::SetTelnet(v) => {
                self.telnet_enabled = v;
                Some(ResultCode::Ok)
            }
        }
    }

    fn process_at_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match hayes::parse(line) {
            Some(cmd) => {
                if let Some(code) = self.apply_command(cmd) {
                    self.push_result(code);
                }
            }
            None => self.push_result(ResultCode::Error),
        }
    }

    fn do_dial(&mut self, target: &str) -> Result<(), ()> {
        let Some((host, port)) = parse_dial_target(target) else {
            return Err(());
        };
        let mut backend = TcpBackend::new();
        match backend.open_host_port(host.clone(), port, TcpOptions::default()) {
            Ok(()) => {
                debug!(host, port, "modem dialing");
                self.backend = backend;
                self.backend_write_cursor = 0;
                self.backend_read_cursor = 0;
                self.connect_pending_since = Some(self.tick);
                self.connect_emitted = false;
                self.link_was_up = false;
                Ok(())
            }
            Err(_) => Err(()),
        }
    }

    fn do_answer(&mut self) {
        if let Some(stream) = self.pending_accept.take() {
            let mut backend = TcpBackend::new();
            if backend.adopt_stream(stream, ADOPTED_RX_BUF).is_ok() {
                debug!("modem answered incoming call");
                self.backend = backend;
                self.backend_write_cursor = 0;
                self.backend_read_cursor = 0;
                self.connect_pending_since = Some(self.tick);
                self.connect_emitted = false;
                self.link_was_up = false;
            }
        }
        self.ring_pending = false;
    }

    fn do_hangup(&mut self) {
        self.backend.close();
        self.backend = TcpBackend::new();
        self.command_mode = true;
        self.connect_pending_since = None;
        self.connect_emitted = false;
        self.link_was_up = false;
    }

    fn do_reset(&mut self) {
        self.do_hangup();
        self.host_to_net = RingBuffer::new(RING_CAPACITY);
        self.net_to_host = RingBuffer::new(RING_CAPACITY);
        self.host_write_cursor = 0;
        self.host_read_cursor = 0;
        self.command_line.clear();
        self.escape_plus_count = 0;
        self.escape_armed_tick = None;
        self.baud = 2400;
        self.baud_lock = false;
        self.auto_answer = false;
        self.numeric_result = false;
        self.echo = true;
        self.telnet_enabled = true;
        self.telnet_filter = TelnetFilter::default();
    }

    fn do_listen(&mut self, port: u16) -> Result<(), ()> {
        let listener = TcpListener::bind(("0.0.0.0", port)).map_err(|_| ())?;
        listener.set_nonblocking(true).map_err(|_| ())?;
        self.listen_port = listener.local_addr().map(|a| a.port()).unwrap_or(port);
        self.listener = Some(listener);
        Ok(())
    }

    fn do_unlisten(&mut self) {
        self.listener = None;
        self.pending_accept = None;
        self.ring_pending = false;
        self.listen_port = 0;
    }

    // ---- poll-driven plumbing ----

    fn accept_pending_callers(&mut self) {
        if self.pending_accept.is_some() {
            return;
        }
        let Some(listener) = &self.listener else {
            return;
        };
        if let Ok((stream, _addr)) = listener.accept() {
            let _ = stream.set_nonblocking(true);
            self.pending_accept = Some(stream);
            self.ring_pending = true;
            self.ring_started_tick = self.tick;
            self.last_ring_tick = None;
        }
    }

    fn service_ring(&mut self) {
        if !self.ring_pending {
            return;
        }
        if self.tick.saturating_sub(self.ring_started_tick) >= RING_TIMEOUT_TICKS {
            self.pending_accept = None;
            self.ring_pending = false;
            return;
        }
        let should_emit = match self.last_ring_tick {
            None => true,
            Some(t) => self.tick.saturating_sub(t) >= RING_INTERVAL_TICKS,
        };
        if should_emit {
            self.push_result(ResultCode::Ring);
            self.last_ring_tick = Some(self.tick);
            if self.auto_answer {
                self.do_answer();
            }
        }
    }

    fn service_connect_delay(&mut self) {
        if self.connect_emitted {
            return;
        }
        let Some(since) = self.connect_pending_since else {
            return;
        };
        match self.backend.state() {
            TcpState::Error | TcpState::PeerClosed => {
                self.push_result(ResultCode::NoCarrier);
                self.connect_pending_since = None;
                self.command_mode = true;
            }
            TcpState::Connected if self.tick.saturating_sub(since) >= ANSWER_DELAY_TICKS => {
                self.push_result(ResultCode::Connect(self.baud));
                self.command_mode = false;
                self.connect_emitted = true;
                self.link_was_up = true;
                self.connect_pending_since = None;
            }
            _ => {}
        }
    }

    fn service_link_drop(&mut self) {
        if self.link_was_up && !matches!(self.backend.state(), TcpState::Connected | TcpState::Connecting) {
            self.push_result(ResultCode::NoCarrier);
            self.link_was_up = false;
            self.command_mode = true;
            self.connect_emitted = false;
        }
    }

    fn update_escape_state(&mut self, bytes: &[u8]) {
        let now = self.tick;
        for &b in bytes {
            if b == b'+' {
                if self.escape_plus_count == 0 {
                    if now.saturating_sub(self.escape_last_activity_tick) >= ESCAPE_GUARD_TICKS {
                        self.escape_plus_count = 1;
                    }
                } else if self.escape_plus_count < 3 {
                    self.escape_plus_count += 1;
                } else {
                    self.escape_plus_count = 0;
                }
            } else {
                self.escape_plus_count = 0;
            }
            self.escape_last_activity_tick = now;
        }
        self.escape_armed_tick = if self.escape_plus_count == 3 { Some(now) } else { None };
    }

    fn check_escape_complete(&mut self) {
        let Some(armed) = self.escape_armed_tick else {
            return;
        };
        if self.tick.saturating_sub(armed) >= ESCAPE_GUARD_TICKS {
            self.command_mode = true;
            self.escape_plus_count = 0;
            self.escape_armed_tick = None;
            self.push_result(ResultCode::Ok);
        }
    }

    fn drain_host_to_net(&mut self) {
        if self.command_mode {
            let chunk = self.host_to_net.pop(self.host_to_net.len());
            for b in chunk {
                if b == b'\r' || b == b'\n' {
                    if !self.command_line.is_empty() {
                        let line = std::mem::take(&mut self.command_line);
                        match String::from_utf8(line) {
                            Ok(line) => self.process_at_line(&line),
                            Err(_) => self.push_result(ResultCode::Error),
                        }
                    }
                } else if self.command_line.len() < MAX_COMMAND_LINE {
                    self.command_line.push(b);
                }
            }
            return;
        }

        let pending = self.host_to_net.pop(self.host_to_net.len());
        if pending.is_empty() {
            return;
        }
        self.update_escape_state(&pending);
        let out = if self.telnet_enabled {
            telnet::escape_outgoing(&pending)
        } else {
            pending
        };
        match self.backend.write_body(self.backend_write_cursor, &out) {
            Ok(n) => {
                self.backend_write_cursor = self.backend_write_cursor.wrapping_add(n as u32);
                if (n as usize) < out.len() {
                    self.host_to_net.push(&out[n as usize..]);
                }
            }
            Err(_) => {
                self.host_to_net.push(&out);
            }
        }
    }

    fn pump_net_to_host(&mut self) {
        loop {
            if self.net_to_host.free_space() == 0 {
                break;
            }
            match self.backend.read_body(self.backend_read_cursor, NET_READ_CHUNK) {
                Ok(outcome) => {
                    let got_any = !outcome.data.is_empty();
                    self.backend_read_cursor = self.backend_read_cursor.wrapping_add(outcome.data.len() as u32);

                    let visible = if self.telnet_enabled {
                        let (visible, replies) = self.telnet_filter.process_incoming(&outcome.data);
                        if !replies.is_empty() {
                            if let Ok(n) = self.backend.write_body(self.backend_write_cursor, &replies) {
                                self.backend_write_cursor = self.backend_write_cursor.wrapping_add(n as u32);
                            }
                        }
                        visible
                    } else {
                        outcome.data
                    };
                    self.net_to_host.push(&visible);

                    if outcome.eof || !got_any {
                        break;
                    }
                }
                Err(BackendError::NotReady) => break,
                Err(_) => break,
            }
        }
    }

    // ---- bus command handlers ----

    fn handle_write(&mut self, req: &IORequest) -> IOResponse {
        let decoded = match wire::WriteRequest::decode(&req.payload) {
            Ok(d) => d,
            Err(_) => return IOResponse::error(req, StatusCode::InvalidRequest),
        };
        if decoded.offset != self.host_write_cursor {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        }
        if decoded.data.is_empty() {
            return IOResponse::ok(req, wire::encode_write_response(0));
        }
        let pushed = self.host_to_net.push(&decoded.data);
        if pushed == 0 {
            return IOResponse::error(req, StatusCode::DeviceBusy);
        }
        self.host_write_cursor = self.host_write_cursor.wrapping_add(pushed as u32);
        IOResponse::ok(req, wire::encode_write_response(pushed as u16))
    }

    fn handle_read(&mut self, req: &IORequest) -> IOResponse {
        let decoded = match wire::ReadRequest::decode(&req.payload) {
            Ok(d) => d,
            Err(_) => return IOResponse::error(req, StatusCode::InvalidRequest),
        };
        if decoded.offset != self.host_read_cursor {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        }
        if self.net_to_host.is_empty() {
            return IOResponse::error(req, StatusCode::NotReady);
        }
        let data = self.net_to_host.pop(decoded.max_bytes as usize);
        self.host_read_cursor = self.host_read_cursor.wrapping_add(data.len() as u32);
        IOResponse::ok(req, wire::encode_read_response(decoded.offset, &data))
    }

    fn handle_status(&mut self, req: &IORequest) -> IOResponse {
        let mut r = fujinet_wire::Reader::new(&req.payload);
        if r.version(PROTOCOL_VERSION).is_err() {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        }
        IOResponse::ok(
            req,
            wire::encode_status_response(
                self.status_flags(),
                self.listen_port,
                self.net_to_host.len().min(u16::MAX as usize) as u16,
                self.host_write_cursor,
                self.host_read_cursor,
            ),
        )
    }

    fn handle_control(&mut self, req: &IORequest) -> IOResponse {
        let decoded = match wire::ControlRequest::decode(&req.payload) {
            Ok(d) => d,
            Err(_) => return IOResponse::error(req, StatusCode::InvalidRequest),
        };
        use wire::ControlRequest::*;
        match decoded {
            Hangup => {
                if let Some(code) = self.apply_command(Command::Hangup) {
                    self.push_result(code);
                }
            }
            Dial(target) => {
                if let Some(code) = self.apply_command(Command::Dial(target)) {
                    self.push_result(code);
                }
            }
            Listen(port) => match self.do_listen(port) {
                Ok(()) => self.push_result(ResultCode::Ok),
                Err(()) => self.push_result(ResultCode::Error),
            },
            Unlisten => {
                self.do_unlisten();
                self.push_result(ResultCode::Ok);
            }
            Answer => {
                if let Some(code) = self.apply_command(Command::Answer) {
                    self.push_result(code);
                }
            }
            SetAutoAnswer(v) => {
                if let Some(code) = self.apply_command(Command::SetAutoAnswer(v)) {
                    self.push_result(code);
                }
            }
            SetTelnet(v) => {
                if let Some(code) = self.apply_command(Command::SetTelnet(v)) {
                    self.push_result(code);
                }
            }
            SetEcho(v) => {
                if let Some(code) = self.apply_command(Command::SetEcho(v)) {
                    self.push_result(code);
                }
            }
            SetNumeric(v) => {
                if let Some(code) = self.apply_command(Command::SetNumericResult(v)) {
                    self.push_result(code);
                }
            }
            SetBaud(baud) => {
                if let Some(code) = self.apply_command(Command::SetBaud(baud)) {
                    self.push_result(code);
                }
            }
            SetBaudLock(v) => {
                if let Some(code) = self.apply_command(Command::SetBaudLock(v)) {
                    self.push_result(code);
                }
            }
            Reset => {
                if let Some(code) = self.apply_command(Command::Reset) {
                    self.push_result(code);
                }
            }
        }
        IOResponse::ok(req, wire::encode_minimal_response())
    }
}

impl Device for ModemDevice {
    fn handle(&mut self, request: &IORequest) -> IOResponse {
        match request.command {
            wire::OP_WRITE => self.handle_write(request),
            wire::OP_READ => self.handle_read(request),
            wire::OP_STATUS => self.handle_status(request),
            wire::OP_CONTROL => self.handle_control(request),
            _ => IOResponse::error(request, StatusCode::InvalidRequest),
        }
    }

    fn poll(&mut self) {
        self.tick += 1;
        self.backend.poll();
        self.accept_pending_callers();
        self.service_ring();
        self.service_connect_delay();
        self.drain_host_to_net();
        self.pump_net_to_host();
        self.check_escape_complete();
        self.service_link_drop();
    }
}
