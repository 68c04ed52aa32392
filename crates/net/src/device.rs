//! `NetworkDevice` (§4.2): a fixed array of `MAX_SESSIONS` handle-tagged
//! sessions binding `OPEN`-time URL schemes to protocol backends, and
//! dispatching `READ`/`WRITE`/`INFO`/`CLOSE` to whichever backend a
//! session holds.

use fujinet_bus::Device;
use fujinet_wire::{IORequest, IOResponse, StatusCode};
use tracing::{trace, warn};

use crate::backend::{Method, OpenFlags, ProtocolBackend};
use crate::registry::ProtocolRegistry;
use crate::wire::{self, info_response_flags, open_response_flags, read_response_flags};

/// Fixed session table size. 8 concurrent network sessions comfortably
/// covers every 8-bit host this firmware core talks to.
pub const MAX_SESSIONS: usize = 8;

struct Session {
    active: bool,
    generation: u8,
    #[allow(dead_code)]
    method: Method,
    #[allow(dead_code)]
    flags: OpenFlags,
    url: String,
    backend: Box<dyn ProtocolBackend>,
    created_tick: u64,
    last_activity_tick: u64,
    completed: bool,
}

/// Encodes `(generation << 8) | index` per §3 "Session (NetworkDevice)".
fn make_handle(generation: u8, index: usize) -> u16 {
    ((generation as u16) << 8) | (index as u16 & 0xFF)
}

fn split_handle(handle: u16) -> (u8, usize) {
    ((handle >> 8) as u8, (handle & 0xFF) as usize)
}

pub struct NetworkDevice {
    sessions: Vec<Option<Session>>,
    registry: ProtocolRegistry,
    tick: u64,
}

impl Default for NetworkDevice {
    fn default() -> Self {
        Self::new(ProtocolRegistry::with_defaults())
    }
}

impl NetworkDevice {
    pub fn new(registry: ProtocolRegistry) -> Self {
        let mut sessions = Vec::with_capacity(MAX_SESSIONS);
        sessions.resize_with(MAX_SESSIONS, || None);
        Self {
            sessions,
            registry,
            tick: 0,
        }
    }

    fn find_free_slot(&self) -> Option<usize> {
        self.sessions.iter().position(|s| s.is_none())
    }

    fn resolve(&mut self, handle: u16) -> Option<&mut Session> {
        let (generation, index) = split_handle(handle);
        let slot = self.sessions.get_mut(index)?;
        match slot {
            Some(session) if session.active && session.generation == generation => Some(session),
            _ => None,
        }
    }

    fn handle_open(&mut self, req: &IORequest) -> IOResponse {
        let decoded = match wire::OpenRequest::decode(&req.payload) {
            Ok(d) => d,
            Err(_) => return IOResponse::error(req, StatusCode::InvalidRequest),
        };

        let Some(method) = Method::from_u8(decoded.method) else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };
        let flags = OpenFlags::from_u8(decoded.flags);

        let Some(scheme) = crate::backend::extract_scheme(&decoded.url) else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };
        let Some(mut backend) = self.registry.create(&scheme) else {
            warn!(scheme = %scheme, "unregistered url scheme");
            return IOResponse::error(req, StatusCode::Unsupported);
        };

        let Some(index) = self.find_free_slot() else {
            return IOResponse::error(req, StatusCode::DeviceBusy);
        };

        let open_result = backend.open(
            method,
            flags,
            &decoded.url,
            &decoded.request_headers,
            decoded.body_len_hint,
            &decoded.response_header_names,
        );

        let outcome = match open_result {
            Ok(outcome) => outcome,
            Err(e) => {
                let status: StatusCode = e.into();
                return IOResponse::error(req, status);
            }
        };

        let generation = match self.sessions[index].as_ref() {
            Some(s) => {
                let mut g = s.generation.wrapping_add(1);
                if g == 0 {
                    g = 1;
                }
                g
            }
            None => 1,
        };

        self.tick += 1;
        self.sessions[index] = Some(Session {
            active: true,
            generation,
            method,
            flags,
            url: decoded.url,
            backend,
            created_tick: self.tick,
            last_activity_tick: self.tick,
            completed: false,
        });

        let handle = make_handle(generation, index);
        trace!(handle, scheme = %scheme, "session opened");

        let mut resp_flags = open_response_flags::ACCEPTED;
        if outcome.needs_body_write {
            resp_flags |= open_response_flags::NEEDS_BODY_WRITE;
        }
        IOResponse::ok(req, wire::encode_open_response(resp_flags, handle))
    }

    fn handle_read(&mut self, req: &IORequest) -> IOResponse {
        let decoded = match wire::ReadRequest::decode(&req.payload) {
            Ok(d) => d,
            Err(_) => return IOResponse::error(req, StatusCode::InvalidRequest),
        };
        let tick = self.tick;
        let Some(session) = self.resolve(decoded.handle) else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };
        session.last_activity_tick = tick;

        match session.backend.read_body(decoded.offset, decoded.max_bytes) {
            Ok(outcome) => {
                if outcome.eof {
                    session.completed = true;
                }
                let mut flags = 0u8;
                if outcome.eof {
                    flags |= read_response_flags::EOF;
                }
                if outcome.truncated {
                    flags |= read_response_flags::TRUNCATED;
                }
                IOResponse::ok(req, wire::encode_read_response(flags, decoded.handle, decoded.offset, &outcome.data))
            }
            Err(e) => IOResponse::error(req, e.into()),
        }
    }

    fn handle_write(&mut self, req: &IORequest) -> IOResponse {
        let decoded = match wire::WriteRequest::decode(&req.payload) {
            Ok(d) => d,
            Err(_) => return IOResponse::error(req, StatusCode::InvalidRequest),
        };
        let tick = self.tick;
        let Some(session) = self.resolve(decoded.handle) else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };
        session.last_activity_tick = tick;

        match session.backend.write_body(decoded.offset, &decoded.data) {
            Ok(written) => IOResponse::ok(req, wire::encode_write_response(0, decoded.handle, decoded.offset, written)),
            Err(e) => IOResponse::error(req, e.into()),
        }
    }

    fn handle_info(&mut self, req: &IORequest) -> IOResponse {
        let decoded = match wire::InfoRequest::decode(&req.payload) {
            Ok(d) => d,
            Err(_) => return IOResponse::error(req, StatusCode::InvalidRequest),
        };
        let Some(session) = self.resolve(decoded.handle) else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };

        match session.backend.info(decoded.max_header_bytes) {
            Ok(outcome) => {
                let mut flags = 0u8;
                if !outcome.headers_block.is_empty() {
                    flags |= info_response_flags::HEADERS_INCLUDED;
                }
                if outcome.content_length.is_some() {
                    flags |= info_response_flags::HAS_CONTENT_LENGTH;
                }
                if outcome.http_status.is_some() {
                    flags |= info_response_flags::HAS_HTTP_STATUS;
                }
                IOResponse::ok(
                    req,
                    wire::encode_info_response(
                        flags,
                        decoded.handle,
                        outcome.http_status.unwrap_or(0),
                        outcome.content_length.unwrap_or(0),
                        &outcome.headers_block,
                    ),
                )
            }
            Err(e) => IOResponse::error(req, e.into()),
        }
    }

    fn handle_close(&mut self, req: &IORequest) -> IOResponse {
        let decoded = match wire::CloseRequest::decode(&req.payload) {
            Ok(d) => d,
            Err(_) => return IOResponse::error(req, StatusCode::InvalidRequest),
        };
        let (generation, index) = split_handle(decoded.handle);
        match self.sessions.get_mut(index) {
            Some(slot @ Some(_)) if slot.as_ref().unwrap().generation == generation && slot.as_ref().unwrap().active => {
                let mut session = slot.take().unwrap();
                session.backend.close();
                IOResponse::ok(req, wire::encode_minimal_response())
            }
            _ => IOResponse::error(req, StatusCode::InvalidRequest),
        }
    }

    /// Session URL for diagnostics/console use; not part of the wire
    /// protocol.
    pub fn session_url(&self, handle: u16) -> Option<&str> {
        let (generation, index) = split_handle(handle);
        self.sessions
            .get(index)?
            .as_ref()
            .filter(|s| s.active && s.generation == generation)
            .map(|s| s.url.as_str())
    }
}

impl Device for NetworkDevice {
    fn handle(&mut self, request: &IORequest) -> IOResponse {
        match request.command {
            wire::OP_OPEN => self.handle_open(request),
            wire::OP_READ => self.handle_read(request),
            wire::OP_WRITE => self.handle_write(request),
            wire::OP_INFO => self.handle_info(request),
            wire::OP_CLOSE => self.handle_close(request),
            _ => IOResponse::error(request, StatusCode::InvalidRequest),
        }
    }

    fn poll(&mut self) {
        self.tick += 1;
        for slot in self.sessions.iter_mut().flatten() {
            slot.backend.poll();
        }
    }
}
