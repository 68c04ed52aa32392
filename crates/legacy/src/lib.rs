//! Legacy network bridge (§4.7): maps historical device IDs 0x71-0x78 and
//! single-character commands onto `NetworkDevice` (0xFD). Not a `Device`
//! itself — it owns a `NetworkDevice` and synthesizes requests into it,
//! living above dispatch rather than being dispatched to (§4.1 "a thin
//! adapter layered above dispatch").

use fujinet_bus::Device;
use fujinet_net::backend::{Method, OpenFlags};
use fujinet_net::wire as net_wire;
use fujinet_net::NetworkDevice;
use fujinet_wire::{IORequest, Reader, StatusCode, Writer, PROTOCOL_VERSION};
use tracing::{debug, trace};

/// Legacy logical network units `N1:`-`N8:` occupy device IDs 0x71-0x78.
pub const LEGACY_BASE_DEVICE_ID: u8 = 0x71;
pub const LEGACY_SLOT_COUNT: usize = 8;
/// Device ID the bridge tags its synthesized `NetworkDevice` requests with;
/// purely diagnostic since `NetworkDevice` never inspects it.
pub const NETWORK_DEVICE_ID: u8 = 0xFD;

/// No explicit length field exists on the legacy 'R' command; a historic
/// fixed read chunk the size of one SIO sector frame when the caller
/// supplies neither `aux1` nor `aux2` as a length.
const LEGACY_READ_CHUNK: u16 = 256;

#[derive(Default, Clone)]
struct LegacySlot {
    handle: Option<u16>,
    read_cursor: u32,
    write_cursor: u32,
    awaiting_commit: bool,
}

pub struct LegacyResponse {
    pub ok: bool,
    pub payload: Vec<u8>,
}

impl LegacyResponse {
    fn ok_empty() -> Self {
        Self { ok: true, payload: Vec::new() }
    }

    fn ok(payload: Vec<u8>) -> Self {
        Self { ok: true, payload }
    }

    fn err() -> Self {
        Self { ok: false, payload: Vec::new() }
    }
}

fn slot_index(device_id: u8) -> Option<usize> {
    if (LEGACY_BASE_DEVICE_ID..LEGACY_BASE_DEVICE_ID + LEGACY_SLOT_COUNT as u8).contains(&device_id) {
        Some((device_id - LEGACY_BASE_DEVICE_ID) as usize)
    } else {
        None
    }
}

/// Legacy `aux1` -> HTTP method (§4.7 'O').
fn method_from_aux1(aux1: u8) -> Method {
    match aux1 {
        4 | 12 => Method::Get,
        5 | 9 => Method::Delete,
        8 | 14 => Method::Put,
        13 => Method::Post,
        _ => Method::Get,
    }
}

fn strip_legacy_prefix(payload: &[u8]) -> Option<String> {
    let s = std::str::from_utf8(payload).ok()?;
    let s = s.strip_prefix("N:").or_else(|| s.strip_prefix("n:")).unwrap_or(s);
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// HTTP status -> legacy error byte (§4.7 response translation table).
fn status_to_legacy_error(http_status: Option<u16>, bytes_waiting: bool) -> u8 {
    match http_status {
        Some(s) if (200..300).contains(&s) => {
            if bytes_waiting {
                1
            } else {
                136
            }
        }
        Some(401) | Some(403) => 165,
        Some(404) | Some(410) => 170,
        Some(s) if (400..500).contains(&s) => 144,
        Some(s) if (500..600).contains(&s) => 146,
        _ => 136,
    }
}

fn decode_open_response(payload: &[u8]) -> Option<(u8, u16)> {
    let mut r = Reader::new(payload);
    r.version(PROTOCOL_VERSION).ok()?;
    let flags = r.u8().ok()?;
    let _reserved = r.u16().ok()?;
    let handle = r.u16().ok()?;
    Some((flags, handle))
}

fn decode_read_response(payload: &[u8]) -> Option<(u8, u16, u32, Vec<u8>)> {
    let mut r = Reader::new(payload);
    r.version(PROTOCOL_VERSION).ok()?;
    let flags = r.u8().ok()?;
    let _reserved = r.u16().ok()?;
    let handle = r.u16().ok()?;
    let offset = r.u32().ok()?;
    let data = r.lp_bytes().ok()?.to_vec();
    Some((flags, handle, offset, data))
}

fn decode_write_response(payload: &[u8]) -> Option<u16> {
    let mut r = Reader::new(payload);
    r.version(PROTOCOL_VERSION).ok()?;
    let _flags = r.u8().ok()?;
    let _reserved = r.u16().ok()?;
    let _handle = r.u16().ok()?;
    let _offset = r.u32().ok()?;
    r.u16().ok()
}

fn decode_info_response(payload: &[u8]) -> Option<(u8, u16, u64)> {
    let mut r = Reader::new(payload);
    r.version(PROTOCOL_VERSION).ok()?;
    let flags = r.u8().ok()?;
    let _reserved = r.u16().ok()?;
    let _handle = r.u16().ok()?;
    let http_status = r.u16().ok()?;
    let content_length = r.u64().ok()?;
    Some((flags, http_status, content_length))
}

pub struct LegacyBridge {
    network: NetworkDevice,
    slots: [LegacySlot; LEGACY_SLOT_COUNT],
    next_request_id: u32,
}

impl Default for LegacyBridge {
    fn default() -> Self {
        Self::with_network(NetworkDevice::default())
    }
}

impl LegacyBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_network(network: NetworkDevice) -> Self {
        Self {
            network,
            slots: Default::default(),
            next_request_id: 0,
        }
    }

    fn next_id(&mut self) -> u32 {
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.next_request_id
    }

    fn build_open_request(&mut self, method: Method, flags: OpenFlags, url: &str) -> IORequest {
        let mut w = Writer::new();
        w.version().u8(method as u8).u8(flags.as_u8()).lp_str(url).u16(0).u32(0).u16(0);
        IORequest::new(self.next_id(), NETWORK_DEVICE_ID, net_wire::OP_OPEN, w.into_vec())
    }

    fn build_read_request(&mut self, handle: u16, offset: u32, max_bytes: u16) -> IORequest {
        let mut w = Writer::new();
        w.version().u16(handle).u32(offset).u16(max_bytes);
        IORequest::new(self.next_id(), NETWORK_DEVICE_ID, net_wire::OP_READ, w.into_vec())
    }

    fn build_write_request(&mut self, handle: u16, offset: u32, data: &[u8]) -> IORequest {
        let mut w = Writer::new();
        w.version().u16(handle).u32(offset).lp_bytes(data);
        IORequest::new(self.next_id(), NETWORK_DEVICE_ID, net_wire::OP_WRITE, w.into_vec())
    }

    fn build_info_request(&mut self, handle: u16) -> IORequest {
        let mut w = Writer::new();
        w.version().u16(handle).u16(512);
        IORequest::new(self.next_id(), NETWORK_DEVICE_ID, net_wire::OP_INFO, w.into_vec())
    }

    fn build_close_request(&mut self, handle: u16) -> IORequest {
        let mut w = Writer::new();
        w.version().u16(handle);
        IORequest::new(self.next_id(), NETWORK_DEVICE_ID, net_wire::OP_CLOSE, w.into_vec())
    }

    fn commit_if_pending(&mut self, idx: usize) {
        if !self.slots[idx].awaiting_commit {
            return;
        }
        if let Some(handle) = self.slots[idx].handle {
            let offset = self.slots[idx].write_cursor;
            let req = self.build_write_request(handle, offset, &[]);
            let _ = self.network.handle(&req);
        }
        self.slots[idx].awaiting_commit = false;
    }

    fn handle_open(&mut self, idx: usize, aux1: u8, aux2: u8, payload: &[u8]) -> LegacyResponse {
        let Some(url) = strip_legacy_prefix(payload) else {
            return LegacyResponse::err();
        };
        let method = method_from_aux1(aux1);
        let mut flags = OpenFlags::from_u8(aux2 & 0x07);
        if method.has_request_body() {
            flags.streamed_body_no_length = true;
        }
        let req = self.build_open_request(method, flags, &url);
        let resp = self.network.handle(&req);
        if resp.status != StatusCode::Ok {
            self.slots[idx] = LegacySlot::default();
            return LegacyResponse::err();
        }
        let Some((_flags, handle)) = decode_open_response(&resp.payload) else {
            return LegacyResponse::err();
        };
        trace!(device_slot = idx, handle, url = %url, "legacy bridge opened session");
        self.slots[idx] = LegacySlot {
            handle: Some(handle),
            read_cursor: 0,
            write_cursor: 0,
            awaiting_commit: method.has_request_body(),
        };
        LegacyResponse::ok_empty()
    }

    fn handle_status(&mut self, idx: usize) -> LegacyResponse {
        if self.slots[idx].handle.is_none() {
            return LegacyResponse::ok(vec![0, 0, 0, 136]);
        }
        self.commit_if_pending(idx);
        let handle = self.slots[idx].handle.unwrap();
        let req = self.build_info_request(handle);
        let resp = self.network.handle(&req);
        if resp.status != StatusCode::Ok {
            return LegacyResponse::ok(vec![0, 0, 0, 136]);
        }
        let Some((flags, http_status, content_length)) = decode_info_response(&resp.payload) else {
            return LegacyResponse::ok(vec![0, 0, 0, 136]);
        };
        let has_status = flags & net_wire::info_response_flags::HAS_HTTP_STATUS != 0;
        let has_len = flags & net_wire::info_response_flags::HAS_CONTENT_LENGTH != 0;
        let remaining = if has_len {
            content_length.saturating_sub(self.slots[idx].read_cursor as u64)
        } else {
            0
        };
        let n = remaining.min(u16::MAX as u64) as u16;
        let connected = u8::from(n > 0);
        let err = status_to_legacy_error(has_status.then_some(http_status), remaining > 0);
        let [lo, hi] = n.to_le_bytes();
        LegacyResponse::ok(vec![lo, hi, connected, err])
    }

    fn handle_read(&mut self, idx: usize, aux1: u8, aux2: u8) -> LegacyResponse {
        let Some(handle) = self.slots[idx].handle else {
            return LegacyResponse::err();
        };
        self.commit_if_pending(idx);
        let requested = u16::from_le_bytes([aux1, aux2]);
        let max_bytes = if requested == 0 { LEGACY_READ_CHUNK } else { requested };
        let offset = self.slots[idx].read_cursor;
        let req = self.build_read_request(handle, offset, max_bytes);
        let resp = self.network.handle(&req);
        if resp.status != StatusCode::Ok {
            return LegacyResponse::err();
        }
        let Some((_flags, _h, _offset, data)) = decode_read_response(&resp.payload) else {
            return LegacyResponse::err();
        };
        self.slots[idx].read_cursor = self.slots[idx].read_cursor.wrapping_add(data.len() as u32);
        LegacyResponse::ok(data)
    }

    fn handle_write(&mut self, idx: usize, payload: &[u8]) -> LegacyResponse {
        let Some(handle) = self.slots[idx].handle else {
            return LegacyResponse::err();
        };
        let offset = self.slots[idx].write_cursor;
        let req = self.build_write_request(handle, offset, payload);
        let resp = self.network.handle(&req);
        if resp.status != StatusCode::Ok {
            return LegacyResponse::err();
        }
        let Some(written) = decode_write_response(&resp.payload) else {
            return LegacyResponse::err();
        };
        self.slots[idx].write_cursor = self.slots[idx].write_cursor.wrapping_add(written as u32);
        if payload.is_empty() {
            self.slots[idx].awaiting_commit = false;
        }
        LegacyResponse::ok_empty()
    }

    fn handle_close(&mut self, idx: usize) -> LegacyResponse {
        let Some(handle) = self.slots[idx].handle else {
            return LegacyResponse::err();
        };
        let req = self.build_close_request(handle);
        let _ = self.network.handle(&req);
        self.slots[idx] = LegacySlot::default();
        LegacyResponse::ok_empty()
    }

    /// Dispatches one legacy single-character command (§4.7). `device_id`
    /// must fall in 0x71-0x78; anything else fails closed.
    pub fn handle(&mut self, device_id: u8, command: u8, aux1: u8, aux2: u8, payload: &[u8]) -> LegacyResponse {
        let Some(idx) = slot_index(device_id) else {
            debug!(device_id, "legacy bridge saw an out-of-range device id");
            return LegacyResponse::err();
        };
        match command {
            b'O' => self.handle_open(idx, aux1, aux2, payload),
            b'S' => self.handle_status(idx),
            b'R' => self.handle_read(idx, aux1, aux2),
            b'W' => self.handle_write(idx, payload),
            b'C' => self.handle_close(idx),
            _ => LegacyResponse::err(),
        }
    }

    pub fn poll(&mut self) {
        self.network.poll();
    }
}
