//! Binary payload shapes for `NetworkDevice`'s five commands (§6). Every
//! payload opens with `version: u8 = 1`; integers are little-endian;
//! strings are `u16`-length-prefixed — `fujinet_wire::{Reader, Writer}`
//! already encode that convention, this module just names the fields.

use fujinet_wire::{CodecError, Reader, Writer, PROTOCOL_VERSION};

pub const OP_OPEN: u16 = 0x01;
pub const OP_READ: u16 = 0x02;
pub const OP_WRITE: u16 = 0x03;
pub const OP_CLOSE: u16 = 0x04;
pub const OP_INFO: u16 = 0x05;

pub struct OpenRequest {
    pub method: u8,
    pub flags: u8,
    pub url: String,
    pub request_headers: Vec<(String, String)>,
    pub body_len_hint: u32,
    pub response_header_names: Vec<String>,
}

impl OpenRequest {
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(payload);
        r.version(PROTOCOL_VERSION)?;
        let method = r.u8()?;
        let flags = r.u8()?;
        let url = r.lp_str()?;
        let header_count = r.u16()?;
        let mut request_headers = Vec::with_capacity(header_count as usize);
        for _ in 0..header_count {
            let name = r.lp_str()?;
            let value = r.lp_str()?;
            request_headers.push((name, value));
        }
        let body_len_hint = r.u32()?;
        let resp_count = r.u16()?;
        let mut response_header_names = Vec::with_capacity(resp_count as usize);
        for _ in 0..resp_count {
            response_header_names.push(r.lp_str()?);
        }
        Ok(Self {
            method,
            flags,
            url,
            request_headers,
            body_len_hint,
            response_header_names,
        })
    }
}

pub fn encode_open_response(flags: u8, handle: u16) -> Vec<u8> {
    let mut w = Writer::new();
    w.version().u8(flags).u16(0).u16(handle);
    w.into_vec()
}

pub struct ReadRequest {
    pub handle: u16,
    pub offset: u32,
    pub max_bytes: u16,
}

impl ReadRequest {
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(payload);
        r.version(PROTOCOL_VERSION)?;
        Ok(Self {
            handle: r.u16()?,
            offset: r.u32()?,
            max_bytes: r.u16()?,
        })
    }
}

pub fn encode_read_response(flags: u8, handle: u16, offset: u32, data: &[u8]) -> Vec<u8> {
    let mut w = Writer::new();
    w.version().u8(flags).u16(0).u16(handle).u32(offset).lp_bytes(data);
    w.into_vec()
}

pub struct WriteRequest {
    pub handle: u16,
    pub offset: u32,
    pub data: Vec<u8>,
}

impl WriteRequest {
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(payload);
        r.version(PROTOCOL_VERSION)?;
        let handle = r.u16()?;
        let offset = r.u32()?;
        let data = r.lp_bytes()?.to_vec();
        Ok(Self { handle, offset, data })
    }
}

pub fn encode_write_response(flags: u8, handle: u16, offset: u32, written: u16) -> Vec<u8> {
    let mut w = Writer::new();
    w.version().u8(flags).u16(0).u16(handle).u32(offset).u16(written);
    w.into_vec()
}

pub struct InfoRequest {
    pub handle: u16,
    pub max_header_bytes: u16,
}

impl InfoRequest {
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(payload);
        r.version(PROTOCOL_VERSION)?;
        Ok(Self {
            handle: r.u16()?,
            max_header_bytes: r.u16()?,
        })
    }
}

#[allow(clippy::too_many_arguments)]
pub fn encode_info_response(flags: u8, handle: u16, http_status: u16, content_length: u64, headers: &[u8]) -> Vec<u8> {
    let mut w = Writer::new();
    w.version()
        .u8(flags)
        .u16(0)
        .u16(handle)
        .u16(http_status)
        .u64(content_length)
        .lp_bytes(headers);
    w.into_vec()
}

pub struct CloseRequest {
    pub handle: u16,
}

impl CloseRequest {
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(payload);
        r.version(PROTOCOL_VERSION)?;
        Ok(Self { handle: r.u16()? })
    }
}

pub fn encode_minimal_response() -> Vec<u8> {
    let mut w = Writer::new();
    w.version();
    w.into_vec()
}

pub mod open_response_flags {
    pub const ACCEPTED: u8 = 0x01;
    pub const NEEDS_BODY_WRITE: u8 = 0x02;
}

pub mod read_response_flags {
    pub const EOF: u8 = 0x01;
    pub const TRUNCATED: u8 = 0x02;
}

pub mod info_response_flags {
    pub const HEADERS_INCLUDED: u8 = 0x01;
    pub const HAS_CONTENT_LENGTH: u8 = 0x02;
    pub const HAS_HTTP_STATUS: u8 = 0x04;
}
