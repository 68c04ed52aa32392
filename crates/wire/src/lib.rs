//! Value records exchanged on the device bus, and the little-endian,
//! length-prefixed binary codec every device payload is built from.
//!
//! This crate has no knowledge of devices, sessions, or backends — it is
//! the shared vocabulary `fujinet-bus` and every virtual device crate link
//! against, the same role `shared::rpc`/`shared::protocol` play for the
//! judge workspace this project grew out of.

pub mod codec;

pub use codec::{CodecError, Reader, Writer};

/// 8-bit device identifier routed by the bus.
pub type DeviceId = u8;

/// Monotonically increasing request identifier assigned by the transport.
pub type RequestId = u32;

/// Coarse kind of a bus request, carried alongside the 16-bit command code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    Command,
    Data,
    Status,
}

/// Uniform status returned by every device on the bus.
///
/// Backends classify platform errors into one of these; `DeviceBus` never
/// masks a code and never invents a new one on the way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    InvalidRequest,
    NotReady,
    DeviceBusy,
    IoError,
    DeviceNotFound,
    Unsupported,
    InternalError,
}

impl StatusCode {
    pub fn is_ok(self) -> bool {
        matches!(self, StatusCode::Ok)
    }
}

/// A single request handed to `DeviceBus::dispatch`.
#[derive(Debug, Clone)]
pub struct IORequest {
    pub id: RequestId,
    pub device_id: DeviceId,
    pub request_type: RequestType,
    pub command: u16,
    /// Legacy "aux" parameter bytes (small, fixed-ish; typically 0-4 bytes).
    pub params: Vec<u8>,
    pub payload: Vec<u8>,
}

impl IORequest {
    pub fn new(id: RequestId, device_id: DeviceId, command: u16, payload: Vec<u8>) -> Self {
        Self {
            id,
            device_id,
            request_type: RequestType::Command,
            command,
            params: Vec::new(),
            payload,
        }
    }

    pub fn with_params(mut self, params: Vec<u8>) -> Self {
        self.params = params;
        self
    }

    pub fn with_type(mut self, request_type: RequestType) -> Self {
        self.request_type = request_type;
        self
    }
}

/// The response to an `IORequest`, carrying the same id/device/command.
#[derive(Debug, Clone)]
pub struct IOResponse {
    pub id: RequestId,
    pub device_id: DeviceId,
    pub command: u16,
    pub status: StatusCode,
    pub payload: Vec<u8>,
}

impl IOResponse {
    pub fn new(req: &IORequest, status: StatusCode, payload: Vec<u8>) -> Self {
        Self {
            id: req.id,
            device_id: req.device_id,
            command: req.command,
            status,
            payload,
        }
    }

    pub fn ok(req: &IORequest, payload: Vec<u8>) -> Self {
        Self::new(req, StatusCode::Ok, payload)
    }

    pub fn error(req: &IORequest, status: StatusCode) -> Self {
        Self::new(req, status, Vec::new())
    }
}

/// The wire protocol version every current device payload opens with.
pub const PROTOCOL_VERSION: u8 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_echoes_id_device_command() {
        let req = IORequest::new(42, 0xFD, 0x01, vec![1, 2, 3]);
        let resp = IOResponse::ok(&req, vec![9]);
        assert_eq!(resp.id, 42);
        assert_eq!(resp.device_id, 0xFD);
        assert_eq!(resp.command, 0x01);
        assert!(resp.status.is_ok());
    }
}
