//! `ClockDevice`: `GetTime`/`SetTime` only, matching the firmware's actual
//! behavior rather than the fuller command set its header once declared
//! (timezone and format conversions never shipped). Wall-clock access is
//! abstracted behind `TimeSource` so the platform HAL stays out of this
//! crate while the command parsing remains unit-testable.

use std::time::{SystemTime, UNIX_EPOCH};

use fujinet_bus::Device;
use fujinet_wire::{IORequest, IOResponse, Reader, StatusCode, Writer, PROTOCOL_VERSION};

pub const OP_GET_TIME: u16 = 0x01;
pub const OP_SET_TIME: u16 = 0x02;

/// Source of wall-clock time, injectable so tests don't depend on the
/// system clock and so a platform HAL can plug in later without touching
/// command parsing.
pub trait TimeSource: Send {
    fn now_unix_seconds(&self) -> u64;

    /// Attempts to set the platform clock. Returns `false` when the
    /// platform has no writable clock (the default implementation).
    fn set_unix_seconds(&mut self, secs: u64) -> bool {
        let _ = secs;
        false
    }
}

#[derive(Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_unix_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

fn build_time_payload(unix_seconds: u64) -> Vec<u8> {
    let mut w = Writer::new();
    w.version().u8(0).u16(0).u64(unix_seconds);
    w.into_vec()
}

pub struct ClockDevice {
    source: Box<dyn TimeSource>,
}

impl Default for ClockDevice {
    fn default() -> Self {
        Self::new(Box::new(SystemTimeSource))
    }
}

impl ClockDevice {
    pub fn new(source: Box<dyn TimeSource>) -> Self {
        Self { source }
    }

    fn handle_get_time(&self, req: &IORequest) -> IOResponse {
        let now = self.source.now_unix_seconds();
        if now == 0 {
            return IOResponse::error(req, StatusCode::NotReady);
        }
        IOResponse::ok(req, build_time_payload(now))
    }

    fn handle_set_time(&mut self, req: &IORequest) -> IOResponse {
        let mut r = Reader::new(&req.payload);
        if r.version(PROTOCOL_VERSION).is_err() {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        }
        let Ok(secs) = r.u64() else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };
        if !self.source.set_unix_seconds(secs) {
            return IOResponse::error(req, StatusCode::IoError);
        }
        IOResponse::ok(req, build_time_payload(secs))
    }
}

impl Device for ClockDevice {
    fn handle(&mut self, request: &IORequest) -> IOResponse {
        match request.command {
            OP_GET_TIME => self.handle_get_time(request),
            OP_SET_TIME => self.handle_set_time(request),
            _ => IOResponse::error(request, StatusCode::Unsupported),
        }
    }
}
