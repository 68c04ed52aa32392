//! Canned-response backend bound to the `stub://` scheme.
//!
//! The real backends (TCP/TLS/socket-backed HTTP) all need a live peer to
//! exercise; this one lets `NetworkDevice`'s session/command layer be
//! tested end to end — handle allocation, offset bookkeeping, the
//! allow-listed header capture in `info` — without opening a socket. It is
//! registered in `ProtocolRegistry::with_defaults` like any other backend,
//! not bolted onto `NetworkDevice` as a special case.

use crate::backend::{BackendError, InfoOutcome, Method, OpenFlags, OpenOutcome, ProtocolBackend, ReadOutcome};

/// Fixed canned body and status every `stub://` session serves, regardless
/// of path. Good enough to exercise S2-shaped scenarios deterministically.
const STUB_BODY: &[u8] = b"hello from stub backend";
const STUB_STATUS: u16 = 200;

pub struct StubBackend {
    read_cursor: u32,
    opened: bool,
    allowlist: Vec<String>,
}

impl Default for StubBackend {
    fn default() -> Self {
        Self {
            read_cursor: 0,
            opened: false,
            allowlist: Vec::new(),
        }
    }
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProtocolBackend for StubBackend {
    fn open(
        &mut self,
        _method: Method,
        _flags: OpenFlags,
        _url: &str,
        _request_headers: &[(String, String)],
        _body_len_hint: u32,
        response_header_allowlist: &[String],
    ) -> Result<OpenOutcome, BackendError> {
        self.opened = true;
        self.allowlist = response_header_allowlist.to_vec();
        Ok(OpenOutcome {
            needs_body_write: false,
        })
    }

    fn write_body(&mut self, _offset: u32, _data: &[u8]) -> Result<u16, BackendError> {
        Err(BackendError::Unsupported)
    }

    fn read_body(&mut self, offset: u32, max: u16) -> Result<ReadOutcome, BackendError> {
        if !self.opened {
            return Err(BackendError::InvalidRequest);
        }
        if offset != self.read_cursor {
            return Err(BackendError::InvalidRequest);
        }
        let remaining = &STUB_BODY[(offset as usize).min(STUB_BODY.len())..];
        let n = (max as usize).min(remaining.len());
        let data = remaining[..n].to_vec();
        self.read_cursor = self.read_cursor.wrapping_add(n as u32);
        let eof = self.read_cursor as usize >= STUB_BODY.len();
        Ok(ReadOutcome {
            data,
            eof,
            truncated: n == max as usize && !eof,
        })
    }

    fn info(&mut self, max_header_bytes: u16) -> Result<InfoOutcome, BackendError> {
        let mut block = String::new();
        if self.allowlist.iter().any(|h| h.eq_ignore_ascii_case("server")) {
            block.push_str("Server: fujinet-stub\r\n");
        }
        let mut bytes = block.into_bytes();
        bytes.truncate(max_header_bytes as usize);
        Ok(InfoOutcome {
            http_status: Some(STUB_STATUS),
            content_length: Some(STUB_BODY.len() as u64),
            headers_block: bytes,
        })
    }

    fn close(&mut self) {
        self.opened = false;
    }

    fn is_streaming(&self) -> bool {
        false
    }

    fn requires_sequential_read(&self) -> bool {
        true
    }

    fn requires_sequential_write(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_s2_shaped_stub_get() {
        let mut backend = StubBackend::new();
        backend
            .open(Method::Get, OpenFlags::default(), "stub://example.com/hello", &[], 0, &["server".to_string()])
            .unwrap();

        let info = backend.info(64).unwrap();
        assert_eq!(info.http_status, Some(200));
        assert!(info.content_length.is_some());
        assert!(String::from_utf8_lossy(&info.headers_block).contains("Server: "));

        let mut received = Vec::new();
        loop {
            let out = backend.read_body(received.len() as u32, 8).unwrap();
            received.extend_from_slice(&out.data);
            if out.eof {
                break;
            }
        }
        assert_eq!(received, STUB_BODY);
    }
}
