//! Common contract every protocol backend (TCP, TLS, HTTP, stub) implements.

use fujinet_wire::StatusCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get = 1,
    Post = 2,
    Put = 3,
    Delete = 4,
    Head = 5,
}

impl Method {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Method::Get),
            2 => Some(Method::Post),
            3 => Some(Method::Put),
            4 => Some(Method::Delete),
            5 => Some(Method::Head),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }

    pub fn has_request_body(self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }
}

/// Open-time flag byte: bit0 TLS, bit1 follow-redirect, bit2 streamed body
/// with no length (the legacy bridge uses this to defer HTTP dispatch
/// until a zero-length commit write, per §9 Open Question 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    pub tls: bool,
    pub follow_redirect: bool,
    pub streamed_body_no_length: bool,
}

impl OpenFlags {
    pub fn from_u8(v: u8) -> Self {
        Self {
            tls: v & 0x01 != 0,
            follow_redirect: v & 0x02 != 0,
            streamed_body_no_length: v & 0x04 != 0,
        }
    }

    pub fn as_u8(self) -> u8 {
        (self.tls as u8) | ((self.follow_redirect as u8) << 1) | ((self.streamed_body_no_length as u8) << 2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("invalid request")]
    InvalidRequest,
    #[error("not ready")]
    NotReady,
    #[error("device busy")]
    DeviceBusy,
    #[error("I/O error")]
    IoError,
    #[error("unsupported")]
    Unsupported,
}

impl From<BackendError> for StatusCode {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::InvalidRequest => StatusCode::InvalidRequest,
            BackendError::NotReady => StatusCode::NotReady,
            BackendError::DeviceBusy => StatusCode::DeviceBusy,
            BackendError::IoError => StatusCode::IoError,
            BackendError::Unsupported => StatusCode::Unsupported,
        }
    }
}

pub struct OpenOutcome {
    pub needs_body_write: bool,
}

pub struct ReadOutcome {
    pub data: Vec<u8>,
    pub eof: bool,
    pub truncated: bool,
}

#[derive(Default)]
pub struct InfoOutcome {
    pub http_status: Option<u16>,
    pub content_length: Option<u64>,
    /// Raw `Key: Value\r\n` block, already truncated to the caller's limit.
    pub headers_block: Vec<u8>,
}

pub struct RequestHeaders<'a> {
    pub pairs: &'a [(String, String)],
}

/// A pluggable network protocol implementation, bound to a session by URL
/// scheme. Every method is non-blocking: any wait is a `BackendError`
/// variant, never a blocked syscall.
pub trait ProtocolBackend: Send {
    fn open(
        &mut self,
        method: Method,
        flags: OpenFlags,
        url: &str,
        request_headers: &[(String, String)],
        body_len_hint: u32,
        response_header_allowlist: &[String],
    ) -> Result<OpenOutcome, BackendError>;

    fn write_body(&mut self, offset: u32, data: &[u8]) -> Result<u16, BackendError>;

    fn read_body(&mut self, offset: u32, max: u16) -> Result<ReadOutcome, BackendError>;

    fn info(&mut self, max_header_bytes: u16) -> Result<InfoOutcome, BackendError>;

    /// Cooperative tick; advances connect state machines and pumps sockets.
    fn poll(&mut self) {}

    fn close(&mut self);

    fn is_streaming(&self) -> bool;
    fn requires_sequential_read(&self) -> bool;
    fn requires_sequential_write(&self) -> bool;
}

/// Lowercases the scheme prefix of a URL (`"tcp://host:1"` -> `"tcp"`).
pub fn extract_scheme(url: &str) -> Option<String> {
    let idx = url.find("://")?;
    Some(url[..idx].to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_extraction_lowercases() {
        assert_eq!(extract_scheme("HTTP://Example.com"), Some("http".to_string()));
        assert_eq!(extract_scheme("tcp://host:1"), Some("tcp".to_string()));
        assert_eq!(extract_scheme("no-scheme-here"), None);
    }

    #[test]
    fn open_flags_round_trip() {
        let flags = OpenFlags {
            tls: true,
            follow_redirect: false,
            streamed_body_no_length: true,
        };
        assert_eq!(OpenFlags::from_u8(flags.as_u8()), flags);
    }
}
