//! Handle-based, chunked session manager binding URL schemes to protocol
//! backends, plus the backends themselves (TCP, TLS, HTTP, stub). See
//! `SPEC_FULL.md` §4.2-4.3.

pub mod backend;
pub mod backends;
pub mod device;
pub mod registry;
pub mod ring;
pub mod sockopt;
pub mod urlparse;
pub mod wire;

pub use backend::{BackendError, Method, OpenFlags, ProtocolBackend};
pub use device::{NetworkDevice, MAX_SESSIONS};
pub use registry::ProtocolRegistry;
