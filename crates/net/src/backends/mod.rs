pub mod http;
pub mod stub;
pub mod tcp;
pub mod tls;

pub use http::HttpBackend;
pub use stub::StubBackend;
pub use tcp::TcpBackend;
pub use tls::TlsBackend;
