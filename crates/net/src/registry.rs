//! URL scheme -> protocol-backend factory (§2 component E, §4.2 "Scheme
//! extraction"). `NetworkDevice::Open` asks the registry for a fresh
//! backend instance per session; the registry itself holds no session
//! state.

use std::collections::HashMap;

use crate::backend::ProtocolBackend;
use crate::backends::{HttpBackend, StubBackend, TcpBackend, TlsBackend};

type Factory = Box<dyn Fn() -> Box<dyn ProtocolBackend> + Send + Sync>;

/// Maps a lowercased URL scheme (`"tcp"`, `"tls"`, `"http"`, `"https"`, ...)
/// to a factory that builds a fresh backend for a new session.
#[derive(Default)]
pub struct ProtocolRegistry {
    factories: HashMap<String, Factory>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `tcp`/`tls`/`http`/`https` schemes bound to the backends this
    /// crate ships, plus `stub` for deterministic session-layer tests.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("tcp", || Box::new(TcpBackend::new()));
        registry.register("tls", || Box::new(TlsBackend::new()));
        registry.register("http", || Box::new(HttpBackend::new()));
        registry.register("https", || Box::new(HttpBackend::new()));
        registry.register("stub", || Box::new(StubBackend::new()));
        registry
    }

    pub fn register(&mut self, scheme: &str, factory: impl Fn() -> Box<dyn ProtocolBackend> + Send + Sync + 'static) {
        self.factories.insert(scheme.to_ascii_lowercase(), Box::new(factory));
    }

    /// Builds a backend for `scheme`, or `None` if the scheme is
    /// unregistered (the caller maps that to `StatusCode::Unsupported`).
    pub fn create(&self, scheme: &str) -> Option<Box<dyn ProtocolBackend>> {
        self.factories.get(&scheme.to_ascii_lowercase()).map(|f| f())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_knows_its_schemes() {
        let registry = ProtocolRegistry::with_defaults();
        assert!(registry.create("tcp").is_some());
        assert!(registry.create("TCP").is_some());
        assert!(registry.create("https").is_some());
        assert!(registry.create("gopher").is_none());
    }
}
