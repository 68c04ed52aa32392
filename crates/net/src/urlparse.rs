//! `tcp://host:port[?k=v&k=v]` / `tls://host:port[?insecure=1]` parsing.

use crate::backend::BackendError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TcpOptions {
    pub connect_timeout_ms: u32,
    pub io_timeout_ms: u32,
    pub nodelay: bool,
    pub keepalive: bool,
    pub rx_buf: usize,
    pub halfclose: bool,
    pub insecure: bool,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            io_timeout_ms: 30_000,
            nodelay: true,
            keepalive: false,
            rx_buf: 8 * 1024,
            halfclose: false,
            insecure: false,
        }
    }
}

/// Strips the `scheme://` prefix, splits `host:port` from an optional
/// `?k=v&k=v` query, and applies recognized options over the defaults.
pub fn parse_host_port(url: &str) -> Result<(String, u16, TcpOptions), BackendError> {
    let rest = url.split_once("://").map(|(_, r)| r).ok_or(BackendError::InvalidRequest)?;
    let (authority, query) = match rest.split_once('?') {
        Some((a, q)) => (a, Some(q)),
        None => (rest, None),
    };
    let (host, port_str) = authority.rsplit_once(':').ok_or(BackendError::InvalidRequest)?;
    let port: u16 = port_str.parse().map_err(|_| BackendError::InvalidRequest)?;
    if host.is_empty() {
        return Err(BackendError::InvalidRequest);
    }

    let mut opts = TcpOptions::default();
    if let Some(query) = query {
        for pair in query.split('&') {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            apply_option(&mut opts, key, value);
        }
    }

    Ok((host.to_string(), port, opts))
}

fn apply_option(opts: &mut TcpOptions, key: &str, value: &str) {
    match key {
        "connect_timeout_ms" => {
            if let Ok(v) = value.parse() {
                opts.connect_timeout_ms = v;
            }
        }
        "io_timeout_ms" => {
            if let Ok(v) = value.parse() {
                opts.io_timeout_ms = v;
            }
        }
        "nodelay" => opts.nodelay = is_truthy(value),
        "keepalive" => opts.keepalive = is_truthy(value),
        "rx_buf" => {
            if let Ok(v) = value.parse::<usize>() {
                opts.rx_buf = v.clamp(256, 1_048_576);
            }
        }
        "halfclose" => opts.halfclose = is_truthy(value),
        "insecure" => opts.insecure = is_truthy(value),
        _ => {}
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "yes")
}
