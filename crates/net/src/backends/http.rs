//! Streaming HTTP client backend (§4.3.3): random reads are not possible
//! once bytes are off the wire, so this backend enforces sequential reads
//! like TCP/TLS, but the request itself runs on a worker thread driving a
//! small `tokio` runtime + `hyper` client, since the rest of this crate
//! (and `NetworkDevice` above it) is plain synchronous Rust with no
//! executor of its own. The bus thread never awaits anything: it probes a
//! `tokio::sync::Semaphore` non-blockingly in `poll`/`close` as a binary
//! completion signal.

use std::collections::VecDeque;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, StatusCode as HyperStatus};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::backend::{BackendError, InfoOutcome, Method, OpenFlags, OpenOutcome, ProtocolBackend, ReadOutcome};

const CHANNEL_DEPTH: usize = 8;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
/// Bounded hop count for `follow_redirect`, matching curl's own default
/// `CURLOPT_MAXREDIRS` ceiling rather than chasing redirects forever.
const MAX_REDIRECTS: u8 = 10;
/// Upper bound `close()` blocks for the worker's done semaphore before
/// deferring actual cleanup to the next `poll` (§5 "hard upper bound").
const CLOSE_WAIT: Duration = Duration::from_millis(50);

#[derive(Default)]
struct SharedMeta {
    http_status: Option<u16>,
    content_length: Option<u64>,
    headers: Vec<(String, String)>,
    error: Option<String>,
    redirect_hops: u8,
}

enum WorkerMsg {
    Chunk(Bytes),
    Done,
}

struct Worker {
    handle: JoinHandle<()>,
    rx: Receiver<WorkerMsg>,
    done_sem: Arc<Semaphore>,
    stop: Arc<std::sync::atomic::AtomicBool>,
}

pub struct HttpBackend {
    method: Method,
    url: String,
    follow_redirect: bool,
    request_headers: Vec<(String, String)>,
    response_allowlist: Vec<String>,
    body_len_hint: u32,
    streamed_no_length: bool,
    pending_body: Vec<u8>,
    body_sent: u32,
    dispatched: bool,
    meta: Arc<Mutex<SharedMeta>>,
    worker: Option<Worker>,
    recv_buf: VecDeque<u8>,
    read_cursor: u32,
    eof: bool,
    worker_done: bool,
}

impl Default for HttpBackend {
    fn default() -> Self {
        Self {
            method: Method::Get,
            url: String::new(),
            follow_redirect: false,
            request_headers: Vec::new(),
            response_allowlist: Vec::new(),
            body_len_hint: 0,
            streamed_no_length: false,
            pending_body: Vec::new(),
            body_sent: 0,
            dispatched: false,
            meta: Arc::new(Mutex::new(SharedMeta::default())),
            worker: None,
            recv_buf: VecDeque::new(),
            read_cursor: 0,
            eof: false,
            worker_done: false,
        }
    }
}

impl HttpBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn needs_body_commit(&self) -> bool {
        self.method.has_request_body() && (self.body_len_hint > 0 || self.streamed_no_length)
    }

    fn dispatch(&mut self) {
        if self.dispatched {
            return;
        }
        self.dispatched = true;

        let (tx, rx): (SyncSender<WorkerMsg>, Receiver<WorkerMsg>) = sync_channel(CHANNEL_DEPTH);
        let done_sem = Arc::new(Semaphore::new(0));
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let meta = self.meta.clone();

        let url = self.url.clone();
        let method = self.method;
        let follow_redirect = self.follow_redirect;
        let headers = self.request_headers.clone();
        let allowlist = self.response_allowlist.clone();
        let body = std::mem::take(&mut self.pending_body);
        let done_sem_worker = done_sem.clone();
        let stop_worker = stop.clone();

        let handle = std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    meta.lock().unwrap().error = Some(e.to_string());
                    done_sem_worker.add_permits(1);
                    return;
                }
            };
            rt.block_on(run_request(url, method, follow_redirect, headers, allowlist, body, tx, meta, stop_worker));
            done_sem_worker.add_permits(1);
        });

        self.worker = Some(Worker {
            handle,
            rx,
            done_sem,
            stop,
        });
        debug!(url = %self.url, "http request dispatched to worker thread");
    }

    fn drain_channel(&mut self) {
        let Some(worker) = &self.worker else { return };
        loop {
            match worker.rx.try_recv() {
                Ok(WorkerMsg::Chunk(bytes)) => self.recv_buf.extend(bytes),
                Ok(WorkerMsg::Done) => self.worker_done = true,
                Err(std::sync::mpsc::TryRecvError::Empty) => break,
                Err(std::sync::mpsc::TryRecvError::Disconnected) => {
                    self.worker_done = true;
                    break;
                }
            }
        }
    }
}

/// Resolves a `Location` header value against the URL it was received
/// from. Absolute locations are used as-is; relative ones are joined onto
/// the previous request's scheme+authority the way a browser/curl would.
fn resolve_location(base: &str, location: &str) -> Option<String> {
    if location.starts_with("http://") || location.starts_with("https://") {
        return Some(location.to_string());
    }
    let base_uri: hyper::Uri = base.parse().ok()?;
    let scheme = base_uri.scheme_str()?;
    let authority = base_uri.authority()?.as_str();
    if let Some(rest) = location.strip_prefix('/') {
        Some(format!("{scheme}://{authority}/{rest}"))
    } else {
        Some(format!("{scheme}://{authority}/{location}"))
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_request(
    url: String,
    method: Method,
    follow_redirect: bool,
    headers: Vec<(String, String)>,
    allowlist: Vec<String>,
    body: Vec<u8>,
    tx: SyncSender<WorkerMsg>,
    meta: Arc<Mutex<SharedMeta>>,
    stop: Arc<std::sync::atomic::AtomicBool>,
) {
    let https = HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();
    let client: Client<_, Full<Bytes>> = Client::builder(TokioExecutor::new()).build(https);

    let mut current_url = url;
    let mut current_method = method;
    let mut current_body = body;
    let response = loop {
        let mut builder = Request::builder().method(current_method.as_str()).uri(&current_url);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let request = match builder.body(Full::new(Bytes::from(current_body.clone()))) {
            Ok(r) => r,
            Err(e) => {
                meta.lock().unwrap().error = Some(e.to_string());
                return;
            }
        };

        let result = tokio::time::timeout(DEFAULT_TIMEOUT, client.request(request)).await;
        let resp = match result {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                meta.lock().unwrap().error = Some(e.to_string());
                return;
            }
            Err(_) => {
                meta.lock().unwrap().error = Some("request timed out".to_string());
                return;
            }
        };

        if !follow_redirect || !resp.status().is_redirection() {
            break resp;
        }
        let Some(location) = resp.headers().get(hyper::header::LOCATION).and_then(|v| v.to_str().ok()) else {
            break resp;
        };
        let Some(next_url) = resolve_location(&current_url, location) else {
            break resp;
        };

        debug!(from = %current_url, to = %next_url, status = %resp.status(), "http redirect followed");
        // 303 always downgrades to GET with no body; 301/302 conventionally
        // do the same for non-GET/HEAD requests, matching curl's default.
        if resp.status() == HyperStatus::SEE_OTHER
            || (!matches!(current_method, Method::Get | Method::Head)
                && matches!(resp.status(), HyperStatus::MOVED_PERMANENTLY | HyperStatus::FOUND))
        {
            current_method = Method::Get;
            current_body.clear();
        }
        current_url = next_url;

        let hop = {
            let mut guard = meta.lock().unwrap();
            guard.redirect_hops += 1;
            guard.redirect_hops
        };
        if hop > MAX_REDIRECTS {
            meta.lock().unwrap().error = Some("too many redirects".to_string());
            return;
        }
    };

    let status: HyperStatus = response.status();
    {
        let mut guard = meta.lock().unwrap();
        guard.http_status = Some(status.as_u16());
        guard.content_length = response
            .headers()
            .get(hyper::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        for (name, value) in response.headers() {
            let name_lower = name.as_str().to_ascii_lowercase();
            if allowlist.iter().any(|h| h.eq_ignore_ascii_case(&name_lower)) {
                if let Ok(v) = value.to_str() {
                    guard.headers.push((name.as_str().to_string(), v.to_string()));
                }
            }
        }
    }

    let mut body: Incoming = response.into_body();
    loop {
        if stop.load(std::sync::atomic::Ordering::Relaxed) {
            return;
        }
        match body.frame().await {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    if tx.send(WorkerMsg::Chunk(data.clone())).is_err() {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                meta.lock().unwrap().error = Some(e.to_string());
                break;
            }
            None => break,
        }
    }
    let _ = tx.send(WorkerMsg::Done);
}

impl ProtocolBackend for HttpBackend {
    fn open(
        &mut self,
        method: Method,
        flags: OpenFlags,
        url: &str,
        request_headers: &[(String, String)],
        body_len_hint: u32,
        response_header_allowlist: &[String],
    ) -> Result<OpenOutcome, BackendError> {
        self.method = method;
        self.url = url.to_string();
        self.follow_redirect = flags.follow_redirect;
        self.request_headers = request_headers.to_vec();
        self.response_allowlist = response_header_allowlist.iter().map(|h| h.to_ascii_lowercase()).collect();
        self.body_len_hint = body_len_hint;
        self.streamed_no_length = flags.streamed_body_no_length;

        let needs_body_write = self.needs_body_commit();
        if !needs_body_write {
            self.dispatch();
        }
        Ok(OpenOutcome { needs_body_write })
    }

    fn write_body(&mut self, offset: u32, data: &[u8]) -> Result<u16, BackendError> {
        if self.dispatched && !self.needs_body_commit() {
            return Err(BackendError::Unsupported);
        }
        if offset != self.body_sent {
            return Err(BackendError::InvalidRequest);
        }

        self.pending_body.extend_from_slice(data);
        self.body_sent = self.body_sent.wrapping_add(data.len() as u32);

        let committed = if self.body_len_hint > 0 {
            self.body_sent >= self.body_len_hint
        } else {
            data.is_empty()
        };
        if committed {
            self.dispatch();
        }
        Ok(data.len() as u16)
    }

    fn read_body(&mut self, offset: u32, max: u16) -> Result<ReadOutcome, BackendError> {
        if offset != self.read_cursor {
            return Err(BackendError::InvalidRequest);
        }
        self.drain_channel();

        if self.recv_buf.is_empty() {
            if self.worker_done {
                self.eof = true;
                return Ok(ReadOutcome {
                    data: Vec::new(),
                    eof: true,
                    truncated: false,
                });
            }
            if self.meta.lock().unwrap().error.is_some() {
                return Err(BackendError::IoError);
            }
            return Err(BackendError::NotReady);
        }

        let n = (max as usize).min(self.recv_buf.len());
        let data: Vec<u8> = self.recv_buf.drain(..n).collect();
        self.read_cursor = self.read_cursor.wrapping_add(data.len() as u32);
        let truncated = n == max as usize && !self.recv_buf.is_empty();
        let eof = self.recv_buf.is_empty() && self.worker_done;
        Ok(ReadOutcome { data, eof, truncated })
    }

    fn info(&mut self, max_header_bytes: u16) -> Result<InfoOutcome, BackendError> {
        self.drain_channel();
        let guard = self.meta.lock().unwrap();
        if let Some(err) = &guard.error {
            warn!(error = %err, "http backend recorded error");
            return Err(BackendError::IoError);
        }
        let mut block = String::new();
        for (name, value) in &guard.headers {
            block.push_str(name);
            block.push_str(": ");
            block.push_str(value);
            block.push_str("\r\n");
        }
        let mut bytes = block.into_bytes();
        bytes.truncate(max_header_bytes as usize);
        Ok(InfoOutcome {
            http_status: guard.http_status,
            content_length: guard.content_length,
            headers_block: bytes,
        })
    }

    fn poll(&mut self) {
        self.drain_channel();
        if let Some(worker) = &self.worker {
            if worker.done_sem.try_acquire().is_ok() {
                self.worker_done = true;
            }
        }
    }

    fn close(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, std::sync::atomic::Ordering::Relaxed);
            // Bounded wait (§5: "close may block up to ~50ms"); if the
            // worker hasn't signaled by the deadline, detach it — the
            // thread will exit on its own and `poll` is never called
            // again to observe it, which is fine once the slot is freed.
            let deadline = Instant::now() + CLOSE_WAIT;
            loop {
                if worker.done_sem.try_acquire().is_ok() {
                    break;
                }
                if Instant::now() >= deadline {
                    break;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            drop(worker.handle);
        }
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

impl Drop for HttpBackend {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, std::sync::atomic::Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method as method_matcher, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
    }

    #[test]
    fn scenario_s2_http_get() {
        block_on(async {
            let server = MockServer::start().await;
            Mock::given(method_matcher("GET"))
                .and(path("/hello"))
                .respond_with(ResponseTemplate::new(200).insert_header("server", "wiremock").set_body_string("hello world"))
                .mount(&server)
                .await;

            let mut backend = HttpBackend::new();
            let url = format!("{}/hello", server.uri());
            backend
                .open(Method::Get, OpenFlags::default(), &url, &[], 0, &["server".to_string()])
                .unwrap();

            let mut received = Vec::new();
            for _ in 0..500 {
                backend.poll();
                match backend.read_body(received.len() as u32, 8) {
                    Ok(out) => {
                        received.extend_from_slice(&out.data);
                        if out.eof {
                            break;
                        }
                    }
                    Err(BackendError::NotReady) => tokio::time::sleep(Duration::from_millis(5)).await,
                    Err(e) => panic!("unexpected error: {e:?}"),
                }
            }
            assert_eq!(received, b"hello world");

            let info = backend.info(256).unwrap();
            assert_eq!(info.http_status, Some(200));
            assert!(String::from_utf8_lossy(&info.headers_block).contains("server: wiremock")
                || String::from_utf8_lossy(&info.headers_block).to_lowercase().contains("server: wiremock"));
        });
    }

    #[test]
    fn follow_redirect_chases_location_header() {
        block_on(async {
            let server = MockServer::start().await;
            Mock::given(method_matcher("GET"))
                .and(path("/start"))
                .respond_with(ResponseTemplate::new(302).insert_header("location", "/final"))
                .mount(&server)
                .await;
            Mock::given(method_matcher("GET"))
                .and(path("/final"))
                .respond_with(ResponseTemplate::new(200).set_body_string("arrived"))
                .mount(&server)
                .await;

            let mut backend = HttpBackend::new();
            let url = format!("{}/start", server.uri());
            let mut flags = OpenFlags::default();
            flags.follow_redirect = true;
            backend.open(Method::Get, flags, &url, &[], 0, &[]).unwrap();

            let mut received = Vec::new();
            for _ in 0..500 {
                backend.poll();
                match backend.read_body(received.len() as u32, 64) {
                    Ok(out) => {
                        received.extend_from_slice(&out.data);
                        if out.eof {
                            break;
                        }
                    }
                    Err(BackendError::NotReady) => tokio::time::sleep(Duration::from_millis(5)).await,
                    Err(e) => panic!("unexpected error: {e:?}"),
                }
            }
            assert_eq!(received, b"arrived");
            assert_eq!(backend.info(64).unwrap().http_status, Some(200));
        });
    }

    #[test]
    fn without_follow_redirect_flag_the_3xx_is_surfaced_as_is() {
        block_on(async {
            let server = MockServer::start().await;
            Mock::given(method_matcher("GET"))
                .and(path("/start"))
                .respond_with(ResponseTemplate::new(302).insert_header("location", "/final"))
                .mount(&server)
                .await;

            let mut backend = HttpBackend::new();
            let url = format!("{}/start", server.uri());
            backend.open(Method::Get, OpenFlags::default(), &url, &[], 0, &[]).unwrap();

            let mut status = None;
            for _ in 0..500 {
                backend.poll();
                if let Ok(info) = backend.info(64) {
                    if info.http_status.is_some() {
                        status = info.http_status;
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            assert_eq!(status, Some(302));
        });
    }
}
