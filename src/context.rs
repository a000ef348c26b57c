//! C3 — the per-request context exposed to handler scripts.
//!
//! Grounded on `pymock/mock.py::MockMessageDelegate`. The chunk queue,
//! response builder, `record`/`flush`/`close_socket` surface, and the
//! "headers written at most once" invariant are direct ports; the
//! mechanics of *how* a deferred response reaches the HTTP/1.1 connection
//! (a oneshot handoff plus a `hyper::body::Sender`) are this crate's own,
//! since hyper's `Service::call` must resolve with a `Response` up front,
//! unlike Tornado's incremental `write_headers`/`write`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use hyper::Body;
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};

use parking_lot::Mutex;

use crate::error::MissingArgument;
use crate::store::Store;

/// Default bound on the inbound chunk queue (spec §3, §5).
pub const CHUNK_QUEUE_CAPACITY: usize = 100;

/// A fully-built response, handed from [`RequestContext::write_header`] to
/// the `hyper::Service` future that is waiting to return it.
pub struct PendingResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

struct RequestState {
    method: Method,
    path: String,
    uri: String,
    headers: HeaderMap,
    query: HashMap<String, Vec<String>>,
    body_cache: Option<Bytes>,
    body_args: Option<HashMap<String, Vec<String>>>,
}

struct ResponseState {
    status: StatusCode,
    headers: HeaderMap,
    body: Option<Bytes>,
    header_written: bool,
    body_written: bool,
}

/// Per-inbound-mock-request state. One instance per request; owns its
/// response builder and chunk queue exclusively (spec §3 "Ownership").
pub struct RequestContext {
    pub request_id: String,
    req: Mutex<RequestState>,
    resp: Mutex<ResponseState>,
    chunk_rx: AsyncMutex<mpsc::Receiver<Bytes>>,
    input_closed: AtomicBool,
    recording: AtomicBool,
    socket_closed: AtomicBool,
    header_tx: Mutex<Option<oneshot::Sender<PendingResponse>>>,
    body_tx: Mutex<Option<hyper::body::Sender>>,
    close_tx: watch::Sender<Option<bool>>,
    pub store: Store,
}

impl RequestContext {
    /// Builds a fresh context for one inbound request. Returns the context
    /// together with the chunk producer (fed by the connection driver as
    /// body bytes arrive) and the oneshot receiver the `Service` future
    /// awaits to obtain the eventual [`PendingResponse`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        method: Method,
        path: String,
        uri: String,
        headers: HeaderMap,
        query: HashMap<String, Vec<String>>,
        store: Store,
        close_tx: watch::Sender<Option<bool>>,
    ) -> (
        Arc<RequestContext>,
        mpsc::Sender<Bytes>,
        oneshot::Receiver<PendingResponse>,
    ) {
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_QUEUE_CAPACITY);
        let (header_tx, header_rx) = oneshot::channel();
        let ctx = RequestContext {
            request_id: nanoid::nanoid!(8, &ID_ALPHABET),
            req: Mutex::new(RequestState {
                method,
                path,
                uri,
                headers,
                query,
                body_cache: None,
                body_args: None,
            }),
            resp: Mutex::new(ResponseState {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: None,
                header_written: false,
                body_written: false,
            }),
            chunk_rx: AsyncMutex::new(chunk_rx),
            input_closed: AtomicBool::new(false),
            recording: AtomicBool::new(false),
            socket_closed: AtomicBool::new(false),
            header_tx: Mutex::new(Some(header_tx)),
            body_tx: Mutex::new(None),
            close_tx,
            store,
        };
        (Arc::new(ctx), chunk_tx, header_rx)
    }

    // -- request view -----------------------------------------------------

    pub fn method(&self) -> Method {
        self.req.lock().method.clone()
    }

    pub fn path(&self) -> String {
        self.req.lock().path.clone()
    }

    pub fn uri(&self) -> String {
        self.req.lock().uri.clone()
    }

    /// Strips `prefix` from both `path` and `uri` (query string intact),
    /// per spec §4.2. Called by the dispatcher, never by handlers.
    pub fn strip_prefix(&self, prefix: &str) {
        let mut req = self.req.lock();
        if let Some(rest) = req.path.strip_prefix(prefix) {
            req.path = rest.to_string();
        }
        if let Some(rest) = req.uri.strip_prefix(prefix) {
            req.uri = rest.to_string();
        }
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.req
            .lock()
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    pub fn request_headers(&self) -> HeaderMap {
        self.req.lock().headers.clone()
    }

    /// `get_query_argument(name, default?)`: last value wins on repeats.
    pub fn get_query_argument(
        &self,
        name: &str,
        default: Option<String>,
    ) -> Result<String, MissingArgument> {
        let req = self.req.lock();
        match req.query.get(name).and_then(|values| values.last()) {
            Some(v) => Ok(v.clone()),
            None => default.ok_or_else(|| MissingArgument(name.to_string())),
        }
    }

    /// `get_body_argument(name, default?)`: forces form-encoded body parse
    /// on first call, then behaves like `get_query_argument`.
    pub async fn get_body_argument(
        self: &Arc<Self>,
        name: &str,
        default: Option<String>,
    ) -> Result<String, MissingArgument> {
        self.ensure_body_parsed().await;
        let req = self.req.lock();
        let args = req.body_args.as_ref().expect("body parsed above");
        match args.get(name).and_then(|values| values.last()) {
            Some(v) => Ok(v.clone()),
            None => default.ok_or_else(|| MissingArgument(name.to_string())),
        }
    }

    async fn ensure_body_parsed(self: &Arc<Self>) {
        let already = self.req.lock().body_args.is_some();
        if already {
            return;
        }
        let body = self.request_body().await;
        let parsed: HashMap<String, Vec<String>> = url::form_urlencoded::parse(&body)
            .into_owned()
            .fold(HashMap::new(), |mut map, (k, v)| {
                map.entry(k).or_insert_with(Vec::new).push(v);
                map
            });
        self.req.lock().body_args = Some(parsed);
    }

    /// `request_body()`: coalesces all remaining chunks. Idempotent.
    pub async fn request_body(&self) -> Bytes {
        if let Some(cached) = self.req.lock().body_cache.clone() {
            return cached;
        }
        let mut buf = Vec::new();
        {
            let mut rx = self.chunk_rx.lock().await;
            while let Some(chunk) = rx.recv().await {
                buf.extend_from_slice(&chunk);
            }
        }
        self.input_closed.store(true, Ordering::SeqCst);
        let bytes = Bytes::from(buf);
        self.req.lock().body_cache = Some(bytes.clone());
        bytes
    }

    /// `request_chunk()`: pulls one chunk, `None` on EOF. Errors if called
    /// after the input has already been closed.
    pub async fn request_chunk(&self) -> std::io::Result<Option<Bytes>> {
        if self.input_closed.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "request_chunk called after input closed",
            ));
        }
        let mut rx = self.chunk_rx.lock().await;
        match rx.recv().await {
            Some(chunk) => Ok(Some(chunk)),
            None => {
                self.input_closed.store(true, Ordering::SeqCst);
                Ok(None)
            }
        }
    }

    /// Drains whatever chunks remain after the handler has finished,
    /// returning how many were dropped (spec §4.4). A no-op once
    /// `request_body`/`request_chunk` has already observed EOF.
    pub async fn drain_remaining(&self) -> usize {
        let mut dropped = 0;
        let mut rx = self.chunk_rx.lock().await;
        while !self.input_closed.load(Ordering::SeqCst) {
            match rx.recv().await {
                Some(_) => dropped += 1,
                None => {
                    self.input_closed.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }
        dropped
    }

    pub fn input_closed(&self) -> bool {
        self.input_closed.load(Ordering::SeqCst)
    }

    // -- response builder --------------------------------------------------

    pub fn set_header(&self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            http::HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.resp.lock().headers.insert(name, value);
        }
    }

    pub fn add_header(&self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            http::HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.resp.lock().headers.append(name, value);
        }
    }

    /// Sets the response status; the reason phrase is always derived from
    /// the standard table at flush time via `StatusCode::canonical_reason`.
    pub fn set_status(&self, code: u16) {
        if let Ok(status) = StatusCode::from_u16(code) {
            self.resp.lock().status = status;
        }
    }

    pub fn status(&self) -> StatusCode {
        self.resp.lock().status
    }

    pub fn set_body_bytes(&self, body: Bytes) {
        self.resp.lock().body = Some(body);
    }

    pub fn set_body_text(&self, text: &str) {
        self.set_body_bytes(Bytes::copy_from_slice(text.as_bytes()));
    }

    pub fn response_body_snapshot(&self) -> Option<Bytes> {
        self.resp.lock().body.clone()
    }

    pub fn response_headers_snapshot(&self) -> HeaderMap {
        self.resp.lock().headers.clone()
    }

    pub fn record(&self) {
        self.recording.store(true, Ordering::SeqCst);
    }

    pub fn recording_armed(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    fn headers_already_written(&self) -> bool {
        self.resp.lock().header_written
    }

    /// Writes headers (computing `Content-Length` from the buffered body,
    /// if any) and hands a [`PendingResponse`] to the waiting `Service`
    /// future. Headers are written at most once; if the peer socket was
    /// already closed this is a silent no-op (logged once by the caller).
    pub fn write_header(&self) {
        let mut resp = self.resp.lock();
        if resp.header_written {
            return;
        }
        if self.socket_closed.load(Ordering::SeqCst) {
            tracing::info!(request_id = %self.request_id, "SOCKET CLOSED");
            resp.header_written = true;
            drop(resp);
            // Drop the sender rather than leaving it unfulfilled: the
            // `Service` future awaiting it would otherwise hang forever
            // even though the connection is already gone.
            self.header_tx.lock().take();
            return;
        }
        let content_length = resp.body.as_ref().map(|b| b.len()).unwrap_or(0);
        resp.headers.insert(
            http::header::CONTENT_LENGTH,
            HeaderValue::from_str(&content_length.to_string()).unwrap(),
        );
        let (body_tx, body) = Body::channel();
        *self.body_tx.lock() = Some(body_tx);
        resp.header_written = true;
        let status = resp.status;
        let headers = resp.headers.clone();
        tracing::info!(request_id = %self.request_id, %status, "RESPONSE");
        drop(resp);
        if let Some(tx) = self.header_tx.lock().take() {
            let _ = tx.send(PendingResponse {
                status,
                headers,
                body,
            });
        }
    }

    /// Used by the streaming-forward path (C5) to write response headers
    /// as soon as they arrive from upstream, before the handler returns.
    pub fn write_streaming_header(&self, status: StatusCode, headers: HeaderMap) {
        let mut resp = self.resp.lock();
        if resp.header_written {
            return;
        }
        resp.status = status;
        resp.headers = headers;
        let (body_tx, body) = Body::channel();
        *self.body_tx.lock() = Some(body_tx);
        resp.header_written = true;
        tracing::info!(request_id = %self.request_id, status = %resp.status, "RESPONSE");
        let status = resp.status;
        let headers = resp.headers.clone();
        drop(resp);
        if let Some(tx) = self.header_tx.lock().take() {
            let _ = tx.send(PendingResponse {
                status,
                headers,
                body,
            });
        }
    }

    /// Streams one chunk to the client. Only meaningful after headers have
    /// been written (streaming-response forward path).
    pub async fn stream_chunk(&self, chunk: Bytes) {
        let sender = self.body_tx.lock().take();
        if let Some(mut sender) = sender {
            if sender.send_data(chunk).await.is_ok() {
                *self.body_tx.lock() = Some(sender);
            }
        }
    }

    pub fn accumulate_body(&self, chunk: Bytes) {
        let mut resp = self.resp.lock();
        match resp.body.take() {
            Some(existing) => {
                let mut buf = existing.to_vec();
                buf.extend_from_slice(&chunk);
                resp.body = Some(Bytes::from(buf));
            }
            None => resp.body = Some(chunk),
        }
    }

    async fn write_body(&self) {
        let already_written = {
            let mut resp = self.resp.lock();
            let was = resp.body_written;
            resp.body_written = true;
            was
        };
        if already_written || self.socket_closed.load(Ordering::SeqCst) {
            return;
        }
        let body = self.resp.lock().body.clone();
        if let Some(body) = body {
            if let Some(mut sender) = self.body_tx.lock().take() {
                let _ = sender.send_data(body).await;
            }
        }
    }

    /// `flush()`: writes headers (if not already), writes the body, then
    /// finishes. A no-op body write after a streaming forward has already
    /// produced the body incrementally.
    pub fn flush(&self) {
        let headers_pending = !self.headers_already_written();
        if headers_pending {
            self.write_header();
        }
    }

    /// Completes the response: ensures headers are written, flushes the
    /// buffered body (no-op if streaming already wrote it), and drops the
    /// body sender so hyper sees the body as finished.
    pub async fn finish(&self) {
        self.flush();
        self.write_body().await;
        self.body_tx.lock().take();
    }

    /// `close_socket(nolinger=False)`: asks the connection driver to tear
    /// the underlying TCP connection down, optionally with `SO_LINGER{0}`
    /// (producing a RST on close).
    pub fn close_socket(&self, nolinger: bool) {
        if !self.socket_closed.swap(true, Ordering::SeqCst) {
            let _ = self.close_tx.send(Some(nolinger));
        }
    }

    pub fn socket_closed(&self) -> bool {
        self.socket_closed.load(Ordering::SeqCst)
    }

    pub fn mark_socket_closed(&self) {
        self.socket_closed.store(true, Ordering::SeqCst);
    }
}

const ID_ALPHABET: [char; 36] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I',
    'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];

#[cfg(test)]
mod tests {
    use super::*;

    fn new_ctx() -> (
        Arc<RequestContext>,
        mpsc::Sender<Bytes>,
        oneshot::Receiver<PendingResponse>,
    ) {
        let (close_tx, _close_rx) = watch::channel(None);
        RequestContext::new(
            Method::GET,
            "/thing".into(),
            "/thing?x=1".into(),
            HeaderMap::new(),
            HashMap::new(),
            Store::new(),
            close_tx,
        )
    }

    #[tokio::test]
    async fn strip_prefix_trims_path_and_uri_not_query() {
        let (ctx, _tx, _rx) = new_ctx();
        ctx.strip_prefix("/api");
        // path has no "/api" prefix in this fixture; emulate via a second ctx
        let (close_tx, _close_rx) = watch::channel(None);
        let (ctx2, _tx2, _rx2) = RequestContext::new(
            Method::GET,
            "/api/thing".into(),
            "/api/thing?x=1".into(),
            HeaderMap::new(),
            HashMap::new(),
            Store::new(),
            close_tx,
        );
        ctx2.strip_prefix("/api");
        assert_eq!(ctx2.path(), "/thing");
        assert_eq!(ctx2.uri(), "/thing?x=1");
    }

    #[tokio::test]
    async fn request_body_is_idempotent() {
        let (ctx, tx, _rx) = new_ctx();
        tx.send(Bytes::from_static(b"hello ")).await.unwrap();
        tx.send(Bytes::from_static(b"world")).await.unwrap();
        drop(tx);
        let first = ctx.request_body().await;
        let second = ctx.request_body().await;
        assert_eq!(first, second);
        assert_eq!(&first[..], b"hello world");
    }

    #[tokio::test]
    async fn query_argument_last_value_wins() {
        let mut query = HashMap::new();
        query.insert("x".to_string(), vec!["1".to_string(), "2".to_string()]);
        let (close_tx, _close_rx) = watch::channel(None);
        let (ctx, _tx, _rx) = RequestContext::new(
            Method::GET,
            "/".into(),
            "/?x=1&x=2".into(),
            HeaderMap::new(),
            query,
            Store::new(),
            close_tx,
        );
        assert_eq!(ctx.get_query_argument("x", None).unwrap(), "2");
    }

    #[tokio::test]
    async fn missing_query_argument_without_default_fails() {
        let (ctx, _tx, _rx) = new_ctx();
        assert!(ctx.get_query_argument("missing", None).is_err());
    }

    #[tokio::test]
    async fn write_header_computes_content_length() {
        let (ctx, _tx, rx) = new_ctx();
        ctx.set_body_text("ok");
        ctx.write_header();
        let pending = rx.await.unwrap();
        assert_eq!(
            pending.headers.get("content-length").unwrap(),
            "2"
        );
    }

    #[tokio::test]
    async fn flush_is_noop_after_socket_closed() {
        let (ctx, _tx, rx) = new_ctx();
        ctx.mark_socket_closed();
        ctx.flush();
        // No body channel was ever opened; the waiting `Service` future
        // sees the sender dropped rather than hanging forever.
        assert!(rx.await.is_err());
    }
}
