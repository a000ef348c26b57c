//! C4 — the HTTP/1.1 mock listener.
//!
//! Grounded on `pymock/mock.py::MockApplication`/`MockMessageDelegate`, the
//! Tornado `HTTPServer` subclass that owns one connection's request
//! lifecycle. Built here directly on `hyper::server::conn::Http` (rather
//! than `hyper::Server`) so we keep a handle to the raw socket, needed for
//! `close_socket(nolinger)`'s `SO_LINGER{0}` behavior — the same low-level
//! pattern as this crate's own `demos/http_proxy.rs`/`demos/upgrades.rs`.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use hyper::service::service_fn;
use hyper::server::conn::Http;
use hyper::{Body, Request, Response};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

use crate::context::RequestContext;
use crate::error::{HandlerException, HandlerHttpError};
use crate::handler::HandlerOutcome;
use crate::recording;
use crate::rules::RuleTableHandle;
use crate::store::Store;

/// Shared, process-wide state needed to serve one mock request.
pub struct MockEngine {
    pub rules: RuleTableHandle,
    pub store: Store,
    pub recordings_dir: PathBuf,
}

impl MockEngine {
    pub fn new(rules: RuleTableHandle, store: Store, recordings_dir: PathBuf) -> Arc<MockEngine> {
        Arc::new(MockEngine {
            rules,
            store,
            recordings_dir,
        })
    }
}

/// Accepts connections on `addr` forever, spawning one task per connection.
pub async fn serve(addr: SocketAddr, engine: Arc<MockEngine>) -> io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "mock listener started");
    serve_listener(listener, engine).await
}

/// Same as [`serve`], but against an already-bound listener — lets a caller
/// (tests, primarily) learn the OS-assigned address before accepting.
pub async fn serve_listener(listener: tokio::net::TcpListener, engine: Arc<MockEngine>) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_connection(stream, peer, engine).await {
                tracing::debug!(%peer, %err, "connection ended");
            }
        });
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    engine: Arc<MockEngine>,
) -> io::Result<()> {
    let (close_tx, close_rx) = watch::channel(None);
    let io = SharedTcp::new(stream, close_rx);

    let svc = service_fn(move |req: Request<Body>| {
        let engine = engine.clone();
        let close_tx = close_tx.clone();
        async move { Ok::<_, io::Error>(handle_request(req, engine, close_tx, peer).await) }
    });

    Http::new()
        .serve_connection(io, svc)
        .with_upgrades()
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

async fn handle_request(
    req: Request<Body>,
    engine: Arc<MockEngine>,
    close_tx: watch::Sender<Option<bool>>,
    peer: SocketAddr,
) -> Response<Body> {
    let (parts, body) = req.into_parts();
    let uri = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());
    let path = parts.uri.path().to_string();
    let query = parts
        .uri
        .query()
        .map(parse_query)
        .unwrap_or_default();

    let (ctx, chunk_tx, header_rx) = RequestContext::new(
        parts.method.clone(),
        path.clone(),
        uri.clone(),
        parts.headers.clone(),
        query,
        engine.store.clone(),
        close_tx,
    );

    tracing::info!(request_id = %ctx.request_id, method = %parts.method, %uri, %peer, "REQUEST");

    tokio::spawn(pump_body(body, chunk_tx));

    let ctx_for_handler = ctx.clone();
    let engine_for_handler = engine.clone();
    tokio::spawn(async move {
        run_handler(ctx_for_handler, engine_for_handler, path).await;
    });

    match header_rx.await {
        Ok(pending) => Response::builder()
            .status(pending.status)
            .body(pending.body)
            .map(|mut resp| {
                *resp.headers_mut() = pending.headers;
                resp
            })
            .unwrap_or_else(|_| Response::new(Body::empty())),
        Err(_) => Response::builder()
            .status(http::StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::from("handler never produced a response"))
            .unwrap(),
    }
}

async fn pump_body(body: Body, chunk_tx: mpsc::Sender<bytes::Bytes>) {
    use futures_util::StreamExt;
    let mut body = body;
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                if chunk_tx.send(bytes).await.is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

async fn run_handler(ctx: Arc<RequestContext>, engine: Arc<MockEngine>, path: String) {
    let table = engine.rules.current();
    let outcome = match table.dispatch(&path) {
        Some((handler, strip, prefix)) => {
            if strip {
                ctx.strip_prefix(prefix);
            }
            handler.call(ctx.clone()).await
        }
        None => {
            ctx.set_status(404);
            ctx.set_body_text("no mock rule matched this path");
            Ok(())
        }
    };

    if let Err(outcome) = outcome {
        apply_handler_failure(&ctx, outcome);
    }

    // Engine unconditionally runs recording, then flush, after the
    // handler coroutine terminates (spec §4.4).
    if ctx.recording_armed() {
        if let Err(err) = recording::record_exchange(&engine.recordings_dir, &ctx).await {
            tracing::warn!(request_id = %ctx.request_id, %err, "failed to write recording");
        }
    }

    ctx.finish().await;
    let dropped = ctx.drain_remaining().await;
    if dropped > 0 {
        tracing::debug!(request_id = %ctx.request_id, dropped, "dropped unread request chunks");
    }
}

fn apply_handler_failure(ctx: &RequestContext, outcome: HandlerOutcome) {
    match outcome {
        HandlerOutcome::Http(HandlerHttpError { status, log_message }) => {
            if let Some(msg) = &log_message {
                tracing::info!(request_id = %ctx.request_id, %status, message = %msg, "handler raised HTTP error");
            }
            ctx.set_status(status.as_u16());
            ctx.set_body_text(log_message.as_deref().unwrap_or(status.canonical_reason().unwrap_or("")));
        }
        HandlerOutcome::Exception(HandlerException(message)) => {
            tracing::error!(request_id = %ctx.request_id, %message, "handler raised an exception");
            ctx.set_status(500);
            ctx.set_body_text(&message);
        }
    }
}

fn parse_query(query: &str) -> std::collections::HashMap<String, Vec<String>> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .fold(std::collections::HashMap::new(), |mut map, (k, v)| {
            map.entry(k).or_insert_with(Vec::new).push(v);
            map
        })
}

/// Wraps an owned [`TcpStream`] so that [`RequestContext::close_socket`]
/// can force the connection closed (optionally with `SO_LINGER{0}`,
/// producing a RST) without giving up ownership to hyper.
struct SharedTcp {
    stream: TcpStream,
    close: watch::Receiver<Option<bool>>,
    closing: AtomicBool,
}

impl SharedTcp {
    fn new(stream: TcpStream, close: watch::Receiver<Option<bool>>) -> Self {
        SharedTcp {
            stream,
            close,
            closing: AtomicBool::new(false),
        }
    }

    fn apply_close_if_requested(&mut self) -> bool {
        if self.closing.load(Ordering::SeqCst) {
            return true;
        }
        if let Some(nolinger) = *self.close.borrow() {
            if nolinger {
                let _ = self.stream.set_linger(Some(Duration::from_secs(0)));
            }
            self.closing.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }
}

impl AsyncRead for SharedTcp {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.apply_close_if_requested() {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for SharedTcp {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.apply_close_if_requested() {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed by handler")));
        }
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_query_groups_repeated_keys() {
        let parsed = parse_query("x=1&x=2&y=3");
        assert_eq!(parsed.get("x").unwrap(), &vec!["1".to_string(), "2".to_string()]);
        assert_eq!(parsed.get("y").unwrap(), &vec!["3".to_string()]);
    }
}
