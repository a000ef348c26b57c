//! C5 — the forwarding client used by `ctx.forward(url, ...)`.
//!
//! Grounded on `pymock/mock.py`'s use of Tornado's `AsyncHTTPClient` inside
//! `MockMessageDelegate.forward`: no redirects are followed, request/response
//! streaming are independent flags, and hop-by-hop headers are stripped
//! before the request is relayed upstream.

use std::sync::Arc;

use http::{HeaderMap, Method, Uri};
use hyper::{Body, Client, Request};

use crate::context::RequestContext;
use crate::error::ForwardError;

/// The hyper client type handlers' `forward()` calls are relayed through.
/// Plain `HttpConnector`: no TLS, matching this crate's dependency stack
/// (no `hyper-tls`/`hyper-rustls` is carried) — an `is_https` forward
/// target only changes the URL scheme written into the request line, it
/// does not get TLS applied to the upstream connection.
pub type ForwardClient = Client<hyper::client::HttpConnector>;

/// Headers that must never be blindly relayed between the inbound mock
/// request and the outbound forwarded one (RFC 7230 §6.1 hop-by-hop set,
/// plus `Host` which is recomputed from the forward target).
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "content-encoding",
    "upgrade",
    "host",
];

/// Headers stripped from the upstream response before it's relayed back
/// downstream (spec §4.5: "`Transfer-Encoding` and `Content-Encoding` are
/// stripped (both directions)"). `Content-Length` is recomputed separately
/// once the full body is known.
const RESPONSE_STRIP: &[&str] = &["transfer-encoding", "content-encoding", "content-length"];

/// Options controlling one `forward()` call (spec §4.3).
#[derive(Default, Clone, Copy)]
pub struct ForwardOptions {
    /// If true, the inbound request body is streamed upstream chunk by
    /// chunk as it arrives rather than coalesced first.
    pub streaming_request: bool,
    /// If true, response headers are written to the downstream client as
    /// soon as they arrive, and the body is relayed chunk by chunk.
    pub streaming_response: bool,
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    strip_headers(headers, HOP_BY_HOP)
}

/// Builds a [`Body`] whose producer pulls chunks from `ctx` via
/// `request_chunk()` as they arrive and forwards each one upstream,
/// rather than waiting for the whole request body (spec §4.5
/// `streaming_request`, `pymock/mock.py`'s `body_producer`).
fn streaming_request_body(ctx: Arc<RequestContext>) -> Body {
    let (mut sender, body) = Body::channel();
    tokio::spawn(async move {
        loop {
            match ctx.request_chunk().await {
                Ok(Some(chunk)) => {
                    if sender.send_data(chunk).await.is_err() {
                        break;
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
    });
    body
}

fn strip_headers(headers: &HeaderMap, excluded: &[&str]) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers.iter() {
        if !excluded.contains(&name.as_str()) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Relays the current request to `url`, returning once the upstream
/// response has been fully relayed back through `ctx` (headers always
/// written via `ctx.write_streaming_header`/`write_header` by the time
/// this returns).
pub async fn forward(
    client: &ForwardClient,
    ctx: &Arc<RequestContext>,
    url: &str,
    opts: ForwardOptions,
) -> Result<(), ForwardError> {
    let uri: Uri = url.parse().map_err(|_| ForwardError {
        url: url.to_string(),
        source: hyper::Error::from(
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid forward URL"),
        )
        .into(),
    })?;

    let method = ctx.method();
    let headers = strip_hop_by_hop(&ctx.request_headers());

    let body = if opts.streaming_request {
        streaming_request_body(ctx.clone())
    } else {
        Body::from(ctx.request_body().await)
    };

    let mut builder = Request::builder().method(method.clone()).uri(uri.clone());
    for (name, value) in headers.iter() {
        builder = builder.header(name, value);
    }
    let req = builder.body(body).map_err(|e| ForwardError {
        url: url.to_string(),
        source: hyper::Error::from(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())),
    })?;

    let resp = client.request(req).await.map_err(|source| ForwardError {
        url: url.to_string(),
        source,
    })?;

    let status = resp.status();
    let resp_headers = resp.headers().clone();

    if opts.streaming_response {
        let filtered = strip_headers(&resp_headers, RESPONSE_STRIP);
        ctx.write_streaming_header(status, filtered);
        let mut body = resp.into_body();
        use futures_util::StreamExt;
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => ctx.stream_chunk(bytes).await,
                Err(source) => {
                    return Err(ForwardError {
                        url: url.to_string(),
                        source,
                    })
                }
            }
        }
        ctx.finish().await;
    } else {
        let buffered = hyper::body::to_bytes(resp.into_body())
            .await
            .map_err(|source| ForwardError {
                url: url.to_string(),
                source,
            })?;
        for (name, value) in strip_headers(&resp_headers, RESPONSE_STRIP).iter() {
            ctx.add_header(name.as_str(), value.to_str().unwrap_or(""));
        }
        ctx.set_header("content-length", &buffered.len().to_string());
        ctx.set_status(status.as_u16());
        ctx.set_body_bytes(buffered);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", "keep-alive".parse().unwrap());
        headers.insert("host", "example.com".parse().unwrap());
        headers.insert("x-custom", "value".parse().unwrap());
        let stripped = strip_hop_by_hop(&headers);
        assert!(stripped.get("connection").is_none());
        assert!(stripped.get("host").is_none());
        assert_eq!(stripped.get("x-custom").unwrap(), "value");
    }
}
