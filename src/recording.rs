//! Recording file format and I/O.
//!
//! Grounded on `pymock/mock.py`'s recording writer, invoked when a handler
//! calls `ctx.record()`. Always drains and stores the full request body
//! regardless of whether the handler itself ever read it (spec §4.4), so
//! replaying a recording reproduces exactly what the client sent.
//!
//! File name: `recordings/<HHMMSSffffff>-<safe-path>.txt`, where
//! `safe-path` is the request path with every character outside
//! `[A-Za-z0-9_.-]` replaced by `_` (spec §8, ported from
//! `pymock/utils.py::safe_filename`). The on-disk shape is a fixed text
//! format, not JSON, matching the original tool's recordings being
//! grep-able/diff-able by hand.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};

use crate::context::RequestContext;

const REQUEST_MARKER: &str = "===== REQUEST =====\n";
// Leading newline supplies the blank line `pymock/mock.py` puts between the
// request body and the RESPONSE marker.
const RESPONSE_MARKER: &str = "\n===== RESPONSE =====\n";

/// A parsed recording, used by tests and by any future replay tooling.
#[derive(Debug, PartialEq, Eq)]
pub struct Recording {
    pub request_method: Method,
    pub request_uri: String,
    pub request_headers: Vec<(String, String)>,
    pub request_body: Bytes,
    pub response_status: StatusCode,
    pub response_headers: Vec<(String, String)>,
    pub response_body: Bytes,
}

/// Ports `pymock/utils.py::safe_filename`'s character class: anything
/// outside `[A-Za-z0-9_.-]` becomes `_`.
fn safe_path(path: &str) -> String {
    path.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn timestamp_prefix(now: std::time::SystemTime) -> String {
    // HHMMSSffffff against local wall-clock time of day.
    let since_epoch = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs_of_day = since_epoch.as_secs() % 86_400;
    let micros = since_epoch.subsec_micros();
    let h = secs_of_day / 3600;
    let m = (secs_of_day % 3600) / 60;
    let s = secs_of_day % 60;
    format!("{h:02}{m:02}{s:02}{micros:06}")
}

/// Builds the destination path for a recording of `path`, taken at `now`.
pub fn recording_path(dir: &Path, path: &str, now: std::time::SystemTime) -> PathBuf {
    dir.join(format!("{}-{}.txt", timestamp_prefix(now), safe_path(path)))
}

fn encode_section(marker: &str, first_line: &str, headers: &HeaderMap, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(marker.as_bytes());
    out.extend_from_slice(first_line.as_bytes());
    out.push(b'\n');
    for (name, value) in headers.iter() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.push(b'\n');
    }
    out.push(b'\n');
    out.extend_from_slice(body);
    out
}

/// Records the full request/response exchange for `ctx` to a new file
/// under `dir`. The request body is drained in full here (idempotent with
/// any earlier `request_body`/`request_chunk` calls the handler made).
pub async fn record_exchange(dir: &Path, ctx: &RequestContext) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let request_body = ctx.request_body().await;
    let request_line = format!("{} {}", ctx.method(), ctx.uri());
    let mut buf = encode_section(
        REQUEST_MARKER,
        &request_line,
        &ctx.request_headers(),
        &request_body,
    );

    let status = ctx.status();
    let reason = status.canonical_reason().unwrap_or("");
    let status_line = format!("{} {}", status.as_u16(), reason);
    let response_body = ctx.response_body_snapshot().unwrap_or_default();
    buf.extend_from_slice(&encode_section(
        RESPONSE_MARKER,
        &status_line,
        &ctx.response_headers_snapshot(),
        &response_body,
    ));

    let path = recording_path(dir, &ctx.path(), std::time::SystemTime::now());
    tokio::fs::write(path, buf).await
}

/// Parses a recording file's raw bytes back into its two sections. Used by
/// tests to verify `record_exchange`'s output round-trips.
pub fn parse_recording(raw: &[u8]) -> Option<Recording> {
    let text_prefix_len = raw.windows(RESPONSE_MARKER.len()).position(|w| w == RESPONSE_MARKER.as_bytes())?;
    let (request_section, response_section) = raw.split_at(text_prefix_len);
    let request_section = request_section.strip_prefix(REQUEST_MARKER.as_bytes())?;
    let response_section = response_section.strip_prefix(RESPONSE_MARKER.as_bytes())?;

    let (req_first_line, req_headers, req_body) = split_section(request_section)?;
    let (resp_first_line, resp_headers, resp_body) = split_section(response_section)?;

    let mut req_parts = req_first_line.splitn(2, ' ');
    let method = req_parts.next()?.parse().ok()?;
    let uri = req_parts.next()?.to_string();

    let mut resp_parts = resp_first_line.splitn(2, ' ');
    let status_code: u16 = resp_parts.next()?.parse().ok()?;
    let status = StatusCode::from_u16(status_code).ok()?;

    Some(Recording {
        request_method: method,
        request_uri: uri,
        request_headers: req_headers,
        request_body: Bytes::copy_from_slice(req_body),
        response_status: status,
        response_headers: resp_headers,
        response_body: Bytes::copy_from_slice(resp_body),
    })
}

fn split_section(section: &[u8]) -> Option<(String, Vec<(String, String)>, &[u8])> {
    let blank_line = section.windows(2).position(|w| w == b"\n\n")?;
    let header_block = std::str::from_utf8(&section[..blank_line]).ok()?;
    let body = &section[blank_line + 2..];
    let mut lines = header_block.split('\n');
    let first_line = lines.next()?.to_string();
    let mut headers = Vec::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(": ") {
            headers.push((name.to_string(), value.to_string()));
        }
    }
    Some((first_line, headers, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_path_replaces_slashes() {
        assert_eq!(safe_path("/widgets/1"), "_widgets_1");
    }

    #[test]
    fn safe_path_replaces_any_unsafe_character() {
        assert_eq!(safe_path("/widgets?id=1:2 x"), "_widgets_id_1_2_x");
        assert_eq!(safe_path("a-b_c.d"), "a-b_c.d");
    }

    #[test]
    fn encode_then_parse_recovers_request_and_response() {
        let mut headers = HeaderMap::new();
        headers.insert("x-test", "1".parse().unwrap());
        let encoded = encode_section(REQUEST_MARKER, "GET /widgets", &headers, b"body-bytes");
        let mut full = encoded;
        full.extend_from_slice(&encode_section(
            RESPONSE_MARKER,
            "200 OK",
            &HeaderMap::new(),
            b"resp-bytes",
        ));

        let recording = parse_recording(&full).unwrap();
        assert_eq!(recording.request_method, Method::GET);
        assert_eq!(recording.request_uri, "/widgets");
        assert_eq!(recording.request_body, Bytes::from_static(b"body-bytes"));
        assert_eq!(recording.response_status, StatusCode::OK);
        assert_eq!(recording.response_body, Bytes::from_static(b"resp-bytes"));
        assert_eq!(
            recording.request_headers,
            vec![("x-test".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn timestamp_prefix_has_fixed_width() {
        let prefix = timestamp_prefix(std::time::SystemTime::now());
        assert_eq!(prefix.len(), 12);
    }
}
