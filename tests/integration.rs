//! End-to-end tests driving the mock listener and the tunnel engine over
//! real loopback sockets, mirroring the literal scenarios in spec §8.
//!
//! Grounded on the teacher's own `tests/server.rs` shape (a helper spins up
//! a real listener on an ephemeral port, a plain socket drives it) —
//! adapted to this crate's async (`tokio::test`) surface rather than the
//! teacher's blocking-thread harness, since this crate has no blocking
//! server variant to test against.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use relaymock::config::{Config, MockEntry, TunnelMapping, TunnelSection};
use relaymock::forward::ForwardClient;
use relaymock::mock::{self, MockEngine};
use relaymock::registry::TunnelRegistry;
use relaymock::rules::{RuleTable, RuleTableHandle};
use relaymock::store::Store;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn write_handler(dir: &std::path::Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::File::create(&path)
        .unwrap()
        .write_all(body.as_bytes())
        .unwrap();
    name.to_string()
}

fn test_client() -> Arc<ForwardClient> {
    Arc::new(hyper::Client::new())
}

async fn read_http_response(stream: &mut TcpStream) -> (u16, String) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 && buf.is_empty() {
            panic!("connection closed before any bytes were read");
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let headers_part = &text[..header_end];
            let status_line = headers_part.split("\r\n").next().unwrap();
            let status: u16 = status_line.split_whitespace().nth(1).unwrap().parse().unwrap();
            let content_length: usize = headers_part
                .split("\r\n")
                .filter_map(|l| l.split_once(": "))
                .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                .map(|(_, v)| v.parse().unwrap())
                .unwrap_or(0);
            let body_start = header_end + 4;
            if buf.len() >= body_start + content_length {
                let body = String::from_utf8_lossy(&buf[body_start..body_start + content_length]).to_string();
                return (status, body);
            }
        }
        if n == 0 {
            panic!("connection closed before a full response was read");
        }
    }
}

/// Spec §8 scenario 1: a `/api` rule with `strip: true` (the default)
/// serves `GET /api/thing?x=1` with the handler seeing the stripped path
/// and the full stripped URI, and whatever status/body it sets.
#[tokio::test]
async fn mock_dispatch_strips_prefix_and_serves_handler_response() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_handler(
        dir.path(),
        "a.rhai",
        r#"
        fn processor(ctx) {
            if ctx.path() != "/thing" {
                fail(500, "unexpected path: " + ctx.path());
            }
            if ctx.uri() != "/thing?x=1" {
                fail(500, "unexpected uri: " + ctx.uri());
            }
            ctx.set_status(201);
            ctx.set_body("ok");
        }
        "#,
    );
    let config = Config {
        mock: vec![MockEntry {
            prefix: "/api".into(),
            file,
            strip: true,
        }],
        tunnel: TunnelSection::default(),
    };
    let table = RuleTable::build(&config, dir.path(), Store::new(), test_client()).unwrap();
    let rules = RuleTableHandle::new(table);
    let engine = MockEngine::new(rules, Store::new(), dir.path().join("recordings"));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(mock::serve_listener(listener, engine));

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET /api/thing?x=1 HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let (status, body) = read_http_response(&mut client).await;
    assert_eq!(status, 201);
    assert_eq!(body, "ok");
}

/// Spec §8 scenario 2: the same config with `strip: false` — the handler
/// sees the unstripped path.
#[tokio::test]
async fn mock_dispatch_without_strip_keeps_the_full_path() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_handler(
        dir.path(),
        "a.rhai",
        r#"
        fn processor(ctx) {
            if ctx.path() != "/api/thing" {
                fail(500, "unexpected path: " + ctx.path());
            }
            ctx.set_status(200);
            ctx.set_body("unstripped");
        }
        "#,
    );
    let config = Config {
        mock: vec![MockEntry {
            prefix: "/api".into(),
            file,
            strip: false,
        }],
        tunnel: TunnelSection::default(),
    };
    let table = RuleTable::build(&config, dir.path(), Store::new(), test_client()).unwrap();
    let rules = RuleTableHandle::new(table);
    let engine = MockEngine::new(rules, Store::new(), dir.path().join("recordings"));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(mock::serve_listener(listener, engine));

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET /api/thing?x=1 HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let (status, body) = read_http_response(&mut client).await;
    assert_eq!(status, 200);
    assert_eq!(body, "unstripped");
}

/// Spec §8 scenario 3: two rules, `/a` then `/ab`; a request to `/abc`
/// matches the first (`/a`), not the later, longer `/ab`.
#[tokio::test]
async fn first_prefix_match_wins_over_a_later_longer_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_handler(
        dir.path(),
        "a.rhai",
        r#"fn processor(ctx) { ctx.set_status(200); ctx.set_body("from-a"); }"#,
    );
    let ab = write_handler(
        dir.path(),
        "ab.rhai",
        r#"fn processor(ctx) { ctx.set_status(200); ctx.set_body("from-ab"); }"#,
    );
    let config = Config {
        mock: vec![
            MockEntry {
                prefix: "/a".into(),
                file: a,
                strip: false,
            },
            MockEntry {
                prefix: "/ab".into(),
                file: ab,
                strip: false,
            },
        ],
        tunnel: TunnelSection::default(),
    };
    let table = RuleTable::build(&config, dir.path(), Store::new(), test_client()).unwrap();
    assert_eq!(table.dispatch("/abc").unwrap().2, "/a");
}

/// Spec §8 scenario 4: a tunnel relays bytes to and from an echo upstream,
/// and the connection listing reflects the live connection's peer address.
#[tokio::test]
async fn tunnel_relays_bytes_both_ways_and_tracks_the_connection() {
    let echo_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let echo_addr = echo_listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut sock, _) = echo_listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        loop {
            let n = match sock.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if sock.write_all(&buf[..n]).await.is_err() {
                break;
            }
        }
    });

    // Reserve an ephemeral port up front so the tunnel mapping can name a
    // concrete `port` (the registry binds exactly the port it's given, it
    // does not report back whatever the OS chose for `port: 0`).
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tunnel_port = probe.local_addr().unwrap().port();
    drop(probe);

    let registry = TunnelRegistry::new(Store::new());
    let config = Config {
        mock: vec![],
        tunnel: TunnelSection {
            mappings: vec![TunnelMapping {
                port: tunnel_port,
                dest_host: "127.0.0.1".into(),
                dest_port: echo_addr.port(),
                controller: None,
            }],
        },
    };
    registry.reload(&config, std::path::Path::new(".")).await.unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", tunnel_port)).await.unwrap();
    client.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");

    // Give the accept loop a moment to register the connection before
    // asking the tunnel for its live connection list.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let tunnel = registry.get(tunnel_port).unwrap();
    let infos = tunnel.connections_info();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].peer.ip().to_string(), "127.0.0.1");
}

/// Spec §8 scenario 5: resetting a live connection through the control
/// surface (here, calling the registry directly) tears it down and removes
/// it from the tunnel's connection map.
#[tokio::test]
async fn resetting_a_connection_removes_it_from_the_tunnel() {
    let echo_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let echo_addr = echo_listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut sock, _) = match echo_listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match sock.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if sock.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tunnel_port = probe.local_addr().unwrap().port();
    drop(probe);

    let registry = TunnelRegistry::new(Store::new());
    let config = Config {
        mock: vec![],
        tunnel: TunnelSection {
            mappings: vec![TunnelMapping {
                port: tunnel_port,
                dest_host: "127.0.0.1".into(),
                dest_port: echo_addr.port(),
                controller: None,
            }],
        },
    };
    registry.reload(&config, std::path::Path::new(".")).await.unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", tunnel_port)).await.unwrap();
    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let tunnel = registry.get(tunnel_port).unwrap();
    let conn_id = tunnel.connections_info()[0].id.clone();
    assert!(tunnel.close_connection(&conn_id, true));

    // The reset tears the connection: the peer observes EOF/RST on its
    // next read, and the tunnel forgets the connection.
    let mut probe_buf = [0u8; 1];
    let read_result = client.read(&mut probe_buf).await;
    assert!(matches!(read_result, Ok(0)) || read_result.is_err());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(tunnel.connections_info().is_empty());
}

/// Spec §8 invariants: `reload_tunnel` makes the live tunnel set equal the
/// new list, and a port dropped from the new list is stopped.
#[tokio::test]
async fn reload_drops_removed_tunnel_ports() {
    let registry = TunnelRegistry::new(Store::new());
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let with_one = Config {
        mock: vec![],
        tunnel: TunnelSection {
            mappings: vec![TunnelMapping {
                port,
                dest_host: "127.0.0.1".into(),
                dest_port: 1,
                controller: None,
            }],
        },
    };
    registry.reload(&with_one, std::path::Path::new(".")).await.unwrap();
    assert!(registry.get(port).is_some());

    let empty = Config {
        mock: vec![],
        tunnel: TunnelSection { mappings: vec![] },
    };
    registry.reload(&empty, std::path::Path::new(".")).await.unwrap();
    assert!(registry.get(port).is_none());

    // The port must be free again: a fresh bind on it should succeed.
    let rebound = tokio::net::TcpListener::bind(("127.0.0.1", port)).await;
    assert!(rebound.is_ok());
}
