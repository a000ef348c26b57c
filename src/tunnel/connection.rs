//! One tunnel connection: dial the destination, then pump bytes in both
//! directions until either side closes, notifying the controller (if any)
//! of every chunk observed in each direction.
//!
//! Grounded on `pymock/tunnel.py::TunnelConnection`'s `data_received`/
//! `forward` pair. The 1 KiB read size and "controller never mutates
//! payload" invariant come straight from that module.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::watch;

use super::Tunnel;
use crate::handler::ScriptConnection;

const READ_CHUNK_SIZE: usize = 1024;

/// Snapshot of a live tunnel connection, returned by the control plane's
/// `/tunnel/connection` listing.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: String,
    pub peer: SocketAddr,
}

#[derive(Clone, Copy)]
enum Direction {
    Input,
    Output,
}

/// Wraps an `Arc<TcpStream>` so reads/writes can run concurrently from two
/// tasks while a third (the control plane, via [`Tunnel::close_connection`])
/// can still call `set_linger` on the same socket.
#[derive(Clone)]
struct ArcTcp(Arc<TcpStream>);

impl AsyncRead for ArcTcp {
    fn poll_read(self: Pin<&mut Self>, cx: &mut TaskContext<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut &*self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for ArcTcp {
    fn poll_write(self: Pin<&mut Self>, cx: &mut TaskContext<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut &*self.0).poll_write(cx, buf)
    }
    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut &*self.0).poll_flush(cx)
    }
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut &*self.0).poll_shutdown(cx)
    }
}

pub async fn run(tunnel: Arc<Tunnel>, client_stream: TcpStream, peer: SocketAddr) {
    let id = unused_conn_id(&tunnel);
    let (close_tx, close_rx) = watch::channel(None);
    tunnel.register(id.clone(), peer, close_tx);

    let dest = format!("{}:{}", tunnel.dest_host, tunnel.dest_port);
    let upstream_stream = match TcpStream::connect(&dest).await {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(%peer, %dest, %err, "tunnel upstream connect failed");
            tunnel.unregister(&id);
            return;
        }
    };

    if let Some(controller) = tunnel_controller(&tunnel) {
        let conn = ScriptConnection {
            conn_id: id.clone(),
            peer,
            tunnel_port: tunnel.port,
        };
        tokio::task::block_in_place(|| controller.on_connected(conn));
    }

    let client = Arc::new(client_stream);
    let upstream = Arc::new(upstream_stream);

    // Local → dest is the "out" pump and calls `on_output`; dest → local is
    // the "in" pump and calls `on_input` (spec §4.6, `pymock/tunnel.py`'s
    // `proxy_out`/`proxy_in`).
    let out_pump = pump(
        ArcTcp(client.clone()),
        ArcTcp(upstream.clone()),
        close_rx.clone(),
        tunnel.clone(),
        id.clone(),
        peer,
        Direction::Output,
    );
    let in_pump = pump(
        ArcTcp(upstream.clone()),
        ArcTcp(client.clone()),
        close_rx.clone(),
        tunnel.clone(),
        id.clone(),
        peer,
        Direction::Input,
    );

    tokio::pin!(out_pump);
    tokio::pin!(in_pump);
    tokio::select! {
        _ = &mut out_pump => {}
        _ = &mut in_pump => {}
    }

    if let Some(nolinger) = *close_rx.borrow() {
        if nolinger {
            let _ = client.set_linger(Some(Duration::from_secs(0)));
        }
    }

    tunnel.unregister(&id);
}

fn tunnel_controller(tunnel: &Arc<Tunnel>) -> Option<Arc<crate::handler::ControllerFactory>> {
    tunnel.controller.clone()
}

/// Picks an 8-char id not already present in `tunnel.connections`, retrying
/// on collision (spec §4.6/§9, `pymock/tunnel.py`'s `_new_conn_id`).
fn unused_conn_id(tunnel: &Arc<Tunnel>) -> String {
    loop {
        let candidate = nanoid::nanoid!(8, &ID_ALPHABET);
        if !tunnel.connection_ids().contains(&candidate) {
            return candidate;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    mut close_rx: watch::Receiver<Option<bool>>,
    tunnel: Arc<Tunnel>,
    conn_id: String,
    peer: SocketAddr,
    direction: Direction,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        tokio::select! {
            _ = close_rx.changed() => {
                // Either the controller/control-plane signaled a close, or
                // the tunnel dropped every sender on stop(); both mean this
                // connection must tear down now.
                break;
            }
            result = reader.read(&mut buf) => {
                match result {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let chunk = buf[..n].to_vec();
                        if let Some(controller) = tunnel_controller(&tunnel) {
                            let conn = ScriptConnection {
                                conn_id: conn_id.clone(),
                                peer,
                                tunnel_port: tunnel.port,
                            };
                            let chunk_for_hook = chunk.clone();
                            tokio::task::block_in_place(move || match direction {
                                Direction::Input => controller.on_input(conn, chunk_for_hook),
                                Direction::Output => controller.on_output(conn, chunk_for_hook),
                            });
                        }
                        if writer.write_all(&chunk).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    let _ = writer.shutdown().await;
}

const ID_ALPHABET: [char; 36] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i',
    'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];
