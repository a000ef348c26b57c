//! C6/C7 — the TCP tunnel engine: per-port listeners with a lifecycle
//! state machine, and the connection registry each listener owns.
//!
//! Grounded on `pymock/tunnel.py`: the stopped→starting→started→
//! stopping→stopped state machine, start/stop as no-ops outside the
//! correct state, and the per-connection controller hooks are all direct
//! ports. `pymock/tunnel.py` runs on a single-threaded event loop; this
//! crate spreads connections across the Tokio thread pool, so every
//! shared table is behind a `parking_lot::Mutex` (spec §5).

mod connection;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::error::TunnelPeerError;
use crate::handler::ControllerFactory;
use crate::store::Store;

pub use connection::ConnectionInfo;

/// `stopped → starting → started → stopping → stopped` (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Stopped,
    Starting,
    Started,
    Stopping,
}

struct ConnectionHandle {
    peer: std::net::SocketAddr,
    close_tx: tokio::sync::watch::Sender<Option<bool>>,
}

/// One `tunnel.mappings[]` entry, running or not.
pub struct Tunnel {
    pub port: u16,
    pub dest_host: String,
    pub dest_port: u16,
    controller: Option<Arc<ControllerFactory>>,
    state: Mutex<TunnelState>,
    connections: Mutex<HashMap<String, ConnectionHandle>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    accept_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    store: Store,
}

impl Tunnel {
    pub fn new(
        port: u16,
        dest_host: String,
        dest_port: u16,
        controller: Option<Arc<ControllerFactory>>,
        store: Store,
    ) -> Arc<Tunnel> {
        Arc::new(Tunnel {
            port,
            dest_host,
            dest_port,
            controller,
            state: Mutex::new(TunnelState::Stopped),
            connections: Mutex::new(HashMap::new()),
            shutdown_tx: Mutex::new(None),
            accept_handle: Mutex::new(None),
            store,
        })
    }

    pub fn status(&self) -> TunnelState {
        *self.state.lock()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Binds the listener and starts accepting. A no-op if the tunnel is
    /// not currently `Stopped` (spec §7 "start is idempotent outside the
    /// stopped state").
    pub async fn start(self: &Arc<Self>) -> Result<(), TunnelPeerError> {
        {
            let mut state = self.state.lock();
            if *state != TunnelState::Stopped {
                return Ok(());
            }
            *state = TunnelState::Starting;
        }
        let listener = TcpListener::bind(("0.0.0.0", self.port)).await?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.shutdown_tx.lock() = Some(shutdown_tx);
        *self.state.lock() = TunnelState::Started;
        let this = self.clone();
        let handle = tokio::spawn(accept_loop(this, listener, shutdown_rx));
        *self.accept_handle.lock() = Some(handle);
        Ok(())
    }

    /// Stops taking new connections and cancels every connection currently
    /// running on this tunnel, matching `pymock/tunnel.py::Tunnel.stop`'s
    /// `for conn in self.connections.values(): conn.cancel()`. Waits for the
    /// accept loop to finish (so the listening socket is released) before
    /// returning. A no-op outside `Started` (spec §7).
    pub async fn stop(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if *state != TunnelState::Started {
                return;
            }
            *state = TunnelState::Stopping;
        }
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
        for handle in self.connections.lock().values() {
            let _ = handle.close_tx.send(Some(false));
        }
        let accept_handle = self.accept_handle.lock().take();
        if let Some(accept_handle) = accept_handle {
            let _ = accept_handle.await;
        }
    }

    pub fn connection_ids(&self) -> Vec<String> {
        self.connections.lock().keys().cloned().collect()
    }

    pub fn connections_info(&self) -> Vec<ConnectionInfo> {
        self.connections
            .lock()
            .iter()
            .map(|(id, handle)| ConnectionInfo {
                id: id.clone(),
                peer: handle.peer,
            })
            .collect()
    }

    /// Closes one connection by id. `reset` chooses `SO_LINGER{0}` (RST)
    /// over a graceful FIN. Returns `false` if no such connection exists.
    pub fn close_connection(&self, id: &str, reset: bool) -> bool {
        match self.connections.lock().get(id) {
            Some(handle) => {
                let _ = handle.close_tx.send(Some(reset));
                true
            }
            None => false,
        }
    }

    fn register(
        &self,
        id: String,
        peer: std::net::SocketAddr,
        close_tx: tokio::sync::watch::Sender<Option<bool>>,
    ) {
        self.connections
            .lock()
            .insert(id, ConnectionHandle { peer, close_tx });
    }

    fn unregister(&self, id: &str) {
        self.connections.lock().remove(id);
    }
}

async fn accept_loop(tunnel: Arc<Tunnel>, listener: TcpListener, mut shutdown_rx: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            res = listener.accept() => {
                match res {
                    Ok((stream, peer)) => {
                        let tunnel = tunnel.clone();
                        tokio::spawn(async move {
                            connection::run(tunnel, stream, peer).await;
                        });
                    }
                    Err(err) => {
                        tracing::warn!(port = tunnel.port, %err, "tunnel accept failed");
                        break;
                    }
                }
            }
            _ = &mut shutdown_rx => break,
        }
    }
    *tunnel.state.lock() = TunnelState::Stopped;
    tunnel.connections.lock().clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_before_start_is_a_noop() {
        let tunnel = Tunnel::new(0, "127.0.0.1".into(), 0, None, Store::new());
        tunnel.stop().await;
        assert_eq!(tunnel.status(), TunnelState::Stopped);
    }

    #[tokio::test]
    async fn start_then_status_is_started() {
        let tunnel = Tunnel::new(0, "127.0.0.1".into(), 1, None, Store::new());
        // port 0 lets the OS pick a free port; fine for exercising the
        // state transition even though dest_port is unreachable.
        tunnel.start().await.unwrap();
        assert_eq!(tunnel.status(), TunnelState::Started);
    }

    #[tokio::test]
    async fn double_start_is_idempotent() {
        let tunnel = Tunnel::new(0, "127.0.0.1".into(), 1, None, Store::new());
        tunnel.start().await.unwrap();
        let second = tunnel.start().await;
        assert!(second.is_ok());
        assert_eq!(tunnel.status(), TunnelState::Started);
    }

    #[tokio::test]
    async fn stop_signals_every_live_connection() {
        let tunnel = Tunnel::new(0, "127.0.0.1".into(), 1, None, Store::new());
        tunnel.start().await.unwrap();
        let (close_tx, mut close_rx) = tokio::sync::watch::channel(None);
        tunnel.register("conn-1".into(), "127.0.0.1:1".parse().unwrap(), close_tx);
        tunnel.stop().await;
        assert!(close_rx.changed().await.is_ok());
        assert_eq!(*close_rx.borrow(), Some(false));
        assert_eq!(tunnel.status(), TunnelState::Stopped);
    }

    #[test]
    fn close_unknown_connection_returns_false() {
        let tunnel = Tunnel::new(0, "127.0.0.1".into(), 1, None, Store::new());
        assert!(!tunnel.close_connection("nope", false));
    }
}
