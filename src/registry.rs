//! C8 — the tunnel registry: one `Tunnel` per configured port, with the
//! atomic-replacement semantics `config.json`'s `tunnel` section reload
//! needs.
//!
//! Grounded on `pymock/config.py::build_tunnel_table`/`pymock/main.py`'s
//! startup sequence, which builds every configured tunnel and starts it
//! immediately. A reload follows `reload_tunnel`'s literal semantics: stop
//! every tunnel in the map, clear the map, then start a fresh tunnel for
//! every entry of the new list.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{ConfigError, ControlPlaneError};
use crate::handler::ControllerFactory;
use crate::store::Store;
use crate::tunnel::{Tunnel, TunnelState};

pub struct TunnelSummary {
    pub port: u16,
    pub dest_host: String,
    pub dest_port: u16,
    pub state: TunnelState,
}

/// Process-wide `port -> Tunnel` table. Mutations (`start`/`stop`/reload)
/// all go through the single `parking_lot::Mutex` guarding the map, per
/// spec §5.
pub struct TunnelRegistry {
    tunnels: Mutex<HashMap<u16, Arc<Tunnel>>>,
    store: Store,
}

impl TunnelRegistry {
    pub fn new(store: Store) -> Self {
        TunnelRegistry {
            tunnels: Mutex::new(HashMap::new()),
            store,
        }
    }

    pub fn get(&self, port: u16) -> Option<Arc<Tunnel>> {
        self.tunnels.lock().get(&port).cloned()
    }

    pub fn list(&self) -> Vec<TunnelSummary> {
        self.tunnels
            .lock()
            .values()
            .map(|t| TunnelSummary {
                port: t.port,
                dest_host: t.dest_host.clone(),
                dest_port: t.dest_port,
                state: t.status(),
            })
            .collect()
    }

    /// Stops every currently-registered tunnel, clears the map, then starts
    /// a fresh tunnel for each entry in `config.tunnel.mappings` (spec
    /// §4.7: "stop every tunnel in the map, clear the map, then
    /// `start_tunnel` each entry of list"). This rebuilds unchanged ports
    /// too, so an edited `dest_host`/`dest_port`/`controller` always takes
    /// effect instead of being silently skipped.
    pub async fn reload(&self, config: &Config, base_dir: &Path) -> Result<(), ConfigError> {
        let mut wanted = Vec::with_capacity(config.tunnel.mappings.len());
        for mapping in &config.tunnel.mappings {
            let controller = match &mapping.controller {
                Some(file) => {
                    let path = base_dir.join(file);
                    Some(Arc::new(ControllerFactory::load(&path, self.store.clone())?))
                }
                None => None,
            };
            wanted.push((mapping.clone(), controller));
        }

        let existing: Vec<Arc<Tunnel>> = self.tunnels.lock().drain().map(|(_, t)| t).collect();
        for tunnel in existing {
            tunnel.stop().await;
        }

        for (mapping, controller) in wanted {
            let tunnel = Tunnel::new(
                mapping.port,
                mapping.dest_host.clone(),
                mapping.dest_port,
                controller,
                self.store.clone(),
            );
            tunnel.start().await.map_err(|e| ConfigError::InvalidArtifact {
                path: format!("tunnel port {}", mapping.port),
                reason: e.to_string(),
            })?;
            self.tunnels.lock().insert(mapping.port, tunnel);
        }

        Ok(())
    }

    pub async fn start(&self, port: u16) -> Result<(), ControlPlaneError> {
        let tunnel = self
            .get(port)
            .ok_or_else(|| ControlPlaneError::NotFound(format!("no tunnel configured on port {port}")))?;
        tunnel
            .start()
            .await
            .map_err(|e| ControlPlaneError::BadRequest(e.to_string()))
    }

    pub async fn stop(&self, port: u16) -> Result<(), ControlPlaneError> {
        let tunnel = self
            .get(port)
            .ok_or_else(|| ControlPlaneError::NotFound(format!("no tunnel configured on port {port}")))?;
        tunnel.stop().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, TunnelMapping, TunnelSection};

    #[tokio::test]
    async fn reload_starts_configured_tunnels() {
        let registry = TunnelRegistry::new(Store::new());
        let config = Config {
            mock: vec![],
            tunnel: TunnelSection {
                mappings: vec![TunnelMapping {
                    port: 0,
                    dest_host: "127.0.0.1".into(),
                    dest_port: 1,
                    controller: None,
                }],
            },
        };
        registry.reload(&config, Path::new(".")).await.unwrap();
        assert_eq!(registry.list().len(), 1);
    }

    #[tokio::test]
    async fn reload_removes_dropped_mappings() {
        let registry = TunnelRegistry::new(Store::new());
        let with_one = Config {
            mock: vec![],
            tunnel: TunnelSection {
                mappings: vec![TunnelMapping {
                    port: 0,
                    dest_host: "127.0.0.1".into(),
                    dest_port: 1,
                    controller: None,
                }],
            },
        };
        registry.reload(&with_one, Path::new(".")).await.unwrap();
        let port = registry.list()[0].port;

        let empty = Config {
            mock: vec![],
            tunnel: TunnelSection { mappings: vec![] },
        };
        registry.reload(&empty, Path::new(".")).await.unwrap();
        assert!(registry.get(port).is_none());
    }

    #[tokio::test]
    async fn reload_rebuilds_tunnel_with_changed_destination() {
        let registry = TunnelRegistry::new(Store::new());
        let first = Config {
            mock: vec![],
            tunnel: TunnelSection {
                mappings: vec![TunnelMapping {
                    port: 0,
                    dest_host: "127.0.0.1".into(),
                    dest_port: 1,
                    controller: None,
                }],
            },
        };
        registry.reload(&first, Path::new(".")).await.unwrap();
        assert_eq!(registry.list()[0].dest_port, 1);

        let second = Config {
            mock: vec![],
            tunnel: TunnelSection {
                mappings: vec![TunnelMapping {
                    port: 0,
                    dest_host: "127.0.0.1".into(),
                    dest_port: 2,
                    controller: None,
                }],
            },
        };
        registry.reload(&second, Path::new(".")).await.unwrap();
        assert_eq!(registry.list().len(), 1);
        assert_eq!(registry.list()[0].dest_port, 2);
    }
}
