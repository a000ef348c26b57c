//! C10 — routes a changed filesystem path to the right reload action.
//!
//! Grounded on `pymock/wshandler.py`/`pymock/main.py`'s file-watch
//! dispatch: `config.json` itself, a `mock[].file`, and a
//! `tunnel.mappings[].controller` each trigger a different, narrower
//! reload; anything else is an unrelated file and is ignored.
//!
//! Simplification (recorded in DESIGN.md): a changed handler or
//! controller file triggers a full rebuild of its owning table (the rule
//! table, or the tunnel registry) rather than an in-place single-entry
//! swap. Both are atomic replacements from a caller's point of view;
//! rebuilding the whole table keeps this dispatcher independent of each
//! table's internal representation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{load_config, Config};
use crate::error::ConfigError;
use crate::forward::ForwardClient;
use crate::registry::TunnelRegistry;
use crate::rules::{RuleTable, RuleTableHandle};
use crate::store::Store;

/// What a changed path maps to.
#[derive(Debug, PartialEq, Eq)]
pub enum ReloadTarget {
    Config,
    MockHandler,
    TunnelController,
    Unregistered,
}

/// The config file's identity in the same path space as `changed` and
/// every `mock[].file`/`tunnel.mappings[].controller` entry: relative to
/// `base_dir`, never absolute. Keeping all three in one space is what lets
/// `classify` compare them with plain equality.
pub const CONFIG_FILENAME: &str = "config.json";

/// Classifies `changed` (already normalized via
/// [`crate::config::normalize_path`], hence relative to `base_dir`)
/// against the currently-loaded config.
pub fn classify(changed: &Path, config: &Config) -> ReloadTarget {
    if changed == Path::new(CONFIG_FILENAME) {
        return ReloadTarget::Config;
    }
    if config.mock.iter().any(|m| Path::new(&m.file) == changed) {
        return ReloadTarget::MockHandler;
    }
    if config
        .tunnel
        .mappings
        .iter()
        .any(|m| m.controller.as_deref().map(Path::new) == Some(changed))
    {
        return ReloadTarget::TunnelController;
    }
    ReloadTarget::Unregistered
}

/// Applies the reload implied by `target`, given the freshly-read
/// `config.json`. Returns the new [`Config`] so the caller can keep it for
/// future `classify` calls.
pub async fn apply(
    target: ReloadTarget,
    config_path: &Path,
    base_dir: &Path,
    rules: &RuleTableHandle,
    tunnels: &TunnelRegistry,
    store: Store,
    client: Arc<ForwardClient>,
) -> Result<Config, ConfigError> {
    let config = load_config(config_path)?;
    match target {
        ReloadTarget::Unregistered => {}
        ReloadTarget::Config | ReloadTarget::MockHandler => {
            let table = RuleTable::build(&config, base_dir, store.clone(), client.clone())?;
            rules.replace(table);
            if matches!(target, ReloadTarget::Config) {
                tunnels.reload(&config, base_dir).await?;
            }
        }
        ReloadTarget::TunnelController => {
            tunnels.reload(&config, base_dir).await?;
        }
    }
    Ok(config)
}

/// Resolves `config.json`'s absolute on-disk path, for I/O only — never
/// compare against this with `classify`, which works in `base_dir`-relative
/// space (see [`CONFIG_FILENAME`]).
pub fn config_path(base_dir: &Path) -> PathBuf {
    base_dir.join(CONFIG_FILENAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MockEntry, TunnelMapping, TunnelSection};

    fn sample_config() -> Config {
        Config {
            mock: vec![MockEntry {
                prefix: "/a".into(),
                file: "a.rhai".into(),
                strip: true,
            }],
            tunnel: TunnelSection {
                mappings: vec![TunnelMapping {
                    port: 9000,
                    dest_host: "h".into(),
                    dest_port: 1,
                    controller: Some("ctl.rhai".into()),
                }],
            },
        }
    }

    #[test]
    fn classifies_config_file() {
        let cfg = sample_config();
        assert_eq!(
            classify(Path::new("config.json"), &cfg),
            ReloadTarget::Config
        );
    }

    #[test]
    fn classifies_mock_handler_file() {
        let cfg = sample_config();
        assert_eq!(
            classify(Path::new("a.rhai"), &cfg),
            ReloadTarget::MockHandler
        );
    }

    #[test]
    fn classifies_tunnel_controller_file() {
        let cfg = sample_config();
        assert_eq!(
            classify(Path::new("ctl.rhai"), &cfg),
            ReloadTarget::TunnelController
        );
    }

    #[test]
    fn classifies_unregistered_file() {
        let cfg = sample_config();
        assert_eq!(
            classify(Path::new("random.txt"), &cfg),
            ReloadTarget::Unregistered
        );
    }
}
