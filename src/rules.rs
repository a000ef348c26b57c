//! C2 — the mock rule table and first-prefix-match dispatcher.
//!
//! Grounded on `pymock/config.py::build_mock_table` and
//! `pymock/mock.py`'s request routing, which walk the `mock` list in
//! `config.json` order and dispatch to the first entry whose `prefix`
//! matches the request path.

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::error::ConfigError;
use crate::forward::ForwardClient;
use crate::handler::Handler;
use crate::store::Store;

struct Rule {
    prefix: String,
    strip: bool,
    handler: Handler,
}

/// An ordered list of `(prefix, handler)` rules, rebuilt wholesale on every
/// config reload (spec §6: "reloading `config.json` replaces the rule
/// table atomically; in-flight requests keep running against the table
/// they started with").
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    /// Builds a table from a parsed [`Config`], loading every referenced
    /// handler file up front. A single bad entry fails the whole reload
    /// (spec §6), leaving the previous table (held by the caller) intact.
    pub fn build(
        config: &Config,
        base_dir: &Path,
        store: Store,
        client: Arc<ForwardClient>,
    ) -> Result<RuleTable, ConfigError> {
        let mut rules = Vec::with_capacity(config.mock.len());
        for entry in &config.mock {
            let path = base_dir.join(&entry.file);
            let handler = Handler::load(&path, store.clone(), client.clone())?;
            rules.push(Rule {
                prefix: entry.prefix.clone(),
                strip: entry.strip,
                handler,
            });
        }
        Ok(RuleTable { rules })
    }

    /// Finds the first rule whose prefix matches `path`, returning it
    /// together with whether the match should strip the prefix.
    pub fn dispatch(&self, path: &str) -> Option<(&Handler, bool, &str)> {
        self.rules
            .iter()
            .find(|rule| path.starts_with(rule.prefix.as_str()))
            .map(|rule| (&rule.handler, rule.strip, rule.prefix.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

/// A hot-swappable holder for the active [`RuleTable`] (C10 reload target).
#[derive(Clone)]
pub struct RuleTableHandle {
    inner: Arc<parking_lot::RwLock<Arc<RuleTable>>>,
}

impl RuleTableHandle {
    pub fn new(table: RuleTable) -> Self {
        RuleTableHandle {
            inner: Arc::new(parking_lot::RwLock::new(Arc::new(table))),
        }
    }

    pub fn current(&self) -> Arc<RuleTable> {
        self.inner.read().clone()
    }

    pub fn replace(&self, table: RuleTable) {
        *self.inner.write() = Arc::new(table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn handler_file(dir: &Path, name: &str) -> String {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"fn processor(ctx) { ctx.set_status(200); }")
            .unwrap();
        name.to_string()
    }

    fn test_client() -> Arc<ForwardClient> {
        Arc::new(hyper::Client::new())
    }

    #[test]
    fn dispatch_picks_first_matching_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let a = handler_file(dir.path(), "a.rhai");
        let b = handler_file(dir.path(), "b.rhai");
        let config = Config {
            mock: vec![
                crate::config::MockEntry {
                    prefix: "/api/v1".into(),
                    file: a,
                    strip: true,
                },
                crate::config::MockEntry {
                    prefix: "/api".into(),
                    file: b,
                    strip: false,
                },
            ],
            tunnel: Default::default(),
        };
        let table = RuleTable::build(&config, dir.path(), Store::new(), test_client()).unwrap();
        let (_, strip, prefix) = table.dispatch("/api/v1/widgets").unwrap();
        assert_eq!(prefix, "/api/v1");
        assert!(strip);
    }

    #[test]
    fn dispatch_returns_none_when_no_rule_matches() {
        let dir = tempfile::tempdir().unwrap();
        let a = handler_file(dir.path(), "a.rhai");
        let config = Config {
            mock: vec![crate::config::MockEntry {
                prefix: "/only".into(),
                file: a,
                strip: true,
            }],
            tunnel: Default::default(),
        };
        let table = RuleTable::build(&config, dir.path(), Store::new(), test_client()).unwrap();
        assert!(table.dispatch("/elsewhere").is_none());
    }

    #[test]
    fn handle_replace_swaps_table_for_new_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let a = handler_file(dir.path(), "a.rhai");
        let config = Config {
            mock: vec![crate::config::MockEntry {
                prefix: "/a".into(),
                file: a,
                strip: true,
            }],
            tunnel: Default::default(),
        };
        let table = RuleTable::build(&config, dir.path(), Store::new(), test_client()).unwrap();
        let handle = RuleTableHandle::new(table);
        assert_eq!(handle.current().len(), 1);
        let empty = RuleTable::build(
            &Config {
                mock: vec![],
                tunnel: Default::default(),
            },
            dir.path(),
            Store::new(),
            test_client(),
        )
        .unwrap();
        handle.replace(empty);
        assert!(handle.current().is_empty());
    }
}
