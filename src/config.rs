//! `config.json` model and filesystem-safety helpers (spec §6).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// The top-level `config.json` document.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mock: Vec<MockEntry>,
    #[serde(default)]
    pub tunnel: TunnelSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MockEntry {
    pub prefix: String,
    pub file: String,
    #[serde(default = "default_strip")]
    pub strip: bool,
}

fn default_strip() -> bool {
    true
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct TunnelSection {
    #[serde(default)]
    pub mappings: Vec<TunnelMapping>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TunnelMapping {
    pub port: u16,
    pub dest_host: String,
    pub dest_port: u16,
    pub controller: Option<String>,
}

/// Loads and parses `path` as a [`Config`]. Missing required fields inside
/// `mock`/`tunnel.mappings` entries are caught by `serde`'s `Deserialize`
/// (they're non-`Option` fields), matching spec §6: "Missing required
/// field → fatal error at load."
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Json {
        path: path.display().to_string(),
        source,
    })
}

/// Canonicalizes a user-supplied path per spec §6: the absolute path is
/// computed, and if it does not lie within the current working directory
/// it is rewritten to `.`. Applied to every path that originates from
/// config entries or control-plane request arguments, before any file is
/// opened.
///
/// Unlike `std::fs::canonicalize`, this must work for paths that do not
/// yet exist (e.g. a handler file about to be created), so it normalizes
/// lexically rather than resolving symlinks.
pub fn normalize_path(path: &str) -> PathBuf {
    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(_) => return PathBuf::from("."),
    };
    let abspath = lexical_absolute(&cwd, Path::new(path));
    if abspath.starts_with(&cwd) {
        match abspath.strip_prefix(&cwd) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
            _ => PathBuf::from("."),
        }
    } else {
        PathBuf::from(".")
    }
}

fn lexical_absolute(cwd: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        use std::path::Component;
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_keeps_paths_inside_cwd() {
        let cwd = std::env::current_dir().unwrap();
        let p = normalize_path("handlers/a.rhai");
        assert_eq!(cwd.join(&p), cwd.join("handlers/a.rhai"));
    }

    #[test]
    fn normalize_path_rewrites_escapes_to_dot() {
        let escaped = normalize_path("../../../etc/passwd");
        assert_eq!(escaped, PathBuf::from("."));
    }

    #[test]
    fn normalize_path_rewrites_absolute_escapes_to_dot() {
        let escaped = normalize_path("/etc/passwd");
        assert_eq!(escaped, PathBuf::from("."));
    }
}
