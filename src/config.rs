//! Engine-wide tunables.
//!
//! Mirrors `core-config`'s split between the raw parsed file and an
//! "effective" value: [`ConfigFile`] is what `toml` deserializes, [`Config`]
//! is what the rest of the crate actually reads. Unknown keys are ignored
//! (`#[serde(default)]` everywhere) so a config file can evolve without
//! breaking older binaries.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct ConfigFile {
    #[serde(default = "ConfigFile::default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "ConfigFile::default_query_cache_slots")]
    pub query_cache_slots: usize,
    #[serde(default = "ConfigFile::default_bbox_quantization")]
    pub bbox_quantization: i64,
    #[serde(default)]
    pub render_all_nodes: bool,
}

impl ConfigFile {
    fn default_worker_threads() -> usize {
        4
    }

    fn default_query_cache_slots() -> usize {
        3
    }

    fn default_bbox_quantization() -> i64 {
        1000
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            worker_threads: Self::default_worker_threads(),
            query_cache_slots: Self::default_query_cache_slots(),
            bbox_quantization: Self::default_bbox_quantization(),
            render_all_nodes: false,
        }
    }
}

/// Effective configuration used by the rest of the crate.
#[derive(Debug, Clone)]
pub struct Config {
    pub file: ConfigFile,
}

impl Default for Config {
    fn default() -> Self {
        Self { file: ConfigFile::default() }
    }
}

impl Config {
    pub fn worker_threads(&self) -> usize {
        self.file.worker_threads.max(1)
    }

    pub fn query_cache_slots(&self) -> usize {
        self.file.query_cache_slots.max(1)
    }

    pub fn bbox_quantization(&self) -> i64 {
        self.file.bbox_quantization.max(1)
    }

    pub fn render_all_nodes(&self) -> bool {
        self.file.render_all_nodes
    }

    /// Load from a TOML file, falling back to defaults for anything the file
    /// omits. A missing file is not an error (corrupt startup configuration
    /// is; a simply-absent one is not) and produces default settings.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file found, using defaults");
                return Ok(Self::default());
            }
            Err(err) => return Err(Error::Io(err)),
        };

        let file: ConfigFile = toml::from_str(&raw)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))?;

        if file.worker_threads == 0 {
            warn!("configured worker_threads == 0, treating as 1");
        }

        Ok(Self { file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load(Path::new("/nonexistent/smcore.toml")).unwrap();
        assert_eq!(cfg.worker_threads(), 4);
        assert_eq!(cfg.query_cache_slots(), 3);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "worker_threads = 8\n").unwrap();
        let cfg = Config::load(f.path()).unwrap();
        assert_eq!(cfg.worker_threads(), 8);
        assert_eq!(cfg.query_cache_slots(), 3);
        assert_eq!(cfg.bbox_quantization(), 1000);
    }
}
