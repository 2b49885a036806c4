//! Engine configuration, read from `overlay.toml`.
//!
//! ```toml
//! include_hidden = false
//!
//! [[formats]]
//! suffix = ".conf.yaml"
//! format = "yaml"
//!
//! [check]
//! max_depth = 32
//! ```
//!
//! Listing `formats` replaces the default suffix table.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ErrorKind, Result};
use crate::source::{FormatSuffix, default_suffixes};

pub const CONFIG_FILE_NAME: &str = "overlay.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub formats: Vec<FormatSuffix>,
    /// Compile directory entries whose name starts with `.`.
    pub include_hidden: bool,
    pub check: CheckConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckConfig {
    pub max_depth: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            formats: default_suffixes(),
            include_hidden: false,
            check: CheckConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|error| ErrorKind::Config(error.to_string()).into())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|error| ErrorKind::Source {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// `overlay.toml` in `dir` if present, defaults otherwise.
    pub fn discover(dir: &Path) -> Result<(Self, Option<PathBuf>)> {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            let config = Self::load(&candidate)?;
            log::debug!("loaded configuration from {}", candidate.display());
            Ok((config, Some(candidate)))
        } else {
            Ok((Self::default(), None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceFormat;

    #[test]
    fn empty_file_yields_defaults() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn formats_replace_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
include_hidden = true

[[formats]]
suffix = ".conf.json"
format = "json"

[check]
max_depth = 4
"#,
        )
        .unwrap();

        assert!(config.include_hidden);
        assert_eq!(config.formats, vec![FormatSuffix::new(".conf.json", SourceFormat::Json)]);
        assert_eq!(config.check.max_depth, Some(4));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let error = EngineConfig::from_toml_str("colour = \"blue\"").unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::Config(_)));
    }

    #[test]
    fn discover_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (config, path) = EngineConfig::discover(dir.path()).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(path.is_none());

        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[check]\nmax_depth = 2\n").unwrap();
        let (config, path) = EngineConfig::discover(dir.path()).unwrap();
        assert_eq!(config.check.max_depth, Some(2));
        assert!(path.is_some());
    }
}
