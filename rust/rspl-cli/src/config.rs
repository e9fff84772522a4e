//! Configuration file parsing for `rspl.toml`.
//!
//! Searches the directory of the source file, then its ancestors. The
//! `[compile]` table maps onto `CompileConfig`, `[defines]` seeds the
//! preprocessor.

use rspl_compiler::CompileConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE: &str = "rspl.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid toml in '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RsplConfig {
    #[serde(default)]
    pub compile: CompileConfig,
    /// Preprocessor defines, as if given with `-D NAME=VALUE`.
    #[serde(default)]
    pub defines: BTreeMap<String, String>,
}

impl RsplConfig {
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Nearest `rspl.toml` at or above `start`.
    pub fn find(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_FILE);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    /// Load the nearest config above `start`, or the defaults when there is none.
    pub fn find_and_load(start: &Path) -> Result<(Option<PathBuf>, Self), ConfigError> {
        match Self::find(start) {
            Some(path) => {
                let cfg = Self::load_from(&path)?;
                Ok((Some(path), cfg))
            }
            None => Ok((None, Self::default())),
        }
    }

    /// Add `-D` style definitions; `NAME` alone defines an empty value.
    pub fn apply_defines<'a>(&mut self, defines: impl IntoIterator<Item = &'a str>) {
        for def in defines {
            let (name, value) = def.split_once('=').unwrap_or((def, ""));
            self.defines.insert(name.trim().to_string(), value.trim().to_string());
        }
    }

    pub fn default_template() -> &'static str {
        r#"# RSPL compiler configuration

[compile]
optimize = true
dispatch_wrapper = true
source_comments = false
schedule_rounds = 4

[defines]
# DEBUG = "1"
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_returns_default() {
        let cfg: RsplConfig = toml::from_str("").expect("empty toml is valid");
        assert_eq!(cfg, RsplConfig::default());
        assert!(cfg.compile.optimize);
    }

    #[test]
    fn partial_compile_table_keeps_defaults() {
        let cfg: RsplConfig = toml::from_str("[compile]\noptimize = false\n").expect("should parse");
        assert!(!cfg.compile.optimize);
        assert!(cfg.compile.dispatch_wrapper);
        assert_eq!(cfg.compile.schedule_rounds, 4);
    }

    #[test]
    fn parse_defines() {
        let cfg: RsplConfig = toml::from_str("[defines]\nBATCH = \"8\"\nDEBUG = \"\"\n").expect("should parse");
        assert_eq!(cfg.defines.get("BATCH").map(String::as_str), Some("8"));
        assert_eq!(cfg.defines.get("DEBUG").map(String::as_str), Some(""));
    }

    #[test]
    fn unknown_section_is_an_error() {
        let result: Result<RsplConfig, _> = toml::from_str("[providers]\nx = 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn invalid_toml_returns_error() {
        let result: Result<RsplConfig, _> = toml::from_str("[broken");
        assert!(result.is_err());
    }

    #[test]
    fn default_template_round_trips() {
        let cfg: RsplConfig = toml::from_str(RsplConfig::default_template()).expect("template should parse");
        assert_eq!(cfg, RsplConfig::default());
    }

    #[test]
    fn command_line_defines_override_file() {
        let mut cfg: RsplConfig = toml::from_str("[defines]\nBATCH = \"8\"\n").expect("should parse");
        cfg.apply_defines(["BATCH=16", "FAST"]);
        assert_eq!(cfg.defines.get("BATCH").map(String::as_str), Some("16"));
        assert_eq!(cfg.defines.get("FAST").map(String::as_str), Some(""));
    }

    #[test]
    fn find_searches_ancestors() {
        let root = std::env::temp_dir().join(format!("rspl-config-test-{}", std::process::id()));
        let nested = root.join("a").join("b");
        std::fs::create_dir_all(&nested).expect("create dirs");
        std::fs::write(root.join(CONFIG_FILE), "[compile]\nschedule_rounds = 0\n").expect("write config");

        let (path, cfg) = RsplConfig::find_and_load(&nested).expect("config should load");
        assert_eq!(path, Some(root.join(CONFIG_FILE)));
        assert_eq!(cfg.compile.schedule_rounds, 0);

        std::fs::remove_dir_all(&root).expect("cleanup");
    }
}
