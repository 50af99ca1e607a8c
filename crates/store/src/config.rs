//! Database settings, read from a TOML file.
//!
//! ```toml
//! data_dir = "/var/lib/sylva"
//! lock_timeout_ms = 10000
//! strip_whitespace = true
//! optimize = true
//! module_search_path = ["/opt/xquery/lib"]
//!
//! [serialization]
//! indent = true
//! omit_xml_declaration = true
//! method = "xml"
//! ```

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sylva_xquery::{OutputMethod, SerializationOptions};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Directory collections are persisted to; `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    pub lock_timeout_ms: u64,
    /// Drop whitespace-only text nodes when a document is stored.
    pub strip_whitespace: bool,
    /// Default optimizer setting for queries that do not declare one.
    pub optimize: bool,
    pub module_search_path: Vec<PathBuf>,
    pub serialization: SerializationDefaults,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            lock_timeout_ms: 10_000,
            strip_whitespace: true,
            optimize: true,
            module_search_path: Vec::new(),
            serialization: SerializationDefaults::default(),
        }
    }
}

impl DatabaseConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents).map_err(|e| match e {
            StoreError::ConfigParse { source, .. } => StoreError::ConfigParse {
                path: Some(path.to_path_buf()),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|source| StoreError::ConfigParse { path: None, source })
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|source| StoreError::ConfigSerialize { source })
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    #[default]
    Xml,
    Html,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SerializationDefaults {
    pub indent: bool,
    pub omit_xml_declaration: bool,
    pub method: Method,
}

impl Default for SerializationDefaults {
    fn default() -> Self {
        Self {
            indent: true,
            omit_xml_declaration: true,
            method: Method::Xml,
        }
    }
}

impl SerializationDefaults {
    pub fn options(&self) -> SerializationOptions {
        SerializationOptions {
            method: match self.method {
                Method::Xml | Method::Html => OutputMethod::Xml,
                Method::Text => OutputMethod::Text,
            },
            indent: self.indent,
            omit_xml_declaration: self.omit_xml_declaration,
            ..SerializationOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = DatabaseConfig::from_toml("").unwrap();
        assert_eq!(cfg, DatabaseConfig::default());
        assert_eq!(cfg.lock_timeout(), Duration::from_secs(10));
        assert!(cfg.strip_whitespace);
        assert!(cfg.optimize);
    }

    #[test]
    fn partial_tables_are_filled_in() {
        let cfg = DatabaseConfig::from_toml(
            r#"
            lock_timeout_ms = 250
            optimize = false

            [serialization]
            indent = false
            method = "text"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.lock_timeout_ms, 250);
        assert!(!cfg.optimize);
        assert!(cfg.serialization.omit_xml_declaration);
        let opts = cfg.serialization.options();
        assert_eq!(opts.method, OutputMethod::Text);
        assert!(!opts.indent);
    }

    #[test]
    fn bad_values_are_reported() {
        let err = DatabaseConfig::from_toml("lock_timeout_ms = 'soon'").unwrap_err();
        assert!(matches!(err, StoreError::ConfigParse { .. }));
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = DatabaseConfig::default().with_data_dir("/tmp/sylva");
        let text = cfg.to_toml().unwrap();
        assert_eq!(DatabaseConfig::from_toml(&text).unwrap(), cfg);
    }
}
