//! Host configuration.
//!
//! Read from a camelCase JSON file; every field has a default so an empty
//! object (or no file at all) yields a working single-server setup.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How the server group is split across processes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompositeServerType {
    /// One server handles every command.
    #[default]
    Single,
    /// A syntax server answers syntactic commands next to a semantic server.
    SeparateSyntax,
    /// Only a syntax server; semantic commands are answered partially.
    SyntaxOnly,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogVerbosity {
    #[default]
    Off,
    Terse,
    Normal,
    RequestTime,
    Verbose,
}

impl LogVerbosity {
    /// Value passed to `--logVerbosity`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Terse => "terse",
            Self::Normal => "normal",
            Self::RequestTime => "requestTime",
            Self::Verbose => "verbose",
        }
    }

    pub fn is_enabled(self) -> bool {
        self != Self::Off
    }
}

impl FromStr for LogVerbosity {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "off" => Ok(Self::Off),
            "terse" => Ok(Self::Terse),
            "normal" => Ok(Self::Normal),
            "requestTime" => Ok(Self::RequestTime),
            "verbose" => Ok(Self::Verbose),
            other => Err(ConfigError::UnknownLogVerbosity(other.to_string())),
        }
    }
}

impl fmt::Display for LogVerbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostConfig {
    /// Program and leading arguments used to start each server.
    pub tsserver: Vec<String>,
    pub composite: CompositeServerType,
    /// Run `geterr` on a dedicated server.
    pub separate_diagnostics_server: bool,
    pub cancellation: bool,
    pub log_verbosity: LogVerbosity,
    /// Where `tsserver-<kind>.log` files go. Defaults to the temp dir.
    pub log_directory: Option<PathBuf>,
    pub locale: Option<String>,
    pub extra_args: Vec<String>,
    /// Version label attached to server errors.
    pub version: String,
    pub use_inferred_project_per_project_root: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tsserver: vec!["npx".to_string(), "tsserver".to_string()],
            composite: CompositeServerType::default(),
            separate_diagnostics_server: false,
            cancellation: true,
            log_verbosity: LogVerbosity::default(),
            log_directory: None,
            locale: None,
            extra_args: Vec::new(),
            version: "unknown".to_string(),
            use_inferred_project_per_project_root: true,
        }
    }
}

impl HostConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), composite = ?config.composite, "loaded host config");
        Ok(config)
    }

    pub fn log_directory(&self) -> PathBuf {
        self.log_directory
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("tsz-host-logs"))
    }
}

#[cfg(test)]
#[path = "../tests/config_tests.rs"]
mod config_tests;
