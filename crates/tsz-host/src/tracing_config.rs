//! Tracing setup for the host binary.
//!
//! Output format is picked by `TSZ_HOST_LOG_FORMAT`:
//!
//! - `text` (default): flat `tracing-subscriber` lines
//! - `tree`: indented spans via `tracing-tree`
//! - `json`: one JSON object per event
//!
//! ```bash
//! # Request/response flow of every server in the group
//! TSZ_HOST_LOG=tsz_host=debug tsz-host --separate-syntax
//!
//! # Only the servers' own stderr
//! TSZ_HOST_LOG=tsz_host::server_stderr=debug tsz-host
//!
//! # Telemetry events as JSON
//! TSZ_HOST_LOG=tsz_host::telemetry=info TSZ_HOST_LOG_FORMAT=json tsz-host
//! ```
//!
//! Nothing is installed unless `TSZ_HOST_LOG` or `RUST_LOG` is set. Output
//! always goes to stderr; stdout carries protocol traffic.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

pub const LOG_ENV: &str = "TSZ_HOST_LOG";
pub const LOG_FORMAT_ENV: &str = "TSZ_HOST_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Tree,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "tree" => Self::Tree,
            "json" => Self::Json,
            _ => Self::Text,
        }
    }

    fn from_env() -> Self {
        Self::parse(&std::env::var(LOG_FORMAT_ENV).unwrap_or_default())
    }
}

/// `TSZ_HOST_LOG` wins over `RUST_LOG`.
fn build_filter() -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(directives) => EnvFilter::builder().parse_lossy(directives),
        Err(_) => EnvFilter::from_default_env(),
    }
}

/// Install the global subscriber if logging was requested.
pub fn init_tracing() {
    if std::env::var_os(LOG_ENV).is_none() && std::env::var_os("RUST_LOG").is_none() {
        return;
    }

    let filter = build_filter();
    // `try_init`: a subscriber installed by an embedding program takes precedence.
    let installed = match LogFormat::from_env() {
        LogFormat::Tree => {
            let tree_layer = tracing_tree::HierarchicalLayer::default()
                .with_indent_amount(2)
                .with_indent_lines(true)
                .with_targets(true);
            Registry::default().with(filter).with(tree_layer).try_init()
        }
        LogFormat::Json => {
            let json_layer = fmt::layer().json().with_writer(std::io::stderr);
            Registry::default().with(filter).with(json_layer).try_init()
        }
        LogFormat::Text => {
            let text_layer = fmt::layer().with_writer(std::io::stderr);
            Registry::default().with(filter).with(text_layer).try_init()
        }
    };
    if installed.is_err() {
        tracing::debug!("global tracing subscriber already installed");
    }
}
