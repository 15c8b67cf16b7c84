use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tsz_host::{CompositeServerType, HostConfig, LogVerbosity};

/// CLI arguments for the tsz-host binary.
#[derive(Parser, Debug)]
#[command(
    name = "tsz-host",
    version,
    about = "Drive a tsserver group from newline-delimited JSON on stdin"
)]
pub struct HostArgs {
    /// JSON host configuration file. Flags below override its values.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Server program, e.g. `node_modules/.bin/tsserver`.
    #[arg(long)]
    pub tsserver: Option<String>,

    /// Run a syntax server next to the semantic server.
    #[arg(long = "separate-syntax", conflicts_with = "syntax_only")]
    pub separate_syntax: bool,

    /// Run only a syntax server.
    #[arg(long = "syntax-only")]
    pub syntax_only: bool,

    /// Run `geterr` on a dedicated diagnostics server.
    #[arg(long = "separate-diagnostics")]
    pub separate_diagnostics: bool,

    /// Start servers without a cancellation pipe.
    #[arg(long = "no-cancellation")]
    pub no_cancellation: bool,

    /// Server log verbosity: off, terse, normal, requestTime or verbose.
    #[arg(long = "log-verbosity")]
    pub log_verbosity: Option<String>,

    /// Directory for `tsserver-<kind>.log` files.
    #[arg(long = "log-dir")]
    pub log_dir: Option<PathBuf>,

    #[arg(long)]
    pub locale: Option<String>,

    /// Extra arguments passed to every server.
    #[arg(last = true)]
    pub extra: Vec<String>,
}

impl HostArgs {
    /// Resolve the effective configuration: file first, then flags.
    pub fn to_config(&self) -> Result<HostConfig> {
        let mut config = match &self.config {
            Some(path) => HostConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => HostConfig::default(),
        };

        if let Some(tsserver) = &self.tsserver {
            config.tsserver = vec![tsserver.clone()];
        }
        if self.separate_syntax {
            config.composite = CompositeServerType::SeparateSyntax;
        }
        if self.syntax_only {
            config.composite = CompositeServerType::SyntaxOnly;
        }
        if self.separate_diagnostics {
            config.separate_diagnostics_server = true;
        }
        if self.no_cancellation {
            config.cancellation = false;
        }
        if let Some(verbosity) = &self.log_verbosity {
            config.log_verbosity = verbosity.parse::<LogVerbosity>()?;
        }
        if let Some(dir) = &self.log_dir {
            config.log_directory = Some(dir.clone());
        }
        if let Some(locale) = &self.locale {
            config.locale = Some(locale.clone());
        }
        config.extra_args.extend(self.extra.iter().cloned());
        Ok(config)
    }
}

#[cfg(test)]
#[path = "../tests/args_tests.rs"]
mod args_tests;
