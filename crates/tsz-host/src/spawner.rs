//! Starts the processes of a server group and wires them together.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cancellation::{NoopRequestCanceller, OngoingRequestCanceller, PipeRequestCanceller};
use crate::composite::{GetErrRoutingTsServer, SyntaxRoutingTsServer};
use crate::config::{CompositeServerType, HostConfig};
use crate::error::SpawnError;
use crate::process::{ChildServerProcess, ProcessSpec};
use crate::router::TsServerDelegate;
use crate::server::{ProcessBasedTsServer, TsServer};
use crate::telemetry::{TelemetryReporter, TracingTelemetryReporter};

/// Role of one process within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerKind {
    Main,
    Syntax,
    Semantic,
    Diagnostics,
}

impl ServerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Syntax => "syntax",
            Self::Semantic => "semantic",
            Self::Diagnostics => "diagnostics",
        }
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct ServerSpawner {
    config: HostConfig,
    telemetry: Arc<dyn TelemetryReporter>,
    delegate: Arc<dyn TsServerDelegate>,
}

impl ServerSpawner {
    pub fn new(config: HostConfig, delegate: Arc<dyn TsServerDelegate>) -> Self {
        Self {
            config,
            telemetry: Arc::new(TracingTelemetryReporter),
            delegate,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryReporter>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// The kinds of process [`spawn`](Self::spawn) starts, in start order.
    pub fn server_kinds(&self) -> Vec<ServerKind> {
        let mut kinds = match self.config.composite {
            CompositeServerType::Single => vec![ServerKind::Main],
            CompositeServerType::SeparateSyntax => vec![ServerKind::Syntax, ServerKind::Semantic],
            CompositeServerType::SyntaxOnly => vec![ServerKind::Syntax],
        };
        if self.uses_diagnostics_server() {
            kinds.push(ServerKind::Diagnostics);
        }
        kinds
    }

    fn uses_diagnostics_server(&self) -> bool {
        self.config.separate_diagnostics_server
            && self.config.composite != CompositeServerType::SyntaxOnly
    }

    /// Start every process of the configured group. Must be called from
    /// within a tokio runtime.
    pub fn spawn(&self) -> Result<Arc<dyn TsServer>, SpawnError> {
        if self.config.log_verbosity.is_enabled() {
            let dir = self.config.log_directory();
            std::fs::create_dir_all(&dir)
                .map_err(|source| SpawnError::LogDirectory { path: dir, source })?;
        }

        let primary: Arc<dyn TsServer> = match self.config.composite {
            CompositeServerType::Single => self.spawn_server(ServerKind::Main)?,
            CompositeServerType::SyntaxOnly => self.spawn_server(ServerKind::Syntax)?,
            CompositeServerType::SeparateSyntax => {
                let syntax = self.spawn_server(ServerKind::Syntax)?;
                let semantic = self.spawn_server(ServerKind::Semantic)?;
                Arc::new(SyntaxRoutingTsServer::new(
                    syntax,
                    semantic,
                    Arc::clone(&self.delegate),
                ))
            }
        };

        if !self.uses_diagnostics_server() {
            return Ok(primary);
        }
        let diagnostics = self.spawn_server(ServerKind::Diagnostics)?;
        Ok(Arc::new(GetErrRoutingTsServer::new(
            diagnostics,
            primary,
            Arc::clone(&self.delegate),
        )))
    }

    fn spawn_server(&self, kind: ServerKind) -> Result<Arc<dyn TsServer>, SpawnError> {
        let (program, leading_args) = self
            .config
            .tsserver
            .split_first()
            .ok_or(SpawnError::EmptyCommand)?;

        let canceller: Box<dyn OngoingRequestCanceller> = if self.config.cancellation {
            Box::new(PipeRequestCanceller::new(kind.as_str()))
        } else {
            Box::new(NoopRequestCanceller)
        };
        let log_file = self.log_file(kind);

        let mut args = leading_args.to_vec();
        args.extend(self.server_args(kind, canceller.as_ref(), log_file.as_deref()));
        let spec = ProcessSpec {
            label: kind.as_str().to_string(),
            program: program.clone(),
            args,
            ..ProcessSpec::default()
        };

        let (process, events) =
            ChildServerProcess::spawn(&spec).map_err(|source| SpawnError::Process {
                kind: kind.to_string(),
                program: program.clone(),
                source,
            })?;

        let server = ProcessBasedTsServer::builder(kind.as_str(), Box::new(process), events)
            .version(self.config.version.clone())
            .log_file(log_file)
            .canceller(canceller)
            .telemetry(Arc::clone(&self.telemetry))
            .start();
        Ok(Arc::new(server))
    }

    pub fn log_file(&self, kind: ServerKind) -> Option<PathBuf> {
        self.config
            .log_verbosity
            .is_enabled()
            .then(|| self.config.log_directory().join(format!("tsserver-{kind}.log")))
    }

    /// Command-line arguments for one server, after the configured program's
    /// own leading arguments.
    pub fn server_args(
        &self,
        kind: ServerKind,
        canceller: &dyn OngoingRequestCanceller,
        log_file: Option<&Path>,
    ) -> Vec<String> {
        let mut args = Vec::new();

        if kind == ServerKind::Syntax {
            if self.config.composite == CompositeServerType::SyntaxOnly {
                args.extend(["--serverMode".to_string(), "syntactic".to_string()]);
            } else {
                args.extend(["--serverMode".to_string(), "partialSemantic".to_string()]);
                // The semantic server reports diagnostics.
                args.push("--suppressDiagnosticEvents".to_string());
            }
        }

        if self.config.use_inferred_project_per_project_root {
            args.push("--useInferredProjectPerProjectRoot".to_string());
        }

        if let Some(pipe) = canceller.server_argument() {
            args.extend(["--cancellationPipeName".to_string(), pipe]);
        }

        if let Some(log_file) = log_file {
            args.extend([
                "--logVerbosity".to_string(),
                self.config.log_verbosity.as_str().to_string(),
                "--logFile".to_string(),
                log_file.display().to_string(),
            ]);
        }

        if let Some(locale) = &self.config.locale {
            args.extend(["--locale".to_string(), locale.clone()]);
        }

        args.extend(self.config.extra_args.iter().cloned());
        args
    }
}

#[cfg(test)]
#[path = "../tests/spawner_tests.rs"]
mod spawner_tests;
