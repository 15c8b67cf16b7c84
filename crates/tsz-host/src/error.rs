//! Error types surfaced by servers, the router and the spawner.

use std::path::PathBuf;

use serde_json::{Value, json};
use tsz_host_wire::Response;

/// A failed response (`success: false`) that is not the "no content" sentinel.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("<{server_id}> TypeScript Server Error ({version})\n{}", first_line(.response))]
pub struct TypeScriptServerError {
    pub server_id: String,
    pub version: String,
    pub response: Response,
}

impl TypeScriptServerError {
    pub fn new(server_id: impl Into<String>, version: impl Into<String>, response: Response) -> Self {
        Self {
            server_id: server_id.into(),
            version: version.into(),
            response,
        }
    }

    pub fn server_message(&self) -> Option<&str> {
        self.response.message.as_deref()
    }

    /// Payload sent with the `languageServiceErrorResponse` telemetry event.
    ///
    /// Only the first line of the server message is included; the rest is a
    /// stack trace that may contain user paths.
    pub fn telemetry(&self) -> Value {
        json!({
            "command": self.response.command,
            "serverId": self.server_id,
            "version": self.version,
            "message": first_line(&self.response),
        })
    }
}

fn first_line(response: &Response) -> &str {
    response
        .message
        .as_deref()
        .and_then(|message| message.lines().next())
        .unwrap_or("")
}

/// Why a response future resolved to an error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Server(#[from] TypeScriptServerError),
    /// The owning server exited, errored or was disposed before answering.
    #[error("request abandoned: {cause}")]
    ServerDestroyed { cause: String },
    #[error("failed to write request {seq} ({command}): {message}")]
    Write {
        seq: u64,
        command: String,
        message: String,
    },
    #[error(transparent)]
    Routing(#[from] RoutingError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("could not find server for command '{0}'")]
    NoServerForCommand(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown log verbosity '{0}' (expected off, terse, normal, requestTime or verbose)")]
    UnknownLogVerbosity(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("tsserver command is empty")]
    EmptyCommand,
    #[error("failed to create log directory {}: {source}", .path.display())]
    LogDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn {kind} server ({program}): {source}")]
    Process {
        kind: String,
        program: String,
        #[source]
        source: std::io::Error,
    },
}
