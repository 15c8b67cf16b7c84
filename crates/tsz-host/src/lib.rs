//! Process host and request router for tsserver-compatible language servers.
//!
//! This crate provides:
//! - A single-process server client with ordered queueing and cancellation
//!   (`ProcessBasedTsServer`)
//! - Command routing across several servers (`RequestRouter`)
//! - Syntax/semantic and diagnostics server groups behind one `TsServer`
//! - Spawning a configured group from `HostConfig`
//! - Tracing setup for binaries

// Request ordering and bookkeeping
pub mod callback_map;
pub mod request_queue;
pub use request_queue::{QueueingType, RequestItem, RequestQueue};

// Cancellation of in-flight requests
pub mod cancellation;
pub use cancellation::{NoopRequestCanceller, OngoingRequestCanceller, PipeRequestCanceller};

pub mod error;
pub use error::{ConfigError, ExecuteError, RoutingError, SpawnError, TypeScriptServerError};

pub mod events;
pub use events::{Emitter, Subscription};

// Child processes and their event streams
pub mod process;
pub use process::{ChildServerProcess, ExitStatus, ProcessError, ProcessEvent, TsServerProcess};

pub mod telemetry;
pub use telemetry::{TelemetryReporter, TracingTelemetryReporter};

// Server clients
pub mod server;
pub use server::{
    ExecuteOptions, ExecuteResult, ExecutionTarget, NotifyOptions, ProcessBasedTsServer,
    ResponseFuture, ServerResponse, ServerSignals, TsServer,
};

pub mod router;
pub use router::{RequestRouter, RouteEntry, TsServerDelegate};

pub mod composite;
pub use composite::{GetErrRoutingTsServer, SyntaxRoutingTsServer};

pub mod config;
pub use config::{CompositeServerType, HostConfig, LogVerbosity};

pub mod spawner;
pub use spawner::{ServerKind, ServerSpawner};

pub mod tracing_config;

#[cfg(test)]
mod test_support;
