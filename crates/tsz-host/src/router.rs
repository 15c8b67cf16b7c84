//! Command routing across several servers.
//!
//! Entries are consulted in order. Shared commands (document state and
//! configuration) go to every server so they stay in sync; the caller only
//! observes the first server's outcome. Everything else goes to the first
//! entry whose preferred command set accepts it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use rustc_hash::FxHashSet;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{ExecuteError, RoutingError};
use crate::server::{
    ExecuteOptions, ExecuteResult, ExecutionTarget, NotifyOptions, ResponseFuture, TsServer,
};

/// Commands replicated to every server in a group.
pub const SHARED_COMMANDS: &[&str] = &[
    "change",
    "close",
    "open",
    "updateOpen",
    "configure",
    "configurePlugin",
];

pub fn is_shared_command(command: &str) -> bool {
    SHARED_COMMANDS.contains(&command)
}

/// Receives failures the router cannot recover from locally.
pub trait TsServerDelegate: Send + Sync {
    /// Servers disagreed on a shared command: one succeeded, another failed.
    fn on_fatal_error(&self, command: &str, error: &ExecuteError);
}

pub struct RouteEntry {
    pub server: Arc<dyn TsServer>,
    /// `None` accepts every command.
    pub preferred_commands: Option<FxHashSet<String>>,
    pub target: Option<ExecutionTarget>,
}

impl RouteEntry {
    pub fn catch_all(server: Arc<dyn TsServer>) -> Self {
        Self {
            server,
            preferred_commands: None,
            target: None,
        }
    }

    pub fn preferring(server: Arc<dyn TsServer>, commands: &[&str]) -> Self {
        Self {
            server,
            preferred_commands: Some(commands.iter().map(|c| (*c).to_string()).collect()),
            target: None,
        }
    }

    pub fn with_target(mut self, target: ExecutionTarget) -> Self {
        self.target = Some(target);
        self
    }

    fn accepts(&self, command: &str) -> bool {
        self.preferred_commands
            .as_ref()
            .is_none_or(|commands| commands.contains(command))
    }
}

#[derive(Debug, Clone)]
enum RequestState {
    Unresolved,
    Resolved,
    Errored(ExecuteError),
}

pub struct RequestRouter {
    servers: Vec<RouteEntry>,
    delegate: Arc<dyn TsServerDelegate>,
}

impl RequestRouter {
    pub fn new(servers: Vec<RouteEntry>, delegate: Arc<dyn TsServerDelegate>) -> Self {
        Self { servers, delegate }
    }

    pub fn execute(
        &self,
        command: &str,
        args: Value,
        options: ExecuteOptions,
    ) -> Result<ResponseFuture, RoutingError> {
        if options.execution_target.is_none() && is_shared_command(command) {
            return Ok(self.execute_shared(command, args, options));
        }
        let entry = self.route(command, options.execution_target)?;
        Ok(entry.server.execute(command, args, options))
    }

    pub fn notify(
        &self,
        command: &str,
        args: Value,
        options: NotifyOptions,
    ) -> Result<(), RoutingError> {
        if options.execution_target.is_none() && is_shared_command(command) {
            for entry in &self.servers {
                entry.server.notify(command, args.clone(), options);
            }
            return Ok(());
        }
        let entry = self.route(command, options.execution_target)?;
        entry.server.notify(command, args, options);
        Ok(())
    }

    fn route(
        &self,
        command: &str,
        target: Option<ExecutionTarget>,
    ) -> Result<&RouteEntry, RoutingError> {
        let targeted = target.and_then(|target| {
            self.servers
                .iter()
                .find(|entry| entry.target == Some(target))
        });
        targeted
            .or_else(|| self.servers.iter().find(|entry| entry.accepts(command)))
            .ok_or_else(|| {
                tracing::error!(command, "no server registered for command");
                RoutingError::NoServerForCommand(command.to_string())
            })
    }

    fn execute_shared(&self, command: &str, args: Value, options: ExecuteOptions) -> ResponseFuture {
        let states = Arc::new(Mutex::new(vec![
            RequestState::Unresolved;
            self.servers.len()
        ]));
        let remaining = Arc::new(AtomicUsize::new(self.servers.len()));
        let all_settled = CancellationToken::new();

        // Cancel downstream only while no server has applied the command.
        let token = options.token.clone().map(|caller| {
            let shared = CancellationToken::new();
            let forward = shared.clone();
            let states = Arc::clone(&states);
            let all_settled = all_settled.clone();
            let command = command.to_string();
            tokio::spawn(async move {
                tokio::select! {
                    _ = all_settled.cancelled() => {}
                    _ = caller.cancelled() => {
                        let resolved = lock(&states)
                            .iter()
                            .any(|state| matches!(state, RequestState::Resolved));
                        if resolved {
                            tracing::debug!(command = %command, "not cancelling shared command already applied by a server");
                        } else {
                            forward.cancel();
                        }
                    }
                }
            });
            shared
        });

        let (primary_tx, primary_rx) = oneshot::channel::<ExecuteResult>();
        let mut primary_tx = Some(primary_tx);

        for (index, entry) in self.servers.iter().enumerate() {
            let request = entry.server.execute(
                command,
                args.clone(),
                ExecuteOptions {
                    token: token.clone(),
                    ..options.clone()
                },
            );
            let tracker = StateTracker {
                index,
                command: command.to_string(),
                states: Arc::clone(&states),
                remaining: Arc::clone(&remaining),
                all_settled: all_settled.clone(),
                delegate: Arc::clone(&self.delegate),
            };
            let reply = primary_tx.take();
            tokio::spawn(async move {
                let result = request.await;
                tracker.record(&result);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            });
        }

        async move {
            primary_rx.await.unwrap_or_else(|_| {
                Err(ExecuteError::ServerDestroyed {
                    cause: "shared request abandoned".to_string(),
                })
            })
        }
        .boxed()
    }
}

struct StateTracker {
    index: usize,
    command: String,
    states: Arc<Mutex<Vec<RequestState>>>,
    remaining: Arc<AtomicUsize>,
    all_settled: CancellationToken,
    delegate: Arc<dyn TsServerDelegate>,
}

impl StateTracker {
    fn record(&self, result: &ExecuteResult) {
        let desync = {
            let mut states = lock(&self.states);
            match result {
                Ok(_) => {
                    states[self.index] = RequestState::Resolved;
                    states.iter().find_map(|state| match state {
                        RequestState::Errored(err) => Some(err.clone()),
                        _ => None,
                    })
                }
                Err(err) => {
                    states[self.index] = RequestState::Errored(err.clone());
                    states
                        .iter()
                        .any(|state| matches!(state, RequestState::Resolved))
                        .then(|| err.clone())
                }
            }
        };

        if let Some(err) = desync {
            tracing::error!(command = %self.command, %err, "servers out of sync after shared command");
            self.delegate.on_fatal_error(&self.command, &err);
        }
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.all_settled.cancel();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "../tests/router_tests.rs"]
mod router_tests;
