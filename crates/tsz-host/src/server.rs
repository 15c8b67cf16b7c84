//! The server client contract and its single-process implementation.
//!
//! [`TsServer`] is what callers program against; composites in
//! [`crate::composite`] implement it by routing to several underlying
//! servers. [`ProcessBasedTsServer`] owns one server process and implements
//! the request lifecycle:
//!
//! 1. `execute`/`notify` build a request with the next seq and queue it.
//! 2. The queue drains while no synchronous response is outstanding, so the
//!    server never sees a second non-async request before answering the first.
//! 3. Responses and `requestCompleted` events complete the matching callback
//!    and drain the queue again; other events are republished.
//! 4. Process exit or error destroys every outstanding callback.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::BoxFuture;
use rustc_hash::FxHashSet;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tsz_host_wire::{Event, Message, REQUEST_COMPLETED_EVENT, Response, WireError};

use crate::callback_map::{Callback, CallbackMap};
use crate::cancellation::{NoopRequestCanceller, OngoingRequestCanceller};
use crate::error::{ExecuteError, TypeScriptServerError};
use crate::events::Emitter;
use crate::process::{ExitStatus, ProcessError, ProcessEvent, TsServerProcess};
use crate::request_queue::{QueueingType, RequestItem, RequestQueue};
use crate::telemetry::{TelemetryReporter, TracingTelemetryReporter};

/// Commands that mutate document state and must never be reordered.
pub const FENCE_COMMANDS: &[&str] = &["change", "close", "open", "updateOpen"];

/// Successful outcomes of [`TsServer::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum ServerResponse {
    Response(Response),
    /// The server answered `"No content available."`.
    NoContent,
    /// An async request finished (`requestCompleted`).
    Completed,
    Cancelled { reason: String },
}

impl ServerResponse {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

pub type ExecuteResult = Result<ServerResponse, ExecuteError>;
pub type ResponseFuture = BoxFuture<'static, ExecuteResult>;

/// Forces a request to a specific server of a syntax/semantic pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionTarget {
    Semantic,
    Syntax,
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Completion is signalled by a `requestCompleted` event, not a response.
    pub is_async: bool,
    pub token: Option<CancellationToken>,
    pub low_priority: bool,
    pub execution_target: Option<ExecutionTarget>,
}

impl ExecuteOptions {
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    pub fn low_priority(mut self) -> Self {
        self.low_priority = true;
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyOptions {
    pub low_priority: bool,
    pub execution_target: Option<ExecutionTarget>,
}

/// Public event streams of a server.
#[derive(Default)]
pub struct ServerSignals {
    pub on_event: Emitter<Event>,
    pub on_exit: Emitter<ExitStatus>,
    pub on_error: Emitter<ProcessError>,
    pub on_reader_error: Emitter<WireError>,
}

/// A logical tsserver, backed by one process or a routed group of them.
pub trait TsServer: Send + Sync {
    fn id(&self) -> &str;

    fn signals(&self) -> &ServerSignals;

    fn ts_server_log_file(&self) -> Option<&Path>;

    /// Send a request and wait for its result.
    ///
    /// Must be called from within a tokio runtime. The request is queued
    /// before this returns; the future only waits for the outcome.
    fn execute(&self, command: &str, args: Value, options: ExecuteOptions) -> ResponseFuture;

    /// Send a request without waiting for (or tracking) a response.
    fn notify(&self, command: &str, args: Value, options: NotifyOptions);

    fn kill(&self);

    fn dispose(&self);
}

pub fn queueing_type(command: &str, low_priority: bool) -> QueueingType {
    if FENCE_COMMANDS.contains(&command) {
        QueueingType::Fence
    } else if low_priority {
        QueueingType::LowPriority
    } else {
        QueueingType::Normal
    }
}

struct State {
    process: Box<dyn TsServerProcess>,
    queue: RequestQueue,
    callbacks: CallbackMap,
    /// Non-async requests written to the server and not yet answered.
    pending_responses: FxHashSet<u64>,
    /// Set once the server stops taking work; holds the cause.
    closed: Option<&'static str>,
}

impl State {
    /// Settle everything outstanding with `cause` and refuse later requests.
    fn close(&mut self, cause: &'static str) {
        self.closed = Some(cause);
        self.callbacks.destroy(cause);
        self.pending_responses.clear();
        while self.queue.dequeue().is_some() {}
    }
}

struct Shared {
    id: String,
    version: String,
    state: Mutex<State>,
    signals: ServerSignals,
    canceller: Box<dyn OngoingRequestCanceller>,
    telemetry: Arc<dyn TelemetryReporter>,
}

pub struct ProcessBasedTsServer {
    shared: Arc<Shared>,
    log_file: Option<PathBuf>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

pub struct ProcessBasedTsServerBuilder {
    id: String,
    process: Box<dyn TsServerProcess>,
    events: mpsc::UnboundedReceiver<ProcessEvent>,
    log_file: Option<PathBuf>,
    canceller: Box<dyn OngoingRequestCanceller>,
    version: String,
    telemetry: Arc<dyn TelemetryReporter>,
}

impl ProcessBasedTsServerBuilder {
    pub fn log_file(mut self, log_file: Option<PathBuf>) -> Self {
        self.log_file = log_file;
        self
    }

    pub fn canceller(mut self, canceller: Box<dyn OngoingRequestCanceller>) -> Self {
        self.canceller = canceller;
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetryReporter>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Start dispatching process events. Must be called within a tokio runtime.
    pub fn start(self) -> ProcessBasedTsServer {
        let shared = Arc::new(Shared {
            id: self.id,
            version: self.version,
            state: Mutex::new(State {
                process: self.process,
                queue: RequestQueue::new(),
                callbacks: CallbackMap::new(),
                pending_responses: FxHashSet::default(),
                closed: None,
            }),
            signals: ServerSignals::default(),
            canceller: self.canceller,
            telemetry: self.telemetry,
        });
        let driver = tokio::spawn(drive(Arc::clone(&shared), self.events));
        ProcessBasedTsServer {
            shared,
            log_file: self.log_file,
            driver: Mutex::new(Some(driver)),
        }
    }
}

impl ProcessBasedTsServer {
    pub fn builder(
        id: impl Into<String>,
        process: Box<dyn TsServerProcess>,
        events: mpsc::UnboundedReceiver<ProcessEvent>,
    ) -> ProcessBasedTsServerBuilder {
        ProcessBasedTsServerBuilder {
            id: id.into(),
            process,
            events,
            log_file: None,
            canceller: Box::new(NoopRequestCanceller),
            version: "unknown".to_string(),
            telemetry: Arc::new(TracingTelemetryReporter),
        }
    }

    pub fn version(&self) -> &str {
        &self.shared.version
    }

    /// Cancel request `seq`; its future resolves with `Cancelled` unless it
    /// already completed. Returns whether the request was removed from the
    /// queue or a cancellation signal was sent.
    ///
    /// Cancelling a request already written also frees its one-in-flight
    /// slot, so the next queued sync request is written at once, even while
    /// the server may still be working on the cancelled one.
    pub fn try_cancel_request(&self, seq: u64, command: &str) -> bool {
        self.shared.try_cancel_request(seq, command)
    }

    pub fn queued_request_count(&self) -> usize {
        self.shared.lock_state().queue.len()
    }

    pub fn pending_callback_count(&self) -> usize {
        let state = self.shared.lock_state();
        state.callbacks.pending_sync_count() + state.callbacks.pending_async_count()
    }
}

impl TsServer for ProcessBasedTsServer {
    fn id(&self) -> &str {
        &self.shared.id
    }

    fn signals(&self) -> &ServerSignals {
        &self.shared.signals
    }

    fn ts_server_log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    fn execute(&self, command: &str, args: Value, options: ExecuteOptions) -> ResponseFuture {
        let (sender, receiver) = oneshot::channel();
        let settled = options.token.as_ref().map(|_| CancellationToken::new());

        let seq = {
            let mut state = self.shared.lock_state();
            if let Some(cause) = state.closed {
                return futures::future::ready(Err(ExecuteError::ServerDestroyed {
                    cause: cause.to_string(),
                }))
                .boxed();
            }

            let request = state.queue.create_request(command, args);
            let seq = request.seq;
            let mut callback = Callback::new(sender, options.is_async);
            if let Some(settled) = &settled {
                callback = callback.with_settled_signal(settled.clone());
            }
            state.callbacks.add(seq, callback, options.is_async);
            state.queue.enqueue(RequestItem::new(
                request,
                true,
                options.is_async,
                queueing_type(command, options.low_priority),
            ));

            // Already cancelled: pull it back out before anything is written.
            if options.token.as_ref().is_some_and(CancellationToken::is_cancelled) {
                self.shared.cancel_locked(&mut state, seq, command);
            }
            self.shared.send_next_requests(&mut state);
            seq
        };

        if let (Some(token), Some(settled)) = (options.token.clone(), settled) {
            if !token.is_cancelled() {
                let shared = Arc::downgrade(&self.shared);
                let command = command.to_string();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = settled.cancelled() => {}
                        _ = token.cancelled() => {
                            if let Some(shared) = shared.upgrade() {
                                shared.try_cancel_request(seq, &command);
                            }
                        }
                    }
                });
            }
        }

        let telemetry = Arc::clone(&self.shared.telemetry);
        let token = options.token;
        async move {
            let result = receiver.await.unwrap_or_else(|_| {
                Err(ExecuteError::ServerDestroyed {
                    cause: "server dropped".to_string(),
                })
            });
            if let Err(ExecuteError::Server(err)) = &result {
                let cancelled = token.as_ref().is_some_and(CancellationToken::is_cancelled);
                if !cancelled {
                    telemetry.log_telemetry("languageServiceErrorResponse", err.telemetry());
                }
            }
            result
        }
        .boxed()
    }

    fn notify(&self, command: &str, args: Value, options: NotifyOptions) {
        let mut state = self.shared.lock_state();
        if let Some(cause) = state.closed {
            tracing::debug!(server = %self.shared.id, command, cause, "dropping notification to closed server");
            return;
        }
        let request = state.queue.create_request(command, args);
        state.queue.enqueue(RequestItem::new(
            request,
            false,
            false,
            queueing_type(command, options.low_priority),
        ));
        self.shared.send_next_requests(&mut state);
    }

    fn kill(&self) {
        self.shared.lock_state().process.kill();
    }

    fn dispose(&self) {
        self.shared.lock_state().close("server disposed");
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(driver) = driver {
            driver.abort();
        }
    }
}

impl Drop for ProcessBasedTsServer {
    fn drop(&mut self) {
        let driver = self
            .driver
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(driver) = driver {
            driver.abort();
        }
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send_next_requests(&self, state: &mut State) {
        while state.pending_responses.is_empty() {
            let Some(item) = state.queue.dequeue() else {
                break;
            };
            self.send_request(state, item);
        }
    }

    fn send_request(&self, state: &mut State, item: RequestItem) {
        let seq = item.seq();
        tracing::debug!(
            server = %self.id,
            seq,
            command = %item.request.command,
            expects_response = item.expects_response,
            is_async = item.is_async,
            queue_length = state.queue.len(),
            "sending request"
        );
        tracing::trace!(server = %self.id, seq, arguments = %item.request.arguments);

        if item.expects_response && !item.is_async {
            state.pending_responses.insert(seq);
        }
        if let Err(err) = state.process.write(&item.request) {
            tracing::warn!(server = %self.id, seq, %err, "failed to write request");
            if let Some(callback) = fetch_callback(state, seq) {
                callback.complete(Err(ExecuteError::Write {
                    seq,
                    command: item.request.command,
                    message: err.to_string(),
                }));
            }
        }
    }

    fn try_cancel_request(&self, seq: u64, command: &str) -> bool {
        let mut state = self.lock_state();
        let cancelled = self.cancel_locked(&mut state, seq, command);
        self.send_next_requests(&mut state);
        cancelled
    }

    fn cancel_locked(&self, state: &mut State, seq: u64, command: &str) -> bool {
        let cancelled = if state.queue.try_delete_pending_request(seq) {
            tracing::trace!(server = %self.id, seq, command, "cancelled queued request");
            true
        } else if self.canceller.try_cancel_ongoing_request(seq) {
            true
        } else {
            tracing::trace!(
                server = %self.id,
                seq,
                command,
                "request already delivered; cannot cancel"
            );
            false
        };

        if let Some(callback) = fetch_callback(state, seq) {
            callback.complete(Ok(ServerResponse::Cancelled {
                reason: format!("Cancelled request {seq} - {command}"),
            }));
        }
        cancelled
    }

    fn dispatch_message(&self, message: Message) {
        let mut republish = None;
        {
            let mut state = self.lock_state();
            match message {
                Message::Response(response) => self.dispatch_response(&mut state, response),
                Message::Event(event) if event.event == REQUEST_COMPLETED_EVENT => {
                    match event.completed_request_seq() {
                        Some(seq) => {
                            if let Some(callback) = fetch_callback(&mut state, seq) {
                                tracing::debug!(
                                    server = %self.id,
                                    seq,
                                    elapsed_ms = callback.elapsed().as_millis() as u64,
                                    "async request completed"
                                );
                                callback.complete(Ok(ServerResponse::Completed));
                            }
                        }
                        None => {
                            tracing::warn!(server = %self.id, "requestCompleted event without request_seq");
                        }
                    }
                }
                Message::Event(event) => {
                    tracing::trace!(server = %self.id, event = %event.event, "event");
                    republish = Some(event);
                }
            }
            self.send_next_requests(&mut state);
        }

        if let Some(event) = republish {
            self.signals.on_event.emit(&event);
        }
    }

    fn dispatch_response(&self, state: &mut State, response: Response) {
        let seq = response.request_seq;
        let Some(callback) = fetch_callback(state, seq) else {
            tracing::trace!(server = %self.id, seq, "response for unknown or settled request");
            return;
        };

        tracing::debug!(
            server = %self.id,
            seq,
            command = %response.command,
            success = response.success,
            elapsed_ms = callback.elapsed().as_millis() as u64,
            "response"
        );

        let result = if response.success {
            Ok(ServerResponse::Response(response))
        } else if response.is_no_content() {
            Ok(ServerResponse::NoContent)
        } else {
            Err(ExecuteError::Server(TypeScriptServerError::new(
                self.id.clone(),
                self.version.clone(),
                response,
            )))
        };
        callback.complete(result);
    }

    fn handle_exit(&self, status: ExitStatus) {
        tracing::warn!(server = %self.id, code = ?status.code, signal = ?status.signal, "server exited");
        self.signals.on_exit.emit(&status);
        self.close("server exited");
    }

    fn handle_error(&self, error: ProcessError) {
        tracing::error!(server = %self.id, %error, "server errored");
        self.signals.on_error.emit(&error);
        self.close("server errored");
    }

    fn close(&self, cause: &'static str) {
        self.lock_state().close(cause);
    }
}

fn fetch_callback(state: &mut State, seq: u64) -> Option<Callback> {
    let callback = state.callbacks.fetch(seq)?;
    state.pending_responses.remove(&seq);
    Some(callback)
}

async fn drive(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<ProcessEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ProcessEvent::Message(message) => shared.dispatch_message(message),
            ProcessEvent::ReaderError(err) => {
                tracing::warn!(server = %shared.id, %err, "protocol reader error");
                shared.signals.on_reader_error.emit(&err);
            }
            ProcessEvent::Exit(status) => shared.handle_exit(status),
            ProcessEvent::Error(error) => shared.handle_error(error),
        }
    }
    tracing::debug!(server = %shared.id, "process event stream closed");
}

#[cfg(test)]
#[path = "../tests/server_tests.rs"]
mod server_tests;
