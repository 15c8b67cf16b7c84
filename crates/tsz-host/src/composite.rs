//! Server groups that present several processes as one [`TsServer`].
//!
//! [`SyntaxRoutingTsServer`] sends purely syntactic commands to a fast
//! syntax server and everything else to a semantic server.
//! [`GetErrRoutingTsServer`] moves diagnostics requests to a dedicated server
//! and partitions events so each diagnostic is delivered exactly once.
//!
//! Both are thin layers over [`RequestRouter`]; the main server of each group
//! anchors its lifetime, so its exit kills the other member.

use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tsz_host_wire::Event;

use crate::events::Subscription;
use crate::router::{RequestRouter, RouteEntry, TsServerDelegate};
use crate::server::{
    ExecuteOptions, ExecutionTarget, NotifyOptions, ResponseFuture, ServerSignals, TsServer,
};

/// Commands answered from syntax alone.
pub const SYNTAX_COMMANDS: &[&str] = &[
    "navtree",
    "getOutliningSpans",
    "jsxClosingTag",
    "selectionRange",
    "format",
    "formatonkey",
    "docCommentTemplate",
];

pub const GETERR_COMMANDS: &[&str] = &["geterr", "geterrForProject"];

/// Events that carry diagnostics.
pub const DIAGNOSTIC_EVENTS: &[&str] = &[
    "configFileDiag",
    "syntaxDiag",
    "semanticDiag",
    "suggestionDiag",
];

pub fn is_diagnostic_event(event: &Event) -> bool {
    DIAGNOSTIC_EVENTS.contains(&event.event.as_str())
}

pub struct SyntaxRoutingTsServer {
    id: String,
    router: RequestRouter,
    syntax: Arc<dyn TsServer>,
    semantic: Arc<dyn TsServer>,
    signals: Arc<ServerSignals>,
    _subscriptions: Vec<Subscription>,
}

impl SyntaxRoutingTsServer {
    pub fn new(
        syntax: Arc<dyn TsServer>,
        semantic: Arc<dyn TsServer>,
        delegate: Arc<dyn TsServerDelegate>,
    ) -> Self {
        let signals = Arc::new(ServerSignals::default());
        let mut subscriptions = Vec::new();

        for server in [&syntax, &semantic] {
            subscriptions.push(forward_events(server.as_ref(), &signals, |_| true));
            subscriptions.extend(forward_failures(server.as_ref(), &signals));
        }
        subscriptions.push(cascade_exit(
            semantic.as_ref(),
            Arc::clone(&syntax),
            &signals,
        ));
        let syntax_id = syntax.id().to_string();
        subscriptions.push(syntax.signals().on_exit.subscribe(move |status| {
            tracing::warn!(server = %syntax_id, code = ?status.code, "syntax server exited");
        }));

        // Syntax first: it answers shared commands for the caller.
        let router = RequestRouter::new(
            vec![
                RouteEntry::preferring(Arc::clone(&syntax), SYNTAX_COMMANDS)
                    .with_target(ExecutionTarget::Syntax),
                RouteEntry::catch_all(Arc::clone(&semantic))
                    .with_target(ExecutionTarget::Semantic),
            ],
            delegate,
        );

        Self {
            id: format!("{}+{}", syntax.id(), semantic.id()),
            router,
            syntax,
            semantic,
            signals,
            _subscriptions: subscriptions,
        }
    }
}

impl TsServer for SyntaxRoutingTsServer {
    fn id(&self) -> &str {
        &self.id
    }

    fn signals(&self) -> &ServerSignals {
        &self.signals
    }

    fn ts_server_log_file(&self) -> Option<&Path> {
        self.semantic.ts_server_log_file()
    }

    fn execute(&self, command: &str, args: Value, options: ExecuteOptions) -> ResponseFuture {
        route_execute(&self.router, command, args, options)
    }

    fn notify(&self, command: &str, args: Value, options: NotifyOptions) {
        route_notify(&self.router, command, args, options);
    }

    fn kill(&self) {
        self.syntax.kill();
        self.semantic.kill();
    }

    fn dispose(&self) {
        self.syntax.dispose();
        self.semantic.dispose();
    }
}

pub struct GetErrRoutingTsServer {
    id: String,
    router: RequestRouter,
    get_err: Arc<dyn TsServer>,
    main: Arc<dyn TsServer>,
    signals: Arc<ServerSignals>,
    _subscriptions: Vec<Subscription>,
}

impl GetErrRoutingTsServer {
    pub fn new(
        get_err: Arc<dyn TsServer>,
        main: Arc<dyn TsServer>,
        delegate: Arc<dyn TsServerDelegate>,
    ) -> Self {
        let signals = Arc::new(ServerSignals::default());
        let mut subscriptions = vec![
            forward_events(get_err.as_ref(), &signals, is_diagnostic_event),
            forward_events(main.as_ref(), &signals, |event| !is_diagnostic_event(event)),
            cascade_exit(main.as_ref(), Arc::clone(&get_err), &signals),
        ];
        subscriptions.extend(forward_failures(get_err.as_ref(), &signals));
        subscriptions.extend(forward_failures(main.as_ref(), &signals));
        let get_err_id = get_err.id().to_string();
        subscriptions.push(get_err.signals().on_exit.subscribe(move |status| {
            tracing::warn!(server = %get_err_id, code = ?status.code, "diagnostics server exited");
        }));

        let router = RequestRouter::new(
            vec![
                RouteEntry::preferring(Arc::clone(&get_err), GETERR_COMMANDS),
                RouteEntry::catch_all(Arc::clone(&main)),
            ],
            delegate,
        );

        Self {
            id: format!("{}+{}", get_err.id(), main.id()),
            router,
            get_err,
            main,
            signals,
            _subscriptions: subscriptions,
        }
    }
}

impl TsServer for GetErrRoutingTsServer {
    fn id(&self) -> &str {
        &self.id
    }

    fn signals(&self) -> &ServerSignals {
        &self.signals
    }

    fn ts_server_log_file(&self) -> Option<&Path> {
        self.main.ts_server_log_file()
    }

    fn execute(&self, command: &str, args: Value, options: ExecuteOptions) -> ResponseFuture {
        route_execute(&self.router, command, args, options)
    }

    fn notify(&self, command: &str, args: Value, options: NotifyOptions) {
        route_notify(&self.router, command, args, options);
    }

    fn kill(&self) {
        self.get_err.kill();
        self.main.kill();
    }

    fn dispose(&self) {
        self.get_err.dispose();
        self.main.dispose();
    }
}

fn route_execute(
    router: &RequestRouter,
    command: &str,
    args: Value,
    options: ExecuteOptions,
) -> ResponseFuture {
    match router.execute(command, args, options) {
        Ok(future) => future,
        Err(err) => futures::future::ready(Err(err.into())).boxed(),
    }
}

fn route_notify(router: &RequestRouter, command: &str, args: Value, options: NotifyOptions) {
    // Already logged by the router.
    let _ = router.notify(command, args, options);
}

fn forward_events(
    source: &dyn TsServer,
    target: &Arc<ServerSignals>,
    filter: impl Fn(&Event) -> bool + Send + Sync + 'static,
) -> Subscription {
    let target = Arc::clone(target);
    source.signals().on_event.subscribe(move |event| {
        if filter(event) {
            target.on_event.emit(event);
        }
    })
}

fn forward_failures(source: &dyn TsServer, target: &Arc<ServerSignals>) -> [Subscription; 2] {
    let errors = Arc::clone(target);
    let reader_errors = Arc::clone(target);
    [
        source
            .signals()
            .on_error
            .subscribe(move |error| errors.on_error.emit(error)),
        source
            .signals()
            .on_reader_error
            .subscribe(move |error| reader_errors.on_reader_error.emit(error)),
    ]
}

/// Republish `anchor`'s exit and take `dependent` down with it.
fn cascade_exit(
    anchor: &dyn TsServer,
    dependent: Arc<dyn TsServer>,
    target: &Arc<ServerSignals>,
) -> Subscription {
    let target = Arc::clone(target);
    anchor.signals().on_exit.subscribe(move |status| {
        tracing::debug!(server = %dependent.id(), "killing server after its group anchor exited");
        dependent.kill();
        target.on_exit.emit(status);
    })
}

#[cfg(test)]
#[path = "../tests/composite_tests.rs"]
mod composite_tests;
