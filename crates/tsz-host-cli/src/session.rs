//! Line-oriented driver: one JSON request per input line, one JSON record per
//! output line.
//!
//! Input: `{"command": "...", "arguments": {...}, "async": bool,
//! "lowPriority": bool, "noResponse": bool}`. Output records carry a `type`
//! of `result`, `event`, `exit` or `error`; results echo the input line
//! number as `id`.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tsz_host::{
    ExecuteOptions, ExecuteResult, ExitStatus, NotifyOptions, ServerResponse, Subscription,
    TsServer,
};
use tsz_host_wire::Event;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliRequest {
    pub command: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default, rename = "async")]
    pub is_async: bool,
    #[serde(default)]
    pub low_priority: bool,
    #[serde(default)]
    pub no_response: bool,
}

pub fn result_record(id: usize, command: &str, result: &ExecuteResult) -> Value {
    match result {
        Ok(ServerResponse::Response(response)) => json!({
            "type": "result",
            "id": id,
            "command": command,
            "status": "response",
            "body": response.body,
        }),
        Ok(ServerResponse::NoContent) => {
            json!({ "type": "result", "id": id, "command": command, "status": "noContent" })
        }
        Ok(ServerResponse::Completed) => {
            json!({ "type": "result", "id": id, "command": command, "status": "completed" })
        }
        Ok(ServerResponse::Cancelled { reason }) => json!({
            "type": "result",
            "id": id,
            "command": command,
            "status": "cancelled",
            "message": reason,
        }),
        Err(err) => json!({
            "type": "result",
            "id": id,
            "command": command,
            "status": "error",
            "message": err.to_string(),
        }),
    }
}

pub fn event_record(event: &Event) -> Value {
    json!({ "type": "event", "event": event.event, "body": event.body })
}

pub fn exit_record(status: &ExitStatus) -> Value {
    json!({ "type": "exit", "code": status.code, "signal": status.signal })
}

/// Forward the server's events and exit to `output`; exit also cancels
/// `shutdown`.
pub fn watch_server(
    server: &dyn TsServer,
    output: &mpsc::UnboundedSender<Value>,
    shutdown: &CancellationToken,
) -> Vec<Subscription> {
    let events = output.clone();
    let exits = output.clone();
    let shutdown = shutdown.clone();
    let errors = output.clone();
    vec![
        server.signals().on_event.subscribe(move |event| {
            let _ = events.send(event_record(event));
        }),
        server.signals().on_exit.subscribe(move |status| {
            let _ = exits.send(exit_record(status));
            shutdown.cancel();
        }),
        server.signals().on_error.subscribe(move |error| {
            let _ = errors.send(json!({ "type": "error", "message": error.to_string() }));
        }),
    ]
}

/// Run requests from `input` until it closes or `shutdown` fires, then wait
/// for outstanding results.
pub async fn run<R>(
    server: Arc<dyn TsServer>,
    input: R,
    output: mpsc::UnboundedSender<Value>,
    shutdown: CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut in_flight = JoinSet::new();
    let mut id = 0usize;

    loop {
        let line = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line.context("reading request line")?,
        };
        let Some(line) = line else {
            break;
        };
        id += 1;
        if line.trim().is_empty() {
            continue;
        }

        let request: CliRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(line = id, %err, "ignoring malformed request line");
                let _ = output.send(json!({ "type": "error", "id": id, "message": err.to_string() }));
                continue;
            }
        };

        if request.no_response {
            let options = NotifyOptions {
                low_priority: request.low_priority,
                ..NotifyOptions::default()
            };
            server.notify(&request.command, request.arguments, options);
            continue;
        }

        let options = ExecuteOptions {
            is_async: request.is_async,
            low_priority: request.low_priority,
            token: Some(shutdown.child_token()),
            ..ExecuteOptions::default()
        };
        let future = server.execute(&request.command, request.arguments, options);
        let output = output.clone();
        in_flight.spawn(async move {
            let result = future.await;
            let _ = output.send(result_record(id, &request.command, &result));
        });
    }

    tracing::debug!(outstanding = in_flight.len(), "input finished; waiting for results");
    while let Some(joined) = in_flight.join_next().await {
        joined.context("request task failed")?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "../tests/session_tests.rs"]
mod session_tests;
