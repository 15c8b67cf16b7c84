//! tsserver protocol message shapes.
//!
//! Requests go out as `{ seq, type: "request", command, arguments }`.
//! Everything that comes back is a [`Message`]: either a [`Response`]
//! correlated to a request by `request_seq`, or an unsolicited [`Event`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message of a failed response that the server uses to mean "success, but empty".
pub const NO_CONTENT_MESSAGE: &str = "No content available.";

/// Event the server emits when an async request (e.g. `geterr`) has finished.
pub const REQUEST_COMPLETED_EVENT: &str = "requestCompleted";

/// Outgoing request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub seq: u64,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub arguments: Value,
}

impl Request {
    pub fn new(seq: u64, command: impl Into<String>, arguments: Value) -> Self {
        Self {
            seq,
            msg_type: "request".to_string(),
            command: command.into(),
            arguments,
        }
    }
}

/// Response to a request, correlated by `request_seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub seq: u64,
    pub request_seq: u64,
    #[serde(default)]
    pub command: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Response {
    /// A failed response that actually means "nothing to return".
    pub fn is_no_content(&self) -> bool {
        !self.success && self.message.as_deref() == Some(NO_CONTENT_MESSAGE)
    }
}

/// Unsolicited server push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub seq: u64,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Event {
    pub fn new(event: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            seq: 0,
            event: event.into(),
            body,
        }
    }

    /// For `requestCompleted` events, the seq of the request that finished.
    pub fn completed_request_seq(&self) -> Option<u64> {
        if self.event != REQUEST_COMPLETED_EVENT {
            return None;
        }
        self.body
            .as_ref()
            .and_then(|body| body.get("request_seq"))
            .and_then(Value::as_u64)
    }
}

/// Anything the server writes to us.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Response(Response),
    Event(Event),
}

#[cfg(test)]
#[path = "../tests/protocol_tests.rs"]
mod protocol_tests;
