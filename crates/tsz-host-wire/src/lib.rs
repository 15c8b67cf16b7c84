//! Wire protocol for talking to tsserver-compatible processes.
//!
//! This crate provides:
//! - Protocol message shapes (`Request`, `Response`, `Event`, `Message`)
//! - Content-Length framing (`encode_message`, `encode_line`)
//! - An incremental, transport-independent frame decoder (`WireReader`)

pub mod framing;
pub use framing::{encode_line, encode_message};

pub mod protocol;
pub use protocol::{
    Event, Message, NO_CONTENT_MESSAGE, REQUEST_COMPLETED_EVENT, Request, Response,
};

pub mod reader;
pub use reader::{MAX_HEADER_BYTES, WireReader};

/// Framing or decoding failure reported by [`WireReader`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("header block has no Content-Length")]
    MissingContentLength,
    #[error("invalid Content-Length: {0}")]
    InvalidContentLength(String),
    #[error("no header terminator within {limit} bytes")]
    HeaderTooLarge { limit: usize },
    #[error("message body is not valid UTF-8")]
    InvalidUtf8,
    #[error("malformed message: {0}")]
    Malformed(String),
}
