//! Encoding side of the wire protocol.

use serde::Serialize;

/// Frame a message as `Content-Length: N\r\n\r\n<json>`.
///
/// This is the shape the server writes to us; in-process transports and test
/// doubles use it to feed a [`crate::WireReader`].
pub fn encode_message<T: Serialize>(message: &T) -> serde_json::Result<Vec<u8>> {
    let body = serde_json::to_vec(message)?;
    let mut framed = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    framed.extend_from_slice(&body);
    Ok(framed)
}

/// Encode a request the way tsserver reads its stdin: one JSON object per line.
pub fn encode_line<T: Serialize>(message: &T) -> serde_json::Result<Vec<u8>> {
    let mut line = serde_json::to_vec(message)?;
    line.extend_from_slice(b"\r\n");
    Ok(line)
}
