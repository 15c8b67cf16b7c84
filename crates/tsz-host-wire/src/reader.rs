//! Incremental reader for Content-Length framed messages.
//!
//! Bytes are pushed in whatever chunks the transport produces; complete
//! messages are pulled out one at a time in arrival order. A frame is an
//! ASCII header block (`Name: value\r\n` lines closed by an empty line)
//! followed by exactly `Content-Length` bytes of UTF-8 JSON.
//!
//! Framing problems come out of [`WireReader::next_message`] as `Err` items
//! instead of being dropped. A bad body is skipped by its announced length.
//! After a bad header block the length of whatever follows is unknown, so the
//! reader discards bytes up to the next line that starts a `Content-Length`
//! header. Whoever owns the reader decides whether an error is fatal.

use memchr::memmem;

use crate::WireError;
use crate::protocol::Message;

/// Upper bound on buffered bytes while waiting for a header terminator.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "Content-Length";

#[derive(Debug, Default)]
pub struct WireReader {
    buffer: Vec<u8>,
    /// Body length announced by a header block we already consumed.
    next_message_length: Option<usize>,
    /// Set after a header error; bytes are dropped until a header line shows up.
    resyncing: bool,
}

impl WireReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of raw transport bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes received but not yet turned into a message.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Pull the next complete message, or `None` when more bytes are needed.
    pub fn next_message(&mut self) -> Option<Result<Message, WireError>> {
        let length = match self.next_message_length {
            Some(length) => length,
            None => match self.try_read_content_length()? {
                Ok(length) => length,
                Err(err) => return Some(Err(err)),
            },
        };

        if self.buffer.len() < length {
            self.next_message_length = Some(length);
            return None;
        }
        self.next_message_length = None;

        let body: Vec<u8> = self.buffer.drain(..length).collect();
        Some(decode_body(&body))
    }

    fn try_read_content_length(&mut self) -> Option<Result<usize, WireError>> {
        if self.resyncing {
            if !self.skip_to_header() {
                return None;
            }
            self.resyncing = false;
        }

        // tsserver terminates each body with a newline that is not counted.
        let leading = self
            .buffer
            .iter()
            .take_while(|b| matches!(b, b' ' | b'\r' | b'\n'))
            .count();
        if leading > 0 {
            self.buffer.drain(..leading);
        }

        let Some(end) = memmem::find(&self.buffer, HEADER_TERMINATOR) else {
            if self.buffer.len() > MAX_HEADER_BYTES {
                tracing::warn!(
                    buffered = self.buffer.len(),
                    "discarding unterminated header block"
                );
                self.buffer.clear();
                self.resyncing = true;
                return Some(Err(WireError::HeaderTooLarge {
                    limit: MAX_HEADER_BYTES,
                }));
            }
            return None;
        };

        let header: Vec<u8> = self.buffer.drain(..end + HEADER_TERMINATOR.len()).collect();
        let length = parse_content_length(&header[..end]);
        if let Err(err) = &length {
            tracing::warn!(%err, "bad header block; skipping to the next Content-Length");
            self.resyncing = true;
        }
        Some(length)
    }

    /// Drop bytes before the first line that starts with `Content-Length`.
    /// Returns false when no full match is buffered yet; a trailing line that
    /// could still grow into one is kept.
    fn skip_to_header(&mut self) -> bool {
        let name = CONTENT_LENGTH.as_bytes();
        let buffer = &self.buffer;
        let found = std::iter::once(0)
            .chain(memchr::memchr_iter(b'\n', buffer).map(|i| i + 1))
            .find_map(|start| {
                let n = (buffer.len() - start).min(name.len());
                buffer[start..start + n]
                    .eq_ignore_ascii_case(&name[..n])
                    .then_some((start, n == name.len()))
            });
        match found {
            Some((start, complete)) => {
                self.buffer.drain(..start);
                complete
            }
            None => {
                self.buffer.clear();
                false
            }
        }
    }
}

fn parse_content_length(header: &[u8]) -> Result<usize, WireError> {
    let header = String::from_utf8_lossy(header);
    for line in header.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            let value = value.trim();
            return value
                .parse::<usize>()
                .map_err(|_| WireError::InvalidContentLength(value.to_string()));
        }
    }
    Err(WireError::MissingContentLength)
}

fn decode_body(body: &[u8]) -> Result<Message, WireError> {
    let text = std::str::from_utf8(body).map_err(|_| WireError::InvalidUtf8)?;
    serde_json::from_str(text).map_err(|err| WireError::Malformed(err.to_string()))
}

#[cfg(test)]
#[path = "../tests/reader_tests.rs"]
mod reader_tests;
