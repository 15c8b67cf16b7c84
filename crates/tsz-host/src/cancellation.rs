//! Best-effort cancellation of requests the server is already working on.
//!
//! tsserver started with `--cancellationPipeName <name>*` polls for a file
//! named `<name><seq>` while handling request `seq` and abandons the request
//! when it appears. Writing that file is advisory: the server may finish first.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

static PIPE_COUNTER: AtomicU64 = AtomicU64::new(0);

pub trait OngoingRequestCanceller: Send + Sync {
    /// Signal the server to abandon `seq`. Returns whether a signal was sent.
    fn try_cancel_ongoing_request(&self, seq: u64) -> bool;

    /// Pipe name prefix to pass to the server, if this canceller uses one.
    fn cancellation_pipe_name(&self) -> Option<&str> {
        None
    }

    /// Value for the server's `--cancellationPipeName` flag.
    fn server_argument(&self) -> Option<String> {
        self.cancellation_pipe_name().map(|pipe| format!("{pipe}*"))
    }
}

/// Canceller for servers started without cancellation support.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRequestCanceller;

impl OngoingRequestCanceller for NoopRequestCanceller {
    fn try_cancel_ongoing_request(&self, _seq: u64) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct PipeRequestCanceller {
    server_id: String,
    pipe_name: String,
}

impl PipeRequestCanceller {
    /// Canceller with a fresh pipe name under the temp directory.
    pub fn new(server_id: impl Into<String>) -> Self {
        let name = format!(
            "tscancellation-{}-{}.tmp.",
            std::process::id(),
            PIPE_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let pipe_name: PathBuf = std::env::temp_dir().join(name);
        Self::with_pipe_name(server_id, pipe_name.to_string_lossy().into_owned())
    }

    pub fn with_pipe_name(server_id: impl Into<String>, pipe_name: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            pipe_name: pipe_name.into(),
        }
    }

    pub fn signal_path(&self, seq: u64) -> PathBuf {
        PathBuf::from(format!("{}{}", self.pipe_name, seq))
    }
}

impl OngoingRequestCanceller for PipeRequestCanceller {
    fn try_cancel_ongoing_request(&self, seq: u64) -> bool {
        tracing::trace!(
            server = %self.server_id,
            seq,
            "trying to cancel ongoing request"
        );
        if let Err(err) = std::fs::write(self.signal_path(seq), b"") {
            tracing::trace!(server = %self.server_id, seq, %err, "cancellation signal not written");
        }
        true
    }

    fn cancellation_pipe_name(&self) -> Option<&str> {
        Some(&self.pipe_name)
    }
}

#[cfg(test)]
#[path = "../tests/cancellation_tests.rs"]
mod cancellation_tests;
