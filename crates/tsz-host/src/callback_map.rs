//! In-flight request bookkeeping.
//!
//! Each request that expects a result owns one [`Callback`], keyed by its
//! sequence number. A callback completes at most once: `fetch` removes it,
//! and completion consumes it.

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::ExecuteError;
use crate::server::ExecuteResult;

pub struct Callback {
    /// Taken by `complete`.
    sender: Option<oneshot::Sender<ExecuteResult>>,
    queuing_start_time: Instant,
    is_async: bool,
    /// Cancelled on completion or drop so cancellation watchers can stop.
    settled: Option<CancellationToken>,
}

impl Callback {
    pub fn new(sender: oneshot::Sender<ExecuteResult>, is_async: bool) -> Self {
        Self {
            sender: Some(sender),
            queuing_start_time: Instant::now(),
            is_async,
            settled: None,
        }
    }

    pub fn with_settled_signal(mut self, settled: CancellationToken) -> Self {
        self.settled = Some(settled);
        self
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// Time since the request was queued.
    pub fn elapsed(&self) -> Duration {
        self.queuing_start_time.elapsed()
    }

    pub fn complete(mut self, result: ExecuteResult) {
        // Watchers stop before the caller can observe the result.
        if let Some(settled) = self.settled.take() {
            settled.cancel();
        }
        // The caller may have dropped its future; nothing to deliver then.
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(result);
        }
    }
}

impl Drop for Callback {
    fn drop(&mut self) {
        if let Some(settled) = self.settled.take() {
            settled.cancel();
        }
    }
}

#[derive(Default)]
pub struct CallbackMap {
    callbacks: FxHashMap<u64, Callback>,
    async_callbacks: FxHashMap<u64, Callback>,
}

impl CallbackMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, seq: u64, callback: Callback, is_async: bool) {
        debug_assert!(
            !self.contains(seq),
            "callback for request {seq} registered twice"
        );
        let previous = if is_async {
            self.async_callbacks.insert(seq, callback)
        } else {
            self.callbacks.insert(seq, callback)
        };
        if previous.is_some() {
            tracing::error!(seq, "replaced an existing callback");
        }
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.callbacks.contains_key(&seq) || self.async_callbacks.contains_key(&seq)
    }

    /// Remove and return the callback for `seq`.
    pub fn fetch(&mut self, seq: u64) -> Option<Callback> {
        self.callbacks
            .remove(&seq)
            .or_else(|| self.async_callbacks.remove(&seq))
    }

    /// Fail every outstanding callback with `cause` and clear the map.
    pub fn destroy(&mut self, cause: &str) {
        for (_, callback) in self
            .callbacks
            .drain()
            .chain(self.async_callbacks.drain())
        {
            callback.complete(Err(ExecuteError::ServerDestroyed {
                cause: cause.to_string(),
            }));
        }
    }

    pub fn pending_sync_count(&self) -> usize {
        self.callbacks.len()
    }

    pub fn pending_async_count(&self) -> usize {
        self.async_callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty() && self.async_callbacks.is_empty()
    }
}

#[cfg(test)]
#[path = "../tests/callback_map_tests.rs"]
mod callback_map_tests;
