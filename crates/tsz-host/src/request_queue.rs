//! Outgoing request queue for a single server.
//!
//! Three queueing classes:
//! - `Fence` requests mutate document state and are never reordered.
//! - `Normal` requests are FIFO among themselves and relative to fences, but
//!   may move ahead of a trailing run of low-priority requests.
//! - `LowPriority` requests go to the tail and can be jumped by later normal
//!   requests, at most [`MAX_LOW_PRIORITY_DEFERRALS`] times each.

use std::collections::VecDeque;

use serde_json::Value;
use tsz_host_wire::Request;

/// How many later normal requests may be placed ahead of one low-priority
/// request. Once reached, the request keeps its position.
pub const MAX_LOW_PRIORITY_DEFERRALS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueingType {
    Normal,
    LowPriority,
    Fence,
}

#[derive(Debug, Clone)]
pub struct RequestItem {
    pub request: Request,
    pub expects_response: bool,
    pub is_async: bool,
    pub queueing_type: QueueingType,
    deferrals: u32,
}

impl RequestItem {
    pub fn new(
        request: Request,
        expects_response: bool,
        is_async: bool,
        queueing_type: QueueingType,
    ) -> Self {
        Self {
            request,
            expects_response,
            is_async,
            queueing_type,
            deferrals: 0,
        }
    }

    pub fn seq(&self) -> u64 {
        self.request.seq
    }

    fn can_be_deferred(&self) -> bool {
        self.queueing_type == QueueingType::LowPriority
            && self.deferrals < MAX_LOW_PRIORITY_DEFERRALS
    }
}

#[derive(Debug, Default)]
pub struct RequestQueue {
    queue: VecDeque<RequestItem>,
    sequence_number: u64,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Build a request with the next sequence number.
    pub fn create_request(&mut self, command: &str, arguments: Value) -> Request {
        let seq = self.sequence_number;
        self.sequence_number += 1;
        Request::new(seq, command, arguments)
    }

    pub fn enqueue(&mut self, item: RequestItem) {
        if item.queueing_type != QueueingType::Normal {
            self.queue.push_back(item);
            return;
        }

        let mut index = self.queue.len();
        while index > 0 && self.queue[index - 1].can_be_deferred() {
            index -= 1;
        }
        for deferred in self.queue.range_mut(index..) {
            deferred.deferrals += 1;
        }
        self.queue.insert(index, item);
    }

    pub fn dequeue(&mut self) -> Option<RequestItem> {
        self.queue.pop_front()
    }

    /// Remove a request that has not been sent yet.
    pub fn try_delete_pending_request(&mut self, seq: u64) -> bool {
        match self.queue.iter().position(|item| item.seq() == seq) {
            Some(index) => {
                self.queue.remove(index);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
#[path = "../tests/request_queue_tests.rs"]
mod request_queue_tests;
