//! Problems waiting for connectivity, and the idle-time flush that drains them.

use std::collections::VecDeque;

use crate::problem::{Problem, ProblemId};

/// FIFO of problems whose report attempt failed while offline.
#[derive(Debug, Default)]
pub struct DeferredQueue {
    items: VecDeque<Problem>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, problem: Problem) {
        self.items.push_back(problem);
    }

    /// Removes and returns every queued problem, oldest first.
    pub fn drain(&mut self) -> Vec<Problem> {
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: ProblemId) -> bool {
        self.items.iter().any(|problem| problem.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushToken(u64);

/// Coalesces connectivity flapping into at most one pending flush.
///
/// Scheduling replaces whatever was pending; the flush fires the next time
/// the event loop has nothing else to do.
#[derive(Debug, Default)]
pub struct FlushScheduler {
    pending: Option<FlushToken>,
    next: u64,
}

impl FlushScheduler {
    pub fn schedule(&mut self) -> FlushToken {
        self.next += 1;
        let token = FlushToken(self.next);
        self.pending = Some(token);
        token
    }

    pub fn cancel(&mut self) -> Option<FlushToken> {
        self.pending.take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Called from idle: returns the pending flush, if any, and clears it.
    pub fn take_due(&mut self) -> Option<FlushToken> {
        self.pending.take()
    }
}
