//! In-process task queue.
//!
//! Workers block on [`TaskQueue::pop`] until a task is available or the
//! queue has been closed and every submitted task reached a terminal state.
//! A task counts as outstanding from submission until [`TaskQueue::finish`];
//! tasks that are backing off before a retry are outstanding but not queued.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::Notify;

use super::task::Task;

/// Errors returned by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No more tasks are accepted.
    #[error("Queue is closed")]
    Closed,

    /// The queue was drained on cancellation; the task is handed back.
    #[error("Queue was drained, task {} not accepted", .0.id)]
    Drained(Box<Task>),
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Task>,
    outstanding: usize,
    closed: bool,
    drained: bool,
}

/// FIFO backlog of acquisition tasks.
#[derive(Debug, Default)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submits a new task.
    pub fn push(&self, task: Task) -> Result<(), QueueError> {
        let mut state = self.lock();
        if state.drained {
            return Err(QueueError::Drained(Box::new(task)));
        }
        if state.closed {
            return Err(QueueError::Closed);
        }
        state.outstanding += 1;
        state.pending.push_back(task);
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    /// Puts a task that is already outstanding back in line for a retry.
    /// Accepted after `close`, refused after `drain`.
    pub fn requeue(&self, task: Task) -> Result<(), QueueError> {
        let mut state = self.lock();
        if state.drained {
            return Err(QueueError::Drained(Box::new(task)));
        }
        state.pending.push_back(task);
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    /// Waits for the next task. Returns `None` once the queue is closed and
    /// nothing is outstanding.
    pub async fn pop(&self) -> Option<Task> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(task) = state.pending.pop_front() {
                    return Some(task);
                }
                if (state.closed || state.drained) && state.outstanding == 0 {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Marks one outstanding task as terminal.
    pub fn finish(&self) {
        let mut state = self.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        let idle = state.outstanding == 0 && (state.closed || state.drained);
        drop(state);
        if idle {
            self.notify.notify_waiters();
        }
    }

    /// Stops accepting new tasks. Queued and backing-off tasks still run.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Removes every queued task and refuses further submissions.
    ///
    /// The returned tasks are no longer outstanding.
    pub fn drain(&self) -> Vec<Task> {
        let mut state = self.lock();
        state.drained = true;
        let drained: Vec<Task> = state.pending.drain(..).collect();
        state.outstanding = state.outstanding.saturating_sub(drained.len());
        drop(state);
        self.notify.notify_waiters();
        drained
    }

    /// Tasks waiting to be claimed.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tasks submitted and not yet terminal.
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
