//! Event Queue
//!
//! Pending [`NoteEvent`]s for the current session. The queue never sorts:
//! callers load events already in ascending time order and the worker pops
//! them FIFO.
//!
//! A seek replaces the whole contents in one critical section, so the worker
//! can never observe half of the old list and half of the new one.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use sk_core::NoteEvent;
use thiserror::Error;

/// Why `get` returned without an event
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Nothing arrived within the timeout
    #[error("event queue is empty")]
    Empty,
    /// The queue was closed (session stopping)
    #[error("event queue is closed")]
    Closed,
}

struct QueueInner {
    events: VecDeque<NoteEvent>,
    closed: bool,
}

/// Thread-safe FIFO of note events
pub struct EventQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                events: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Replace the contents with `events` and reopen the queue
    pub fn load_all(&self, events: Vec<NoteEvent>) {
        {
            let mut inner = self.inner.lock();
            inner.events = events.into();
            inner.closed = false;
        }
        self.available.notify_all();
    }

    /// Pop the next event, waiting up to `timeout` for one to arrive
    pub fn get(&self, timeout: Duration) -> Result<NoteEvent, QueueError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();

        loop {
            if inner.closed {
                return Err(QueueError::Closed);
            }
            if let Some(event) = inner.events.pop_front() {
                return Ok(event);
            }
            // Releases the lock while waiting.
            if self.available.wait_until(&mut inner, deadline).timed_out() {
                return if inner.closed {
                    Err(QueueError::Closed)
                } else {
                    inner.events.pop_front().ok_or(QueueError::Empty)
                };
            }
        }
    }

    /// Pop without waiting
    pub fn try_get(&self) -> Result<NoteEvent, QueueError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(QueueError::Closed);
        }
        inner.events.pop_front().ok_or(QueueError::Empty)
    }

    /// Drop every pending event
    pub fn clear(&self) {
        self.inner.lock().events.clear();
    }

    /// Wake all blocked getters; they return [`QueueError::Closed`]
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().events.is_empty()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
