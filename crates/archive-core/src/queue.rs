//! Joinable FIFO task queue
//!
//! A single-consumer channel whose producers can wait until every item they
//! put has been acknowledged by the consumer with [`JoinableReceiver::task_done`].
//! Items travel over an unbounded Tokio channel; the outstanding count lives
//! behind a mutex and condvar shared by both halves.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc;
use tracing::trace;

use crate::{Error, Result};

#[derive(Debug)]
struct QueueState {
    /// Items put but not yet acknowledged
    unfinished: usize,

    /// No further `put` is accepted once set
    closed: bool,

    /// Cleared when the receiver is dropped
    consumer_alive: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    changed: Condvar,
}

/// Outcome of waiting for the queue to drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Every item put so far has been acknowledged
    Drained,

    /// The consumer went away with items still unacknowledged
    ConsumerGone { outstanding: usize },

    /// The wait deadline passed first
    TimedOut { outstanding: usize },
}

/// Create a joinable queue, returning the producer and consumer halves
pub fn joinable_queue<T>() -> (JoinableSender<T>, JoinableReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        state: Mutex::new(QueueState {
            unfinished: 0,
            closed: false,
            consumer_alive: true,
        }),
        changed: Condvar::new(),
    });

    (
        JoinableSender {
            tx,
            shared: Arc::clone(&shared),
        },
        JoinableReceiver { rx, shared },
    )
}

/// Producer half; cheap to clone
#[derive(Debug)]
pub struct JoinableSender<T> {
    tx: mpsc::UnboundedSender<T>,
    shared: Arc<Shared>,
}

impl<T> Clone for JoinableSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> JoinableSender<T> {
    /// Append an item to the tail of the queue. Never blocks.
    pub fn put(&self, item: T) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(Error::QueueClosed);
        }
        self.push(&mut state, item)
    }

    /// Append a last item and close the queue to further puts, atomically.
    pub fn put_final(&self, item: T) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(Error::QueueClosed);
        }
        self.push(&mut state, item)?;
        state.closed = true;
        Ok(())
    }

    // The count is bumped under the lock so a concurrent task_done can never
    // observe the item before it is counted.
    fn push(&self, state: &mut QueueState, item: T) -> Result<()> {
        self.tx.send(item).map_err(|_| Error::QueueClosed)?;
        state.unfinished += 1;
        trace!(unfinished = state.unfinished, "Item queued");
        Ok(())
    }

    /// Block until every item put so far has been acknowledged
    pub fn join(&self) -> JoinOutcome {
        self.join_timeout(None)
    }

    /// Like [`join`](Self::join), giving up after `timeout` if one is set
    pub fn join_timeout(&self, timeout: Option<Duration>) -> JoinOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.state.lock();

        loop {
            if state.unfinished == 0 {
                return JoinOutcome::Drained;
            }
            if !state.consumer_alive {
                return JoinOutcome::ConsumerGone {
                    outstanding: state.unfinished,
                };
            }

            match deadline {
                None => self.shared.changed.wait(&mut state),
                Some(deadline) => {
                    if self
                        .shared
                        .changed
                        .wait_until(&mut state, deadline)
                        .timed_out()
                        && state.unfinished > 0
                    {
                        return JoinOutcome::TimedOut {
                            outstanding: state.unfinished,
                        };
                    }
                }
            }
        }
    }

    /// Number of items put but not yet acknowledged
    pub fn unfinished(&self) -> usize {
        self.shared.state.lock().unfinished
    }

    /// Whether the queue stopped accepting items
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Whether the consumer half is still around
    pub fn has_consumer(&self) -> bool {
        self.shared.state.lock().consumer_alive
    }
}

/// Consumer half; there is exactly one
#[derive(Debug)]
pub struct JoinableReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
    shared: Arc<Shared>,
}

impl<T> JoinableReceiver<T> {
    /// Remove the head of the queue, blocking until an item is available
    ///
    /// Returns `None` once every sender is gone and the queue is empty.
    /// Must be called from a plain thread, not from inside a Tokio runtime.
    pub fn get(&mut self) -> Option<T> {
        self.rx.blocking_recv()
    }

    /// Acknowledge one item previously returned by [`get`](Self::get)
    pub fn task_done(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.unfinished == 0 {
            return Err(Error::TaskDoneOverflow);
        }
        state.unfinished -= 1;
        if state.unfinished == 0 {
            self.shared.changed.notify_all();
        }
        Ok(())
    }
}

impl<T> Drop for JoinableReceiver<T> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.consumer_alive = false;
        self.shared.changed.notify_all();
    }
}
