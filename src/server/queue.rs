//! Bounded FIFO between the acceptor and the worker pool

use crossbeam::channel::{self, Receiver, Select, SendError, Sender};
use parking_lot::Mutex;
use thiserror::Error;

/// Returned by [`WorkQueue::enqueue`] once the queue is closed. Carries the
/// rejected job back to the caller.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("work queue is closed")]
pub struct Closed<T>(pub T);

/// Bounded multi-consumer FIFO with an explicit closed state.
///
/// - `enqueue` blocks while the queue is full and fails once it is closed.
/// - `dequeue` blocks while the queue is empty and fails once it is closed
///   **and** drained, so accepted work is never lost on shutdown.
/// - `close` wakes every blocked producer and consumer.
#[derive(Debug)]
pub struct WorkQueue<T> {
    sender: Mutex<Option<Sender<T>>>,
    receiver: Receiver<T>,
    // Dropping the sender disconnects `stopped`, which wakes blocked producers.
    stop: Mutex<Option<Sender<()>>>,
    stopped: Receiver<()>,
}

impl<T> WorkQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = channel::bounded(capacity.max(1));
        let (stop, stopped) = channel::bounded(0);

        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
            stop: Mutex::new(Some(stop)),
            stopped,
        }
    }

    /// Appends `job`, blocking while the queue is full.
    pub fn enqueue(&self, job: T) -> Result<(), Closed<T>> {
        let sender = match &*self.sender.lock() {
            Some(sender) => sender.clone(),
            None => return Err(Closed(job)),
        };

        let mut select = Select::new();
        let send = select.send(&sender);
        let stop = select.recv(&self.stopped);

        let op = select.select();
        match op.index() {
            index if index == send => op
                .send(&sender, job)
                .map_err(|SendError(job)| Closed(job)),
            index => {
                debug_assert_eq!(index, stop);
                let _ = op.recv(&self.stopped);
                Err(Closed(job))
            }
        }
    }

    /// Takes the oldest job, blocking while the queue is empty and open.
    pub fn dequeue(&self) -> Result<T, Closed<()>> {
        self.receiver.recv().map_err(|_| Closed(()))
    }

    /// Marks the queue closed. Idempotent.
    pub fn close(&self) {
        self.sender.lock().take();
        self.stop.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Jobs currently waiting.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
