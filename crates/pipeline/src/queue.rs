//! Bounded admission queue
//!
//! A thin wrapper over `tokio::sync::mpsc` giving the admission path a
//! non-blocking `try_enqueue` that hands the record back on overflow so
//! the controller can fall through to the spool. Capacity exhaustion is
//! a first-class result here, never an error.

use otbridge_protocol::Record;
use tokio::sync::mpsc;

/// Create a queue of the given capacity
///
/// Returns the producer side (cloneable, shared by the controller) and
/// the single consumer side owned by the egress worker.
pub fn bounded(capacity: usize) -> (BoundedQueue, QueueConsumer) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        BoundedQueue {
            sender,
            capacity: capacity.max(1),
        },
        QueueConsumer { receiver },
    )
}

/// Producer side of the admission queue
#[derive(Clone)]
pub struct BoundedQueue {
    sender: mpsc::Sender<Record>,
    capacity: usize,
}

impl BoundedQueue {
    /// Enqueue without blocking
    ///
    /// On a full (or closed) queue the record is handed back so the
    /// caller can spool it instead.
    pub fn try_enqueue(&self, record: Record) -> Result<(), Record> {
        self.sender.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(r) => r,
            mpsc::error::TrySendError::Closed(r) => r,
        })
    }

    /// Records currently buffered
    pub fn depth(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for BoundedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("depth", &self.depth())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Consumer side of the admission queue
pub struct QueueConsumer {
    receiver: mpsc::Receiver<Record>,
}

impl QueueConsumer {
    /// Wait for the next record
    ///
    /// Returns `None` once every producer handle is dropped and the
    /// buffer is drained.
    pub async fn recv(&mut self) -> Option<Record> {
        self.receiver.recv().await
    }

    /// Take a record if one is already buffered
    pub fn try_recv(&mut self) -> Option<Record> {
        self.receiver.try_recv().ok()
    }
}
