//! Bounded hand-off queue.
//!
//! This is a thin wrapper around `crossbeam_channel::bounded` that gives the
//! call queue and the return channels the two push disciplines the protocol
//! needs: a blocking `push` and a non-blocking `try_push`.
//!
//! Dropping the last [`QueueReceiver`] closes the queue: later pushes fail with
//! [`PushError::Closed`], blocked pushers wake up with the same error, and
//! whatever is still buffered gets dropped.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::time::Duration;

/// Error returned when a push fails. Carries the rejected value back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushError<T> {
    /// The queue is at capacity.
    Full(T),
    /// The receiving side is gone.
    Closed(T),
}

impl<T> PushError<T> {
    pub(crate) fn into_inner(self) -> T {
        match self {
            PushError::Full(v) | PushError::Closed(v) => v,
        }
    }
}

/// Sending half of a bounded queue. Cheap to clone.
pub(crate) struct QueueSender<T> {
    inner: Sender<T>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    /// Pushes a value, blocking while the queue is full.
    ///
    /// Only fails with `Closed`.
    pub(crate) fn push(&self, value: T) -> Result<(), PushError<T>> {
        self.inner.send(value).map_err(|e| PushError::Closed(e.0))
    }

    /// Pushes a value without blocking.
    pub(crate) fn try_push(&self, value: T) -> Result<(), PushError<T>> {
        self.inner.try_send(value).map_err(|e| match e {
            TrySendError::Full(v) => PushError::Full(v),
            TrySendError::Disconnected(v) => PushError::Closed(v),
        })
    }
}

/// Receiving half of a bounded queue.
pub(crate) struct QueueReceiver<T> {
    inner: Receiver<T>,
}

impl<T> QueueReceiver<T> {
    /// Receives a value, blocking until one is available.
    ///
    /// Returns `None` once every sender is gone and the queue is empty.
    pub(crate) fn recv(&self) -> Option<T> {
        self.inner.recv().ok()
    }

    /// Receives a value if one is ready.
    pub(crate) fn try_recv(&self) -> Option<T> {
        match self.inner.try_recv() {
            Ok(v) => Some(v),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub(crate) fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        match self.inner.recv_timeout(timeout) {
            Ok(v) => Some(v),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.inner.capacity().unwrap_or(usize::MAX)
    }

    /// The underlying receiver, for use with `crossbeam_channel::select!`.
    pub(crate) fn as_receiver(&self) -> &Receiver<T> {
        &self.inner
    }
}

/// Creates a bounded queue.
///
/// A capacity of 0 makes every push a rendezvous with the receiver.
pub(crate) fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (QueueSender { inner: tx }, QueueReceiver { inner: rx })
}
