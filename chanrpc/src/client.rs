//! Client side: synchronous calls, asynchronous calls and callback draining.
//!
//! A [`Client`] belongs to one thread at a time; every method takes
//! `&mut self`. It owns two return channels:
//! - a single-slot channel for synchronous calls, read right after each push
//! - a buffered channel for asynchronous results, read whenever the
//!   application chooses to run callbacks
//!
//! Results of asynchronous calls come back in the order the calls were
//! issued, because one owner loop consumes the server's single call queue.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;

use crossbeam_channel::Receiver;
use tracing::debug;

use crate::envelope::{CallEnvelope, Callback, Output, ReturnEnvelope};
use crate::queue::{self, PushError, QueueReceiver, QueueSender};
use crate::registry::Shape;
use crate::server::ServerHandle;
use crate::{CallError, CallResult};

/// Per-thread calling handle bound to a server.
pub struct Client<K, V: Send + 'static> {
    server: ServerHandle<K, V>,
    sync_tx: QueueSender<ReturnEnvelope<V>>,
    sync_rx: QueueReceiver<ReturnEnvelope<V>>,
    async_tx: QueueSender<ReturnEnvelope<V>>,
    async_rx: QueueReceiver<ReturnEnvelope<V>>,
    pending: usize,
}

impl<K, V> Client<K, V>
where
    K: Eq + Hash + fmt::Debug,
    V: Send + 'static,
{
    pub(crate) fn new(server: ServerHandle<K, V>, async_capacity: usize) -> Self {
        // One slot is enough: a synchronous call waits for its own result
        // before the next one can start.
        let (sync_tx, sync_rx) = queue::bounded(1);
        let (async_tx, async_rx) = queue::bounded(async_capacity);
        Self {
            server,
            sync_tx,
            sync_rx,
            async_tx,
            async_rx,
            pending: 0,
        }
    }

    // ========================================================================
    // Synchronous calls
    // ========================================================================

    /// Calls a shape-0 operation and waits for it to finish.
    pub fn call0<Q>(&mut self, id: &Q, args: Vec<V>) -> CallResult<()>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        match self.call(id, Shape::Zero, args)? {
            Output::Unit => Ok(()),
            other => unreachable!("shape-0 call returned shape {}", other.shape()),
        }
    }

    /// Calls a shape-1 operation and waits for its value.
    pub fn call1<Q>(&mut self, id: &Q, args: Vec<V>) -> CallResult<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        match self.call(id, Shape::One, args)? {
            Output::One(v) => Ok(v),
            other => unreachable!("shape-1 call returned shape {}", other.shape()),
        }
    }

    /// Calls a shape-n operation and waits for its values.
    pub fn calln<Q>(&mut self, id: &Q, args: Vec<V>) -> CallResult<Vec<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        match self.call(id, Shape::Many, args)? {
            Output::Many(v) => Ok(v),
            other => unreachable!("shape-n call returned shape {}", other.shape()),
        }
    }

    /// Resolves, pushes (blocking while the queue is full) and waits for the
    /// result on the sync channel.
    fn call<Q>(&mut self, id: &Q, shape: Shape, args: Vec<V>) -> CallResult<Output<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        let operation = self.server.registry.resolve(id, shape)?;
        let ci = CallEnvelope::new(operation, args, Some(self.sync_tx.clone()), None);

        if let Err(e) = self.server.calls.push(ci) {
            e.into_inner().disarm();
            return Err(CallError::ServerClosed);
        }

        match self.sync_rx.recv() {
            Some(ri) => ri.into_result(),
            None => Err(CallError::ServerClosed),
        }
    }

    // ========================================================================
    // Asynchronous calls
    // ========================================================================

    /// Issues a call without blocking.
    ///
    /// The callback's variant picks the operation shape. If the call cannot
    /// be queued (unknown id, shape mismatch, queue full, server closed) the
    /// callback runs right away with the error. Otherwise it runs later, from
    /// [`cb`](Self::cb), [`drain_ready`](Self::drain_ready) or
    /// [`close`](Self::close).
    pub fn async_call<Q>(&mut self, id: &Q, args: Vec<V>, callback: Callback<V>)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        let operation = match self.server.registry.resolve(id, callback.shape()) {
            Ok(operation) => operation,
            Err(err) => return callback.fail(err),
        };

        let ci = CallEnvelope::new(operation, args, Some(self.async_tx.clone()), Some(callback));
        match self.server.calls.try_push(ci) {
            Ok(()) => self.pending += 1,
            Err(e) => {
                let (ci, err) = match e {
                    PushError::Full(ci) => (ci, CallError::QueueFull),
                    PushError::Closed(ci) => (ci, CallError::ServerClosed),
                };
                debug!(id = ?id, error = %err, "async call rejected");
                if let Some(callback) = ci.disarm() {
                    callback.fail(err);
                }
            }
        }
    }

    /// [`async_call`](Self::async_call) for a shape-0 operation.
    pub fn async_call0<Q, F>(&mut self, id: &Q, args: Vec<V>, f: F)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
        F: FnOnce(CallResult<()>) + Send + 'static,
    {
        self.async_call(id, args, Callback::zero(f));
    }

    /// [`async_call`](Self::async_call) for a shape-1 operation.
    pub fn async_call1<Q, F>(&mut self, id: &Q, args: Vec<V>, f: F)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
        F: FnOnce(CallResult<V>) + Send + 'static,
    {
        self.async_call(id, args, Callback::one(f));
    }

    /// [`async_call`](Self::async_call) for a shape-n operation.
    pub fn async_calln<Q, F>(&mut self, id: &Q, args: Vec<V>, f: F)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
        F: FnOnce(CallResult<Vec<V>>) + Send + 'static,
    {
        self.async_call(id, args, Callback::many(f));
    }
}

impl<K, V: Send + 'static> Client<K, V> {
    /// Runs the callback carried by `ri` and marks the call as done.
    ///
    /// `ri` must come from this client's [`async_results`](Self::async_results).
    ///
    /// # Panics
    /// Panics if `ri` carries no callback.
    pub fn cb(&mut self, ri: ReturnEnvelope<V>) {
        let (result, callback) = ri.into_parts();
        match callback {
            Some(callback) => callback.complete(result),
            None => unreachable!("asynchronous result without a callback"),
        }

        // A result fed in from another client must not underflow the count.
        self.pending = self.pending.saturating_sub(1);
    }

    /// Runs the callbacks of every result already available, without
    /// blocking. Returns how many ran.
    pub fn drain_ready(&mut self) -> usize {
        let mut n = 0;
        while self.pending > 0 {
            let Some(ri) = self.async_rx.try_recv() else {
                break;
            };
            self.cb(ri);
            n += 1;
        }
        n
    }

    /// Channel the asynchronous results arrive on, for
    /// `crossbeam_channel::select!`. Feed what it yields to [`cb`](Self::cb).
    pub fn async_results(&self) -> &Receiver<ReturnEnvelope<V>> {
        self.async_rx.as_receiver()
    }

    /// Number of asynchronous calls queued whose callbacks have not run yet.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn idle(&self) -> bool {
        self.pending == 0
    }

    /// Closes the client, blocking until every pending asynchronous call has
    /// been acknowledged and its callback has run.
    pub fn close(mut self) {
        while self.pending > 0 {
            match self.async_rx.recv() {
                Some(ri) => self.cb(ri),
                // Unreachable while `self` holds a sender; bail out rather than spin.
                None => break,
            }
        }
    }
}

impl<K, V: Send + 'static> fmt::Debug for Client<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("pending", &self.pending)
            .field("async_capacity", &self.async_rx.capacity())
            .finish()
    }
}
