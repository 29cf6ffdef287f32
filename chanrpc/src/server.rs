//! Server side: registry, call queue and dispatcher.
//!
//! A [`Server`] lives on its owner thread. It is `Send` but not `Sync`, so
//! exactly one thread can receive from its call queue and run
//! [`Server::exec`]. Other threads reach it through a [`ServerHandle`], which
//! shares the registry read-only and holds a sender onto the call queue.

use std::borrow::Borrow;
use std::cell::Cell;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::config::ServerConfig;
use crate::envelope::CallEnvelope;
use crate::fault;
use crate::queue::{self, QueueReceiver, QueueSender};
use crate::registry::{Operation, Registry};
use crate::{CallError, CallResult};

/// Shareable reference to a server.
///
/// Cloning a handle is cheap. Handles can open clients from any thread and
/// submit fire-and-forget work. Once a handle exists the registry is frozen.
pub struct ServerHandle<K, V: Send + 'static> {
    pub(crate) registry: Arc<Registry<K, V>>,
    pub(crate) calls: QueueSender<CallEnvelope<V>>,
}

impl<K, V: Send + 'static> Clone for ServerHandle<K, V> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            calls: self.calls.clone(),
        }
    }
}

impl<K, V> ServerHandle<K, V>
where
    K: Eq + Hash + fmt::Debug,
    V: Send + 'static,
{
    /// Opens a client whose asynchronous results are buffered up to
    /// `async_capacity`.
    pub fn open_client(&self, async_capacity: usize) -> Client<K, V> {
        Client::new(self.clone(), async_capacity)
    }

    /// Schedules `id` on the server without waiting for, or reporting, its
    /// outcome.
    ///
    /// Unknown ids and a closed server are ignored. Blocks while the call
    /// queue is full.
    pub fn go<Q>(&self, id: &Q, args: Vec<V>)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        let Some(operation) = self.registry.get(id) else {
            warn!(id = ?id, "dropped self-submitted call, function not registered");
            return;
        };

        let ci = CallEnvelope::new(operation.clone(), args, None, None);
        if self.calls.push(ci).is_err() {
            warn!(id = ?id, "dropped self-submitted call, server closed");
        }
    }

    pub fn registry(&self) -> &Registry<K, V> {
        &self.registry
    }
}

/// An RPC server: a registry of operations plus a bounded call queue.
///
/// Lifecycle: create, register every operation, hand out handles/clients,
/// drive [`exec`](Self::exec) from the owner loop, then [`close`](Self::close).
pub struct Server<K, V: Send + 'static> {
    handle: ServerHandle<K, V>,
    calls: QueueReceiver<CallEnvelope<V>>,
    config: ServerConfig,
    closed: bool,
    // Receiving and dispatching is single-consumer.
    _not_sync: PhantomData<Cell<()>>,
}

impl<K, V> Server<K, V>
where
    K: Eq + Hash + fmt::Debug,
    V: Send + 'static,
{
    /// Creates a server whose call queue holds up to `capacity` calls.
    pub fn new(capacity: usize) -> Self {
        Self::with_config(ServerConfig::new(capacity))
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let (tx, rx) = queue::bounded(config.queue_capacity);
        Self {
            handle: ServerHandle {
                registry: Arc::new(Registry::new()),
                calls: tx,
            },
            calls: rx,
            config,
            closed: false,
            _not_sync: PhantomData,
        }
    }

    /// Registers `operation` under `id`.
    ///
    /// # Panics
    /// Panics if `id` is already registered, or if a handle or client has
    /// already been opened: registration must finish before the server is
    /// shared.
    pub fn register(&mut self, id: K, operation: Operation<V>) {
        match Arc::get_mut(&mut self.handle.registry) {
            Some(registry) => registry.register(id, operation),
            None => panic!("function id {id:?}: registry is frozen once the server is shared"),
        }
    }

    pub fn register_zero<F>(&mut self, id: K, f: F)
    where
        F: Fn(Vec<V>) + Send + Sync + 'static,
    {
        self.register(id, Operation::zero(f));
    }

    pub fn register_one<F>(&mut self, id: K, f: F)
    where
        F: Fn(Vec<V>) -> V + Send + Sync + 'static,
    {
        self.register(id, Operation::one(f));
    }

    pub fn register_many<F>(&mut self, id: K, f: F)
    where
        F: Fn(Vec<V>) -> Vec<V> + Send + Sync + 'static,
    {
        self.register(id, Operation::many(f));
    }

    /// Returns a shareable handle. Freezes the registry.
    pub fn handle(&self) -> ServerHandle<K, V> {
        self.handle.clone()
    }

    /// Opens a client bound to this server. Freezes the registry.
    pub fn open_client(&self, async_capacity: usize) -> Client<K, V> {
        self.handle.open_client(async_capacity)
    }

    /// Schedules `id` on this server itself. See [`ServerHandle::go`].
    ///
    /// Blocks while the call queue is full, so calling this from the owner
    /// thread with a full queue deadlocks.
    pub fn go<Q>(&self, id: &Q, args: Vec<V>)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        self.handle.go(id, args);
    }

    /// Executes one call and delivers its result.
    ///
    /// Must only be called from the owner loop. A panic inside the operation
    /// is caught and becomes the call's error. Exactly one return envelope is
    /// sent for envelopes that carry a return channel.
    ///
    /// Returns the operation's fault, or the delivery failure if the caller
    /// abandoned its return channel.
    pub fn exec(&self, mut ci: CallEnvelope<V>) -> CallResult<()> {
        let args = ci.take_args();
        let operation = ci.operation().clone();

        match fault::catch(self.config.trace_len, || operation.invoke(args)) {
            Ok(output) => ci.deliver(Ok(output)).inspect_err(|err| {
                warn!(error = %err, "dropped call result");
            }),
            Err(err) => {
                warn!(error = %err, shape = %operation.shape(), "operation panicked");
                // The fault is what the owner loop hears about.
                let _ = ci.deliver(Err(err.clone()));
                Err(err)
            }
        }
    }

    /// The call queue, for blocking receives or `crossbeam_channel::select!`.
    pub fn call_queue(&self) -> &Receiver<CallEnvelope<V>> {
        self.calls.as_receiver()
    }

    /// Blocks until the next call arrives.
    pub fn recv(&self) -> Option<CallEnvelope<V>> {
        self.calls.recv()
    }

    /// Takes the next queued call, if any.
    pub fn try_recv(&self) -> Option<CallEnvelope<V>> {
        self.calls.try_recv()
    }

    /// Waits up to `timeout` for the next call.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<CallEnvelope<V>> {
        self.calls.recv_timeout(timeout)
    }

    /// Runs every call currently queued. Returns how many ran.
    pub fn exec_ready(&self) -> usize {
        let mut n = 0;
        while let Some(ci) = self.try_recv() {
            let _ = self.exec(ci);
            n += 1;
        }
        n
    }

    /// Number of calls waiting in the queue.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.calls.capacity()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry<K, V> {
        &self.handle.registry
    }

    /// Closes the server.
    ///
    /// Every call still queued is failed with [`CallError::ServerClosed`]
    /// instead of running. Afterwards pushes from clients and handles fail
    /// with the same error.
    pub fn close(mut self) {
        let drained = self.shutdown();
        info!(drained, "chanrpc server closed");
    }
}

impl<K, V: Send + 'static> Server<K, V> {
    /// Fails every queued call with `ServerClosed`. Idempotent.
    fn shutdown(&mut self) -> usize {
        if self.closed {
            return 0;
        }
        self.closed = true;

        let mut drained = 0;
        while let Some(mut ci) = self.calls.try_recv() {
            if ci.deliver(Err(CallError::ServerClosed)).is_err() {
                debug!("caller gone before server close was reported");
            }
            drained += 1;
        }
        // Calls that slip in after the drain are failed by their own drop
        // once the receiver goes away with `self`.
        drained
    }
}

impl<K, V: Send + 'static> Drop for Server<K, V> {
    fn drop(&mut self) {
        let drained = self.shutdown();
        if drained > 0 {
            info!(drained, "chanrpc server dropped with queued calls");
        }
    }
}

impl<K, V: Send + 'static> fmt::Debug for Server<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("queued", &self.calls.len())
            .field("config", &self.config)
            .field("closed", &self.closed)
            .finish()
    }
}
