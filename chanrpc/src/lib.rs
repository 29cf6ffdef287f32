//! In-process RPC between threads over bounded hand-off queues.
//!
//! A [`Server`] owns a registry of operations and a bounded call queue. Other
//! threads open a [`Client`] against it and issue calls:
//! - `call0` / `call1` / `calln`: blocking calls returning nothing, one value,
//!   or a sequence of values
//! - `async_call`: non-blocking calls whose callback runs later on the
//!   client's own thread, when the client drains its results
//!
//! The server side is driven by an owner loop that the application writes:
//! one thread receives envelopes from [`Server::call_queue`] and hands each
//! one to [`Server::exec`]. Calls are therefore executed one at a time, in
//! queue order.
//!
//! ```no_run
//! use chanrpc::Server;
//! use crossbeam_channel::select;
//!
//! let mut server: Server<&'static str, i64> = Server::new(64);
//! server.register_one("add", |args| args[0] + args[1]);
//!
//! let handle = server.handle();
//! let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
//! let owner = std::thread::spawn(move || {
//!     loop {
//!         select! {
//!             recv(server.call_queue()) -> ci => match ci {
//!                 Ok(ci) => { let _ = server.exec(ci); }
//!                 Err(_) => break,
//!             },
//!             recv(stop_rx) -> _ => break,
//!         }
//!     }
//!     server.close();
//! });
//!
//! let mut client = handle.open_client(16);
//! assert_eq!(client.call1("add", vec![2, 3]), Ok(5));
//! client.close();
//!
//! stop_tx.send(()).unwrap();
//! owner.join().unwrap();
//! ```

pub mod client;
pub mod config;
pub mod envelope;
pub mod registry;
pub mod server;

mod fault;
pub(crate) mod queue;

pub use client::Client;
pub use config::ServerConfig;
pub use envelope::{CallEnvelope, Callback, Output, ReturnEnvelope, Value};
pub use registry::{Operation, Registry, Shape};
pub use server::{Server, ServerHandle};

/// Errors delivered to callers of a [`Client`].
///
/// Every recoverable failure travels as one of these values: synchronous
/// calls return it, asynchronous calls pass it to their callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// No operation is registered under the requested id.
    #[error("function id {id}: function not registered")]
    NotRegistered {
        /// Debug rendering of the id.
        id: String,
    },
    /// The operation exists but has a different shape than requested.
    #[error("function id {id}: return type mismatch (registered {registered}, requested {requested})")]
    ShapeMismatch {
        /// Debug rendering of the id.
        id: String,
        /// Shape the operation was registered with.
        registered: Shape,
        /// Shape the call site asked for.
        requested: Shape,
    },
    /// A non-blocking enqueue found the call queue full.
    #[error("chanrpc channel full")]
    QueueFull,
    /// The server closed before the call could run.
    #[error("chanrpc server closed")]
    ServerClosed,
    /// The operation panicked while running on the owner thread.
    #[error("{message}")]
    Fault {
        /// Panic payload rendered as text.
        message: String,
        /// Captured backtrace, present when trace capture is enabled.
        trace: Option<String>,
    },
    /// The result could not be delivered because the caller went away.
    #[error("return channel abandoned by the caller")]
    ReturnAbandoned,
}

impl CallError {
    /// Returns true for errors that mean the server is gone for good.
    pub fn is_closed(&self) -> bool {
        matches!(self, CallError::ServerClosed)
    }

    /// Returns true if the error comes from a panicking operation.
    pub fn is_fault(&self) -> bool {
        matches!(self, CallError::Fault { .. })
    }
}

/// Result type for calls.
pub type CallResult<T> = Result<T, CallError>;
