//! Call and return envelopes.
//!
//! A [`CallEnvelope`] travels from a client to the owner thread through the
//! server's call queue; the [`ReturnEnvelope`] produced for it travels back on
//! the return channel the envelope carries.
//!
//! Every call envelope that has a return channel yields exactly one return
//! envelope. Dispatch delivers the result; an envelope dropped before dispatch
//! (server closed or dropped with calls still queued) delivers
//! [`CallError::ServerClosed`] from its `Drop`.

use std::any::Any;
use std::fmt;

use crate::queue::QueueSender;
use crate::registry::{Operation, Shape};
use crate::{CallError, CallResult};

/// Dynamically typed value, for servers whose operations take mixed
/// argument types.
pub type Value = Box<dyn Any + Send>;

/// What an operation produced, packaged by shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output<V> {
    Unit,
    One(V),
    Many(Vec<V>),
}

impl<V> Output<V> {
    pub fn shape(&self) -> Shape {
        match self {
            Output::Unit => Shape::Zero,
            Output::One(_) => Shape::One,
            Output::Many(_) => Shape::Many,
        }
    }
}

type ZeroCb = dyn FnOnce(CallResult<()>) + Send;
type OneCb<V> = dyn FnOnce(CallResult<V>) + Send;
type ManyCb<V> = dyn FnOnce(CallResult<Vec<V>>) + Send;

/// Completion callback of an asynchronous call.
///
/// The variant decides which operation shape the call asks for. The callback
/// runs exactly once, on the thread that owns the client.
pub enum Callback<V> {
    /// Receives only the error, for shape-0 operations.
    Zero(Box<ZeroCb>),
    /// Receives a value or an error, for shape-1 operations.
    One(Box<OneCb<V>>),
    /// Receives a sequence or an error, for shape-n operations.
    Many(Box<ManyCb<V>>),
}

impl<V> Callback<V> {
    pub fn zero<F>(f: F) -> Self
    where
        F: FnOnce(CallResult<()>) + Send + 'static,
    {
        Callback::Zero(Box::new(f))
    }

    pub fn one<F>(f: F) -> Self
    where
        F: FnOnce(CallResult<V>) + Send + 'static,
    {
        Callback::One(Box::new(f))
    }

    pub fn many<F>(f: F) -> Self
    where
        F: FnOnce(CallResult<Vec<V>>) + Send + 'static,
    {
        Callback::Many(Box::new(f))
    }

    /// Shape of the operation this callback expects.
    pub fn shape(&self) -> Shape {
        match self {
            Callback::Zero(_) => Shape::Zero,
            Callback::One(_) => Shape::One,
            Callback::Many(_) => Shape::Many,
        }
    }

    /// Runs the callback with an error and no result.
    pub(crate) fn fail(self, err: CallError) {
        match self {
            Callback::Zero(f) => f(Err(err)),
            Callback::One(f) => f(Err(err)),
            Callback::Many(f) => f(Err(err)),
        }
    }

    /// Runs the callback with the result of the call.
    ///
    /// # Panics
    /// Panics if the output shape does not match the callback. Shapes are
    /// checked before the call is queued, so this only fires on a bug.
    pub(crate) fn complete(self, result: CallResult<Output<V>>) {
        let output = match result {
            Ok(output) => output,
            Err(err) => return self.fail(err),
        };

        match (self, output) {
            (Callback::Zero(f), Output::Unit) => f(Ok(())),
            (Callback::One(f), Output::One(v)) => f(Ok(v)),
            (Callback::Many(f), Output::Many(v)) => f(Ok(v)),
            (cb, output) => unreachable!(
                "callback of shape {} completed with output of shape {}",
                cb.shape(),
                output.shape()
            ),
        }
    }
}

impl<V> fmt::Debug for Callback<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({})", self.shape())
    }
}

/// An in-flight call: the resolved operation, its arguments, where to send
/// the result and, for asynchronous calls, what to run when it arrives.
pub struct CallEnvelope<V: Send + 'static> {
    operation: Operation<V>,
    args: Vec<V>,
    ret: Option<QueueSender<ReturnEnvelope<V>>>,
    callback: Option<Callback<V>>,
}

impl<V: Send + 'static> CallEnvelope<V> {
    pub(crate) fn new(
        operation: Operation<V>,
        args: Vec<V>,
        ret: Option<QueueSender<ReturnEnvelope<V>>>,
        callback: Option<Callback<V>>,
    ) -> Self {
        Self {
            operation,
            args,
            ret,
            callback,
        }
    }

    pub fn shape(&self) -> Shape {
        self.operation.shape()
    }

    pub fn args(&self) -> &[V] {
        &self.args
    }

    /// Returns false for fire-and-forget envelopes submitted by the server
    /// itself.
    pub fn has_return_channel(&self) -> bool {
        self.ret.is_some()
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    pub(crate) fn operation(&self) -> &Operation<V> {
        &self.operation
    }

    pub(crate) fn take_args(&mut self) -> Vec<V> {
        std::mem::take(&mut self.args)
    }

    /// Sends the return envelope for this call.
    ///
    /// Blocks while the return channel is full. A missing return channel
    /// means nobody waits for the result and delivery is skipped. Only the
    /// first delivery does anything.
    pub(crate) fn deliver(&mut self, result: CallResult<Output<V>>) -> CallResult<()> {
        let Some(ret) = self.ret.take() else {
            return Ok(());
        };

        let ri = ReturnEnvelope {
            result,
            callback: self.callback.take(),
        };
        ret.push(ri).map_err(|_| CallError::ReturnAbandoned)
    }

    /// Detaches the return channel so dropping the envelope delivers nothing,
    /// and hands back the callback. Used when the envelope never made it into
    /// the queue.
    pub(crate) fn disarm(mut self) -> Option<Callback<V>> {
        self.ret = None;
        self.callback.take()
    }
}

impl<V: Send + 'static> Drop for CallEnvelope<V> {
    fn drop(&mut self) {
        if self.ret.is_some() {
            let _ = self.deliver(Err(CallError::ServerClosed));
        }
    }
}

impl<V: Send + 'static> fmt::Debug for CallEnvelope<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallEnvelope")
            .field("shape", &self.shape())
            .field("args", &self.args.len())
            .field("ret", &self.ret.is_some())
            .field("callback", &self.callback)
            .finish()
    }
}

/// The outcome of one call, on its way back to the caller.
pub struct ReturnEnvelope<V> {
    result: CallResult<Output<V>>,
    callback: Option<Callback<V>>,
}

impl<V> ReturnEnvelope<V> {
    pub fn result(&self) -> &CallResult<Output<V>> {
        &self.result
    }

    pub fn error(&self) -> Option<&CallError> {
        self.result.as_ref().err()
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    pub(crate) fn into_result(self) -> CallResult<Output<V>> {
        self.result
    }

    pub(crate) fn into_parts(self) -> (CallResult<Output<V>>, Option<Callback<V>>) {
        (self.result, self.callback)
    }
}

impl<V> fmt::Debug for ReturnEnvelope<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReturnEnvelope")
            .field("ok", &self.result.is_ok())
            .field("error", &self.error())
            .field("callback", &self.callback)
            .finish()
    }
}
