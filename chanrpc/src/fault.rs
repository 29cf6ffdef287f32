//! Turning operation panics into call errors.
//!
//! Traces are taken inside a panic hook, while the failing operation's frames
//! are still on the stack. The hook chains to whatever hook was installed
//! before it and only records anything on threads currently inside [`catch`]
//! with tracing enabled.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use crate::{CallError, CallResult};

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static PANIC_TRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

fn install_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.try_with(Cell::get).unwrap_or(false) {
                let _ = PANIC_TRACE.try_with(|t| {
                    if let Ok(mut t) = t.try_borrow_mut() {
                        *t = Some(Backtrace::force_capture());
                    }
                });
            }
            previous(info);
        }));
    });
}

/// Runs `f`, converting a panic into [`CallError::Fault`].
///
/// With `trace_len > 0` the error also carries up to `trace_len` bytes of the
/// backtrace taken at the panic site.
pub(crate) fn catch<R>(trace_len: usize, f: impl FnOnce() -> R) -> CallResult<R> {
    let capture = trace_len > 0;
    if capture {
        install_hook();
        PANIC_TRACE.with(|t| t.borrow_mut().take());
    }
    let outer = CAPTURING.replace(capture);
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    CAPTURING.set(outer);

    result.map_err(|payload| CallError::Fault {
        message: panic_message(payload.as_ref()),
        trace: capture.then(|| panic_trace(trace_len)),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "operation panicked".to_string()
    }
}

/// The trace recorded by the hook, or one taken here if the hook was
/// replaced after installation.
fn panic_trace(trace_len: usize) -> String {
    let backtrace = PANIC_TRACE
        .with(|t| t.borrow_mut().take())
        .unwrap_or_else(Backtrace::force_capture);
    let mut trace = backtrace.to_string();
    if trace.len() > trace_len {
        let mut end = trace_len;
        while !trace.is_char_boundary(end) {
            end -= 1;
        }
        trace.truncate(end);
    }
    trace
}
