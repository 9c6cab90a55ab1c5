//! Signal events for cooperative, single-threaded event loops.
//!
//! A thread that wants to react to a signal registers a handler through
//! [`registry::set_handler`]. The thread's handlers share one signalfd whose
//! mask always matches the set of registered signals; that descriptor is
//! watched by the thread's [`fd_monitor`] loop, and [`dispatch`] routes every
//! drained record to the matching handler on the same thread.
//!
//! Fatal signals never take that path. [`crash::install_crash_diagnostics`]
//! wires them to a one-shot handler that streams a diagnostic report to
//! stderr using only async-signal-safe primitives, then lets the default
//! disposition terminate the process.

/// Log at error level and abort the process.
///
/// Used where continuing would leave the signal mask and the handler set out
/// of step, or where the signal queue can no longer be trusted.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {{
        ::tracing::error!($($arg)+);
        ::std::process::abort()
    }};
}

pub mod config;
mod context;
pub mod crash;
pub mod dispatch;
pub mod fd_monitor;
pub mod lifecycle;
mod queue;
pub mod registry;
pub mod termination;

pub use nix::sys::signal::Signal;
pub use registry::{
    block, check_handler_signal, clear_handler, has_context, registered_signals, release_all,
    set_handler, SignalError, SignalHandler,
};
