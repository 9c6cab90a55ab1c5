//! Per-thread signal handler registration.
//!
//! `set_handler` keeps three things in step for the calling thread: the list of
//! handlers, the mask of its signal queue, and the queue's registration with the
//! thread's fd monitor. The queue and the registration outlive the last handler;
//! only [`release_all`] tears them down, so handlers can come and go without
//! reopening the descriptor.
//!
//! Signals routed here must also be blocked in every thread, otherwise the
//! kernel delivers them through their normal disposition instead of queueing
//! them. Call [`block`] from the main thread before spawning others.

use crate::context::{self, ThreadSignalContext};
use crate::crash::FATAL_SIGNALS;
use crate::dispatch;
use crate::fd_monitor;
use crate::queue::SignalQueue;
use nix::poll::PollFlags;
use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow, Signal};
use nix::unistd::{getpid, gettid};
use std::rc::Rc;

/// Callback run on the registering thread each time its signal is drained.
pub type SignalHandler = Rc<dyn Fn(Signal)>;

/// Prefix of the fd monitor name; the thread name follows it.
const MONITOR_PREFIX: &str = "Sig";

/// Errors from validating a handler registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    /// The signal cannot be caught, or belongs to the crash reporter.
    Reserved(Signal),
}

impl std::fmt::Display for SignalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalError::Reserved(signal) => {
                write!(f, "signal event handler for {signal} is not allowed")
            }
        }
    }
}

impl std::error::Error for SignalError {}

/// Check that `signal` may be given an event handler.
///
/// SIGKILL and SIGSTOP cannot be caught at all. The fatal signals are owned by
/// the crash reporter, and SIGSYS is a program error like them.
pub fn check_handler_signal(signal: Signal) -> Result<(), SignalError> {
    let reserved = matches!(signal, Signal::SIGKILL | Signal::SIGSTOP | Signal::SIGSYS)
        || FATAL_SIGNALS.contains(&signal);
    if reserved {
        Err(SignalError::Reserved(signal))
    } else {
        Ok(())
    }
}

/// Block `signal` in the calling thread.
///
/// Threads inherit their creator's mask, so calling this from the main thread
/// before any other thread exists blocks the signal process-wide.
///
/// Aborts the process if the mask cannot be changed.
pub fn block(signal: Signal) {
    if gettid() != getpid() {
        tracing::warn!(
            signal = %signal,
            "blocking signal outside the main thread; threads that already exist keep their own mask"
        );
    }

    let mut set = SigSet::empty();
    set.add(signal);
    if let Err(e) = pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&set), None) {
        fatal!(signal = %signal, error = %e, "could not block signal");
    }
}

/// Set, replace or (with `None`) remove the calling thread's handler for `signal`.
///
/// Each signal has at most one handler per thread; the latest one wins.
/// Aborts the process if `signal` is reserved (see [`check_handler_signal`]) or
/// if the signal queue cannot be updated to match the new handler set.
pub fn set_handler(signal: Signal, handler: Option<SignalHandler>) {
    if let Err(e) = check_handler_signal(signal) {
        fatal!(signal = %signal, "{e}");
    }

    context::with_slot(|slot| {
        if slot.is_none() {
            if handler.is_none() {
                return;
            }
            let queue = match SignalQueue::open(&SigSet::empty()) {
                Ok(queue) => queue,
                Err(e) => fatal!(error = %e, "could not create signal queue"),
            };
            *slot = Some(ThreadSignalContext::new(queue));
        }
        let Some(ctx) = slot.as_mut() else {
            return;
        };

        if handler.is_none() && ctx.find(signal).is_none() {
            return;
        }
        let removing = handler.is_none();
        ctx.update(signal, handler);

        if let Err(e) = ctx.queue.set_mask(&ctx.mask()) {
            fatal!(signal = %signal, error = %e, "could not set signal event handler");
        }

        if ctx.monitor.is_none() {
            let name = format!(
                "{MONITOR_PREFIX}{}",
                std::thread::current().name().unwrap_or("unnamed")
            );
            ctx.monitor = Some(fd_monitor::create(
                &name,
                ctx.queue.raw_fd(),
                PollFlags::POLLIN,
                Rc::new(dispatch::on_readable),
            ));
        }

        tracing::debug!(
            signal = %signal,
            removed = removing,
            handlers = ctx.entries.len(),
            "updated signal event handler"
        );
    });
}

/// Remove the calling thread's handler for `signal`, if any.
pub fn clear_handler(signal: Signal) {
    set_handler(signal, None);
}

/// Drop every handler of the calling thread and release its signal queue.
///
/// Does nothing if the thread never registered a handler. Should be called
/// before a thread that registered handlers exits.
pub fn release_all() {
    let Some(ctx) = context::with_slot(Option::take) else {
        return;
    };

    if let Some(monitor) = ctx.monitor {
        fd_monitor::delete(monitor);
    }
    let ThreadSignalContext { entries, queue, .. } = ctx;
    if let Err(e) = queue.close() {
        fatal!(error = %e, "could not close signal queue");
    }
    tracing::debug!(handlers = entries.len(), "released signal events");
}

/// Signals with a handler on the calling thread, in registration order.
pub fn registered_signals() -> Vec<Signal> {
    context::with_slot(|slot| {
        slot.as_ref()
            .map(|ctx| ctx.entries.iter().map(|e| e.signal).collect())
            .unwrap_or_default()
    })
}

/// Whether the calling thread currently owns a signal context.
pub fn has_context() -> bool {
    context::with_slot(|slot| slot.is_some())
}

/// The calling thread's signal queue descriptor.
#[cfg(test)]
pub(crate) fn queue_fd() -> Option<std::os::fd::RawFd> {
    context::with_slot(|slot| slot.as_ref().map(|ctx| ctx.queue.raw_fd()))
}
