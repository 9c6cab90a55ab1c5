//! Routing of queued signals to the handlers of the thread that drains them.

use crate::context;
use nix::poll::PollFlags;
use nix::sys::signal::Signal;
use std::os::fd::RawFd;

/// fd monitor callback for a thread's signal queue.
///
/// Drains every queued record and runs the matching handler for each, in the
/// order the kernel returns them. Handlers run synchronously on this thread
/// and may add, replace or remove handlers, or release the context entirely.
pub fn on_readable(fd: RawFd, events: PollFlags) {
    let unexpected = events - PollFlags::POLLIN;
    if !unexpected.is_empty() {
        tracing::error!(fd, events = ?events, "unexpected event set from signal queue");
        if !events.contains(PollFlags::POLLIN) {
            return;
        }
    }

    let invoked = drain();
    tracing::trace!(fd, invoked, "drained signal queue");
}

/// Read the calling thread's queue until it is empty. Returns how many
/// handlers ran.
fn drain() -> usize {
    let mut invoked = 0;
    loop {
        // The queue is looked up again for every record: a handler may have
        // released the context.
        let record = context::with_slot(|slot| slot.as_ref().map(|ctx| ctx.queue.read_record()));
        match record {
            None | Some(Ok(None)) => break,
            Some(Ok(Some(signo))) => {
                if route(signo) {
                    invoked += 1;
                }
            }
            Some(Err(e)) => fatal!(error = %e, "could not read from signal queue"),
        }
    }
    invoked
}

/// Run the calling thread's handler for `signo`.
///
/// A record can outlive its handler when the handler was removed after the
/// signal was queued; such records are dropped.
pub(crate) fn route(signo: i32) -> bool {
    let Ok(signal) = Signal::try_from(signo) else {
        tracing::debug!(signo, "dropping record for unsupported signal number");
        return false;
    };

    let handler = context::with_slot(|slot| slot.as_ref().and_then(|ctx| ctx.handler_for(signal)));
    match handler {
        Some(handler) => {
            handler(signal);
            true
        }
        None => {
            tracing::debug!(signal = %signal, "no handler for queued signal, dropping");
            false
        }
    }
}
