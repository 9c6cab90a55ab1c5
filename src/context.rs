//! Per-thread signal state.
//!
//! A thread has at most one [`ThreadSignalContext`], created on its first
//! handler registration and dropped only by an explicit release. It is stored
//! in thread-local storage, so it can only ever be reached from its own thread.

use crate::fd_monitor::MonitorRef;
use crate::queue::SignalQueue;
use crate::registry::SignalHandler;
use nix::sys::signal::{SigSet, Signal};
use std::cell::RefCell;
use std::rc::Rc;

/// One signal of interest and the callback that receives it.
pub(crate) struct HandlerEntry {
    pub(crate) signal: Signal,
    pub(crate) handler: SignalHandler,
}

pub(crate) struct ThreadSignalContext {
    /// Registration order.
    pub(crate) entries: Vec<HandlerEntry>,
    pub(crate) queue: SignalQueue,
    /// Set once the queue is registered with this thread's fd monitor.
    pub(crate) monitor: Option<MonitorRef>,
}

impl ThreadSignalContext {
    pub(crate) fn new(queue: SignalQueue) -> Self {
        Self {
            entries: Vec::new(),
            queue,
            monitor: None,
        }
    }

    pub(crate) fn find(&self, signal: Signal) -> Option<&HandlerEntry> {
        self.entries.iter().find(|e| e.signal == signal)
    }

    /// Insert, replace or remove the entry for `signal`.
    pub(crate) fn update(&mut self, signal: Signal, handler: Option<SignalHandler>) {
        let pos = self.entries.iter().position(|e| e.signal == signal);
        match (pos, handler) {
            (Some(pos), Some(handler)) => self.entries[pos].handler = handler,
            (Some(pos), None) => {
                self.entries.remove(pos);
            }
            (None, Some(handler)) => self.entries.push(HandlerEntry { signal, handler }),
            (None, None) => {}
        }
    }

    /// The queue mask: exactly the signals that currently have a handler.
    pub(crate) fn mask(&self) -> SigSet {
        let mut mask = SigSet::empty();
        for entry in &self.entries {
            mask.add(entry.signal);
        }
        mask
    }

    pub(crate) fn handler_for(&self, signal: Signal) -> Option<SignalHandler> {
        self.find(signal).map(|e| Rc::clone(&e.handler))
    }
}

thread_local! {
    static CONTEXT: RefCell<Option<ThreadSignalContext>> = const { RefCell::new(None) };
}

/// Run `f` with the calling thread's context slot.
///
/// Callers must not invoke user handlers from inside `f`: a handler that
/// registers another handler would re-enter the slot.
pub(crate) fn with_slot<R>(f: impl FnOnce(&mut Option<ThreadSignalContext>) -> R) -> R {
    CONTEXT.with(|slot| f(&mut slot.borrow_mut()))
}
