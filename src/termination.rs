//! Default SIGTERM handling: log and exit cleanly.
//!
//! Wired through the ordinary event path, so SIGTERM is only acted on when the
//! installing thread services its fd monitor.

use crate::registry::{block, set_handler};
use nix::sys::signal::Signal;
use std::rc::Rc;

/// Block SIGTERM and route it to a handler that exits with status 0.
///
/// Call from the main thread before other threads are spawned so they all
/// inherit the block and SIGTERM always lands in this thread's queue.
pub fn install_default_term_handler() {
    block(Signal::SIGTERM);
    set_handler(Signal::SIGTERM, Some(Rc::new(on_terminate)));
}

fn on_terminate(signal: Signal) {
    tracing::error!(signal = %signal, "terminated");
    std::process::exit(0);
}
