//! Process startup wiring.
//!
//! # Ordering
//! ```text
//! start():
//!     crash diagnostics (fatal signals) → default SIGTERM handler
//! ```
//!
//! Runs on the main thread before any other thread exists, so signal blocks
//! made here are inherited everywhere.

use crate::config::BridgeConfig;
use crate::crash;
use crate::termination;

/// What [`start`] ended up installing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Started {
    pub crash_diagnostics: bool,
    pub term_handler: bool,
}

/// Install the process-wide signal handling described by `config`.
pub fn start(config: &BridgeConfig) -> Started {
    let crash_diagnostics = crash::install_with(&config.diagnostics);

    let term_handler = config.termination.install_default_handler;
    if term_handler {
        termination::install_default_term_handler();
    }

    tracing::debug!(crash_diagnostics, term_handler, "signal handling started");
    Started {
        crash_diagnostics,
        term_handler,
    }
}
