//! Crash diagnostics for fatal signals.
//!
//! # Flow
//! ```text
//! install_crash_diagnostics()  (once, at startup)
//!     SIGSEGV/ILL/BUS/FPE/ABRT/TRAP → report_handler, one-shot (SA_RESETHAND)
//!
//! report_handler (signal context, possibly on a corrupted stack)
//!     write report to stderr → optional gdbserver attach → raise(signo)
//! ```
//!
//! The handler allocates nothing and takes no locks: every line is formatted
//! into one stack buffer and written straight to fd 2. Because the disposition
//! is reset before the handler runs, a second fault, including one raised by
//! the report itself, takes the default action instead of recursing.

mod arch;
mod frames;
mod report;
mod writer;

use crate::config::DiagnosticsConfig;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::getpid;
use std::ffi::CString;
use std::fmt::Write;
use std::os::unix::ffi::OsStrExt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::OnceLock;
use writer::{FixedBuf, ReportWriter};

/// Signals handled by the crash reporter. They cannot be given event handlers.
pub const FATAL_SIGNALS: [Signal; 6] = [
    Signal::SIGSEGV,
    Signal::SIGILL,
    Signal::SIGBUS,
    Signal::SIGFPE,
    Signal::SIGABRT,
    Signal::SIGTRAP,
];

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// 0 means no gdbserver.
static GDBSERVER_PORT: AtomicU32 = AtomicU32::new(0);

static VERSION_FILE: OnceLock<CString> = OnceLock::new();

/// Install the crash reporter, configured from the environment.
///
/// See [`install_with`].
pub fn install_crash_diagnostics() -> bool {
    install_with(&DiagnosticsConfig::from_env())
}

/// Install the crash reporter for every signal in [`FATAL_SIGNALS`].
///
/// Returns `false` without touching any disposition when `config` disables
/// diagnostics. Installing more than once is harmless; later calls only update
/// the gdbserver port.
pub fn install_with(config: &DiagnosticsConfig) -> bool {
    if !config.enabled() {
        tracing::warn!("handling of SEGV/ILL/BUS/FPE/ABRT/TRAP and crash report disabled");
        return false;
    }

    let port = config.remote_debug_port().unwrap_or(0);
    GDBSERVER_PORT.store(port, Ordering::SeqCst);
    if VERSION_FILE.get().is_none() {
        match CString::new(config.version_file.as_os_str().as_bytes()) {
            Ok(path) => {
                let _ = VERSION_FILE.set(path);
            }
            Err(_) => tracing::warn!(
                path = %config.version_file.display(),
                "version file path contains a NUL byte, version will not be reported"
            ),
        }
    }

    if INSTALLED.swap(true, Ordering::SeqCst) {
        return true;
    }

    arch::prime_backtrace();

    let action = SigAction::new(
        SigHandler::SigAction(report_handler),
        SaFlags::SA_NOCLDSTOP | SaFlags::SA_RESETHAND,
        SigSet::empty(),
    );
    for signal in FATAL_SIGNALS {
        // SAFETY: report_handler only performs async-signal-safe operations.
        if let Err(e) = unsafe { sigaction(signal, &action) } {
            tracing::error!(signal = %signal, error = %e, "unable to install crash handler");
        }
    }

    tracing::info!(gdbserver_port = port, "crash diagnostics installed");
    true
}

/// Whether the crash reporter has been installed in this process.
pub fn is_installed() -> bool {
    INSTALLED.load(Ordering::SeqCst)
}

extern "C" fn report_handler(
    signo: libc::c_int,
    info: *mut libc::siginfo_t,
    ucontext: *mut libc::c_void,
) {
    // SAFETY: SA_SIGINFO handlers receive a valid siginfo_t and ucontext_t
    // (or null, which as_ref() maps to None).
    let (fault_addr, context) = unsafe {
        (
            info.as_ref().map_or(0, |info| info.si_addr() as usize),
            ucontext.cast::<libc::ucontext_t>().cast_const().as_ref(),
        )
    };
    let fault = report::Fault {
        signo,
        fault_addr,
        context,
    };

    let mut w = ReportWriter::new(libc::STDERR_FILENO);
    let version_file = VERSION_FILE.get().map(CString::as_c_str);
    if report::write_report(&mut w, &fault, version_file).is_ok() {
        let port = GDBSERVER_PORT.load(Ordering::SeqCst);
        if port != 0 {
            attach_debugger(port);
        }
    }

    // The disposition is already back to the default; this terminates the
    // process (with a core, if enabled) once the handler returns.
    // SAFETY: raise() is async-signal-safe.
    unsafe {
        libc::raise(signo);
    }
}

/// Arguments for `gdbserver :<port> --attach <pid>`.
fn debugger_args(port: u32, pid: libc::pid_t) -> (FixedBuf<16>, FixedBuf<16>) {
    let mut port_arg = FixedBuf::new();
    let mut pid_arg = FixedBuf::new();
    let _ = write!(port_arg, ":{port}");
    let _ = write!(pid_arg, "{pid}");
    (port_arg, pid_arg)
}

/// Fork a gdbserver attached to this process and wait until it exits.
fn attach_debugger(port: u32) {
    let (mut port_arg, mut pid_arg) = debugger_args(port, getpid().as_raw());
    let argv = [
        c"gdbserver".as_ptr(),
        port_arg.as_c_ptr(),
        c"--attach".as_ptr(),
        pid_arg.as_c_ptr(),
        std::ptr::null(),
    ];

    // SAFETY: the child only calls execvp and _exit; the parent only waits.
    unsafe {
        match libc::fork() {
            0 => {
                libc::execvp(argv[0], argv.as_ptr());
                libc::_exit(127);
            }
            -1 => {}
            child => {
                let mut status = 0;
                libc::waitpid(child, &mut status, 0);
            }
        }
    }
}
