//! Per-architecture pieces of the crash report, selected at build time.
//!
//! Each target provides a [`CrashArch`] implementation exported as `Target`:
//! how to find the faulting program counter in the signal context, how to walk
//! the stack, and which registers to dump.

use super::frames::{self, FrameLayout};
use super::writer::{ReportWriter, WriteFailed};

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "arm")]
mod arm;
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "arm")))]
mod other;
#[cfg(target_arch = "x86_64")]
mod x86_64;

#[cfg(target_arch = "aarch64")]
pub(crate) use aarch64::Aarch64 as Target;
#[cfg(target_arch = "arm")]
pub(crate) use arm::Arm as Target;
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "arm")))]
pub(crate) use other::Other as Target;
#[cfg(target_arch = "x86_64")]
pub(crate) use x86_64::X86_64 as Target;

pub(crate) trait CrashArch {
    /// Program counter at the time of the fault.
    fn program_counter(ctx: &libc::ucontext_t) -> usize;

    /// Body of the `BACKTRACE` section.
    fn write_backtrace(
        w: &mut ReportWriter,
        ctx: Option<&libc::ucontext_t>,
    ) -> Result<(), WriteFailed>;

    /// Register dump following the backtrace.
    fn write_registers(_w: &mut ReportWriter, _ctx: &libc::ucontext_t) -> Result<(), WriteFailed> {
        Ok(())
    }
}

/// Frames requested from the unwinder.
pub(crate) const BACKTRACE_DEPTH: usize = 12;

/// The report handler and the kernel's signal trampoline.
const HANDLER_FRAMES: usize = 2;

#[cfg(target_env = "gnu")]
extern "C" {
    fn backtrace(buffer: *mut *mut libc::c_void, size: libc::c_int) -> libc::c_int;
}

/// Load the unwinder ahead of time so its first use is not inside a crash.
pub(crate) fn prime_backtrace() {
    #[cfg(target_env = "gnu")]
    {
        let mut frames = [std::ptr::null_mut::<libc::c_void>(); 1];
        // SAFETY: `frames` has room for the one entry requested.
        unsafe {
            backtrace(frames.as_mut_ptr(), 1);
        }
    }
}

/// Print the unwinder's view of the current stack, minus the handler frames.
/// Returns how many frames were printed.
#[allow(unused_variables)]
#[cfg_attr(target_arch = "arm", allow(dead_code))]
pub(crate) fn write_unwound_backtrace(w: &mut ReportWriter) -> Result<usize, WriteFailed> {
    #[cfg(target_env = "gnu")]
    {
        let mut frames = [std::ptr::null_mut::<libc::c_void>(); BACKTRACE_DEPTH];
        // SAFETY: `frames` has room for BACKTRACE_DEPTH entries.
        let found = unsafe { backtrace(frames.as_mut_ptr(), BACKTRACE_DEPTH as libc::c_int) };
        let found = found.max(0) as usize;
        for (n, addr) in frames[..found].iter().enumerate().skip(HANDLER_FRAMES) {
            w.line(format_args!("#{} : {:#x}\n", n - HANDLER_FRAMES, *addr as usize))?;
        }
        Ok(found.saturating_sub(HANDLER_FRAMES))
    }
    #[cfg(not(target_env = "gnu"))]
    {
        Ok(0)
    }
}

/// Print the frame-pointer chain starting at `fp`. Returns how many frames
/// were printed.
#[allow(dead_code)]
pub(crate) fn write_frame_chain(
    w: &mut ReportWriter,
    fp: usize,
    layout: FrameLayout,
) -> Result<usize, WriteFailed> {
    // SAFETY: the walk is bounded; a wild pointer that still faults lands in
    // the default disposition because the report handler is one-shot.
    unsafe { frames::chase(fp, layout, |n, ret| w.line(format_args!("#{n} : {ret:#x}\n"))) }
}
