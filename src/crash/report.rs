//! The crash report: a fixed sequence of line-oriented sections.
//!
//! Postmortem tooling parses these lines, so the section markers and their
//! order are stable. Sections backed by files degrade on their own when the
//! file cannot be read; a failed write aborts the whole report.

use super::arch::{CrashArch, Target};
use super::writer::{RawFile, ReportWriter, WriteFailed, LINE_LEN};
use nix::unistd::{getpid, gettid};
use std::ffi::CStr;

/// What the kernel told the handler about the fault.
pub(crate) struct Fault<'a> {
    pub(crate) signo: libc::c_int,
    pub(crate) fault_addr: usize,
    pub(crate) context: Option<&'a libc::ucontext_t>,
}

macro_rules! emit {
    ($w:expr, $($arg:tt)*) => {
        $w.line(format_args!($($arg)*))?
    };
}

/// Stream the full report for `fault` through `w`.
pub(crate) fn write_report(
    w: &mut ReportWriter,
    fault: &Fault<'_>,
    version_file: Option<&CStr>,
) -> Result<(), WriteFailed> {
    emit!(w, "PROCESS: {} ,TID {}\n", getpid(), gettid());

    let pc = fault.context.map_or(0, Target::program_counter);
    // abort() has no fault address.
    let addr = if fault.signo == libc::SIGABRT {
        0
    } else {
        fault.fault_addr
    };
    emit!(w, "SIGNAL: {}, ADDR {:#x}, AT {:#x}\n", fault.signo, addr, pc);
    write_explanation(w, fault.signo, fault.fault_addr)?;

    write_version(w, version_file)?;
    write_command_line(w)?;
    write_memory_map(w, c"/proc/self/maps")?;

    emit!(w, "BACKTRACE\n");
    Target::write_backtrace(w, fault.context)?;
    if let Some(ctx) = fault.context {
        Target::write_registers(w, ctx)?;
    }

    emit!(w, "DONE\n");
    Ok(())
}

fn write_explanation(
    w: &mut ReportWriter,
    signo: libc::c_int,
    addr: usize,
) -> Result<(), WriteFailed> {
    match signo {
        libc::SIGSEGV => emit!(w, "ILLEGAL ADDRESS {addr:#x}\n"),
        libc::SIGFPE => emit!(w, "FLOATING POINT EXCEPTION AT {addr:#x}\n"),
        libc::SIGTRAP => emit!(w, "TRAP AT {addr:#x}\n"),
        libc::SIGABRT => emit!(w, "ABORT\n"),
        libc::SIGILL => emit!(w, "ILLEGAL INSTRUCTION AT {addr:#x}\n"),
        libc::SIGBUS => emit!(w, "BUS ERROR AT {addr:#x}\n"),
        _ => emit!(w, "UNEXPECTED SIGNAL {signo}\n"),
    }
    Ok(())
}

fn write_version(w: &mut ReportWriter, version_file: Option<&CStr>) -> Result<(), WriteFailed> {
    emit!(w, "LEGATO VERSION\n");
    let file = version_file.and_then(RawFile::open);
    let len = match &file {
        Some(file) => file.read(w.scratch()),
        None => 0,
    };
    drop(file);

    if len > 0 {
        w.emit_scratch(len)?;
        w.raw(b"\n")?;
    } else {
        emit!(w, "Cannot read legato version\n");
    }
    Ok(())
}

/// `/proc/self/cmdline` separates arguments with NULs; they are printed as spaces.
fn write_command_line(w: &mut ReportWriter) -> Result<(), WriteFailed> {
    emit!(w, "PROCESS COMMAND LINE\n");
    let Some(file) = RawFile::open(c"/proc/self/cmdline") else {
        emit!(w, "Cannot read process command line\n");
        return Ok(());
    };
    loop {
        let buf = w.scratch();
        let len = file.read(buf);
        if len == 0 {
            break;
        }
        for byte in &mut buf[..len] {
            if *byte == 0 {
                *byte = b' ';
            }
        }
        w.emit_scratch(len)?;
    }
    w.raw(b"\n")
}

/// Copy the memory map at `maps` a line at a time, so everything up to a
/// failed write is already out. Lines longer than the buffer go out in pieces.
fn write_memory_map(w: &mut ReportWriter, maps: &CStr) -> Result<(), WriteFailed> {
    emit!(w, "PROCESS MAP\n");
    let Some(file) = RawFile::open(maps) else {
        emit!(w, "Cannot read process map\n");
        return Ok(());
    };
    let mut len = 0;
    loop {
        let buf = w.scratch();
        if file.read(&mut buf[len..len + 1]) == 0 {
            break;
        }
        len += 1;
        if buf[len - 1] == b'\n' || len == LINE_LEN {
            w.emit_scratch(len)?;
            len = 0;
        }
    }
    if len > 0 {
        w.emit_scratch(len)?;
    }
    Ok(())
}
