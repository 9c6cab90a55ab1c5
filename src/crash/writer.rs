//! Allocation-free output primitives for the crash path.
//!
//! Everything here is safe to call from a signal handler: text is formatted
//! into fixed-size stack buffers through `core::fmt` and written with a single
//! direct `write(2)`; files are read with raw `open(2)`/`read(2)`.

use nix::errno::Errno;
use std::ffi::CStr;
use std::fmt;
use std::os::fd::RawFd;

/// Size of the one buffer a report is streamed through.
pub(crate) const LINE_LEN: usize = 256;

/// A write to the diagnostic channel came up short or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WriteFailed;

/// Fixed-capacity text buffer. Output past the capacity is dropped.
pub(crate) struct FixedBuf<const N: usize> {
    bytes: [u8; N],
    len: usize,
}

impl<const N: usize> FixedBuf<N> {
    pub(crate) const fn new() -> Self {
        Self {
            bytes: [0; N],
            len: 0,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.len = 0;
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// NUL-terminate the contents (dropping the last byte when full) and
    /// return a pointer suitable for `exec`.
    pub(crate) fn as_c_ptr(&mut self) -> *const libc::c_char {
        if self.len == N {
            self.len = N - 1;
        }
        self.bytes[self.len] = 0;
        self.bytes.as_ptr().cast()
    }
}

impl<const N: usize> fmt::Write for FixedBuf<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let take = s.len().min(N - self.len);
        self.bytes[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

/// Write all of `bytes` with one `write(2)`. Short writes count as failures;
/// retrying could hang a crashing process on a stuck channel.
pub(crate) fn write_fd(fd: RawFd, bytes: &[u8]) -> Result<(), WriteFailed> {
    // SAFETY: `bytes` is a valid readable slice for the duration of the call.
    let written = unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) };
    if written >= 0 && written as usize == bytes.len() {
        Ok(())
    } else {
        Err(WriteFailed)
    }
}

/// Streams a report to one descriptor through a single reused buffer.
pub(crate) struct ReportWriter {
    fd: RawFd,
    buf: FixedBuf<LINE_LEN>,
}

impl ReportWriter {
    pub(crate) fn new(fd: RawFd) -> Self {
        Self {
            fd,
            buf: FixedBuf::new(),
        }
    }

    /// Format one line into the buffer and write it out.
    pub(crate) fn line(&mut self, args: fmt::Arguments<'_>) -> Result<(), WriteFailed> {
        self.buf.clear();
        // FixedBuf never reports an error; overflow truncates.
        let _ = fmt::Write::write_fmt(&mut self.buf, args);
        write_fd(self.fd, self.buf.as_bytes())
    }

    /// Write bytes that are already formatted.
    pub(crate) fn raw(&self, bytes: &[u8]) -> Result<(), WriteFailed> {
        write_fd(self.fd, bytes)
    }

    /// The buffer as raw scratch space, e.g. for file reads.
    pub(crate) fn scratch(&mut self) -> &mut [u8; LINE_LEN] {
        self.buf.clear();
        &mut self.buf.bytes
    }

    /// Write the first `len` bytes of the scratch space.
    pub(crate) fn emit_scratch(&self, len: usize) -> Result<(), WriteFailed> {
        write_fd(self.fd, &self.buf.bytes[..len.min(LINE_LEN)])
    }
}

/// Read-only file opened with raw syscalls; closed on drop.
pub(crate) struct RawFile(RawFd);

impl RawFile {
    pub(crate) fn open(path: &CStr) -> Option<Self> {
        // SAFETY: `path` is NUL-terminated.
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC) };
        (fd >= 0).then_some(Self(fd))
    }

    /// Read into `buf`. Returns 0 at end of file or on error.
    pub(crate) fn read(&self, buf: &mut [u8]) -> usize {
        loop {
            // SAFETY: `buf` is a valid writable slice for the duration of the call.
            let n = unsafe { libc::read(self.0, buf.as_mut_ptr().cast(), buf.len()) };
            if n >= 0 {
                return n as usize;
            }
            if Errno::last() != Errno::EINTR {
                return 0;
            }
        }
    }
}

impl Drop for RawFile {
    fn drop(&mut self) {
        // SAFETY: the descriptor is owned by this RawFile and closed only here.
        unsafe {
            libc::close(self.0);
        }
    }
}
